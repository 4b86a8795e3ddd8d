//! Mount command: build the configuration, open the store, run the
//! startup scanners, and hand off to FUSE.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use tunefs_core::Config;
use tunefs_fuse::MusicFs;
use tunefs_store::{scan_library, scan_playlists, MetaStore};

pub struct MountArgs {
    pub source: PathBuf,
    pub mountpoint: PathBuf,
    pub config: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub options: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub allow_other: bool,
    pub no_scan: bool,
}

/// Precedence: config file, then `-o` options, then explicit flags.
fn build_config(args: &MountArgs) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::new(&args.source),
    };
    config.source = args.source.clone();
    if let Some(opts) = &args.options {
        config.apply_mount_options(opts)?;
    }
    if let Some(db_path) = &args.db_path {
        config.db_path = db_path.clone();
    }
    if let Some(uid) = args.uid {
        config.uid = Some(uid);
    }
    if let Some(gid) = args.gid {
        config.gid = Some(gid);
    }
    if args.allow_other {
        config.allow_other = true;
    }
    config.validate()?;
    Ok(config)
}

pub fn run(args: MountArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&args)?;
    let store = Arc::new(MetaStore::open(&config)?);

    if !args.no_scan {
        let songs = scan_library(&store)?;
        let playlists = scan_playlists(&store)?;
        info!("startup scan: {songs} songs, {playlists} playlists");
    }

    if !args.mountpoint.exists() {
        std::fs::create_dir_all(&args.mountpoint)?;
    }

    let fs = MusicFs::new(store, config);
    tunefs_fuse::mount::mount(fs, &args.mountpoint)?;
    Ok(())
}
