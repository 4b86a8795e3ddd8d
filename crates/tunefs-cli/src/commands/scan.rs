//! Scan command: populate the metadata database from a source tree
//! without mounting anything.

use std::path::PathBuf;

use tunefs_core::Config;
use tunefs_store::{scan_library, scan_playlists, MetaStore};

pub fn run(source: PathBuf, db_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::new(source);
    if let Some(db_path) = db_path {
        config.db_path = db_path;
    }
    config.validate()?;

    let store = MetaStore::open(&config)?;
    let songs = scan_library(&store)?;
    let playlists = scan_playlists(&store)?;
    println!("recorded {songs} songs and {playlists} playlists");
    Ok(())
}
