//! Mount entry point.

use std::path::Path;

use fuser::MountOption;
use tracing::info;

use crate::fs::MusicFs;
use crate::unix_fuse::TuneFuse;

/// Mount the filesystem and block until it is unmounted.
pub fn mount(fs: MusicFs, mountpoint: &Path) -> Result<(), std::io::Error> {
    let mut options = vec![
        MountOption::FSName("tunefs".to_string()),
        MountOption::AutoUnmount,
        MountOption::DefaultPermissions,
    ];
    if fs.config().allow_other {
        options.push(MountOption::AllowOther);
    }

    info!("mounting tunefs at {}", mountpoint.display());
    fuser::mount2(TuneFuse(fs), mountpoint, &options)?;
    info!("tunefs unmounted");
    Ok(())
}
