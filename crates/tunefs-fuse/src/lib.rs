//! FUSE layer for tunefs.
//!
//! `MusicFs` holds the platform-neutral filesystem logic; the thin
//! `fuser` shim in `unix_fuse` translates kernel requests into its
//! `do_*` methods and maps errors to errnos.

pub mod dispatcher;
pub mod inode;
pub mod node;

#[cfg(unix)]
pub mod fs;
#[cfg(unix)]
pub mod mount;
#[cfg(unix)]
pub mod unix_fuse;

pub use dispatcher::{Dispatcher, TouchAction, TouchKey};
#[cfg(unix)]
pub use fs::{DirEntry, FsError, MusicFs, NodeAttr, NodeKind};
pub use inode::{InodeTable, ROOT_INO};
pub use node::{FileNode, Node};
