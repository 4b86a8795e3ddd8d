//! The platform-neutral filesystem core.
//!
//! `MusicFs` answers every protocol operation by resolving the path to
//! a [`Node`], delegating identity questions to the store, and doing
//! plain byte I/O for song data. The `fuser` shim in `unix_fuse` is a
//! thin translation layer over the `do_*` methods here, which keeps
//! this logic testable without a kernel mount.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tracing::{debug, warn};

use tunefs_core::{is_audio_name, Config};
use tunefs_store::{MetaStore, StoreError};

use crate::dispatcher::{Dispatcher, TouchAction, TouchKey};
use crate::inode::InodeTable;
use crate::node::{FileNode, Node, NodeError, DESCRIPTION};

/// Terminal errors of a filesystem operation, one per protocol error
/// code. An unexpected internal failure becomes `Io` rather than a
/// panic across the mount boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("permission denied")]
    PermissionDenied,
    #[error("invalid argument")]
    InvalidArg,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a directory")]
    NotDirectory,
    #[error("cross-device rename")]
    CrossDevice,
    #[error("io error: {0}")]
    Io(String),
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => FsError::NotFound,
            StoreError::AlreadyExists(_) => FsError::AlreadyExists,
            StoreError::PermissionDenied(_) => FsError::PermissionDenied,
            StoreError::InvalidFormat(_) => FsError::InvalidArg,
            StoreError::CrossDevice(_) => FsError::CrossDevice,
            StoreError::Io(err) => err.into(),
            other => FsError::Io(other.to_string()),
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound,
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists,
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied,
            _ => FsError::Io(err.to_string()),
        }
    }
}

impl From<NodeError> for FsError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Reserved(_) => FsError::PermissionDenied,
            NodeError::Unresolvable(_) => FsError::NotFound,
        }
    }
}

/// Whether a node is presented as a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// Attributes of one node, ready for the protocol layer to encode.
#[derive(Debug, Clone)]
pub struct NodeAttr {
    pub ino: u64,
    pub size: u64,
    pub kind: NodeKind,
    pub perm: u16,
    pub uid: u32,
    pub gid: u32,
    pub mtime: SystemTime,
}

/// One entry of a directory listing.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: u64,
    pub name: String,
    pub kind: NodeKind,
}

type SpecialKey = (Option<String>, Option<String>, String);

/// In-memory buffer for a special file with open writers. Reads come
/// from here while `writers > 0`, from the store otherwise.
struct SpecialBuf {
    data: Vec<u8>,
    writers: u32,
}

enum Handle {
    /// A real on-disk file (song, drop staging, playlist staging). The
    /// file is shared so reads and writes can run outside the handle
    /// lock.
    Disk {
        file: Arc<File>,
        real: PathBuf,
        node: FileNode,
        write: bool,
    },
    /// A read-only snapshot served from memory (`.description`).
    Snapshot { data: Vec<u8> },
    /// A special-file buffer participant.
    Special { key: SpecialKey, writer: bool },
}

/// The virtual filesystem over one music library.
pub struct MusicFs {
    store: Arc<MetaStore>,
    config: Config,
    inodes: InodeTable,
    handles: Mutex<HashMap<u64, Handle>>,
    next_fh: AtomicU64,
    specials: Mutex<HashMap<SpecialKey, SpecialBuf>>,
    dispatcher: Dispatcher,
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

impl MusicFs {
    /// Build the filesystem over an opened store, starting the
    /// background dispatcher.
    pub fn new(store: Arc<MetaStore>, config: Config) -> Self {
        let dispatcher =
            Dispatcher::start(Arc::clone(&store), Duration::from_secs(config.quiet_secs));
        MusicFs {
            store,
            config,
            inodes: InodeTable::new(),
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
            specials: Mutex::new(HashMap::new()),
            dispatcher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn owner(&self) -> (u32, u32) {
        let uid = self.config.uid.unwrap_or_else(|| unsafe { libc::getuid() });
        let gid = self.config.gid.unwrap_or_else(|| unsafe { libc::getgid() });
        (uid, gid)
    }

    fn path_of(&self, ino: u64) -> Result<String, FsError> {
        self.inodes.get_path(ino).ok_or(FsError::NotFound)
    }

    fn dir_attr(&self, path: &str) -> NodeAttr {
        let (uid, gid) = self.owner();
        NodeAttr {
            ino: self.inodes.get_or_create(path),
            size: 4096,
            kind: NodeKind::Directory,
            perm: 0o755,
            uid,
            gid,
            mtime: SystemTime::now(),
        }
    }

    fn file_attr(&self, path: &str, size: u64, mtime: SystemTime) -> NodeAttr {
        let (uid, gid) = self.owner();
        NodeAttr {
            ino: self.inodes.get_or_create(path),
            size,
            kind: NodeKind::File,
            perm: 0o644,
            uid,
            gid,
            mtime,
        }
    }

    fn disk_attr(&self, path: &str, real: &std::path::Path) -> Result<NodeAttr, FsError> {
        let meta = std::fs::metadata(real)?;
        let mtime = meta.modified().unwrap_or_else(|_| SystemTime::now());
        Ok(self.file_attr(path, meta.len(), mtime))
    }

    /// Size of a special blob: the live buffer when writers are open,
    /// the stored copy otherwise.
    fn special_len(&self, key: &SpecialKey) -> Result<u64, FsError> {
        let specials = self.specials.lock();
        if let Some(buf) = specials.get(key) {
            if buf.writers > 0 {
                return Ok(buf.data.len() as u64);
            }
        }
        drop(specials);
        let data = self
            .store
            .special_file(key.0.as_deref(), key.1.as_deref(), &key.2)?;
        Ok(data.len() as u64)
    }

    /// Attributes of whatever `path` denotes, or NotFound.
    fn attr_for(&self, path: &str) -> Result<NodeAttr, FsError> {
        match Node::parse(path)? {
            Node::Root | Node::DropDir | Node::PlaylistsDir => Ok(self.dir_attr(path)),
            Node::Artist { artist } => {
                self.store.artist_exists(&artist)?;
                Ok(self.dir_attr(path))
            }
            Node::Album { artist, album } => {
                self.store.album_exists(&artist, &album)?;
                Ok(self.dir_attr(path))
            }
            Node::Playlist { playlist } => {
                self.store.playlist_exists(&playlist)?;
                Ok(self.dir_attr(path))
            }
            Node::File(file) => match file {
                FileNode::Song {
                    artist,
                    album,
                    name,
                } => {
                    let real = self.store.file_path(&artist, &album, &name)?;
                    self.disk_attr(path, &real)
                }
                FileNode::DropFile { name } => {
                    let real = self.store.drop_dir().join(&name);
                    self.disk_attr(path, &real)
                }
                FileNode::PlaylistSong { playlist, name } => {
                    let real = self.store.playlist_song_path(&playlist, &name)?;
                    self.disk_attr(path, &real)
                }
                FileNode::Description { artist, album } => {
                    let text = self.store.description(&artist, album.as_deref())?;
                    Ok(self.file_attr(path, text.len() as u64, SystemTime::now()))
                }
                FileNode::Special {
                    artist,
                    album,
                    name,
                } => {
                    let len = self.special_len(&(artist, album, name))?;
                    Ok(self.file_attr(path, len, SystemTime::now()))
                }
            },
        }
    }

    // Directory protocol

    pub fn do_lookup(&self, parent: u64, name: &str) -> Result<NodeAttr, FsError> {
        let parent_path = self.path_of(parent)?;
        let path = child_path(&parent_path, name);
        match Node::parse(&path) {
            Ok(_) => self.attr_for(&path),
            // Probing for a reserved dot name is an absence, not a sin.
            Err(NodeError::Reserved(_)) => Err(FsError::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    pub fn do_getattr(&self, ino: u64) -> Result<NodeAttr, FsError> {
        let path = self.path_of(ino)?;
        self.attr_for(&path)
    }

    pub fn do_readdir(&self, ino: u64) -> Result<Vec<DirEntry>, FsError> {
        let path = self.path_of(ino)?;
        let mut out = Vec::new();
        let mut push = |this: &Self, name: &str, kind: NodeKind| {
            out.push(DirEntry {
                ino: this.inodes.get_or_create(&child_path(&path, name)),
                name: name.to_string(),
                kind,
            });
        };

        match Node::parse(&path)? {
            Node::Root => {
                for entry in self.store.list_artists()? {
                    push(self, &entry.name, NodeKind::Directory);
                }
                push(self, "drop", NodeKind::Directory);
                push(self, "playlists", NodeKind::Directory);
            }
            Node::DropDir => {
                let drop_dir = self.store.drop_dir();
                if drop_dir.is_dir() {
                    for dirent in std::fs::read_dir(&drop_dir)? {
                        let dirent = dirent?;
                        let name = dirent.file_name().to_string_lossy().into_owned();
                        // Dot names never resolve inside drop, so they
                        // are not listed either.
                        if dirent.file_type()?.is_file() && !name.starts_with('.') {
                            push(self, &name, NodeKind::File);
                        }
                    }
                }
            }
            Node::PlaylistsDir => {
                for entry in self.store.list_playlists()? {
                    push(self, &entry.name, NodeKind::Directory);
                }
            }
            Node::Playlist { playlist } => {
                for entry in self.store.list_playlist_songs(&playlist)? {
                    push(self, &entry.name, NodeKind::File);
                }
            }
            Node::Artist { artist } => {
                push(self, DESCRIPTION, NodeKind::File);
                for entry in self.store.list_albums(&artist)? {
                    push(self, &entry.name, NodeKind::Directory);
                }
            }
            Node::Album { artist, album } => {
                push(self, DESCRIPTION, NodeKind::File);
                for entry in self.store.list_songs(&artist, &album)? {
                    push(self, &entry.name, NodeKind::File);
                }
            }
            Node::File(_) => return Err(FsError::NotDirectory),
        }
        Ok(out)
    }

    pub fn do_mkdir(&self, parent: u64, name: &str) -> Result<NodeAttr, FsError> {
        let parent_path = self.path_of(parent)?;
        let path = child_path(&parent_path, name);
        match Node::parse(&path)? {
            Node::Artist { .. } => {
                let key = self.store.create_artist(name)?;
                Ok(self.dir_attr(&format!("/{key}")))
            }
            Node::Album { artist, .. } => {
                let key = self.store.create_album(&artist, name)?;
                Ok(self.dir_attr(&format!("/{artist}/{key}")))
            }
            Node::Playlist { .. } => {
                let key = self.store.create_playlist(name)?;
                self.store.regenerate_playlist(&key)?;
                std::fs::create_dir_all(self.store.staging_dir(&key))?;
                Ok(self.dir_attr(&format!("/playlists/{key}")))
            }
            Node::DropDir | Node::PlaylistsDir => Err(FsError::AlreadyExists),
            // No subdirectories inside drop, playlists, or albums.
            _ => Err(FsError::PermissionDenied),
        }
    }

    // File protocol

    fn alloc_fh(&self, handle: Handle) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().insert(fh, handle);
        fh
    }

    /// Join a special-file buffer as a writer, seeding it from the
    /// store (or empty on create).
    fn open_special_writer(&self, key: &SpecialKey, truncate: bool) -> u64 {
        let mut specials = self.specials.lock();
        let buf = specials.entry(key.clone()).or_insert_with(|| {
            let data = if truncate {
                Vec::new()
            } else {
                self.store
                    .special_file(key.0.as_deref(), key.1.as_deref(), &key.2)
                    .unwrap_or_default()
            };
            SpecialBuf { data, writers: 0 }
        });
        if truncate {
            buf.data.clear();
        }
        buf.writers += 1;
        drop(specials);
        self.alloc_fh(Handle::Special {
            key: key.clone(),
            writer: true,
        })
    }

    pub fn do_create(&self, parent: u64, name: &str) -> Result<(NodeAttr, u64), FsError> {
        let parent_path = self.path_of(parent)?;
        let path = child_path(&parent_path, name);
        match Node::parse(&path)? {
            Node::File(FileNode::Song { artist, album, .. }) => {
                let dest_dir = self.store.album_dir(&artist, &album);
                let file_name = self.store.create_song(&artist, &album, name, &dest_dir)?;
                std::fs::create_dir_all(&dest_dir)?;
                let real = dest_dir.join(&file_name);
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&real)?;
                let vpath = format!("/{artist}/{album}/{file_name}");
                let attr = self.file_attr(&vpath, 0, SystemTime::now());
                let fh = self.alloc_fh(Handle::Disk {
                    file: Arc::new(file),
                    real,
                    node: FileNode::Song {
                        artist,
                        album,
                        name: file_name,
                    },
                    write: true,
                });
                Ok((attr, fh))
            }
            Node::File(FileNode::DropFile { name }) => {
                if !is_audio_name(&name) {
                    return Err(FsError::InvalidArg);
                }
                let drop_dir = self.store.drop_dir();
                std::fs::create_dir_all(&drop_dir)?;
                let real = drop_dir.join(&name);
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&real)?;
                let attr = self.file_attr(&path, 0, SystemTime::now());
                let fh = self.alloc_fh(Handle::Disk {
                    file: Arc::new(file),
                    real,
                    node: FileNode::DropFile { name },
                    write: true,
                });
                Ok((attr, fh))
            }
            Node::File(FileNode::PlaylistSong { playlist, name }) => {
                self.store.playlist_exists(&playlist)?;
                if !is_audio_name(&name) {
                    return Err(FsError::InvalidArg);
                }
                let staging = self.store.staging_dir(&playlist);
                std::fs::create_dir_all(&staging)?;
                let real = staging.join(&name);
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&real)?;
                let attr = self.file_attr(&path, 0, SystemTime::now());
                let fh = self.alloc_fh(Handle::Disk {
                    file: Arc::new(file),
                    real,
                    node: FileNode::PlaylistSong { playlist, name },
                    write: true,
                });
                Ok((attr, fh))
            }
            Node::File(FileNode::Special {
                artist,
                album,
                name,
            }) => {
                if let Some(artist) = artist.as_deref() {
                    match album.as_deref() {
                        Some(album) => self.store.album_exists(artist, album)?,
                        None => self.store.artist_exists(artist)?,
                    }
                }
                let key = (artist, album, name);
                let fh = self.open_special_writer(&key, true);
                let attr = self.file_attr(&path, 0, SystemTime::now());
                Ok((attr, fh))
            }
            Node::File(FileNode::Description { .. }) => Err(FsError::PermissionDenied),
            _ => Err(FsError::PermissionDenied),
        }
    }

    pub fn do_open(&self, ino: u64, write: bool) -> Result<u64, FsError> {
        let path = self.path_of(ino)?;
        let Node::File(file_node) = Node::parse(&path)? else {
            return Err(FsError::IsDirectory);
        };
        match file_node {
            FileNode::Song {
                ref artist,
                ref album,
                ref name,
            } => {
                let real = self.store.file_path(artist, album, name)?;
                let file = OpenOptions::new().read(true).write(write).open(&real)?;
                Ok(self.alloc_fh(Handle::Disk {
                    file: Arc::new(file),
                    real,
                    node: file_node,
                    write,
                }))
            }
            FileNode::DropFile { ref name } => {
                let real = self.store.drop_dir().join(name);
                let file = OpenOptions::new().read(true).write(write).open(&real)?;
                Ok(self.alloc_fh(Handle::Disk {
                    file: Arc::new(file),
                    real,
                    node: file_node,
                    write,
                }))
            }
            FileNode::PlaylistSong {
                ref playlist,
                ref name,
            } => {
                let real = self.store.playlist_song_path(playlist, name)?;
                let file = OpenOptions::new().read(true).write(write).open(&real)?;
                Ok(self.alloc_fh(Handle::Disk {
                    file: Arc::new(file),
                    real,
                    node: file_node,
                    write,
                }))
            }
            FileNode::Description { artist, album } => {
                if write {
                    return Err(FsError::PermissionDenied);
                }
                let text = self.store.description(&artist, album.as_deref())?;
                Ok(self.alloc_fh(Handle::Snapshot {
                    data: text.into_bytes(),
                }))
            }
            FileNode::Special {
                artist,
                album,
                name,
            } => {
                let key = (artist, album, name);
                if write {
                    Ok(self.open_special_writer(&key, false))
                } else {
                    // Readers go through the store unless a writer is
                    // mid-flight; existence check happens here.
                    self.special_len(&key)?;
                    Ok(self.alloc_fh(Handle::Special { key, writer: false }))
                }
            }
        }
    }

    pub fn do_read(&self, fh: u64, offset: u64, size: u32) -> Result<Vec<u8>, FsError> {
        let handles = self.handles.lock();
        match handles.get(&fh).ok_or(FsError::NotFound)? {
            Handle::Disk { file, .. } => {
                let file = Arc::clone(file);
                drop(handles);
                let mut buf = vec![0u8; size as usize];
                let mut filled = 0usize;
                while filled < buf.len() {
                    let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                buf.truncate(filled);
                Ok(buf)
            }
            Handle::Snapshot { data } => Ok(slice_at(data, offset, size)),
            Handle::Special { key, .. } => {
                let key = key.clone();
                drop(handles);
                let specials = self.specials.lock();
                if let Some(buf) = specials.get(&key) {
                    if buf.writers > 0 {
                        return Ok(slice_at(&buf.data, offset, size));
                    }
                }
                drop(specials);
                let data = self
                    .store
                    .special_file(key.0.as_deref(), key.1.as_deref(), &key.2)?;
                Ok(slice_at(&data, offset, size))
            }
        }
    }

    pub fn do_write(&self, fh: u64, offset: u64, data: &[u8]) -> Result<u32, FsError> {
        let handles = self.handles.lock();
        match handles.get(&fh).ok_or(FsError::NotFound)? {
            Handle::Disk { file, write, .. } => {
                if !write {
                    return Err(FsError::PermissionDenied);
                }
                let file = Arc::clone(file);
                drop(handles);
                file.write_all_at(data, offset)?;
                Ok(data.len() as u32)
            }
            Handle::Snapshot { .. } => Err(FsError::PermissionDenied),
            Handle::Special { key, writer } => {
                if !writer {
                    return Err(FsError::PermissionDenied);
                }
                let key = key.clone();
                drop(handles);
                let mut specials = self.specials.lock();
                let buf = specials.get_mut(&key).ok_or(FsError::NotFound)?;
                let end = offset as usize + data.len();
                if buf.data.len() < end {
                    buf.data.resize(end, 0);
                }
                buf.data[offset as usize..end].copy_from_slice(data);
                Ok(data.len() as u32)
            }
        }
    }

    pub fn do_flush(&self, fh: u64) -> Result<(), FsError> {
        let file = match self.handles.lock().get(&fh) {
            Some(Handle::Disk {
                file, write: true, ..
            }) => Arc::clone(file),
            _ => return Ok(()),
        };
        file.sync_data()?;
        Ok(())
    }

    /// Close a handle. For ordinary songs this rewrites the embedded
    /// tags from the store; for staging handles it records the touch
    /// with the dispatcher instead of classifying synchronously.
    pub fn do_release(&self, fh: u64) -> Result<(), FsError> {
        let handle = self.handles.lock().remove(&fh).ok_or(FsError::NotFound)?;
        match handle {
            Handle::Disk {
                file,
                real,
                node,
                write,
            } => {
                drop(file);
                if !write {
                    return Ok(());
                }
                match node {
                    FileNode::Song {
                        artist,
                        album,
                        name,
                    } => match self.store.song_tags(&artist, &album, &name) {
                        Ok(tags) => {
                            if let Err(err) = tunefs_store::write_tags(&real, &tags) {
                                warn!("tag rewrite of {} failed: {err}", real.display());
                            }
                        }
                        Err(err) => warn!("no tag identity for {}: {err}", real.display()),
                    },
                    FileNode::DropFile { name } => {
                        self.dispatcher
                            .touch(TouchKey::drop(&name), TouchAction::ClassifyDrop {
                                staged: real,
                            });
                    }
                    FileNode::PlaylistSong { playlist, name } => {
                        // Writes through a member path edit the library
                        // song in place; only staged files classify.
                        if real.starts_with(self.store.staging_dir(&playlist)) {
                            self.dispatcher.touch(
                                TouchKey::playlist(&playlist, &name),
                                TouchAction::ClassifyPlaylist {
                                    playlist,
                                    staged: real,
                                },
                            );
                        }
                    }
                    _ => {}
                }
                Ok(())
            }
            Handle::Special { key, writer: true } => {
                let mut specials = self.specials.lock();
                if let Some(buf) = specials.get_mut(&key) {
                    buf.writers = buf.writers.saturating_sub(1);
                    if buf.writers == 0 {
                        let data = std::mem::take(&mut buf.data);
                        specials.remove(&key);
                        drop(specials);
                        if let Err(err) = self.store.put_special_file(
                            key.0.as_deref(),
                            key.1.as_deref(),
                            &key.2,
                            &data,
                        ) {
                            warn!("could not persist special file {}: {err}", key.2);
                        }
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // Removal

    pub fn do_unlink(&self, parent: u64, name: &str) -> Result<(), FsError> {
        let parent_path = self.path_of(parent)?;
        let path = child_path(&parent_path, name);
        match Node::parse(&path)? {
            Node::File(FileNode::Song {
                artist,
                album,
                name,
            }) => {
                let removed = self
                    .store
                    .delete_song(&artist, &album, &name)?
                    .ok_or(FsError::NotFound)?;
                remove_file_quiet(&removed);
                self.inodes.remove_path(&path);
                Ok(())
            }
            Node::File(FileNode::DropFile { name }) => {
                std::fs::remove_file(self.store.drop_dir().join(&name))?;
                self.inodes.remove_path(&path);
                Ok(())
            }
            Node::File(FileNode::PlaylistSong { playlist, name }) => {
                self.store.remove_song_from_playlist(&playlist, &name)?;
                self.store.regenerate_playlist(&playlist)?;
                self.inodes.remove_path(&path);
                Ok(())
            }
            Node::File(FileNode::Description { .. }) => Err(FsError::PermissionDenied),
            Node::File(FileNode::Special {
                artist,
                album,
                name,
            }) => {
                self.store
                    .delete_special_file(artist.as_deref(), album.as_deref(), &name)?;
                self.inodes.remove_path(&path);
                Ok(())
            }
            _ => Err(FsError::IsDirectory),
        }
    }

    pub fn do_rmdir(&self, parent: u64, name: &str) -> Result<(), FsError> {
        let parent_path = self.path_of(parent)?;
        let path = child_path(&parent_path, name);
        match Node::parse(&path)? {
            Node::Artist { artist } => {
                self.store.artist_exists(&artist)?;
                let orphans = self.store.delete_artist(&artist)?;
                for orphan in &orphans {
                    remove_file_quiet(orphan);
                }
                remove_dir_quiet(&self.store.source().join(&artist));
                self.inodes.remove_subtree(&path);
                Ok(())
            }
            Node::Album { artist, album } => {
                self.store.album_exists(&artist, &album)?;
                let orphans = self.store.delete_album(&artist, &album)?;
                for orphan in &orphans {
                    remove_file_quiet(orphan);
                }
                remove_dir_quiet(&self.store.album_dir(&artist, &album));
                self.inodes.remove_subtree(&path);
                Ok(())
            }
            Node::Playlist { playlist } => {
                self.store.delete_playlist(&playlist)?;
                self.inodes.remove_subtree(&path);
                Ok(())
            }
            Node::DropDir | Node::PlaylistsDir | Node::Root => Err(FsError::PermissionDenied),
            Node::File(_) => Err(FsError::NotDirectory),
        }
    }

    // Rename

    pub fn do_rename(
        &self,
        parent: u64,
        name: &str,
        new_parent: u64,
        new_name: &str,
    ) -> Result<(), FsError> {
        let src_path = child_path(&self.path_of(parent)?, name);
        let dst_path = child_path(&self.path_of(new_parent)?, new_name);
        let src = Node::parse(&src_path)?;
        let dst = Node::parse(&dst_path)?;

        match (src, dst) {
            (Node::Artist { artist }, Node::Artist { .. }) => {
                let key = self.store.move_artist(&artist, new_name)?;
                self.inodes.rename_path(&src_path, &format!("/{key}"));
                Ok(())
            }
            (Node::Album { artist, album }, Node::Album {
                artist: new_artist, ..
            }) => {
                let key = self.store.move_album(&artist, &album, &new_artist, new_name)?;
                self.inodes
                    .rename_path(&src_path, &format!("/{new_artist}/{key}"));
                Ok(())
            }
            (
                Node::File(FileNode::Song {
                    artist,
                    album,
                    name,
                }),
                Node::File(FileNode::Song {
                    artist: new_artist,
                    album: new_album,
                    ..
                }),
            ) => {
                let file_name = self
                    .store
                    .move_song(&artist, &album, &name, &new_artist, &new_album, new_name)?;
                self.inodes.rename_path(
                    &src_path,
                    &format!("/{new_artist}/{new_album}/{file_name}"),
                );
                Ok(())
            }
            (
                Node::File(FileNode::DropFile { name }),
                Node::File(FileNode::DropFile { name: new_name }),
            ) => {
                let from = self.store.drop_dir().join(&name);
                let to = self.store.drop_dir().join(&new_name);
                std::fs::rename(&from, &to)
                    .map_err(|err| StoreError::from_rename(err, &from, &to))
                    .map_err(FsError::from)?;
                self.inodes.rename_path(&src_path, &dst_path);
                Ok(())
            }
            (
                Node::File(FileNode::Special {
                    artist,
                    album,
                    name,
                }),
                Node::File(FileNode::Special {
                    artist: new_artist,
                    album: new_album,
                    name: new_name,
                }),
            ) if artist == new_artist && album == new_album => {
                self.store
                    .move_special_file(artist.as_deref(), album.as_deref(), &name, &new_name)?;
                self.inodes.rename_path(&src_path, &dst_path);
                Ok(())
            }
            // Everything else crosses a hierarchy level or touches an
            // entity that renames cannot express.
            _ => {
                debug!("refusing rename {src_path} -> {dst_path}");
                Err(FsError::PermissionDenied)
            }
        }
    }

    /// Apply a size change (truncate). Other attribute changes are
    /// accepted but have no representation here.
    pub fn do_setattr(&self, ino: u64, size: Option<u64>) -> Result<NodeAttr, FsError> {
        let path = self.path_of(ino)?;
        if let Some(size) = size {
            match Node::parse(&path)? {
                Node::File(FileNode::Song {
                    artist,
                    album,
                    name,
                }) => {
                    let real = self.store.file_path(&artist, &album, &name)?;
                    truncate(&real, size)?;
                }
                Node::File(FileNode::DropFile { name }) => {
                    truncate(&self.store.drop_dir().join(&name), size)?;
                }
                Node::File(FileNode::PlaylistSong { playlist, name }) => {
                    let real = self.store.playlist_song_path(&playlist, &name)?;
                    truncate(&real, size)?;
                }
                Node::File(FileNode::Special {
                    artist,
                    album,
                    name,
                }) => {
                    let key = (artist, album, name);
                    let mut specials = self.specials.lock();
                    if let Some(buf) = specials.get_mut(&key) {
                        buf.data.resize(size as usize, 0);
                    } else {
                        drop(specials);
                        let mut data = self.store.special_file(
                            key.0.as_deref(),
                            key.1.as_deref(),
                            &key.2,
                        )?;
                        data.resize(size as usize, 0);
                        self.store.put_special_file(
                            key.0.as_deref(),
                            key.1.as_deref(),
                            &key.2,
                            &data,
                        )?;
                    }
                }
                Node::File(FileNode::Description { .. }) => {
                    return Err(FsError::PermissionDenied)
                }
                _ => return Err(FsError::IsDirectory),
            }
        }
        self.attr_for(&path)
    }
}

fn slice_at(data: &[u8], offset: u64, size: u32) -> Vec<u8> {
    let start = (offset as usize).min(data.len());
    let end = (start + size as usize).min(data.len());
    data[start..end].to_vec()
}

fn truncate(path: &std::path::Path, size: u64) -> Result<(), FsError> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(size)?;
    Ok(())
}

fn remove_file_quiet(path: &std::path::Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!("could not remove {}: {err}", path.display());
        }
    }
}

fn remove_dir_quiet(path: &std::path::Path) {
    if path.is_dir() {
        if let Err(err) = std::fs::remove_dir_all(path) {
            warn!("could not remove directory {}: {err}", path.display());
        }
    }
}
