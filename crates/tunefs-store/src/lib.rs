//! Metadata store and library-management logic for tunefs.
//!
//! The store is the single source of truth for the Artist/Album/Song
//! hierarchy and the playlist namespace. Song bytes live in the plain
//! file tree; the store owns only identity, paths, and cross-references.

mod drop;
mod error;
mod m3u;
mod moves;
mod playlists;
mod scan;
mod store;
mod tags;

pub use drop::ClassifiedSong;
pub use error::StoreError;
pub use m3u::{parse_playlist, validate_playlist, write_playlist, ParsedEntry, PLAYLIST_HEADER};
pub use playlists::PlaylistEntry;
pub use scan::{scan_library, scan_playlists};
pub use store::{EntryInfo, EntryKind, MetaStore};
pub use tags::{read_tags, read_tags_or_default, write_tags, SongTags};
