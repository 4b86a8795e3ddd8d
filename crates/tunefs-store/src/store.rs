//! The embedded metadata store.
//!
//! One long-lived SQLite connection, shared behind a mutex, with every
//! mutating operation wrapped in an explicit transaction. Keys are
//! normalized names; the raw display names are kept alongside so the
//! synthetic `.description` records stay human-readable.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use tracing::{debug, info};

use tunefs_core::{is_audio_name, normalize, Config};

use crate::error::StoreError;

/// Whether a directory entry is listed as a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A single child entry produced by the listing queries, used verbatim
/// to answer directory-listing requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub kind: EntryKind,
}

impl EntryInfo {
    pub fn dir(name: impl Into<String>) -> Self {
        EntryInfo {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        EntryInfo {
            name: name.into(),
            kind: EntryKind::File,
        }
    }
}

#[derive(Serialize)]
struct ArtistRecord {
    name: String,
    path: String,
    albums: Vec<String>,
}

#[derive(Serialize)]
struct AlbumRecord {
    name: String,
    path: String,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS artists (
    id   INTEGER PRIMARY KEY,
    key  TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS albums (
    id        INTEGER PRIMARY KEY,
    artist_id INTEGER NOT NULL REFERENCES artists(id) ON DELETE CASCADE,
    key       TEXT NOT NULL,
    name      TEXT NOT NULL,
    UNIQUE(artist_id, key)
);
CREATE TABLE IF NOT EXISTS songs (
    id        INTEGER PRIMARY KEY,
    album_id  INTEGER NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
    file_name TEXT NOT NULL,
    title     TEXT NOT NULL,
    full_path TEXT NOT NULL,
    UNIQUE(album_id, file_name)
);
CREATE TABLE IF NOT EXISTS playlists (
    id  INTEGER PRIMARY KEY,
    key TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS playlist_entries (
    id          INTEGER PRIMARY KEY,
    playlist_id INTEGER NOT NULL REFERENCES playlists(id) ON DELETE CASCADE,
    file_name   TEXT NOT NULL,
    artist_key  TEXT NOT NULL,
    album_key   TEXT NOT NULL,
    path        TEXT NOT NULL,
    UNIQUE(playlist_id, file_name)
);
CREATE TABLE IF NOT EXISTS special_files (
    id         INTEGER PRIMARY KEY,
    artist_key TEXT NOT NULL DEFAULT '',
    album_key  TEXT NOT NULL DEFAULT '',
    name       TEXT NOT NULL,
    data       BLOB NOT NULL,
    UNIQUE(artist_key, album_key, name)
);
";

/// Embedded transactional store for the Artist/Album/Song hierarchy and
/// the playlist namespace.
pub struct MetaStore {
    conn: Mutex<Connection>,
    source: PathBuf,
}

impl MetaStore {
    /// Open (or create) the store described by `config`.
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        let conn = Connection::open(&config.db_path)?;
        Self::init(conn, config.source.clone())
    }

    /// Open an in-memory store rooted at `source` (used by tests).
    pub fn open_in_memory(source: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, source.to_path_buf())
    }

    fn init(conn: Connection, source: PathBuf) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             PRAGMA foreign_keys=ON;",
        )?;
        conn.execute_batch(SCHEMA)?;
        info!("metadata store ready at source {}", source.display());
        Ok(MetaStore {
            conn: Mutex::new(conn),
            source,
        })
    }

    /// Root of the on-disk music tree.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// On-disk directory backing an album.
    pub fn album_dir(&self, artist: &str, album: &str) -> PathBuf {
        self.source.join(artist).join(album)
    }

    /// The flat staging directory for dropped files.
    pub fn drop_dir(&self) -> PathBuf {
        self.source.join("drop")
    }

    /// Directory holding generated playlist files and staging subdirs.
    pub fn playlists_dir(&self) -> PathBuf {
        self.source.join("playlists")
    }

    /// Staging directory for files dropped into one playlist.
    pub fn staging_dir(&self, playlist: &str) -> PathBuf {
        self.playlists_dir().join(playlist)
    }

    /// Run `f` inside a single-writer transaction.
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run a read-only query against the latest committed state.
    pub(crate) fn with_read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock();
        f(&conn)
    }

    // Creation

    /// Create a new artist from a raw display name.
    pub fn create_artist(&self, raw: &str) -> Result<String, StoreError> {
        let key = normalize(raw);
        if key.is_empty() {
            return Err(StoreError::InvalidFormat(format!(
                "artist name {raw:?} normalizes to nothing"
            )));
        }
        if tunefs_core::is_reserved_dir(&key) {
            return Err(StoreError::PermissionDenied(format!(
                "{key} is a reserved directory name"
            )));
        }
        self.with_tx(|tx| {
            if artist_id(tx, &key)?.is_some() {
                return Err(StoreError::AlreadyExists(key.clone()));
            }
            tx.execute(
                "INSERT INTO artists (key, name) VALUES (?1, ?2)",
                params![key, raw],
            )?;
            debug!("created artist {key}");
            Ok(key.clone())
        })
    }

    /// Create a new album under an existing artist.
    pub fn create_album(&self, artist: &str, raw: &str) -> Result<String, StoreError> {
        let key = normalize(raw);
        if key.is_empty() {
            return Err(StoreError::InvalidFormat(format!(
                "album name {raw:?} normalizes to nothing"
            )));
        }
        self.with_tx(|tx| {
            let artist_id = require_artist(tx, artist)?;
            if album_id(tx, artist_id, &key)?.is_some() {
                return Err(StoreError::AlreadyExists(format!("{artist}/{key}")));
            }
            tx.execute(
                "INSERT INTO albums (artist_id, key, name) VALUES (?1, ?2, ?3)",
                params![artist_id, key, raw],
            )?;
            debug!("created album {artist}/{key}");
            Ok(key.clone())
        })
    }

    /// Create a song record under an existing artist/album. The song's
    /// bytes live at `dest_dir/<normalized name>.<ext>`; writing them is
    /// the caller's job.
    pub fn create_song(
        &self,
        artist: &str,
        album: &str,
        raw_name: &str,
        dest_dir: &Path,
    ) -> Result<String, StoreError> {
        if !is_audio_name(raw_name) {
            return Err(StoreError::InvalidFormat(format!(
                "{raw_name:?} is not a supported audio file"
            )));
        }
        let stem = file_stem(raw_name);
        let file_name = format!("{}.{}", normalize(stem), tunefs_core::AUDIO_EXT);
        let full_path = dest_dir.join(&file_name);

        self.with_tx(|tx| {
            let artist_id = require_artist(tx, artist)?;
            let album_id = require_album(tx, artist_id, artist, album)?;
            tx.execute(
                "INSERT INTO songs (album_id, file_name, title, full_path)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(album_id, file_name) DO UPDATE SET
                     title = excluded.title,
                     full_path = excluded.full_path",
                params![album_id, file_name, stem, full_path.to_string_lossy()],
            )?;
            debug!("created song {artist}/{album}/{file_name}");
            Ok(file_name.clone())
        })
    }

    /// Upsert a song (and its artist/album, if absent) from embedded
    /// tags. Used by the startup scanner and the drop pipeline.
    pub fn store_song_from_tags(
        &self,
        tags: &crate::SongTags,
        path: &Path,
    ) -> Result<(), StoreError> {
        let artist_key = normalize(&tags.artist);
        if tunefs_core::is_reserved_dir(&artist_key) {
            return Err(StoreError::PermissionDenied(format!(
                "artist tag {:?} collides with a reserved directory",
                tags.artist
            )));
        }
        let album_key = normalize(&tags.album);
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| tunefs_core::AUDIO_EXT.to_string());
        let file_name = format!("{}.{}", normalize(&tags.title), ext);

        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO artists (key, name) VALUES (?1, ?2)
                 ON CONFLICT(key) DO NOTHING",
                params![artist_key, tags.artist],
            )?;
            let artist_id = artist_id(tx, &artist_key)?.expect("artist row just inserted");
            tx.execute(
                "INSERT INTO albums (artist_id, key, name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(artist_id, key) DO NOTHING",
                params![artist_id, album_key, tags.album],
            )?;
            let album_id = album_id(tx, artist_id, &album_key)?.expect("album row just inserted");
            tx.execute(
                "INSERT INTO songs (album_id, file_name, title, full_path)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(album_id, file_name) DO UPDATE SET
                     title = excluded.title,
                     full_path = excluded.full_path",
                params![album_id, file_name, tags.title, path.to_string_lossy()],
            )?;
            Ok(())
        })
    }

    // Resolution queries

    /// Fail with NotFound unless the artist exists.
    pub fn artist_exists(&self, artist: &str) -> Result<(), StoreError> {
        self.with_read(|conn| {
            artist_id(conn, artist)?
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound(artist.to_string()))
        })
    }

    /// Fail with NotFound unless the album exists under the artist.
    pub fn album_exists(&self, artist: &str, album: &str) -> Result<(), StoreError> {
        self.with_read(|conn| {
            let artist_id = require_artist(conn, artist)?;
            album_id(conn, artist_id, album)?
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound(format!("{artist}/{album}")))
        })
    }

    /// Resolve the on-disk path of a song.
    pub fn file_path(&self, artist: &str, album: &str, name: &str) -> Result<PathBuf, StoreError> {
        self.with_read(|conn| {
            let artist_id = require_artist(conn, artist)?;
            let album_id = require_album(conn, artist_id, artist, album)?;
            let path: Option<String> = conn
                .query_row(
                    "SELECT full_path FROM songs WHERE album_id = ?1 AND file_name = ?2",
                    params![album_id, name],
                    |row| row.get(0),
                )
                .optional()?;
            path.map(PathBuf::from)
                .ok_or_else(|| StoreError::NotFound(format!("{artist}/{album}/{name}")))
        })
    }

    /// The tag fields a song should carry, with the display names of
    /// its artist and album. Used to rewrite tags after a write so the
    /// file never drifts from its filesystem location.
    pub fn song_tags(
        &self,
        artist: &str,
        album: &str,
        name: &str,
    ) -> Result<crate::SongTags, StoreError> {
        self.with_read(|conn| {
            conn.query_row(
                "SELECT s.title, ar.name, al.name FROM songs s
                 JOIN albums al ON s.album_id = al.id
                 JOIN artists ar ON al.artist_id = ar.id
                 WHERE ar.key = ?1 AND al.key = ?2 AND s.file_name = ?3",
                params![artist, album, name],
                |row| {
                    Ok(crate::SongTags {
                        title: row.get(0)?,
                        artist: row.get(1)?,
                        album: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("{artist}/{album}/{name}")))
        })
    }

    /// Render the `.description` record for an artist or album scope as
    /// a JSON line.
    pub fn description(&self, artist: &str, album: Option<&str>) -> Result<String, StoreError> {
        self.with_read(|conn| {
            let (artist_id, artist_name): (i64, String) = conn
                .query_row(
                    "SELECT id, name FROM artists WHERE key = ?1",
                    params![artist],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(artist.to_string()))?;

            let json = match album {
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT key FROM albums WHERE artist_id = ?1 ORDER BY key",
                    )?;
                    let albums = stmt
                        .query_map(params![artist_id], |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<_>, _>>()?;
                    serde_json::to_string(&ArtistRecord {
                        name: artist_name,
                        path: artist.to_string(),
                        albums,
                    })
                }
                Some(album) => {
                    let name: String = conn
                        .query_row(
                            "SELECT name FROM albums WHERE artist_id = ?1 AND key = ?2",
                            params![artist_id, album],
                            |row| row.get(0),
                        )
                        .optional()?
                        .ok_or_else(|| StoreError::NotFound(format!("{artist}/{album}")))?;
                    serde_json::to_string(&AlbumRecord {
                        name,
                        path: album.to_string(),
                    })
                }
            }
            .map_err(|e| StoreError::InvalidFormat(e.to_string()))?;

            Ok(format!("{json}\n"))
        })
    }

    // Listings

    /// Ordered set of artist directories at the root of the hierarchy.
    pub fn list_artists(&self) -> Result<Vec<EntryInfo>, StoreError> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM artists ORDER BY key")?;
            let entries = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries.into_iter().map(EntryInfo::dir).collect())
        })
    }

    /// Ordered set of album directories under an artist.
    pub fn list_albums(&self, artist: &str) -> Result<Vec<EntryInfo>, StoreError> {
        self.with_read(|conn| {
            let artist_id = require_artist(conn, artist)?;
            let mut stmt =
                conn.prepare("SELECT key FROM albums WHERE artist_id = ?1 ORDER BY key")?;
            let entries = stmt
                .query_map(params![artist_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries.into_iter().map(EntryInfo::dir).collect())
        })
    }

    /// Ordered set of song files under an album.
    pub fn list_songs(&self, artist: &str, album: &str) -> Result<Vec<EntryInfo>, StoreError> {
        self.with_read(|conn| {
            let artist_id = require_artist(conn, artist)?;
            let album_id = require_album(conn, artist_id, artist, album)?;
            let mut stmt =
                conn.prepare("SELECT file_name FROM songs WHERE album_id = ?1 ORDER BY file_name")?;
            let entries = stmt
                .query_map(params![album_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries.into_iter().map(EntryInfo::file).collect())
        })
    }

    // Deletion. The store removes metadata only and hands back the
    // orphaned on-disk paths; unlinking them is the caller's step.

    /// Delete an artist and every descendant record. Missing artists
    /// are not an error.
    pub fn delete_artist(&self, artist: &str) -> Result<Vec<PathBuf>, StoreError> {
        self.with_tx(|tx| {
            let Some(artist_id) = artist_id(tx, artist)? else {
                return Ok(Vec::new());
            };
            let mut stmt = tx.prepare(
                "SELECT s.full_path FROM songs s
                 JOIN albums a ON s.album_id = a.id
                 WHERE a.artist_id = ?1",
            )?;
            let paths = stmt
                .query_map(params![artist_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);
            tx.execute("DELETE FROM artists WHERE id = ?1", params![artist_id])?;
            debug!("deleted artist {artist} ({} songs)", paths.len());
            Ok(paths.into_iter().map(PathBuf::from).collect())
        })
    }

    /// Delete an album and its songs. A missing album is not an error,
    /// but a missing artist is.
    pub fn delete_album(&self, artist: &str, album: &str) -> Result<Vec<PathBuf>, StoreError> {
        self.with_tx(|tx| {
            let artist_id = require_artist(tx, artist)?;
            let Some(album_id) = album_id(tx, artist_id, album)? else {
                return Ok(Vec::new());
            };
            let mut stmt = tx.prepare("SELECT full_path FROM songs WHERE album_id = ?1")?;
            let paths = stmt
                .query_map(params![album_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);
            tx.execute("DELETE FROM albums WHERE id = ?1", params![album_id])?;
            debug!("deleted album {artist}/{album} ({} songs)", paths.len());
            Ok(paths.into_iter().map(PathBuf::from).collect())
        })
    }

    /// Delete one song record, returning its on-disk path if it existed.
    pub fn delete_song(
        &self,
        artist: &str,
        album: &str,
        name: &str,
    ) -> Result<Option<PathBuf>, StoreError> {
        if name.starts_with('.') {
            return Ok(None);
        }
        self.with_tx(|tx| {
            let artist_id = require_artist(tx, artist)?;
            let album_id = require_album(tx, artist_id, artist, album)?;
            let path: Option<String> = tx
                .query_row(
                    "SELECT full_path FROM songs WHERE album_id = ?1 AND file_name = ?2",
                    params![album_id, name],
                    |row| row.get(0),
                )
                .optional()?;
            tx.execute(
                "DELETE FROM songs WHERE album_id = ?1 AND file_name = ?2",
                params![album_id, name],
            )?;
            Ok(path.map(PathBuf::from))
        })
    }

    // Special files: opaque per-directory byte blobs stored in the
    // database instead of on disk.

    /// Fetch a special-file blob scoped to (artist?, album?).
    pub fn special_file(
        &self,
        artist: Option<&str>,
        album: Option<&str>,
        name: &str,
    ) -> Result<Vec<u8>, StoreError> {
        self.with_read(|conn| {
            require_scope(conn, artist, album)?;
            conn.query_row(
                "SELECT data FROM special_files
                 WHERE artist_key = ?1 AND album_key = ?2 AND name = ?3",
                params![artist.unwrap_or(""), album.unwrap_or(""), name],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
        })
    }

    /// Insert or replace a special-file blob.
    pub fn put_special_file(
        &self,
        artist: Option<&str>,
        album: Option<&str>,
        name: &str,
        data: &[u8],
    ) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            require_scope(tx, artist, album)?;
            tx.execute(
                "INSERT INTO special_files (artist_key, album_key, name, data)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(artist_key, album_key, name) DO UPDATE SET data = excluded.data",
                params![artist.unwrap_or(""), album.unwrap_or(""), name, data],
            )?;
            Ok(())
        })
    }

    /// Remove a special-file blob. Missing blobs are not an error.
    pub fn delete_special_file(
        &self,
        artist: Option<&str>,
        album: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM special_files
                 WHERE artist_key = ?1 AND album_key = ?2 AND name = ?3",
                params![artist.unwrap_or(""), album.unwrap_or(""), name],
            )?;
            Ok(())
        })
    }

    /// Rename a special-file blob within one scope.
    pub fn move_special_file(
        &self,
        artist: Option<&str>,
        album: Option<&str>,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE OR REPLACE special_files SET name = ?4
                 WHERE artist_key = ?1 AND album_key = ?2 AND name = ?3",
                params![
                    artist.unwrap_or(""),
                    album.unwrap_or(""),
                    old_name,
                    new_name
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(old_name.to_string()));
            }
            Ok(())
        })
    }
}

/// The stem of a file name (everything before the final extension).
pub(crate) fn file_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

pub(crate) fn artist_id(conn: &Connection, key: &str) -> Result<Option<i64>, rusqlite::Error> {
    conn.query_row(
        "SELECT id FROM artists WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub(crate) fn album_id(
    conn: &Connection,
    artist_id: i64,
    key: &str,
) -> Result<Option<i64>, rusqlite::Error> {
    conn.query_row(
        "SELECT id FROM albums WHERE artist_id = ?1 AND key = ?2",
        params![artist_id, key],
        |row| row.get(0),
    )
    .optional()
}

pub(crate) fn require_artist(conn: &Connection, artist: &str) -> Result<i64, StoreError> {
    artist_id(conn, artist)?.ok_or_else(|| StoreError::NotFound(artist.to_string()))
}

pub(crate) fn require_album(
    conn: &Connection,
    artist_id: i64,
    artist: &str,
    album: &str,
) -> Result<i64, StoreError> {
    album_id(conn, artist_id, album)?
        .ok_or_else(|| StoreError::NotFound(format!("{artist}/{album}")))
}

/// Check that a special-file scope points at an existing hierarchy node.
fn require_scope(
    conn: &Connection,
    artist: Option<&str>,
    album: Option<&str>,
) -> Result<(), StoreError> {
    if let Some(artist) = artist {
        let artist_id = require_artist(conn, artist)?;
        if let Some(album) = album {
            require_album(conn, artist_id, artist, album)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MetaStore {
        MetaStore::open_in_memory(Path::new("/music")).unwrap()
    }

    #[test]
    fn test_create_and_list_artist() {
        let s = store();
        let key = s.create_artist("Pink Floyd").unwrap();
        assert_eq!(key, "Pink_Floyd");

        let artists = s.list_artists().unwrap();
        assert_eq!(artists, vec![EntryInfo::dir("Pink_Floyd")]);
    }

    #[test]
    fn test_create_artist_twice_is_already_exists() {
        let s = store();
        s.create_artist("Pink Floyd").unwrap();
        let err = s.create_artist("Pink  Floyd").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(s.list_artists().unwrap().len(), 1);
    }

    #[test]
    fn test_create_artist_reserved_name_rejected() {
        let s = store();
        assert!(matches!(
            s.create_artist("drop").unwrap_err(),
            StoreError::PermissionDenied(_)
        ));
        assert!(matches!(
            s.create_artist("playlists").unwrap_err(),
            StoreError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_song_tags_reports_display_names() {
        let s = store();
        s.create_artist("Pink Floyd").unwrap();
        s.create_album("Pink_Floyd", "The Wall").unwrap();
        s.create_song("Pink_Floyd", "The_Wall", "Mother.mp3", Path::new("/m"))
            .unwrap();

        let tags = s.song_tags("Pink_Floyd", "The_Wall", "Mother.mp3").unwrap();
        assert_eq!(tags.title, "Mother");
        assert_eq!(tags.artist, "Pink Floyd");
        assert_eq!(tags.album, "The Wall");

        assert!(matches!(
            s.song_tags("Pink_Floyd", "The_Wall", "gone.mp3").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_create_album_requires_artist() {
        let s = store();
        let err = s.create_album("Nobody", "Album").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_create_song_rejects_wrong_extension() {
        let s = store();
        s.create_artist("A").unwrap();
        s.create_album("A", "B").unwrap();
        let err = s
            .create_song("A", "B", "notes.txt", Path::new("/music/A/B"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidFormat(_)));
        // No store mutation happened.
        assert!(s.list_songs("A", "B").unwrap().is_empty());
    }

    #[test]
    fn test_create_song_and_resolve_path() {
        let s = store();
        s.create_artist("A").unwrap();
        s.create_album("A", "B").unwrap();
        let name = s
            .create_song("A", "B", "My Song.mp3", Path::new("/music/A/B"))
            .unwrap();
        assert_eq!(name, "My_Song.mp3");

        let path = s.file_path("A", "B", "My_Song.mp3").unwrap();
        assert_eq!(path, PathBuf::from("/music/A/B/My_Song.mp3"));
    }

    #[test]
    fn test_concurrent_album_creation_single_winner() {
        use std::sync::Arc;

        let s = Arc::new(store());
        s.create_artist("A").unwrap();
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || s.create_album("A", "Same Name"))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(StoreError::AlreadyExists(_)))));
        assert_eq!(s.list_albums("A").unwrap().len(), 1);
    }

    #[test]
    fn test_listing_missing_parent_is_not_found() {
        let s = store();
        assert!(matches!(
            s.list_albums("Nobody").unwrap_err(),
            StoreError::NotFound(_)
        ));
        s.create_artist("A").unwrap();
        assert!(matches!(
            s.list_songs("A", "Nothing").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_delete_artist_returns_descendant_paths() {
        let s = store();
        s.create_artist("A").unwrap();
        s.create_album("A", "B").unwrap();
        s.create_song("A", "B", "one.mp3", Path::new("/music/A/B"))
            .unwrap();
        s.create_song("A", "B", "two.mp3", Path::new("/music/A/B"))
            .unwrap();

        let paths = s.delete_artist("A").unwrap();
        assert_eq!(paths.len(), 2);
        assert!(s.list_artists().unwrap().is_empty());

        // Idempotent.
        assert!(s.delete_artist("A").unwrap().is_empty());
    }

    #[test]
    fn test_delete_album_missing_parent() {
        let s = store();
        assert!(matches!(
            s.delete_album("Nobody", "B").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_delete_song_idempotent() {
        let s = store();
        s.create_artist("A").unwrap();
        s.create_album("A", "B").unwrap();
        assert!(s.delete_song("A", "B", "missing.mp3").unwrap().is_none());
    }

    #[test]
    fn test_description_artist_lists_albums() {
        let s = store();
        s.create_artist("Sigur Rós").unwrap();
        s.create_album("Sigur_Ros", "Takk").unwrap();

        let desc = s.description("Sigur_Ros", None).unwrap();
        assert!(desc.ends_with('\n'));
        let v: serde_json::Value = serde_json::from_str(desc.trim()).unwrap();
        assert_eq!(v["name"], "Sigur Rós");
        assert_eq!(v["path"], "Sigur_Ros");
        assert_eq!(v["albums"][0], "Takk");
    }

    #[test]
    fn test_description_album() {
        let s = store();
        s.create_artist("A").unwrap();
        s.create_album("A", "The Wall").unwrap();
        let desc = s.description("A", Some("The_Wall")).unwrap();
        let v: serde_json::Value = serde_json::from_str(desc.trim()).unwrap();
        assert_eq!(v["name"], "The Wall");
    }

    #[test]
    fn test_special_file_roundtrip() {
        let s = store();
        s.create_artist("A").unwrap();
        s.put_special_file(Some("A"), None, "._meta", b"blob")
            .unwrap();
        assert_eq!(s.special_file(Some("A"), None, "._meta").unwrap(), b"blob");

        s.move_special_file(Some("A"), None, "._meta", "._meta2")
            .unwrap();
        assert!(matches!(
            s.special_file(Some("A"), None, "._meta").unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert_eq!(s.special_file(Some("A"), None, "._meta2").unwrap(), b"blob");

        s.delete_special_file(Some("A"), None, "._meta2").unwrap();
        assert!(s.special_file(Some("A"), None, "._meta2").is_err());
    }

    #[test]
    fn test_special_file_scope_must_exist() {
        let s = store();
        let err = s
            .put_special_file(Some("Nobody"), None, "._x", b"")
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_store_song_from_tags_creates_hierarchy() {
        let s = store();
        let tags = crate::SongTags {
            title: "Echoes".to_string(),
            artist: "Pink Floyd".to_string(),
            album: "Meddle".to_string(),
        };
        s.store_song_from_tags(&tags, Path::new("/music/x/echoes.mp3"))
            .unwrap();

        assert_eq!(s.list_artists().unwrap(), vec![EntryInfo::dir("Pink_Floyd")]);
        assert_eq!(
            s.list_songs("Pink_Floyd", "Meddle").unwrap(),
            vec![EntryInfo::file("Echoes.mp3")]
        );
        // Scanning the same file twice keeps one row.
        s.store_song_from_tags(&tags, Path::new("/music/x/echoes.mp3"))
            .unwrap();
        assert_eq!(s.list_songs("Pink_Floyd", "Meddle").unwrap().len(), 1);
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("song.mp3"), "song");
        assert_eq!(file_stem("song"), "song");
        assert_eq!(file_stem("a.b.mp3"), "a.b");
        assert_eq!(file_stem(".hidden"), ".hidden");
    }
}
