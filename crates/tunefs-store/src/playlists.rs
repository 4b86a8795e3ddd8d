//! Playlist namespace: membership rows in the store plus one generated
//! m3u file per playlist under `<source>/playlists/`.
//!
//! Each playlist directory in the mount doubles as a staging area:
//! files copied in sit in `<source>/playlists/<key>/` until the
//! dispatcher classifies them into real membership entries.

use std::path::PathBuf;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use tunefs_core::normalize;

use crate::error::StoreError;
use crate::m3u::{self, ParsedEntry};
use crate::store::{file_stem, EntryInfo, MetaStore};

/// One song's membership in a playlist, with enough identity to follow
/// the song when it moves within the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub file_name: String,
    pub artist_key: String,
    pub album_key: String,
    pub path: PathBuf,
}

fn playlist_id(conn: &Connection, key: &str) -> Result<Option<i64>, rusqlite::Error> {
    conn.query_row(
        "SELECT id FROM playlists WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

fn require_playlist(conn: &Connection, key: &str) -> Result<i64, StoreError> {
    playlist_id(conn, key)?.ok_or_else(|| StoreError::NotFound(format!("playlists/{key}")))
}

fn entries_of(conn: &Connection, playlist_id: i64) -> Result<Vec<PlaylistEntry>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT file_name, artist_key, album_key, path FROM playlist_entries
         WHERE playlist_id = ?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map(params![playlist_id], |row| {
            Ok(PlaylistEntry {
                file_name: row.get(0)?,
                artist_key: row.get(1)?,
                album_key: row.get(2)?,
                path: PathBuf::from(row.get::<_, String>(3)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

impl MetaStore {
    /// Create a playlist from a raw display name.
    pub fn create_playlist(&self, raw: &str) -> Result<String, StoreError> {
        let key = normalize(raw);
        if key.is_empty() {
            return Err(StoreError::InvalidFormat(format!(
                "playlist name {raw:?} normalizes to nothing"
            )));
        }
        self.with_tx(|tx| {
            if playlist_id(tx, &key)?.is_some() {
                return Err(StoreError::AlreadyExists(format!("playlists/{key}")));
            }
            tx.execute("INSERT INTO playlists (key) VALUES (?1)", params![key])?;
            debug!("created playlist {key}");
            Ok(key.clone())
        })
    }

    /// Delete a playlist: its membership rows, its generated file, and
    /// any still-staged files.
    pub fn delete_playlist(&self, key: &str) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            let id = require_playlist(tx, key)?;
            tx.execute("DELETE FROM playlists WHERE id = ?1", params![id])?;
            Ok(())
        })?;

        let generated = self.generated_playlist_path(key);
        if let Err(err) = std::fs::remove_file(&generated) {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(err.into());
            }
        }
        let staging = self.staging_dir(key);
        if staging.is_dir() {
            std::fs::remove_dir_all(&staging)?;
        }
        debug!("deleted playlist {key}");
        Ok(())
    }

    /// Fail with NotFound unless the playlist exists.
    pub fn playlist_exists(&self, key: &str) -> Result<(), StoreError> {
        self.with_read(|conn| require_playlist(conn, key).map(|_| ()))
    }

    /// Ordered set of playlist directories.
    pub fn list_playlists(&self) -> Result<Vec<EntryInfo>, StoreError> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM playlists ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys.into_iter().map(EntryInfo::dir).collect())
        })
    }

    /// Membership entries in insertion order.
    pub fn playlist_entries(&self, key: &str) -> Result<Vec<PlaylistEntry>, StoreError> {
        self.with_read(|conn| {
            let id = require_playlist(conn, key)?;
            entries_of(conn, id)
        })
    }

    /// Children of a playlist directory: classified members plus any
    /// files still sitting in the staging area.
    pub fn list_playlist_songs(&self, key: &str) -> Result<Vec<EntryInfo>, StoreError> {
        let mut entries = self.playlist_entries(key)?;
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        let mut out: Vec<EntryInfo> = entries
            .into_iter()
            .map(|e| EntryInfo::file(e.file_name))
            .collect();

        let staging = self.staging_dir(key);
        if staging.is_dir() {
            for dirent in std::fs::read_dir(&staging)? {
                let dirent = dirent?;
                let name = dirent.file_name().to_string_lossy().into_owned();
                if dirent.file_type()?.is_file() && !out.iter().any(|e| e.name == name) {
                    out.push(EntryInfo::file(name));
                }
            }
        }
        Ok(out)
    }

    /// Resolve a file inside a playlist directory: a classified member
    /// resolves to the library song it references, anything else to a
    /// staged file.
    pub fn playlist_song_path(&self, key: &str, name: &str) -> Result<PathBuf, StoreError> {
        let member = self.with_read(|conn| {
            let id = require_playlist(conn, key)?;
            let path: Option<String> = conn
                .query_row(
                    "SELECT path FROM playlist_entries
                     WHERE playlist_id = ?1 AND file_name = ?2",
                    params![id, name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(path)
        })?;
        if let Some(path) = member {
            return Ok(PathBuf::from(path));
        }
        let staged = self.staging_dir(key).join(name);
        if staged.is_file() {
            return Ok(staged);
        }
        Err(StoreError::NotFound(format!("playlists/{key}/{name}")))
    }

    /// Link an existing library song into a playlist. Repeated adds of
    /// the same song update the stored back-reference.
    pub fn add_song_to_playlist(
        &self,
        playlist: &str,
        artist: &str,
        album: &str,
        file_name: &str,
    ) -> Result<(), StoreError> {
        let path = self.file_path(artist, album, file_name)?;
        self.with_tx(|tx| {
            let id = require_playlist(tx, playlist)?;
            tx.execute(
                "INSERT INTO playlist_entries (playlist_id, file_name, artist_key, album_key, path)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(playlist_id, file_name) DO UPDATE SET
                     artist_key = excluded.artist_key,
                     album_key = excluded.album_key,
                     path = excluded.path",
                params![id, file_name, artist, album, path.to_string_lossy()],
            )?;
            debug!("linked {artist}/{album}/{file_name} into playlist {playlist}");
            Ok(())
        })
    }

    /// Drop one membership entry (or a still-staged file of the same
    /// name). The library song itself is untouched.
    pub fn remove_song_from_playlist(&self, playlist: &str, name: &str) -> Result<(), StoreError> {
        let removed = self.with_tx(|tx| {
            let id = require_playlist(tx, playlist)?;
            let n = tx.execute(
                "DELETE FROM playlist_entries WHERE playlist_id = ?1 AND file_name = ?2",
                params![id, name],
            )?;
            Ok(n > 0)
        })?;
        if removed {
            return Ok(());
        }
        let staged = self.staging_dir(playlist).join(name);
        if staged.is_file() {
            std::fs::remove_file(&staged)?;
            return Ok(());
        }
        Err(StoreError::NotFound(format!("playlists/{playlist}/{name}")))
    }

    /// Where the generated m3u file for a playlist lives.
    pub fn generated_playlist_path(&self, key: &str) -> PathBuf {
        self.playlists_dir()
            .join(format!("{key}.{}", tunefs_core::PLAYLIST_EXT))
    }

    /// Rewrite the generated m3u file from the current membership rows.
    pub fn regenerate_playlist(&self, key: &str) -> Result<(), StoreError> {
        let entries = self.playlist_entries(key)?;
        let parsed: Vec<ParsedEntry> = entries
            .iter()
            .map(|e| ParsedEntry {
                artist: e.artist_key.clone(),
                album: e.album_key.clone(),
                title: file_stem(&e.file_name).to_string(),
                path: e.path.clone(),
            })
            .collect();
        std::fs::create_dir_all(self.playlists_dir())?;
        m3u::write_playlist(&self.generated_playlist_path(key), &parsed)
    }

    /// Regenerate several playlists, logging failures instead of
    /// aborting on the first bad one.
    pub(crate) fn regenerate_playlists(&self, keys: &[String]) {
        for key in keys {
            if let Err(err) = self.regenerate_playlist(key) {
                warn!("failed to regenerate playlist {key}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_song() -> (tempfile::TempDir, MetaStore) {
        let dir = tempfile::tempdir().unwrap();
        let s = MetaStore::open_in_memory(dir.path()).unwrap();
        s.create_artist("A").unwrap();
        s.create_album("A", "B").unwrap();
        s.create_song("A", "B", "song.mp3", &dir.path().join("A/B"))
            .unwrap();
        (dir, s)
    }

    #[test]
    fn test_create_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let s = MetaStore::open_in_memory(dir.path()).unwrap();

        let key = s.create_playlist("Road Trip").unwrap();
        assert_eq!(key, "Road_Trip");
        assert_eq!(s.list_playlists().unwrap(), vec![EntryInfo::dir("Road_Trip")]);
        assert!(matches!(
            s.create_playlist("Road Trip").unwrap_err(),
            StoreError::AlreadyExists(_)
        ));

        s.delete_playlist("Road_Trip").unwrap();
        assert!(s.list_playlists().unwrap().is_empty());
        assert!(matches!(
            s.delete_playlist("Road_Trip").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_add_song_requires_library_membership() {
        let (_dir, s) = store_with_song();
        s.create_playlist("p").unwrap();
        assert!(matches!(
            s.add_song_to_playlist("p", "A", "B", "missing.mp3")
                .unwrap_err(),
            StoreError::NotFound(_)
        ));
        s.add_song_to_playlist("p", "A", "B", "song.mp3").unwrap();

        let entries = s.playlist_entries("p").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].artist_key, "A");
        assert_eq!(entries[0].file_name, "song.mp3");
    }

    #[test]
    fn test_playlist_song_path_prefers_membership() {
        let (dir, s) = store_with_song();
        s.create_playlist("p").unwrap();
        s.add_song_to_playlist("p", "A", "B", "song.mp3").unwrap();

        let path = s.playlist_song_path("p", "song.mp3").unwrap();
        assert_eq!(path, dir.path().join("A/B/song.mp3"));

        // A staged file that is not yet a member resolves to staging.
        let staging = s.staging_dir("p");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("new.mp3"), b"x").unwrap();
        assert_eq!(
            s.playlist_song_path("p", "new.mp3").unwrap(),
            staging.join("new.mp3")
        );
    }

    #[test]
    fn test_listing_merges_members_and_staged() {
        let (_dir, s) = store_with_song();
        s.create_playlist("p").unwrap();
        s.add_song_to_playlist("p", "A", "B", "song.mp3").unwrap();
        let staging = s.staging_dir("p");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("staged.mp3"), b"x").unwrap();

        let names: Vec<String> = s
            .list_playlist_songs("p")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["song.mp3", "staged.mp3"]);
    }

    #[test]
    fn test_remove_song_leaves_library_alone() {
        let (_dir, s) = store_with_song();
        s.create_playlist("p").unwrap();
        s.add_song_to_playlist("p", "A", "B", "song.mp3").unwrap();

        s.remove_song_from_playlist("p", "song.mp3").unwrap();
        assert!(s.playlist_entries("p").unwrap().is_empty());
        assert!(s.file_path("A", "B", "song.mp3").is_ok());

        assert!(matches!(
            s.remove_song_from_playlist("p", "song.mp3").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_regenerate_writes_m3u() {
        let (dir, s) = store_with_song();
        s.create_playlist("p").unwrap();
        s.add_song_to_playlist("p", "A", "B", "song.mp3").unwrap();
        s.regenerate_playlist("p").unwrap();

        let generated = s.generated_playlist_path("p");
        assert_eq!(generated, dir.path().join("playlists/p.m3u"));
        let entries = crate::m3u::parse_playlist(&generated).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].artist, "A");
        assert_eq!(entries[0].title, "song");
    }

    #[test]
    fn test_delete_playlist_removes_artifacts() {
        let (_dir, s) = store_with_song();
        s.create_playlist("p").unwrap();
        s.add_song_to_playlist("p", "A", "B", "song.mp3").unwrap();
        s.regenerate_playlist("p").unwrap();
        let staging = s.staging_dir("p");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("staged.mp3"), b"x").unwrap();

        s.delete_playlist("p").unwrap();
        assert!(!s.generated_playlist_path("p").exists());
        assert!(!staging.exists());
    }
}
