//! Renames within the hierarchy.
//!
//! Each move runs as one store transaction wrapped around the physical
//! renames. If a rename fails mid-way the already-performed renames are
//! undone and the transaction rolls back, so metadata and disk never
//! drift apart. Playlist back-references are repaired in the same
//! transaction and the affected playlist files are regenerated after
//! commit.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, Transaction};
use tracing::{debug, warn};

use tunefs_core::{is_audio_name, normalize, AUDIO_EXT};

use crate::error::StoreError;
use crate::store::{self, MetaStore};
use crate::tags::{write_tags, SongTags};

/// Undo log for physical renames performed inside a transaction.
struct RenameLog {
    done: Vec<(PathBuf, PathBuf)>,
}

impl RenameLog {
    fn new() -> Self {
        RenameLog { done: Vec::new() }
    }

    fn rename(&mut self, from: &Path, to: &Path) -> Result<(), StoreError> {
        std::fs::rename(from, to).map_err(|err| StoreError::from_rename(err, from, to))?;
        self.done.push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    /// Put every renamed path back, most recent first.
    fn undo(&mut self) {
        while let Some((from, to)) = self.done.pop() {
            if let Err(err) = std::fs::rename(&to, &from) {
                warn!("could not undo rename {} -> {}: {err}", from.display(), to.display());
            }
        }
    }

    fn commit(mut self) {
        self.done.clear();
    }
}

/// Playlists holding a back-reference matching the given identity.
fn affected_playlists(
    conn: &Connection,
    artist: &str,
    album: Option<&str>,
    file_name: Option<&str>,
) -> Result<Vec<String>, StoreError> {
    let mut sql = String::from(
        "SELECT DISTINCT p.key FROM playlists p
         JOIN playlist_entries e ON e.playlist_id = p.id
         WHERE e.artist_key = ?1",
    );
    let mut args: Vec<&dyn rusqlite::ToSql> = vec![&artist];
    if let Some(album) = album.as_ref() {
        sql.push_str(" AND e.album_key = ?2");
        args.push(album);
        if let Some(file_name) = file_name.as_ref() {
            sql.push_str(" AND e.file_name = ?3");
            args.push(file_name);
        }
    }
    let mut stmt = conn.prepare(&sql)?;
    let keys = stmt
        .query_map(args.as_slice(), |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
}

fn display_name(tx: &Transaction, table: &str, id: i64) -> Result<String, StoreError> {
    let sql = format!("SELECT name FROM {table} WHERE id = ?1");
    Ok(tx.query_row(&sql, params![id], |row| row.get(0))?)
}

impl MetaStore {
    /// Move or rename one song. Source and destination must both sit at
    /// album depth; the new name keeps the audio extension rule.
    /// Returns the normalized destination file name.
    pub fn move_song(
        &self,
        artist: &str,
        album: &str,
        name: &str,
        new_artist: &str,
        new_album: &str,
        new_name: &str,
    ) -> Result<String, StoreError> {
        if !is_audio_name(new_name) {
            return Err(StoreError::InvalidFormat(format!(
                "{new_name:?} is not a supported audio file"
            )));
        }
        let new_title = store::file_stem(new_name).to_string();
        let new_file = format!("{}.{AUDIO_EXT}", normalize(&new_title));

        let (new_path, playlists, tags) = self.with_tx(|tx| {
            let src_artist_id = store::require_artist(tx, artist)?;
            let src_album_id = store::require_album(tx, src_artist_id, artist, album)?;
            let dst_artist_id = store::require_artist(tx, new_artist)?;
            let dst_album_id = store::require_album(tx, dst_artist_id, new_artist, new_album)?;

            let old_path: String = tx
                .query_row(
                    "SELECT full_path FROM songs WHERE album_id = ?1 AND file_name = ?2",
                    params![src_album_id, name],
                    |row| row.get(0),
                )
                .map_err(|_| StoreError::NotFound(format!("{artist}/{album}/{name}")))?;
            let old_path = PathBuf::from(old_path);

            let dest_dir = self.album_dir(new_artist, new_album);
            let new_path = dest_dir.join(&new_file);

            let playlists = affected_playlists(tx, artist, Some(album), Some(name))?;
            tx.execute(
                "UPDATE playlist_entries SET
                     artist_key = ?1, album_key = ?2, file_name = ?3, path = ?4
                 WHERE artist_key = ?5 AND album_key = ?6 AND file_name = ?7",
                params![
                    new_artist,
                    new_album,
                    new_file,
                    new_path.to_string_lossy(),
                    artist,
                    album,
                    name
                ],
            )?;
            tx.execute(
                "UPDATE OR REPLACE songs SET
                     album_id = ?1, file_name = ?2, title = ?3, full_path = ?4
                 WHERE album_id = ?5 AND file_name = ?6",
                params![
                    dst_album_id,
                    new_file,
                    new_title,
                    new_path.to_string_lossy(),
                    src_album_id,
                    name
                ],
            )?;

            let tags = SongTags {
                title: new_title.clone(),
                artist: display_name(tx, "artists", dst_artist_id)?,
                album: display_name(tx, "albums", dst_album_id)?,
            };

            let mut log = RenameLog::new();
            std::fs::create_dir_all(&dest_dir)?;
            if let Err(err) = log.rename(&old_path, &new_path) {
                log.undo();
                return Err(err);
            }
            log.commit();
            Ok((new_path, playlists, tags))
        })?;

        if let Err(err) = write_tags(&new_path, &tags) {
            debug!("could not rewrite tags in {}: {err}", new_path.display());
        }
        self.regenerate_playlists(&playlists);
        debug!("moved song {artist}/{album}/{name} -> {new_artist}/{new_album}/{new_file}");
        Ok(new_file)
    }

    /// Move or rename an album, carrying every song with it. Returns the
    /// destination album key.
    pub fn move_album(
        &self,
        artist: &str,
        album: &str,
        new_artist: &str,
        new_raw: &str,
    ) -> Result<String, StoreError> {
        let new_key = normalize(new_raw);
        if new_key.is_empty() {
            return Err(StoreError::InvalidFormat(format!(
                "album name {new_raw:?} normalizes to nothing"
            )));
        }

        let (playlists, moved, names) = self.with_tx(|tx| {
            let src_artist_id = store::require_artist(tx, artist)?;
            let album_id = store::require_album(tx, src_artist_id, artist, album)?;
            let dst_artist_id = store::require_artist(tx, new_artist)?;
            if store::album_id(tx, dst_artist_id, &new_key)?.is_some() {
                return Err(StoreError::AlreadyExists(format!("{new_artist}/{new_key}")));
            }

            tx.execute(
                "UPDATE albums SET artist_id = ?1, key = ?2, name = ?3 WHERE id = ?4",
                params![dst_artist_id, new_key, new_raw, album_id],
            )?;

            let dest_dir = self.album_dir(new_artist, &new_key);
            let mut moved = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT id, file_name, full_path FROM songs WHERE album_id = ?1",
                )?;
                let rows = stmt
                    .query_map(params![album_id], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                for (song_id, file_name, old_path) in rows {
                    let new_path = dest_dir.join(&file_name);
                    tx.execute(
                        "UPDATE songs SET full_path = ?1 WHERE id = ?2",
                        params![new_path.to_string_lossy(), song_id],
                    )?;
                    tx.execute(
                        "UPDATE playlist_entries SET album_key = ?1, artist_key = ?2, path = ?3
                         WHERE artist_key = ?4 AND album_key = ?5 AND file_name = ?6",
                        params![
                            new_key,
                            new_artist,
                            new_path.to_string_lossy(),
                            artist,
                            album,
                            file_name
                        ],
                    )?;
                    moved.push(new_path);
                }
            }

            let playlists = affected_playlists(tx, new_artist, Some(&new_key), None)?;

            let src_dir = self.album_dir(artist, album);
            let mut log = RenameLog::new();
            if src_dir.is_dir() {
                std::fs::create_dir_all(self.source().join(new_artist))?;
                if let Err(err) = log.rename(&src_dir, &dest_dir) {
                    log.undo();
                    return Err(err);
                }
            }
            log.commit();

            let names = (
                display_name(tx, "artists", dst_artist_id)?,
                new_raw.to_string(),
            );
            Ok((playlists, moved, names))
        })?;

        for path in &moved {
            let title = store::file_stem(
                &path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )
            .to_string();
            let tags = SongTags {
                title,
                artist: names.0.clone(),
                album: names.1.clone(),
            };
            if let Err(err) = write_tags(path, &tags) {
                debug!("could not rewrite tags in {}: {err}", path.display());
            }
        }
        self.regenerate_playlists(&playlists);
        debug!("moved album {artist}/{album} -> {new_artist}/{new_key}");
        Ok(new_key)
    }

    /// Rename an artist, carrying every album and song. Returns the new
    /// artist key.
    pub fn move_artist(&self, artist: &str, new_raw: &str) -> Result<String, StoreError> {
        let new_key = normalize(new_raw);
        if new_key.is_empty() {
            return Err(StoreError::InvalidFormat(format!(
                "artist name {new_raw:?} normalizes to nothing"
            )));
        }
        if tunefs_core::is_reserved_dir(&new_key) {
            return Err(StoreError::PermissionDenied(format!(
                "{new_key} is a reserved directory name"
            )));
        }
        if new_key == artist {
            return Ok(new_key);
        }

        let (playlists, moved) = self.with_tx(|tx| {
            let artist_id = store::require_artist(tx, artist)?;
            if store::artist_id(tx, &new_key)?.is_some() {
                return Err(StoreError::AlreadyExists(new_key.clone()));
            }
            tx.execute(
                "UPDATE artists SET key = ?1, name = ?2 WHERE id = ?3",
                params![new_key, new_raw, artist_id],
            )?;

            let mut moved = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT s.id, s.file_name, a.key FROM songs s
                     JOIN albums a ON s.album_id = a.id
                     WHERE a.artist_id = ?1",
                )?;
                let rows = stmt
                    .query_map(params![artist_id], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                for (song_id, file_name, album_key) in rows {
                    let new_path = self.album_dir(&new_key, &album_key).join(&file_name);
                    tx.execute(
                        "UPDATE songs SET full_path = ?1 WHERE id = ?2",
                        params![new_path.to_string_lossy(), song_id],
                    )?;
                    tx.execute(
                        "UPDATE playlist_entries SET artist_key = ?1, path = ?2
                         WHERE artist_key = ?3 AND album_key = ?4 AND file_name = ?5",
                        params![
                            new_key,
                            new_path.to_string_lossy(),
                            artist,
                            album_key,
                            file_name
                        ],
                    )?;
                    moved.push((new_path, album_key));
                }
            }

            let playlists = affected_playlists(tx, &new_key, None, None)?;

            let src_dir = self.source().join(artist);
            let dst_dir = self.source().join(&new_key);
            let mut log = RenameLog::new();
            if src_dir.is_dir() {
                if let Err(err) = log.rename(&src_dir, &dst_dir) {
                    log.undo();
                    return Err(err);
                }
            }
            log.commit();
            Ok((playlists, moved))
        })?;

        for (path, _album_key) in &moved {
            let mut tags = crate::tags::read_tags_or_default(path);
            tags.artist = new_raw.to_string();
            if let Err(err) = write_tags(path, &tags) {
                debug!("could not rewrite tags in {}: {err}", path.display());
            }
        }
        self.regenerate_playlists(&playlists);
        debug!("renamed artist {artist} -> {new_key}");
        Ok(new_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> (tempfile::TempDir, MetaStore) {
        let dir = tempfile::tempdir().unwrap();
        let s = MetaStore::open_in_memory(dir.path()).unwrap();
        s.create_artist("Pink Floyd").unwrap();
        s.create_album("Pink_Floyd", "Meddle").unwrap();
        let album_dir = s.album_dir("Pink_Floyd", "Meddle");
        std::fs::create_dir_all(&album_dir).unwrap();
        s.create_song("Pink_Floyd", "Meddle", "Echoes.mp3", &album_dir)
            .unwrap();
        std::fs::write(album_dir.join("Echoes.mp3"), b"").unwrap();
        (dir, s)
    }

    #[test]
    fn test_rename_song_within_album() {
        let (dir, s) = populated();
        s.move_song(
            "Pink_Floyd",
            "Meddle",
            "Echoes.mp3",
            "Pink_Floyd",
            "Meddle",
            "Echoes Live.mp3",
        )
        .unwrap();

        assert!(s.file_path("Pink_Floyd", "Meddle", "Echoes.mp3").is_err());
        let path = s
            .file_path("Pink_Floyd", "Meddle", "Echoes_Live.mp3")
            .unwrap();
        assert_eq!(path, dir.path().join("Pink_Floyd/Meddle/Echoes_Live.mp3"));
        assert!(path.is_file());
        assert_eq!(
            crate::tags::read_tags(&path).unwrap().title,
            "Echoes Live"
        );
    }

    #[test]
    fn test_move_song_across_albums() {
        let (dir, s) = populated();
        s.create_album("Pink_Floyd", "Best Of").unwrap();
        s.move_song(
            "Pink_Floyd",
            "Meddle",
            "Echoes.mp3",
            "Pink_Floyd",
            "Best_Of",
            "Echoes.mp3",
        )
        .unwrap();

        assert!(s.list_songs("Pink_Floyd", "Meddle").unwrap().is_empty());
        assert!(dir.path().join("Pink_Floyd/Best_Of/Echoes.mp3").is_file());
    }

    #[test]
    fn test_move_song_rejects_non_audio_target() {
        let (_dir, s) = populated();
        assert!(matches!(
            s.move_song(
                "Pink_Floyd",
                "Meddle",
                "Echoes.mp3",
                "Pink_Floyd",
                "Meddle",
                "Echoes.txt"
            )
            .unwrap_err(),
            StoreError::InvalidFormat(_)
        ));
    }

    #[test]
    fn test_move_song_missing_dest_album() {
        let (_dir, s) = populated();
        assert!(matches!(
            s.move_song(
                "Pink_Floyd",
                "Meddle",
                "Echoes.mp3",
                "Pink_Floyd",
                "Nothing",
                "Echoes.mp3"
            )
            .unwrap_err(),
            StoreError::NotFound(_)
        ));
        // Source unchanged after the failed move.
        assert!(s.file_path("Pink_Floyd", "Meddle", "Echoes.mp3").is_ok());
    }

    #[test]
    fn test_move_song_repairs_playlists() {
        let (dir, s) = populated();
        s.create_playlist("p").unwrap();
        s.add_song_to_playlist("p", "Pink_Floyd", "Meddle", "Echoes.mp3")
            .unwrap();
        s.create_album("Pink_Floyd", "Best Of").unwrap();

        s.move_song(
            "Pink_Floyd",
            "Meddle",
            "Echoes.mp3",
            "Pink_Floyd",
            "Best_Of",
            "Echoes.mp3",
        )
        .unwrap();

        let entries = s.playlist_entries("p").unwrap();
        assert_eq!(entries[0].album_key, "Best_Of");
        assert_eq!(
            entries[0].path,
            dir.path().join("Pink_Floyd/Best_Of/Echoes.mp3")
        );
        // The generated file reflects the move.
        let parsed = crate::m3u::parse_playlist(&s.generated_playlist_path("p")).unwrap();
        assert_eq!(parsed[0].album, "Best_Of");
    }

    #[test]
    fn test_rename_album() {
        let (dir, s) = populated();
        let key = s
            .move_album("Pink_Floyd", "Meddle", "Pink_Floyd", "Meddle Remastered")
            .unwrap();
        assert_eq!(key, "Meddle_Remastered");

        assert!(s.album_exists("Pink_Floyd", "Meddle").is_err());
        assert!(s.album_exists("Pink_Floyd", "Meddle_Remastered").is_ok());
        assert!(dir
            .path()
            .join("Pink_Floyd/Meddle_Remastered/Echoes.mp3")
            .is_file());
        let path = s
            .file_path("Pink_Floyd", "Meddle_Remastered", "Echoes.mp3")
            .unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn test_move_album_to_other_artist() {
        let (_dir, s) = populated();
        s.create_artist("Roger Waters").unwrap();
        s.move_album("Pink_Floyd", "Meddle", "Roger_Waters", "Meddle")
            .unwrap();

        assert!(s.list_albums("Pink_Floyd").unwrap().is_empty());
        assert!(s.album_exists("Roger_Waters", "Meddle").is_ok());
        let tags =
            crate::tags::read_tags(&s.file_path("Roger_Waters", "Meddle", "Echoes.mp3").unwrap())
                .unwrap();
        assert_eq!(tags.artist, "Roger Waters");
    }

    #[test]
    fn test_move_album_collision() {
        let (_dir, s) = populated();
        s.create_album("Pink_Floyd", "Animals").unwrap();
        assert!(matches!(
            s.move_album("Pink_Floyd", "Meddle", "Pink_Floyd", "Animals")
                .unwrap_err(),
            StoreError::AlreadyExists(_)
        ));
    }

    #[test]
    fn test_rename_artist() {
        let (dir, s) = populated();
        s.create_playlist("p").unwrap();
        s.add_song_to_playlist("p", "Pink_Floyd", "Meddle", "Echoes.mp3")
            .unwrap();

        let key = s.move_artist("Pink_Floyd", "The Pink Floyd").unwrap();
        assert_eq!(key, "The_Pink_Floyd");

        assert!(s.artist_exists("Pink_Floyd").is_err());
        assert!(s.artist_exists("The_Pink_Floyd").is_ok());
        assert!(dir.path().join("The_Pink_Floyd/Meddle/Echoes.mp3").is_file());
        assert_eq!(
            s.playlist_entries("p").unwrap()[0].artist_key,
            "The_Pink_Floyd"
        );
    }

    #[test]
    fn test_rename_artist_collision() {
        let (_dir, s) = populated();
        s.create_artist("Genesis").unwrap();
        assert!(matches!(
            s.move_artist("Pink_Floyd", "Genesis").unwrap_err(),
            StoreError::AlreadyExists(_)
        ));
    }
}
