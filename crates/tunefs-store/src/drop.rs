//! Classification of dropped files.
//!
//! Files copied into the flat `drop` directory (or into a playlist
//! directory) land in a staging area first. Once a file has gone quiet
//! the dispatcher asks the store to classify it: read its tags, slot it
//! into the Artist/Album hierarchy, and clean up the staging copy. A
//! staged file never survives classification, successful or not.

use std::path::Path;

use tracing::{debug, info};

use tunefs_core::{is_audio_name, normalize, AUDIO_EXT};

use crate::error::StoreError;
use crate::store::MetaStore;
use crate::tags::{read_tags, write_tags};

/// Where a dropped file ended up in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedSong {
    pub artist: String,
    pub album: String,
    pub file_name: String,
}

fn discard_staged(staged: &Path) {
    if let Err(err) = std::fs::remove_file(staged) {
        if err.kind() != std::io::ErrorKind::NotFound {
            debug!("could not discard staged file {}: {err}", staged.display());
        }
    }
}

impl MetaStore {
    /// Classify a file staged in the drop directory: read its tags,
    /// move it under `<source>/<artist>/<album>/`, and record it.
    pub fn classify_drop(&self, staged: &Path) -> Result<ClassifiedSong, StoreError> {
        let tags = match read_tags(staged) {
            Ok(tags) => tags,
            Err(err) => {
                discard_staged(staged);
                return Err(err);
            }
        };

        let artist = normalize(&tags.artist);
        let album = normalize(&tags.album);
        let title = normalize(&tags.title);
        if artist.is_empty() || album.is_empty() || title.is_empty() {
            discard_staged(staged);
            return Err(StoreError::InvalidFormat(format!(
                "tags of {} normalize to nothing",
                staged.display()
            )));
        }
        if tunefs_core::is_reserved_dir(&artist) {
            discard_staged(staged);
            return Err(StoreError::PermissionDenied(format!(
                "artist tag {artist:?} collides with a reserved directory"
            )));
        }
        let file_name = format!("{title}.{AUDIO_EXT}");

        let album_dir = self.album_dir(&artist, &album);
        std::fs::create_dir_all(&album_dir)?;
        let dest = album_dir.join(&file_name);
        std::fs::rename(staged, &dest).map_err(|err| StoreError::from_rename(err, staged, &dest))?;

        self.store_song_from_tags(&tags, &dest)?;
        // Persist the name-derived defaults back into the file so the
        // next scan classifies it identically.
        if let Err(err) = write_tags(&dest, &tags) {
            debug!("could not rewrite tags in {}: {err}", dest.display());
        }

        info!("classified drop {} -> {artist}/{album}/{file_name}", staged.display());
        Ok(ClassifiedSong {
            artist,
            album,
            file_name,
        })
    }

    /// Classify a file staged inside a playlist directory: resolve the
    /// library song matching its tags, filing the song into the
    /// hierarchy first when it is not there yet, then link it as a
    /// membership entry. The staged copy is always removed.
    pub fn classify_playlist_drop(
        &self,
        playlist: &str,
        staged: &Path,
    ) -> Result<ClassifiedSong, StoreError> {
        let name = staged
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !is_audio_name(&name) {
            discard_staged(staged);
            return Err(StoreError::InvalidFormat(format!(
                "{name:?} is not a supported audio file"
            )));
        }

        let tags = match read_tags(staged) {
            Ok(tags) => tags,
            Err(err) => {
                discard_staged(staged);
                return Err(err);
            }
        };
        let artist = normalize(&tags.artist);
        let album = normalize(&tags.album);
        let file_name = format!("{}.{AUDIO_EXT}", normalize(&tags.title));

        if let Err(err) = self.playlist_exists(playlist) {
            discard_staged(staged);
            return Err(err);
        }

        let song = match self.add_song_to_playlist(playlist, &artist, &album, &file_name) {
            Ok(()) => {
                discard_staged(staged);
                ClassifiedSong {
                    artist,
                    album,
                    file_name,
                }
            }
            // A new song: file it into the hierarchy first, then link.
            Err(StoreError::NotFound(_)) => {
                let song = self.classify_drop(staged)?;
                self.add_song_to_playlist(playlist, &song.artist, &song.album, &song.file_name)?;
                song
            }
            Err(err) => {
                discard_staged(staged);
                return Err(err);
            }
        };

        self.regenerate_playlist(playlist)?;
        info!(
            "classified playlist drop into {playlist}: {}/{}/{}",
            song.artist, song.album, song.file_name
        );
        Ok(song)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::SongTags;

    fn tagged_file(dir: &Path, name: &str, tags: &SongTags) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"").unwrap();
        write_tags(&path, tags).unwrap();
        path
    }

    #[test]
    fn test_drop_files_into_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        let s = MetaStore::open_in_memory(dir.path()).unwrap();
        let drop_dir = s.drop_dir();
        std::fs::create_dir_all(&drop_dir).unwrap();

        let staged = tagged_file(
            &drop_dir,
            "upload.mp3",
            &SongTags {
                title: "Hells Bells".to_string(),
                artist: "AC/DC".to_string(),
                album: "Back in Black".to_string(),
            },
        );

        let classified = s.classify_drop(&staged).unwrap();
        assert_eq!(
            classified,
            ClassifiedSong {
                artist: "ACDC".to_string(),
                album: "Back_in_Black".to_string(),
                file_name: "Hells_Bells.mp3".to_string(),
            }
        );
        assert!(!staged.exists());
        assert!(dir.path().join("ACDC/Back_in_Black/Hells_Bells.mp3").is_file());
        assert!(s.file_path("ACDC", "Back_in_Black", "Hells_Bells.mp3").is_ok());
    }

    #[test]
    fn test_drop_into_existing_artist() {
        let dir = tempfile::tempdir().unwrap();
        let s = MetaStore::open_in_memory(dir.path()).unwrap();
        s.create_artist("AC/DC").unwrap();
        std::fs::create_dir_all(s.drop_dir()).unwrap();

        let staged = tagged_file(
            &s.drop_dir(),
            "u.mp3",
            &SongTags {
                title: "Back in Black".to_string(),
                artist: "AC/DC".to_string(),
                album: "Back in Black".to_string(),
            },
        );
        s.classify_drop(&staged).unwrap();
        assert_eq!(s.list_artists().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_with_reserved_artist_tag_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let s = MetaStore::open_in_memory(dir.path()).unwrap();
        std::fs::create_dir_all(s.drop_dir()).unwrap();
        let staged = tagged_file(
            &s.drop_dir(),
            "u.mp3",
            &SongTags {
                title: "T".to_string(),
                artist: "drop".to_string(),
                album: "A".to_string(),
            },
        );

        assert!(matches!(
            s.classify_drop(&staged).unwrap_err(),
            StoreError::PermissionDenied(_)
        ));
        assert!(!staged.exists());
        assert!(s.list_artists().unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_drop_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let s = MetaStore::open_in_memory(dir.path()).unwrap();
        std::fs::create_dir_all(s.drop_dir()).unwrap();
        // A tagless file gets name-derived defaults, so it classifies.
        // A vanished file does not.
        let gone = s.drop_dir().join("vanished.mp3");
        assert!(s.classify_drop(&gone).is_err());
    }

    #[test]
    fn test_playlist_drop_links_existing_song() {
        let dir = tempfile::tempdir().unwrap();
        let s = MetaStore::open_in_memory(dir.path()).unwrap();
        std::fs::create_dir_all(s.drop_dir()).unwrap();
        let tags = SongTags {
            title: "Echoes".to_string(),
            artist: "Pink Floyd".to_string(),
            album: "Meddle".to_string(),
        };
        let staged = tagged_file(&s.drop_dir(), "u.mp3", &tags);
        s.classify_drop(&staged).unwrap();

        s.create_playlist("p").unwrap();
        std::fs::create_dir_all(s.staging_dir("p")).unwrap();
        let play_staged = tagged_file(&s.staging_dir("p"), "copy.mp3", &tags);
        let classified = s.classify_playlist_drop("p", &play_staged).unwrap();
        assert_eq!(classified.file_name, "Echoes.mp3");
        assert!(!play_staged.exists());
        assert_eq!(s.playlist_entries("p").unwrap().len(), 1);
        assert!(s.generated_playlist_path("p").is_file());
    }

    #[test]
    fn test_playlist_drop_files_unknown_song_first() {
        let dir = tempfile::tempdir().unwrap();
        let s = MetaStore::open_in_memory(dir.path()).unwrap();
        s.create_playlist("p").unwrap();
        std::fs::create_dir_all(s.staging_dir("p")).unwrap();
        let staged = tagged_file(
            &s.staging_dir("p"),
            "u.mp3",
            &SongTags {
                title: "Echoes".to_string(),
                artist: "Pink Floyd".to_string(),
                album: "Meddle".to_string(),
            },
        );

        let classified = s.classify_playlist_drop("p", &staged).unwrap();
        assert_eq!(
            classified,
            ClassifiedSong {
                artist: "Pink_Floyd".to_string(),
                album: "Meddle".to_string(),
                file_name: "Echoes.mp3".to_string(),
            }
        );
        assert!(!staged.exists());
        // The song was filed into the hierarchy, not just linked.
        assert!(s.file_path("Pink_Floyd", "Meddle", "Echoes.mp3").unwrap().is_file());
        assert!(dir.path().join("Pink_Floyd/Meddle/Echoes.mp3").is_file());
        assert_eq!(s.playlist_entries("p").unwrap().len(), 1);
        assert!(s.generated_playlist_path("p").is_file());
    }

    #[test]
    fn test_playlist_drop_into_missing_playlist_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let s = MetaStore::open_in_memory(dir.path()).unwrap();
        std::fs::create_dir_all(s.staging_dir("ghost")).unwrap();
        let staged = tagged_file(
            &s.staging_dir("ghost"),
            "u.mp3",
            &SongTags {
                title: "T".to_string(),
                artist: "A".to_string(),
                album: "B".to_string(),
            },
        );

        assert!(matches!(
            s.classify_playlist_drop("ghost", &staged).unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(!staged.exists());
        // The library is untouched when the playlist itself is missing.
        assert!(s.list_artists().unwrap().is_empty());
    }

    #[test]
    fn test_playlist_drop_rejects_wrong_extension() {
        let dir = tempfile::tempdir().unwrap();
        let s = MetaStore::open_in_memory(dir.path()).unwrap();
        s.create_playlist("p").unwrap();
        std::fs::create_dir_all(s.staging_dir("p")).unwrap();
        let staged = s.staging_dir("p").join("notes.txt");
        std::fs::write(&staged, b"x").unwrap();

        assert!(matches!(
            s.classify_playlist_drop("p", &staged).unwrap_err(),
            StoreError::InvalidFormat(_)
        ));
        assert!(!staged.exists());
    }
}
