//! Startup scan of the source tree.
//!
//! The store is rebuilt from what is actually on disk every time the
//! filesystem starts: tags are authoritative for identity, existing
//! m3u files under `<source>/playlists/` are imported as playlists.

use walkdir::WalkDir;

use tracing::{info, warn};

use tunefs_core::{is_audio_name, normalize, AUDIO_EXT, PLAYLIST_EXT};

use crate::error::StoreError;
use crate::m3u;
use crate::store::MetaStore;
use crate::tags::read_tags_or_default;

/// Walk the source tree and upsert every audio file into the store.
/// Returns the number of songs recorded.
pub fn scan_library(store: &MetaStore) -> Result<usize, StoreError> {
    std::fs::create_dir_all(store.drop_dir())?;
    std::fs::create_dir_all(store.playlists_dir())?;

    let drop_dir = store.drop_dir();
    let playlists_dir = store.playlists_dir();
    let mut count = 0usize;

    let walker = WalkDir::new(store.source())
        .into_iter()
        .filter_entry(|e| e.path() != drop_dir && e.path() != playlists_dir);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping unreadable entry: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !is_audio_name(&name) {
            continue;
        }
        let tags = read_tags_or_default(entry.path());
        match store.store_song_from_tags(&tags, entry.path()) {
            Ok(()) => count += 1,
            // A reserved artist tag cannot be filed; leave the file be.
            Err(StoreError::PermissionDenied(reason)) => {
                warn!("skipping {}: {reason}", entry.path().display());
            }
            Err(err) => return Err(err),
        }
    }
    info!("library scan recorded {count} songs");
    Ok(count)
}

/// Import every m3u file under `<source>/playlists/` as a playlist,
/// then regenerate it in canonical form. Returns the number of
/// playlists imported.
pub fn scan_playlists(store: &MetaStore) -> Result<usize, StoreError> {
    let playlists_dir = store.playlists_dir();
    if !playlists_dir.is_dir() {
        return Ok(0);
    }

    let mut count = 0usize;
    for dirent in std::fs::read_dir(&playlists_dir)? {
        let dirent = dirent?;
        let path = dirent.path();
        let is_m3u = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case(PLAYLIST_EXT));
        if !dirent.file_type()?.is_file() || !is_m3u {
            continue;
        }

        if let Err(err) = m3u::validate_playlist(&path) {
            warn!("ignoring {}: {err}", path.display());
            continue;
        }
        let entries = m3u::parse_playlist(&path)?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let key = match store.create_playlist(&stem) {
            Ok(key) => key,
            Err(StoreError::AlreadyExists(_)) => normalize(&stem),
            Err(err) => return Err(err),
        };

        for entry in &entries {
            let file_name = format!("{}.{AUDIO_EXT}", normalize(&entry.title));
            let artist = normalize(&entry.artist);
            let album = normalize(&entry.album);
            if let Err(err) = store.add_song_to_playlist(&key, &artist, &album, &file_name) {
                warn!(
                    "dropping unresolvable entry {artist}/{album}/{file_name} from {key}: {err}"
                );
            }
        }

        // Imported files are replaced by the canonical generated form.
        if path != store.generated_playlist_path(&key) {
            std::fs::remove_file(&path)?;
        }
        store.regenerate_playlist(&key)?;
        count += 1;
    }
    info!("imported {count} playlists");
    Ok(count)
}
