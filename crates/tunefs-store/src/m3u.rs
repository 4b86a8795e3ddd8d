//! Reading and writing the playlist file format.
//!
//! Generated playlists are ordinary m3u files with one marker comment
//! per entry so they can be re-imported losslessly:
//!
//! ```text
//! #EXTM3U
//! #TUNE Artist - Album - Title
//! /music/Artist/Album/Title.mp3
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::StoreError;

pub const PLAYLIST_HEADER: &str = "#EXTM3U";

/// Marker prefix identifying entries this tool wrote itself.
pub const ENTRY_MARKER: &str = "#TUNE ";

/// One entry recovered from a playlist file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEntry {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub path: PathBuf,
}

/// Check that a file starts with the m3u header.
pub fn validate_playlist(path: &Path) -> Result<(), StoreError> {
    let content = std::fs::read_to_string(path)?;
    match content.lines().next() {
        Some(first) if first.trim_end() == PLAYLIST_HEADER => Ok(()),
        _ => Err(StoreError::InvalidFormat(format!(
            "{} is not an m3u playlist",
            path.display()
        ))),
    }
}

/// Extract the marked entries of a playlist file. Lines that do not
/// form a well-shaped marker-plus-path pair are skipped with a warning
/// rather than failing the whole import.
pub fn parse_playlist(path: &Path) -> Result<Vec<ParsedEntry>, StoreError> {
    let content = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();
    let mut lines = content.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(rest) = line.strip_prefix(ENTRY_MARKER) else {
            continue;
        };
        let parts: Vec<&str> = rest.split(" - ").collect();
        if parts.len() != 3 {
            warn!("skipping malformed marker line {line:?} in {}", path.display());
            continue;
        }
        // The path sits on the next non-empty, non-comment line.
        let song_path = loop {
            match lines.peek() {
                Some(next) if next.trim().is_empty() => {
                    lines.next();
                }
                Some(next) if !next.starts_with('#') => break Some(lines.next().unwrap_or("")),
                _ => break None,
            }
        };
        let Some(song_path) = song_path else {
            warn!("marker line without a path in {}", path.display());
            continue;
        };
        entries.push(ParsedEntry {
            artist: parts[0].trim().to_string(),
            album: parts[1].trim().to_string(),
            title: parts[2].trim().to_string(),
            path: PathBuf::from(song_path.trim()),
        });
    }
    debug!("parsed {} entries from {}", entries.len(), path.display());
    Ok(entries)
}

/// Write a playlist file atomically (temp file plus rename, so readers
/// never observe a half-written file).
pub fn write_playlist(path: &Path, entries: &[ParsedEntry]) -> Result<(), StoreError> {
    let tmp = path.with_extension("m3u.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        writeln!(file, "{PLAYLIST_HEADER}")?;
        for entry in entries {
            writeln!(
                file,
                "{ENTRY_MARKER}{} - {} - {}",
                entry.artist, entry.album, entry.title
            )?;
            writeln!(file, "{}", entry.path.display())?;
            writeln!(file)?;
        }
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    debug!("wrote playlist {} ({} entries)", path.display(), entries.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(artist: &str, album: &str, title: &str, path: &str) -> ParsedEntry {
        ParsedEntry {
            artist: artist.to_string(),
            album: album.to_string(),
            title: title.to_string(),
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn test_write_then_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("road_trip.m3u");
        let entries = vec![
            entry("Pink_Floyd", "Meddle", "Echoes", "/music/Pink_Floyd/Meddle/Echoes.mp3"),
            entry("ACDC", "Back_in_Black", "Hells_Bells", "/music/ACDC/Back_in_Black/Hells_Bells.mp3"),
        ];
        write_playlist(&path, &entries).unwrap();

        validate_playlist(&path).unwrap();
        assert_eq!(parse_playlist(&path).unwrap(), entries);
    }

    #[test]
    fn test_missing_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.m3u");
        std::fs::write(&path, "/some/file.mp3\n").unwrap();
        assert!(matches!(
            validate_playlist(&path).unwrap_err(),
            StoreError::InvalidFormat(_)
        ));
    }

    #[test]
    fn test_malformed_marker_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.m3u");
        std::fs::write(
            &path,
            "#EXTM3U\n#TUNE only two - parts\n/x.mp3\n\n#TUNE A - B - C\n/y.mp3\n",
        )
        .unwrap();

        let entries = parse_playlist(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "C");
        assert_eq!(entries[0].path, PathBuf::from("/y.mp3"));
    }

    #[test]
    fn test_marker_without_path_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.m3u");
        std::fs::write(&path, "#EXTM3U\n#TUNE A - B - C\n").unwrap();
        assert!(parse_playlist(&path).unwrap().is_empty());
    }

    #[test]
    fn test_foreign_extinf_lines_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.m3u");
        std::fs::write(
            &path,
            "#EXTM3U\n#EXTINF:123,Some Title\n/foreign.mp3\n#TUNE A - B - C\n/mine.mp3\n",
        )
        .unwrap();

        let entries = parse_playlist(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, PathBuf::from("/mine.mp3"));
    }

    #[test]
    fn test_empty_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.m3u");
        write_playlist(&path, &[]).unwrap();
        validate_playlist(&path).unwrap();
        assert!(parse_playlist(&path).unwrap().is_empty());
    }
}
