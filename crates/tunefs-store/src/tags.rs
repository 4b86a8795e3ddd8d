//! Embedded tag reading and rewriting for audio files.

use std::path::Path;

use id3::TagLike;
use tracing::{debug, warn};

use crate::error::StoreError;

/// The three tag fields the library hierarchy is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongTags {
    pub title: String,
    pub artist: String,
    pub album: String,
}

impl SongTags {
    /// Fill any missing field with a stand-in derived from the file
    /// name so a tagless file still lands somewhere findable.
    fn or_defaults(mut self, path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        if self.title.is_empty() {
            self.title = stem;
        }
        if self.artist.is_empty() {
            self.artist = "unknown_artist".to_string();
        }
        if self.album.is_empty() {
            self.album = "unknown_album".to_string();
        }
        self
    }
}

fn tag_fields(tag: &id3::Tag) -> SongTags {
    SongTags {
        title: tag.title().unwrap_or_default().to_string(),
        artist: tag.artist().unwrap_or_default().to_string(),
        album: tag.album().unwrap_or_default().to_string(),
    }
}

/// Read the tags of an audio file. A file without a tag frame gets
/// name-derived defaults; a file whose tag data cannot be decoded is an
/// `InvalidFormat` error.
pub fn read_tags(path: &Path) -> Result<SongTags, StoreError> {
    let tag = match id3::Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(err) if matches!(err.kind, id3::ErrorKind::NoTag) => {
            debug!("no tag frame in {}", path.display());
            id3::Tag::new()
        }
        Err(err) => {
            return Err(StoreError::InvalidFormat(format!(
                "unreadable tags in {}: {err}",
                path.display()
            )))
        }
    };
    Ok(tag_fields(&tag).or_defaults(path))
}

/// Like `read_tags`, but a corrupt tag frame degrades to name-derived
/// defaults instead of failing. Used by the startup scanner, which must
/// survive whatever is already in the tree.
pub fn read_tags_or_default(path: &Path) -> SongTags {
    match read_tags(path) {
        Ok(tags) => tags,
        Err(err) => {
            warn!("falling back to defaults for {}: {err}", path.display());
            tag_fields(&id3::Tag::new()).or_defaults(path)
        }
    }
}

/// Rewrite the tag fields of an audio file in place.
pub fn write_tags(path: &Path, tags: &SongTags) -> Result<(), StoreError> {
    let mut tag = match id3::Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(err) if matches!(err.kind, id3::ErrorKind::NoTag) => id3::Tag::new(),
        Err(err) => {
            return Err(StoreError::InvalidFormat(format!(
                "unreadable tags in {}: {err}",
                path.display()
            )))
        }
    };
    tag.set_title(&tags.title);
    tag.set_artist(&tags.artist);
    tag.set_album(&tags.album);
    tag.write_to_path(path, id3::Version::Id3v24)
        .map_err(|err| StoreError::InvalidFormat(format!("{}: {err}", path.display())))?;
    debug!("rewrote tags in {}", path.display());
    Ok(())
}
