//! Shared building blocks for the tunefs workspace: the startup
//! configuration, and the name normalizer that turns display names into
//! filesystem-safe identifiers.

pub mod config;
pub mod normalize;

pub use config::{Config, ConfigError};
pub use normalize::normalize;

/// The only audio extension the library accepts.
pub const AUDIO_EXT: &str = "mp3";

/// The playlist file extension generated next to the library.
pub const PLAYLIST_EXT: &str = "m3u";

/// Root-level directory names claimed by the two virtual namespaces.
/// No artist may use them as a key.
pub const RESERVED_DIRS: [&str; 2] = ["drop", "playlists"];

/// Returns true if `name` collides with a virtual root directory.
pub fn is_reserved_dir(name: &str) -> bool {
    RESERVED_DIRS.contains(&name)
}

/// Returns true if `name` carries the supported audio extension.
pub fn is_audio_name(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .map(|e| e.eq_ignore_ascii_case(AUDIO_EXT))
        .unwrap_or(false)
}
