//! Virtual-path resolution.
//!
//! Every path inside the mount maps onto one node of the synthetic
//! tree. Parsing decides only what a path *would* be; whether the
//! entity actually exists is the store's call. The dot-name policy
//! lives here so it is applied once, not at every operation:
//! `.description` is the synthetic per-directory record, AppleDouble
//! companions and `.DS_Store` become opaque special blobs, and every
//! other dot name is refused.

use tunefs_core::is_reserved_dir;

/// Synthetic file name exposing the store's record of a directory.
pub const DESCRIPTION: &str = ".description";

/// A file inside the synthetic tree, tagged by what backs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNode {
    /// An ordinary library song, backed by an on-disk file.
    Song {
        artist: String,
        album: String,
        name: String,
    },
    /// A file staged in the flat drop directory.
    DropFile { name: String },
    /// A member of (or file staged in) one playlist directory.
    PlaylistSong { playlist: String, name: String },
    /// The read-only `.description` record of an artist or album.
    Description {
        artist: String,
        album: Option<String>,
    },
    /// An opaque OS-metadata blob held in the store instead of on disk.
    Special {
        artist: Option<String>,
        album: Option<String>,
        name: String,
    },
}

/// One node of the synthetic tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Root,
    DropDir,
    PlaylistsDir,
    Playlist { playlist: String },
    Artist { artist: String },
    Album { artist: String, album: String },
    File(FileNode),
}

/// Why a path does not resolve to a node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// The name is dot-prefixed and not one of the allowed kinds.
    #[error("reserved name: {0}")]
    Reserved(String),

    /// The path is deeper than the hierarchy goes.
    #[error("no such node: {0}")]
    Unresolvable(String),
}

enum DotKind {
    Plain,
    Description,
    Special,
    Reserved,
}

/// Classify a single path component against the dot-name policy.
fn dot_kind(name: &str) -> DotKind {
    if !name.starts_with('.') {
        return DotKind::Plain;
    }
    if name == DESCRIPTION {
        return DotKind::Description;
    }
    // Finder writes AppleDouble companions and .DS_Store into every
    // directory it touches; refusing them breaks drag-and-drop copies.
    if name == ".DS_Store" || (name.starts_with("._") && name != "._." && name != "._..") {
        return DotKind::Special;
    }
    DotKind::Reserved
}

impl Node {
    /// Resolve a virtual path (always absolute, `/`-separated) to the
    /// node it denotes.
    pub fn parse(path: &str) -> Result<Node, NodeError> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match parts.as_slice() {
            [] => Ok(Node::Root),
            ["drop"] => Ok(Node::DropDir),
            ["playlists"] => Ok(Node::PlaylistsDir),
            ["drop", name] => match dot_kind(name) {
                DotKind::Plain => Ok(Node::File(FileNode::DropFile {
                    name: (*name).to_string(),
                })),
                _ => Err(NodeError::Reserved(path.to_string())),
            },
            ["playlists", playlist] => match dot_kind(playlist) {
                DotKind::Plain => Ok(Node::Playlist {
                    playlist: (*playlist).to_string(),
                }),
                _ => Err(NodeError::Reserved(path.to_string())),
            },
            ["playlists", playlist, name] => match dot_kind(name) {
                DotKind::Plain => Ok(Node::File(FileNode::PlaylistSong {
                    playlist: (*playlist).to_string(),
                    name: (*name).to_string(),
                })),
                _ => Err(NodeError::Reserved(path.to_string())),
            },
            [artist] => match dot_kind(artist) {
                DotKind::Plain => Ok(Node::Artist {
                    artist: (*artist).to_string(),
                }),
                DotKind::Special => Ok(Node::File(FileNode::Special {
                    artist: None,
                    album: None,
                    name: (*artist).to_string(),
                })),
                _ => Err(NodeError::Reserved(path.to_string())),
            },
            [artist, child] if !is_reserved_dir(artist) => match dot_kind(child) {
                DotKind::Plain => Ok(Node::Album {
                    artist: (*artist).to_string(),
                    album: (*child).to_string(),
                }),
                DotKind::Description => Ok(Node::File(FileNode::Description {
                    artist: (*artist).to_string(),
                    album: None,
                })),
                DotKind::Special => Ok(Node::File(FileNode::Special {
                    artist: Some((*artist).to_string()),
                    album: None,
                    name: (*child).to_string(),
                })),
                DotKind::Reserved => Err(NodeError::Reserved(path.to_string())),
            },
            [artist, album, child] if !is_reserved_dir(artist) => match dot_kind(child) {
                DotKind::Plain => Ok(Node::File(FileNode::Song {
                    artist: (*artist).to_string(),
                    album: (*album).to_string(),
                    name: (*child).to_string(),
                })),
                DotKind::Description => Ok(Node::File(FileNode::Description {
                    artist: (*artist).to_string(),
                    album: Some((*album).to_string()),
                })),
                DotKind::Special => Ok(Node::File(FileNode::Special {
                    artist: Some((*artist).to_string()),
                    album: Some((*album).to_string()),
                    name: (*child).to_string(),
                })),
                DotKind::Reserved => Err(NodeError::Reserved(path.to_string())),
            },
            _ => Err(NodeError::Unresolvable(path.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_and_namespaces() {
        assert_eq!(Node::parse("/").unwrap(), Node::Root);
        assert_eq!(Node::parse("/drop").unwrap(), Node::DropDir);
        assert_eq!(Node::parse("/playlists").unwrap(), Node::PlaylistsDir);
    }

    #[test]
    fn test_hierarchy_levels() {
        assert_eq!(
            Node::parse("/Pink_Floyd").unwrap(),
            Node::Artist {
                artist: "Pink_Floyd".to_string()
            }
        );
        assert_eq!(
            Node::parse("/Pink_Floyd/Meddle").unwrap(),
            Node::Album {
                artist: "Pink_Floyd".to_string(),
                album: "Meddle".to_string()
            }
        );
        assert_eq!(
            Node::parse("/Pink_Floyd/Meddle/Echoes.mp3").unwrap(),
            Node::File(FileNode::Song {
                artist: "Pink_Floyd".to_string(),
                album: "Meddle".to_string(),
                name: "Echoes.mp3".to_string()
            })
        );
    }

    #[test]
    fn test_virtual_namespaces() {
        assert_eq!(
            Node::parse("/drop/new.mp3").unwrap(),
            Node::File(FileNode::DropFile {
                name: "new.mp3".to_string()
            })
        );
        assert_eq!(
            Node::parse("/playlists/road_trip").unwrap(),
            Node::Playlist {
                playlist: "road_trip".to_string()
            }
        );
        assert_eq!(
            Node::parse("/playlists/road_trip/song.mp3").unwrap(),
            Node::File(FileNode::PlaylistSong {
                playlist: "road_trip".to_string(),
                name: "song.mp3".to_string()
            })
        );
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(
            Node::parse("/A/.description").unwrap(),
            Node::File(FileNode::Description {
                artist: "A".to_string(),
                album: None
            })
        );
        assert_eq!(
            Node::parse("/A/B/.description").unwrap(),
            Node::File(FileNode::Description {
                artist: "A".to_string(),
                album: Some("B".to_string())
            })
        );
    }

    #[test]
    fn test_special_names() {
        assert_eq!(
            Node::parse("/.DS_Store").unwrap(),
            Node::File(FileNode::Special {
                artist: None,
                album: None,
                name: ".DS_Store".to_string()
            })
        );
        assert_eq!(
            Node::parse("/A/B/._song.mp3").unwrap(),
            Node::File(FileNode::Special {
                artist: Some("A".to_string()),
                album: Some("B".to_string()),
                name: "._song.mp3".to_string()
            })
        );
    }

    #[test]
    fn test_reserved_dot_names_rejected() {
        for path in ["/.hidden", "/A/._.", "/A/B/._..", "/drop/.DS_Store", "/playlists/.p"] {
            assert!(
                matches!(Node::parse(path), Err(NodeError::Reserved(_))),
                "expected {path} to be reserved"
            );
        }
    }

    #[test]
    fn test_too_deep_is_unresolvable() {
        assert!(matches!(
            Node::parse("/A/B/C/D"),
            Err(NodeError::Unresolvable(_))
        ));
        assert!(matches!(
            Node::parse("/playlists/p/q/r"),
            Err(NodeError::Unresolvable(_))
        ));
    }

    #[test]
    fn test_description_under_root_is_reserved() {
        assert!(matches!(
            Node::parse("/.description"),
            Err(NodeError::Reserved(_))
        ));
    }
}
