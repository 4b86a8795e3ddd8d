/// Errors produced by the metadata store and the playlist engine.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The referenced entity is absent at the expected hierarchy position.
    #[error("not found: {0}")]
    NotFound(String),

    /// A create collided with an existing normalized identifier.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The operation violates a hierarchy-level or naming rule.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Wrong file extension or malformed playlist/tag data.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// A rename target is not reachable as a rename.
    #[error("cross-device rename: {0}")]
    CrossDevice(String),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// Underlying file operation failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Classify a filesystem rename failure, keeping EXDEV distinct so
    /// the protocol layer can report it as such.
    pub fn from_rename(err: std::io::Error, from: &std::path::Path, to: &std::path::Path) -> Self {
        #[cfg(unix)]
        if err.raw_os_error() == Some(libc::EXDEV) {
            return StoreError::CrossDevice(format!(
                "{} -> {}",
                from.display(),
                to.display()
            ));
        }
        StoreError::Io(err)
    }
}
