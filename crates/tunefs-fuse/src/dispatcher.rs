//! The delayed dispatcher.
//!
//! Copy tools open, write, close, and reopen a file many times while it
//! lands. Classifying on every release would read half-written tags, so
//! releases only record a touch here. A single worker thread keeps the
//! pending touches in insertion order, and a periodic sweep fires the
//! action of every identity that has stayed quiet for the configured
//! interval. Repeated touches coalesce: the timestamp advances and the
//! newest action replaces the old one.
//!
//! The channel is the only synchronization point. The pending list is
//! touched by the worker alone, so it needs no locking of its own.

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use tunefs_store::MetaStore;

/// Identity of one logical file, as seen through the mount.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TouchKey {
    pub artist: String,
    pub album: String,
    pub name: String,
}

impl TouchKey {
    /// Identity of a file sitting in the flat drop directory.
    pub fn drop(name: impl Into<String>) -> Self {
        TouchKey {
            artist: "drop".to_string(),
            album: String::new(),
            name: name.into(),
        }
    }

    /// Identity of a file staged inside one playlist directory.
    pub fn playlist(playlist: impl Into<String>, name: impl Into<String>) -> Self {
        TouchKey {
            artist: "playlists".to_string(),
            album: playlist.into(),
            name: name.into(),
        }
    }
}

/// What to do once an identity has gone quiet. Later touches replace
/// earlier actions wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TouchAction {
    /// Nothing to run; the touch only resets the quiet timer.
    Refresh,
    /// File the staged drop into the Artist/Album hierarchy.
    ClassifyDrop { staged: PathBuf },
    /// Link the staged file into a playlist.
    ClassifyPlaylist { playlist: String, staged: PathBuf },
}

enum Msg {
    Touch(TouchKey, TouchAction),
    Shutdown,
}

struct Pending {
    last_touch: Instant,
    action: TouchAction,
}

/// Handle to the background worker. Dropping it drains nothing: pending
/// items that have not gone quiet yet are abandoned, matching a plain
/// unmount.
pub struct Dispatcher {
    tx: mpsc::Sender<Msg>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the worker, firing actions against `store` after `quiet`.
    pub fn start(store: Arc<MetaStore>, quiet: Duration) -> Self {
        let tick = (quiet / 2).max(Duration::from_millis(50));
        Self::with_handler(quiet, tick, move |key, action| {
            fire(&store, key, action);
        })
    }

    /// Spawn the worker with an arbitrary firing handler. Exposed for
    /// tests that only care about debounce behavior.
    pub fn with_handler(
        quiet: Duration,
        tick: Duration,
        mut handler: impl FnMut(TouchKey, TouchAction) + Send + 'static,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Msg>();
        let worker = std::thread::spawn(move || {
            let mut pending: IndexMap<TouchKey, Pending> = IndexMap::new();
            let mut next_sweep = Instant::now() + tick;
            loop {
                let timeout = next_sweep.saturating_duration_since(Instant::now());
                match rx.recv_timeout(timeout) {
                    Ok(Msg::Touch(key, action)) => {
                        debug!("touch {key:?}");
                        pending.insert(
                            key,
                            Pending {
                                last_touch: Instant::now(),
                                action,
                            },
                        );
                    }
                    Ok(Msg::Shutdown) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        let now = Instant::now();
                        // Sweep in place: every quiet item fires exactly
                        // once, synchronously, before the next one.
                        let due: Vec<TouchKey> = pending
                            .iter()
                            .filter(|(_, p)| now.duration_since(p.last_touch) >= quiet)
                            .map(|(k, _)| k.clone())
                            .collect();
                        for key in due {
                            if let Some(p) = pending.shift_remove(&key) {
                                handler(key, p.action);
                            }
                        }
                        next_sweep = Instant::now() + tick;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });
        Dispatcher {
            tx,
            worker: Some(worker),
        }
    }

    /// Record that a file was touched. Never blocks.
    pub fn touch(&self, key: TouchKey, action: TouchAction) {
        if self.tx.send(Msg::Touch(key, action)).is_err() {
            warn!("dispatcher worker is gone; dropping touch");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.tx.send(Msg::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Run one fired action against the store. Failures are final: they are
/// logged and the item is gone.
fn fire(store: &MetaStore, key: TouchKey, action: TouchAction) {
    match action {
        TouchAction::Refresh => debug!("quiet touch {key:?}, nothing to run"),
        TouchAction::ClassifyDrop { staged } => match store.classify_drop(&staged) {
            Ok(song) => info!(
                "filed {} as {}/{}/{}",
                staged.display(),
                song.artist,
                song.album,
                song.file_name
            ),
            Err(err) => warn!("classification of {} failed: {err}", staged.display()),
        },
        TouchAction::ClassifyPlaylist { playlist, staged } => {
            match store.classify_playlist_drop(&playlist, &staged) {
                Ok(song) => info!(
                    "linked {} into playlist {playlist}",
                    song.file_name
                ),
                Err(err) => warn!(
                    "playlist classification of {} failed: {err}",
                    staged.display()
                ),
            }
        }
    }
}
