//! Board mirror: live local copy of the remote paint board.
//!
//! DESIGN
//! ======
//! The mirror is a cheap cloneable handle over shared state:
//! - `grid`: board cells and the snapshot codec
//! - `mirror`: the phase machine (`Uninitialized → Loading → Ready → … →
//!   Closed`) and the event broadcast
//! - `supervisor`: background task driving the socket, the `paintboard`
//!   channel and snapshot fetches
//! - `api`: HTTP snapshot and paint endpoints
//!
//! Reads never block on I/O. Writes go straight to the paint endpoint and
//! never touch the local grid; the confirming delta does that.

mod api;
mod grid;
mod mirror;
mod supervisor;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tracing::debug;

pub use api::{BoardApi, PaintError, RequestError, is_transient_status};
pub use grid::{Board, Pixel, Snapshot, SnapshotError, parse_snapshot};
pub use mirror::{BoardEvent, EVENT_CAPACITY, Phase};
pub use supervisor::BOARD_CHANNEL;

use crate::colors::Palette;
use crate::config::EngineConfig;
use crate::session::Session;
use mirror::MirrorCore;

/// What the scheduler needs from a board: reads, change events and writes.
#[async_trait]
pub trait Canvas: Send + Sync {
    /// Current color at `(x, y)`; `None` when unknown or out of bounds.
    fn get(&self, x: i32, y: i32) -> Option<u8>;

    /// The current snapshot if loaded, plus a receiver for every later event.
    fn watch(&self) -> (Option<Snapshot>, broadcast::Receiver<BoardEvent>);

    /// Submit one pixel on behalf of `session`.
    async fn paint(&self, pixel: Pixel, session: &Session) -> Result<(), PaintError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct BoardMirror {
    core: Arc<MirrorCore>,
    api: Arc<BoardApi>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl BoardMirror {
    /// Start mirroring. Spawns the supervisor; must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Client`] if the HTTP client cannot be built.
    pub fn start(config: EngineConfig, palette: Palette) -> Result<Self, MirrorError> {
        let api = Arc::new(BoardApi::new(&config)?);
        let core = Arc::new(MirrorCore::new(palette));
        let (shutdown, signal) = watch::channel(false);
        core.begin_loading();
        tokio::spawn(supervisor::supervise(Arc::clone(&core), Arc::clone(&api), config, signal));
        Ok(Self { core, api, shutdown: Arc::new(shutdown) })
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.core.phase()
    }

    #[must_use]
    pub fn get(&self, x: i32, y: i32) -> Option<u8> {
        self.core.get(x, y)
    }

    /// Copy of the board, `None` unless ready.
    #[must_use]
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.core.snapshot()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.core.watch().1
    }

    #[must_use]
    pub fn palette(&self) -> &Palette {
        self.core.palette()
    }

    /// Submit one pixel. The local grid is left alone.
    ///
    /// # Errors
    ///
    /// See [`BoardApi::paint`].
    pub async fn set(&self, pixel: Pixel, session: &Session) -> Result<(), PaintError> {
        self.api.paint(pixel, session).await
    }

    /// Close the mirror and stop the supervisor. Idempotent.
    pub fn close(&self) {
        self.core.close();
        if self.shutdown.send(true).is_err() {
            debug!("board supervisor already stopped");
        }
    }
}

#[async_trait]
impl Canvas for BoardMirror {
    fn get(&self, x: i32, y: i32) -> Option<u8> {
        self.core.get(x, y)
    }

    fn watch(&self) -> (Option<Snapshot>, broadcast::Receiver<BoardEvent>) {
        self.core.watch()
    }

    async fn paint(&self, pixel: Pixel, session: &Session) -> Result<(), PaintError> {
        self.set(pixel, session).await
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
