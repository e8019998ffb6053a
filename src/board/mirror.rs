//! Mirror state machine.
//!
//! DESIGN
//! ======
//! `MirrorCore` holds the phase, the grid and the pre-load delta buffer
//! behind one std mutex. Every transition is a short synchronous critical
//! section, and events are broadcast while the lock is held, so the order
//! subscribers observe always matches the order state changed. Nothing in
//! here awaits; the supervisor drives transitions from the network side.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::grid::{Board, Pixel, Snapshot};
use crate::colors::Palette;

/// Buffered events per subscriber before it starts lagging.
pub const EVENT_CAPACITY: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Loading,
    Ready,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardEvent {
    /// A fresh snapshot (with buffered deltas applied) is now authoritative.
    Load(Snapshot),
    /// One cell changed while ready.
    Update(Pixel),
    /// The grid was discarded and a reload is under way.
    Reconnect,
    /// The mirror is closed for good.
    Close,
}

struct MirrorState {
    phase: Phase,
    board: Option<Board>,
    buffered: Vec<Pixel>,
}

pub(crate) struct MirrorCore {
    state: Mutex<MirrorState>,
    events: broadcast::Sender<BoardEvent>,
    palette: Palette,
}

impl MirrorCore {
    pub(crate) fn new(palette: Palette) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(MirrorState { phase: Phase::Uninitialized, board: None, buffered: Vec::new() }),
            events,
            palette,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MirrorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn palette(&self) -> &Palette {
        &self.palette
    }

    pub(crate) fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub(crate) fn get(&self, x: i32, y: i32) -> Option<u8> {
        self.lock().board.as_ref().and_then(|board| board.get(x, y))
    }

    pub(crate) fn snapshot(&self) -> Option<Snapshot> {
        self.lock().board.as_ref().map(Board::snapshot)
    }

    /// Current snapshot (if ready) and a receiver for every later event.
    /// Taken under one lock so nothing falls between the two.
    pub(crate) fn watch(&self) -> (Option<Snapshot>, broadcast::Receiver<BoardEvent>) {
        let state = self.lock();
        let snapshot = state.board.as_ref().map(Board::snapshot);
        (snapshot, self.events.subscribe())
    }

    /// Discard the grid and start buffering deltas. Emits `Reconnect` when
    /// leaving `Ready`.
    pub(crate) fn begin_loading(&self) {
        let mut state = self.lock();
        match state.phase {
            Phase::Closed | Phase::Loading => {}
            Phase::Uninitialized => state.phase = Phase::Loading,
            Phase::Ready => {
                state.phase = Phase::Loading;
                state.board = None;
                state.buffered.clear();
                info!("board mirror reloading");
                self.emit(BoardEvent::Reconnect);
            }
        }
    }

    /// Apply one delta from the socket: buffered while loading, applied and
    /// broadcast while ready, ignored otherwise.
    pub(crate) fn apply_delta(&self, pixel: Pixel) {
        if !self.palette.contains(pixel.color) {
            warn!(x = pixel.x, y = pixel.y, color = pixel.color, "dropping delta with unknown color");
            return;
        }
        let mut state = self.lock();
        match state.phase {
            Phase::Loading => state.buffered.push(pixel),
            Phase::Ready => {
                let applied = state
                    .board
                    .as_mut()
                    .is_some_and(|board| board.set(pixel.x, pixel.y, pixel.color));
                if applied {
                    self.emit(BoardEvent::Update(pixel));
                } else {
                    warn!(x = pixel.x, y = pixel.y, "dropping delta outside the board");
                }
            }
            Phase::Uninitialized | Phase::Closed => {
                debug!(x = pixel.x, y = pixel.y, "dropping delta before load");
            }
        }
    }

    /// Install a fetched snapshot, replay buffered deltas in receipt order
    /// and announce the result.
    pub(crate) fn finish_loading(&self, mut board: Board) {
        let mut state = self.lock();
        if state.phase != Phase::Loading {
            debug!(phase = ?state.phase, "discarding snapshot fetched outside loading");
            return;
        }
        let buffered = std::mem::take(&mut state.buffered);
        let replayed = buffered.len();
        for pixel in buffered {
            if !board.set(pixel.x, pixel.y, pixel.color) {
                warn!(x = pixel.x, y = pixel.y, "dropping buffered delta outside the board");
            }
        }
        let snapshot = board.snapshot();
        info!(width = board.width(), height = board.height(), replayed, "board loaded");
        state.board = Some(board);
        state.phase = Phase::Ready;
        self.emit(BoardEvent::Load(snapshot));
    }

    /// Enter `Closed`. Idempotent.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        if state.phase == Phase::Closed {
            return;
        }
        state.phase = Phase::Closed;
        state.board = None;
        state.buffered.clear();
        info!("board mirror closed");
        self.emit(BoardEvent::Close);
    }

    fn emit(&self, event: BoardEvent) {
        if self.events.send(event).is_err() {
            debug!("no board event subscribers");
        }
    }
}

#[cfg(test)]
#[path = "mirror_test.rs"]
mod tests;
