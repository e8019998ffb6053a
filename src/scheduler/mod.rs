//! Paint scheduler: drives every session against the shared work queue.
//!
//! DESIGN
//! ======
//! One follower task turns board events into [`WorkState`] changes; one
//! actor task per session claims pixels and paints them. `WorkState` sits
//! behind a std mutex that is only ever held for a synchronous claim,
//! release or update, never across an await. Actors sleep on a `watch`
//! counter that the follower (and failing actors) bump whenever work may
//! have appeared, so idle actors do not spin.
//!
//! PACING
//! ======
//! Actor `i` of `n` starts after `cooldown * i / n` and waits a full cooldown
//! after every claim: painted, failed, or dropped because the pixel already
//! matches. Pacing is per actor, not per pixel. Retries of transient failures
//! happen inside one attempt (see `board::BoardApi::paint`). A successful
//! write keeps its pixel held until the confirming delta arrives, the board
//! reloads, or `confirm_timeout` runs out.

mod work;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::board::{BoardEvent, Canvas, PaintError, Pixel, Snapshot};
use crate::config::DEFAULT_COOLDOWN_MS;
use crate::session::Session;
use work::{Dispatch, Outcome, Ticket, WorkState};

const EVENT_CAPACITY: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PainterConfig {
    /// Minimum time between two paint attempts of one session.
    pub cooldown: Duration,
    /// Shuffle the relevant targets on every load.
    pub randomize: bool,
    /// How long a painted pixel stays held without a confirming delta.
    /// Defaults to the cooldown.
    pub confirm_timeout: Option<Duration>,
}

impl Default for PainterConfig {
    fn default() -> Self {
        Self { cooldown: Duration::from_millis(DEFAULT_COOLDOWN_MS), randomize: false, confirm_timeout: None }
    }
}

#[derive(Debug, Clone)]
pub enum PainterEvent {
    /// The board (re)loaded. `pixels` are the relevant targets.
    Load { width: u32, height: u32, pixels: Arc<[Pixel]>, remaining: usize },
    /// A board change moved the remaining count.
    Update { pixel: Pixel, remaining: usize },
    /// The pending set was rebuilt after missed board events.
    Resync { remaining: usize },
    /// A session painted a pixel.
    Paint { actor: u64, pixel: Pixel },
    /// A session's paint failed. Painting continues.
    Error { actor: u64, error: Arc<PaintError> },
    /// The board is reloading or closed; dispatch is suspended.
    Paused,
}

struct Shared {
    canvas: Arc<dyn Canvas>,
    work: Mutex<WorkState>,
    wake: watch::Sender<u64>,
    events: broadcast::Sender<PainterEvent>,
    config: PainterConfig,
}

pub struct Painter {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl Painter {
    /// Start following `canvas` and painting `targets` with `sessions`.
    /// With no sessions the painter only tracks progress.
    ///
    /// The returned receiver sees every event from the first `Load` on.
    pub fn start(
        canvas: Arc<dyn Canvas>,
        targets: Vec<Pixel>,
        sessions: Vec<Session>,
        config: PainterConfig,
    ) -> (Self, broadcast::Receiver<PainterEvent>) {
        let (events, receiver) = broadcast::channel(EVENT_CAPACITY);
        let (wake, _) = watch::channel(0_u64);
        let (snapshot, board_events) = canvas.watch();
        let shared = Arc::new(Shared {
            canvas,
            work: Mutex::new(WorkState::new(targets, config.randomize)),
            wake,
            events,
            config,
        });
        if let Some(snapshot) = snapshot {
            shared.on_load(&snapshot);
        }

        let mut tasks = Vec::with_capacity(sessions.len() + 1);
        tasks.push(tokio::spawn(follow_board(Arc::clone(&shared), board_events)));
        let lanes = u32::try_from(sessions.len()).unwrap_or(u32::MAX);
        for (lane, session) in (0_u32..).zip(sessions) {
            let stagger = (config.cooldown / lanes.max(1)) * lane;
            tasks.push(tokio::spawn(run_actor(Arc::clone(&shared), session, stagger)));
        }
        info!(actors = lanes, "painter started");

        (Self { shared, tasks }, receiver)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PainterEvent> {
        self.shared.events.subscribe()
    }

    /// Pixels that still differ from their targets.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.shared.lock().remaining()
    }

    /// Every target, de-duplicated, including those off the board.
    #[must_use]
    pub fn targets(&self) -> Vec<Pixel> {
        self.shared.lock().targets().to_vec()
    }

    /// Targets that still differ from the board, in dispatch order.
    #[must_use]
    pub fn pending(&self) -> Vec<Pixel> {
        self.shared.lock().pending_pixels()
    }

    /// A board is loaded and sessions may claim pixels.
    #[must_use]
    pub fn is_dispatching(&self) -> bool {
        self.shared.lock().is_ready()
    }

    /// Stop every task. In-flight writes are abandoned.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Painter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WorkState> {
        self.work.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PainterEvent) {
        if self.events.send(event).is_err() {
            debug!("no painter event subscribers");
        }
    }

    fn wake_actors(&self) {
        self.wake.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    fn confirm_timeout(&self) -> Duration {
        self.config.confirm_timeout.unwrap_or(self.config.cooldown)
    }

    fn on_load(&self, snapshot: &Snapshot) {
        let (remaining, pixels) = {
            let mut work = self.lock();
            let remaining = work.load(snapshot);
            (remaining, Arc::<[Pixel]>::from(work.relevant()))
        };
        debug!(width = snapshot.width, height = snapshot.height, targets = pixels.len(), remaining, "targets loaded");
        self.emit(PainterEvent::Load { width: snapshot.width, height: snapshot.height, pixels, remaining });
        self.wake_actors();
    }

    fn on_update(&self, cell: Pixel) {
        let Some(touch) = self.lock().update(cell) else {
            return;
        };
        self.wake_actors();
        if touch.changed {
            self.emit(PainterEvent::Update { pixel: cell, remaining: touch.remaining });
        }
    }

    fn on_pause(&self) {
        self.lock().pause();
        self.emit(PainterEvent::Paused);
    }

    fn on_resync(&self) {
        let touch = self.lock().resync(|x, y| self.canvas.get(x, y));
        if let Some(touch) = touch {
            self.wake_actors();
            if touch.changed {
                info!(remaining = touch.remaining, "pending set rebuilt");
                self.emit(PainterEvent::Resync { remaining: touch.remaining });
            }
        }
    }

    /// Wait until a pixel can be claimed, then claim it.
    async fn next_ticket(&self, wake: &mut watch::Receiver<u64>) -> Ticket {
        loop {
            wake.mark_unchanged();
            let dispatch = self.lock().claim(Instant::now());
            match dispatch {
                Dispatch::Claimed(ticket) => return ticket,
                Dispatch::Paused | Dispatch::Idle { wake_at: None } => {
                    if wake.changed().await.is_err() {
                        tokio::time::sleep(self.config.cooldown).await;
                    }
                }
                Dispatch::Idle { wake_at: Some(at) } => {
                    tokio::select! {
                        _ = wake.changed() => {}
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
            }
        }
    }

    /// Paint a claimed pixel, or drop the claim when the board already
    /// has the color.
    async fn paint(&self, session: &Session, ticket: Ticket) {
        let actor = session.id();
        let pixel = ticket.pixel;
        let current = self.canvas.get(pixel.x, pixel.y);
        if current.is_none() || current == Some(pixel.color) {
            debug!(actor, x = pixel.x, y = pixel.y, ?current, "pixel no longer needs paint");
            let touch = {
                let mut work = self.lock();
                work.release(ticket, Outcome::Skipped);
                // The follower may not have seen this cell yet.
                current.and_then(|_| work.update(pixel))
            };
            if let Some(touch) = touch.filter(|touch| touch.changed) {
                self.emit(PainterEvent::Update { pixel, remaining: touch.remaining });
            }
            return;
        }

        match self.canvas.paint(pixel, session).await {
            Ok(()) => {
                let hold_until = Instant::now() + self.confirm_timeout();
                self.lock().release(ticket, Outcome::Painted { hold_until });
                debug!(actor, x = pixel.x, y = pixel.y, color = pixel.color, "painted");
                self.emit(PainterEvent::Paint { actor, pixel });
            }
            Err(error) => {
                self.lock().release(ticket, Outcome::Failed);
                debug!(actor, x = pixel.x, y = pixel.y, %error, "paint failed");
                self.emit(PainterEvent::Error { actor, error: Arc::new(error) });
                self.wake_actors();
            }
        }
    }
}

async fn follow_board(shared: Arc<Shared>, mut events: broadcast::Receiver<BoardEvent>) {
    loop {
        match events.recv().await {
            Ok(BoardEvent::Load(snapshot)) => shared.on_load(&snapshot),
            Ok(BoardEvent::Update(cell)) => shared.on_update(cell),
            Ok(BoardEvent::Reconnect) => shared.on_pause(),
            Ok(BoardEvent::Close) => {
                shared.on_pause();
                break;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "board events lagged; rebuilding pending set");
                shared.on_resync();
            }
            Err(RecvError::Closed) => {
                shared.on_pause();
                break;
            }
        }
    }
}

async fn run_actor(shared: Arc<Shared>, session: Session, stagger: Duration) {
    let actor = session.id();
    tokio::time::sleep(stagger).await;
    debug!(actor, "session active");
    let mut wake = shared.wake.subscribe();
    loop {
        let ticket = shared.next_ticket(&mut wake).await;
        shared.paint(&session, ticket).await;
        tokio::time::sleep(shared.config.cooldown).await;
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
