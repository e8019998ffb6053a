//! Network side of the mirror.
//!
//! LIFECYCLE
//! =========
//! 1. Open a socket and wait for it to connect.
//! 2. Join `paintboard`; deltas start flowing and are buffered.
//! 3. After the join ack, fetch the snapshot (with retry) and go ready.
//! 4. Channel failure or kick-off: reload, rejoin after `reconnect_delay`.
//!    Socket reconnect: reload, wait for the socket to reopen.
//!    Terminal socket close: reload, build a new socket after `reconnect_delay`.
//! 5. Shutdown: close the socket, then the mirror.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use envelope::{Broadcast, decode_broadcast};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::api::{BoardApi, RequestError};
use super::grid::{Board, Pixel};
use super::mirror::{MirrorCore, Phase};
use crate::config::EngineConfig;
use crate::retry::RetryFailure;
use crate::socket::{ChannelEvent, ChannelSocket, SocketEvent};

/// Channel carrying board deltas.
pub const BOARD_CHANNEL: &str = "paintboard";

type SnapshotFetch<'a> = Pin<Box<dyn Future<Output = Result<Board, RetryFailure<RequestError>>> + Send + 'a>>;

enum SocketEnd {
    Shutdown,
    Closed,
}

enum SessionEnd {
    Shutdown,
    SocketLost,
    SocketClosed,
    ChannelFailed,
}

pub(crate) async fn supervise(
    core: Arc<MirrorCore>,
    api: Arc<BoardApi>,
    config: EngineConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (socket, mut socket_events) = ChannelSocket::connect(config.socket_url.clone(), config.channel);
        let ended = run_socket(&core, &api, &config, &socket, &mut socket_events, &mut shutdown).await;
        socket.close();
        if matches!(ended, SocketEnd::Shutdown) {
            break;
        }
        core.begin_loading();
        if pause(config.reconnect_delay, &mut shutdown).await {
            break;
        }
        info!("rebuilding board socket");
    }
    core.close();
}

async fn run_socket(
    core: &MirrorCore,
    api: &BoardApi,
    config: &EngineConfig,
    socket: &ChannelSocket,
    socket_events: &mut broadcast::Receiver<SocketEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> SocketEnd {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return SocketEnd::Shutdown;
                }
                continue;
            }
            event = socket_events.recv() => match event {
                Ok(SocketEvent::Open) => {}
                Ok(SocketEvent::Reconnecting { .. }) | Err(RecvError::Lagged(_)) => {
                    core.begin_loading();
                    continue;
                }
                Ok(SocketEvent::Closed { .. }) | Err(RecvError::Closed) => return SocketEnd::Closed,
            },
        }

        loop {
            match run_session(core, api, socket, socket_events, shutdown).await {
                SessionEnd::Shutdown => return SocketEnd::Shutdown,
                SessionEnd::SocketClosed => return SocketEnd::Closed,
                SessionEnd::SocketLost => {
                    core.begin_loading();
                    break;
                }
                SessionEnd::ChannelFailed => {
                    core.begin_loading();
                    if pause(config.reconnect_delay, shutdown).await {
                        return SocketEnd::Shutdown;
                    }
                }
            }
        }
    }
}

/// One join-fetch-follow cycle on an open socket.
async fn run_session(
    core: &MirrorCore,
    api: &BoardApi,
    socket: &ChannelSocket,
    socket_events: &mut broadcast::Receiver<SocketEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    core.begin_loading();
    let mut channel = match socket.channel(BOARD_CHANNEL, "", "") {
        Ok(channel) => channel,
        Err(error) => {
            warn!(%error, "cannot open board channel");
            return SessionEnd::SocketClosed;
        }
    };
    let palette_len = core.palette().len();
    let mut fetch: Option<SnapshotFetch<'_>> = None;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return SessionEnd::Shutdown;
                }
            }
            event = socket_events.recv() => match event {
                Ok(SocketEvent::Open) | Err(RecvError::Lagged(_)) => {}
                Ok(SocketEvent::Reconnecting { .. }) => return SessionEnd::SocketLost,
                Ok(SocketEvent::Closed { .. }) | Err(RecvError::Closed) => return SessionEnd::SocketClosed,
            },
            event = channel.recv() => match event {
                Some(ChannelEvent::Joined { .. }) => {
                    if fetch.is_none() && core.phase() != Phase::Ready {
                        debug!("board channel joined; fetching snapshot");
                        fetch = Some(Box::pin(api.fetch_snapshot(palette_len)));
                    }
                }
                Some(ChannelEvent::Message(payload)) => match decode_broadcast(&payload) {
                    Ok(Broadcast::PaintboardUpdate { x, y, color }) => core.apply_delta(Pixel { x, y, color }),
                    Ok(Broadcast::Other) => {}
                    Err(error) => debug!(%error, "dropping malformed board broadcast"),
                },
                Some(ChannelEvent::Kicked(_)) => return SessionEnd::ChannelFailed,
                Some(ChannelEvent::Failed(error)) => {
                    warn!(%error, "board channel failed; reloading");
                    return SessionEnd::ChannelFailed;
                }
                None => return SessionEnd::ChannelFailed,
            },
            Some(result) = poll_fetch(&mut fetch), if fetch.is_some() => {
                fetch = None;
                match result {
                    Ok(board) => core.finish_loading(board),
                    Err(RetryFailure { attempts, error }) => {
                        error!(attempts, %error, "snapshot fetch failed; reloading");
                        return SessionEnd::ChannelFailed;
                    }
                }
            }
        }
    }
}

async fn poll_fetch<F: Future + Unpin>(fetch: &mut Option<F>) -> Option<F::Output> {
    match fetch {
        Some(future) => Some(future.await),
        None => None,
    }
}

/// Sleep for `delay`; returns `true` if shutdown was requested meanwhile.
async fn pause(delay: std::time::Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
