//! Automated paint-board painter.
//!
//! Mirrors a remote pixel board over a channel socket, quantizes a source
//! image into palette-indexed targets and repaints every differing pixel
//! with a pool of rate-limited sessions.

pub mod board;
pub mod colors;
pub mod config;
pub mod preview;
pub mod quantize;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod socket;

#[cfg(test)]
pub(crate) mod test_helpers;
