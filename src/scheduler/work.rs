//! Scheduler bookkeeping: relevant targets, the pending set, claims and the
//! rotating cursor.
//!
//! Every method is synchronous and is called with the scheduler lock held,
//! so a scan-and-claim can never interleave with another actor's.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use tokio::time::Instant;

use crate::board::{Pixel, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Free,
    InFlight,
    /// Written successfully; held until its delta arrives or the deadline passes.
    Awaiting(Instant),
}

/// A claimed pixel. Only valid for the load epoch it was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket {
    pub epoch: u64,
    pub slot: usize,
    pub pixel: Pixel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Claimed(Ticket),
    /// Nothing claimable. `wake_at` is the earliest hold expiry, if any.
    Idle { wake_at: Option<Instant> },
    /// The board is not loaded.
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The write succeeded; hold the pixel until this instant.
    Painted { hold_until: Instant },
    Failed,
    Skipped,
}

/// Result of applying one board change to the pending set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Touch {
    pub remaining: usize,
    pub changed: bool,
}

pub(crate) struct WorkState {
    targets: Vec<Pixel>,
    randomize: bool,
    ready: bool,
    epoch: u64,
    relevant: Vec<Pixel>,
    slots: HashMap<(i32, i32), usize>,
    pending: Vec<bool>,
    claims: Vec<Claim>,
    remaining: usize,
    cursor: usize,
}

impl WorkState {
    /// Targets are de-duplicated by coordinate; a later entry replaces an
    /// earlier one in place.
    pub(crate) fn new(targets: Vec<Pixel>, randomize: bool) -> Self {
        let mut positions: HashMap<(i32, i32), usize> = HashMap::with_capacity(targets.len());
        let mut unique: Vec<Pixel> = Vec::with_capacity(targets.len());
        for pixel in targets {
            match positions.get(&(pixel.x, pixel.y)) {
                Some(&at) => unique[at] = pixel,
                None => {
                    positions.insert((pixel.x, pixel.y), unique.len());
                    unique.push(pixel);
                }
            }
        }
        Self {
            targets: unique,
            randomize,
            ready: false,
            epoch: 0,
            relevant: Vec::new(),
            slots: HashMap::new(),
            pending: Vec::new(),
            claims: Vec::new(),
            remaining: 0,
            cursor: 0,
        }
    }

    pub(crate) fn targets(&self) -> &[Pixel] {
        &self.targets
    }

    pub(crate) fn relevant(&self) -> &[Pixel] {
        &self.relevant
    }

    pub(crate) fn remaining(&self) -> usize {
        self.remaining
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready
    }

    /// Rebuild everything from a fresh board. Returns the pending count.
    pub(crate) fn load(&mut self, snapshot: &Snapshot) -> usize {
        let (width, height) = (snapshot.width, snapshot.height);
        let mut relevant = self
            .targets
            .iter()
            .copied()
            .filter(|p| in_bounds(p, width, height))
            .collect::<Vec<_>>();
        if self.randomize {
            relevant.shuffle(&mut rand::rng());
        }

        self.slots = relevant.iter().enumerate().map(|(slot, p)| ((p.x, p.y), slot)).collect();
        self.pending = relevant.iter().map(|p| snapshot.get(p.x, p.y) != Some(p.color)).collect();
        self.remaining = self.pending.iter().filter(|pending| **pending).count();
        self.claims = vec![Claim::Free; relevant.len()];
        self.relevant = relevant;
        self.cursor = 0;
        self.epoch += 1;
        self.ready = true;
        self.remaining
    }

    /// Stop dispatching until the next load. Outstanding tickets go stale.
    pub(crate) fn pause(&mut self) {
        self.ready = false;
        self.epoch += 1;
    }

    /// Apply one changed cell. `None` when it is not a relevant target.
    pub(crate) fn update(&mut self, cell: Pixel) -> Option<Touch> {
        if !self.ready {
            return None;
        }
        let slot = *self.slots.get(&(cell.x, cell.y))?;
        if matches!(self.claims[slot], Claim::Awaiting(_)) {
            self.claims[slot] = Claim::Free;
        }
        let needs_paint = cell.color != self.relevant[slot].color;
        let changed = self.set_pending(slot, needs_paint);
        Some(Touch { remaining: self.remaining, changed })
    }

    /// Recompute every pending flag from `read`. Used after missed events.
    pub(crate) fn resync(&mut self, read: impl Fn(i32, i32) -> Option<u8>) -> Option<Touch> {
        if !self.ready {
            return None;
        }
        let mut changed = false;
        for slot in 0..self.relevant.len() {
            let target = self.relevant[slot];
            changed |= self.set_pending(slot, read(target.x, target.y) != Some(target.color));
        }
        Some(Touch { remaining: self.remaining, changed })
    }

    /// Claim the next pending, unclaimed pixel at or after the cursor,
    /// wrapping once.
    pub(crate) fn claim(&mut self, now: Instant) -> Dispatch {
        if !self.ready {
            return Dispatch::Paused;
        }
        let count = self.relevant.len();
        let mut wake_at: Option<Instant> = None;
        for step in 0..count {
            let slot = (self.cursor + step) % count;
            if !self.pending[slot] {
                continue;
            }
            match self.claims[slot] {
                Claim::Free => {}
                Claim::InFlight => continue,
                Claim::Awaiting(until) if until > now => {
                    wake_at = Some(wake_at.map_or(until, |at| at.min(until)));
                    continue;
                }
                Claim::Awaiting(_) => {}
            }
            self.claims[slot] = Claim::InFlight;
            self.cursor = (slot + 1) % count;
            return Dispatch::Claimed(Ticket { epoch: self.epoch, slot, pixel: self.relevant[slot] });
        }
        Dispatch::Idle { wake_at }
    }

    /// Settle a ticket. Tickets from an earlier epoch are ignored.
    pub(crate) fn release(&mut self, ticket: Ticket, outcome: Outcome) {
        if ticket.epoch != self.epoch {
            return;
        }
        self.claims[ticket.slot] = match outcome {
            Outcome::Painted { hold_until } => Claim::Awaiting(hold_until),
            Outcome::Failed | Outcome::Skipped => Claim::Free,
        };
    }

    /// Coordinates currently pending, in slot order.
    pub(crate) fn pending_pixels(&self) -> Vec<Pixel> {
        self.relevant
            .iter()
            .zip(&self.pending)
            .filter_map(|(pixel, pending)| pending.then_some(*pixel))
            .collect()
    }

    fn set_pending(&mut self, slot: usize, needs_paint: bool) -> bool {
        if self.pending[slot] == needs_paint {
            return false;
        }
        self.pending[slot] = needs_paint;
        if needs_paint {
            self.remaining += 1;
        } else {
            self.remaining -= 1;
        }
        true
    }
}

fn in_bounds(pixel: &Pixel, width: u32, height: u32) -> bool {
    u32::try_from(pixel.x).is_ok_and(|x| x < width) && u32::try_from(pixel.y).is_ok_and(|y| y < height)
}

#[cfg(test)]
#[path = "work_test.rs"]
mod tests;
