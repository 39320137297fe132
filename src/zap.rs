//! Channel change single-flight guard and list stepping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::Channel;

/// Single-flight flag for channel changes.
///
/// Overlapping channel-change commands confuse the device, so a second zap
/// is rejected outright while a [`ZapPermit`] is alive. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct ZapGuard {
    busy: Arc<AtomicBool>,
}

impl ZapGuard {
    /// Create an idle guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the flag, or `None` if a zap is already in flight.
    pub fn try_acquire(&self) -> Option<ZapPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ZapPermit {
                busy: self.busy.clone(),
            })
    }

    /// Whether a zap is in flight or cooling down.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held for the duration of one zap, settle delay included.
#[derive(Debug)]
pub struct ZapPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for ZapPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Direction for relative channel changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Next,
    Previous,
}

/// Index of the channel one `step` away from `current_id`.
///
/// Wraps at both ends. An unknown or absent current id resolves to index 0.
/// Returns `None` only for an empty list.
pub fn step_index(channels: &[Channel], current_id: Option<&str>, step: Step) -> Option<usize> {
    if channels.is_empty() {
        return None;
    }

    let Some(current) = current_id.and_then(|id| channels.iter().position(|c| c.program_id == id))
    else {
        return Some(0);
    };

    let len = channels.len();
    Some(match step {
        Step::Next => (current + 1) % len,
        Step::Previous => (current + len - 1) % len,
    })
}
