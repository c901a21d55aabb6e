//! Gesture execution: the capability the dispatcher hands its batches to.

use std::io;

use crate::layout::Point;

#[cfg(target_os = "linux")]
pub mod uinput;

/// One touch: press `position` after `start_delay_ms`, release `hold_ms` later.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gesture {
    pub start_delay_ms: u64,
    pub hold_ms: u64,
    pub position: Point,
}

impl Gesture {
    pub fn tap(position: Point, hold_ms: u64) -> Self {
        Self {
            start_delay_ms: 0,
            hold_ms,
            position,
        }
    }
}

/// Executes gesture batches. Callers never invoke `execute` concurrently;
/// it returns once the batch has been accepted by the host.
pub trait GesturePlayer: Send {
    fn execute(&mut self, batch: &[Gesture]) -> io::Result<()>;
}

/// Logs every batch instead of touching anything.
#[derive(Debug, Default)]
pub struct LogPlayer;

impl GesturePlayer for LogPlayer {
    fn execute(&mut self, batch: &[Gesture]) -> io::Result<()> {
        for g in batch {
            log::info!(
                "touch ({}, {}) after {}ms for {}ms",
                g.position.x,
                g.position.y,
                g.start_delay_ms,
                g.hold_ms
            );
        }
        Ok(())
    }
}
