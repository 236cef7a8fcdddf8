// Emergency-stop input and state machine
//
// The e-stop line is active-low and pulled down when nothing drives it, so
// an unplugged or broken circuit reads as tripped.

use std::path::{Path, PathBuf};
use tracing::warn;

/// E-stop state, re-derived from the line every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EstopState {
    #[default]
    Armed,
    Tripped,
}

impl EstopState {
    /// Tripped while the line is low, armed while it is high
    pub fn from_line(line_high: bool) -> Self {
        if line_high {
            EstopState::Armed
        } else {
            EstopState::Tripped
        }
    }

    pub fn is_tripped(self) -> bool {
        self == EstopState::Tripped
    }
}

/// Source of the e-stop line level
pub trait EstopInput {
    /// True when the line reads high (safe to run)
    fn line_high(&mut self) -> bool;
}

/// E-stop wired to a GPIO exposed through sysfs (`.../gpioN/value`)
#[derive(Debug)]
pub struct GpioEstop {
    path: PathBuf,
    read_failed: bool,
}

impl GpioEstop {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            read_failed: false,
        }
    }
}

impl EstopInput for GpioEstop {
    fn line_high(&mut self) -> bool {
        match std::fs::read_to_string(&self.path) {
            Ok(value) => {
                self.read_failed = false;
                value.trim() == "1"
            }
            Err(e) => {
                // Unreadable line counts as tripped
                if !self.read_failed {
                    warn!("Failed to read e-stop line {}: {}", self.path.display(), e);
                }
                self.read_failed = true;
                false
            }
        }
    }
}

/// No e-stop wired; the line always reads high
#[derive(Debug, Default)]
pub struct NoEstop;

impl EstopInput for NoEstop {
    fn line_high(&mut self) -> bool {
        true
    }
}
