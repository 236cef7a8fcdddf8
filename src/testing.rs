// Test doubles: a scripted motor-controller port, a virtual clock and a
// fixed-output orientation filter

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::Clock;
use crate::estimator::OrientationFilter;
use crate::messages::{FusionInput, Orientation};

/// Clock whose `sleep` advances virtual time instantly
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Debug, Default)]
pub struct MockDevice {
    /// Every complete command line written, without the terminator
    pub sent: Vec<String>,
    /// One-shot replies per read path, consumed in order
    pub scripted: HashMap<String, VecDeque<String>>,
    /// Reply used once a path's script is exhausted
    pub defaults: HashMap<String, String>,
    /// Reads answer nothing at all (device gone)
    pub silent: bool,
    partial: Vec<u8>,
    rx: VecDeque<u8>,
}

impl MockDevice {
    fn on_line(&mut self, line: String) {
        let reply = line
            .strip_prefix("r ")
            .map(|path| self.reply_for(path.trim()));
        self.sent.push(line);
        if let Some(reply) = reply {
            if !self.silent {
                self.rx.extend(reply.bytes());
                self.rx.push_back(b'\n');
            }
        }
    }

    fn reply_for(&mut self, path: &str) -> String {
        if let Some(reply) = self.scripted.get_mut(path).and_then(|q| q.pop_front()) {
            return reply;
        }
        self.defaults
            .get(path)
            .cloned()
            .unwrap_or_else(|| "0".to_string())
    }
}

/// In-memory stand-in for the motor controller's serial port
///
/// Answers `r <path>` lines from its script; writes get no reply, like the
/// real device. Clones share the same device so a test can inspect traffic
/// after handing the port to the code under test.
#[derive(Debug, Clone, Default)]
pub struct MockPort {
    device: Arc<Mutex<MockDevice>>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(&self) -> MutexGuard<'_, MockDevice> {
        self.device.lock().unwrap()
    }

    pub fn set_default(&self, path: &str, reply: &str) {
        self.device()
            .defaults
            .insert(path.to_string(), reply.to_string());
    }

    pub fn script(&self, path: &str, replies: &[&str]) {
        self.device()
            .scripted
            .entry(path.to_string())
            .or_default()
            .extend(replies.iter().map(|r| r.to_string()));
    }

    /// Queue raw bytes as if the device had sent them unprompted
    pub fn inject(&self, bytes: &[u8]) {
        self.device().rx.extend(bytes.iter().copied());
    }

    pub fn sent(&self) -> Vec<String> {
        self.device().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.device().sent.clear();
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut device = self.device();
        if device.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no reply"));
        }
        let n = buf.len().min(device.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = device.rx.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut device = self.device();
        for &byte in buf {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&device.partial).into_owned();
                device.partial.clear();
                device.on_line(line);
            } else {
                device.partial.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Filter that records its inputs and reports a fixed orientation
#[derive(Debug, Default)]
pub struct StubFilter {
    pub orientation: Orientation,
    pub inputs: Vec<FusionInput>,
}

impl OrientationFilter for StubFilter {
    fn update(&mut self, input: FusionInput) {
        self.inputs.push(input);
    }

    fn roll_deg(&self) -> f32 {
        self.orientation.roll_deg
    }

    fn yaw_deg(&self) -> f32 {
        self.orientation.yaw_deg
    }
}
