// Line-oriented ASCII link to the ODrive motor controller
//
// Protocol:
//   read:  "r <path>\n"          -> exactly one reply line
//   write: "w <path> <value>\n"  -> no reply
// There is no checksum or resynchronisation; a lost byte shifts every later
// reply by one line for the rest of the session.

use std::io::{self, Read, Write};
use tracing::{debug, warn};

use crate::config::{ODRIVE_BAUDRATE, REPLY_TIMEOUT};

/// Replies longer than this are treated as line noise
const MAX_REPLY_LEN: usize = 64;

/// Error types for the serial link
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Timeout waiting for reply")]
    Timeout,

    #[error("Malformed reply: {reply:?}")]
    Malformed { reply: String },
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// Byte stream the link runs over
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// Synchronous request/response client over a single-owner byte stream
pub struct DeviceLink<T: Transport = Box<dyn Transport>> {
    port: T,
}

impl DeviceLink {
    /// Open the serial port at the default baudrate
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, ODRIVE_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(REPLY_TIMEOUT)
            .open()?;

        Ok(Self::new(Box::new(port)))
    }

    /// Link to nothing: for running without a motor controller attached
    pub fn offline() -> Self {
        Self::new(Box::new(OfflinePort::default()))
    }
}

impl<T: Transport> DeviceLink<T> {
    pub fn new(port: T) -> Self {
        Self { port }
    }

    /// Write one command line. The terminator is added here.
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        debug!("-> {}", command);
        self.port.write_all(command.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        Ok(())
    }

    /// Block until a full reply line arrives
    ///
    /// An overlong line is still read up to its terminator so the next reply
    /// starts on a line boundary.
    pub fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        let mut overflow = false;
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(0) => return Err(LinkError::Timeout),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Err(LinkError::Timeout),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(LinkError::Io(e)),
            }

            match byte[0] {
                b'\n' => break,
                b'\r' => {}
                _ if line.len() >= MAX_REPLY_LEN => overflow = true,
                b => line.push(b),
            }
        }

        if overflow {
            return Err(LinkError::Malformed {
                reply: String::from_utf8_lossy(&line).into_owned(),
            });
        }

        let reply = String::from_utf8_lossy(&line).trim().to_string();
        debug!("<- {}", reply);
        Ok(reply)
    }

    /// Read a reply and parse it as a float
    pub fn try_read_float(&mut self) -> Result<f32> {
        let reply = self.read_line()?;
        reply
            .parse::<f32>()
            .map_err(|_| LinkError::Malformed { reply })
    }

    /// Read a reply and parse it as a 64-bit integer
    pub fn try_read_long(&mut self) -> Result<i64> {
        let reply = self.read_line()?;
        reply
            .parse::<i64>()
            .map_err(|_| LinkError::Malformed { reply })
    }

    /// Read a float reply; 0.0 when the reply is missing or unparseable
    pub fn read_float(&mut self) -> f32 {
        self.try_read_float().unwrap_or_else(|e| {
            warn!("Unreadable float reply: {}", e);
            0.0
        })
    }

    /// Read an integer reply; 0 when the reply is missing or unparseable
    pub fn read_long(&mut self) -> i64 {
        self.try_read_long().unwrap_or_else(|e| {
            warn!("Unreadable integer reply: {}", e);
            0
        })
    }
}

/// Transport for running without a device
///
/// Discards writes and answers every read request with `0` so framing stays
/// intact.
#[derive(Debug, Default)]
pub struct OfflinePort {
    pending_line: Vec<u8>,
    replies: Vec<u8>,
}

impl Read for OfflinePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.replies.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "offline"));
        }
        let n = buf.len().min(self.replies.len());
        buf[..n].copy_from_slice(&self.replies[..n]);
        self.replies.drain(..n);
        Ok(n)
    }
}

impl Write for OfflinePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &b in buf {
            if b == b'\n' {
                if self.pending_line.starts_with(b"r ") {
                    self.replies.extend_from_slice(b"0\n");
                }
                self.pending_line.clear();
            } else {
                self.pending_line.push(b);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serial port names visible on this host, for diagnostics
pub fn available_ports() -> Result<Vec<String>> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}
