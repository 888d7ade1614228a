//! # Raw Device Print Backend
//!
//! Writes label payloads straight to a printer device node: a USB printer
//! class device (`/dev/usb/lp0`), a serial adapter (`/dev/ttyUSB1`) or an
//! RFCOMM binding (`/dev/rfcomm0`).
//!
//! ## Per-Job Open
//!
//! The device is opened for every job and closed afterwards. A printer that
//! was power-cycled or replugged between labels is picked up again without
//! restarting, and a missing printer fails that one job instead of the run.
//!
//! ## TTY Configuration
//!
//! When the node is a terminal it is switched to raw mode before writing so
//! bytes pass through unmodified:
//!
//! - **No input processing**: IGNBRK, BRKINT, PARMRK, ISTRIP, INLCR, IGNCR, ICRNL
//! - **No flow control**: IXON, IXOFF, IXANY
//! - **No output processing**: OPOST (no CR/LF translation)
//! - **Non-canonical, no echo**: ECHO, ECHONL, ICANON, ISIG, IEXTEN
//! - **8-bit characters**: CS8, no parity
//!
//! ## Chunked Writes
//!
//! Payloads above 4096 bytes are written in chunks with a short pause so
//! slow printer buffers are not overrun. Label payloads rarely get that big.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::dispatch::PrintBackend;
use crate::error::LabelfeedError;

/// Default chunk size for writes (bytes)
const CHUNK_SIZE: usize = 4096;

/// Delay between chunks (milliseconds)
const CHUNK_DELAY_MS: u64 = 2;

/// A printer reachable as a device file.
#[derive(Debug, Clone)]
pub struct DeviceBackend {
    id: String,
    path: PathBuf,
    chunk_size: usize,
    chunk_delay: Duration,
}

impl DeviceBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: path.display().to_string(),
            path,
            chunk_size: CHUNK_SIZE,
            chunk_delay: Duration::from_millis(CHUNK_DELAY_MS),
        }
    }

    /// Set the chunk size for large writes. Default is 4096 bytes.
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = size.max(1);
    }

    pub fn set_chunk_delay(&mut self, delay: Duration) {
        self.chunk_delay = delay;
    }

    fn open(&self) -> Result<File, LabelfeedError> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                LabelfeedError::Transport(format!("Failed to open {}: {}", self.path.display(), e))
            })?;

        if is_tty(&file) {
            configure_tty_raw(file.as_raw_fd())?;
        }
        Ok(file)
    }

    fn write_chunked(&self, file: &mut File, data: &[u8]) -> Result<(), LabelfeedError> {
        let write_failed =
            |e: io::Error| LabelfeedError::Transport(format!("Write failed: {}", e));

        if data.len() <= self.chunk_size {
            file.write_all(data).map_err(write_failed)?;
        } else {
            for chunk in data.chunks(self.chunk_size) {
                file.write_all(chunk).map_err(write_failed)?;
                if !self.chunk_delay.is_zero() {
                    thread::sleep(self.chunk_delay);
                }
            }
        }

        file.flush()
            .map_err(|e| LabelfeedError::Transport(format!("Flush failed: {}", e)))
    }
}

impl PrintBackend for DeviceBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn submit(&self, payload: &[u8]) -> Result<(), LabelfeedError> {
        let mut file = self.open()?;
        self.write_chunked(&mut file, payload)?;
        tracing::debug!(device = %self.id, bytes = payload.len(), "payload written");
        Ok(())
    }
}

#[cfg(unix)]
fn is_tty(file: &File) -> bool {
    unsafe { libc::isatty(file.as_raw_fd()) == 1 }
}

#[cfg(not(unix))]
fn is_tty(_file: &File) -> bool {
    false
}

/// Configure a file descriptor for raw TTY mode.
///
/// IXON/IXOFF/IXANY matter here: 0x11 and 0x13 would otherwise be eaten as
/// XON/XOFF.
#[cfg(unix)]
fn configure_tty_raw(fd: i32) -> Result<(), LabelfeedError> {
    use std::mem::MaybeUninit;

    let mut termios = MaybeUninit::uninit();
    let result = unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) };
    if result != 0 {
        return Err(LabelfeedError::Transport(format!(
            "tcgetattr failed: {}",
            io::Error::last_os_error()
        )));
    }
    let mut termios = unsafe { termios.assume_init() };

    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY);
    termios.c_oflag &= !libc::OPOST;
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8;

    let result = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) };
    if result != 0 {
        return Err(LabelfeedError::Transport(format!(
            "tcsetattr failed: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

#[cfg(not(unix))]
fn configure_tty_raw(_fd: i32) -> Result<(), LabelfeedError> {
    Ok(())
}
