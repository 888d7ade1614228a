//! # Stream Reader
//!
//! Polls a [`ByteSource`], runs the bytes through a [`FragmentBuffer`] and
//! hands every completed [`Fragment`] to a sink.
//!
//! The reader owns its source. [`StreamReader::run`] consumes the reader, so
//! the transport handle is closed by the time `run` returns, whether it
//! stopped on request or because the connection was lost.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::buffer::{DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_FRAGMENT_LEN, FragmentBuffer};
use crate::error::LabelfeedError;
use crate::record::Fragment;

/// Default pause between polls when the source had nothing to offer.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

const READ_CHUNK: usize = 256;

/// A non-blocking (or short-timeout) source of raw bytes.
pub trait ByteSource: Send {
    /// Read whatever is available. `Ok(0)`, `WouldBlock` and `TimedOut` all
    /// mean "nothing right now".
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Human-readable name for logs (port name, file path)
    fn describe(&self) -> String {
        "byte source".to_string()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_available(buf)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Timing and size knobs for the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSettings {
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
    pub max_fragment_len: usize,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_fragment_len: DEFAULT_MAX_FRAGMENT_LEN,
        }
    }
}

pub struct StreamReader<S: ByteSource> {
    source: S,
    buffer: FragmentBuffer,
    poll_interval: Duration,
}

impl<S: ByteSource> StreamReader<S> {
    pub fn new(source: S, settings: ReaderSettings) -> Self {
        Self {
            source,
            buffer: FragmentBuffer::new(settings.idle_timeout, settings.max_fragment_len),
            poll_interval: settings.poll_interval,
        }
    }

    /// Read until `stop` is set or the source fails.
    ///
    /// The remaining buffer is flushed to the sink before returning in both
    /// cases.
    ///
    /// ## Errors
    ///
    /// `ConnectionLost` for any read error other than a timeout. The reader
    /// does not retry.
    pub fn run(
        self,
        stop: &AtomicBool,
        mut sink: impl FnMut(Fragment),
    ) -> Result<(), LabelfeedError> {
        let Self {
            mut source,
            mut buffer,
            poll_interval,
        } = self;
        let name = source.describe();
        let mut chunk = [0u8; READ_CHUNK];

        tracing::debug!(source = %name, "reader started");
        let result = loop {
            if stop.load(Ordering::Acquire) {
                break Ok(());
            }

            let received = match source.read_available(&mut chunk) {
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    0
                }
                Err(e) => {
                    tracing::error!(source = %name, error = %e, "connection lost");
                    break Err(LabelfeedError::ConnectionLost(format!("{}: {}", name, e)));
                }
            };

            let now = Instant::now();
            for text in buffer.push(&chunk[..received], now) {
                sink(Fragment::new(text));
            }
            if let Some(text) = buffer.poll_idle(now) {
                sink(Fragment::new(text));
            }

            if received == 0 {
                thread::sleep(poll_interval);
            }
        };

        if let Some(text) = buffer.flush() {
            sink(Fragment::new(text));
        }
        drop(source);
        tracing::debug!(source = %name, "reader stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    /// Replays scripted reads, then reports "nothing available" forever.
    struct Scripted {
        reads: VecDeque<io::Result<Vec<u8>>>,
        dropped: Arc<AtomicBool>,
    }

    impl Scripted {
        fn new(reads: Vec<io::Result<Vec<u8>>>) -> (Self, Arc<AtomicBool>) {
            let dropped = Arc::new(AtomicBool::new(false));
            (
                Self {
                    reads: reads.into(),
                    dropped: Arc::clone(&dropped),
                },
                dropped,
            )
        }
    }

    impl ByteSource for Scripted {
        fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Drop for Scripted {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Release);
        }
    }

    fn fast() -> ReaderSettings {
        ReaderSettings {
            idle_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(1),
            max_fragment_len: 1024,
        }
    }

    #[test]
    fn test_connection_lost_flushes_and_releases_source() {
        let (source, dropped) = Scripted::new(vec![
            Ok(b"first\npartial".to_vec()),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
        ]);
        let stop = AtomicBool::new(false);
        let mut seen = Vec::new();

        let err = StreamReader::new(source, fast())
            .run(&stop, |f| seen.push(f.text))
            .unwrap_err();

        assert!(matches!(err, LabelfeedError::ConnectionLost(_)));
        assert_eq!(seen, vec!["first", "partial"]);
        assert!(dropped.load(Ordering::Acquire));
    }

    #[test]
    fn test_timeouts_are_not_errors() {
        let (source, _) = Scripted::new(vec![
            Err(io::ErrorKind::TimedOut.into()),
            Ok(b"abc".to_vec()),
            Err(io::ErrorKind::WouldBlock.into()),
            Ok(b"\n".to_vec()),
            Err(io::Error::other("gone")),
        ]);
        let stop = AtomicBool::new(false);
        let mut seen = Vec::new();
        let result = StreamReader::new(source, fast()).run(&stop, |f| seen.push(f.text));
        assert!(result.is_err());
        assert_eq!(seen, vec!["abc"]);
    }

    #[test]
    fn test_stop_flushes_and_releases_source() {
        let (source, dropped) = Scripted::new(vec![Ok(b"no line end yet".to_vec())]);
        let stop = Arc::new(AtomicBool::new(false));
        let settings = ReaderSettings {
            idle_timeout: Duration::from_secs(60),
            ..fast()
        };

        let worker = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut seen = Vec::new();
                let result = StreamReader::new(source, settings).run(&stop, |f| seen.push(f.text));
                (result, seen)
            })
        };

        thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::Release);
        let (result, seen) = worker.join().unwrap();

        assert!(result.is_ok());
        assert_eq!(seen, vec!["no line end yet"]);
        assert!(dropped.load(Ordering::Acquire));
    }

    #[test]
    fn test_idle_flush_while_running() {
        let (source, _) = Scripted::new(vec![Ok(b"##ATS1|2|3".to_vec())]);
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = std::sync::mpsc::channel();

        let worker = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                StreamReader::new(source, fast()).run(&stop, |f| {
                    let _ = tx.send(f.text);
                })
            })
        };

        let text = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(text, "##ATS1|2|3");
        stop.store(true, Ordering::Release);
        worker.join().unwrap().unwrap();
    }
}
