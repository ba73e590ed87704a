//! Line-framed serial transport.
//!
//! The motion controller speaks newline-terminated ASCII. This module splits one
//! duplex serial stream into a single-owner [`LineReader`] (used by the main loop)
//! and a cloneable [`LineWriter`] shared by every producer of outbound frames.
//!
//! # Frame integrity
//!
//! Every [`LineWriter`] clone shares one `tokio::sync::Mutex` around the write half.
//! The lock is held for exactly one `write_all` + `flush`, so two producers can never
//! interleave bytes inside a frame, and nobody holds it while a capture is running.
//!
//! # Example
//!
//! ```rust,ignore
//! use bean_bridge::transport::{open_serial, split};
//!
//! let port = open_serial("/dev/ttyUSB0", 115_200, read_timeout).await?;
//! let (mut reader, writer) = split(Box::new(port), read_timeout);
//! writer.write_line("HOME").await?;
//! if let Some(line) = reader.read_line().await? {
//!     println!("controller: {line}");
//! }
//! ```

use crate::error::{BridgeError, BridgeResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Trait alias for async serial port I/O.
///
/// Implemented by `tokio_serial::SerialStream` on hardware and by
/// `tokio::io::DuplexStream` in tests.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Open the controller's serial port: 8N1, no flow control.
pub async fn open_serial(
    port_path: &str,
    baud_rate: u32,
    read_timeout: Duration,
) -> BridgeResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let port = spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(read_timeout)
            .open_native_async()
    })
    .await
    .map_err(|e| BridgeError::Transport(format!("spawn_blocking for serial open failed: {e}")))?
    .map_err(|source| BridgeError::SerialOpen {
        port: port_path.to_string(),
        source,
    })?;

    tracing::info!(port = port_path, baud_rate, "Opened serial port");
    Ok(port)
}

/// Split a serial stream into its line reader and shared line writer.
pub fn split(port: DynSerial, read_timeout: Duration) -> (LineReader, LineWriter) {
    let (read_half, write_half) = tokio::io::split(port);
    let reader = LineReader {
        inner: BufReader::new(read_half),
        pending: Vec::with_capacity(64),
        discarding: false,
        timeout: read_timeout,
    };
    let writer = LineWriter {
        inner: Arc::new(Mutex::new(write_half)),
        closed: Arc::new(AtomicBool::new(false)),
    };
    (reader, writer)
}

/// Longest accepted inbound line, terminator excluded.
///
/// Controller frames are a few dozen bytes; anything longer is line noise.
pub const MAX_LINE_LEN: usize = 1024;

/// Reads newline-terminated lines with a bounded wait.
pub struct LineReader {
    inner: BufReader<ReadHalf<DynSerial>>,
    /// Bytes of a line still waiting for its terminator.
    pending: Vec<u8>,
    /// Set after an overlong line; bytes are dropped up to the next terminator.
    discarding: bool,
    timeout: Duration,
}

impl LineReader {
    /// Wait up to the read timeout for one line.
    ///
    /// Returns `Ok(None)` on timeout or a blank line. Bytes received before a timeout
    /// are kept and completed by the next call. A line longer than [`MAX_LINE_LEN`]
    /// is dropped whole. Invalid UTF-8 is replaced, never an error. End-of-stream is
    /// [`BridgeError::TransportClosed`].
    pub async fn read_line(&mut self) -> BridgeResult<Option<String>> {
        let room = (MAX_LINE_LEN + 1).saturating_sub(self.pending.len()) as u64;
        let read = tokio::time::timeout(
            self.timeout,
            (&mut self.inner)
                .take(room)
                .read_until(b'\n', &mut self.pending),
        )
        .await;

        match read {
            Err(_elapsed) => {
                self.check_overflow();
                Ok(None)
            }
            Ok(Ok(0)) => Err(BridgeError::TransportClosed),
            Ok(Ok(_)) => {
                if self.pending.last() != Some(&b'\n') && self.check_overflow() {
                    return Ok(None);
                }
                let raw = std::mem::take(&mut self.pending);
                if std::mem::take(&mut self.discarding) {
                    trace!(bytes = raw.len(), "Dropped tail of overlong line");
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                trace!(line = %line.escape_default(), "rx");
                if line.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(line))
                }
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                self.check_overflow();
                Ok(None)
            }
            Ok(Err(e)) => Err(BridgeError::Transport(e.to_string())),
        }
    }

    /// Drop the pending bytes if they exceed [`MAX_LINE_LEN`]. Returns whether it did.
    fn check_overflow(&mut self) -> bool {
        if self.pending.len() <= MAX_LINE_LEN {
            return false;
        }
        if !self.discarding {
            warn!(
                limit = MAX_LINE_LEN,
                "Inbound line too long, discarding up to next newline"
            );
        }
        self.pending.clear();
        self.discarding = true;
        true
    }
}

/// Shared, lock-guarded writer of outbound frames.
#[derive(Clone)]
pub struct LineWriter {
    inner: Arc<Mutex<WriteHalf<DynSerial>>>,
    closed: Arc<AtomicBool>,
}

impl LineWriter {
    /// Write one frame. The text is trimmed and exactly one `\n` is appended.
    pub async fn write_line(&self, text: &str) -> BridgeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::TransportClosed);
        }

        let mut frame = String::with_capacity(text.len() + 1);
        frame.push_str(text.trim());
        frame.push('\n');

        let mut port = self.inner.lock().await;
        port.write_all(frame.as_bytes())
            .await
            .map_err(|e| BridgeError::Transport(format!("write failed: {e}")))?;
        port.flush()
            .await
            .map_err(|e| BridgeError::Transport(format!("flush failed: {e}")))?;
        drop(port);

        trace!(frame = %text.trim(), "tx");
        Ok(())
    }

    /// Shut the write half down. Only the first call does anything.
    ///
    /// Errors are logged and swallowed.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut port = self.inner.lock().await;
        match port.shutdown().await {
            Ok(()) => debug!("Serial transport closed"),
            Err(e) => warn!(error = %e, "Closing serial transport failed (ignored)"),
        }
    }

    /// Whether [`LineWriter::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn reads_trimmed_lines() {
        let (mut host, device) = tokio::io::duplex(64);
        let (mut reader, _writer) = split(Box::new(device), TIMEOUT);

        host.write_all(b"CAP 1 2\r\n").await.unwrap();

        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("CAP 1 2"));
    }

    #[tokio::test]
    async fn timeout_is_not_an_error() {
        let (_host, device) = tokio::io::duplex(64);
        let (mut reader, _writer) = split(Box::new(device), TIMEOUT);

        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn blank_line_yields_nothing() {
        let (mut host, device) = tokio::io::duplex(64);
        let (mut reader, _writer) = split(Box::new(device), TIMEOUT);

        host.write_all(b"   \n").await.unwrap();

        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn partial_line_survives_timeout() {
        let (mut host, device) = tokio::io::duplex(64);
        let (mut reader, _writer) = split(Box::new(device), TIMEOUT);

        host.write_all(b"CAP 12").await.unwrap();
        assert_eq!(reader.read_line().await.unwrap(), None);

        host.write_all(b" 3\n").await.unwrap();
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("CAP 12 3"));
    }

    #[tokio::test]
    async fn overlong_line_is_dropped_and_buffer_stays_bounded() {
        let (mut host, device) = tokio::io::duplex(16 * 1024);
        let (mut reader, _writer) = split(Box::new(device), TIMEOUT);

        // noise with no terminator, several times the line limit
        let noise = vec![b'~'; 4 * MAX_LINE_LEN];
        for _ in 0..4 {
            host.write_all(&noise).await.unwrap();
            assert_eq!(reader.read_line().await.unwrap(), None);
            assert!(reader.pending.len() <= MAX_LINE_LEN + 1);
        }

        // the tail of the noise up to its newline is dropped, the next frame is intact
        host.write_all(b"~~~\nCAP 3 4\n").await.unwrap();
        let mut line = None;
        for _ in 0..32 {
            line = reader.read_line().await.unwrap();
            if line.is_some() {
                break;
            }
            assert!(reader.pending.len() <= MAX_LINE_LEN + 1);
        }
        assert_eq!(line.as_deref(), Some("CAP 3 4"));
    }

    #[tokio::test]
    async fn line_at_the_limit_is_accepted() {
        let (mut host, device) = tokio::io::duplex(4 * 1024);
        let (mut reader, _writer) = split(Box::new(device), TIMEOUT);

        let mut frame = vec![b'x'; MAX_LINE_LEN];
        frame.push(b'\n');
        host.write_all(&frame).await.unwrap();

        let line = reader.read_line().await.unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_LEN);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let (mut host, device) = tokio::io::duplex(64);
        let (mut reader, _writer) = split(Box::new(device), TIMEOUT);

        host.write_all(b"ARD \xff ok\n").await.unwrap();

        let line = reader.read_line().await.unwrap().unwrap();
        assert!(line.starts_with("ARD"));
        assert!(line.ends_with("ok"));
    }

    #[tokio::test]
    async fn eof_is_transport_closed() {
        let (host, device) = tokio::io::duplex(64);
        let (mut reader, _writer) = split(Box::new(device), TIMEOUT);
        drop(host);

        assert!(matches!(
            reader.read_line().await,
            Err(BridgeError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn write_appends_single_terminator() {
        let (mut host, device) = tokio::io::duplex(64);
        let (_reader, writer) = split(Box::new(device), TIMEOUT);

        writer.write_line("RES 4 1\n").await.unwrap();

        let mut buf = [0u8; 8];
        host.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"RES 4 1\n");
    }

    #[tokio::test]
    async fn close_runs_once_and_blocks_writes() {
        let (_host, device) = tokio::io::duplex(64);
        let (_reader, writer) = split(Box::new(device), TIMEOUT);
        let clone = writer.clone();

        writer.close().await;
        clone.close().await;

        assert!(clone.is_closed());
        assert!(matches!(
            clone.write_line("HOME").await,
            Err(BridgeError::TransportClosed)
        ));
    }
}
