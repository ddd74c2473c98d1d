//! Frame Reader
//!
//! Turns the chunked byte stream of a transport into `\r\n`-delimited text.
//! A single read may return part of a line, one line, or several lines, so
//! bytes are accumulated until at least one delimiter is present.
//!
//! Incomplete trailing data stays buffered for the next call; nothing
//! received from the socket is ever discarded. A peer that never sends a
//! delimiter fails the read once the buffer passes a fixed multiple of the
//! read size.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::application::ports::{Transport, TransportError};
use crate::domain::session::RunningFlag;

/// Terminator of every frame on the wire.
pub const FRAME_DELIMITER: &str = "\r\n";

const DELIMITER_BYTES: &[u8] = FRAME_DELIMITER.as_bytes();

/// Undelimited bytes allowed, in multiples of the read size.
const MAX_PENDING_READS: usize = 16 * 1024;

/// Accumulates transport reads into complete frames.
pub struct FrameReader {
    transport: Arc<dyn Transport>,
    running: RunningFlag,
    cancel: CancellationToken,
    buffer_size: usize,
    max_pending: usize,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no delimiter.
    scanned: usize,
}

impl FrameReader {
    /// Create a reader for one run of the session.
    ///
    /// `cancel` is the token returned by [`RunningFlag::raise`] for this run.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        running: RunningFlag,
        cancel: CancellationToken,
        buffer_size: usize,
    ) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            transport,
            running,
            cancel,
            buffer_size,
            max_pending: buffer_size.saturating_mul(MAX_PENDING_READS),
            buffer: Vec::new(),
            scanned: 0,
        }
    }

    /// Override the number of undelimited bytes tolerated before a read fails.
    #[must_use]
    pub fn with_max_pending(mut self, limit: usize) -> Self {
        self.max_pending = limit.max(self.buffer_size);
        self
    }

    /// Read until at least one complete frame is buffered.
    ///
    /// Returns every complete frame received so far, delimiters included,
    /// as one string. Returns an empty string without touching the socket
    /// when the session is not running, and as soon as a stop is requested
    /// while a read is pending.
    ///
    /// # Errors
    ///
    /// Propagates read failures and timeouts from the transport. Fails with
    /// [`TransportError::FrameTooLarge`] when more bytes than the pending
    /// limit are buffered without a delimiter.
    pub async fn receive_all(&mut self) -> Result<String, TransportError> {
        if !self.running.is_running() {
            return Ok(String::new());
        }

        loop {
            if let Some(complete) = self.take_complete() {
                return Ok(decode_text(complete));
            }
            if self.buffer.len() > self.max_pending {
                return Err(TransportError::FrameTooLarge {
                    pending: self.buffer.len(),
                    limit: self.max_pending,
                });
            }

            let chunk = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(String::new()),
                chunk = self.transport.receive_chunk(self.buffer_size) => chunk?,
            };

            self.buffer.extend_from_slice(&chunk);
        }
    }

    /// Number of buffered bytes not yet part of a complete frame.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn take_complete(&mut self) -> Option<Vec<u8>> {
        // A delimiter may straddle the previous scan boundary.
        let start = self.scanned.saturating_sub(DELIMITER_BYTES.len() - 1);
        let end = self.buffer[start..]
            .windows(DELIMITER_BYTES.len())
            .rposition(|window| window == DELIMITER_BYTES)
            .map(|pos| start + pos + DELIMITER_BYTES.len());

        match end {
            Some(end) => {
                let rest = self.buffer.split_off(end);
                self.scanned = rest.len();
                Some(std::mem::replace(&mut self.buffer, rest))
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }
}

fn decode_text(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|err| {
        tracing::warn!(error = %err.utf8_error(), "Frame contains invalid UTF-8");
        String::from_utf8_lossy(err.as_bytes()).into_owned()
    })
}

/// Split a receive result into its non-empty frames, in arrival order.
pub fn split_frames(text: &str) -> impl Iterator<Item = &str> {
    text.split(FRAME_DELIMITER)
        .filter(|segment| !segment.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::super::test_support::ScriptedTransport;
    use super::*;

    fn running_reader(transport: &Arc<ScriptedTransport>, buffer_size: usize) -> FrameReader {
        let running = RunningFlag::new();
        let cancel = running.raise();
        FrameReader::new(transport.clone(), running, cancel, buffer_size)
    }

    #[tokio::test]
    async fn returns_single_frame_and_reads_buffer_size() {
        let transport = Arc::new(ScriptedTransport::new([b"{\"op\":\"status\"}\r\n".to_vec()]));
        let mut reader = running_reader(&transport, 1024);

        let data = reader.receive_all().await.unwrap();

        assert_eq!(data, "{\"op\":\"status\"}\r\n");
        assert_eq!(transport.read_sizes(), vec![1024]);
    }

    #[tokio::test]
    async fn not_running_returns_empty_without_reading() {
        let transport = Arc::new(ScriptedTransport::new([b"{}\r\n".to_vec()]));
        let mut reader = FrameReader::new(
            transport.clone(),
            RunningFlag::new(),
            CancellationToken::new(),
            1024,
        );

        let data = reader.receive_all().await.unwrap();

        assert!(data.is_empty());
        assert!(transport.read_sizes().is_empty());
    }

    #[tokio::test]
    async fn accumulates_until_delimiter() {
        let transport = Arc::new(ScriptedTransport::new([
            b"{\"op\":".to_vec(),
            b"\"heartbeat\"}\r".to_vec(),
            b"\n".to_vec(),
        ]));
        let mut reader = running_reader(&transport, 16);

        let data = reader.receive_all().await.unwrap();

        assert_eq!(data, "{\"op\":\"heartbeat\"}\r\n");
        assert_eq!(transport.read_sizes().len(), 3);
    }

    #[tokio::test]
    async fn keeps_trailing_partial_frame_for_next_call() {
        let transport = Arc::new(ScriptedTransport::new([
            b"{\"a\":1}\r\n{\"b\":2}\r\n{\"c\"".to_vec(),
            b":3}\r\n".to_vec(),
        ]));
        let mut reader = running_reader(&transport, 64);

        let first = reader.receive_all().await.unwrap();
        assert_eq!(first, "{\"a\":1}\r\n{\"b\":2}\r\n");
        assert_eq!(reader.pending_len(), "{\"c\"".len());

        let second = reader.receive_all().await.unwrap();
        assert_eq!(second, "{\"c\":3}\r\n");
        assert_eq!(reader.pending_len(), 0);
    }

    #[tokio::test]
    async fn multibyte_character_split_across_reads() {
        let text = "{\"runner\":\"Sé\"}\r\n".as_bytes();
        let split_at = text.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let transport = Arc::new(ScriptedTransport::new([
            text[..split_at].to_vec(),
            text[split_at..].to_vec(),
        ]));
        let mut reader = running_reader(&transport, 64);

        assert_eq!(reader.receive_all().await.unwrap(), "{\"runner\":\"Sé\"}\r\n");
    }

    #[tokio::test]
    async fn stop_wakes_pending_read() {
        let transport = Arc::new(ScriptedTransport::new(Vec::<Vec<u8>>::new()));
        let running = RunningFlag::new();
        let cancel = running.raise();
        let mut reader = FrameReader::new(transport.clone(), running.clone(), cancel, 1024);

        let handle = tokio::spawn(async move { reader.receive_all().await });
        tokio::task::yield_now().await;
        running.lower();

        let data = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("reader should wake on stop")
            .unwrap()
            .unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn transport_error_propagates() {
        let transport = Arc::new(ScriptedTransport::failing_after(
            Vec::<Vec<u8>>::new(),
            || TransportError::ConnectionClosed,
        ));
        let mut reader = running_reader(&transport, 1024);

        let err = reader.receive_all().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }

    #[tokio::test]
    async fn endless_line_fails_past_pending_limit() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![b'x'; 16]; 8]));
        let mut reader = running_reader(&transport, 16).with_max_pending(40);

        let err = reader.receive_all().await.unwrap_err();

        assert!(matches!(
            err,
            TransportError::FrameTooLarge { pending: 48, limit: 40 }
        ));
        assert_eq!(transport.read_sizes().len(), 3);
    }

    #[tokio::test]
    async fn frame_completing_at_limit_is_accepted() {
        let mut line = vec![b'x'; 38];
        line.extend_from_slice(DELIMITER_BYTES);
        let chunks: Vec<Vec<u8>> = line.chunks(16).map(<[u8]>::to_vec).collect();
        let transport = Arc::new(ScriptedTransport::new(chunks));
        let mut reader = running_reader(&transport, 16).with_max_pending(40);

        let data = reader.receive_all().await.unwrap();

        assert_eq!(data.len(), 40);
        assert_eq!(reader.pending_len(), 0);
    }

    #[test]
    fn default_pending_limit_scales_with_read_size() {
        let transport = Arc::new(ScriptedTransport::new(Vec::<Vec<u8>>::new()));
        let reader = running_reader(&transport, 1024);
        assert_eq!(reader.max_pending, 1024 * MAX_PENDING_READS);
    }

    #[test]
    fn split_frames_skips_empty_segments() {
        let frames: Vec<&str> = split_frames("{}\r\n\r\n{\"op\":\"x\"}\r\n").collect();
        assert_eq!(frames, vec!["{}", "{\"op\":\"x\"}"]);
        assert_eq!(split_frames("").count(), 0);
    }

    proptest! {
        #[test]
        fn arbitrary_chunking_preserves_frames(
            frames in prop::collection::vec("[a-z0-9é:{}\"]{1,20}", 1..8),
            chunk_size in 1usize..12,
        ) {
            let wire: Vec<u8> = frames
                .iter()
                .flat_map(|f| format!("{f}{FRAME_DELIMITER}").into_bytes())
                .collect();
            let chunks: Vec<Vec<u8>> = wire.chunks(chunk_size).map(<[u8]>::to_vec).collect();

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let received = runtime.block_on(async {
                let transport = Arc::new(ScriptedTransport::new(chunks));
                let mut reader = running_reader(&transport, chunk_size);
                let mut out = Vec::new();
                while out.len() < frames.len() {
                    let batch = reader.receive_all().await.unwrap();
                    out.extend(split_frames(&batch).map(str::to_string));
                }
                out
            });

            prop_assert_eq!(received, frames);
        }
    }
}
