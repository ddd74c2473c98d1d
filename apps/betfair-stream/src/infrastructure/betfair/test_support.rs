//! In-memory transport and connector for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{ConnectError, Connector, Endpoint, Transport, TransportError};

type ErrorFactory = Box<dyn Fn() -> TransportError + Send + Sync>;

/// Replays scripted reads, then either fails or blocks forever.
pub(crate) struct ScriptedTransport {
    reads: Mutex<VecDeque<Vec<u8>>>,
    on_exhausted: Option<ErrorFactory>,
    read_sizes: Mutex<Vec<usize>>,
    sent: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new<I>(reads: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Self {
            reads: Mutex::new(reads.into_iter().collect()),
            on_exhausted: None,
            read_sizes: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing_after<I, F>(reads: I, error: F) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
        F: Fn() -> TransportError + Send + Sync + 'static,
    {
        Self {
            on_exhausted: Some(Box::new(error)),
            ..Self::new(reads)
        }
    }

    pub(crate) fn read_sizes(&self) -> Vec<usize> {
        self.read_sizes.lock().clone()
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if self.closes.load(Ordering::SeqCst) > 0 {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(frame.to_string());
        Ok(())
    }

    async fn receive_chunk(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        self.read_sizes.lock().push(max_len);
        let next = self.reads.lock().pop_front();
        match (next, &self.on_exhausted) {
            (Some(chunk), _) => Ok(chunk),
            (None, Some(error)) => Err(error()),
            (None, None) => std::future::pending().await,
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out prepared transports in order, repeating the last, or fails
/// when it has none.
pub(crate) struct StubConnector {
    transports: Mutex<VecDeque<Arc<ScriptedTransport>>>,
    connects: AtomicUsize,
}

impl StubConnector {
    pub(crate) fn new(transport: Arc<ScriptedTransport>) -> Self {
        Self::sequence([transport])
    }

    pub(crate) fn sequence<I>(transports: I) -> Self
    where
        I: IntoIterator<Item = Arc<ScriptedTransport>>,
    {
        Self {
            transports: Mutex::new(transports.into_iter().collect()),
            connects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn refusing() -> Self {
        Self::sequence(Vec::<Arc<ScriptedTransport>>::new())
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StubConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        _timeout: Duration,
    ) -> Result<Arc<dyn Transport>, ConnectError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut transports = self.transports.lock();
            if transports.len() > 1 {
                transports.pop_front()
            } else {
                transports.front().cloned()
            }
        };
        match next {
            Some(transport) => {
                let transport: Arc<dyn Transport> = transport;
                Ok(transport)
            }
            None => Err(ConnectError::Tcp {
                endpoint: endpoint.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            }),
        }
    }
}
