//! Stream Session
//!
//! One logical connection to the stream server. `start()` opens a fresh
//! transport, hands the server greeting to the listener and spawns the read
//! loop; control operations write to the same transport from the caller's
//! task while the loop reads.
//!
//! The session never reconnects on its own. A supervisor awaits the join
//! handle returned by `start()` and decides what to do with its result.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::application::ports::{
    ConnectError, Connector, Endpoint, StreamListener, Transport, TransportError,
};
use crate::domain::session::{RunningFlag, SessionState, SharedState};
use crate::infrastructure::config::{Credentials, SessionSettings};
use crate::infrastructure::metrics;

use super::codec::{CodecError, JsonCodec};
use super::dispatch::Dispatcher;
use super::framing::{FrameReader, split_frames};
use super::messages::{
    MarketDataFilter, MarketFilter, OrderFilter, RequestMessage, SubscriptionOptions,
};

/// Errors raised by session operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Opening the transport failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Reading from or writing to the transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or the greeting could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// `start()` was called while a run is in progress.
    #[error("session is already {}", .0.as_str())]
    AlreadyRunning(SessionState),

    /// A control message was sent with no open transport.
    #[error("session is not connected")]
    NotConnected,

    /// `stop()` was called before the connection greeting arrived.
    #[error("session stopped before the connection greeting arrived")]
    StoppedDuringConnect,
}

type TransportSlot = Arc<Mutex<Option<Arc<dyn Transport>>>>;

/// A persistent connection to the Betfair Exchange Stream API.
pub struct StreamSession {
    unique_id: u32,
    app_key: String,
    session_token: RwLock<String>,
    endpoint: Endpoint,
    timeout: Duration,
    buffer_size: usize,
    description: String,
    connector: Arc<dyn Connector>,
    listener: Arc<dyn StreamListener>,
    running: RunningFlag,
    state: SharedState,
    transport: TransportSlot,
    codec: JsonCodec,
}

impl StreamSession {
    /// Create a session. No socket is opened until [`start`](Self::start).
    #[must_use]
    pub fn new(
        credentials: &Credentials,
        settings: &SessionSettings,
        connector: Arc<dyn Connector>,
        listener: Arc<dyn StreamListener>,
    ) -> Self {
        Self {
            unique_id: settings.unique_id,
            app_key: credentials.app_key().to_string(),
            session_token: RwLock::new(credentials.session_token().to_string()),
            endpoint: settings.endpoint(),
            timeout: settings.timeout,
            buffer_size: settings.buffer_size,
            description: settings.description.clone(),
            connector,
            listener,
            running: RunningFlag::new(),
            state: SharedState::default(),
            transport: Arc::new(Mutex::new(None)),
            codec: JsonCodec::new(),
        }
    }

    /// Correlation id used when a control call passes no override.
    #[must_use]
    pub const fn unique_id(&self) -> u32 {
        self.unique_id
    }

    /// Diagnostic label of the session.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Whether the read loop is meant to keep going.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// Whether a transport is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.lock().is_some()
    }

    /// Replace the session token used by later `authenticate` calls.
    pub fn set_session_token(&self, token: impl Into<String>) {
        *self.session_token.write() = token.into();
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect, deliver the greeting and launch the read loop.
    ///
    /// Returns the handle of the read loop task. It resolves once the loop
    /// has closed the transport, with the transport error that ended it if
    /// there was one.
    ///
    /// # Errors
    ///
    /// Returns an error if a run is already in progress, the connection
    /// cannot be opened, the greeting cannot be read or decoded, or
    /// [`stop`](Self::stop) is called before the greeting arrives.
    pub async fn start(&self) -> Result<JoinHandle<Result<(), StreamError>>, StreamError> {
        self.state
            .begin_connecting()
            .map_err(StreamError::AlreadyRunning)?;
        let cancel = self.running.raise();
        let guard = StartGuard::new(&self.running, &self.state);

        tracing::info!(
            description = %self.description,
            unique_id = self.unique_id,
            endpoint = %self.endpoint,
            "Connecting to stream"
        );

        let transport = self.connector.connect(&self.endpoint, self.timeout).await?;

        let mut reader = FrameReader::new(
            Arc::clone(&transport),
            self.running.clone(),
            cancel,
            self.buffer_size,
        );

        let greeting = match self.read_greeting(&mut reader).await {
            Ok(greeting) => greeting,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.listener),
            self.running.clone(),
            self.state.clone(),
            self.unique_id,
        );

        let mut frames = greeting.into_iter();
        if let Some(first) = frames.next() {
            match self.codec.decode(&first) {
                Ok(message) => dispatcher.on_initial(message),
                Err(e) => {
                    transport.close().await;
                    return Err(e.into());
                }
            }
        }

        *self.transport.lock() = Some(Arc::clone(&transport));
        self.state
            .transition(SessionState::Connecting, SessionState::Running);
        metrics::set_connected(true);

        tracing::info!(
            description = %self.description,
            unique_id = self.unique_id,
            "Stream session running"
        );

        let read_loop = ReadLoop {
            reader,
            transport,
            slot: Arc::clone(&self.transport),
            dispatcher,
            codec: self.codec.clone(),
            running: self.running.clone(),
            state: self.state.clone(),
            backlog: frames.collect(),
        };

        let span = tracing::info_span!(
            "read_loop",
            description = %self.description,
            unique_id = self.unique_id
        );
        let handle = tokio::spawn(read_loop.run().instrument(span));
        guard.disarm();
        Ok(handle)
    }

    /// Request the read loop to stop. Safe to call at any time, any number
    /// of times. The transport is closed by the loop, not here.
    pub fn stop(&self) {
        if self.running.lower() {
            tracing::info!(
                description = %self.description,
                unique_id = self.unique_id,
                "Stopping stream session"
            );
        }
        self.state
            .transition(SessionState::Running, SessionState::Stopping);
    }

    /// Read until a batch holds at least one non-blank frame.
    async fn read_greeting(&self, reader: &mut FrameReader) -> Result<Vec<String>, StreamError> {
        loop {
            let text = reader.receive_all().await?;
            if text.is_empty() {
                return Err(StreamError::StoppedDuringConnect);
            }
            let frames: Vec<String> = split_frames(&text).map(str::to_string).collect();
            if !frames.is_empty() {
                return Ok(frames);
            }
            tracing::debug!(
                description = %self.description,
                "Blank lines before the connection greeting"
            );
        }
    }

    // =========================================================================
    // Control Protocol
    // =========================================================================

    /// Authenticate the connection with the app key and current session token.
    ///
    /// # Errors
    ///
    /// Returns an error if no transport is open or the write fails.
    pub async fn authenticate(&self, id: Option<u32>) -> Result<(), StreamError> {
        let request = RequestMessage::Authentication {
            id: id.unwrap_or(self.unique_id),
            app_key: self.app_key.clone(),
            session: self.session_token.read().clone(),
        };
        self.send(&request).await
    }

    /// Send a keep-alive.
    ///
    /// # Errors
    ///
    /// Returns an error if no transport is open or the write fails.
    pub async fn heartbeat(&self, id: Option<u32>) -> Result<(), StreamError> {
        self.send(&RequestMessage::Heartbeat {
            id: id.unwrap_or(self.unique_id),
        })
        .await
    }

    /// Subscribe to market changes.
    ///
    /// # Errors
    ///
    /// Returns an error if no transport is open or the write fails.
    pub async fn subscribe_to_markets(
        &self,
        market_filter: MarketFilter,
        market_data_filter: MarketDataFilter,
        id: Option<u32>,
    ) -> Result<(), StreamError> {
        self.subscribe_to_markets_with(
            market_filter,
            market_data_filter,
            SubscriptionOptions::default(),
            id,
        )
        .await
    }

    /// Subscribe to market changes with resubscription options.
    ///
    /// # Errors
    ///
    /// Returns an error if no transport is open or the write fails.
    pub async fn subscribe_to_markets_with(
        &self,
        market_filter: MarketFilter,
        market_data_filter: MarketDataFilter,
        options: SubscriptionOptions,
        id: Option<u32>,
    ) -> Result<(), StreamError> {
        self.send(&RequestMessage::MarketSubscription {
            id: id.unwrap_or(self.unique_id),
            market_filter,
            market_data_filter,
            options,
        })
        .await
    }

    /// Subscribe to order changes of the account.
    ///
    /// # Errors
    ///
    /// Returns an error if no transport is open or the write fails.
    pub async fn subscribe_to_orders(&self, id: Option<u32>) -> Result<(), StreamError> {
        self.subscribe_to_orders_with(None, SubscriptionOptions::default(), id)
            .await
    }

    /// Subscribe to order changes with a filter and resubscription options.
    ///
    /// # Errors
    ///
    /// Returns an error if no transport is open or the write fails.
    pub async fn subscribe_to_orders_with(
        &self,
        order_filter: Option<OrderFilter>,
        options: SubscriptionOptions,
        id: Option<u32>,
    ) -> Result<(), StreamError> {
        self.send(&RequestMessage::OrderSubscription {
            id: id.unwrap_or(self.unique_id),
            order_filter,
            options,
        })
        .await
    }

    async fn send(&self, request: &RequestMessage) -> Result<(), StreamError> {
        let transport = self
            .transport
            .lock()
            .clone()
            .ok_or(StreamError::NotConnected)?;
        let frame = self.codec.encode(request)?;

        transport.send(&frame).await?;

        metrics::record_control_message(request.op());
        tracing::debug!(
            description = %self.description,
            op = request.op(),
            id = request.id(),
            "Sent control message"
        );
        Ok(())
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("unique_id", &self.unique_id)
            .field("description", &self.description)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

/// Rolls an unfinished `start()` back to `Closed`, including when its future
/// is dropped mid-connect.
struct StartGuard<'a> {
    running: &'a RunningFlag,
    state: &'a SharedState,
    armed: bool,
}

impl<'a> StartGuard<'a> {
    const fn new(running: &'a RunningFlag, state: &'a SharedState) -> Self {
        Self {
            running,
            state,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.running.lower();
            self.state.set(SessionState::Closed);
        }
    }
}

// =============================================================================
// Read Loop
// =============================================================================

struct ReadLoop {
    reader: FrameReader,
    transport: Arc<dyn Transport>,
    slot: TransportSlot,
    dispatcher: Dispatcher,
    codec: JsonCodec,
    running: RunningFlag,
    state: SharedState,
    backlog: Vec<String>,
}

impl ReadLoop {
    async fn run(mut self) -> Result<(), StreamError> {
        for frame in std::mem::take(&mut self.backlog) {
            if !self.running.is_running() {
                break;
            }
            self.dispatch(&frame);
        }

        let result = self.pump().await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Read loop ended with error");
        }

        self.shutdown().await;
        result
    }

    async fn pump(&mut self) -> Result<(), StreamError> {
        while self.running.is_running() {
            let batch = self.reader.receive_all().await?;
            for frame in split_frames(&batch) {
                if !self.running.is_running() {
                    break;
                }
                self.dispatch(frame);
            }
        }
        Ok(())
    }

    fn dispatch(&self, frame: &str) {
        match self.codec.decode(frame) {
            Ok(message) => self.dispatcher.on_frame(message),
            Err(e) => {
                metrics::record_decode_error();
                tracing::warn!(error = %e, "Skipping undecodable frame");
            }
        }
    }

    async fn shutdown(self) {
        self.transport.close().await;
        self.slot.lock().take();
        self.running.lower();
        metrics::set_connected(false);
        self.state.set(SessionState::Closed);
        tracing::info!("Stream session closed");
    }
}
