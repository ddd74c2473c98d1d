//! Message Dispatcher
//!
//! Hands decoded messages to the listener and turns a `false` return into
//! a stop request. Stopping here only clears the running flag; the read
//! loop closes the socket when it notices.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::application::ports::StreamListener;
use crate::domain::session::{RunningFlag, SessionState, SharedState};
use crate::infrastructure::metrics;

use super::messages::StreamMessage;

/// Routes messages from one session to its listener.
#[derive(Clone)]
pub struct Dispatcher {
    listener: Arc<dyn StreamListener>,
    running: RunningFlag,
    state: SharedState,
    unique_id: u32,
}

impl Dispatcher {
    /// Create a dispatcher for a session.
    #[must_use]
    pub fn new(
        listener: Arc<dyn StreamListener>,
        running: RunningFlag,
        state: SharedState,
        unique_id: u32,
    ) -> Self {
        Self {
            listener,
            running,
            state,
            unique_id,
        }
    }

    /// Forward the connection greeting. The listener cannot stop the
    /// session from here.
    pub fn on_initial(&self, message: StreamMessage) {
        metrics::record_frame_received(message.op());
        self.listener.on_initial(message, self.unique_id);
    }

    /// Forward a steady-state message, stopping the session if the listener
    /// asks for it.
    pub fn on_frame(&self, message: StreamMessage) {
        metrics::record_frame_received(message.op());

        if !self.listener.on_data(message) {
            tracing::info!(unique_id = self.unique_id, "Listener requested stop");
            self.stop();
        }
    }

    fn stop(&self) {
        if self.running.lower() {
            self.state
                .transition(SessionState::Running, SessionState::Stopping);
        }
    }
}

// =============================================================================
// Channel Listener
// =============================================================================

/// A message delivered through a [`ChannelListener`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Connection greeting with the session's correlation id.
    Initial {
        /// Decoded greeting.
        message: StreamMessage,
        /// Correlation id of the session.
        unique_id: u32,
    },
    /// Any later message.
    Data(StreamMessage),
}

/// Listener that forwards every message into an unbounded channel.
///
/// Stops the session once the receiving side has been dropped.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiver it feeds.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StreamListener for ChannelListener {
    fn on_initial(&self, message: StreamMessage, unique_id: u32) {
        if self
            .tx
            .send(StreamEvent::Initial { message, unique_id })
            .is_err()
        {
            tracing::debug!("Event receiver dropped before greeting");
        }
    }

    fn on_data(&self, message: StreamMessage) -> bool {
        self.tx.send(StreamEvent::Data(message)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::ports::MockStreamListener;

    fn status_message() -> StreamMessage {
        StreamMessage::Other(json!({"op": "status"}))
    }

    fn dispatcher(listener: MockStreamListener) -> (Dispatcher, RunningFlag, SharedState) {
        let running = RunningFlag::new();
        let _token = running.raise();
        let state = SharedState::default();
        state.set(SessionState::Running);
        let dispatcher = Dispatcher::new(Arc::new(listener), running.clone(), state.clone(), 1);
        (dispatcher, running, state)
    }

    #[test]
    fn on_initial_forwards_unique_id() {
        let mut listener = MockStreamListener::new();
        listener
            .expect_on_initial()
            .withf(|message, unique_id| message.op() == "status" && *unique_id == 1)
            .times(1)
            .return_const(());
        let (dispatcher, running, _) = dispatcher(listener);

        dispatcher.on_initial(status_message());

        assert!(running.is_running());
    }

    #[test]
    fn falsy_listener_stops_session() {
        let mut listener = MockStreamListener::new();
        listener
            .expect_on_data()
            .withf(|message| message.op() == "status")
            .times(2)
            .return_const(false);
        let (dispatcher, running, state) = dispatcher(listener);

        dispatcher.on_frame(status_message());
        assert!(!running.is_running());
        assert_eq!(state.get(), SessionState::Stopping);

        dispatcher.on_frame(status_message());
        assert!(!running.is_running());
        assert_eq!(state.get(), SessionState::Stopping);
    }

    #[test]
    fn truthy_listener_keeps_running() {
        let mut listener = MockStreamListener::new();
        listener.expect_on_data().times(3).return_const(true);
        let (dispatcher, running, state) = dispatcher(listener);

        for _ in 0..3 {
            dispatcher.on_frame(status_message());
        }

        assert!(running.is_running());
        assert_eq!(state.get(), SessionState::Running);
    }

    #[test]
    fn channel_listener_forwards_events() {
        let (listener, mut rx) = ChannelListener::new();

        listener.on_initial(status_message(), 9);
        assert!(listener.on_data(status_message()));

        assert_eq!(
            rx.try_recv().unwrap(),
            StreamEvent::Initial {
                message: status_message(),
                unique_id: 9
            }
        );
        assert_eq!(rx.try_recv().unwrap(), StreamEvent::Data(status_message()));
    }

    #[test]
    fn channel_listener_stops_when_receiver_dropped() {
        let (listener, rx) = ChannelListener::new();
        drop(rx);

        assert!(!listener.on_data(status_message()));
    }
}
