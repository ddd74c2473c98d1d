//! Stream Supervisor
//!
//! Drives a [`StreamSession`] through its protocol handshake and keeps it
//! alive:
//!
//! 1. On the connection greeting, authenticate.
//! 2. On a successful authentication status, subscribe to the configured
//!    markets and orders, resuming from the last seen clocks after a
//!    reconnect.
//! 3. While the run lasts, send heartbeats.
//! 4. When the read loop fails, restart the session with backoff.
//!
//! A rejected authentication is final; retrying with the same credentials
//! would only be rejected again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::{SubscriptionSettings, SupervisorSettings};
use crate::infrastructure::metrics;

use super::dispatch::StreamEvent;
use super::keepalive::KeepAlive;
use super::messages::{
    ChangeMessage, ErrorCode, MarketDataField, MarketDataFilter, StatusMessage, StreamMessage,
    SubscriptionOptions,
};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::session::{StreamError, StreamSession};

/// Why the supervisor gave up.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The server rejected the credentials.
    #[error("authentication rejected: {error_code:?} {}", .message.as_deref().unwrap_or(""))]
    Rejected {
        /// Error code of the failing status.
        error_code: Option<ErrorCode>,
        /// Error message of the failing status.
        message: Option<String>,
    },

    /// Every reconnection attempt failed.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    AttemptsExhausted(u32),
}

/// Clocks of the latest change message on one stream.
#[derive(Debug, Clone, Default)]
struct StreamClocks {
    initial_clk: Option<String>,
    clk: Option<String>,
}

impl StreamClocks {
    fn update(&mut self, change: &ChangeMessage) {
        if let Some(initial_clk) = &change.initial_clk {
            self.initial_clk = Some(initial_clk.clone());
        }
        if let Some(clk) = &change.clk {
            self.clk = Some(clk.clone());
        }
    }

    fn options(&self) -> SubscriptionOptions {
        SubscriptionOptions {
            initial_clk: self.initial_clk.clone(),
            clk: self.clk.clone(),
            ..SubscriptionOptions::default()
        }
    }
}

enum RunOutcome {
    Shutdown,
    Finished,
    Failed(String),
}

/// Keeps one session connected, authenticated and subscribed.
pub struct Supervisor {
    session: Arc<StreamSession>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    subscription: SubscriptionSettings,
    heartbeat_interval: Duration,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
    market_clocks: StreamClocks,
    order_clocks: StreamClocks,
    authenticated: bool,
    rejection: Option<SupervisorError>,
}

impl Supervisor {
    /// Create a supervisor for `session`, whose listener feeds `events`.
    #[must_use]
    pub fn new(
        session: Arc<StreamSession>,
        events: mpsc::UnboundedReceiver<StreamEvent>,
        settings: &SupervisorSettings,
        subscription: SubscriptionSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            events,
            subscription,
            heartbeat_interval: settings.heartbeat_interval,
            policy: ReconnectPolicy::new(ReconnectConfig::from_settings(settings)),
            shutdown,
            market_clocks: StreamClocks::default(),
            order_clocks: StreamClocks::default(),
            authenticated: false,
            rejection: None,
        }
    }

    /// Run until shutdown, rejection, or reconnection attempts run out.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication is rejected or the reconnection
    /// policy gives up.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        loop {
            while self.events.try_recv().is_ok() {}
            self.authenticated = false;

            let started = tokio::select! {
                () = self.shutdown.cancelled() => {
                    self.session.stop();
                    return Ok(());
                }
                started = self.session.start() => started,
            };

            match started {
                Ok(handle) => {
                    let outcome = self.supervise(handle).await;
                    if let Some(rejection) = self.rejection.take() {
                        return Err(rejection);
                    }
                    match outcome {
                        RunOutcome::Shutdown | RunOutcome::Finished => return Ok(()),
                        RunOutcome::Failed(reason) => {
                            tracing::warn!(error = %reason, "Stream connection lost");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to start stream session");
                }
            }

            let Some(delay) = self.policy.next_delay() else {
                return Err(SupervisorError::AttemptsExhausted(self.policy.attempt_count()));
            };
            metrics::record_reconnect();
            tracing::info!(
                attempt = self.policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting"
            );

            tokio::select! {
                () = self.shutdown.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn supervise(&mut self, mut handle: JoinHandle<Result<(), StreamError>>) -> RunOutcome {
        let keep_alive_cancel = self.shutdown.child_token();
        let keep_alive = KeepAlive::new(
            Arc::clone(&self.session),
            self.heartbeat_interval,
            keep_alive_cancel.clone(),
        );
        tokio::spawn(keep_alive.run());

        // Events queued before the loop ended are handled before its result,
        // so a failure status followed by a server close is not missed.
        let outcome = loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    self.session.stop();
                    if let Err(e) = (&mut handle).await {
                        tracing::warn!(error = %e, "Read loop task failed during shutdown");
                    }
                    break RunOutcome::Shutdown;
                }
                Some(event) = self.events.recv() => self.handle_event(event).await,
                joined = &mut handle => {
                    break match joined {
                        Ok(Ok(())) => RunOutcome::Finished,
                        Ok(Err(e)) => RunOutcome::Failed(e.to_string()),
                        Err(e) => RunOutcome::Failed(e.to_string()),
                    };
                }
            }
        };

        keep_alive_cancel.cancel();
        outcome
    }

    async fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Initial { message, unique_id } => {
                if let StreamMessage::Connection(connection) = &message {
                    tracing::info!(
                        connection_id = %connection.connection_id,
                        unique_id,
                        "Stream connected"
                    );
                }
                if let Err(e) = self.session.authenticate(None).await {
                    tracing::warn!(error = %e, "Failed to send authentication");
                }
            }
            StreamEvent::Data(StreamMessage::Status(status)) => self.on_status(&status).await,
            StreamEvent::Data(StreamMessage::MarketChange(change)) => {
                self.market_clocks.update(&change);
                log_change("mcm", &change);
            }
            StreamEvent::Data(StreamMessage::OrderChange(change)) => {
                self.order_clocks.update(&change);
                log_change("ocm", &change);
            }
            StreamEvent::Data(other) => {
                tracing::debug!(op = other.op(), "Unhandled stream message");
            }
        }
    }

    async fn on_status(&mut self, status: &StatusMessage) {
        // Heartbeats share the authentication id, so only the first answer
        // on a connection counts.
        let authentication = !self.authenticated && status.id == Some(self.session.unique_id());

        if status.is_success() {
            if authentication {
                tracing::info!(
                    connections_available = status.connections_available,
                    "Authenticated"
                );
                self.authenticated = true;
                self.policy.reset();
                self.subscribe().await;
            }
            return;
        }

        tracing::error!(
            id = status.id,
            error_code = ?status.error_code,
            error_message = status.error_message.as_deref().unwrap_or(""),
            connection_closed = status.connection_closed,
            "Stream request failed"
        );

        if authentication {
            self.rejection = Some(SupervisorError::Rejected {
                error_code: status.error_code,
                message: status.error_message.clone(),
            });
            self.session.stop();
        }
    }

    async fn subscribe(&self) {
        let base = self.session.unique_id();

        if let Some(filter) = self.subscription.market_filter() {
            let result = self
                .session
                .subscribe_to_markets_with(
                    filter,
                    default_market_data_filter(),
                    self.market_clocks.options(),
                    Some(base.wrapping_add(1)),
                )
                .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to subscribe to markets");
            }
        }

        if self.subscription.subscribe_orders {
            let result = self
                .session
                .subscribe_to_orders_with(
                    None,
                    self.order_clocks.options(),
                    Some(base.wrapping_add(2)),
                )
                .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to subscribe to orders");
            }
        }
    }
}

fn default_market_data_filter() -> MarketDataFilter {
    MarketDataFilter::fields([
        MarketDataField::ExBestOffersDisp,
        MarketDataField::ExTraded,
        MarketDataField::ExTradedVol,
        MarketDataField::ExLtp,
        MarketDataField::ExMarketDef,
    ])
}

fn log_change(op: &str, change: &ChangeMessage) {
    if change.is_heartbeat() {
        tracing::trace!(op, "Stream heartbeat");
        return;
    }
    tracing::debug!(
        op,
        id = change.id,
        changes = change.changes.len(),
        change_type = ?change.change_type,
        publish_time = ?change.publish_time(),
        "Stream change"
    );
}
