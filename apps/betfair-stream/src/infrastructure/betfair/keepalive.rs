//! Keep-Alive Task
//!
//! Sends a `heartbeat` control message at a fixed interval so the server
//! does not drop an idle connection. One task runs per session start and is
//! cancelled by the supervisor when that run ends.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::session::StreamSession;

/// Periodic heartbeat sender for a running session.
pub struct KeepAlive {
    session: Arc<StreamSession>,
    interval: Duration,
    cancel: CancellationToken,
}

impl KeepAlive {
    /// Create a keep-alive task for `session`.
    #[must_use]
    pub const fn new(
        session: Arc<StreamSession>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            interval,
            cancel,
        }
    }

    /// Send heartbeats until cancelled or a send fails.
    pub async fn run(self) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Keep-alive cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.session.heartbeat(None).await {
                        tracing::debug!(error = %e, "Keep-alive stopped");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ScriptedTransport, StubConnector};
    use super::*;
    use crate::application::ports::MockStreamListener;
    use crate::infrastructure::config::{Credentials, SessionSettings};

    fn session(transport: &Arc<ScriptedTransport>) -> Arc<StreamSession> {
        let mut listener = MockStreamListener::new();
        listener.expect_on_initial().return_const(());
        Arc::new(StreamSession::new(
            &Credentials::new("key".to_string(), "token".to_string()),
            &SessionSettings::default(),
            Arc::new(StubConnector::new(Arc::clone(transport))),
            Arc::new(listener),
        ))
    }

    #[tokio::test]
    async fn sends_heartbeats_until_cancelled() {
        let transport = Arc::new(ScriptedTransport::new([b"{}\r\n".to_vec()]));
        let session = session(&transport);
        let _loop = session.start().await.unwrap();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            KeepAlive::new(Arc::clone(&session), Duration::from_millis(20), cancel.clone()).run(),
        );
        tokio::time::timeout(Duration::from_secs(2), async {
            while transport.sent().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("heartbeats should be sent");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("keep-alive should stop on cancel")
            .unwrap();

        assert!(
            transport
                .sent()
                .iter()
                .all(|frame| frame.contains("\"op\":\"heartbeat\""))
        );
    }

    #[tokio::test]
    async fn exits_when_session_is_not_connected() {
        let transport = Arc::new(ScriptedTransport::new(Vec::<Vec<u8>>::new()));
        let session = session(&transport);

        let keep_alive = KeepAlive::new(session, Duration::from_millis(10), CancellationToken::new());

        tokio::time::timeout(Duration::from_secs(1), keep_alive.run())
            .await
            .expect("keep-alive should exit on send failure");
        assert!(transport.sent().is_empty());
    }
}
