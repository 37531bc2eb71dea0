use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use concierge_core::domain::booking::OutboundRecord;
use concierge_core::{Clock, IdempotencyMarkers};
use concierge_db::OutboundLogRepository;

use crate::transport::ChatTransport;

/// Single path for every bot message. Each send gets a fresh message id that
/// is registered as an echo marker before the network call; success adds the
/// outbound marker, the per-user debounce marker and a durable log row.
#[derive(Clone)]
pub struct OutboundSender {
    transport: Arc<dyn ChatTransport>,
    markers: IdempotencyMarkers,
    outbound_log: Arc<dyn OutboundLogRepository>,
    clock: Arc<dyn Clock>,
}

impl OutboundSender {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        markers: IdempotencyMarkers,
        outbound_log: Arc<dyn OutboundLogRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { transport, markers, outbound_log, clock }
    }

    /// Never fails: transport and logging errors are reported as `false` or
    /// as warnings.
    pub async fn send(&self, user_id: &str, chat_id: &str, text: &str) -> bool {
        let message_id = Uuid::new_v4().to_string();
        self.markers.register_outbound(&message_id);

        if !self.transport.is_configured() {
            warn!(
                event_name = "channel.outbound.unconfigured",
                user_id,
                chat_id,
                message_id = %message_id,
                "chat transport credentials missing; message not sent"
            );
            return false;
        }

        if let Err(error) = self.transport.send(chat_id, &message_id, text).await {
            warn!(
                event_name = "channel.outbound.failed",
                user_id,
                chat_id,
                message_id = %message_id,
                error = %error,
                "chat transport send failed"
            );
            return false;
        }

        let now = self.clock.now();
        self.markers.confirm_outbound(&message_id);
        self.markers.note_bot_send(user_id, now.timestamp_millis());

        let record = OutboundRecord {
            message_id: message_id.clone(),
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            created_at: now,
        };
        if let Err(error) = self.outbound_log.record(record).await {
            warn!(
                event_name = "channel.outbound.log_failed",
                user_id,
                message_id = %message_id,
                error = %error,
                "failed to persist outbound message record"
            );
        }

        info!(
            event_name = "channel.outbound.sent",
            user_id,
            chat_id,
            message_id = %message_id,
            chars = text.chars().count(),
            "bot message sent"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use concierge_core::config::AppConfig;
    use concierge_core::{IdempotencyMarkers, ManualClock, MemoryCache};
    use concierge_db::{InMemoryOutboundLogRepository, OutboundLogRepository};

    use super::OutboundSender;
    use crate::transport::{RecordingTransport, TransportError};

    struct Harness {
        sender: OutboundSender,
        transport: Arc<RecordingTransport>,
        markers: IdempotencyMarkers,
        log: Arc<InMemoryOutboundLogRepository>,
    }

    fn harness(transport: RecordingTransport) -> Harness {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).single().expect("valid timestamp");
        let clock = Arc::new(ManualClock::new(start));
        let cache = Arc::new(MemoryCache::with_clock(clock.clone()));
        let markers = IdempotencyMarkers::new(cache, AppConfig::default().cache);
        let transport = Arc::new(transport);
        let log = Arc::new(InMemoryOutboundLogRepository::default());
        let sender = OutboundSender::new(transport.clone(), markers.clone(), log.clone(), clock);
        Harness { sender, transport, markers, log }
    }

    #[tokio::test]
    async fn successful_send_sets_every_marker_and_logs() {
        let h = harness(RecordingTransport::default());

        assert!(h.sender.send("user-1", "chat-1", "안녕하세요").await);

        let sent = h.transport.sent().await;
        assert_eq!(sent.len(), 1);
        let message_id = &sent[0].message_id;
        assert!(h.markers.is_echo(message_id));
        assert!(h.markers.recently_sent("user-1"));
        assert!(h.log.exists(message_id).await.expect("lookup"));
    }

    #[tokio::test]
    async fn failed_send_returns_false_without_debounce() {
        let h = harness(RecordingTransport::failing(TransportError::Status {
            status: 500,
            body: "boom".to_string(),
        }));

        assert!(!h.sender.send("user-1", "chat-1", "hello").await);
        assert!(!h.markers.recently_sent("user-1"));
    }

    #[tokio::test]
    async fn unconfigured_transport_fails_fast() {
        let h = harness(RecordingTransport::unconfigured());

        assert!(!h.sender.send("user-1", "chat-1", "hello").await);
        assert!(h.transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn each_send_uses_a_fresh_message_id() {
        let h = harness(RecordingTransport::default());
        h.sender.send("user-1", "chat-1", "one").await;
        h.sender.send("user-1", "chat-1", "two").await;

        let sent = h.transport.sent().await;
        assert_ne!(sent[0].message_id, sent[1].message_id);
    }
}
