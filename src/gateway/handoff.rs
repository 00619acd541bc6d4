//! Handoff pause manager: silences automation for a conversation while a
//! human takes over.

use chrono::{DateTime, Duration, Utc};
use concierge_core::{
    config::{HandoffConfig, PhoneConfig, MAX_PAUSE_MINUTES},
    message::OutgoingMessage,
    phone::ConversationKey,
    traits::Channel,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};

/// A conversation handed to a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PauseRecord {
    pub key: ConversationKey,
    pub paused_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
}

pub struct HandoffManager {
    pauses: Mutex<HashMap<ConversationKey, PauseRecord>>,
    /// Used to normalize the admin phone like any other recipient.
    phone: PhoneConfig,
}

impl HandoffManager {
    pub fn new(phone: PhoneConfig) -> Self {
        Self {
            pauses: Mutex::new(HashMap::new()),
            phone,
        }
    }

    pub fn is_paused(&self, key: &ConversationKey) -> bool {
        self.is_paused_at(key, Utc::now())
    }

    /// Expired records are evicted here and nowhere else.
    pub fn is_paused_at(&self, key: &ConversationKey, now: DateTime<Utc>) -> bool {
        let mut pauses = self.lock();
        match pauses.get(key) {
            None => false,
            Some(record) if now > record.expires_at => {
                pauses.remove(key);
                info!("[{key}] pause expired, automation resumes");
                false
            }
            Some(_) => true,
        }
    }

    pub fn pause(&self, key: &ConversationKey, reason: &str, minutes: i64) -> PauseRecord {
        self.pause_at(key, reason, minutes, Utc::now())
    }

    /// Set or overwrite the pause for `key`. Lengths outside
    /// `1..=MAX_PAUSE_MINUTES` are clamped.
    pub fn pause_at(
        &self,
        key: &ConversationKey,
        reason: &str,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> PauseRecord {
        let expires_at = Duration::try_minutes(minutes)
            .and_then(|d| now.checked_add_signed(d))
            .filter(|_| (1..=MAX_PAUSE_MINUTES).contains(&minutes))
            .unwrap_or_else(|| {
                let clamped = minutes.clamp(1, MAX_PAUSE_MINUTES);
                warn!("[{key}] pause of {minutes} minutes is out of range, using {clamped}");
                now + Duration::minutes(clamped)
            });
        let record = PauseRecord {
            key: key.clone(),
            paused_at: now,
            expires_at,
            reason: reason.to_string(),
        };
        self.lock().insert(key.clone(), record.clone());
        record
    }

    /// Returns whether a pause existed.
    pub fn resume(&self, key: &ConversationKey) -> bool {
        let removed = self.lock().remove(key).is_some();
        if removed {
            info!("[{key}] pause lifted manually");
        }
        removed
    }

    pub fn list_active(&self) -> Vec<PauseRecord> {
        self.list_active_at(Utc::now())
    }

    /// Unexpired pauses, sorted by key. Never mutates.
    pub fn list_active_at(&self, now: DateTime<Utc>) -> Vec<PauseRecord> {
        let mut active: Vec<PauseRecord> = self
            .lock()
            .values()
            .filter(|r| now <= r.expires_at)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.key.cmp(&b.key));
        active
    }

    /// Hand the conversation to a human: pause first, then acknowledge the
    /// sender and alert the admin. Notification failures leave the pause in
    /// place.
    pub async fn trigger(
        &self,
        key: &ConversationKey,
        text: &str,
        config: &HandoffConfig,
        channel: &dyn Channel,
        reply_target: &str,
    ) -> PauseRecord {
        let record = self.pause(key, text, config.pause_minutes);
        info!(
            "[{key}] handoff requested, paused until {}",
            record.expires_at.format("%H:%M:%S")
        );

        if let Err(e) = channel
            .send(OutgoingMessage::to(reply_target, &config.ack_message))
            .await
        {
            warn!("[{key}] handoff ack failed: {e}");
        }

        let admin = ConversationKey::normalize(
            &config.admin_phone,
            &self.phone.default_country_code,
            self.phone.local_length,
        );
        if admin.is_empty() {
            warn!("[{key}] no usable admin phone configured, handoff alert skipped");
        } else {
            let alert = config.render_alert(key.as_str(), text);
            if let Err(e) = channel
                .send(OutgoingMessage::to(admin.as_str(), &alert))
                .await
            {
                warn!("[{key}] handoff alert to {admin} failed: {e}");
            }
        }

        record
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConversationKey, PauseRecord>> {
        self.pauses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::RecordingChannel;
    use chrono::TimeZone;

    fn key(s: &str) -> ConversationKey {
        ConversationKey::from_canonical(s)
    }

    fn manager() -> HandoffManager {
        HandoffManager::new(PhoneConfig::default())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()
    }

    fn config() -> HandoffConfig {
        HandoffConfig {
            pause_minutes: 30,
            admin_phone: "56900000000".to_string(),
            ack_message: "Te comunico con un agente.".to_string(),
            admin_template: "Cliente {phone} pide ayuda: {message}".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pause_window_and_lazy_expiry() {
        let mgr = manager();
        let k = key("56911112222");
        mgr.pause_at(&k, "humano", 30, t0());

        assert!(mgr.is_paused_at(&k, t0() + Duration::minutes(29)));
        // Boundary: still paused at exactly expires_at.
        assert!(mgr.is_paused_at(&k, t0() + Duration::minutes(30)));
        assert!(!mgr.is_paused_at(&k, t0() + Duration::minutes(31)));
        // Evicted by the previous check.
        assert!(mgr.list_active_at(t0()).is_empty());
    }

    #[test]
    fn test_pause_overwrites_existing_record() {
        let mgr = manager();
        let k = key("1");
        mgr.pause_at(&k, "first", 30, t0());
        mgr.pause_at(&k, "second", 30, t0() + Duration::minutes(20));
        assert!(mgr.is_paused_at(&k, t0() + Duration::minutes(45)));
        let active = mgr.list_active_at(t0() + Duration::minutes(45));
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].reason, "second");
    }

    #[test]
    fn test_list_active_does_not_evict() {
        let mgr = manager();
        mgr.pause_at(&key("a"), "x", 10, t0());
        mgr.pause_at(&key("b"), "y", 60, t0());

        let later = t0() + Duration::minutes(30);
        let active = mgr.list_active_at(later);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].key, key("b"));
        // The expired record is still stored until is_paused sees it.
        assert_eq!(mgr.lock().len(), 2);
        assert!(!mgr.is_paused_at(&key("a"), later));
        assert_eq!(mgr.lock().len(), 1);
    }

    #[test]
    fn test_resume_reports_existence() {
        let mgr = manager();
        let k = key("1");
        assert!(!mgr.resume(&k));
        mgr.pause(&k, "x", 30);
        assert!(mgr.is_paused(&k));
        assert!(mgr.resume(&k));
        assert!(!mgr.is_paused(&k));
    }

    #[tokio::test]
    async fn test_trigger_pauses_and_notifies() {
        let mgr = manager();
        let ch = RecordingChannel::default();
        let k = key("56911112222");

        mgr.trigger(&k, "quiero hablar con un agente", &config(), &ch, "56911112222")
            .await;

        assert!(mgr.is_paused(&k));
        assert_eq!(ch.texts_to("56911112222"), vec!["Te comunico con un agente."]);
        assert_eq!(
            ch.texts_to("56900000000"),
            vec!["Cliente 56911112222 pide ayuda: quiero hablar con un agente"]
        );
    }

    #[tokio::test]
    async fn test_trigger_keeps_pause_when_notifications_fail() {
        let mgr = manager();
        let ch = RecordingChannel::default();
        ch.fail_for("56911112222");
        ch.fail_for("56900000000");
        let k = key("56911112222");

        mgr.trigger(&k, "agente", &config(), &ch, "56911112222").await;

        assert!(mgr.is_paused(&k));
        assert!(ch.sent().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_without_admin_skips_alert() {
        let mgr = manager();
        let ch = RecordingChannel::default();
        let cfg = HandoffConfig {
            admin_phone: String::new(),
            ..config()
        };
        mgr.trigger(&key("1"), "agente", &cfg, &ch, "1").await;
        assert_eq!(ch.sent().len(), 1);
        assert_eq!(ch.sent()[0].reply_target.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_admin_phone_is_normalized() {
        let mgr = manager();
        let ch = RecordingChannel::default();
        let cfg = HandoffConfig {
            admin_phone: "+56 9 0000 0000".to_string(),
            ..config()
        };
        mgr.trigger(&key("56911112222"), "agente", &cfg, &ch, "56911112222")
            .await;
        assert_eq!(ch.texts_to("56900000000").len(), 1);

        let local = HandoffConfig {
            admin_phone: "900000000".to_string(),
            ..config()
        };
        mgr.trigger(&key("56911112222"), "agente", &local, &ch, "56911112222")
            .await;
        assert_eq!(ch.texts_to("56900000000").len(), 2);
    }

    #[test]
    fn test_oversized_pause_is_clamped() {
        let mgr = manager();
        let k = key("1");
        let record = mgr.pause_at(&k, "x", 10_000_000_000_000, t0());
        assert_eq!(record.expires_at, t0() + Duration::minutes(MAX_PAUSE_MINUTES));
        assert!(mgr.is_paused_at(&k, t0() + Duration::days(29)));
    }
}
