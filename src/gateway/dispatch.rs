//! Scheduled dispatch engine: drains due backlog rows at a human pace.
//!
//! At most one cycle runs at a time. Sends only happen inside the allowed
//! hour window, never exceed the daily cap, and are separated by a random
//! delay.

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use concierge_core::{
    config::{DispatchConfig, PhoneConfig},
    message::OutgoingMessage,
    phone::ConversationKey,
    schedule::{MessageStatus, ScheduledMessage},
    traits::{Backlog, Channel},
};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Why a cycle did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    OutsideWindow,
    DailyCapReached,
    FetchFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleReport {
    Skipped(SkipReason),
    Completed { sent: u32, failed: u32 },
}

#[derive(Debug, Default)]
struct WindowState {
    daily_sent: u32,
    window_date: Option<NaiveDate>,
}

pub struct DispatchEngine {
    config: DispatchConfig,
    phone: PhoneConfig,
    backlog: Arc<dyn Backlog>,
    channel: Arc<dyn Channel>,
    in_flight: AtomicBool,
    window: Mutex<WindowState>,
}

/// Clears the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DispatchEngine {
    pub fn new(
        config: DispatchConfig,
        phone: PhoneConfig,
        backlog: Arc<dyn Backlog>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            config,
            phone,
            backlog,
            channel,
            in_flight: AtomicBool::new(false),
            window: Mutex::new(WindowState::default()),
        }
    }

    /// Poll forever. Each tick runs in its own task so a long cycle makes
    /// the next tick a no-op rather than delaying it.
    pub async fn run(self: Arc<Self>) {
        info!(
            "Dispatch loop started (every {}s, {:02}:00-{:02}:00, cap {}/day)",
            self.config.poll_interval_secs,
            self.config.active_start_hour,
            self.config.active_end_hour,
            self.config.max_daily_messages,
        );
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                match engine.run_cycle().await {
                    CycleReport::Completed { sent, failed } if sent + failed > 0 => {
                        info!("dispatch cycle: {sent} sent, {failed} failed")
                    }
                    report => debug!("dispatch cycle: {report:?}"),
                }
            });
        }
    }

    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_at(Local::now().naive_local()).await
    }

    /// One poll against local wall time `now`.
    pub async fn run_cycle_at(&self, now: NaiveDateTime) -> CycleReport {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("dispatch: previous cycle still running");
            return CycleReport::Skipped(SkipReason::InFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        if !self.config.hour_allowed(now.hour()) {
            return CycleReport::Skipped(SkipReason::OutsideWindow);
        }

        {
            let mut window = self.window();
            if window.window_date != Some(now.date()) {
                if window.window_date.is_some() {
                    info!(
                        "dispatch: new day {}, resetting counter (was {})",
                        now.date(),
                        window.daily_sent
                    );
                }
                window.daily_sent = 0;
                window.window_date = Some(now.date());
            }
            if window.daily_sent >= self.config.max_daily_messages {
                return CycleReport::Skipped(SkipReason::DailyCapReached);
            }
        }

        let due = match self.backlog.list_due(now).await {
            Ok(due) => due,
            Err(e) => {
                error!("dispatch: failed to read backlog: {e}");
                return CycleReport::Skipped(SkipReason::FetchFailed);
            }
        };
        if due.is_empty() {
            return CycleReport::Completed { sent: 0, failed: 0 };
        }
        info!("dispatch: {} message(s) due", due.len());

        let (mut sent, mut failed) = (0u32, 0u32);
        for (i, msg) in due.iter().enumerate() {
            if self.window().daily_sent >= self.config.max_daily_messages {
                warn!(
                    "dispatch: daily cap of {} reached, {} message(s) left for tomorrow",
                    self.config.max_daily_messages,
                    due.len() - i
                );
                break;
            }
            if i > 0 {
                tokio::time::sleep(self.pacing_delay()).await;
            }

            if self.deliver(msg).await {
                sent += 1;
            } else {
                failed += 1;
            }
        }

        CycleReport::Completed { sent, failed }
    }

    /// Deliver one row and record its outcome. Returns whether it was sent.
    async fn deliver(&self, msg: &ScheduledMessage) -> bool {
        let key = ConversationKey::normalize(
            &msg.recipient,
            &self.phone.default_country_code,
            self.phone.local_length,
        );
        let result = if key.is_empty() {
            Err(format!("recipient '{}' has no digits", msg.recipient))
        } else {
            let out = OutgoingMessage {
                text: msg.body.clone(),
                reply_target: Some(key.to_string()),
                media: msg.media.clone(),
            };
            self.channel.send(out).await.map_err(|e| e.to_string())
        };

        match result {
            Ok(()) => {
                self.window().daily_sent += 1;
                if let Err(e) = self.backlog.update_status(&msg.id, MessageStatus::Sent).await {
                    error!("[{key}] delivered {} but could not mark it sent: {e}", msg.id);
                }
                info!("[{key}] scheduled message {} sent", msg.id);
                true
            }
            Err(e) => {
                warn!("[{key}] scheduled message {} failed: {e}", msg.id);
                if let Err(e) = self.backlog.update_status(&msg.id, MessageStatus::Failed).await {
                    error!("[{key}] could not mark {} failed: {e}", msg.id);
                }
                false
            }
        }
    }

    fn pacing_delay(&self) -> Duration {
        let (min, max) = (self.config.min_delay_ms, self.config.max_delay_ms);
        let ms = if min >= max {
            min
        } else {
            rand::thread_rng().gen_range(min..=max)
        };
        Duration::from_millis(ms)
    }

    /// Messages sent today.
    pub fn daily_sent(&self) -> u32 {
        self.window().daily_sent
    }

    fn window(&self) -> std::sync::MutexGuard<'_, WindowState> {
        self.window.lock().unwrap_or_else(|p| p.into_inner())
    }
}
