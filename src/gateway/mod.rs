//! Gateway: the main event loop connecting the channel, the conversation
//! engines, and the background dispatcher.

pub(crate) mod debounce;
pub(crate) mod dispatch;
pub(crate) mod handoff;
mod pipeline;
pub(crate) mod router;
pub(crate) mod settings;
pub(crate) mod survey;

#[cfg(test)]
pub(crate) mod testing;

use debounce::Debouncer;
use dispatch::DispatchEngine;
use handoff::HandoffManager;
use router::ModeRouter;
use settings::SettingsCache;
use survey::SurveyEngine;

use concierge_channels::bridge::BridgeChannel;
use concierge_core::{
    config::{ApiConfig, Config, PhoneConfig},
    message::IncomingMessage,
    phone::ConversationKey,
    traits::{Backlog, BlockList, Channel, ConfigSource, Responder, SurveyResults, Transcriber},
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Collaborators the gateway is wired to.
pub struct GatewayDeps {
    /// Outbound delivery.
    pub channel: Arc<dyn Channel>,
    /// Where `/api/inbound` pushes events. `None` disables the route.
    pub bridge: Option<Arc<BridgeChannel>>,
    pub block_list: Arc<dyn BlockList>,
    pub config_source: Arc<dyn ConfigSource>,
    pub backlog: Arc<dyn Backlog>,
    pub survey_results: Arc<dyn SurveyResults>,
    pub responder: Arc<dyn Responder>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

/// Where a coalesced turn's reply goes.
pub type ReplyTarget = String;

/// The central gateway: inbound events in, routed replies out.
pub struct Gateway {
    pub(crate) channel: Arc<dyn Channel>,
    pub(crate) bridge: Option<Arc<BridgeChannel>>,
    pub(crate) block_list: Arc<dyn BlockList>,
    pub(crate) transcriber: Option<Arc<dyn Transcriber>>,
    pub(crate) debouncer: Debouncer<ReplyTarget>,
    /// Senders with an event being admitted; later events wait here.
    inbound_queues: Mutex<HashMap<ConversationKey, VecDeque<IncomingMessage>>>,
    pub(crate) router: ModeRouter,
    pub(crate) handoff: Arc<HandoffManager>,
    pub(crate) surveys: Arc<SurveyEngine>,
    pub(crate) settings: Arc<SettingsCache>,
    pub(crate) dispatch: Option<Arc<DispatchEngine>>,
    pub(crate) phone: PhoneConfig,
    pub(crate) api_config: ApiConfig,
    pub(crate) uptime: Instant,
}

impl Gateway {
    pub fn new(config: &Config, deps: GatewayDeps) -> Self {
        let handoff = Arc::new(HandoffManager::new(config.phone.clone()));
        let surveys = Arc::new(SurveyEngine::new(deps.survey_results));
        let settings = Arc::new(SettingsCache::new(
            config.handoff.clone(),
            config.survey.clone(),
            deps.config_source,
        ));
        let router = ModeRouter::new(
            Arc::clone(&deps.block_list),
            Arc::clone(&handoff),
            Arc::clone(&surveys),
            Arc::clone(&settings),
            deps.responder,
        );
        let dispatch = config.dispatch.enabled.then(|| {
            Arc::new(DispatchEngine::new(
                config.dispatch.clone(),
                config.phone.clone(),
                deps.backlog,
                Arc::clone(&deps.channel),
            ))
        });

        Self {
            channel: deps.channel,
            bridge: deps.bridge,
            block_list: deps.block_list,
            transcriber: deps.transcriber,
            debouncer: Debouncer::new(
                Duration::from_millis(config.debounce.wait_ms),
                Duration::from_millis(config.debounce.max_wait_ms),
            ),
            inbound_queues: Mutex::new(HashMap::new()),
            router,
            handoff,
            surveys,
            settings,
            dispatch,
            phone: config.phone.clone(),
            api_config: config.api.clone(),
            uptime: Instant::now(),
        }
    }

    /// Run the main event loop until ctrl-c.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!(
            "Concierge gateway running | channel: {} | voice: {} | dispatch: {}",
            self.channel.name(),
            if self.transcriber.is_some() { "on" } else { "off" },
            if self.dispatch.is_some() { "on" } else { "off" },
        );

        let mut rx = self
            .channel
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start channel {}: {e}", self.channel.name()))?;

        let dispatch_handle = self.dispatch.as_ref().map(|engine| {
            let engine = Arc::clone(engine);
            tokio::spawn(async move { engine.run().await })
        });

        let api_handle = if self.api_config.enabled {
            let gw = Arc::clone(&self);
            Some(tokio::spawn(async move {
                crate::api::serve(gw).await;
            }))
        } else {
            None
        };

        loop {
            tokio::select! {
                incoming = rx.recv() => match incoming {
                    Some(incoming) => self.receive(incoming),
                    None => {
                        warn!("channel closed its inbound stream");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown(&dispatch_handle, &api_handle).await;
        Ok(())
    }

    fn active_senders(&self) -> MutexGuard<'_, HashMap<ConversationKey, VecDeque<IncomingMessage>>> {
        self.inbound_queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn shutdown(
        &self,
        dispatch_handle: &Option<JoinHandle<()>>,
        api_handle: &Option<JoinHandle<()>>,
    ) {
        info!("Shutting down...");

        if let Some(h) = dispatch_handle {
            h.abort();
        }
        if let Some(h) = api_handle {
            h.abort();
        }

        let pending = self.debouncer.pending_keys();
        if pending > 0 {
            warn!("dropping {pending} unflushed conversation buffer(s)");
        }
        let surveys = self.surveys.active_count();
        if surveys > 0 {
            warn!("dropping {surveys} open survey session(s)");
        }

        if let Err(e) = self.channel.stop().await {
            warn!("failed to stop channel {}: {e}", self.channel.name());
        }

        info!("Shutdown complete.");
    }
}
