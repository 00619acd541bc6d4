//! Inbound pipeline: normalize, transcribe, debounce, route.
//!
//! Events for one conversation are drained by a single task in the order
//! they were received, so slow transcriptions never reorder fragments.

use super::{
    debounce::{Settled, Ticket},
    Gateway, ReplyTarget,
};
use concierge_core::{
    message::{IncomingMessage, MessageKind},
    phone::ConversationKey,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl Gateway {
    /// Accept one raw inbound event. Never blocks: the event is queued
    /// behind any earlier events from the same sender.
    pub(super) fn receive(self: &Arc<Self>, incoming: IncomingMessage) {
        let key = ConversationKey::normalize(
            &incoming.sender_id,
            &self.phone.default_country_code,
            self.phone.local_length,
        );
        if key.is_empty() {
            warn!("dropping event with unusable sender id '{}'", incoming.sender_id);
            return;
        }

        {
            let mut active = self.active_senders();
            if let Some(queue) = active.get_mut(&key) {
                queue.push_back(incoming);
                debug!("[{key}] queued behind an event still being admitted");
                return;
            }
            active.insert(key.clone(), VecDeque::new());
        }

        let gw = Arc::clone(self);
        tokio::spawn(async move { gw.drain_sender(key, incoming).await });
    }

    /// Admit `first` and then everything queued behind it, one at a time.
    async fn drain_sender(self: Arc<Self>, key: ConversationKey, first: IncomingMessage) {
        let mut next = Some(first);
        while let Some(incoming) = next.take() {
            if let Some(ticket) = self.admit(&key, &incoming).await {
                let gw = Arc::clone(&self);
                tokio::spawn(async move { gw.settle(ticket).await });
            }

            let mut active = self.active_senders();
            match active.get_mut(&key).and_then(VecDeque::pop_front) {
                Some(queued) => next = Some(queued),
                None => {
                    active.remove(&key);
                }
            }
        }
    }

    /// Turn an event into a debounce fragment.
    async fn admit(
        &self,
        key: &ConversationKey,
        incoming: &IncomingMessage,
    ) -> Option<Ticket<ReplyTarget>> {
        let text = self.message_text(key, incoming).await?;
        let preview: String = text.chars().take(60).collect();
        info!(
            "[{key}] {} says: {preview}",
            incoming.sender_name.as_deref().unwrap_or("unknown")
        );
        Some(
            self.debouncer
                .enqueue(key.clone(), text, incoming.target().to_string()),
        )
    }

    /// Wait for the fragment's turn and route it if this fragment closed it.
    async fn settle(&self, ticket: Ticket<ReplyTarget>) {
        if let Settled::Flushed(turn) = ticket.settled().await {
            if turn.fragment_count > 1 {
                debug!("[{}] coalesced {} fragments", turn.key, turn.fragment_count);
            }
            let outcome = self
                .router
                .handle(&turn.key, &turn.text, self.channel.as_ref(), &turn.context)
                .await;
            debug!("[{}] routed: {outcome:?}", turn.key);
        }
    }

    /// Text of the event; voice notes are transcribed first.
    async fn message_text(&self, key: &ConversationKey, incoming: &IncomingMessage) -> Option<String> {
        let text = match incoming.kind {
            MessageKind::Text => incoming.text.trim().to_string(),
            MessageKind::Voice => {
                let Some(ref transcriber) = self.transcriber else {
                    warn!("[{key}] voice note received but transcription is not configured");
                    return None;
                };
                let Some(ref audio) = incoming.audio else {
                    warn!("[{key}] voice note without audio payload");
                    return None;
                };
                match transcriber.transcribe(audio).await {
                    Ok(t) => {
                        debug!("[{key}] transcribed voice note ({} bytes)", audio.len());
                        t.trim().to_string()
                    }
                    Err(e) => {
                        warn!("[{key}] transcription failed, dropping voice note: {e}");
                        return None;
                    }
                }
            }
        };
        (!text.is_empty()).then_some(text)
    }
}
