//! Debounce aggregator: coalesces rapid fragments per conversation into one
//! turn.
//!
//! Every `enqueue` appends synchronously, cancels the key's flush timer and
//! arms a new one at `min(now + wait, first_fragment + max_wait)`. The
//! previous ticket for the key is settled as [`Settled::Superseded`] right
//! away; only the most recent ticket receives the combined turn. Fragment
//! order is the order of `enqueue` calls.

use concierge_core::phone::ConversationKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// One logically complete inbound message.
#[derive(Debug, Clone)]
pub struct Turn<C> {
    pub key: ConversationKey,
    /// Fragments joined with a single space, in arrival order.
    pub text: String,
    pub fragment_count: usize,
    /// Context of the latest fragment.
    pub context: C,
}

/// How a [`Ticket`] resolves.
#[derive(Debug)]
pub enum Settled<C> {
    Flushed(Turn<C>),
    /// A later fragment for the same key took over this turn.
    Superseded,
}

struct PendingTurn<C> {
    fragments: Vec<String>,
    first_at: Instant,
    context: C,
    generation: u64,
    waiter: oneshot::Sender<Settled<C>>,
    timer: JoinHandle<()>,
}

/// Claim on the outcome of one enqueued fragment.
pub struct Ticket<C>(oneshot::Receiver<Settled<C>>);

impl<C> Ticket<C> {
    pub async fn settled(self) -> Settled<C> {
        // A dropped sender only happens if the runtime tears the timer down.
        self.0.await.unwrap_or(Settled::Superseded)
    }
}

type PendingMap<C> = Arc<Mutex<HashMap<ConversationKey, PendingTurn<C>>>>;

pub struct Debouncer<C> {
    wait: Duration,
    max_wait: Duration,
    pending: PendingMap<C>,
    generation: AtomicU64,
}

impl<C: Send + 'static> Debouncer<C> {
    pub fn new(wait: Duration, max_wait: Duration) -> Self {
        Self {
            wait,
            max_wait,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Append a fragment for `key`. Must be called from within a runtime.
    pub fn enqueue(&self, key: ConversationKey, fragment: String, context: C) -> Ticket<C> {
        let (tx, rx) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut pending = lock(&self.pending);
            let now = Instant::now();

            let (fragments, first_at) = match pending.remove(&key) {
                Some(prev) => {
                    prev.timer.abort();
                    let _ = prev.waiter.send(Settled::Superseded);
                    let mut fragments = prev.fragments;
                    fragments.push(fragment);
                    (fragments, prev.first_at)
                }
                None => (vec![fragment], now),
            };

            let deadline = (now + self.wait).min(first_at + self.max_wait);
            if deadline <= now {
                debug!("[{key}] debounce ceiling reached, flushing {} fragments", fragments.len());
                let _ = tx.send(Settled::Flushed(build_turn(key, fragments, context)));
            } else {
                let timer = tokio::spawn(flush_at(
                    Arc::clone(&self.pending),
                    key.clone(),
                    generation,
                    deadline,
                ));
                pending.insert(
                    key,
                    PendingTurn {
                        fragments,
                        first_at,
                        context,
                        generation,
                        waiter: tx,
                        timer,
                    },
                );
            }
        }

        Ticket(rx)
    }

    /// Number of conversations with an unflushed buffer.
    pub fn pending_keys(&self) -> usize {
        lock(&self.pending).len()
    }
}

async fn flush_at<C>(
    pending: PendingMap<C>,
    key: ConversationKey,
    generation: u64,
    deadline: Instant,
) {
    tokio::time::sleep_until(deadline).await;

    let mut map = lock(&pending);
    // A newer fragment may have replaced the entry between wake-up and lock.
    if map.get(&key).map(|p| p.generation) != Some(generation) {
        return;
    }
    if let Some(turn) = map.remove(&key) {
        drop(map);
        debug!("[{key}] debounce settled with {} fragments", turn.fragments.len());
        let _ = turn
            .waiter
            .send(Settled::Flushed(build_turn(key, turn.fragments, turn.context)));
    }
}

fn build_turn<C>(key: ConversationKey, fragments: Vec<String>, context: C) -> Turn<C> {
    Turn {
        key,
        text: fragments.join(" "),
        fragment_count: fragments.len(),
        context,
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
