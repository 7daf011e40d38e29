use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use anyhow::Result;
use shared::protocol::OrderRecord;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{ApiClient, SessionStore};

/// Fixed delay between order fetches while the vendor is online.
pub const ORDER_POLL_PERIOD: Duration = Duration::from_secs(30);

const FEED_EVENT_CAPACITY: usize = 64;

/// Snapshot of the feed for rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    pub online: bool,
    pub loading: bool,
    pub orders: Vec<OrderRecord>,
}

#[derive(Debug, Clone)]
pub enum FeedEvent {
    OnlineChanged(bool),
    SnapshotReplaced { orders: Vec<OrderRecord> },
    FetchFailed { reason: String },
}

#[derive(Default)]
struct FeedStateInner {
    online: bool,
    in_flight: u32,
    orders: Vec<OrderRecord>,
    next_seq: u64,
    applied_seq: u64,
}

enum FetchOutcome {
    Fetched(Vec<OrderRecord>),
    SessionMissing,
    Failed(anyhow::Error),
}

struct FeedShared {
    api: ApiClient,
    session: Arc<dyn SessionStore>,
    poll_period: Duration,
    // Bumped on every arm and disarm; results from older generations never
    // apply.
    generation: AtomicU64,
    state: Mutex<FeedStateInner>,
    events: broadcast::Sender<FeedEvent>,
}

/// Polls the backend for the vendor's orders while the vendor is online.
///
/// Going online re-reads the session store and only arms the polling timer
/// when a vendor id is present; the first fetch fires immediately, then one
/// per period. Going offline, shutting down or dropping the feed disarms the
/// timer. In-flight fetches are left to resolve but their results no longer
/// apply, and out-of-order responses are discarded by sequence number so the
/// snapshot only ever moves forward.
pub struct OrderFeed {
    shared: Arc<FeedShared>,
    poll_task: StdMutex<Option<JoinHandle<()>>>,
}

impl OrderFeed {
    pub fn new(api: ApiClient, session: Arc<dyn SessionStore>) -> Self {
        Self::with_poll_period(api, session, ORDER_POLL_PERIOD)
    }

    /// Same feed with a caller-chosen polling period.
    pub fn with_poll_period(
        api: ApiClient,
        session: Arc<dyn SessionStore>,
        poll_period: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(FEED_EVENT_CAPACITY);
        Self {
            shared: Arc::new(FeedShared {
                api,
                session,
                poll_period,
                generation: AtomicU64::new(0),
                state: Mutex::new(FeedStateInner::default()),
                events,
            }),
            poll_task: StdMutex::new(None),
        }
    }

    /// Flips the vendor's availability and returns the resulting online
    /// state. Toggling to the current state is a no-op.
    pub async fn set_online(&self, online: bool) -> Result<bool> {
        if online {
            self.go_online().await
        } else {
            self.go_offline().await;
            Ok(false)
        }
    }

    pub async fn state(&self) -> FeedState {
        let state = self.shared.state.lock().await;
        FeedState {
            online: state.online,
            loading: state.in_flight > 0,
            orders: state.orders.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.shared.events.subscribe()
    }

    /// Disarms the timer. In-flight fetches resolve but no longer apply.
    pub async fn shutdown(&self) {
        self.go_offline().await;
    }

    async fn go_online(&self) -> Result<bool> {
        {
            let state = self.shared.state.lock().await;
            if state.online {
                return Ok(true);
            }
        }
        let stored = self.shared.session.vendor_id().await?;
        if stored.is_none() {
            info!("orders: no vendor id in session, staying offline");
            return Ok(false);
        }

        let mut state = self.shared.state.lock().await;
        if state.online {
            return Ok(true);
        }
        state.online = true;
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let loop_shared = Arc::clone(&self.shared);
        let task = tokio::spawn(run_poll_loop(loop_shared, generation));
        let previous = self.swap_poll_task(Some(task));
        drop(state);

        if let Some(previous) = previous {
            previous.abort();
        }
        let _ = self.shared.events.send(FeedEvent::OnlineChanged(true));
        info!("orders: polling armed");
        Ok(true)
    }

    async fn go_offline(&self) {
        let previous = {
            let mut state = self.shared.state.lock().await;
            if !state.online {
                return;
            }
            state.online = false;
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            self.swap_poll_task(None)
        };
        if let Some(task) = previous {
            task.abort();
        }
        let _ = self.shared.events.send(FeedEvent::OnlineChanged(false));
        info!("orders: polling disarmed");
    }

    fn swap_poll_task(&self, task: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut slot = match self.poll_task.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        match task {
            Some(task) => slot.replace(task),
            None => slot.take(),
        }
    }
}

impl Drop for OrderFeed {
    fn drop(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.swap_poll_task(None) {
            task.abort();
        }
    }
}

async fn run_poll_loop(shared: Arc<FeedShared>, generation: u64) {
    let mut ticker = tokio::time::interval(shared.poll_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !shared.generation_is_current(generation) {
            break;
        }
        // Fetches run detached so a disarm stops the timer without cancelling
        // a request that is already on the wire.
        let fetch_shared = Arc::clone(&shared);
        tokio::spawn(async move { fetch_shared.fetch_once(generation).await });
    }
}

impl FeedShared {
    fn generation_is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn fetch_once(&self, generation: u64) {
        let Some(seq) = self.begin_fetch(generation).await else {
            return;
        };
        let outcome = self.resolve_and_fetch().await;
        self.finish_fetch(generation, seq, outcome).await;
    }

    async fn begin_fetch(&self, generation: u64) -> Option<u64> {
        let mut state = self.state.lock().await;
        if !self.generation_is_current(generation) {
            return None;
        }
        state.next_seq += 1;
        state.in_flight += 1;
        Some(state.next_seq)
    }

    async fn resolve_and_fetch(&self) -> FetchOutcome {
        let vendor_id = match self.session.vendor_id().await {
            Ok(Some(vendor_id)) => vendor_id,
            Ok(None) => return FetchOutcome::SessionMissing,
            Err(err) => return FetchOutcome::Failed(err),
        };
        match self.api.orders_for_vendor(vendor_id).await {
            Ok(orders) => FetchOutcome::Fetched(orders),
            Err(err) => FetchOutcome::Failed(err),
        }
    }

    // The in-flight count always comes back down here, whatever the outcome.
    async fn finish_fetch(&self, generation: u64, seq: u64, outcome: FetchOutcome) {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        match outcome {
            FetchOutcome::Fetched(orders) => {
                if self.generation_is_current(generation) && seq > state.applied_seq {
                    state.applied_seq = seq;
                    state.orders = orders.clone();
                    drop(state);
                    info!(orders = orders.len(), "orders: snapshot replaced");
                    let _ = self.events.send(FeedEvent::SnapshotReplaced { orders });
                } else {
                    debug!(seq, "orders: discarding stale fetch result");
                }
            }
            FetchOutcome::SessionMissing => {
                debug!("orders: no vendor id in session, skipping fetch");
            }
            FetchOutcome::Failed(err) => {
                drop(state);
                warn!("orders: fetch failed: {err:#}");
                let _ = self.events.send(FeedEvent::FetchFailed {
                    reason: err.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/order_feed_tests.rs"]
mod tests;
