use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{sync::mpsc, time::interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    cache::TtlCache,
    config::Config,
    error::StorageError,
    leaderboard::compute_leaderboard,
    limiter::RateLimiter,
    models::{College, LeaderboardEntry},
    monitoring::Monitor,
    storage::Store,
};

const JANITOR_PERIOD: Duration = Duration::from_secs(5 * 60);

pub struct State {
    pub config: Config,
    pub store: Store,
    pub limiter: RateLimiter,
    pub monitor: Monitor,
    pub colleges: TtlCache<Vec<College>>,
    pub leaderboards: TtlCache<Vec<LeaderboardEntry>>,
    refresher: mpsc::UnboundedSender<Uuid>,
}

impl State {
    pub async fn new(config: Config) -> Result<Arc<Self>, StorageError> {
        let store = Store::connect(&config).await?;
        info!(engine = store.engine(), "Store connected");

        Ok(Self::with_store(config, store))
    }

    /// Builds the state and starts its background tasks. Both tasks hold a
    /// weak reference and stop once the last strong one is dropped.
    pub fn with_store(config: Config, store: Store) -> Arc<Self> {
        let (refresher, jobs) = mpsc::unbounded_channel();

        let state = Arc::new(Self {
            config,
            store,
            limiter: RateLimiter::default(),
            monitor: Monitor::default(),
            colleges: TtlCache::default(),
            leaderboards: TtlCache::default(),
            refresher,
        });

        tokio::spawn(refresh_leaderboards(Arc::downgrade(&state), jobs));
        tokio::spawn(janitor(Arc::downgrade(&state)));

        state
    }

    /// Queues a background leaderboard recomputation for a college.
    pub fn schedule_refresh(&self, college_id: Uuid) {
        if self.refresher.send(college_id).is_err() {
            warn!(%college_id, "Leaderboard refresher is gone");
        }
    }
}

async fn refresh_leaderboards(state: Weak<State>, mut jobs: mpsc::UnboundedReceiver<Uuid>) {
    while let Some(college_id) = jobs.recv().await {
        let Some(state) = state.upgrade() else {
            break;
        };

        match compute_leaderboard(&state, college_id).await {
            Ok(()) => debug!(%college_id, "Leaderboard refreshed"),
            Err(e) => warn!(%college_id, error = %e, "Leaderboard refresh failed"),
        }
    }
}

async fn janitor(state: Weak<State>) {
    let mut ticker = interval(JANITOR_PERIOD);
    // First tick fires immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(state) = state.upgrade() else {
            break;
        };

        let expired = state.colleges.cleanup() + state.leaderboards.cleanup();
        let windows = state.limiter.sweep();
        debug!(expired, windows, "Janitor pass");
    }
}
