use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    sync::RwLock,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::info;
use uuid::Uuid;
use valuation::PriceOracle;

use crate::repositories::HoldingsRepository;

use super::refresh::{
    PortfolioController, RefreshError, RefreshHandle, RefreshOutcome, RefreshScheduler,
    RefreshTrigger,
};

struct Session {
    controller: Arc<PortfolioController>,
    last_seen: Instant,
    _timer: RefreshHandle,
}

/// Open portfolio views keyed by user. Closing or evicting a session stops its timer.
pub struct PortfolioSessions {
    holdings_repo: Arc<dyn HoldingsRepository>,
    oracle: Arc<dyn PriceOracle>,
    refresh_interval: Duration,
    idle_ttl: Duration,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl PortfolioSessions {
    pub fn new(
        holdings_repo: Arc<dyn HoldingsRepository>,
        oracle: Arc<dyn PriceOracle>,
        refresh_interval: Duration,
        idle_ttl: Duration,
    ) -> Self {
        Self {
            holdings_repo,
            oracle,
            refresh_interval,
            idle_ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Mounts a new session, or refreshes an existing one as a focus event.
    pub async fn open(
        &self,
        user_id: Uuid,
    ) -> Result<(Arc<PortfolioController>, RefreshOutcome), RefreshError> {
        let (controller, trigger) = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(&user_id) {
                Some(session) => {
                    session.last_seen = Instant::now();
                    (session.controller.clone(), RefreshTrigger::Focus)
                }
                None => {
                    let controller = Arc::new(PortfolioController::new(
                        user_id,
                        self.holdings_repo.clone(),
                        self.oracle.clone(),
                    ));
                    let timer = RefreshScheduler::spawn(controller.clone(), self.refresh_interval);
                    sessions.insert(
                        user_id,
                        Session {
                            controller: controller.clone(),
                            last_seen: Instant::now(),
                            _timer: timer,
                        },
                    );
                    info!(
                        %user_id,
                        interval_secs = self.refresh_interval.as_secs(),
                        "portfolio session opened"
                    );
                    (controller, RefreshTrigger::Mount)
                }
            }
        };
        let outcome = controller.refresh(trigger).await?;
        Ok((controller, outcome))
    }

    /// Looks up an open session and marks it as used.
    pub async fn get(&self, user_id: Uuid) -> Option<Arc<PortfolioController>> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&user_id)?;
        session.last_seen = Instant::now();
        Some(session.controller.clone())
    }

    pub async fn close(&self, user_id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&user_id);
        if removed.is_some() {
            info!(%user_id, "portfolio session closed");
        }
        removed.is_some()
    }

    /// Drops every session idle for longer than the TTL and returns how many went.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|user_id, session| {
            let keep = now.duration_since(session.last_seen) <= self.idle_ttl;
            if !keep {
                info!(%user_id, "idle portfolio session evicted");
            }
            keep
        });
        before - sessions.len()
    }

    /// Evicts idle sessions every half TTL until the registry itself is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let period = (self.idle_ttl / 2).max(Duration::from_secs(1));
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(sessions) = registry.upgrade() else {
                    break;
                };
                let evicted = sessions.evict_idle().await;
                if evicted > 0 {
                    metrics::counter!("portfolio_sessions_evicted_total").increment(evicted as u64);
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
