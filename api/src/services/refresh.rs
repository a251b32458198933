use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use domain::{Holding, PortfolioView, PriceSource};
use thiserror::Error;
use tokio::{
    sync::RwLock,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{info, warn};
use uuid::Uuid;
use valuation::{allocation_by_type, enrich_holdings, summarize, PriceOracle};

use crate::repositories::HoldingsRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Mount,
    Focus,
    PullToRefresh,
    Timer,
}

impl RefreshTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshTrigger::Mount => "mount",
            RefreshTrigger::Focus => "focus",
            RefreshTrigger::PullToRefresh => "pull_to_refresh",
            RefreshTrigger::Timer => "timer",
        }
    }
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("failed to load holdings for user {user_id}: {message}")]
    HoldingsUnavailable { user_id: Uuid, message: String },
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Published(PortfolioView),
    /// A newer cycle started while this one was running; its result was dropped.
    Superseded,
    /// A price-only refresh was refused because a full refresh is in flight.
    Skipped,
}

#[derive(Default)]
struct ControllerState {
    holdings: Vec<Holding>,
    loaded: bool,
    view: Option<PortfolioView>,
}

/// Owns one user's displayed portfolio and the refresh cycles that keep it current.
///
/// Cycles are numbered as they start and only the newest one may publish.
pub struct PortfolioController {
    user_id: Uuid,
    holdings_repo: Arc<dyn HoldingsRepository>,
    oracle: Arc<dyn PriceOracle>,
    started: AtomicU64,
    full_in_flight: AtomicUsize,
    state: RwLock<ControllerState>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PortfolioController {
    pub fn new(
        user_id: Uuid,
        holdings_repo: Arc<dyn HoldingsRepository>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        Self {
            user_id,
            holdings_repo,
            oracle,
            started: AtomicU64::new(0),
            full_in_flight: AtomicUsize::new(0),
            state: RwLock::new(ControllerState::default()),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub async fn current(&self) -> Option<PortfolioView> {
        self.state.read().await.view.clone()
    }

    /// Full refresh: reload holdings, then prices.
    pub async fn refresh(&self, trigger: RefreshTrigger) -> Result<RefreshOutcome, RefreshError> {
        // Entering before numbering the cycle keeps a light refresh from claiming a newer one.
        let _in_flight = InFlight::enter(&self.full_in_flight);
        let generation = self.next_generation();
        info!(
            user_id = %self.user_id,
            generation,
            trigger = trigger.as_str(),
            "portfolio refresh start"
        );

        let holdings = match self.holdings_repo.list_holdings(self.user_id).await {
            Ok(holdings) => holdings,
            Err(err) => {
                warn!(
                    error = %err,
                    user_id = %self.user_id,
                    generation,
                    "holdings read failed"
                );
                metrics::counter!("portfolio_refresh_total", "kind" => "full", "outcome" => "error")
                    .increment(1);
                return Err(RefreshError::HoldingsUnavailable {
                    user_id: self.user_id,
                    message: format!("{err:#}"),
                });
            }
        };

        let outcome = self.price_and_publish(generation, holdings).await;
        record_outcome("full", &outcome);
        Ok(outcome)
    }

    /// Light refresh: keep the holdings already loaded and only re-query prices.
    ///
    /// Refused with [`RefreshOutcome::Skipped`] while any full refresh is in flight.
    pub async fn refresh_prices(&self) -> Result<RefreshOutcome, RefreshError> {
        if !self.state.read().await.loaded {
            return self.refresh(RefreshTrigger::Mount).await;
        }

        let Some(generation) = self.claim_light_generation() else {
            info!(user_id = %self.user_id, "price refresh skipped, full refresh in flight");
            let outcome = RefreshOutcome::Skipped;
            record_outcome("prices", &outcome);
            return Ok(outcome);
        };
        // Read after claiming, so any full refresh that published first is reflected here.
        let holdings = self.state.read().await.holdings.clone();
        info!(user_id = %self.user_id, generation, "price refresh start");
        let outcome = self.price_and_publish(generation, holdings).await;
        record_outcome("prices", &outcome);
        Ok(outcome)
    }

    fn next_generation(&self) -> u64 {
        self.started.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Numbers a light cycle only if no full refresh is in flight at that moment.
    ///
    /// A full refresh enters `full_in_flight` before taking its number, so a full
    /// refresh racing this claim either makes the exchange fail or is numbered after it.
    fn claim_light_generation(&self) -> Option<u64> {
        let mut current = self.started.load(Ordering::SeqCst);
        loop {
            if self.full_in_flight.load(Ordering::SeqCst) > 0 {
                return None;
            }
            match self.started.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(current + 1),
                Err(actual) => current = actual,
            }
        }
    }

    async fn price_and_publish(&self, generation: u64, holdings: Vec<Holding>) -> RefreshOutcome {
        let priced_input = self.with_prior_prices(&holdings).await;
        let enrichment = enrich_holdings(&priced_input, self.oracle.as_ref()).await;
        let summary = summarize(&enrichment.holdings);
        let allocation = allocation_by_type(&enrichment.holdings);

        let mut state = self.state.write().await;
        if self.started.load(Ordering::SeqCst) != generation {
            info!(user_id = %self.user_id, generation, "refresh superseded, result dropped");
            return RefreshOutcome::Superseded;
        }
        let view = PortfolioView {
            user_id: self.user_id,
            holdings: enrichment.holdings,
            summary,
            allocation,
            stale: enrichment.stale,
            refreshed_at: Utc::now(),
            generation,
        };
        info!(
            user_id = %self.user_id,
            generation,
            holdings = view.summary.holding_count,
            total_value = view.summary.total_value,
            stale = view.stale,
            "portfolio published"
        );
        state.holdings = holdings;
        state.loaded = true;
        state.view = Some(view.clone());
        RefreshOutcome::Published(view)
    }

    /// Prices shown in the last published view take precedence over the stored ones.
    async fn with_prior_prices(&self, holdings: &[Holding]) -> Vec<Holding> {
        let state = self.state.read().await;
        let prior: HashMap<Uuid, f64> = state
            .view
            .iter()
            .flat_map(|view| view.holdings.iter())
            .filter(|h| h.price_source != PriceSource::Missing)
            .map(|h| (h.holding.id, h.current_price))
            .collect();
        holdings
            .iter()
            .map(|holding| {
                let mut holding = holding.clone();
                if let Some(price) = prior.get(&holding.id) {
                    holding.last_known_price = Some(*price);
                }
                holding
            })
            .collect()
    }
}

fn record_outcome(kind: &'static str, outcome: &RefreshOutcome) {
    let label = match outcome {
        RefreshOutcome::Published(view) if view.stale => "stale",
        RefreshOutcome::Published(_) => "published",
        RefreshOutcome::Superseded => "superseded",
        RefreshOutcome::Skipped => "skipped",
    };
    metrics::counter!("portfolio_refresh_total", "kind" => kind, "outcome" => label).increment(1);
}

/// Periodic full refresh bound to the lifetime of a [`RefreshHandle`].
pub struct RefreshScheduler;

impl RefreshScheduler {
    /// The first run happens one `period` from now; the initial load is the caller's job.
    pub fn spawn(controller: Arc<PortfolioController>, period: Duration) -> RefreshHandle {
        let period = period.max(Duration::from_secs(1));
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = controller.refresh(RefreshTrigger::Timer).await {
                    warn!(
                        error = %err,
                        user_id = %controller.user_id(),
                        "scheduled refresh failed"
                    );
                }
            }
        });
        RefreshHandle { task }
    }
}

/// Aborts the scheduled task when cancelled or dropped.
pub struct RefreshHandle {
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
