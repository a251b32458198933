use std::{env, sync::Arc};

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracker_api::{
    bootstrap::build_state,
    config::AppConfig,
    services::{PortfolioController, RefreshOutcome, RefreshTrigger},
    telemetry,
};
use uuid::Uuid;

/// Runs one full refresh for `REPORT_USER_ID` and logs the resulting view.
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing()?;

    let config = AppConfig::from_env()?;
    let user_id = env::var("REPORT_USER_ID")
        .ok()
        .or_else(|| config.demo_user_id.map(|id| id.to_string()))
        .context("REPORT_USER_ID is not set")?;
    let user_id = Uuid::parse_str(user_id.trim()).context("REPORT_USER_ID must be a valid uuid")?;

    let state = build_state(&config).await?;
    let controller = PortfolioController::new(
        user_id,
        Arc::clone(&state.holdings_repo),
        Arc::clone(&state.oracle),
    );

    let RefreshOutcome::Published(view) = controller.refresh(RefreshTrigger::Mount).await? else {
        warn!(%user_id, "refresh did not publish a view");
        return Ok(());
    };

    for holding in &view.holdings {
        info!(
            symbol = %holding.holding.symbol,
            quantity = holding.holding.quantity,
            current_price = holding.current_price,
            price_source = ?holding.price_source,
            total_value = holding.total_value,
            profit_loss = holding.profit_loss,
            "holding"
        );
    }
    for slice in &view.allocation {
        info!(
            asset_type = %slice.asset_type_name,
            value = slice.value,
            percentage = slice.percentage,
            "allocation"
        );
    }
    info!(
        %user_id,
        stale = view.stale,
        total_value = view.summary.total_value,
        total_cost = view.summary.total_cost,
        total_profit_loss = view.summary.total_profit_loss,
        total_profit_loss_percentage = view.summary.total_profit_loss_percentage,
        "portfolio summary"
    );
    Ok(())
}
