use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use domain::{ErrorResponse, MarketAsset};
use serde::Deserialize;
use tracing::warn;

use crate::{repositories::market_asset_repository::CATALOG_LIMIT, state::AppState};

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Default, Deserialize)]
pub struct AssetQuery {
    pub query: Option<String>,
    #[serde(rename = "type")]
    pub asset_type: Option<String>,
    pub limit: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/assets", get(list_assets))
        .route("/assets/:symbol", get(get_asset))
}

fn catalog_error(err: anyhow::Error) -> ApiError {
    warn!(error = ?err, "market asset lookup failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "failed to load market assets".to_string(),
        }),
    )
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `query` searches symbol and name, `type` narrows by asset type, neither lists the catalog.
async fn list_assets(
    State(state): State<AppState>,
    Query(params): Query<AssetQuery>,
) -> Result<Json<Vec<MarketAsset>>, ApiError> {
    let repo = &state.market_assets;
    let assets = match (non_blank(params.query), non_blank(params.asset_type)) {
        (Some(query), asset_type) => {
            let mut found = repo.search(&query).await.map_err(catalog_error)?;
            if let Some(asset_type) = asset_type {
                found.retain(|asset| asset.asset_type_name == asset_type.trim());
            }
            found
        }
        (None, Some(asset_type)) => repo
            .list_by_type(&asset_type)
            .await
            .map_err(catalog_error)?,
        (None, None) => {
            let limit = params.limit.unwrap_or(CATALOG_LIMIT).clamp(1, CATALOG_LIMIT);
            repo.list_active(limit).await.map_err(catalog_error)?
        }
    };
    Ok(Json(assets))
}

async fn get_asset(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<MarketAsset>, ApiError> {
    state
        .market_assets
        .find_by_symbol(&symbol)
        .await
        .map_err(catalog_error)?
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("unknown asset {}", symbol.trim().to_uppercase()),
                }),
            )
        })
}
