//! Cost and quota reporting endpoints

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use crate::handlers::AppState;
use crate::ledger::{LedgerReport, ProviderTotals};
use crate::quota::QuotaStatus;

#[derive(Debug, Default, Deserialize)]
pub struct CostsParams {
    /// Ledger period key, e.g. `2026-10` for monthly ledgers
    pub period: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CostsResponse {
    pub report: LedgerReport,
    /// All-time totals per provider
    pub totals: Vec<ProviderTotals>,
}

/// GET /costs
///
/// Defaults to the current ledger period.
pub async fn costs_handler(
    State(state): State<AppState>,
    Query(params): Query<CostsParams>,
) -> Json<CostsResponse> {
    let ledger = state.engine().ledger();
    let period = params
        .period
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| ledger.current_period());

    Json(CostsResponse {
        report: ledger.report(&period),
        totals: ledger.totals_by_provider(),
    })
}

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub providers: Vec<QuotaStatus>,
}

/// GET /quota
pub async fn quota_handler(State(state): State<AppState>) -> Json<QuotaResponse> {
    Json(QuotaResponse {
        providers: state.engine().quota().statuses(),
    })
}
