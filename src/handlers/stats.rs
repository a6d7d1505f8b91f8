use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::error::AppResult;
use crate::models::{BuildingMassStats, CollectedMassQuery, CollectedMassSummary};

pub async fn building_mass_stats(
    State((_buildings, _containers, _fullness, _takeouts, ledger_service)): State<crate::AppState>,
    Path(id): Path<i64>,
    Query(query): Query<CollectedMassQuery>,
) -> AppResult<Json<BuildingMassStats>> {
    let stats = ledger_service.building_mass_stats(id, query).await?;
    Ok(Json(stats))
}

pub async fn collected_mass(
    State((_buildings, _containers, _fullness, _takeouts, ledger_service)): State<crate::AppState>,
) -> AppResult<Json<CollectedMassSummary>> {
    let summary = ledger_service.collected_mass_summary().await?;
    Ok(Json(summary))
}
