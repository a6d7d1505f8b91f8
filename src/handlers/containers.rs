use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use validator::Validate;

use crate::error::AppResult;
use crate::models::{
    ClaimContainerRequest, Container, ContainerFilters, ContainerStats, CreateContainerRequest,
    FullReportRequest, UpdateContainerRequest,
};
use crate::services::FullReportResult;

#[derive(Debug, Serialize)]
pub struct ListContainersResponse {
    pub containers: Vec<Container>,
}

pub async fn create_container(
    State((_buildings, container_service, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Json(request): Json<CreateContainerRequest>,
) -> AppResult<(StatusCode, Json<Container>)> {
    request.validate()?;

    let container = container_service.create_container(request).await?;
    Ok((StatusCode::CREATED, Json(container)))
}

pub async fn get_container(
    State((_buildings, container_service, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Container>> {
    let container = container_service.get_container(id).await?;
    Ok(Json(container))
}

pub async fn list_containers(
    State((_buildings, container_service, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Query(filters): Query<ContainerFilters>,
) -> AppResult<Json<ListContainersResponse>> {
    let containers = container_service.list_containers(filters).await?;
    Ok(Json(ListContainersResponse { containers }))
}

pub async fn update_container(
    State((_buildings, container_service, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateContainerRequest>,
) -> AppResult<Json<Container>> {
    request.validate()?;

    let container = container_service.update_container(id, request).await?;
    Ok(Json(container))
}

pub async fn delete_container(
    State((_buildings, container_service, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    container_service.delete_container(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate_container(
    State((_buildings, container_service, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Container>> {
    let container = container_service.activate_container(id).await?;
    Ok(Json(container))
}

pub async fn claim_container(
    State((_buildings, container_service, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ClaimContainerRequest>,
) -> AppResult<Json<Container>> {
    request.validate()?;

    let container = container_service.claim_reserved(id, request).await?;
    Ok(Json(container))
}

pub async fn container_stats(
    State((_buildings, container_service, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ContainerStats>> {
    let stats = container_service.container_stats(id).await?;
    Ok(Json(stats))
}

pub async fn report_full(
    State((_buildings, _containers, fullness_service, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
    request: Option<Json<FullReportRequest>>,
) -> AppResult<(StatusCode, Json<FullReportResult>)> {
    let by_staff = request.map(|Json(r)| r.by_staff).unwrap_or(false);

    let result = fullness_service.on_full_report(id, by_staff).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn correct_fullness(
    State((_buildings, _containers, fullness_service, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Container>> {
    let container = fullness_service.on_fullness_correction(id).await?;
    Ok(Json(container))
}
