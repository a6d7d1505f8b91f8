use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::error::AppResult;
use crate::models::{
    ConfirmContainersTakeoutRequest, ConfirmTankTakeoutRequest, ContainersTakeoutRequest,
    CreateContainersTakeoutRequest, CreateTankTakeoutRequest, TankTakeoutReport,
    TankTakeoutRequest,
};

pub async fn create_containers_takeout(
    State((_buildings, _containers, _fullness, takeout_service, _ledger)): State<crate::AppState>,
    Json(req): Json<CreateContainersTakeoutRequest>,
) -> AppResult<(StatusCode, Json<ContainersTakeoutRequest>)> {
    req.validate()?;

    let takeout = takeout_service.create_containers_takeout(req).await?;
    Ok((StatusCode::CREATED, Json(takeout)))
}

pub async fn get_containers_takeout(
    State((_buildings, _containers, _fullness, takeout_service, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ContainersTakeoutRequest>> {
    let takeout = takeout_service.get_containers_takeout(id).await?;
    Ok(Json(takeout))
}

pub async fn list_containers_takeouts(
    State((_buildings, _containers, _fullness, takeout_service, _ledger)): State<crate::AppState>,
    Path(building_id): Path<i64>,
) -> AppResult<Json<Vec<ContainersTakeoutRequest>>> {
    let takeouts = takeout_service.list_containers_takeouts(building_id).await?;
    Ok(Json(takeouts))
}

pub async fn confirm_containers_takeout(
    State((_buildings, _containers, _fullness, takeout_service, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ConfirmContainersTakeoutRequest>,
) -> AppResult<Json<ContainersTakeoutRequest>> {
    req.validate()?;

    let takeout = takeout_service.confirm_containers_takeout(id, req).await?;
    Ok(Json(takeout))
}

pub async fn create_tank_takeout(
    State((_buildings, _containers, _fullness, takeout_service, _ledger)): State<crate::AppState>,
    Json(req): Json<CreateTankTakeoutRequest>,
) -> AppResult<(StatusCode, Json<TankTakeoutRequest>)> {
    let tank = takeout_service.create_tank_takeout(req).await?;
    Ok((StatusCode::CREATED, Json(tank)))
}

pub async fn list_tank_takeouts(
    State((_buildings, _containers, _fullness, _takeouts, ledger_service)): State<crate::AppState>,
    Path(building_id): Path<i64>,
) -> AppResult<Json<Vec<TankTakeoutReport>>> {
    let reports = ledger_service.tank_reports(building_id).await?;
    Ok(Json(reports))
}

pub async fn get_tank_takeout_report(
    State((_buildings, _containers, _fullness, _takeouts, ledger_service)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<TankTakeoutReport>> {
    let report = ledger_service.tank_report(id).await?;
    Ok(Json(report))
}

pub async fn confirm_tank_takeout(
    State((_buildings, _containers, _fullness, takeout_service, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ConfirmTankTakeoutRequest>,
) -> AppResult<Json<TankTakeoutRequest>> {
    req.validate()?;

    let tank = takeout_service.confirm_tank_takeout(id, req).await?;
    Ok(Json(tank))
}
