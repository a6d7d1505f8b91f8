use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::domain::CoreEvent;
use crate::error::AppResult;
use crate::models::{
    Building, BuildingSection, BuildingTakeoutStatus, BuildingWithSections, CreateBuildingRequest,
    CreateSectionRequest, MassRuleCommit, SetPrecollectedMassRequest, TakeoutCondition,
    UpdateTakeoutConditionRequest,
};

pub async fn list_buildings(
    State((building_service, _containers, _fullness, _takeouts, _ledger)): State<crate::AppState>,
) -> AppResult<Json<Vec<BuildingWithSections>>> {
    let buildings = building_service.list_buildings().await?;
    Ok(Json(buildings))
}

pub async fn create_building(
    State((building_service, _containers, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Json(req): Json<CreateBuildingRequest>,
) -> AppResult<(StatusCode, Json<Building>)> {
    req.validate()?;

    let building = building_service.create_building(req).await?;
    Ok((StatusCode::CREATED, Json(building)))
}

pub async fn get_building(
    State((building_service, _containers, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<BuildingWithSections>> {
    let building = building_service.get_building(id).await?;
    Ok(Json(building))
}

pub async fn set_precollected_mass(
    State((building_service, _containers, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SetPrecollectedMassRequest>,
) -> AppResult<Json<Building>> {
    req.validate()?;

    let building = building_service.set_precollected_mass(id, req).await?;
    Ok(Json(building))
}

pub async fn list_sections(
    State((building_service, _containers, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<BuildingSection>>> {
    let sections = building_service.list_sections(id).await?;
    Ok(Json(sections))
}

pub async fn create_section(
    State((building_service, _containers, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
    Json(req): Json<CreateSectionRequest>,
) -> AppResult<(StatusCode, Json<BuildingSection>)> {
    req.validate()?;

    let section = building_service.create_section(id, req).await?;
    Ok((StatusCode::CREATED, Json(section)))
}

pub async fn get_building_condition(
    State((building_service, _containers, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<TakeoutCondition>> {
    let condition = building_service.building_condition(id).await?;
    Ok(Json(condition))
}

pub async fn get_section_condition(
    State((building_service, _containers, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<TakeoutCondition>> {
    let condition = building_service.section_condition(id).await?;
    Ok(Json(condition))
}

pub async fn update_condition(
    State((building_service, _containers, _fullness, _takeouts, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTakeoutConditionRequest>,
) -> AppResult<Json<TakeoutCondition>> {
    req.validate()?;

    let condition = building_service.update_condition(id, req).await?;
    Ok(Json(condition))
}

pub async fn takeout_status(
    State((_buildings, _containers, _fullness, takeout_service, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<BuildingTakeoutStatus>> {
    let status = takeout_service.takeout_status(id).await?;
    Ok(Json(status))
}

/// Runs the notify gate on demand; returns the signals it fired.
pub async fn check_conditions(
    State((_buildings, _containers, _fullness, takeout_service, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<CoreEvent>>> {
    let fired = takeout_service.check_conditions_to_notify(id).await?;
    Ok(Json(fired))
}

pub async fn list_mass_rule_commits(
    State((_buildings, _containers, _fullness, takeout_service, _ledger)): State<crate::AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<MassRuleCommit>>> {
    let commits = takeout_service.mass_rule_commits(id).await?;
    Ok(Json(commits))
}
