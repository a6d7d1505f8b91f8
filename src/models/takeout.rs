use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainersTakeoutRequest {
    pub id: i64,
    pub building_id: i64,
    pub section_id: Option<i64>,
    pub container_ids: Vec<i64>,
    pub emptied_container_ids: Vec<i64>,
    pub worker_info: String,
    /// No container in scope was left full once this pickup was confirmed.
    pub resolved_scope: bool,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TankTakeoutRequest {
    pub id: i64,
    pub building_id: i64,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_mass: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MassRuleCommit {
    pub id: i64,
    pub building_id: i64,
    pub section_id: Option<i64>,
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateContainersTakeoutRequest {
    pub building_id: i64,
    pub section_id: Option<i64>,
    /// Explicit nomination; when absent every full container in scope is taken.
    pub container_ids: Option<Vec<i64>>,
    #[validate(length(max = 2048))]
    #[serde(default)]
    pub worker_info: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ConfirmContainersTakeoutRequest {
    pub emptied_container_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub already_empty_container_ids: Vec<i64>,
    #[serde(default)]
    pub unavailable_container_ids: Vec<i64>,
    #[validate(length(max = 2048))]
    pub worker_info: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTankTakeoutRequest {
    pub building_id: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmTankTakeoutRequest {
    #[validate(range(min = 0, max = 100000))]
    pub confirmed_mass: i64,
}

/// Reconciliation row for one tank offload, durations in seconds.
#[derive(Debug, Clone, Serialize)]
pub struct TankTakeoutReport {
    #[serde(flatten)]
    pub request: TankTakeoutRequest,
    pub mass: i64,
    pub confirmed_mass_match: Option<f64>,
    pub mass_difference: Option<i64>,
    pub wait_time: Option<i64>,
    pub fill_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildingMassStats {
    pub building_id: i64,
    pub calculated_collected_mass: i64,
    pub confirmed_collected_mass: i64,
    pub avg_fill_speed: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CollectedMassSummary {
    /// Tonnes, truncated to one decimal.
    pub total_mass: f64,
    pub trees: i64,
    pub energy: i64,
    pub water: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectedMassQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub yearly: bool,
}
