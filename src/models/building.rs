use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::Container;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Building {
    pub id: i64,
    pub address: String,
    /// Mass collected before tracking started, kg.
    pub precollected_mass: Option<i64>,
    pub takeout_notified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildingSection {
    pub id: i64,
    pub building_id: i64,
    pub num: i64,
    pub takeout_notified: bool,
    pub created_at: DateTime<Utc>,
}

/// Pickup thresholds; `None` means the rule is not configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TakeoutCondition {
    pub id: i64,
    pub building_id: Option<i64>,
    pub section_id: Option<i64>,
    pub office_days: Option<i64>,
    pub public_days: Option<i64>,
    pub mass: Option<i64>,
    pub ignore_reports: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBuildingRequest {
    #[validate(length(min = 1, max = 255))]
    pub address: String,
    #[validate(range(min = 0))]
    pub precollected_mass: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetPrecollectedMassRequest {
    #[validate(range(min = 0))]
    pub precollected_mass: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSectionRequest {
    #[validate(range(min = 1))]
    pub num: i64,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateTakeoutConditionRequest {
    #[validate(range(min = 1))]
    pub office_days: Option<i64>,
    #[validate(range(min = 1))]
    pub public_days: Option<i64>,
    #[validate(range(min = 1))]
    pub mass: Option<i64>,
    #[validate(range(min = 0))]
    pub ignore_reports: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct BuildingWithSections {
    #[serde(flatten)]
    pub building: Building,
    pub sections: Vec<BuildingSection>,
    pub container_count: i64,
}

/// Evaluator output for one building or section.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeTakeoutStatus {
    pub current_mass: i64,
    pub meets_mass_condition: bool,
    pub meets_time_condition: bool,
    pub needs_takeout: bool,
    pub takeout_notified: bool,
    pub mass_condition_committed: bool,
    pub containers_for_takeout: Vec<Container>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionTakeoutStatus {
    pub section_id: i64,
    pub num: i64,
    #[serde(flatten)]
    pub status: ScopeTakeoutStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildingTakeoutStatus {
    pub building_id: i64,
    #[serde(flatten)]
    pub status: ScopeTakeoutStatus,
    pub sections: Vec<SectionTakeoutStatus>,
}
