use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum ContainerKind {
    Ecobox,
    PublicEcobox,
    OfficeBox,
}

impl ContainerKind {
    /// Paper mass in kg a full container of this kind holds.
    pub const fn mass(self) -> i64 {
        match self {
            ContainerKind::Ecobox => 45,
            ContainerKind::PublicEcobox => 15,
            ContainerKind::OfficeBox => 20,
        }
    }

    pub const fn is_public(self) -> bool {
        matches!(self, ContainerKind::PublicEcobox)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum ContainerStatus {
    Waiting,
    Active,
    Inactive,
    Reserved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: i64,
    pub kind: ContainerKind,
    pub status: ContainerStatus,
    pub building_id: i64,
    pub section_id: Option<i64>,
    pub floor: i64,
    pub room: Option<String>,
    pub description: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    /// Cached fullness, only for filtering and sorting.
    pub is_full: bool,
    pub avg_fill_time_secs: Option<i64>,
    pub avg_takeout_wait_time_secs: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Container {
    pub fn is_active(&self) -> bool {
        self.status == ContainerStatus::Active
    }

    pub fn mass(&self) -> i64 {
        self.kind.mass()
    }
}

/// One fullness episode of a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullReport {
    pub id: i64,
    pub container_id: i64,
    pub reported_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub emptied_at: Option<DateTime<Utc>>,
    pub count: i64,
    pub by_staff: bool,
}

impl FullReport {
    pub fn is_open(&self) -> bool {
        self.emptied_at.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateContainerRequest {
    pub kind: ContainerKind,
    pub building_id: i64,
    pub section_id: Option<i64>,
    #[validate(range(min = -5, max = 100))]
    pub floor: i64,
    #[validate(length(max = 100))]
    pub room: Option<String>,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(regex(path = "*crate::models::PHONE_REGEX"))]
    pub phone: Option<String>,
    /// Pre-printed placeholder awaiting self-registration.
    #[serde(default)]
    pub reserved: bool,
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct UpdateContainerRequest {
    pub kind: Option<ContainerKind>,
    pub status: Option<ContainerStatus>,
    pub building_id: Option<i64>,
    pub section_id: Option<i64>,
    #[validate(range(min = -5, max = 100))]
    pub floor: Option<i64>,
    #[validate(length(max = 100))]
    pub room: Option<String>,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(regex(path = "*crate::models::PHONE_REGEX"))]
    pub phone: Option<String>,
}

/// Self-registration of a pre-printed container.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ClaimContainerRequest {
    pub kind: ContainerKind,
    pub building_id: i64,
    pub section_id: Option<i64>,
    #[validate(range(min = -5, max = 100))]
    pub floor: i64,
    #[validate(length(max = 100))]
    pub room: Option<String>,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    #[validate(email)]
    pub email: String,
    #[validate(regex(path = "*crate::models::PHONE_REGEX"))]
    pub phone: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ContainerFilters {
    pub building_id: Option<i64>,
    pub section_id: Option<i64>,
    pub status: Option<ContainerStatus>,
    pub is_full: Option<bool>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullReportRequest {
    #[serde(default)]
    pub by_staff: bool,
}

/// Derived per-container metrics, durations in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStats {
    pub id: i64,
    pub kind: ContainerKind,
    pub mass: i64,
    pub status: ContainerStatus,
    pub is_full: bool,
    pub cur_fill_time: Option<i64>,
    pub avg_fill_time: Option<i64>,
    pub cur_takeout_wait_time: Option<i64>,
    pub avg_takeout_wait_time: Option<i64>,
    pub collected_mass: i64,
}
