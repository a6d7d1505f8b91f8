use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::info;

use crate::db::rows::{
    fetch_building, fetch_building_condition, fetch_buildings, fetch_condition, fetch_section,
    fetch_section_condition, fetch_sections,
};
use crate::db::DatabasePool;
use crate::domain::Clock;
use crate::error::{AppError, AppResult};
use crate::models::{
    Building, BuildingSection, BuildingWithSections, CreateBuildingRequest, CreateSectionRequest,
    SetPrecollectedMassRequest, TakeoutCondition, UpdateTakeoutConditionRequest,
};
use crate::services::fullness_service::FullnessService;

pub struct BuildingService {
    db: DatabasePool,
    clock: Arc<dyn Clock>,
    fullness: Arc<FullnessService>,
}

impl BuildingService {
    pub fn new(db: DatabasePool, clock: Arc<dyn Clock>, fullness: Arc<FullnessService>) -> Self {
        Self { db, clock, fullness }
    }

    /// Creates the building together with its (empty) takeout condition.
    pub async fn create_building(&self, request: CreateBuildingRequest) -> AppResult<Building> {
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            "INSERT INTO buildings (address, precollected_mass, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&request.address)
        .bind(request.precollected_mass)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        sqlx::query("INSERT INTO takeout_conditions (building_id) VALUES (?1)")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let building = fetch_building(&mut tx, id).await?;
        tx.commit().await?;

        info!(building_id = id, address = %building.address, "building created");
        Ok(building)
    }

    pub async fn list_buildings(&self) -> AppResult<Vec<BuildingWithSections>> {
        let mut conn = self.db.pool().acquire().await?;
        let mut buildings = Vec::new();
        for building in fetch_buildings(&mut conn).await? {
            buildings.push(with_sections(&mut conn, building).await?);
        }
        Ok(buildings)
    }

    pub async fn get_building(&self, id: i64) -> AppResult<BuildingWithSections> {
        let mut conn = self.db.pool().acquire().await?;
        let building = fetch_building(&mut conn, id).await?;
        with_sections(&mut conn, building).await
    }

    pub async fn set_precollected_mass(
        &self,
        id: i64,
        request: SetPrecollectedMassRequest,
    ) -> AppResult<Building> {
        let now = self.clock.now();
        let mut conn = self.db.pool().acquire().await?;

        let result = sqlx::query(
            "UPDATE buildings SET precollected_mass = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(request.precollected_mass)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Building with id {} not found", id)));
        }
        fetch_building(&mut conn, id).await
    }

    pub async fn create_section(
        &self,
        building_id: i64,
        request: CreateSectionRequest,
    ) -> AppResult<BuildingSection> {
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;
        fetch_building(&mut tx, building_id).await?;

        let result = sqlx::query(
            "INSERT INTO building_sections (building_id, num, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(building_id)
        .bind(request.num)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::Conflict(format!(
                "Building {} already has section {}",
                building_id, request.num
            )),
            e => AppError::DatabaseError(e),
        })?;
        let id = result.last_insert_rowid();

        sqlx::query("INSERT INTO takeout_conditions (section_id) VALUES (?1)")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let section = fetch_section(&mut tx, id).await?;
        tx.commit().await?;

        info!(building_id, section_id = id, num = request.num, "section created");
        Ok(section)
    }

    pub async fn list_sections(&self, building_id: i64) -> AppResult<Vec<BuildingSection>> {
        let mut conn = self.db.pool().acquire().await?;
        fetch_building(&mut conn, building_id).await?;
        fetch_sections(&mut conn, building_id).await
    }

    pub async fn building_condition(&self, building_id: i64) -> AppResult<TakeoutCondition> {
        let mut conn = self.db.pool().acquire().await?;
        fetch_building(&mut conn, building_id).await?;
        fetch_building_condition(&mut conn, building_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Takeout condition for building {} not found",
                    building_id
                ))
            })
    }

    pub async fn section_condition(&self, section_id: i64) -> AppResult<TakeoutCondition> {
        let mut conn = self.db.pool().acquire().await?;
        fetch_section(&mut conn, section_id).await?;
        fetch_section_condition(&mut conn, section_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Takeout condition for section {} not found",
                    section_id
                ))
            })
    }

    /// Replaces every rule of the condition; an absent value disables that rule.
    /// Containers under the condition are re-evaluated against the new
    /// thresholds afterwards.
    pub async fn update_condition(
        &self,
        id: i64,
        request: UpdateTakeoutConditionRequest,
    ) -> AppResult<TakeoutCondition> {
        let (condition, affected) = {
            let mut conn = self.db.pool().acquire().await?;
            let result = sqlx::query(
                r#"
                UPDATE takeout_conditions
                SET office_days = ?2, public_days = ?3, mass = ?4, ignore_reports = ?5
                WHERE id = ?1
                "#,
            )
            .bind(id)
            .bind(request.office_days)
            .bind(request.public_days)
            .bind(request.mass)
            .bind(request.ignore_reports)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(AppError::NotFound(format!(
                    "Takeout condition with id {} not found",
                    id
                )));
            }
            let condition = fetch_condition(&mut conn, id).await?;
            let affected = condition_containers(&mut conn, &condition).await?;
            (condition, affected)
        };

        info!(condition_id = id, containers = affected.len(), "takeout condition updated");
        self.fullness.resettle_containers(&affected).await?;
        Ok(condition)
    }
}

async fn condition_containers(
    conn: &mut SqliteConnection,
    condition: &TakeoutCondition,
) -> AppResult<Vec<i64>> {
    let ids: Vec<i64> = match (condition.building_id, condition.section_id) {
        (Some(building_id), _) => {
            sqlx::query_scalar("SELECT id FROM containers WHERE building_id = ?1 ORDER BY id")
                .bind(building_id)
                .fetch_all(&mut *conn)
                .await?
        }
        (None, Some(section_id)) => {
            sqlx::query_scalar("SELECT id FROM containers WHERE section_id = ?1 ORDER BY id")
                .bind(section_id)
                .fetch_all(&mut *conn)
                .await?
        }
        (None, None) => Vec::new(),
    };
    Ok(ids)
}

async fn with_sections(
    conn: &mut SqliteConnection,
    building: Building,
) -> AppResult<BuildingWithSections> {
    let sections = fetch_sections(conn, building.id).await?;
    let container_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM containers WHERE building_id = ?1")
            .bind(building.id)
            .fetch_one(&mut *conn)
            .await?;

    Ok(BuildingWithSections {
        building,
        sections,
        container_count,
    })
}
