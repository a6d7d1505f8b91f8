use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::info;

use crate::db::rows::{
    fetch_building, fetch_container, fetch_section, load_ledger, load_tracker, row_to_container,
    CONTAINER_COLUMNS,
};
use crate::db::DatabasePool;
use crate::domain::Clock;
use crate::error::{AppError, AppResult};
use crate::models::{
    ClaimContainerRequest, Container, ContainerFilters, ContainerStats, ContainerStatus,
    CreateContainerRequest, UpdateContainerRequest,
};
use crate::services::fullness_service::{resettle_fullness, FullnessService};
use crate::services::locks::ContainerLocks;

pub struct ContainerService {
    db: DatabasePool,
    clock: Arc<dyn Clock>,
    locks: Arc<ContainerLocks>,
    fullness: Arc<FullnessService>,
}

impl ContainerService {
    pub fn new(
        db: DatabasePool,
        clock: Arc<dyn Clock>,
        locks: Arc<ContainerLocks>,
        fullness: Arc<FullnessService>,
    ) -> Self {
        Self {
            db,
            clock,
            locks,
            fullness,
        }
    }

    /// Registers a container. It stays `waiting` until staff activate it,
    /// or `reserved` when printed ahead for later self-registration.
    pub async fn create_container(&self, request: CreateContainerRequest) -> AppResult<Container> {
        let now = self.clock.now();
        let mut conn = self.db.pool().acquire().await?;
        check_placement(&mut conn, request.building_id, request.section_id).await?;

        let status = if request.reserved {
            ContainerStatus::Reserved
        } else {
            ContainerStatus::Waiting
        };

        let result = sqlx::query(
            r#"
            INSERT INTO containers (
                kind, status, building_id, section_id, floor, room, description,
                email, phone, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(request.kind)
        .bind(status)
        .bind(request.building_id)
        .bind(request.section_id)
        .bind(request.floor)
        .bind(&request.room)
        .bind(&request.description)
        .bind(&request.email)
        .bind(&request.phone)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::InternalServerError(
                "Failed to create container".to_string(),
            ));
        }

        let id = result.last_insert_rowid();
        info!(container_id = id, kind = ?request.kind, ?status, "container registered");
        fetch_container(&mut conn, id).await
    }

    pub async fn get_container(&self, id: i64) -> AppResult<Container> {
        let mut conn = self.db.pool().acquire().await?;
        fetch_container(&mut conn, id).await
    }

    pub async fn list_containers(&self, filters: ContainerFilters) -> AppResult<Vec<Container>> {
        let mut query_str = format!("SELECT {} FROM containers WHERE 1=1", CONTAINER_COLUMNS);

        if filters.building_id.is_some() {
            query_str.push_str(" AND building_id = ?");
        }
        if filters.section_id.is_some() {
            query_str.push_str(" AND section_id = ?");
        }
        if filters.status.is_some() {
            query_str.push_str(" AND status = ?");
        }
        if filters.is_full.is_some() {
            query_str.push_str(" AND is_full = ?");
        }

        let sort_column = match filters.sort_by.as_deref().unwrap_or("id") {
            "kind" => "kind",
            "status" => "status",
            "floor" => "floor",
            "is_full" => "is_full",
            "avg_fill_time" => "avg_fill_time_secs",
            "avg_takeout_wait_time" => "avg_takeout_wait_time_secs",
            "created_at" => "created_at",
            "updated_at" => "updated_at",
            _ => "id",
        };
        let sort_direction = match filters.sort_order.as_deref() {
            Some(order) if order.eq_ignore_ascii_case("desc") => "DESC",
            _ => "ASC",
        };
        query_str.push_str(&format!(" ORDER BY {} {}, id ASC", sort_column, sort_direction));

        let mut query = sqlx::query(&query_str);
        if let Some(building_id) = filters.building_id {
            query = query.bind(building_id);
        }
        if let Some(section_id) = filters.section_id {
            query = query.bind(section_id);
        }
        if let Some(status) = filters.status {
            query = query.bind(status);
        }
        if let Some(is_full) = filters.is_full {
            query = query.bind(is_full);
        }

        let rows = query.fetch_all(self.db.pool()).await?;
        Ok(rows.iter().map(row_to_container).collect())
    }

    pub async fn update_container(
        &self,
        id: i64,
        request: UpdateContainerRequest,
    ) -> AppResult<Container> {
        let guard = self.locks.lock(id).await;
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;

        let mut container = fetch_container(&mut tx, id).await?;
        if let Some(kind) = request.kind {
            container.kind = kind;
        }
        if let Some(building_id) = request.building_id {
            if building_id != container.building_id {
                container.section_id = None;
            }
            container.building_id = building_id;
        }
        if request.section_id.is_some() {
            container.section_id = request.section_id;
        }
        if let Some(floor) = request.floor {
            container.floor = floor;
        }
        if request.room.is_some() {
            container.room = request.room;
        }
        if request.description.is_some() {
            container.description = request.description;
        }
        if request.email.is_some() {
            container.email = request.email;
        }
        if request.phone.is_some() {
            container.phone = request.phone;
        }
        if let Some(status) = request.status {
            if status == ContainerStatus::Active && container.activated_at.is_none() {
                container.activated_at = Some(now);
            }
            container.status = status;
        }

        check_placement(&mut tx, container.building_id, container.section_id).await?;
        store_container(&mut tx, &container, now).await?;

        // Kind, placement and status all feed fullness.
        let resettled = resettle_fullness(&mut tx, id, now).await?;
        tx.commit().await?;
        drop(guard);

        self.fullness.announce(std::slice::from_ref(&resettled)).await?;
        Ok(resettled.container)
    }

    pub async fn delete_container(&self, id: i64) -> AppResult<()> {
        let guard = self.locks.lock(id).await;
        let result = sqlx::query("DELETE FROM containers WHERE id = ?1")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        drop(guard);
        self.locks.forget(id);

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Container with id {} not found", id)));
        }
        info!(container_id = id, "container deleted");
        Ok(())
    }

    /// `waiting` -> `active`; starts the first fill interval.
    pub async fn activate_container(&self, id: i64) -> AppResult<Container> {
        let _guard = self.locks.lock(id).await;
        let now = self.clock.now();
        let mut conn = self.db.pool().acquire().await?;

        let mut container = fetch_container(&mut conn, id).await?;
        if container.status != ContainerStatus::Waiting {
            return Err(AppError::InvalidState(format!(
                "Container {} is {:?}, only waiting containers can be activated",
                id, container.status
            )));
        }

        container.status = ContainerStatus::Active;
        container.activated_at = Some(now);
        store_container(&mut conn, &container, now).await?;
        info!(container_id = id, "container activated");
        fetch_container(&mut conn, id).await
    }

    /// Self-registration of a reserved container: `reserved` -> `waiting`.
    pub async fn claim_reserved(
        &self,
        id: i64,
        request: ClaimContainerRequest,
    ) -> AppResult<Container> {
        let _guard = self.locks.lock(id).await;
        let now = self.clock.now();
        let mut conn = self.db.pool().acquire().await?;

        let mut container = fetch_container(&mut conn, id).await?;
        if container.status != ContainerStatus::Reserved {
            return Err(AppError::InvalidState(format!(
                "Container {} is not reserved",
                id
            )));
        }
        check_placement(&mut conn, request.building_id, request.section_id).await?;

        container.kind = request.kind;
        container.building_id = request.building_id;
        container.section_id = request.section_id;
        container.floor = request.floor;
        container.room = request.room;
        container.description = request.description;
        container.email = Some(request.email);
        container.phone = Some(request.phone);
        container.status = ContainerStatus::Waiting;
        store_container(&mut conn, &container, now).await?;

        info!(container_id = id, "reserved container claimed");
        fetch_container(&mut conn, id).await
    }

    pub async fn container_stats(&self, id: i64) -> AppResult<ContainerStats> {
        let now = self.clock.now();
        let mut conn = self.db.pool().acquire().await?;
        let tracker = load_tracker(&mut conn, id).await?;
        let ledger = load_ledger(&mut conn, tracker.container().building_id).await?;
        let container = tracker.container();

        Ok(ContainerStats {
            id,
            kind: container.kind,
            mass: container.mass(),
            status: container.status,
            is_full: tracker.is_full(),
            cur_fill_time: tracker.cur_fill_time(now).map(|d| d.num_seconds()),
            avg_fill_time: tracker.avg_fill_time().map(|d| d.num_seconds()),
            cur_takeout_wait_time: tracker.cur_takeout_wait_time(now).map(|d| d.num_seconds()),
            avg_takeout_wait_time: tracker.avg_takeout_wait_time().map(|d| d.num_seconds()),
            collected_mass: ledger.container_collected_mass(id),
        })
    }
}

async fn check_placement(
    conn: &mut SqliteConnection,
    building_id: i64,
    section_id: Option<i64>,
) -> AppResult<()> {
    fetch_building(conn, building_id).await?;
    if let Some(section_id) = section_id {
        let section = fetch_section(conn, section_id).await?;
        if section.building_id != building_id {
            return Err(AppError::ValidationError(format!(
                "Section {} does not belong to building {}",
                section_id, building_id
            )));
        }
    }
    Ok(())
}

async fn store_container(
    conn: &mut SqliteConnection,
    container: &Container,
    now: chrono::DateTime<chrono::Utc>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE containers SET
            kind = ?2, status = ?3, building_id = ?4, section_id = ?5, floor = ?6,
            room = ?7, description = ?8, email = ?9, phone = ?10, activated_at = ?11,
            updated_at = ?12
        WHERE id = ?1
        "#,
    )
    .bind(container.id)
    .bind(container.kind)
    .bind(container.status)
    .bind(container.building_id)
    .bind(container.section_id)
    .bind(container.floor)
    .bind(&container.room)
    .bind(&container.description)
    .bind(&container.email)
    .bind(&container.phone)
    .bind(container.activated_at)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
