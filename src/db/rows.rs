//! Row mapping and loaders. Loaders take a bare connection so the same code
//! runs inside a transaction (read-your-writes) or on a pooled connection.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;

use crate::domain::{BuildingScope, FullnessTracker, MassLedger, SectionScope, Thresholds};
use crate::error::{AppError, AppResult};
use crate::models::{
    Building, BuildingSection, Container, ContainersTakeoutRequest, FullReport, MassRuleCommit,
    TakeoutCondition, TankTakeoutRequest,
};

pub(crate) const CONTAINER_COLUMNS: &str = r#"
    id, kind, status, building_id, section_id, floor, room, description, email, phone,
    activated_at, is_full, avg_fill_time_secs, avg_takeout_wait_time_secs, created_at, updated_at
"#;

pub fn row_to_container(row: &SqliteRow) -> Container {
    Container {
        id: row.get("id"),
        kind: row.get("kind"),
        status: row.get("status"),
        building_id: row.get("building_id"),
        section_id: row.get("section_id"),
        floor: row.get("floor"),
        room: row.get("room"),
        description: row.get("description"),
        email: row.get("email"),
        phone: row.get("phone"),
        activated_at: row.get("activated_at"),
        is_full: row.get("is_full"),
        avg_fill_time_secs: row.get("avg_fill_time_secs"),
        avg_takeout_wait_time_secs: row.get("avg_takeout_wait_time_secs"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_report(row: &SqliteRow) -> FullReport {
    FullReport {
        id: row.get("id"),
        container_id: row.get("container_id"),
        reported_at: row.get("reported_at"),
        filled_at: row.get("filled_at"),
        emptied_at: row.get("emptied_at"),
        count: row.get("count"),
        by_staff: row.get("by_staff"),
    }
}

fn row_to_building(row: &SqliteRow) -> Building {
    Building {
        id: row.get("id"),
        address: row.get("address"),
        precollected_mass: row.get("precollected_mass"),
        takeout_notified: row.get("takeout_notified"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_section(row: &SqliteRow) -> BuildingSection {
    BuildingSection {
        id: row.get("id"),
        building_id: row.get("building_id"),
        num: row.get("num"),
        takeout_notified: row.get("takeout_notified"),
        created_at: row.get("created_at"),
    }
}

fn row_to_condition(row: &SqliteRow) -> TakeoutCondition {
    TakeoutCondition {
        id: row.get("id"),
        building_id: row.get("building_id"),
        section_id: row.get("section_id"),
        office_days: row.get("office_days"),
        public_days: row.get("public_days"),
        mass: row.get("mass"),
        ignore_reports: row.get("ignore_reports"),
    }
}

fn row_to_tank(row: &SqliteRow) -> TankTakeoutRequest {
    TankTakeoutRequest {
        id: row.get("id"),
        building_id: row.get("building_id"),
        created_at: row.get("created_at"),
        confirmed_at: row.get("confirmed_at"),
        confirmed_mass: row.get("confirmed_mass"),
    }
}

fn row_to_takeout(row: &SqliteRow) -> ContainersTakeoutRequest {
    ContainersTakeoutRequest {
        id: row.get("id"),
        building_id: row.get("building_id"),
        section_id: row.get("section_id"),
        container_ids: Vec::new(),
        emptied_container_ids: Vec::new(),
        worker_info: row.get("worker_info"),
        resolved_scope: row.get("resolved_scope"),
        created_at: row.get("created_at"),
        confirmed_at: row.get("confirmed_at"),
    }
}

pub async fn fetch_container(conn: &mut SqliteConnection, id: i64) -> AppResult<Container> {
    let query = format!("SELECT {} FROM containers WHERE id = ?1", CONTAINER_COLUMNS);
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Container with id {} not found", id)))?;
    Ok(row_to_container(&row))
}

pub async fn fetch_building_containers(
    conn: &mut SqliteConnection,
    building_id: i64,
) -> AppResult<Vec<Container>> {
    let query = format!(
        "SELECT {} FROM containers WHERE building_id = ?1 ORDER BY id",
        CONTAINER_COLUMNS
    );
    let rows = sqlx::query(&query)
        .bind(building_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.iter().map(row_to_container).collect())
}

pub async fn fetch_reports(
    conn: &mut SqliteConnection,
    container_id: i64,
) -> AppResult<Vec<FullReport>> {
    let rows = sqlx::query(
        r#"
        SELECT id, container_id, reported_at, filled_at, emptied_at, count, by_staff
        FROM full_reports
        WHERE container_id = ?1
        ORDER BY id
        "#,
    )
    .bind(container_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(row_to_report).collect())
}

async fn fetch_building_reports(
    conn: &mut SqliteConnection,
    building_id: i64,
) -> AppResult<HashMap<i64, Vec<FullReport>>> {
    let rows = sqlx::query(
        r#"
        SELECT r.id, r.container_id, r.reported_at, r.filled_at, r.emptied_at, r.count, r.by_staff
        FROM full_reports r
        INNER JOIN containers c ON c.id = r.container_id
        WHERE c.building_id = ?1
        ORDER BY r.id
        "#,
    )
    .bind(building_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_container: HashMap<i64, Vec<FullReport>> = HashMap::new();
    for report in rows.iter().map(row_to_report) {
        by_container.entry(report.container_id).or_default().push(report);
    }
    Ok(by_container)
}

pub async fn fetch_building(conn: &mut SqliteConnection, id: i64) -> AppResult<Building> {
    let row = sqlx::query(
        r#"
        SELECT id, address, precollected_mass, takeout_notified, created_at, updated_at
        FROM buildings
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Building with id {} not found", id)))?;
    Ok(row_to_building(&row))
}

pub async fn fetch_buildings(conn: &mut SqliteConnection) -> AppResult<Vec<Building>> {
    let rows = sqlx::query(
        r#"
        SELECT id, address, precollected_mass, takeout_notified, created_at, updated_at
        FROM buildings
        ORDER BY id
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(row_to_building).collect())
}

pub async fn fetch_section(conn: &mut SqliteConnection, id: i64) -> AppResult<BuildingSection> {
    let row = sqlx::query(
        "SELECT id, building_id, num, takeout_notified, created_at \
         FROM building_sections WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Building section with id {} not found", id)))?;
    Ok(row_to_section(&row))
}

pub async fn fetch_sections(
    conn: &mut SqliteConnection,
    building_id: i64,
) -> AppResult<Vec<BuildingSection>> {
    let rows = sqlx::query(
        r#"
        SELECT id, building_id, num, takeout_notified, created_at
        FROM building_sections
        WHERE building_id = ?1
        ORDER BY num
        "#,
    )
    .bind(building_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(row_to_section).collect())
}

const CONDITION_COLUMNS: &str =
    "id, building_id, section_id, office_days, public_days, mass, ignore_reports";

pub async fn fetch_building_condition(
    conn: &mut SqliteConnection,
    building_id: i64,
) -> AppResult<Option<TakeoutCondition>> {
    let query = format!(
        "SELECT {} FROM takeout_conditions WHERE building_id = ?1",
        CONDITION_COLUMNS
    );
    let row = sqlx::query(&query)
        .bind(building_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(row_to_condition))
}

pub async fn fetch_section_condition(
    conn: &mut SqliteConnection,
    section_id: i64,
) -> AppResult<Option<TakeoutCondition>> {
    let query = format!(
        "SELECT {} FROM takeout_conditions WHERE section_id = ?1",
        CONDITION_COLUMNS
    );
    let row = sqlx::query(&query)
        .bind(section_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(row_to_condition))
}

pub async fn fetch_condition(conn: &mut SqliteConnection, id: i64) -> AppResult<TakeoutCondition> {
    let query = format!("SELECT {} FROM takeout_conditions WHERE id = ?1", CONDITION_COLUMNS);
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Takeout condition with id {} not found", id)))?;
    Ok(row_to_condition(&row))
}

pub async fn fetch_takeouts(
    conn: &mut SqliteConnection,
    building_id: i64,
) -> AppResult<Vec<ContainersTakeoutRequest>> {
    let rows = sqlx::query(
        r#"
        SELECT id, building_id, section_id, worker_info, resolved_scope, created_at, confirmed_at
        FROM containers_takeout_requests
        WHERE building_id = ?1
        ORDER BY id
        "#,
    )
    .bind(building_id)
    .fetch_all(&mut *conn)
    .await?;
    let mut takeouts: Vec<ContainersTakeoutRequest> = rows.iter().map(row_to_takeout).collect();

    let nominated = fetch_takeout_links(conn, "takeout_request_containers", building_id).await?;
    let emptied = fetch_takeout_links(conn, "takeout_emptied_containers", building_id).await?;
    for takeout in &mut takeouts {
        takeout.container_ids = nominated.get(&takeout.id).cloned().unwrap_or_default();
        takeout.emptied_container_ids = emptied.get(&takeout.id).cloned().unwrap_or_default();
    }
    Ok(takeouts)
}

async fn fetch_takeout_links(
    conn: &mut SqliteConnection,
    table: &str,
    building_id: i64,
) -> AppResult<HashMap<i64, Vec<i64>>> {
    let query = format!(
        r#"
        SELECT l.request_id, l.container_id
        FROM {} l
        INNER JOIN containers_takeout_requests t ON t.id = l.request_id
        WHERE t.building_id = ?1
        ORDER BY l.container_id
        "#,
        table
    );
    let rows = sqlx::query(&query)
        .bind(building_id)
        .fetch_all(&mut *conn)
        .await?;

    let mut links: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in rows {
        links
            .entry(row.get("request_id"))
            .or_default()
            .push(row.get("container_id"));
    }
    Ok(links)
}

pub async fn fetch_takeout(
    conn: &mut SqliteConnection,
    id: i64,
) -> AppResult<ContainersTakeoutRequest> {
    let building_id: i64 =
        sqlx::query_scalar("SELECT building_id FROM containers_takeout_requests WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Takeout request with id {} not found", id))
            })?;

    fetch_takeouts(conn, building_id)
        .await?
        .into_iter()
        .find(|t| t.id == id)
        .ok_or_else(|| AppError::NotFound(format!("Takeout request with id {} not found", id)))
}

const TANK_COLUMNS: &str = "id, building_id, created_at, confirmed_at, confirmed_mass";

pub async fn fetch_tanks(
    conn: &mut SqliteConnection,
    building_id: i64,
) -> AppResult<Vec<TankTakeoutRequest>> {
    let query = format!(
        "SELECT {} FROM tank_takeout_requests WHERE building_id = ?1 ORDER BY id",
        TANK_COLUMNS
    );
    let rows = sqlx::query(&query)
        .bind(building_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.iter().map(row_to_tank).collect())
}

pub async fn fetch_tank(conn: &mut SqliteConnection, id: i64) -> AppResult<TankTakeoutRequest> {
    let query = format!("SELECT {} FROM tank_takeout_requests WHERE id = ?1", TANK_COLUMNS);
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Tank takeout request with id {} not found", id))
        })?;
    Ok(row_to_tank(&row))
}

pub async fn fetch_commits(
    conn: &mut SqliteConnection,
    building_id: i64,
) -> AppResult<Vec<MassRuleCommit>> {
    let rows = sqlx::query(
        r#"
        SELECT id, building_id, section_id, committed_at
        FROM mass_rule_commits
        WHERE building_id = ?1
        ORDER BY id
        "#,
    )
    .bind(building_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .iter()
        .map(|row| MassRuleCommit {
            id: row.get("id"),
            building_id: row.get("building_id"),
            section_id: row.get("section_id"),
            committed_at: row.get("committed_at"),
        })
        .collect())
}

/// One container with its episodes and resolved thresholds.
pub async fn load_tracker(
    conn: &mut SqliteConnection,
    container_id: i64,
) -> AppResult<FullnessTracker> {
    let container = fetch_container(conn, container_id).await?;
    let reports = fetch_reports(conn, container_id).await?;
    let building_condition = fetch_building_condition(conn, container.building_id).await?;
    let section_condition = match container.section_id {
        Some(section_id) => fetch_section_condition(conn, section_id).await?,
        None => None,
    };
    let thresholds = Thresholds::resolve(
        container.kind,
        section_condition.as_ref(),
        building_condition.as_ref(),
    );
    Ok(FullnessTracker::new(container, reports, thresholds))
}

/// The whole building split into section scopes.
pub async fn load_building_scope(
    conn: &mut SqliteConnection,
    building_id: i64,
) -> AppResult<BuildingScope> {
    let building = fetch_building(conn, building_id).await?;
    let condition = fetch_building_condition(conn, building_id).await?;

    let mut sections = Vec::new();
    for section in fetch_sections(conn, building_id).await? {
        let section_condition = fetch_section_condition(conn, section.id).await?;
        sections.push(SectionScope {
            section,
            condition: section_condition,
            trackers: Vec::new(),
        });
    }

    let mut reports = fetch_building_reports(conn, building_id).await?;
    let mut unsectioned = Vec::new();
    for container in fetch_building_containers(conn, building_id).await? {
        let container_reports = reports.remove(&container.id).unwrap_or_default();
        let section = container
            .section_id
            .and_then(|id| sections.iter_mut().find(|s| s.section.id == id));
        match section {
            Some(section) => {
                let thresholds = Thresholds::resolve(
                    container.kind,
                    section.condition.as_ref(),
                    condition.as_ref(),
                );
                section
                    .trackers
                    .push(FullnessTracker::new(container, container_reports, thresholds));
            }
            None => {
                let thresholds = Thresholds::resolve(container.kind, None, condition.as_ref());
                unsectioned.push(FullnessTracker::new(container, container_reports, thresholds));
            }
        }
    }

    Ok(BuildingScope {
        building,
        condition,
        sections,
        unsectioned,
    })
}

/// Container masses recorded at each confirmed emptying, keyed by
/// (request id, container id).
async fn fetch_emptied_masses(
    conn: &mut SqliteConnection,
    building_id: i64,
) -> AppResult<HashMap<(i64, i64), i64>> {
    let rows = sqlx::query(
        r#"
        SELECT l.request_id, l.container_id, l.mass
        FROM takeout_emptied_containers l
        INNER JOIN containers_takeout_requests t ON t.id = l.request_id
        WHERE t.building_id = ?1
        "#,
    )
    .bind(building_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let key: (i64, i64) = (row.get("request_id"), row.get("container_id"));
            (key, row.get::<i64, _>("mass"))
        })
        .collect())
}

pub async fn load_ledger(conn: &mut SqliteConnection, building_id: i64) -> AppResult<MassLedger> {
    let building = fetch_building(conn, building_id).await?;

    Ok(MassLedger {
        precollected_mass: building.precollected_mass,
        emptied_masses: fetch_emptied_masses(conn, building_id).await?,
        takeouts: fetch_takeouts(conn, building_id).await?,
        tanks: fetch_tanks(conn, building_id).await?,
    })
}
