use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::rows::{load_building_scope, load_tracker};
use crate::db::DatabasePool;
use crate::domain::{Clock, CoreEvent, EventBus, MassRuleTrigger, ReportOutcome};
use crate::error::AppResult;
use crate::models::{Container, FullReport};
use crate::services::locks::ContainerLocks;
use crate::services::takeout_service::TakeoutService;

#[derive(Debug, Clone, Serialize)]
pub struct FullReportResult {
    pub container: Container,
    pub episode: FullReport,
    pub became_full: bool,
    pub mass_rule_trigger: MassRuleTrigger,
    pub notifications: Vec<CoreEvent>,
}

pub struct FullnessService {
    db: DatabasePool,
    clock: Arc<dyn Clock>,
    events: EventBus,
    locks: Arc<ContainerLocks>,
    takeouts: Arc<TakeoutService>,
}

impl FullnessService {
    pub fn new(
        db: DatabasePool,
        clock: Arc<dyn Clock>,
        events: EventBus,
        locks: Arc<ContainerLocks>,
        takeouts: Arc<TakeoutService>,
    ) -> Self {
        Self {
            db,
            clock,
            events,
            locks,
            takeouts,
        }
    }

    /// A "container is full" report from the public form or from staff.
    pub async fn on_full_report(
        &self,
        container_id: i64,
        by_staff: bool,
    ) -> AppResult<FullReportResult> {
        let guard = self.locks.lock(container_id).await;
        let now = self.clock.now();

        let mut tx = self.db.pool().begin().await?;
        let mut tracker = load_tracker(&mut tx, container_id).await?;
        let outcome = tracker.add_full_report(by_staff, now)?;
        let episode = persist_report(&mut tx, &outcome).await?;
        save_container_caches(&mut tx, tracker.container(), now).await?;

        let mass_rule_trigger = if outcome.became_full {
            load_building_scope(&mut tx, tracker.container().building_id)
                .await?
                .mass_rule_trigger(tracker.container())
        } else {
            MassRuleTrigger::None
        };
        tx.commit().await?;
        drop(guard);

        debug!(
            container_id,
            count = episode.count,
            by_staff = episode.by_staff,
            threshold_reached = tracker.is_reported_just_enough(),
            "full report recorded"
        );
        let container = tracker.into_container();

        let mut notifications = Vec::new();
        if outcome.became_full {
            info!(container_id, ?mass_rule_trigger, "container became full");
            self.events.emit(CoreEvent::ContainerBecameFull {
                container_id,
                building_id: container.building_id,
                section_id: container.section_id,
            });
            notifications = self
                .takeouts
                .check_conditions_to_notify(container.building_id)
                .await?;
        }

        Ok(FullReportResult {
            container,
            episode,
            became_full: outcome.became_full,
            mass_rule_trigger,
            notifications,
        })
    }

    /// Re-derives fullness of containers whose thresholds changed, then
    /// announces the ones that became full.
    pub async fn resettle_containers(&self, container_ids: &[i64]) -> AppResult<Vec<Container>> {
        let guards = self.locks.lock_many(container_ids).await;
        let now = self.clock.now();

        let mut tx = self.db.pool().begin().await?;
        let mut resettled = Vec::with_capacity(container_ids.len());
        for container_id in container_ids {
            resettled.push(resettle_fullness(&mut tx, *container_id, now).await?);
        }
        tx.commit().await?;
        drop(guards);

        self.announce(&resettled).await?;
        Ok(resettled.into_iter().map(|r| r.container).collect())
    }

    /// Signals containers that became full outside a report and runs the
    /// notify gate of every building touched.
    pub(crate) async fn announce(&self, resettled: &[Resettled]) -> AppResult<Vec<CoreEvent>> {
        let mut buildings = BTreeSet::new();
        for r in resettled {
            buildings.insert(r.container.building_id);
            if r.became_full {
                info!(container_id = r.container.id, "container became full after resettle");
                self.events.emit(CoreEvent::ContainerBecameFull {
                    container_id: r.container.id,
                    building_id: r.container.building_id,
                    section_id: r.container.section_id,
                });
            }
        }

        let mut notifications = Vec::new();
        for building_id in buildings {
            notifications.extend(self.takeouts.check_conditions_to_notify(building_id).await?);
        }
        Ok(notifications)
    }

    /// Staff marked the container full by mistake: forget the open episode.
    pub async fn on_fullness_correction(&self, container_id: i64) -> AppResult<Container> {
        let _guard = self.locks.lock(container_id).await;
        let now = self.clock.now();

        let mut tx = self.db.pool().begin().await?;
        let container = correct_fullness(&mut tx, container_id, now).await?;
        tx.commit().await?;
        Ok(container)
    }
}

async fn persist_report(
    conn: &mut SqliteConnection,
    outcome: &ReportOutcome,
) -> AppResult<FullReport> {
    let mut episode = outcome.episode.clone();
    if outcome.opened {
        let result = sqlx::query(
            r#"
            INSERT INTO full_reports (container_id, reported_at, filled_at, count, by_staff)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(episode.container_id)
        .bind(episode.reported_at)
        .bind(episode.filled_at)
        .bind(episode.count)
        .bind(episode.by_staff)
        .execute(&mut *conn)
        .await?;
        episode.id = result.last_insert_rowid();
    } else {
        sqlx::query(
            "UPDATE full_reports SET count = ?2, by_staff = ?3, filled_at = ?4 WHERE id = ?1",
        )
        .bind(episode.id)
        .bind(episode.count)
        .bind(episode.by_staff)
        .bind(episode.filled_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(episode)
}

pub(crate) async fn save_container_caches(
    conn: &mut SqliteConnection,
    container: &Container,
    now: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE containers SET
            is_full = ?2,
            avg_fill_time_secs = ?3,
            avg_takeout_wait_time_secs = ?4,
            updated_at = ?5
        WHERE id = ?1
        "#,
    )
    .bind(container.id)
    .bind(container.is_full)
    .bind(container.avg_fill_time_secs)
    .bind(container.avg_takeout_wait_time_secs)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub(crate) struct Resettled {
    pub container: Container,
    pub became_full: bool,
}

/// Recomputes fullness under the current thresholds and persists a newly
/// stamped `filled_at`. Caller holds the container lock.
pub(crate) async fn resettle_fullness(
    conn: &mut SqliteConnection,
    container_id: i64,
    now: DateTime<Utc>,
) -> AppResult<Resettled> {
    let mut tracker = load_tracker(conn, container_id).await?;
    let became_full = tracker.resettle(now);
    if let Some(episode) = tracker.open_episode() {
        sqlx::query("UPDATE full_reports SET filled_at = ?2 WHERE id = ?1")
            .bind(episode.id)
            .bind(episode.filled_at)
            .execute(&mut *conn)
            .await?;
    }
    save_container_caches(conn, tracker.container(), now).await?;

    Ok(Resettled {
        container: tracker.into_container(),
        became_full,
    })
}

/// Closes the open episode (pickup confirmed). Caller holds the container lock.
pub(crate) async fn mark_empty(
    conn: &mut SqliteConnection,
    container_id: i64,
    now: DateTime<Utc>,
) -> AppResult<Option<FullReport>> {
    let mut tracker = load_tracker(conn, container_id).await?;
    let Some(closed) = tracker.mark_empty(now) else {
        debug!(container_id, "no open episode to empty");
        return Ok(None);
    };

    sqlx::query("UPDATE full_reports SET emptied_at = ?2 WHERE id = ?1")
        .bind(closed.id)
        .bind(closed.emptied_at)
        .execute(&mut *conn)
        .await?;
    save_container_caches(conn, tracker.container(), now).await?;
    info!(container_id, episode_id = closed.id, "container emptied");
    Ok(Some(closed))
}

/// Deletes the open episode. Caller holds the container lock.
pub(crate) async fn correct_fullness(
    conn: &mut SqliteConnection,
    container_id: i64,
    now: DateTime<Utc>,
) -> AppResult<Container> {
    let mut tracker = load_tracker(conn, container_id).await?;
    if let Some(removed) = tracker.correct_fullness() {
        sqlx::query("DELETE FROM full_reports WHERE id = ?1")
            .bind(removed.id)
            .execute(&mut *conn)
            .await?;
        save_container_caches(conn, tracker.container(), now).await?;
        info!(container_id, episode_id = removed.id, "fullness corrected");
    }
    Ok(tracker.into_container())
}
