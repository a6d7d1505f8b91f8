use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::rows::{
    fetch_building, fetch_buildings, fetch_commits, fetch_container, fetch_takeout, fetch_takeouts,
    fetch_tank, fetch_tanks, load_building_scope,
};
use crate::db::DatabasePool;
use crate::domain::{
    BuildingScope, Clock, CoreEvent, EventBus, NotifyDecision, ScopeRef, TakeoutScope,
};
use crate::error::{AppError, AppResult};
use crate::models::{
    BuildingTakeoutStatus, ConfirmContainersTakeoutRequest, ConfirmTankTakeoutRequest,
    ContainersTakeoutRequest, CreateContainersTakeoutRequest, CreateTankTakeoutRequest,
    MassRuleCommit, ScopeTakeoutStatus, SectionTakeoutStatus, TankTakeoutRequest,
};
use crate::services::fullness_service::{correct_fullness, mark_empty};
use crate::services::locks::ContainerLocks;

pub struct TakeoutService {
    db: DatabasePool,
    clock: Arc<dyn Clock>,
    events: EventBus,
    locks: Arc<ContainerLocks>,
}

impl TakeoutService {
    pub fn new(
        db: DatabasePool,
        clock: Arc<dyn Clock>,
        events: EventBus,
        locks: Arc<ContainerLocks>,
    ) -> Self {
        Self {
            db,
            clock,
            events,
            locks,
        }
    }

    /// One-shot gate: each notify scope of the building fires at most once
    /// until a confirmed pickup re-arms it. Returns the signals emitted.
    pub async fn check_conditions_to_notify(&self, building_id: i64) -> AppResult<Vec<CoreEvent>> {
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;
        let scope = load_building_scope(&mut tx, building_id).await?;
        let commits = fetch_commits(&mut tx, building_id).await?;
        let takeouts = fetch_takeouts(&mut tx, building_id).await?;

        // Decide on owned data first; nothing borrowed from the scope lives
        // across the writes below.
        let decisions: Vec<NotifyDecision> = scope
            .notify_scopes()
            .iter()
            .filter_map(|scope_ref| scope_ref.notify_decision(&commits, &takeouts, now))
            .collect();

        let mut fired = Vec::new();
        for decision in decisions {
            // Check-then-set in one statement so concurrent sweeps cannot both fire.
            let claim = match decision.section_id {
                Some(section_id) => sqlx::query(
                    "UPDATE building_sections SET takeout_notified = 1 \
                     WHERE id = ?1 AND takeout_notified = 0",
                )
                .bind(section_id),
                None => sqlx::query(
                    "UPDATE buildings SET takeout_notified = 1 \
                     WHERE id = ?1 AND takeout_notified = 0",
                )
                .bind(decision.building_id),
            };
            if claim.execute(&mut *tx).await?.rows_affected() == 0 {
                continue;
            }

            if decision.commit_mass {
                sqlx::query(
                    "INSERT INTO mass_rule_commits (building_id, section_id, committed_at) \
                     VALUES (?1, ?2, ?3)",
                )
                .bind(decision.building_id)
                .bind(decision.section_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            info!(
                building_id,
                section_id = ?decision.section_id,
                reasons = ?decision.reasons,
                "pickup condition met"
            );
            fired.push(CoreEvent::PickupConditionMet {
                building_id,
                section_id: decision.section_id,
                reasons: decision.reasons,
                container_ids: decision.container_ids,
            });
        }
        tx.commit().await?;

        for event in &fired {
            self.events.emit(event.clone());
        }
        Ok(fired)
    }

    /// Periodic pass over every building; errors in one building do not
    /// stop the others.
    pub async fn sweep_time_conditions(&self) -> AppResult<usize> {
        let buildings = {
            let mut conn = self.db.pool().acquire().await?;
            fetch_buildings(&mut conn).await?
        };

        let mut fired = 0;
        for building in buildings {
            match self.check_conditions_to_notify(building.id).await {
                Ok(events) => fired += events.len(),
                Err(e) => warn!(building_id = building.id, "condition check failed: {}", e),
            }
        }
        debug!(fired, "condition sweep finished");
        Ok(fired)
    }

    pub async fn takeout_status(&self, building_id: i64) -> AppResult<BuildingTakeoutStatus> {
        let now = self.clock.now();
        let mut conn = self.db.pool().acquire().await?;
        let scope = load_building_scope(&mut conn, building_id).await?;
        let commits = fetch_commits(&mut conn, building_id).await?;
        let takeouts = fetch_takeouts(&mut conn, building_id).await?;

        let status = |scope_ref: ScopeRef<'_>| {
            let evaluated = scope_ref.as_scope();
            ScopeTakeoutStatus {
                current_mass: evaluated.current_mass(),
                meets_mass_condition: evaluated.meets_mass_condition(),
                meets_time_condition: evaluated.meets_time_condition(now),
                needs_takeout: evaluated.needs_takeout(now),
                takeout_notified: evaluated.takeout_notified(),
                mass_condition_committed: scope_ref
                    .is_mass_condition_committed(&commits, &takeouts),
                containers_for_takeout: evaluated
                    .containers_for_takeout()
                    .into_iter()
                    .cloned()
                    .collect(),
            }
        };

        Ok(BuildingTakeoutStatus {
            building_id,
            status: status(ScopeRef::Building(&scope)),
            sections: scope
                .sections
                .iter()
                .map(|s| SectionTakeoutStatus {
                    section_id: s.section.id,
                    num: s.section.num,
                    status: status(ScopeRef::Section(s)),
                })
                .collect(),
        })
    }

    pub async fn mass_rule_commits(&self, building_id: i64) -> AppResult<Vec<MassRuleCommit>> {
        let mut conn = self.db.pool().acquire().await?;
        fetch_building(&mut conn, building_id).await?;
        fetch_commits(&mut conn, building_id).await
    }

    pub async fn create_containers_takeout(
        &self,
        req: CreateContainersTakeoutRequest,
    ) -> AppResult<ContainersTakeoutRequest> {
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;
        let scope = load_building_scope(&mut tx, req.building_id).await?;

        let target: &dyn TakeoutScope = match req.section_id {
            Some(section_id) => scope.section(section_id).ok_or_else(|| {
                AppError::ValidationError(format!(
                    "Section {} does not belong to building {}",
                    section_id, req.building_id
                ))
            })?,
            None => &scope,
        };

        let container_ids: Vec<i64> = match &req.container_ids {
            Some(ids) => {
                if let Some(foreign) = ids.iter().find(|id| !target.contains_container(**id)) {
                    return Err(AppError::ValidationError(format!(
                        "Container {} is not in the requested building or section",
                        foreign
                    )));
                }
                ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
            }
            None => target.containers_for_takeout().iter().map(|c| c.id).collect(),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO containers_takeout_requests
                (building_id, section_id, worker_info, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(req.building_id)
        .bind(req.section_id)
        .bind(&req.worker_info)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        for container_id in &container_ids {
            sqlx::query(
                "INSERT INTO takeout_request_containers (request_id, container_id) VALUES (?1, ?2)",
            )
            .bind(id)
            .bind(container_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(
            request_id = id,
            building_id = req.building_id,
            containers = container_ids.len(),
            "containers takeout requested"
        );
        self.get_containers_takeout(id).await
    }

    pub async fn get_containers_takeout(&self, id: i64) -> AppResult<ContainersTakeoutRequest> {
        let mut conn = self.db.pool().acquire().await?;
        fetch_takeout(&mut conn, id).await
    }

    pub async fn list_containers_takeouts(
        &self,
        building_id: i64,
    ) -> AppResult<Vec<ContainersTakeoutRequest>> {
        let mut conn = self.db.pool().acquire().await?;
        fetch_building(&mut conn, building_id).await?;
        let mut takeouts = fetch_takeouts(&mut conn, building_id).await?;
        takeouts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(takeouts)
    }

    /// Pickup confirmation, a one-time transition. Emptied containers close
    /// their episodes, containers found already empty get their fullness
    /// corrected, unavailable ones stay as they are.
    pub async fn confirm_containers_takeout(
        &self,
        id: i64,
        req: ConfirmContainersTakeoutRequest,
    ) -> AppResult<ContainersTakeoutRequest> {
        let takeout = self.get_containers_takeout(id).await?;
        if takeout.confirmed_at.is_some() {
            return Err(AppError::AlreadyConfirmed(format!(
                "Takeout request {} is already confirmed",
                id
            )));
        }

        let already_empty: BTreeSet<i64> =
            req.already_empty_container_ids.iter().copied().collect();
        let emptied: BTreeSet<i64> = match &req.emptied_container_ids {
            Some(ids) => ids.iter().copied().collect(),
            None => {
                let unavailable: BTreeSet<i64> =
                    req.unavailable_container_ids.iter().copied().collect();
                takeout
                    .container_ids
                    .iter()
                    .copied()
                    .filter(|c| !already_empty.contains(c) && !unavailable.contains(c))
                    .collect()
            }
        };

        if let Some(both) = emptied.intersection(&already_empty).next() {
            return Err(AppError::BadRequest(format!(
                "Container {} cannot be both emptied and already empty",
                both
            )));
        }

        let touched: Vec<i64> = emptied.union(&already_empty).copied().collect();
        let _guards = self.locks.lock_many(&touched).await;
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;

        let mut masses = HashMap::with_capacity(touched.len());
        for container_id in &touched {
            let container = fetch_container(&mut tx, *container_id).await?;
            if container.building_id != takeout.building_id {
                return Err(AppError::ValidationError(format!(
                    "Container {} is not in building {}",
                    container_id, takeout.building_id
                )));
            }
            masses.insert(container.id, container.mass());
        }

        let claimed = sqlx::query(
            r#"
            UPDATE containers_takeout_requests
            SET confirmed_at = ?2, worker_info = COALESCE(?3, worker_info)
            WHERE id = ?1 AND confirmed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(&req.worker_info)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return Err(AppError::AlreadyConfirmed(format!(
                "Takeout request {} is already confirmed",
                id
            )));
        }

        for container_id in &emptied {
            mark_empty(&mut tx, *container_id, now).await?;
            sqlx::query(
                "INSERT INTO takeout_emptied_containers (request_id, container_id, mass) \
                 VALUES (?1, ?2, ?3)",
            )
            .bind(id)
            .bind(container_id)
            .bind(masses.get(container_id).copied().unwrap_or_default())
            .execute(&mut *tx)
            .await?;
        }
        for container_id in &already_empty {
            correct_fullness(&mut tx, *container_id, now).await?;
        }

        let scope = load_building_scope(&mut tx, takeout.building_id).await?;
        let resolved_scope = is_scope_resolved(&scope, takeout.section_id);
        sqlx::query("UPDATE containers_takeout_requests SET resolved_scope = ?2 WHERE id = ?1")
            .bind(id)
            .bind(resolved_scope)
            .execute(&mut *tx)
            .await?;

        // Re-arm the notify gate of the scope this pickup served.
        match takeout.section_id {
            Some(section_id) => {
                sqlx::query("UPDATE building_sections SET takeout_notified = 0 WHERE id = ?1")
                    .bind(section_id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query("UPDATE buildings SET takeout_notified = 0 WHERE id = ?1")
                    .bind(takeout.building_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "UPDATE building_sections SET takeout_notified = 0 WHERE building_id = ?1",
                )
                .bind(takeout.building_id)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;

        info!(
            request_id = id,
            emptied = emptied.len(),
            corrected = already_empty.len(),
            resolved_scope,
            "containers takeout confirmed"
        );
        self.events.emit(CoreEvent::PickupRequestResolved {
            request_id: id,
            building_id: takeout.building_id,
            section_id: takeout.section_id,
        });
        self.get_containers_takeout(id).await
    }

    pub async fn create_tank_takeout(
        &self,
        req: CreateTankTakeoutRequest,
    ) -> AppResult<TankTakeoutRequest> {
        let now = self.clock.now();
        let mut conn = self.db.pool().acquire().await?;
        fetch_building(&mut conn, req.building_id).await?;

        let result = sqlx::query(
            "INSERT INTO tank_takeout_requests (building_id, created_at) VALUES (?1, ?2)",
        )
        .bind(req.building_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        let id = result.last_insert_rowid();

        info!(request_id = id, building_id = req.building_id, "tank takeout requested");
        self.events.emit(CoreEvent::TankTakeoutRequested {
            request_id: id,
            building_id: req.building_id,
        });
        fetch_tank(&mut conn, id).await
    }

    pub async fn get_tank_takeout(&self, id: i64) -> AppResult<TankTakeoutRequest> {
        let mut conn = self.db.pool().acquire().await?;
        fetch_tank(&mut conn, id).await
    }

    pub async fn list_tank_takeouts(&self, building_id: i64) -> AppResult<Vec<TankTakeoutRequest>> {
        let mut conn = self.db.pool().acquire().await?;
        fetch_building(&mut conn, building_id).await?;
        let mut tanks = fetch_tanks(&mut conn, building_id).await?;
        tanks.reverse();
        Ok(tanks)
    }

    /// Tank offload confirmed with the operator-weighed mass.
    pub async fn confirm_tank_takeout(
        &self,
        id: i64,
        req: ConfirmTankTakeoutRequest,
    ) -> AppResult<TankTakeoutRequest> {
        let now = self.clock.now();
        let mut conn = self.db.pool().acquire().await?;
        fetch_tank(&mut conn, id).await?;

        let claimed = sqlx::query(
            r#"
            UPDATE tank_takeout_requests
            SET confirmed_at = ?2, confirmed_mass = ?3
            WHERE id = ?1 AND confirmed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(req.confirmed_mass)
        .execute(&mut *conn)
        .await?;
        if claimed.rows_affected() == 0 {
            return Err(AppError::AlreadyConfirmed(format!(
                "Tank takeout {} is already confirmed",
                id
            )));
        }

        info!(request_id = id, mass = req.confirmed_mass, "tank takeout confirmed");
        fetch_tank(&mut conn, id).await
    }
}

fn is_scope_resolved(scope: &BuildingScope, section_id: Option<i64>) -> bool {
    match section_id.and_then(|id| scope.section(id)) {
        Some(section) => section.containers_for_takeout().is_empty(),
        None => scope.containers_for_takeout().is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MassRuleTrigger, TakeoutReason};
    use crate::models::ContainerKind;
    use crate::services::testing::Fixture;
    use chrono::Duration;
    use tokio_test::assert_err;

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<CoreEvent>) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn request(
        building_id: i64,
        container_ids: Option<Vec<i64>>,
    ) -> CreateContainersTakeoutRequest {
        CreateContainersTakeoutRequest {
            building_id,
            section_id: None,
            container_ids,
            worker_info: String::new(),
        }
    }

    #[tokio::test]
    async fn mass_breach_notifies_once() {
        let fx = Fixture::new().await;
        let building = fx.building("Lomonosova 9").await;
        fx.set_building_condition(building, |c| c.mass = Some(40)).await;
        let first = fx.active_container(building, None, ContainerKind::Ecobox).await;
        let second = fx.active_container(building, None, ContainerKind::Ecobox).await;

        let result = fx.fullness.on_full_report(first, false).await.unwrap();
        assert_eq!(result.mass_rule_trigger, MassRuleTrigger::Building(building));
        assert_eq!(
            result.notifications,
            vec![CoreEvent::PickupConditionMet {
                building_id: building,
                section_id: None,
                reasons: vec![TakeoutReason::Mass],
                container_ids: vec![first],
            }]
        );

        let result = fx.fullness.on_full_report(second, false).await.unwrap();
        assert!(result.became_full);
        assert!(result.notifications.is_empty());
        assert!(fx.takeouts.check_conditions_to_notify(building).await.unwrap().is_empty());

        let status = fx.takeouts.takeout_status(building).await.unwrap();
        assert_eq!(status.status.current_mass, 90);
        assert!(status.status.takeout_notified);
        assert!(status.status.mass_condition_committed);
        assert_eq!(fx.takeouts.mass_rule_commits(building).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn notify_paths_run_on_spawned_tasks() {
        let fx = Fixture::new().await;
        let building = fx.building("Lomonosova 9").await;
        fx.set_building_condition(building, |c| c.mass = Some(40)).await;
        let container = fx.active_container(building, None, ContainerKind::Ecobox).await;

        let fullness = fx.fullness.clone();
        let result = tokio::spawn(async move { fullness.on_full_report(container, true).await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.notifications.len(), 1);

        let takeouts = fx.takeouts.clone();
        let fired = tokio::spawn(async move { takeouts.sweep_time_conditions().await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired, 0);
    }

    #[tokio::test]
    async fn mass_equal_to_threshold_does_not_notify() {
        let fx = Fixture::new().await;
        let building = fx.building("Birzhevaya 14").await;
        fx.set_building_condition(building, |c| c.mass = Some(45)).await;
        let container = fx.active_container(building, None, ContainerKind::Ecobox).await;

        let result = fx.fullness.on_full_report(container, true).await.unwrap();
        assert!(result.became_full);
        assert_eq!(result.mass_rule_trigger, MassRuleTrigger::None);
        assert!(result.notifications.is_empty());

        let status = fx.takeouts.takeout_status(building).await.unwrap();
        assert_eq!(status.status.current_mass, 45);
        assert!(!status.status.meets_mass_condition);
        assert!(!status.status.needs_takeout);
    }

    #[tokio::test]
    async fn section_threshold_counts_public_box_after_ignored_report() {
        let fx = Fixture::new().await;
        let building = fx.building("Kronverksky 49").await;
        let section = fx.section(building, 1).await;
        fx.set_section_condition(section, |c| {
            c.mass = Some(30);
            c.ignore_reports = Some(1);
        })
        .await;
        let office = fx.active_container(building, Some(section), ContainerKind::OfficeBox).await;
        let public = fx
            .active_container(building, Some(section), ContainerKind::PublicEcobox)
            .await;

        let result = fx.fullness.on_full_report(office, false).await.unwrap();
        assert!(result.became_full);
        assert!(result.notifications.is_empty());

        let result = fx.fullness.on_full_report(public, false).await.unwrap();
        assert!(!result.became_full);

        let result = fx.fullness.on_full_report(public, false).await.unwrap();
        assert!(result.became_full);
        assert_eq!(result.mass_rule_trigger, MassRuleTrigger::Section(section));
        assert_eq!(
            result.notifications,
            vec![CoreEvent::PickupConditionMet {
                building_id: building,
                section_id: Some(section),
                reasons: vec![TakeoutReason::Mass],
                container_ids: vec![office, public],
            }]
        );

        let status = fx.takeouts.takeout_status(building).await.unwrap();
        assert!(status.status.needs_takeout);
        assert!(!status.status.takeout_notified);
        assert_eq!(status.sections.len(), 1);
        assert_eq!(status.sections[0].status.current_mass, 35);
        assert!(status.sections[0].status.takeout_notified);
    }

    #[tokio::test]
    async fn sweep_fires_time_condition_once() {
        let fx = Fixture::new().await;
        let building = fx.building("Lomonosova 9").await;
        fx.set_building_condition(building, |c| c.office_days = Some(3)).await;
        let container = fx.active_container(building, None, ContainerKind::OfficeBox).await;
        let mut rx = fx.events.subscribe();

        let result = fx.fullness.on_full_report(container, false).await.unwrap();
        assert!(result.notifications.is_empty());

        fx.clock.advance(Duration::days(2));
        assert_eq!(fx.takeouts.sweep_time_conditions().await.unwrap(), 0);

        fx.clock.advance(Duration::days(1));
        assert_eq!(fx.takeouts.sweep_time_conditions().await.unwrap(), 1);
        assert_eq!(fx.takeouts.sweep_time_conditions().await.unwrap(), 0);

        let events = drain(&mut rx);
        assert!(events.contains(&CoreEvent::PickupConditionMet {
            building_id: building,
            section_id: None,
            reasons: vec![TakeoutReason::Time],
            container_ids: vec![container],
        }));
        assert!(fx.takeouts.mass_rule_commits(building).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn confirmation_empties_corrects_and_rearms() {
        let fx = Fixture::new().await;
        let building = fx.building("Lomonosova 9").await;
        fx.set_building_condition(building, |c| c.mass = Some(40)).await;
        let a = fx.active_container(building, None, ContainerKind::Ecobox).await;
        let b = fx.active_container(building, None, ContainerKind::OfficeBox).await;
        let c = fx.active_container(building, None, ContainerKind::Ecobox).await;
        for id in [a, b, c] {
            fx.fullness.on_full_report(id, true).await.unwrap();
        }

        let takeout = fx.takeouts.create_containers_takeout(request(building, None)).await.unwrap();
        assert_eq!(takeout.container_ids, vec![a, b, c]);
        assert_eq!(takeout.confirmed_at, None);

        let mut rx = fx.events.subscribe();
        fx.clock.advance(Duration::hours(2));
        let confirmed = fx
            .takeouts
            .confirm_containers_takeout(
                takeout.id,
                ConfirmContainersTakeoutRequest {
                    already_empty_container_ids: vec![c],
                    worker_info: Some("crew 3".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(confirmed.emptied_container_ids, vec![a, b]);
        assert_eq!(confirmed.confirmed_at, Some(fx.clock.now()));
        assert_eq!(confirmed.worker_info, "crew 3");
        assert!(confirmed.resolved_scope);

        let emptied = fx.containers.get_container(a).await.unwrap();
        assert!(!emptied.is_full);
        assert_eq!(emptied.avg_takeout_wait_time_secs, Some(2 * 3600));
        let corrected = fx.containers.get_container(c).await.unwrap();
        assert!(!corrected.is_full);
        assert_eq!(corrected.avg_takeout_wait_time_secs, None);

        let building_row = fx.buildings.get_building(building).await.unwrap();
        assert!(!building_row.building.takeout_notified);
        assert_eq!(
            drain(&mut rx),
            vec![CoreEvent::PickupRequestResolved {
                request_id: takeout.id,
                building_id: building,
                section_id: None,
            }]
        );

        let err = assert_err!(
            fx.takeouts
                .confirm_containers_takeout(takeout.id, ConfirmContainersTakeoutRequest::default())
                .await
        );
        assert!(matches!(err, AppError::AlreadyConfirmed(_)));
    }

    #[tokio::test]
    async fn partial_pickup_keeps_mass_commit() {
        let fx = Fixture::new().await;
        let building = fx.building("Birzhevaya 14").await;
        fx.set_building_condition(building, |c| c.mass = Some(40)).await;
        let a = fx.active_container(building, None, ContainerKind::Ecobox).await;
        let b = fx.active_container(building, None, ContainerKind::Ecobox).await;

        assert_eq!(fx.fullness.on_full_report(a, true).await.unwrap().notifications.len(), 1);
        fx.fullness.on_full_report(b, true).await.unwrap();

        fx.clock.advance(Duration::hours(1));
        let first = fx.takeouts.create_containers_takeout(request(building, None)).await.unwrap();
        let first = fx
            .takeouts
            .confirm_containers_takeout(
                first.id,
                ConfirmContainersTakeoutRequest {
                    unavailable_container_ids: vec![b],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.emptied_container_ids, vec![a]);
        assert!(!first.resolved_scope);

        // Still 45 kg over the limit, but that breach was already announced.
        assert!(fx.takeouts.check_conditions_to_notify(building).await.unwrap().is_empty());
        let status = fx.takeouts.takeout_status(building).await.unwrap();
        assert!(status.status.meets_mass_condition);
        assert!(status.status.mass_condition_committed);
        assert!(!status.status.takeout_notified);

        fx.clock.advance(Duration::hours(1));
        let second = fx
            .takeouts
            .create_containers_takeout(request(building, Some(vec![b])))
            .await
            .unwrap();
        let second = fx
            .takeouts
            .confirm_containers_takeout(second.id, ConfirmContainersTakeoutRequest::default())
            .await
            .unwrap();
        assert!(second.resolved_scope);

        fx.clock.advance(Duration::hours(1));
        let result = fx.fullness.on_full_report(a, true).await.unwrap();
        assert_eq!(result.notifications.len(), 1);
        assert_eq!(fx.takeouts.mass_rule_commits(building).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn takeout_request_rejects_foreign_containers() {
        let fx = Fixture::new().await;
        let building = fx.building("Lomonosova 9").await;
        let other = fx.building("Kronverksky 49").await;
        let foreign_section = fx.section(other, 1).await;
        let foreign = fx.active_container(other, None, ContainerKind::Ecobox).await;

        let err = assert_err!(
            fx.takeouts
                .create_containers_takeout(request(building, Some(vec![foreign])))
                .await
        );
        assert!(matches!(err, AppError::ValidationError(_)));

        let mut in_section = request(building, None);
        in_section.section_id = Some(foreign_section);
        let err = assert_err!(fx.takeouts.create_containers_takeout(in_section).await);
        assert!(matches!(err, AppError::ValidationError(_)));

        let err = assert_err!(fx.takeouts.create_containers_takeout(request(999, None)).await);
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn takeouts_are_listed_newest_first() {
        let fx = Fixture::new().await;
        let building = fx.building("Lomonosova 9").await;
        let first = fx.takeouts.create_containers_takeout(request(building, None)).await.unwrap();
        fx.clock.advance(Duration::minutes(5));
        let second = fx.takeouts.create_containers_takeout(request(building, None)).await.unwrap();

        let listed = fx.takeouts.list_containers_takeouts(building).await.unwrap();
        assert_eq!(listed.iter().map(|t| t.id).collect::<Vec<_>>(), vec![second.id, first.id]);
        assert!(listed[0].container_ids.is_empty());
    }

    #[tokio::test]
    async fn tank_takeout_confirms_once() {
        let fx = Fixture::new().await;
        let building = fx.building("Lomonosova 9").await;
        let mut rx = fx.events.subscribe();

        let tank = fx
            .takeouts
            .create_tank_takeout(CreateTankTakeoutRequest { building_id: building })
            .await
            .unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![CoreEvent::TankTakeoutRequested {
                request_id: tank.id,
                building_id: building,
            }]
        );

        fx.clock.advance(Duration::hours(3));
        let confirmed = fx
            .takeouts
            .confirm_tank_takeout(tank.id, ConfirmTankTakeoutRequest { confirmed_mass: 480 })
            .await
            .unwrap();
        assert_eq!(confirmed.confirmed_mass, Some(480));
        assert_eq!(confirmed.confirmed_at, Some(fx.clock.now()));

        let err = assert_err!(
            fx.takeouts
                .confirm_tank_takeout(tank.id, ConfirmTankTakeoutRequest { confirmed_mass: 500 })
                .await
        );
        assert!(matches!(err, AppError::AlreadyConfirmed(_)));
        let stored = fx.takeouts.get_tank_takeout(tank.id).await.unwrap();
        assert_eq!(stored.confirmed_mass, Some(480));
        assert_eq!(fx.takeouts.list_tank_takeouts(building).await.unwrap().len(), 1);
    }
}
