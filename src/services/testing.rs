//! In-memory wiring of every service for tests, driven by a manual clock.

use std::sync::Arc;

use crate::db::{test_pool, DatabasePool};
use crate::domain::clock::ManualClock;
use crate::domain::fullness::tests::t0;
use crate::domain::EventBus;
use crate::models::{
    ContainerKind, CreateBuildingRequest, CreateContainerRequest, CreateSectionRequest,
    TakeoutCondition, UpdateTakeoutConditionRequest,
};
use crate::services::{
    BuildingService, ContainerLocks, ContainerService, FullnessService, LedgerService,
    TakeoutService,
};

pub(crate) struct Fixture {
    pub db: DatabasePool,
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
    pub buildings: Arc<BuildingService>,
    pub containers: Arc<ContainerService>,
    pub fullness: Arc<FullnessService>,
    pub takeouts: Arc<TakeoutService>,
    pub ledger: Arc<LedgerService>,
}

impl Fixture {
    pub async fn new() -> Self {
        let db = test_pool().await;
        let clock = Arc::new(ManualClock::new(t0()));
        let events = EventBus::new();
        let locks = Arc::new(ContainerLocks::new());

        let takeouts = Arc::new(TakeoutService::new(
            db.clone(),
            clock.clone(),
            events.clone(),
            locks.clone(),
        ));
        let fullness = Arc::new(FullnessService::new(
            db.clone(),
            clock.clone(),
            events.clone(),
            locks.clone(),
            takeouts.clone(),
        ));
        Self {
            buildings: Arc::new(BuildingService::new(
                db.clone(),
                clock.clone(),
                fullness.clone(),
            )),
            containers: Arc::new(ContainerService::new(
                db.clone(),
                clock.clone(),
                locks,
                fullness.clone(),
            )),
            fullness,
            ledger: Arc::new(LedgerService::new(db.clone(), clock.clone())),
            takeouts,
            db,
            clock,
            events,
        }
    }

    pub fn state(&self) -> crate::AppState {
        (
            self.buildings.clone(),
            self.containers.clone(),
            self.fullness.clone(),
            self.takeouts.clone(),
            self.ledger.clone(),
        )
    }

    pub async fn building(&self, address: &str) -> i64 {
        self.buildings
            .create_building(CreateBuildingRequest {
                address: address.to_string(),
                precollected_mass: None,
            })
            .await
            .unwrap()
            .id
    }

    pub async fn section(&self, building_id: i64, num: i64) -> i64 {
        self.buildings
            .create_section(building_id, CreateSectionRequest { num })
            .await
            .unwrap()
            .id
    }

    pub async fn set_building_condition(
        &self,
        building_id: i64,
        f: impl FnOnce(&mut TakeoutCondition),
    ) {
        let condition = self.buildings.building_condition(building_id).await.unwrap();
        self.apply_condition(condition, f).await;
    }

    pub async fn set_section_condition(
        &self,
        section_id: i64,
        f: impl FnOnce(&mut TakeoutCondition),
    ) {
        let condition = self.buildings.section_condition(section_id).await.unwrap();
        self.apply_condition(condition, f).await;
    }

    async fn apply_condition(
        &self,
        mut condition: TakeoutCondition,
        f: impl FnOnce(&mut TakeoutCondition),
    ) {
        f(&mut condition);
        self.buildings
            .update_condition(
                condition.id,
                UpdateTakeoutConditionRequest {
                    office_days: condition.office_days,
                    public_days: condition.public_days,
                    mass: condition.mass,
                    ignore_reports: condition.ignore_reports,
                },
            )
            .await
            .unwrap();
    }

    pub async fn waiting_container(&self, building_id: i64, kind: ContainerKind) -> i64 {
        self.containers
            .create_container(CreateContainerRequest {
                kind,
                building_id,
                section_id: None,
                floor: 1,
                room: None,
                description: None,
                email: None,
                phone: None,
                reserved: false,
            })
            .await
            .unwrap()
            .id
    }

    pub async fn active_container(
        &self,
        building_id: i64,
        section_id: Option<i64>,
        kind: ContainerKind,
    ) -> i64 {
        let container = self
            .containers
            .create_container(CreateContainerRequest {
                kind,
                building_id,
                section_id,
                floor: 1,
                room: None,
                description: None,
                email: None,
                phone: None,
                reserved: false,
            })
            .await
            .unwrap();
        self.containers.activate_container(container.id).await.unwrap().id
    }
}
