use std::sync::Arc;

use crate::db::rows::{fetch_buildings, fetch_tank, load_ledger};
use crate::db::DatabasePool;
use crate::domain::ledger::collected_mass_summary;
use crate::domain::{Clock, CollectionPeriod};
use crate::error::{AppError, AppResult};
use crate::models::{BuildingMassStats, CollectedMassQuery, CollectedMassSummary, TankTakeoutReport};

pub struct LedgerService {
    db: DatabasePool,
    clock: Arc<dyn Clock>,
}

impl LedgerService {
    pub fn new(db: DatabasePool, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub async fn building_mass_stats(
        &self,
        building_id: i64,
        query: CollectedMassQuery,
    ) -> AppResult<BuildingMassStats> {
        if let (Some(start), Some(end)) = (query.start, query.end) {
            if start > end {
                return Err(AppError::BadRequest("start must not be after end".to_string()));
            }
        }

        let now = self.clock.now();
        let mut conn = self.db.pool().acquire().await?;
        let ledger = load_ledger(&mut conn, building_id).await?;

        Ok(BuildingMassStats {
            building_id,
            calculated_collected_mass: ledger.calculated_collected_mass(),
            confirmed_collected_mass: ledger
                .confirmed_collected_mass(CollectionPeriod::from_query(&query, now)),
            avg_fill_speed: ledger.avg_fill_speed(now),
        })
    }

    /// Every tank offload of the building with its mass reconciliation, newest first.
    pub async fn tank_reports(&self, building_id: i64) -> AppResult<Vec<TankTakeoutReport>> {
        let mut conn = self.db.pool().acquire().await?;
        let ledger = load_ledger(&mut conn, building_id).await?;
        Ok(ledger.tanks.iter().rev().map(|t| ledger.tank_report(t)).collect())
    }

    pub async fn tank_report(&self, id: i64) -> AppResult<TankTakeoutReport> {
        let mut conn = self.db.pool().acquire().await?;
        let tank = fetch_tank(&mut conn, id).await?;
        let ledger = load_ledger(&mut conn, tank.building_id).await?;
        Ok(ledger.tank_report(&tank))
    }

    /// Network-wide confirmed mass with its environmental equivalents.
    pub async fn collected_mass_summary(&self) -> AppResult<CollectedMassSummary> {
        let mut conn = self.db.pool().acquire().await?;
        let mut total = 0;
        for building in fetch_buildings(&mut conn).await? {
            total += load_ledger(&mut conn, building.id)
                .await?
                .confirmed_collected_mass(CollectionPeriod::AllTime);
        }
        Ok(collected_mass_summary(total))
    }
}
