//! Collected-mass accounting for one building.
//!
//! Three sources feed it: confirmed container pickups (an estimate from
//! container capacities), confirmed tank offloads (operator-weighed), and
//! the manual pre-collection offset. Everything is recomputed from the
//! request rows, so late confirmations and corrections need no repair.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use std::collections::HashMap;

use crate::models::{
    CollectedMassQuery, CollectedMassSummary, ContainersTakeoutRequest, TankTakeoutReport,
    TankTakeoutRequest,
};

/// Lookback used for the first tank offload of a building.
pub const FIRST_TANK_WINDOW_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionPeriod {
    AllTime,
    Between {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
}

impl CollectionPeriod {
    pub fn from_query(query: &CollectedMassQuery, now: DateTime<Utc>) -> Self {
        if query.yearly {
            let start = Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0).single();
            return CollectionPeriod::Between {
                start,
                end: Some(now),
            };
        }
        match (query.start, query.end) {
            (None, None) => CollectionPeriod::AllTime,
            (start, end) => CollectionPeriod::Between { start, end },
        }
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        match self {
            CollectionPeriod::AllTime => true,
            CollectionPeriod::Between { start, end } => {
                start.map_or(true, |s| at >= s) && end.map_or(true, |e| at <= e)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MassLedger {
    pub precollected_mass: Option<i64>,
    /// Container mass in kg as recorded when a pickup emptied it, keyed by
    /// (request id, container id).
    pub emptied_masses: HashMap<(i64, i64), i64>,
    pub takeouts: Vec<ContainersTakeoutRequest>,
    pub tanks: Vec<TankTakeoutRequest>,
}

impl MassLedger {
    pub fn takeout_mass(&self, takeout: &ContainersTakeoutRequest) -> i64 {
        takeout
            .emptied_container_ids
            .iter()
            .filter_map(|id| self.emptied_masses.get(&(takeout.id, *id)))
            .sum()
    }

    pub fn calculated_collected_mass(&self) -> i64 {
        let collected: i64 = self
            .takeouts
            .iter()
            .filter(|t| t.confirmed_at.is_some())
            .map(|t| self.takeout_mass(t))
            .sum();
        self.precollected_mass.unwrap_or(0) + collected
    }

    /// The pre-collection offset predates tracking, so only the unbounded
    /// period includes it.
    pub fn confirmed_collected_mass(&self, period: CollectionPeriod) -> i64 {
        let confirmed: i64 = self
            .tanks
            .iter()
            .filter(|t| t.confirmed_at.is_some_and(|at| period.contains(at)))
            .filter_map(|t| t.confirmed_mass)
            .sum();
        match period {
            CollectionPeriod::AllTime => confirmed + self.precollected_mass.unwrap_or(0),
            CollectionPeriod::Between { .. } => confirmed,
        }
    }

    /// Kilograms per month since the first confirmed tank offload.
    pub fn avg_fill_speed(&self, now: DateTime<Utc>) -> Option<f64> {
        let first = self.tanks.iter().filter_map(|t| t.confirmed_at).min()?;
        let months = (now.year() - first.year()) as i64 * 12 + now.month() as i64
            - first.month() as i64;
        let months = months.max(1);
        Some(self.confirmed_collected_mass(CollectionPeriod::AllTime) as f64 / months as f64)
    }

    fn previous_tank(&self, tank: &TankTakeoutRequest) -> Option<&TankTakeoutRequest> {
        self.tanks
            .iter()
            .filter(|t| t.id != tank.id && t.created_at < tank.created_at)
            .filter(|t| t.confirmed_at.is_some())
            .max_by_key(|t| (t.created_at, t.id))
    }

    /// Pickups confirmed between the previous offload and this request.
    pub fn tank_mass(&self, tank: &TankTakeoutRequest) -> i64 {
        let anchor = self
            .tanks
            .iter()
            .filter(|t| t.id != tank.id && t.created_at < tank.created_at)
            .filter_map(|t| t.confirmed_at)
            .max()
            .unwrap_or(tank.created_at - Duration::days(FIRST_TANK_WINDOW_DAYS));

        self.takeouts
            .iter()
            .filter(|t| {
                t.confirmed_at
                    .is_some_and(|at| at > anchor && at < tank.created_at)
            })
            .map(|t| self.takeout_mass(t))
            .sum()
    }

    pub fn tank_report(&self, tank: &TankTakeoutRequest) -> TankTakeoutReport {
        let mass = self.tank_mass(tank);
        let confirmed = tank.confirmed_at.and(tank.confirmed_mass);

        let confirmed_mass_match = confirmed
            .filter(|c| *c != 0)
            .map(|c| mass as f64 / c as f64);
        let mass_difference = confirmed.map(|c| mass - c);
        let wait_time = tank
            .confirmed_at
            .map(|at| (at - tank.created_at).num_seconds());
        let fill_time = self
            .previous_tank(tank)
            .and_then(|prev| prev.confirmed_at)
            .map(|at| (tank.created_at - at).num_seconds());

        TankTakeoutReport {
            request: tank.clone(),
            mass,
            confirmed_mass_match,
            mass_difference,
            wait_time,
            fill_time,
        }
    }

    /// Mass collected from one container over the confirmed pickups that emptied it.
    pub fn container_collected_mass(&self, container_id: i64) -> i64 {
        self.takeouts
            .iter()
            .filter(|t| t.confirmed_at.is_some())
            .filter_map(|t| self.emptied_masses.get(&(t.id, container_id)))
            .sum()
    }
}

pub fn collected_mass_summary(total_kg: i64) -> CollectedMassSummary {
    let tonnes = (total_kg / 100) as f64 / 10.0;
    CollectedMassSummary {
        total_mass: tonnes,
        trees: (tonnes * 12.0) as i64,
        energy: (tonnes * 4.7) as i64,
        water: (tonnes * 33.0) as i64,
    }
}
