pub mod building_service;
pub mod container_service;
pub mod fullness_service;
pub mod ledger_service;
pub mod locks;
pub mod takeout_service;

#[cfg(test)]
pub(crate) mod testing;

pub use building_service::BuildingService;
pub use container_service::ContainerService;
pub use fullness_service::{FullReportResult, FullnessService};
pub use ledger_service::LedgerService;
pub use locks::ContainerLocks;
pub use takeout_service::TakeoutService;
