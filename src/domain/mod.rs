pub mod clock;
pub mod events;
pub mod fullness;
pub mod ledger;
pub mod takeout;

pub use clock::{Clock, SystemClock};
pub use events::{CoreEvent, EventBus};
pub use fullness::{FullnessTracker, ReportOutcome, Thresholds};
pub use ledger::{CollectionPeriod, MassLedger};
pub use takeout::{
    BuildingScope, MassRuleTrigger, NotifyDecision, ScopeRef, SectionScope, TakeoutReason,
    TakeoutScope,
};
