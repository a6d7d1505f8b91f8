pub mod buildings;
pub mod containers;
pub mod stats;
pub mod takeouts;

pub use buildings::*;
pub use containers::*;
pub use stats::*;
pub use takeouts::*;
