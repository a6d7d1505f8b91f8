pub mod building;
pub mod container;
pub mod takeout;

pub use building::*;
pub use container::*;
pub use takeout::*;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    pub static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9 ()\-]{5,20}$").unwrap();
}
