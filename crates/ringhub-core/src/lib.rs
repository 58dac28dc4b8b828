pub mod config;
pub mod counters;
pub mod error;

pub use config::{AddressFamily, HubConfig};
pub use counters::{Counters, DropReason, Traffic};
pub use error::HubError;
