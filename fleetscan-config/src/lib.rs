//! Configuration and inventory loading for fleetscan.
//!
//! Settings come from a TOML/JSON file or the environment (see
//! [`FleetscanConfig::load_from_env`]); the scannable fleet comes from a TOML
//! inventory file.

pub mod error;
pub mod inventory;
pub mod models;

pub use error::ConfigError;
pub use inventory::{Inventory, InventoryTarget, find_target};
pub use models::{ConfigSource, DatabaseConfig, FleetscanConfig};
