//! Background Tasks Module
//!
//! Contains background tasks owned by a cache engine.
//!
//! # Tasks
//! - Maintenance: purges expired entries and enforces the size bound while
//!   the cache has something to watch

mod maintenance;

pub use maintenance::MaintenanceReport;
pub(crate) use maintenance::{spawn_maintenance_task, Maintained};
