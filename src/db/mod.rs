//! Database module: store errors, view models and SQL repositories.
//!
//! This module is split into three submodules:
//! - `error`: the `StoreError` every repository function returns.
//! - `model`: view models and query filters used by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules import from `edutrack::db`; the repository API and commonly used
//! models are re-exported here.

pub mod error;
pub mod model;
pub mod repo;

pub use error::{StoreError, StoreResult};
pub use repo::*;

pub use model::{AttendanceFilter, DateOrder, MarkingSheetRow, ScheduledSlot};
