//! Data migrations over existing rows.

mod runner;

pub use runner::{MigrationReport, MigrationRunner};
