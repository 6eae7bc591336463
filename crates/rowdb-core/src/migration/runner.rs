//! Row-by-row data migrations.
//!
//! A migration applies a caller-supplied transform to every row of a table.
//! A row whose transform fails, whose result no longer fits the schema, or
//! whose `id` was changed is left as it was and the pass carries on. A
//! transform that drops `id` keeps the original one.

use std::fmt::Display;

use tracing::{info, warn};

use crate::catalog::{Row, TableUnit, ID_FIELD};
use crate::constraint::SchemaValidator;
use crate::query::compare::values_equal;

/// Outcome counts for one migration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Rows visited.
    pub total: usize,
    /// Rows replaced by their transformed version.
    pub transformed: usize,
    /// Rows left unchanged because the transform or validation failed.
    pub failed: usize,
}

/// Applies per-row transforms.
pub struct MigrationRunner;

impl MigrationRunner {
    /// Run `transform(row, index, all_rows)` over `rows`, which must be the
    /// plaintext rows of `unit` in stored order.
    ///
    /// `all_rows` is the snapshot taken before the pass started. Each
    /// transformed row is validated against the schema and against the rows
    /// as they stand at that point of the pass.
    pub fn run<F, E>(unit: &TableUnit, rows: Vec<Row>, mut transform: F) -> (Vec<Row>, MigrationReport)
    where
        F: FnMut(&Row, usize, &[Row]) -> Result<Row, E>,
        E: Display,
    {
        let original = rows.clone();
        let mut working = rows;
        let mut report = MigrationReport {
            total: original.len(),
            ..Default::default()
        };
        let validator = SchemaValidator::new(&unit.name, &unit.columns);

        for (index, row) in original.iter().enumerate() {
            let mut candidate = match transform(row, index, &original) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(table = %unit.name, index, error = %e, "migration transform failed, row left unchanged");
                    report.failed += 1;
                    continue;
                }
            };

            if let Some(original_id) = row.get(ID_FIELD) {
                match candidate.get(ID_FIELD) {
                    None => {
                        candidate.insert(ID_FIELD.to_string(), original_id.clone());
                    }
                    Some(id) if !values_equal(id, original_id) => {
                        warn!(table = %unit.name, index, "migration changed the row id, row left unchanged");
                        report.failed += 1;
                        continue;
                    }
                    Some(_) => {}
                }
            }

            let others: Vec<Row> = working
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, r)| r.clone())
                .collect();
            match validator.validate(&candidate, &others) {
                Ok(valid) => {
                    working[index] = valid;
                    report.transformed += 1;
                }
                Err(e) => {
                    warn!(table = %unit.name, index, error = %e, "migrated row failed validation, row left unchanged");
                    report.failed += 1;
                }
            }
        }

        info!(
            table = %unit.name,
            total = report.total,
            transformed = report.transformed,
            failed = report.failed,
            "migration pass complete"
        );
        (working, report)
    }
}
