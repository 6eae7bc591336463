//! Referential integrity across tables.
//!
//! Foreign keys are checked when rows are written. Cascading deletes are
//! planned against every dependent table first and then committed one table
//! at a time, with no rollback if a later commit fails.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::{RelationDef, Row, TableUnit};
use crate::error::Error;
use crate::query::compare::values_equal;
use crate::security::RowCipher;
use crate::storage::{Snapshot, TableStore};

/// Rows removed from one dependent table by a cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeEffect {
    /// Dependent table.
    pub table: String,
    /// Rows removed from it.
    pub rows_removed: usize,
}

/// Pending cascade: dependent tables with their rows already removed in
/// memory, not yet persisted.
#[derive(Debug, Default)]
pub struct CascadePlan {
    steps: Vec<(Snapshot, usize)>,
}

impl CascadePlan {
    /// Check if the cascade touches no table.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of tables the cascade will write.
    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

/// Enforces relationships for one database.
pub struct RelationshipEnforcer<'a> {
    store: &'a TableStore,
}

impl<'a> RelationshipEnforcer<'a> {
    /// Create an enforcer over a database's store.
    pub fn new(store: &'a TableStore) -> Self {
        Self { store }
    }

    /// Check every relationship whose local field is set on `row`.
    ///
    /// A relationship pointing at `unit` itself is resolved against `unit`'s
    /// in-memory rows.
    pub fn check_row(&self, unit: &TableUnit, row: &Row) -> Result<(), Error> {
        self.check_rows(unit, std::slice::from_ref(row))
    }

    /// Check several rows, loading each foreign table once.
    pub fn check_rows(&self, unit: &TableUnit, rows: &[Row]) -> Result<(), Error> {
        let mut foreign_cache: HashMap<String, Vec<Row>> = HashMap::new();

        for (field, rel) in &unit.relationships {
            for row in rows {
                let Some(value) = row.get(field).filter(|v| !v.is_null()) else {
                    continue;
                };

                if !foreign_cache.contains_key(&rel.foreign_table) {
                    let loaded = self.foreign_rows(unit, rel)?;
                    foreign_cache.insert(rel.foreign_table.clone(), loaded);
                }
                let foreign = &foreign_cache[&rel.foreign_table];

                let found = foreign
                    .iter()
                    .any(|r| r.get(&rel.foreign_key).is_some_and(|v| values_equal(v, value)));
                if !found {
                    return Err(Error::ForeignKeyViolation {
                        table: unit.name.clone(),
                        field: field.clone(),
                        foreign_table: rel.foreign_table.clone(),
                        foreign_key: rel.foreign_key.clone(),
                        value: value.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn foreign_rows(&self, unit: &TableUnit, rel: &RelationDef) -> Result<Vec<Row>, Error> {
        if rel.foreign_table == unit.name {
            let cipher = RowCipher::for_table(&unit.options.encryption)?;
            return Ok(cipher.decrypt_rows(&unit.rows));
        }
        let snapshot = self.store.load(&rel.foreign_table)?;
        let cipher = RowCipher::for_table(&snapshot.unit.options.encryption)?;
        Ok(cipher.decrypt_rows(&snapshot.unit.rows))
    }

    /// Work out which rows of other tables depend on `deleted`.
    ///
    /// `deleted` holds the plaintext rows removed from `table`. Nothing is
    /// written; the plan is committed by [`Self::execute`].
    pub fn plan_cascade(&self, table: &str, deleted: &[Row]) -> Result<CascadePlan, Error> {
        let mut plan = CascadePlan::default();
        if deleted.is_empty() {
            return Ok(plan);
        }

        for name in self.store.list_tables()? {
            if name == table {
                continue;
            }
            let mut snapshot = self.store.load(&name)?;
            let relations: Vec<(String, RelationDef)> = snapshot
                .unit
                .relationships
                .iter()
                .filter(|(_, rel)| rel.references(table))
                .map(|(f, r)| (f.clone(), r.clone()))
                .collect();
            if relations.is_empty() {
                continue;
            }

            let removed = {
                let cipher = RowCipher::for_table(&snapshot.unit.options.encryption)?;
                let before = snapshot.unit.rows.len();
                snapshot.unit.rows.retain(|stored| {
                    let plain = cipher.decrypt_row(stored);
                    !relations
                        .iter()
                        .any(|(field, rel)| references_any(&plain, field, rel, deleted))
                });
                before - snapshot.unit.rows.len()
            };

            if removed > 0 {
                debug!(table = %name, removed, "cascade planned");
                plan.steps.push((snapshot, removed));
            }
        }
        Ok(plan)
    }

    /// Commit a cascade plan table by table.
    ///
    /// Tables committed before a failure stay modified; the error reports how
    /// many of the planned tables were written.
    pub fn execute(&self, plan: CascadePlan) -> Result<Vec<CascadeEffect>, Error> {
        let attempted = plan.steps.len();
        let mut effects = Vec::with_capacity(attempted);

        for (mut snapshot, rows_removed) in plan.steps {
            if let Err(e) = self.store.commit(&mut snapshot) {
                warn!(
                    table = %snapshot.unit.name,
                    completed = effects.len(),
                    attempted,
                    "cascade interrupted"
                );
                return Err(Error::CascadeIncomplete {
                    completed: effects.len(),
                    attempted,
                    source: Box::new(e),
                });
            }
            effects.push(CascadeEffect {
                table: snapshot.unit.name.clone(),
                rows_removed,
            });
        }

        if !effects.is_empty() {
            info!(tables = effects.len(), "cascade complete");
        }
        Ok(effects)
    }
}

/// Check if `row.field` equals the referenced key of any deleted row.
fn references_any(row: &Row, field: &str, rel: &RelationDef, deleted: &[Row]) -> bool {
    let Some(value) = row.get(field).filter(|v| !v.is_null()) else {
        return false;
    };
    deleted
        .iter()
        .filter_map(|d| d.get(&rel.foreign_key))
        .any(|key: &Value| values_equal(key, value))
}
