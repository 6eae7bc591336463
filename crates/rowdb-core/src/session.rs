//! Session: the operation surface of the engine.
//!
//! A [`Session`] owns the selected database. Every table operation loads the
//! target unit, works on it in memory and commits it back in full.

use std::collections::HashSet;
use std::fmt::Display;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{
    check_column, now_iso, ColumnDef, IndexDef, IndexKind, IndexOptions, RelationDef, Row,
    TableOptions, TableUnit, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD,
};
use crate::constraint::{CascadeEffect, CascadePlan, RelationshipEnforcer, SchemaValidator};
use crate::error::Error;
use crate::migration::{MigrationReport, MigrationRunner};
use crate::query::compare::values_equal;
use crate::query::{Filter, JoinSource, QueryExecutor, SelectQuery};
use crate::security::RowCipher;
use crate::storage::{IndexManager, Snapshot, StoreConfig, TableStore};

/// Options for `insert` and `insert_many`.
#[derive(Debug, Clone, Copy)]
pub struct InsertOptions {
    /// Check foreign keys before writing.
    pub check_references: bool,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            check_references: true,
        }
    }
}

impl InsertOptions {
    /// Skip foreign key checks.
    pub fn unchecked() -> Self {
        Self {
            check_references: false,
        }
    }
}

/// Options for `delete`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Remove dependent rows in other tables.
    pub cascade: bool,
}

impl DeleteOptions {
    /// Delete with cascade.
    pub fn cascade() -> Self {
        Self { cascade: true }
    }
}

/// Outcome of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Rows matching the filter.
    pub matched: usize,
    /// Rows rewritten.
    pub updated: usize,
    /// Matching rows left unchanged because the patched row was invalid.
    pub skipped: usize,
}

/// Outcome of a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Rows removed from the target table.
    pub deleted: usize,
    /// Rows removed from dependent tables, per table.
    pub cascaded: Vec<CascadeEffect>,
}

/// A connection to a store root with an optional selected database.
///
/// The selected database sits behind a lock so a session can be shared
/// between threads. Table units themselves are not locked.
#[derive(Debug)]
pub struct Session {
    config: StoreConfig,
    current: RwLock<Option<TableStore>>,
}

impl Session {
    /// Open a session over a store root. No database is selected.
    pub fn open(config: StoreConfig) -> Self {
        Self {
            config,
            current: RwLock::new(None),
        }
    }

    /// Store configuration this session was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Select a database, creating it if it does not exist.
    #[instrument(skip(self))]
    pub fn use_database(&self, name: &str) -> Result<(), Error> {
        let store = TableStore::open(&self.config, name)?;
        *self.current.write() = Some(store);
        info!(database = name, "database selected");
        Ok(())
    }

    /// Name of the selected database.
    pub fn current_database(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.database().to_string())
    }

    fn store(&self) -> Result<TableStore, Error> {
        self.current.read().clone().ok_or(Error::DatabaseNotSelected)
    }

    /// Names of the tables in the selected database, sorted.
    pub fn list_tables(&self) -> Result<Vec<String>, Error> {
        self.store()?.list_tables()
    }

    /// Create a table. Returns its definition.
    #[instrument(skip(self, columns, relationships, options))]
    pub fn create_table(
        &self,
        name: &str,
        columns: IndexMap<String, ColumnDef>,
        relationships: IndexMap<String, RelationDef>,
        options: TableOptions,
    ) -> Result<TableUnit, Error> {
        let store = self.store()?;
        let unit = TableUnit::new(name, columns, relationships, options)?;
        let snapshot = store.create(unit)?;
        info!(
            table = name,
            columns = snapshot.unit.columns.len(),
            relationships = snapshot.unit.relationships.len(),
            "table created"
        );
        Ok(snapshot.unit)
    }

    /// Table definition without rows.
    pub fn describe(&self, table: &str) -> Result<TableUnit, Error> {
        Ok(self.store()?.load(table)?.unit.describe())
    }

    /// Number of rows matching `filter`.
    pub fn count(&self, table: &str, filter: &Filter) -> Result<usize, Error> {
        let unit = self.store()?.load(table)?.unit;
        let rows = plain_rows(&unit)?;
        Ok(rows.iter().filter(|r| filter.matches(r)).count())
    }

    /// Insert one row. Returns the stored row in plaintext.
    #[instrument(skip(self, row))]
    pub fn insert(&self, table: &str, row: Row, options: InsertOptions) -> Result<Row, Error> {
        let store = self.store()?;
        let mut snapshot = store.load(table)?;
        let stored = insert_into(&store, &mut snapshot, row, options)?;
        store.commit(&mut snapshot)?;
        debug!(table, rows = snapshot.unit.rows.len(), "row inserted");
        Ok(stored)
    }

    /// Insert rows one after another, each persisted before the next.
    ///
    /// Rows written before a failure stay written; the error reports how
    /// many were.
    #[instrument(skip(self, rows), fields(count = rows.len()))]
    pub fn insert_many(
        &self,
        table: &str,
        rows: Vec<Row>,
        options: InsertOptions,
    ) -> Result<Vec<Row>, Error> {
        let attempted = rows.len();
        let mut out = Vec::with_capacity(attempted);
        for row in rows {
            match self.insert(table, row, options) {
                Ok(stored) => out.push(stored),
                Err(e) => {
                    warn!(table, completed = out.len(), attempted, "batch insert interrupted");
                    return Err(Error::BatchIncomplete {
                        completed: out.len(),
                        attempted,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(out)
    }

    /// Run a select query against a table.
    #[instrument(skip(self, query))]
    pub fn select(&self, table: &str, query: &SelectQuery) -> Result<Vec<Row>, Error> {
        let store = self.store()?;
        let unit = store.load(table)?.unit;
        let rows = plain_rows(&unit)?;
        QueryExecutor::execute(query, rows, &StoreJoinSource { store: &store })
    }

    /// Apply `patch` to every row matching `filter`.
    ///
    /// A patch with a dangling foreign key fails the whole update. A matching
    /// row whose patched form does not validate is left unchanged and counted
    /// as skipped.
    #[instrument(skip(self, patch, filter))]
    pub fn update(&self, table: &str, patch: Row, filter: &Filter) -> Result<UpdateReport, Error> {
        let store = self.store()?;
        let mut snapshot = store.load(table)?;

        if patch.contains_key(ID_FIELD) {
            return Err(Error::validation(
                table,
                vec![format!("{}: cannot be changed by update", ID_FIELD)],
            ));
        }
        RelationshipEnforcer::new(&store).check_row(&snapshot.unit, &patch)?;

        let unit = &mut snapshot.unit;
        let cipher = RowCipher::for_table(&unit.options.encryption)?;
        let validator = SchemaValidator::new(&unit.name, &unit.columns);
        let mut working = cipher.decrypt_rows(&unit.rows);
        let mut report = UpdateReport::default();

        for index in 0..working.len() {
            if !filter.matches(&working[index]) {
                continue;
            }
            report.matched += 1;

            let mut merged = working[index].clone();
            for (field, value) in &patch {
                merged.insert(field.clone(), value.clone());
            }
            if unit.options.timestamps {
                merged.insert(UPDATED_AT_FIELD.to_string(), Value::String(now_iso()));
            }

            match validator.validate(&merged, &working) {
                Ok(valid) => {
                    unit.rows[index] = cipher.encrypt_row(&valid)?;
                    working[index] = valid;
                    report.updated += 1;
                }
                Err(e) => {
                    warn!(table, index, error = %e, "updated row failed validation, row left unchanged");
                    report.skipped += 1;
                }
            }
        }

        if report.updated > 0 {
            store.commit(&mut snapshot)?;
        }
        debug!(
            table,
            matched = report.matched,
            updated = report.updated,
            skipped = report.skipped,
            "update complete"
        );
        Ok(report)
    }

    /// Delete every row matching `filter`.
    ///
    /// With cascade, dependent rows in other tables are planned before the
    /// target table is written and removed after it.
    #[instrument(skip(self, filter))]
    pub fn delete(
        &self,
        table: &str,
        filter: &Filter,
        options: DeleteOptions,
    ) -> Result<DeleteReport, Error> {
        let store = self.store()?;
        let mut snapshot = store.load(table)?;

        let (deleted, kept) = {
            let cipher = RowCipher::for_table(&snapshot.unit.options.encryption)?;
            let mut deleted = Vec::new();
            let mut kept = Vec::with_capacity(snapshot.unit.rows.len());
            for stored in &snapshot.unit.rows {
                let plain = cipher.decrypt_row(stored);
                if filter.matches(&plain) {
                    deleted.push(plain);
                } else {
                    kept.push(stored.clone());
                }
            }
            (deleted, kept)
        };

        if deleted.is_empty() {
            return Ok(DeleteReport::default());
        }

        let enforcer = RelationshipEnforcer::new(&store);
        let plan = if options.cascade {
            enforcer.plan_cascade(table, &deleted)?
        } else {
            CascadePlan::default()
        };

        snapshot.unit.rows = kept;
        store.commit(&mut snapshot)?;
        let cascaded = enforcer.execute(plan)?;

        info!(
            table,
            deleted = deleted.len(),
            cascaded_tables = cascaded.len(),
            "rows deleted"
        );
        Ok(DeleteReport {
            deleted: deleted.len(),
            cascaded,
        })
    }

    /// Declare an index on a field.
    #[instrument(skip(self))]
    pub fn add_index(
        &self,
        table: &str,
        field: &str,
        options: IndexOptions,
    ) -> Result<IndexDef, Error> {
        let store = self.store()?;
        let mut snapshot = store.load(table)?;

        if options.kind == IndexKind::Hash && snapshot.unit.options.encryption.covers(field) {
            return Err(Error::InvalidSchema(format!(
                "hash index on encrypted field '{}' would store plaintext",
                field
            )));
        }

        let rows = plain_rows(&snapshot.unit)?;
        let def = IndexManager::add_index(&mut snapshot.unit, &rows, field, options)?;
        store.commit(&mut snapshot)?;
        Ok(def)
    }

    /// Add a column to an existing table, backfilling its default.
    ///
    /// A required column without a default can only be added to an empty
    /// table.
    #[instrument(skip(self, def))]
    pub fn add_column(&self, table: &str, name: &str, def: ColumnDef) -> Result<(), Error> {
        let store = self.store()?;
        let mut snapshot = store.load(table)?;
        let unit = &mut snapshot.unit;

        if unit.columns.contains_key(name) {
            return Err(Error::ColumnExists {
                table: table.to_string(),
                column: name.to_string(),
            });
        }
        let mut problems = Vec::new();
        check_column(name, &def, &mut problems);
        if !problems.is_empty() {
            return Err(Error::InvalidSchema(problems.join("; ")));
        }

        if !unit.rows.is_empty() {
            let mut violations = Vec::new();
            match &def.default {
                Some(default) => {
                    let single: IndexMap<String, ColumnDef> =
                        [(name.to_string(), def.clone())].into_iter().collect();
                    let validator = SchemaValidator::new(table, &single);
                    let mut filled: Vec<Value> = Vec::with_capacity(unit.rows.len());
                    for _ in 0..unit.rows.len() {
                        let value = default.resolve();
                        validator.check_value(name, &def, &value, &mut violations);
                        if def.unique && filled.iter().any(|v| values_equal(v, &value)) {
                            violations.push(format!("{}: value {} already exists", name, value));
                        }
                        filled.push(value);
                    }
                    if violations.is_empty() {
                        for (row, value) in unit.rows.iter_mut().zip(filled) {
                            row.insert(name.to_string(), value);
                        }
                    }
                }
                None if def.required => {
                    violations.push(format!("{}: is required", name));
                }
                None => {}
            }
            if !violations.is_empty() {
                let mut seen = HashSet::new();
                violations.retain(|v| seen.insert(v.clone()));
                return Err(Error::validation(table, violations));
            }
        }

        unit.columns.insert(name.to_string(), def);
        store.commit(&mut snapshot)?;
        info!(table, column = name, "column added");
        Ok(())
    }

    /// Remove a column and every trace of it from the table.
    #[instrument(skip(self))]
    pub fn remove_column(&self, table: &str, name: &str) -> Result<(), Error> {
        let store = self.store()?;
        let mut snapshot = store.load(table)?;
        let unit = &mut snapshot.unit;

        if name == ID_FIELD {
            return Err(Error::InvalidSchema(format!("'{}' cannot be removed", ID_FIELD)));
        }
        if unit.options.timestamps && (name == CREATED_AT_FIELD || name == UPDATED_AT_FIELD) {
            return Err(Error::InvalidSchema(format!(
                "'{}' is required while timestamps are enabled",
                name
            )));
        }
        unit.column(name)?;

        unit.columns.shift_remove(name);
        unit.relationships.shift_remove(name);
        unit.indexes.shift_remove(name);
        unit.options.encryption.fields.retain(|f| f != name);
        for row in &mut unit.rows {
            row.shift_remove(name);
        }

        store.commit(&mut snapshot)?;
        info!(table, column = name, "column removed");
        Ok(())
    }

    /// Apply `transform(row, index, all_rows)` to every row.
    ///
    /// Rows whose transform fails, or whose result does not validate, are
    /// left unchanged.
    #[instrument(skip(self, transform))]
    pub fn migrate<F, E>(&self, table: &str, transform: F) -> Result<MigrationReport, Error>
    where
        F: FnMut(&Row, usize, &[Row]) -> Result<Row, E>,
        E: Display,
    {
        let store = self.store()?;
        let mut snapshot = store.load(table)?;
        let rows = plain_rows(&snapshot.unit)?;
        let (rows, report) = MigrationRunner::run(&snapshot.unit, rows, transform);

        if report.transformed > 0 {
            let stored = {
                let cipher = RowCipher::for_table(&snapshot.unit.options.encryption)?;
                rows.iter()
                    .map(|r| cipher.encrypt_row(r))
                    .collect::<Result<Vec<_>, _>>()?
            };
            snapshot.unit.rows = stored;
            store.commit(&mut snapshot)?;
        }
        Ok(report)
    }
}

/// Validate, check and append one row to a loaded unit. Returns the
/// plaintext row.
fn insert_into(
    store: &TableStore,
    snapshot: &mut Snapshot,
    mut row: Row,
    options: InsertOptions,
) -> Result<Row, Error> {
    let unit = &mut snapshot.unit;
    let cipher = RowCipher::for_table(&unit.options.encryption)?;
    let existing = cipher.decrypt_rows(&unit.rows);

    if unit.options.timestamps {
        let now = Value::String(now_iso());
        row.insert(CREATED_AT_FIELD.to_string(), now.clone());
        row.insert(UPDATED_AT_FIELD.to_string(), now);
    }

    let valid = SchemaValidator::new(&unit.name, &unit.columns).validate_new(&row, &existing)?;
    if options.check_references {
        RelationshipEnforcer::new(store).check_row(unit, &valid)?;
    }

    let stored = cipher.encrypt_row(&valid)?;
    unit.rows.push(stored);
    Ok(valid)
}

/// Decrypted copy of a unit's rows.
fn plain_rows(unit: &TableUnit) -> Result<Vec<Row>, Error> {
    let cipher = RowCipher::for_table(&unit.options.encryption)?;
    Ok(cipher.decrypt_rows(&unit.rows))
}

/// Join source reading other tables of the same database.
struct StoreJoinSource<'a> {
    store: &'a TableStore,
}

impl JoinSource for StoreJoinSource<'_> {
    fn rows(&self, table: &str) -> Result<Option<Vec<Row>>, Error> {
        match self.store.try_load(table)? {
            Some(snapshot) => Ok(Some(plain_rows(&snapshot.unit)?)),
            None => Ok(None),
        }
    }
}
