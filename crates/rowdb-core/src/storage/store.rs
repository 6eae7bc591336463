//! Whole-unit persistence for tables.
//!
//! A table is read in full into a [`Snapshot`], mutated in memory and
//! written back in full by [`TableStore::commit`]. Writes go through a
//! temporary file that is renamed over the previous unit.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::StoreConfig;
use crate::catalog::TableUnit;
use crate::error::Error;

const UNIT_EXTENSION: &str = "json";

/// A loaded table unit and the fingerprint of the bytes it came from.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// The table state being mutated.
    pub unit: TableUnit,
    fingerprint: String,
}

impl Snapshot {
    /// Fingerprint of the persisted bytes this snapshot was read from.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Persistence for the table units of one database.
#[derive(Debug, Clone)]
pub struct TableStore {
    database: String,
    dir: PathBuf,
    config: StoreConfig,
}

impl TableStore {
    /// Open the store for a database, creating its directory if needed.
    pub fn open(config: &StoreConfig, database: &str) -> Result<Self, Error> {
        validate_name(database)?;
        let dir = config.database_dir(database);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            database: database.to_string(),
            dir,
            config: config.clone(),
        })
    }

    /// Name of the database this store serves.
    pub fn database(&self) -> &str {
        &self.database
    }

    fn path(&self, table: &str) -> Result<PathBuf, Error> {
        validate_name(table)?;
        Ok(self.dir.join(format!("{}.{}", table, UNIT_EXTENSION)))
    }

    /// Check if a table unit exists.
    pub fn exists(&self, table: &str) -> Result<bool, Error> {
        Ok(self.path(table)?.is_file())
    }

    /// Names of all tables in the database, sorted.
    pub fn list_tables(&self) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(UNIT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Persist a new table unit.
    pub fn create(&self, unit: TableUnit) -> Result<Snapshot, Error> {
        let path = self.path(&unit.name)?;
        if path.exists() {
            return Err(Error::TableExists(unit.name));
        }
        let bytes = self.encode(&unit)?;
        self.write_atomic(&path, &bytes)?;
        debug!(database = %self.database, table = %unit.name, "created table unit");
        Ok(Snapshot {
            unit,
            fingerprint: fingerprint(&bytes),
        })
    }

    /// Load a table unit in full.
    pub fn load(&self, table: &str) -> Result<Snapshot, Error> {
        let path = self.path(table)?;
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::TableNotFound(table.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let unit: TableUnit = serde_json::from_slice(&bytes)?;
        Ok(Snapshot {
            unit,
            fingerprint: fingerprint(&bytes),
        })
    }

    /// Load a table unit if it exists.
    pub fn try_load(&self, table: &str) -> Result<Option<Snapshot>, Error> {
        match self.load(table) {
            Ok(s) => Ok(Some(s)),
            Err(Error::TableNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write a snapshot back, fully replacing the persisted unit.
    ///
    /// With conflict detection enabled, fails if the unit on disk no longer
    /// matches the bytes the snapshot was loaded from.
    pub fn commit(&self, snapshot: &mut Snapshot) -> Result<(), Error> {
        let path = self.path(&snapshot.unit.name)?;

        if self.config.detect_conflicts {
            let current = match fs::read(&path) {
                Ok(b) => fingerprint(&b),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::TableNotFound(snapshot.unit.name.clone()))
                }
                Err(e) => return Err(e.into()),
            };
            if current != snapshot.fingerprint {
                warn!(table = %snapshot.unit.name, "unit changed since load");
                return Err(Error::ConcurrentModification(snapshot.unit.name.clone()));
            }
        }

        let bytes = self.encode(&snapshot.unit)?;
        self.write_atomic(&path, &bytes)?;
        snapshot.fingerprint = fingerprint(&bytes);
        debug!(
            database = %self.database,
            table = %snapshot.unit.name,
            rows = snapshot.unit.rows.len(),
            bytes = bytes.len(),
            "committed table unit"
        );
        Ok(())
    }

    fn encode(&self, unit: &TableUnit) -> Result<Vec<u8>, Error> {
        let bytes = if self.config.pretty {
            serde_json::to_vec_pretty(unit)?
        } else {
            serde_json::to_vec(unit)?
        };
        Ok(bytes)
    }

    fn write_atomic(&self, path: &std::path::Path, bytes: &[u8]) -> Result<(), Error> {
        let tmp = path.with_extension(format!("{}.tmp", UNIT_EXTENSION));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            if self.config.sync_writes {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Content fingerprint of persisted bytes.
fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// Check that a database or table name is a safe path component.
pub fn validate_name(name: &str) -> Result<(), Error> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableOptions;
    use indexmap::IndexMap;

    fn unit(name: &str) -> TableUnit {
        TableUnit::new(name, IndexMap::new(), IndexMap::new(), TableOptions::default()).unwrap()
    }

    fn setup() -> (tempfile::TempDir, TableStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::open(&StoreConfig::new(dir.path()), "app").unwrap();
        (dir, store)
    }

    #[test]
    fn test_create_then_load() {
        let (_dir, store) = setup();
        store.create(unit("users")).unwrap();

        assert!(store.exists("users").unwrap());
        let snapshot = store.load("users").unwrap();
        assert_eq!(snapshot.unit.name, "users");
        assert_eq!(snapshot.fingerprint().len(), 64);
    }

    #[test]
    fn test_create_twice_fails() {
        let (_dir, store) = setup();
        store.create(unit("users")).unwrap();
        assert!(matches!(
            store.create(unit("users")),
            Err(Error::TableExists(name)) if name == "users"
        ));
    }

    #[test]
    fn test_missing_table() {
        let (_dir, store) = setup();
        assert!(matches!(store.load("nope"), Err(Error::TableNotFound(_))));
        assert!(store.try_load("nope").unwrap().is_none());
    }

    #[test]
    fn test_commit_replaces_unit() {
        let (_dir, store) = setup();
        let mut snapshot = store.create(unit("users")).unwrap();
        let before = snapshot.fingerprint().to_string();

        let mut row = crate::catalog::Row::new();
        row.insert("id".into(), serde_json::json!("x"));
        snapshot.unit.rows.push(row);
        store.commit(&mut snapshot).unwrap();

        assert_ne!(snapshot.fingerprint(), before);
        assert_eq!(store.load("users").unwrap().unit.rows.len(), 1);
    }

    #[test]
    fn test_list_tables_sorted() {
        let (dir, store) = setup();
        store.create(unit("posts")).unwrap();
        store.create(unit("comments")).unwrap();
        std::fs::write(dir.path().join("app").join("notes.txt"), b"x").unwrap();

        assert_eq!(store.list_tables().unwrap(), vec!["comments", "posts"]);
    }

    #[test]
    fn test_last_writer_wins_by_default() {
        let (_dir, store) = setup();
        store.create(unit("t")).unwrap();
        let mut a = store.load("t").unwrap();
        let mut b = store.load("t").unwrap();

        a.unit.rows.push(crate::catalog::Row::new());
        store.commit(&mut a).unwrap();
        store.commit(&mut b).unwrap();

        assert!(store.load("t").unwrap().unit.rows.is_empty());
    }

    #[test]
    fn test_conflict_detection() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            TableStore::open(&StoreConfig::new(dir.path()).detect_conflicts(true), "app").unwrap();
        store.create(unit("t")).unwrap();
        let mut a = store.load("t").unwrap();
        let mut b = store.load("t").unwrap();

        a.unit.rows.push(crate::catalog::Row::new());
        store.commit(&mut a).unwrap();

        assert!(matches!(
            store.commit(&mut b),
            Err(Error::ConcurrentModification(_))
        ));
    }

    #[test]
    fn test_invalid_names() {
        assert!(validate_name("users_2024").is_ok());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("a b").is_err());
    }
}
