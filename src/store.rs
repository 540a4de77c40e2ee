//! The versioned schema store.
//!
//! Owns the entity arena (Dataset → Version → Table → Column, plus Roles)
//! and the lifecycle rules around it: strictly increasing version numbers,
//! copy-on-write version creation, storage-identifier remapping, cascading
//! deletes, and undo. Physical row data lives behind the [`RelationEngine`]
//! boundary; every table maps onto one relation named `table_<id>` whose
//! columns are named by column id, so user-chosen display names never reach
//! the storage layer.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::ColumnKind;
use crate::dump::SqlLiteral;
use crate::engine::{MemoryEngine, RelationColumn, RelationEngine};
use crate::error::{Result, StoreError};
use crate::frame::{Frame, FrameColumn};

pub type Id = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Id,
    pub name: String,
    pub description: String,
    pub access_role: Id,
    pub admin_role: Id,
    /// Insertion order equals version-number order.
    pub version_ids: Vec<Id>,
    /// High-water mark for version numbers. Advances on every allocation
    /// and never rolls back, so undone numbers are not handed out again.
    next_number: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub id: Id,
    pub dataset_id: Id,
    pub number: u32,
    /// Audit trail of the operation that produced this version.
    pub description: String,
    pub loaded: bool,
    pub table_ids: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub id: Id,
    pub version_id: Id,
    pub name: String,
    pub loaded: bool,
    pub column_ids: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub id: Id,
    pub table_id: Id,
    pub name: String,
}

impl Column {
    /// The physical column name: the column's own id, globally unique.
    pub fn storage_name(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Id,
    pub name: String,
    pub description: String,
}

/// Role-membership oracle; owned by the outer auth layer, consumed here.
pub trait Membership {
    fn grant(&mut self, user: &str, role: Id);
    fn has_role(&self, user: &str, role: Id) -> bool;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMembership {
    grants: BTreeMap<String, BTreeSet<Id>>,
}

impl Membership for MemoryMembership {
    fn grant(&mut self, user: &str, role: Id) {
        self.grants.entry(user.to_string()).or_default().insert(role);
    }

    fn has_role(&self, user: &str, role: Id) -> bool {
        self.grants
            .get(user)
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
    }
}

fn canonical_for_kind(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Integer => "bigint",
        ColumnKind::Float => "double precision",
        ColumnKind::Boolean => "boolean",
        ColumnKind::Date => "date",
        ColumnKind::DateTime => "timestamp",
        ColumnKind::String => "text",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store<E = MemoryEngine> {
    engine: E,
    next_id: Id,
    datasets: BTreeMap<Id, Dataset>,
    versions: BTreeMap<Id, Version>,
    tables: BTreeMap<Id, Table>,
    columns: BTreeMap<Id, Column>,
    roles: BTreeMap<Id, Role>,
}

impl Default for Store<MemoryEngine> {
    fn default() -> Self {
        Store::in_memory()
    }
}

impl Store<MemoryEngine> {
    pub fn in_memory() -> Self {
        Store::new(MemoryEngine::new())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|err| StoreError::Storage(format!("parsing store file {path:?}: {err}")))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|err| StoreError::Storage(format!("writing store file {path:?}: {err}")))
    }
}

impl<E: RelationEngine> Store<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            next_id: 1,
            datasets: BTreeMap::new(),
            versions: BTreeMap::new(),
            tables: BTreeMap::new(),
            columns: BTreeMap::new(),
            roles: BTreeMap::new(),
        }
    }

    fn alloc_id(&mut self) -> Id {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ------------------------------------------------------------------
    // Accessors

    pub fn dataset(&self, id: Id) -> Result<&Dataset> {
        self.datasets
            .get(&id)
            .ok_or_else(|| StoreError::not_found("dataset", id))
    }

    pub fn version(&self, id: Id) -> Result<&Version> {
        self.versions
            .get(&id)
            .ok_or_else(|| StoreError::not_found("version", id))
    }

    pub fn table(&self, id: Id) -> Result<&Table> {
        self.tables
            .get(&id)
            .ok_or_else(|| StoreError::not_found("table", id))
    }

    pub fn column(&self, id: Id) -> Result<&Column> {
        self.columns
            .get(&id)
            .ok_or_else(|| StoreError::not_found("column", id))
    }

    pub fn role(&self, id: Id) -> Result<&Role> {
        self.roles
            .get(&id)
            .ok_or_else(|| StoreError::not_found("role", id))
    }

    pub fn datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets.values()
    }

    /// The version with the highest number, if any.
    pub fn latest_version(&self, dataset_id: Id) -> Result<Option<&Version>> {
        let dataset = self.dataset(dataset_id)?;
        Ok(dataset
            .version_ids
            .last()
            .and_then(|id| self.versions.get(id)))
    }

    pub fn version_count(&self, dataset_id: Id) -> Result<usize> {
        Ok(self.dataset(dataset_id)?.version_ids.len())
    }

    /// The physical relation name for a table, derived from its id.
    pub fn relation_name(table_id: Id) -> String {
        format!("table_{table_id}")
    }

    /// The first loaded table of a dataset's latest version: the table the
    /// single-table transform flow operates on.
    pub fn current_table(&self, dataset_id: Id) -> Result<&Table> {
        let version = self
            .latest_version(dataset_id)?
            .ok_or_else(|| StoreError::not_found("version of dataset", dataset_id))?;
        version
            .table_ids
            .iter()
            .filter_map(|id| self.tables.get(id))
            .find(|t| t.loaded)
            .ok_or_else(|| StoreError::SchemaInvariant(format!(
                "dataset {dataset_id} has no loaded table in its latest version"
            )))
    }

    // ------------------------------------------------------------------
    // Transactions

    /// Runs `f` against the store; on error every metadata and physical
    /// change made inside is rolled back to the checkpoint.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T>
    where
        Self: Clone,
    {
        let checkpoint = self.clone();
        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                *self = checkpoint;
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Dataset lifecycle

    /// Creates a dataset with two fresh access-control roles and grants the
    /// owner both. The name must be non-empty.
    pub fn create_dataset(
        &mut self,
        members: &mut dyn Membership,
        owner: &str,
        name: &str,
        description: &str,
    ) -> Result<Id> {
        if name.is_empty() {
            return Err(StoreError::SchemaInvariant(
                "dataset name cannot be empty".to_string(),
            ));
        }
        let dataset_id = self.alloc_id();
        let access_role = self.create_role(format!(
            "[ACCESS] Role for accessing dataset with id {dataset_id}"
        ));
        let admin_role = self.create_role(format!(
            "[ADMIN] Role for administering dataset with id {dataset_id}"
        ));
        self.datasets.insert(
            dataset_id,
            Dataset {
                id: dataset_id,
                name: name.to_string(),
                description: description.to_string(),
                access_role,
                admin_role,
                version_ids: Vec::new(),
                next_number: 1,
            },
        );
        self.add_admin(members, dataset_id, owner)?;
        info!("created dataset {dataset_id} '{name}'");
        Ok(dataset_id)
    }

    fn create_role(&mut self, description: String) -> Id {
        let id = self.alloc_id();
        self.roles.insert(
            id,
            Role {
                id,
                name: Uuid::new_v4().to_string(),
                description,
            },
        );
        id
    }

    pub fn rename_role(&mut self, role_id: Id, name: &str) -> Result<()> {
        let role = self
            .roles
            .get_mut(&role_id)
            .ok_or_else(|| StoreError::not_found("role", role_id))?;
        role.name = name.to_string();
        Ok(())
    }

    pub fn describe_role(&mut self, role_id: Id, description: &str) -> Result<()> {
        let role = self
            .roles
            .get_mut(&role_id)
            .ok_or_else(|| StoreError::not_found("role", role_id))?;
        role.description = description.to_string();
        Ok(())
    }

    pub fn add_member(
        &mut self,
        members: &mut dyn Membership,
        dataset_id: Id,
        user: &str,
    ) -> Result<()> {
        let role = self.dataset(dataset_id)?.access_role;
        members.grant(user, role);
        Ok(())
    }

    /// Admins are always members as well.
    pub fn add_admin(
        &mut self,
        members: &mut dyn Membership,
        dataset_id: Id,
        user: &str,
    ) -> Result<()> {
        self.add_member(members, dataset_id, user)?;
        let role = self.dataset(dataset_id)?.admin_role;
        members.grant(user, role);
        Ok(())
    }

    pub fn is_member(
        &self,
        members: &dyn Membership,
        dataset_id: Id,
        user: &str,
    ) -> Result<bool> {
        Ok(members.has_role(user, self.dataset(dataset_id)?.access_role))
    }

    pub fn is_owner(&self, members: &dyn Membership, dataset_id: Id, user: &str) -> Result<bool> {
        Ok(members.has_role(user, self.dataset(dataset_id)?.admin_role))
    }

    // ------------------------------------------------------------------
    // Versions

    /// Allocates the next version from the dataset's high-water mark.
    /// Numbers start at 1 and are never reused, even after undo.
    pub fn next_version(&mut self, dataset_id: Id, description: &str) -> Result<Id> {
        let number = {
            let dataset = self
                .datasets
                .get_mut(&dataset_id)
                .ok_or_else(|| StoreError::not_found("dataset", dataset_id))?;
            let number = dataset.next_number;
            dataset.next_number += 1;
            number
        };
        let id = self.alloc_id();
        self.versions.insert(
            id,
            Version {
                id,
                dataset_id,
                number,
                description: description.to_string(),
                loaded: false,
                table_ids: Vec::new(),
            },
        );
        self.datasets
            .get_mut(&dataset_id)
            .ok_or_else(|| StoreError::not_found("dataset", dataset_id))?
            .version_ids
            .push(id);
        debug!("dataset {dataset_id}: allocated version {number} (id {id})");
        Ok(id)
    }

    /// Deletes the latest version provided an older one remains.
    pub fn undo(&mut self, dataset_id: Id) -> Result<Id> {
        if self.version_count(dataset_id)? <= 1 {
            return Err(StoreError::SchemaInvariant(
                "cannot delete the sole remaining version".to_string(),
            ));
        }
        let latest = self
            .latest_version(dataset_id)?
            .map(|v| v.id)
            .ok_or_else(|| StoreError::not_found("version of dataset", dataset_id))?;
        self.delete_version(latest)?;
        info!("dataset {dataset_id}: undo removed version {latest}");
        Ok(latest)
    }

    // ------------------------------------------------------------------
    // Tables and columns

    /// Creates a table with its columns and physical relation in one step;
    /// `columns` pairs display names with canonical SQL types.
    pub fn materialize_table(
        &mut self,
        version_id: Id,
        name: &str,
        columns: &[(String, String)],
    ) -> Result<Id> {
        self.version(version_id)?;
        let table_id = self.alloc_id();
        self.tables.insert(
            table_id,
            Table {
                id: table_id,
                version_id,
                name: name.to_string(),
                loaded: false,
                column_ids: Vec::new(),
            },
        );
        self.versions
            .get_mut(&version_id)
            .ok_or_else(|| StoreError::not_found("version", version_id))?
            .table_ids
            .push(table_id);

        let mut relation_columns = Vec::with_capacity(columns.len());
        for (display_name, sql_type) in columns {
            let column_id = self.add_column(table_id, display_name)?;
            relation_columns.push(RelationColumn {
                name: column_id.to_string(),
                sql_type: sql_type.clone(),
            });
        }
        self.engine
            .create_relation(&Self::relation_name(table_id), &relation_columns)?;
        Ok(table_id)
    }

    /// Adds a column record; display names must be unique within the table.
    fn add_column(&mut self, table_id: Id, display_name: &str) -> Result<Id> {
        let table = self.table(table_id)?;
        let duplicate = table
            .column_ids
            .iter()
            .filter_map(|id| self.columns.get(id))
            .any(|c| c.name == display_name);
        if duplicate {
            return Err(StoreError::SchemaInvariant(format!(
                "duplicate column name '{display_name}' in table {table_id}"
            )));
        }
        let id = self.alloc_id();
        self.columns.insert(
            id,
            Column {
                id,
                table_id,
                name: display_name.to_string(),
            },
        );
        self.tables
            .get_mut(&table_id)
            .ok_or_else(|| StoreError::not_found("table", table_id))?
            .column_ids
            .push(id);
        Ok(id)
    }

    /// Inserts one dump row; `insert_columns` holds display names from the
    /// INSERT's column clause (empty means positional).
    pub fn insert_dump_row(
        &mut self,
        table_id: Id,
        insert_columns: &[String],
        literals: &[SqlLiteral],
    ) -> Result<()> {
        let storage_names = insert_columns
            .iter()
            .map(|display| {
                let table = self.table(table_id)?;
                table
                    .column_ids
                    .iter()
                    .filter_map(|id| self.columns.get(id))
                    .find(|c| &c.name == display)
                    .map(Column::storage_name)
                    .ok_or_else(|| {
                        StoreError::Storage(format!(
                            "table {table_id} has no column named '{display}'"
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        self.engine
            .insert_literals(&Self::relation_name(table_id), &storage_names, literals)
    }

    /// Marks a table (and its version) fully materialized.
    pub fn mark_loaded(&mut self, table_id: Id) -> Result<()> {
        let version_id = self.table(table_id)?.version_id;
        if let Some(table) = self.tables.get_mut(&table_id) {
            table.loaded = true;
        }
        if let Some(version) = self.versions.get_mut(&version_id) {
            version.loaded = true;
        }
        Ok(())
    }

    /// Replaces a table's columns and physical relation wholesale with the
    /// contents of `frame`, assigning fresh storage identifiers.
    pub fn load_dataframe(&mut self, table_id: Id, frame: &Frame) -> Result<()> {
        self.table(table_id)?;
        let mut seen = BTreeSet::new();
        for column in &frame.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(StoreError::SchemaInvariant(format!(
                    "duplicate column name '{}' in dataframe",
                    column.name
                )));
            }
        }

        let old_columns = self.table(table_id)?.column_ids.clone();
        for column_id in old_columns {
            self.columns.remove(&column_id);
        }
        self.tables
            .get_mut(&table_id)
            .ok_or_else(|| StoreError::not_found("table", table_id))?
            .column_ids
            .clear();
        let relation = Self::relation_name(table_id);
        self.engine.drop_relation(&relation)?;

        let mut relation_columns = Vec::with_capacity(frame.columns.len());
        for column in &frame.columns {
            let column_id = self.add_column(table_id, &column.name)?;
            relation_columns.push(RelationColumn {
                name: column_id.to_string(),
                sql_type: canonical_for_kind(column.kind).to_string(),
            });
        }
        self.engine.create_relation(&relation, &relation_columns)?;

        let mut rows = Vec::with_capacity(frame.row_count());
        for row_idx in 0..frame.row_count() {
            rows.push(
                frame
                    .columns
                    .iter()
                    .map(|c| c.cells[row_idx].clone())
                    .collect(),
            );
        }
        self.engine.write_rows(&relation, rows)?;
        self.mark_loaded(table_id)
    }

    /// Reads a table back as a snapshot with user-facing display names.
    pub fn snapshot(&self, table_id: Id) -> Result<Frame> {
        self.table(table_id)?;
        let relation = self.engine.scan(&Self::relation_name(table_id))?;
        let mut columns = Vec::with_capacity(relation.columns.len());
        for (idx, relation_column) in relation.columns.iter().enumerate() {
            let column_id: Id = relation_column.name.parse().map_err(|_| {
                StoreError::Storage(format!(
                    "relation column '{}' is not a storage identifier",
                    relation_column.name
                ))
            })?;
            let display = self.column(column_id)?.name.clone();
            let mut frame_column = FrameColumn::new(display, relation_column.kind());
            frame_column.cells = relation
                .rows
                .iter()
                .map(|row| row.get(idx).cloned().flatten())
                .collect();
            columns.push(frame_column);
        }
        Ok(Frame::new(columns))
    }

    /// Clones a table (schema and rows) into another version, re-creating
    /// every column under a fresh storage identifier. Returns the new table
    /// id and the old→new column-id translation map.
    pub fn clone_table(
        &mut self,
        old_table_id: Id,
        new_version_id: Id,
    ) -> Result<(Id, BTreeMap<Id, Id>)> {
        let old = self.table(old_table_id)?.clone();
        self.version(new_version_id)?;

        let new_table_id = self.alloc_id();
        self.tables.insert(
            new_table_id,
            Table {
                id: new_table_id,
                version_id: new_version_id,
                name: old.name.clone(),
                loaded: old.loaded,
                column_ids: Vec::new(),
            },
        );
        self.versions
            .get_mut(&new_version_id)
            .ok_or_else(|| StoreError::not_found("version", new_version_id))?
            .table_ids
            .push(new_table_id);

        let old_relation = Self::relation_name(old_table_id);
        let new_relation = Self::relation_name(new_table_id);
        self.engine.copy_relation(&old_relation, &new_relation)?;

        let mut translate = BTreeMap::new();
        for old_column_id in old.column_ids {
            let display = self.column(old_column_id)?.name.clone();
            let new_column_id = self.add_column(new_table_id, &display)?;
            self.engine.rename_column(
                &new_relation,
                &old_column_id.to_string(),
                &new_column_id.to_string(),
            )?;
            translate.insert(old_column_id, new_column_id);
        }
        if old.loaded && let Some(version) = self.versions.get_mut(&new_version_id) {
            version.loaded = true;
        }
        Ok((new_table_id, translate))
    }

    /// Drops one column: physical column first, then the metadata record.
    pub fn delete_column(&mut self, table_id: Id, column_id: Id) -> Result<()> {
        let column = self.column(column_id)?;
        if column.table_id != table_id {
            return Err(StoreError::SchemaInvariant(format!(
                "column {column_id} does not belong to table {table_id}"
            )));
        }
        self.engine
            .drop_column(&Self::relation_name(table_id), &column_id.to_string())?;
        self.columns.remove(&column_id);
        if let Some(table) = self.tables.get_mut(&table_id) {
            table.column_ids.retain(|id| *id != column_id);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cascade deletes (children first)

    pub fn delete_table(&mut self, table_id: Id) -> Result<()> {
        let table = self.table(table_id)?.clone();
        for column_id in &table.column_ids {
            self.columns.remove(column_id);
        }
        self.engine.drop_relation(&Self::relation_name(table_id))?;
        self.tables.remove(&table_id);
        if let Some(version) = self.versions.get_mut(&table.version_id) {
            version.table_ids.retain(|id| *id != table_id);
        }
        Ok(())
    }

    pub fn delete_version(&mut self, version_id: Id) -> Result<()> {
        let version = self.version(version_id)?.clone();
        for table_id in version.table_ids {
            self.delete_table(table_id)?;
        }
        self.versions.remove(&version_id);
        if let Some(dataset) = self.datasets.get_mut(&version.dataset_id) {
            dataset.version_ids.retain(|id| *id != version_id);
        }
        Ok(())
    }

    pub fn delete_dataset(&mut self, dataset_id: Id) -> Result<()> {
        let dataset = self.dataset(dataset_id)?.clone();
        for version_id in dataset.version_ids {
            self.delete_version(version_id)?;
        }
        self.roles.remove(&dataset.access_role);
        self.roles.remove(&dataset.admin_role);
        self.datasets.remove(&dataset_id);
        info!("deleted dataset {dataset_id} '{}'", dataset.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;

    fn sample_frame() -> Frame {
        Frame::from_csv_reader("id,name\n1,ada\n2,grace\n".as_bytes()).expect("frame")
    }

    fn store_with_dataset() -> (Store, MemoryMembership, Id) {
        let mut store = Store::in_memory();
        let mut members = MemoryMembership::default();
        let dataset = store
            .create_dataset(&mut members, "owner", "people", "test data")
            .expect("dataset");
        (store, members, dataset)
    }

    #[test]
    fn create_dataset_rejects_empty_names() {
        let mut store = Store::in_memory();
        let mut members = MemoryMembership::default();
        assert!(matches!(
            store.create_dataset(&mut members, "owner", "", ""),
            Err(StoreError::SchemaInvariant(_))
        ));
    }

    #[test]
    fn owner_is_both_member_and_admin() {
        let (store, members, dataset) = store_with_dataset();
        assert!(store.is_member(&members, dataset, "owner").unwrap());
        assert!(store.is_owner(&members, dataset, "owner").unwrap());
        assert!(!store.is_member(&members, dataset, "stranger").unwrap());
    }

    #[test]
    fn members_are_not_owners() {
        let (mut store, mut members, dataset) = store_with_dataset();
        store.add_member(&mut members, dataset, "reader").unwrap();
        assert!(store.is_member(&members, dataset, "reader").unwrap());
        assert!(!store.is_owner(&members, dataset, "reader").unwrap());
    }

    #[test]
    fn roles_can_be_renamed_and_redescribed() {
        let (mut store, _, dataset) = store_with_dataset();
        let role = store.dataset(dataset).unwrap().access_role;
        store.rename_role(role, "analysts").unwrap();
        store.describe_role(role, "read access for the analyst team").unwrap();
        let role = store.role(role).unwrap();
        assert_eq!(role.name, "analysts");
        assert_eq!(role.description, "read access for the analyst team");
        assert!(matches!(
            store.rename_role(9999, "x"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn version_numbers_increase_gaplessly_from_one() {
        let (mut store, _, dataset) = store_with_dataset();
        for expected in 1..=3u32 {
            let id = store.next_version(dataset, "step").unwrap();
            assert_eq!(store.version(id).unwrap().number, expected);
        }
    }

    #[test]
    fn undo_never_reuses_version_numbers() {
        let (mut store, _, dataset) = store_with_dataset();
        store.next_version(dataset, "one").unwrap();
        store.next_version(dataset, "two").unwrap();
        store.undo(dataset).unwrap();
        let id = store.next_version(dataset, "three").unwrap();
        assert_eq!(store.version(id).unwrap().number, 3);
    }

    #[test]
    fn undo_rejects_removing_the_sole_version() {
        let (mut store, _, dataset) = store_with_dataset();
        store.next_version(dataset, "only").unwrap();
        assert!(matches!(
            store.undo(dataset),
            Err(StoreError::SchemaInvariant(_))
        ));
        assert_eq!(store.version_count(dataset).unwrap(), 1);
    }

    #[test]
    fn load_dataframe_round_trips_display_names_and_cells() {
        let (mut store, _, dataset) = store_with_dataset();
        let version = store.next_version(dataset, "INIT FROM CSV test.csv").unwrap();
        let table = store.materialize_table(version, "table", &[]).unwrap();
        store.load_dataframe(table, &sample_frame()).unwrap();

        let snapshot = store.snapshot(table).unwrap();
        assert_eq!(snapshot.column_names(), vec!["id", "name"]);
        assert_eq!(
            snapshot.column("name").unwrap().cells[1],
            Some(Value::String("grace".into()))
        );
        assert!(store.table(table).unwrap().loaded);
    }

    #[test]
    fn load_dataframe_rejects_duplicate_display_names() {
        let (mut store, _, dataset) = store_with_dataset();
        let version = store.next_version(dataset, "init").unwrap();
        let table = store.materialize_table(version, "table", &[]).unwrap();
        let mut frame = sample_frame();
        frame.columns[1].name = "id".to_string();
        assert!(matches!(
            store.load_dataframe(table, &frame),
            Err(StoreError::SchemaInvariant(_))
        ));
    }

    #[test]
    fn clone_table_translates_every_column_id() {
        let (mut store, _, dataset) = store_with_dataset();
        let v1 = store.next_version(dataset, "init").unwrap();
        let table = store.materialize_table(v1, "table", &[]).unwrap();
        store.load_dataframe(table, &sample_frame()).unwrap();

        let v2 = store.next_version(dataset, "INIT FROM OLD VERSION 1").unwrap();
        let (clone, translate) = store.clone_table(table, v2).unwrap();
        let old_ids = store.table(table).unwrap().column_ids.clone();
        assert_eq!(translate.len(), old_ids.len());
        for old_id in old_ids {
            let new_id = translate[&old_id];
            assert_eq!(
                store.column(old_id).unwrap().name,
                store.column(new_id).unwrap().name
            );
            assert_ne!(old_id, new_id);
        }
        let snapshot = store.snapshot(clone).unwrap();
        assert_eq!(snapshot.row_count(), 2);
    }

    #[test]
    fn delete_dataset_cascades_and_drops_relations() {
        let (mut store, _, dataset) = store_with_dataset();
        let version = store.next_version(dataset, "init").unwrap();
        let table = store.materialize_table(version, "table", &[]).unwrap();
        store.load_dataframe(table, &sample_frame()).unwrap();

        store.delete_dataset(dataset).unwrap();
        assert!(store.dataset(dataset).is_err());
        assert!(store.version(version).is_err());
        assert!(store.table(table).is_err());
        assert!(store.snapshot(table).is_err());
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let (mut store, _, dataset) = store_with_dataset();
        store.next_version(dataset, "init").unwrap();
        let before = store.version_count(dataset).unwrap();
        let result: Result<()> = store.transaction(|s| {
            s.next_version(dataset, "doomed")?;
            Err(StoreError::Storage("forced failure".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.version_count(dataset).unwrap(), before);
    }

    #[test]
    fn store_round_trips_through_json() {
        let (mut store, _, dataset) = store_with_dataset();
        let version = store.next_version(dataset, "init").unwrap();
        let table = store.materialize_table(version, "table", &[]).unwrap();
        store.load_dataframe(table, &sample_frame()).unwrap();

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("store.json");
        store.save(&path).unwrap();
        let restored = Store::load(&path).unwrap();
        assert_eq!(
            restored.snapshot(table).unwrap(),
            store.snapshot(table).unwrap()
        );
    }
}
