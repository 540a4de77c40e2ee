//! Source-file importers.
//!
//! A dataset is initialized exactly once, from a CSV file, a ZIP of CSVs,
//! or a raw SQL dump; the importer is picked by file extension. Every
//! importer creates the dataset's first version inside a transaction, so a
//! failed import leaves no version behind.

use std::fs::File;
use std::io;
use std::path::Path;

use log::{info, warn};

use crate::config::StoreConfig;
use crate::dump::{self, DumpTable};
use crate::engine::RelationEngine;
use crate::error::{Result, StoreError};
use crate::frame::Frame;
use crate::sqltype;
use crate::store::{Id, Membership, Store};

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Creates a dataset and, when a source file is given, imports it as
/// version 1 in the same call.
pub fn create_dataset_from_file<E>(
    store: &mut Store<E>,
    config: &StoreConfig,
    members: &mut dyn Membership,
    owner: &str,
    name: &str,
    description: &str,
    source: Option<&Path>,
) -> Result<Id>
where
    E: RelationEngine,
    Store<E>: Clone,
{
    let dataset_id = store.create_dataset(members, owner, name, description)?;
    if let Some(path) = source {
        import_file(store, config, dataset_id, path)?;
    }
    Ok(dataset_id)
}

/// Imports a source file into a dataset that has no versions yet,
/// dispatching on the file extension. Returns the new version's id.
pub fn import_file<E>(
    store: &mut Store<E>,
    config: &StoreConfig,
    dataset_id: Id,
    path: &Path,
) -> Result<Id>
where
    E: RelationEngine,
    Store<E>: Clone,
{
    if store.version_count(dataset_id)? > 0 {
        return Err(StoreError::Import(format!(
            "dataset {dataset_id} is already initialized"
        )));
    }
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let source = file_name(path);

    store.transaction(|store| match extension.as_str() {
        "csv" => {
            let version = store.next_version(dataset_id, &format!("INIT FROM CSV {source}"))?;
            import_csv(store, version, path)?;
            Ok(version)
        }
        "zip" => {
            let version = store.next_version(dataset_id, &format!("INIT FROM ZIP {source}"))?;
            import_zip(store, config, version, path)?;
            Ok(version)
        }
        "sql" | "dump" => {
            let version = store.next_version(dataset_id, &format!("INIT FROM DUMP {source}"))?;
            import_dump(store, version, path)?;
            Ok(version)
        }
        other => Err(StoreError::Import(format!(
            "unsupported source file extension '{other}'"
        ))),
    })
}

fn ensure_empty<E: RelationEngine>(store: &Store<E>, version_id: Id) -> Result<()> {
    let version = store.version(version_id)?;
    if version.loaded || !version.table_ids.is_empty() {
        return Err(StoreError::Import(
            "cannot import when there is already data present".to_string(),
        ));
    }
    Ok(())
}

/// Imports one CSV file as a single table named `table`.
pub fn import_csv<E>(store: &mut Store<E>, version_id: Id, path: &Path) -> Result<Id>
where
    E: RelationEngine,
{
    ensure_empty(store, version_id)?;
    let frame = Frame::from_csv_path(path)?;
    let table = store.materialize_table(version_id, "table", &[])?;
    store.load_dataframe(table, &frame)?;
    info!("imported {} rows from {}", frame.row_count(), path.display());
    Ok(table)
}

/// Extracts every CSV entry of the archive into the version's private
/// staging directory and imports each as an independent table named after
/// the archive entry.
pub fn import_zip<E>(
    store: &mut Store<E>,
    config: &StoreConfig,
    version_id: Id,
    path: &Path,
) -> Result<()>
where
    E: RelationEngine,
{
    ensure_empty(store, version_id)?;
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|err| StoreError::Import(format!("{} is not a zip file: {err}", path.display())))?;

    let staging = config.version_staging(version_id);
    std::fs::create_dir_all(&staging)?;

    let mut imported = 0usize;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| StoreError::Import(format!("reading archive entry: {err}")))?;
        if entry.is_dir() {
            continue;
        }
        let Some(entry_path) = entry.enclosed_name() else {
            warn!("skipping archive entry with unsafe path '{}'", entry.name());
            continue;
        };
        let entry_name = file_name(&entry_path);
        let extracted = staging.join(&entry_name);
        let mut out = File::create(&extracted)?;
        io::copy(&mut entry, &mut out)?;

        let frame = Frame::from_csv_path(&extracted)?;
        let table = store.materialize_table(version_id, &entry_name, &[])?;
        store.load_dataframe(table, &frame)?;
        imported += 1;
    }
    if imported == 0 {
        return Err(StoreError::Import(format!(
            "archive {} contains no importable entries",
            path.display()
        )));
    }
    // The extracted copies are only needed while loading; the relations
    // hold the data from here on.
    std::fs::remove_dir_all(&staging)?;
    Ok(())
}

/// Imports a SQL dump. A table whose types fail to canonicalize or whose
/// rows fail to insert is rolled back and skipped; the remaining tables
/// still import. The whole dump fails only when no table survives.
pub fn import_dump<E>(store: &mut Store<E>, version_id: Id, path: &Path) -> Result<()>
where
    E: RelationEngine,
    Store<E>: Clone,
{
    ensure_empty(store, version_id)?;
    let text = std::fs::read_to_string(path)?;
    let parsed = dump::parse(&text);
    if parsed.tables.is_empty() {
        return Err(StoreError::Import(format!(
            "no table definitions found in {}",
            path.display()
        )));
    }

    let mut imported = 0usize;
    for table in &parsed.tables {
        match store.transaction(|store| import_dump_table(store, version_id, table)) {
            Ok(()) => imported += 1,
            Err(err) => warn!("skipping dump table '{}': {err}", table.name),
        }
    }
    if imported == 0 {
        return Err(StoreError::Import(format!(
            "no table of dump {} could be imported",
            path.display()
        )));
    }
    Ok(())
}

fn import_dump_table<E>(store: &mut Store<E>, version_id: Id, table: &DumpTable) -> Result<()>
where
    E: RelationEngine,
{
    if table.columns.is_empty() {
        return Err(StoreError::Import("no recognizable column definitions".into()));
    }
    let columns = table
        .columns
        .iter()
        .map(|(name, raw_type)| Ok((name.clone(), sqltype::canonicalize(raw_type)?)))
        .collect::<Result<Vec<_>>>()?;
    let table_id = store.materialize_table(version_id, &table.name, &columns)?;
    for insert in &table.inserts {
        for row in &insert.rows {
            store.insert_dump_row(table_id, &insert.columns, row)?;
        }
    }
    store.mark_loaded(table_id)
}
