//! Multi-table full-outer joins.
//!
//! A join names N ≥ 2 tables and a set of key groups. Each key group lists,
//! per table position, either the column to match on or `None` when that
//! table sits the group out. The join is built as a left-to-right chain of
//! FULL OUTER joins so no input row is ever dropped; unmatched sides are
//! filled with nulls.
//!
//! A pair of adjacent tables with no usable key group is joined
//! unconditionally, producing a full cross product. That behavior is part
//! of the public contract; callers who do not want a cross product must
//! supply at least one key group covering every adjacent pair.

use std::collections::BTreeMap;

use itertools::Itertools;
use log::info;

use crate::data::Value;
use crate::engine::RelationEngine;
use crate::error::{Result, StoreError};
use crate::frame::{Frame, FrameColumn};
use crate::store::{Id, Store};

#[derive(Debug, Clone)]
pub struct JoinSpec {
    /// Tables to join, in chain order.
    pub table_ids: Vec<Id>,
    /// Each group holds one entry per table: the column id to match on, or
    /// `None` when the table does not participate in this group.
    pub key_groups: Vec<Vec<Option<Id>>>,
}

fn join_error(message: impl Into<String>) -> StoreError {
    StoreError::Join(message.into())
}

fn validate<E: RelationEngine>(store: &Store<E>, spec: &JoinSpec) -> Result<()> {
    if spec.table_ids.len() < 2 {
        return Err(join_error("a join needs at least two tables"));
    }
    for &table_id in &spec.table_ids {
        if store.table(table_id).is_err() {
            return Err(join_error(format!("table {table_id} does not exist")));
        }
    }
    for group in &spec.key_groups {
        if group.len() != spec.table_ids.len() {
            return Err(join_error(format!(
                "key group has {} entries for {} tables",
                group.len(),
                spec.table_ids.len()
            )));
        }
        for (position, column_id) in group.iter().enumerate() {
            let Some(column_id) = column_id else { continue };
            let table_id = spec.table_ids[position];
            let belongs = store
                .table(table_id)
                .map(|t| t.column_ids.contains(column_id))
                .unwrap_or(false);
            if !belongs {
                return Err(join_error(format!(
                    "column {column_id} is not part of table {table_id}"
                )));
            }
        }
    }
    Ok(())
}

/// One side of the chain loaded into memory: labeled columns plus the
/// column ids in snapshot order.
struct Loaded {
    columns: Vec<FrameColumn>,
    column_ids: Vec<Id>,
    rows: Vec<Vec<Option<Value>>>,
}

fn load_side<E: RelationEngine>(store: &Store<E>, table_id: Id) -> Result<Loaded> {
    let table = store.table(table_id)?;
    let snapshot = store.snapshot(table_id)?;
    let columns = snapshot
        .columns
        .iter()
        .map(|c| FrameColumn::new(format!("{}.{}", table.name, c.name), c.kind))
        .collect();
    let mut rows = Vec::with_capacity(snapshot.row_count());
    for row_idx in 0..snapshot.row_count() {
        rows.push(
            snapshot
                .columns
                .iter()
                .map(|c| c.cells[row_idx].clone())
                .collect(),
        );
    }
    Ok(Loaded {
        columns,
        column_ids: table.column_ids.clone(),
        rows,
    })
}

/// SQL null semantics: a null cell never equals anything, itself included.
fn cells_match(left: &Option<Value>, right: &Option<Value>) -> bool {
    matches!((left, right), (Some(a), Some(b)) if a == b)
}

/// Builds the joined snapshot without committing anything.
///
/// Output columns are every column of every participating table, labeled
/// `<table-name>.<column-name>`.
pub fn build_join<E: RelationEngine>(store: &Store<E>, spec: &JoinSpec) -> Result<Frame> {
    validate(store, spec)?;

    let first = load_side(store, spec.table_ids[0])?;
    let mut columns = first.columns;
    let mut rows = first.rows;
    // Output index of every joined column, keyed by column id.
    let mut column_slots: BTreeMap<Id, usize> = first
        .column_ids
        .iter()
        .enumerate()
        .map(|(idx, &id)| (id, idx))
        .collect();

    for position in 0..spec.table_ids.len() - 1 {
        let right = load_side(store, spec.table_ids[position + 1])?;
        let right_slots: BTreeMap<Id, usize> = right
            .column_ids
            .iter()
            .enumerate()
            .map(|(idx, &id)| (id, idx))
            .collect();

        // Equality clauses for this pair: key groups where both adjacent
        // tables supplied a column. Groups covering only one side are
        // skipped for this pair.
        let clauses: Vec<(usize, usize)> = spec
            .key_groups
            .iter()
            .filter_map(|group| match (group[position], group[position + 1]) {
                (Some(left_id), Some(right_id)) => {
                    Some((column_slots[&left_id], right_slots[&right_id]))
                }
                _ => None,
            })
            .collect();

        let left_width = columns.len();
        let right_width = right.columns.len();
        let mut joined = Vec::new();
        let mut right_used = vec![false; right.rows.len()];
        for left_row in &rows {
            let mut matched = false;
            for (right_idx, right_row) in right.rows.iter().enumerate() {
                let hit = clauses
                    .iter()
                    .all(|&(li, ri)| cells_match(&left_row[li], &right_row[ri]));
                if hit {
                    matched = true;
                    right_used[right_idx] = true;
                    let mut row = left_row.clone();
                    row.extend(right_row.iter().cloned());
                    joined.push(row);
                }
            }
            if !matched {
                let mut row = left_row.clone();
                row.extend(std::iter::repeat_n(None, right_width));
                joined.push(row);
            }
        }
        for (right_idx, right_row) in right.rows.iter().enumerate() {
            if !right_used[right_idx] {
                let mut row = vec![None; left_width];
                row.extend(right_row.iter().cloned());
                joined.push(row);
            }
        }

        for (offset, &id) in right.column_ids.iter().enumerate() {
            column_slots.insert(id, left_width + offset);
        }
        columns.extend(right.columns);
        rows = joined;
    }

    for (index, column) in columns.iter_mut().enumerate() {
        column.cells = rows.iter().map(|row| row[index].clone()).collect();
    }
    Ok(Frame::new(columns))
}

/// Human-readable `a=b` summary of the key groups, for the audit trail.
fn describe_keys<E: RelationEngine>(store: &Store<E>, spec: &JoinSpec) -> String {
    spec.key_groups
        .iter()
        .map(|group| {
            group
                .iter()
                .flatten()
                .map(|&column_id| {
                    store
                        .column(column_id)
                        .map(|c| c.name.clone())
                        .unwrap_or_else(|_| column_id.to_string())
                })
                .join("=")
        })
        .filter(|s| !s.is_empty())
        .join(",")
}

/// Joins tables of the dataset's latest version into a new version.
///
/// The new version starts as a full clone of the latest one so the history
/// stays coherent; the join runs against the clones, the result lands as a
/// new table, and the cloned source tables are deleted once it is
/// committed. Returns the new version's id.
pub fn join_and_commit<E>(
    store: &mut Store<E>,
    dataset_id: Id,
    spec: &JoinSpec,
    name: &str,
) -> Result<Id>
where
    E: RelationEngine,
    Store<E>: Clone,
{
    validate(store, spec)?;
    let latest = store
        .latest_version(dataset_id)?
        .ok_or_else(|| join_error(format!("dataset {dataset_id} has no versions")))?;
    for &table_id in &spec.table_ids {
        if !latest.table_ids.contains(&table_id) {
            return Err(join_error(format!(
                "table {table_id} is not part of the latest version"
            )));
        }
    }
    let source_tables = latest.table_ids.clone();
    let table_names = spec
        .table_ids
        .iter()
        .map(|&id| store.table(id).map(|t| t.name.clone()))
        .collect::<Result<Vec<_>>>()?;
    let description = format!(
        "JOIN TABLES {} ON {}",
        table_names.join(" AND "),
        describe_keys(store, spec)
    );

    store.transaction(|store| {
        let new_version = store.next_version(dataset_id, &description)?;

        let mut table_translate: BTreeMap<Id, Id> = BTreeMap::new();
        let mut column_translate: BTreeMap<Id, Id> = BTreeMap::new();
        for &old_table in &source_tables {
            let (new_table, columns) = store.clone_table(old_table, new_version)?;
            table_translate.insert(old_table, new_table);
            column_translate.extend(columns);
        }

        let translated = JoinSpec {
            table_ids: spec
                .table_ids
                .iter()
                .map(|id| table_translate[id])
                .collect(),
            key_groups: spec
                .key_groups
                .iter()
                .map(|group| {
                    group
                        .iter()
                        .map(|entry| entry.map(|id| column_translate[&id]))
                        .collect()
                })
                .collect(),
        };

        let frame = build_join(store, &translated)?;
        let result_table = store.materialize_table(new_version, name, &[])?;
        store.load_dataframe(result_table, &frame)?;

        for &table_id in &translated.table_ids {
            store.delete_table(table_id)?;
        }
        info!(
            "dataset {dataset_id}: joined {} tables into '{name}' ({} rows)",
            spec.table_ids.len(),
            frame.row_count()
        );
        Ok(new_version)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMembership;

    fn store_with_tables(csvs: &[(&str, &str)]) -> (Store, Id, Vec<Id>) {
        let mut store = Store::in_memory();
        let mut members = MemoryMembership::default();
        let dataset = store
            .create_dataset(&mut members, "owner", "joined", "")
            .expect("dataset");
        let version = store.next_version(dataset, "init").expect("version");
        let tables = csvs
            .iter()
            .map(|(name, csv)| {
                let table = store.materialize_table(version, name, &[]).expect("table");
                let frame = Frame::from_csv_reader(csv.as_bytes()).expect("frame");
                store.load_dataframe(table, &frame).expect("load");
                table
            })
            .collect();
        (store, dataset, tables)
    }

    fn key_column(store: &Store, table: Id, name: &str) -> Id {
        store
            .table(table)
            .unwrap()
            .column_ids
            .iter()
            .copied()
            .find(|&id| store.column(id).unwrap().name == name)
            .expect("column by name")
    }

    fn display(frame: &Frame, column: &str) -> Vec<String> {
        let idx = frame.column_index(column).expect("column");
        frame.display_rows().iter().map(|row| row[idx].clone()).collect()
    }

    #[test]
    fn full_outer_join_keeps_unmatched_rows_from_both_sides() {
        let (store, _, tables) = store_with_tables(&[
            ("people", "id,name\n1,ada\n2,grace\n4,linus\n"),
            ("ages", "id,age\n1,36\n2,45\n3,28\n"),
        ]);
        let spec = JoinSpec {
            table_ids: tables.clone(),
            key_groups: vec![vec![
                Some(key_column(&store, tables[0], "id")),
                Some(key_column(&store, tables[1], "id")),
            ]],
        };
        let frame = build_join(&store, &spec).unwrap();
        assert_eq!(frame.row_count(), 4);
        assert_eq!(
            frame.column_names(),
            vec!["people.id", "people.name", "ages.id", "ages.age"]
        );
        // Row with people.id=4 has a null ages side, and vice versa for 3.
        let rows = frame.display_rows();
        assert!(rows.iter().any(|r| r[0] == "4" && r[2].is_empty() && r[3].is_empty()));
        assert!(rows.iter().any(|r| r[0].is_empty() && r[2] == "3"));
    }

    #[test]
    fn pair_without_usable_keys_becomes_a_cross_product() {
        let (store, _, tables) = store_with_tables(&[
            ("a", "x\n1\n2\n"),
            ("b", "y\n10\n20\n30\n"),
        ]);
        let spec = JoinSpec {
            table_ids: tables,
            key_groups: vec![],
        };
        let frame = build_join(&store, &spec).unwrap();
        assert_eq!(frame.row_count(), 6);
    }

    #[test]
    fn partial_key_groups_skip_nonparticipating_pairs() {
        let (store, _, tables) = store_with_tables(&[
            ("t1", "k\n1\n2\n"),
            ("t2", "k,m\n1,x\n2,y\n"),
            ("t3", "m\nx\nz\n"),
        ]);
        let spec = JoinSpec {
            table_ids: tables.clone(),
            key_groups: vec![
                vec![
                    Some(key_column(&store, tables[0], "k")),
                    Some(key_column(&store, tables[1], "k")),
                    None,
                ],
                vec![
                    None,
                    Some(key_column(&store, tables[1], "m")),
                    Some(key_column(&store, tables[2], "m")),
                ],
            ],
        };
        let frame = build_join(&store, &spec).unwrap();
        // t1⋈t2 matches 1-1 and 2-2; t3 matches x, leaves y unmatched and
        // brings its own unmatched z.
        assert_eq!(frame.row_count(), 3);
        assert_eq!(display(&frame, "t3.m"), vec!["x", "", "z"]);
    }

    #[test]
    fn validation_rejects_bad_shapes_and_foreign_columns() {
        let (store, _, tables) = store_with_tables(&[
            ("t1", "k\n1\n"),
            ("t2", "k\n1\n"),
        ]);
        let short_group = JoinSpec {
            table_ids: tables.clone(),
            key_groups: vec![vec![Some(key_column(&store, tables[0], "k"))]],
        };
        assert!(matches!(build_join(&store, &short_group), Err(StoreError::Join(_))));

        let foreign_column = JoinSpec {
            table_ids: tables.clone(),
            key_groups: vec![vec![
                Some(key_column(&store, tables[1], "k")),
                Some(key_column(&store, tables[1], "k")),
            ]],
        };
        assert!(matches!(build_join(&store, &foreign_column), Err(StoreError::Join(_))));

        let single_table = JoinSpec {
            table_ids: vec![tables[0]],
            key_groups: vec![],
        };
        assert!(matches!(build_join(&store, &single_table), Err(StoreError::Join(_))));
    }

    #[test]
    fn null_keys_never_match_each_other() {
        let (store, _, tables) = store_with_tables(&[
            ("l", "k,v\n,1\n5,2\n"),
            ("r", "k,w\n,9\n5,8\n"),
        ]);
        let spec = JoinSpec {
            table_ids: tables.clone(),
            key_groups: vec![vec![
                Some(key_column(&store, tables[0], "k")),
                Some(key_column(&store, tables[1], "k")),
            ]],
        };
        let frame = build_join(&store, &spec).unwrap();
        // 5 matches 5; both null-keyed rows survive unmatched.
        assert_eq!(frame.row_count(), 3);
    }

    #[test]
    fn commit_replaces_sources_with_the_joined_table() {
        let (mut store, dataset, tables) = store_with_tables(&[
            ("people", "id,name\n1,ada\n"),
            ("ages", "id,age\n1,36\n"),
        ]);
        let spec = JoinSpec {
            table_ids: tables.clone(),
            key_groups: vec![vec![
                Some(key_column(&store, tables[0], "id")),
                Some(key_column(&store, tables[1], "id")),
            ]],
        };
        let new_version = join_and_commit(&mut store, dataset, &spec, "JOIN").unwrap();

        let version = store.version(new_version).unwrap();
        assert_eq!(version.description, "JOIN TABLES people AND ages ON id=id");
        assert_eq!(version.table_ids.len(), 1);
        let joined = store.table(version.table_ids[0]).unwrap();
        assert_eq!(joined.name, "JOIN");
        let snapshot = store.snapshot(joined.id).unwrap();
        assert_eq!(
            snapshot.column_names(),
            vec!["people.id", "people.name", "ages.id", "ages.age"]
        );

        // Original tables in the previous version are untouched.
        assert!(store.table(tables[0]).is_ok());
        assert_eq!(store.version_count(dataset).unwrap(), 2);
    }

    #[test]
    fn commit_rejects_tables_outside_the_latest_version() {
        let (mut store, dataset, tables) = store_with_tables(&[
            ("people", "id\n1\n"),
            ("ages", "id\n1\n"),
        ]);
        store.next_version(dataset, "newer").unwrap();
        let spec = JoinSpec {
            table_ids: tables,
            key_groups: vec![],
        };
        assert!(matches!(
            join_and_commit(&mut store, dataset, &spec, "JOIN"),
            Err(StoreError::Join(_))
        ));
    }
}
