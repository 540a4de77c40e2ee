//! The relational engine boundary.
//!
//! The store issues schema and row statements against a [`RelationEngine`]
//! and never implements storage itself; the engine is assumed to provide
//! transactions, dynamic column creation, and typed inserts. [`MemoryEngine`]
//! is the in-process implementation used by the CLI and the test suites; it
//! is `Clone`, which is what the store's checkpoint/rollback transactions
//! rely on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::{ColumnKind, Value, parse_naive_date, parse_naive_datetime};
use crate::dump::SqlLiteral;
use crate::error::{Result, StoreError};
use crate::sqltype;

/// One physical column: storage identifier plus canonical SQL type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationColumn {
    pub name: String,
    pub sql_type: String,
}

impl RelationColumn {
    pub fn kind(&self) -> ColumnKind {
        sqltype::kind_for_canonical(&self.sql_type)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Relation {
    pub columns: Vec<RelationColumn>,
    pub rows: Vec<Vec<Option<Value>>>,
}

/// Statements the store issues against the underlying relational engine.
pub trait RelationEngine {
    fn create_relation(&mut self, name: &str, columns: &[RelationColumn]) -> Result<()>;
    /// Drops a relation; dropping a relation that does not exist is a no-op.
    fn drop_relation(&mut self, name: &str) -> Result<()>;
    /// Copies an existing relation (schema and rows) under a new name.
    fn copy_relation(&mut self, source: &str, target: &str) -> Result<()>;
    fn rename_column(&mut self, relation: &str, old: &str, new: &str) -> Result<()>;
    fn drop_column(&mut self, relation: &str, column: &str) -> Result<()>;
    /// Inserts one row of scalar literals, validated against column types.
    /// `columns` names the target storage columns; when empty, literals fill
    /// the relation's columns in definition order.
    fn insert_literals(
        &mut self,
        relation: &str,
        columns: &[String],
        literals: &[SqlLiteral],
    ) -> Result<()>;
    /// Replaces a relation's rows wholesale.
    fn write_rows(&mut self, relation: &str, rows: Vec<Vec<Option<Value>>>) -> Result<()>;
    fn scan(&self, relation: &str) -> Result<&Relation>;
    fn relation_exists(&self, name: &str) -> bool;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryEngine {
    relations: BTreeMap<String, Relation>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn relation_mut(&mut self, name: &str) -> Result<&mut Relation> {
        self.relations
            .get_mut(name)
            .ok_or_else(|| StoreError::Storage(format!("relation '{name}' does not exist")))
    }
}

impl RelationEngine for MemoryEngine {
    fn create_relation(&mut self, name: &str, columns: &[RelationColumn]) -> Result<()> {
        if self.relations.contains_key(name) {
            return Err(StoreError::Storage(format!(
                "relation '{name}' already exists"
            )));
        }
        self.relations.insert(
            name.to_string(),
            Relation {
                columns: columns.to_vec(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn drop_relation(&mut self, name: &str) -> Result<()> {
        self.relations.remove(name);
        Ok(())
    }

    fn copy_relation(&mut self, source: &str, target: &str) -> Result<()> {
        let relation = self
            .relations
            .get(source)
            .ok_or_else(|| StoreError::Storage(format!("relation '{source}' does not exist")))?
            .clone();
        if self.relations.contains_key(target) {
            return Err(StoreError::Storage(format!(
                "relation '{target}' already exists"
            )));
        }
        self.relations.insert(target.to_string(), relation);
        Ok(())
    }

    fn rename_column(&mut self, relation: &str, old: &str, new: &str) -> Result<()> {
        let relation = self.relation_mut(relation)?;
        let column = relation
            .columns
            .iter_mut()
            .find(|c| c.name == old)
            .ok_or_else(|| StoreError::Storage(format!("column '{old}' does not exist")))?;
        column.name = new.to_string();
        Ok(())
    }

    fn drop_column(&mut self, relation: &str, column: &str) -> Result<()> {
        let relation = self.relation_mut(relation)?;
        let index = relation
            .columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| StoreError::Storage(format!("column '{column}' does not exist")))?;
        relation.columns.remove(index);
        for row in &mut relation.rows {
            if index < row.len() {
                row.remove(index);
            }
        }
        Ok(())
    }

    fn insert_literals(
        &mut self,
        relation_name: &str,
        columns: &[String],
        literals: &[SqlLiteral],
    ) -> Result<()> {
        let relation = self.relation_mut(relation_name)?;
        let targets: Vec<usize> = if columns.is_empty() {
            if literals.len() > relation.columns.len() {
                return Err(StoreError::Storage(format!(
                    "row has {} values but relation '{relation_name}' has {} columns",
                    literals.len(),
                    relation.columns.len()
                )));
            }
            (0..literals.len()).collect()
        } else {
            if columns.len() != literals.len() {
                return Err(StoreError::Storage(format!(
                    "row has {} values for {} named columns",
                    literals.len(),
                    columns.len()
                )));
            }
            columns
                .iter()
                .map(|name| {
                    relation
                        .columns
                        .iter()
                        .position(|c| &c.name == name)
                        .ok_or_else(|| {
                            StoreError::Storage(format!("column '{name}' does not exist"))
                        })
                })
                .collect::<Result<Vec<_>>>()?
        };

        let mut row: Vec<Option<Value>> = vec![None; relation.columns.len()];
        for (literal, target) in literals.iter().zip(targets) {
            row[target] = coerce_literal(literal, relation.columns[target].kind())?;
        }
        relation.rows.push(row);
        Ok(())
    }

    fn write_rows(&mut self, relation: &str, rows: Vec<Vec<Option<Value>>>) -> Result<()> {
        let relation = self.relation_mut(relation)?;
        let width = relation.columns.len();
        if let Some(bad) = rows.iter().find(|row| row.len() != width) {
            return Err(StoreError::Storage(format!(
                "row width {} does not match relation width {width}",
                bad.len()
            )));
        }
        relation.rows = rows;
        Ok(())
    }

    fn scan(&self, name: &str) -> Result<&Relation> {
        self.relations
            .get(name)
            .ok_or_else(|| StoreError::Storage(format!("relation '{name}' does not exist")))
    }

    fn relation_exists(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }
}

/// Coerces a dump literal into a typed cell for the given column kind.
fn coerce_literal(literal: &SqlLiteral, kind: ColumnKind) -> Result<Option<Value>> {
    let mismatch = |literal: &SqlLiteral| {
        StoreError::Storage(format!("literal {literal:?} does not fit column kind {kind:?}"))
    };
    let value = match (literal, kind) {
        (SqlLiteral::Null, _) => return Ok(None),
        (SqlLiteral::Number(raw), ColumnKind::Integer) => Value::Integer(
            raw.parse::<i64>()
                .map_err(|_| mismatch(literal))?,
        ),
        (SqlLiteral::Number(raw), ColumnKind::Float) => Value::Float(
            raw.parse::<f64>()
                .map_err(|_| mismatch(literal))?,
        ),
        // MySQL-style dumps encode booleans as 0/1.
        (SqlLiteral::Number(raw), ColumnKind::Boolean) if raw == "0" => Value::Boolean(false),
        (SqlLiteral::Number(raw), ColumnKind::Boolean) if raw == "1" => Value::Boolean(true),
        (SqlLiteral::Boolean(b), ColumnKind::Boolean) => Value::Boolean(*b),
        (SqlLiteral::Text(raw), ColumnKind::Date) => {
            Value::Date(parse_naive_date(raw).map_err(|_| mismatch(literal))?)
        }
        (SqlLiteral::Text(raw), ColumnKind::DateTime) => match parse_naive_datetime(raw) {
            Ok(dt) => Value::DateTime(dt),
            Err(_) => {
                let date = parse_naive_date(raw).map_err(|_| mismatch(literal))?;
                Value::DateTime(date.and_hms_opt(0, 0, 0).ok_or_else(|| mismatch(literal))?)
            }
        },
        (SqlLiteral::Text(raw), ColumnKind::String) => Value::String(raw.clone()),
        (SqlLiteral::Number(raw), ColumnKind::String) => Value::String(raw.clone()),
        _ => return Err(mismatch(literal)),
    };
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people_columns() -> Vec<RelationColumn> {
        vec![
            RelationColumn {
                name: "1".into(),
                sql_type: "int".into(),
            },
            RelationColumn {
                name: "2".into(),
                sql_type: "varchar(50)".into(),
            },
        ]
    }

    #[test]
    fn insert_validates_literals_against_column_types() {
        let mut engine = MemoryEngine::new();
        engine.create_relation("table_1", &people_columns()).unwrap();
        engine
            .insert_literals(
                "table_1",
                &[],
                &[SqlLiteral::Number("7".into()), SqlLiteral::Text("ada".into())],
            )
            .unwrap();
        let err = engine.insert_literals(
            "table_1",
            &[],
            &[SqlLiteral::Text("seven".into()), SqlLiteral::Null],
        );
        assert!(matches!(err, Err(StoreError::Storage(_))));
        assert_eq!(engine.scan("table_1").unwrap().rows.len(), 1);
    }

    #[test]
    fn named_column_inserts_default_missing_columns_to_null() {
        let mut engine = MemoryEngine::new();
        engine.create_relation("table_1", &people_columns()).unwrap();
        engine
            .insert_literals("table_1", &["2".into()], &[SqlLiteral::Text("ada".into())])
            .unwrap();
        let relation = engine.scan("table_1").unwrap();
        assert_eq!(relation.rows[0][0], None);
        assert_eq!(relation.rows[0][1], Some(Value::String("ada".into())));
    }

    #[test]
    fn copy_relation_duplicates_schema_and_rows() {
        let mut engine = MemoryEngine::new();
        engine.create_relation("table_1", &people_columns()).unwrap();
        engine
            .insert_literals(
                "table_1",
                &[],
                &[SqlLiteral::Number("7".into()), SqlLiteral::Text("ada".into())],
            )
            .unwrap();
        engine.copy_relation("table_1", "table_2").unwrap();
        engine.rename_column("table_2", "1", "9").unwrap();
        assert_eq!(engine.scan("table_2").unwrap().rows.len(), 1);
        assert_eq!(engine.scan("table_1").unwrap().columns[0].name, "1");
        assert_eq!(engine.scan("table_2").unwrap().columns[0].name, "9");
    }

    #[test]
    fn dropping_a_missing_relation_is_a_no_op() {
        let mut engine = MemoryEngine::new();
        assert!(engine.drop_relation("table_404").is_ok());
    }

    #[test]
    fn drop_column_removes_cells_from_every_row() {
        let mut engine = MemoryEngine::new();
        engine.create_relation("table_1", &people_columns()).unwrap();
        engine
            .insert_literals(
                "table_1",
                &[],
                &[SqlLiteral::Number("7".into()), SqlLiteral::Text("ada".into())],
            )
            .unwrap();
        engine.drop_column("table_1", "1").unwrap();
        let relation = engine.scan("table_1").unwrap();
        assert_eq!(relation.columns.len(), 1);
        assert_eq!(relation.rows[0], vec![Some(Value::String("ada".into()))]);
    }
}
