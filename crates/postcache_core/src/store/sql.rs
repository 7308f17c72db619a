//! SQL statements shared by every SQLite-based store backend.
//!
//! # Invariants
//! - Table and column names come from validated entity schemas only.
//! - Unsorted reads return rows in insertion (`rowid`) order.

use super::query::{CompiledPredicate, CompiledRequest};
use super::{StoreError, StoreResult};
use crate::model::entity::{EntitySchema, FieldValues, ObjectId, Value, ValueError};
use rusqlite::{params_from_iter, Connection, Row};
use uuid::Uuid;

/// One persisted object as read from a store or a parent scope.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredRow {
    pub(crate) object_id: ObjectId,
    pub(crate) values: FieldValues,
}

fn select_list(schema: &EntitySchema) -> String {
    let mut columns = vec!["\"object_id\"".to_string()];
    columns.extend(schema.fields.iter().map(|field| format!("\"{}\"", field.name)));
    columns.join(", ")
}

fn parse_row(schema: &'static EntitySchema, row: &Row<'_>) -> StoreResult<StoredRow> {
    let id_text: String = row.get(0)?;
    let object_id = Uuid::parse_str(&id_text).map_err(|_| {
        StoreError::InvalidData(ValueError {
            entity: schema.name,
            field: "object_id",
            found: Value::Text(id_text.clone()),
        })
    })?;

    let mut values = Vec::with_capacity(schema.fields.len());
    for (index, field) in schema.fields.iter().enumerate() {
        values.push(field.kind.read(row, index + 1)?);
    }

    Ok(StoredRow { object_id, values })
}

fn usize_bind(value: usize) -> Value {
    Value::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Selects rows matching the request, pushing sort and window into SQL.
pub(crate) fn select_rows(
    conn: &Connection,
    schema: &'static EntitySchema,
    request: &CompiledRequest,
) -> StoreResult<Vec<StoredRow>> {
    let mut binds = Vec::new();
    let mut sql = format!(
        "SELECT {} FROM \"{}\" WHERE {}",
        select_list(schema),
        schema.table,
        request.predicate.to_sql(&mut binds)
    );

    sql.push_str(" ORDER BY ");
    for key in &request.sort {
        let direction = if key.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!("\"{}\" {direction}, ", key.column));
    }
    sql.push_str("rowid ASC");

    match (request.limit, request.offset) {
        (Some(limit), offset) => {
            sql.push_str(" LIMIT ?");
            binds.push(usize_bind(limit));
            if let Some(offset) = offset {
                sql.push_str(" OFFSET ?");
                binds.push(usize_bind(offset));
            }
        }
        (None, Some(offset)) => {
            sql.push_str(" LIMIT -1 OFFSET ?");
            binds.push(usize_bind(offset));
        }
        (None, None) => {}
    }

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(binds))?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(parse_row(schema, row)?);
    }

    Ok(result)
}

pub(crate) fn select_row(
    conn: &Connection,
    schema: &'static EntitySchema,
    object_id: ObjectId,
) -> StoreResult<Option<StoredRow>> {
    let sql = format!(
        "SELECT {} FROM \"{}\" WHERE object_id = ?1;",
        select_list(schema),
        schema.table
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([object_id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_row(schema, row)?));
    }

    Ok(None)
}

pub(crate) fn count_rows(
    conn: &Connection,
    schema: &'static EntitySchema,
    predicate: &CompiledPredicate,
) -> StoreResult<usize> {
    let mut binds = Vec::new();
    let sql = format!(
        "SELECT COUNT(*) FROM \"{}\" WHERE {};",
        schema.table,
        predicate.to_sql(&mut binds)
    );
    let count: i64 = conn.query_row(&sql, params_from_iter(binds), |row| row.get(0))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

pub(crate) fn insert_row(
    conn: &Connection,
    schema: &'static EntitySchema,
    object_id: ObjectId,
    values: &[Value],
) -> StoreResult<()> {
    let placeholders = (0..=schema.fields.len())
        .map(|_| "?")
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({placeholders});",
        schema.table,
        select_list(schema)
    );

    let mut binds = vec![Value::Text(object_id.to_string())];
    binds.extend(values.iter().cloned());
    conn.execute(&sql, params_from_iter(binds))?;
    Ok(())
}

/// Returns `false` when no row carries `object_id`.
pub(crate) fn update_row(
    conn: &Connection,
    schema: &'static EntitySchema,
    object_id: ObjectId,
    values: &[Value],
) -> StoreResult<bool> {
    let assignments = schema
        .fields
        .iter()
        .map(|field| format!("\"{}\" = ?", field.name))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE \"{}\" SET {assignments} WHERE object_id = ?;",
        schema.table
    );

    let mut binds = values.to_vec();
    binds.push(Value::Text(object_id.to_string()));
    let changed = conn.execute(&sql, params_from_iter(binds))?;
    Ok(changed > 0)
}

pub(crate) fn delete_row(
    conn: &Connection,
    schema: &'static EntitySchema,
    object_id: ObjectId,
) -> StoreResult<bool> {
    let sql = format!("DELETE FROM \"{}\" WHERE object_id = ?1;", schema.table);
    let changed = conn.execute(&sql, [object_id.to_string()])?;
    Ok(changed > 0)
}

/// Deletes every row matching `predicate` and returns the deleted ids.
pub(crate) fn delete_matching(
    conn: &Connection,
    schema: &'static EntitySchema,
    predicate: &CompiledPredicate,
) -> StoreResult<Vec<ObjectId>> {
    let mut binds = Vec::new();
    let sql = format!(
        "DELETE FROM \"{}\" WHERE {} RETURNING object_id;",
        schema.table,
        predicate.to_sql(&mut binds)
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(binds))?;
    let mut deleted = Vec::new();
    while let Some(row) = rows.next()? {
        let id_text: String = row.get(0)?;
        let object_id = Uuid::parse_str(&id_text).map_err(|_| {
            StoreError::InvalidData(ValueError {
                entity: schema.name,
                field: "object_id",
                found: Value::Text(id_text.clone()),
            })
        })?;
        deleted.push(object_id);
    }

    Ok(deleted)
}

/// Verifies the migrated schema carries every column the entity needs.
pub(crate) fn ensure_entity_table(
    conn: &Connection,
    schema: &'static EntitySchema,
) -> StoreResult<()> {
    if !table_exists(conn, schema.table)? {
        return Err(StoreError::MissingEntityTable(schema.table));
    }

    let columns = table_columns(conn, schema.table)?;
    let required =
        std::iter::once("object_id").chain(schema.fields.iter().map(|field| field.name));
    for column in required {
        if !columns.iter().any(|current| current == column) {
            return Err(StoreError::MissingEntityColumn {
                table: schema.table,
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub(crate) fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\");"))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(1)?);
    }
    Ok(columns)
}
