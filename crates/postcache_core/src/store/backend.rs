//! Store backends: the physical stores a coordinator can sit on.
//!
//! # Responsibility
//! - Open the SQLite file, in-memory and binary-image store kinds.
//! - Expose bulk delete as a capability so clean strategy stays internal.
//! - Mirror every committed write into the binary image.
//!
//! # Invariants
//! - Every backend connection is migrated before it is handed out.
//! - The binary image is replaced atomically; a crash keeps the prior image.
//! - The image is written before its transaction commits. A failed image write
//!   rolls the transaction back, so store and image never diverge.

use super::query::Predicate;
use super::sql;
use super::StoreResult;
use crate::db::migrations::{current_user_version, latest_version};
use crate::db::{open_db, open_db_in_memory, DbError, DbResult};
use crate::model::entity::{EntitySchema, ObjectId, Value};
use crate::model::MODEL_SCHEMAS;
use log::{info, warn};
use rusqlite::{params_from_iter, Connection, Transaction};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Physical store kind selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Disk-backed relational store.
    Sqlite,
    /// Volatile store living as long as the coordinator.
    InMemory,
    /// Whole-store image rewritten on every commit.
    Binary,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::InMemory => "InMemory",
            Self::Binary => "Binary",
        }
    }

    /// Store file extension; `None` for kinds without a file.
    pub fn file_extension(self) -> Option<&'static str> {
        match self {
            Self::Sqlite => Some("sqlite"),
            Self::InMemory => None,
            Self::Binary => Some("binstore"),
        }
    }
}

impl Display for StoreKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sql" => Ok(Self::Sqlite),
            "inmemory" | "memory" => Ok(Self::InMemory),
            "binary" => Ok(Self::Binary),
            other => Err(format!(
                "unsupported store kind `{other}`; expected sqlite|memory|binary"
            )),
        }
    }
}

/// Result of a store-level bulk delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkDelete {
    /// The backend cannot delete by predicate; callers delete object by object.
    Unsupported,
    /// Rows removed from the store, by object id.
    Deleted(Vec<ObjectId>),
}

/// Physical store behind a coordinator.
pub trait StoreBackend: Send {
    fn kind(&self) -> StoreKind;

    fn connection(&self) -> &Connection;

    fn connection_mut(&mut self) -> &mut Connection;

    /// Image file mirroring the store; `None` for kinds without one.
    fn image_path(&self) -> Option<&Path> {
        None
    }

    /// Deletes every row of `schema` matching `predicate` at store level.
    fn bulk_delete(
        &mut self,
        schema: &'static EntitySchema,
        predicate: &Predicate,
    ) -> StoreResult<BulkDelete> {
        let compiled = predicate.compile(schema)?;
        let image = self.image_path().map(Path::to_path_buf);
        let tx = self.connection_mut().transaction()?;
        let deleted = sql::delete_matching(&tx, schema, &compiled)?;
        let image = image.as_deref().filter(|_| !deleted.is_empty());
        commit_mirrored(tx, image)?;
        Ok(BulkDelete::Deleted(deleted))
    }
}

/// Commits `tx`, first writing its contents to `image` when given.
///
/// Dropping the transaction on a failed image write rolls it back.
pub(crate) fn commit_mirrored(tx: Transaction<'_>, image: Option<&Path>) -> StoreResult<()> {
    if let Some(path) = image {
        write_image(&tx, path)?;
    }
    tx.commit()?;
    Ok(())
}

/// Opens the backend for `kind`, using `path` for file-based kinds.
pub fn open_backend(kind: StoreKind, path: Option<&Path>) -> DbResult<Box<dyn StoreBackend>> {
    let backend: Box<dyn StoreBackend> = match (kind, path) {
        (StoreKind::Sqlite, Some(path)) => Box::new(SqliteBackend::open(path)?),
        (StoreKind::Binary, Some(path)) => Box::new(BinaryBackend::open(path)?),
        (StoreKind::InMemory, _) => Box::new(MemoryBackend::open()?),
        (StoreKind::Sqlite | StoreKind::Binary, None) => {
            return Err(DbError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{kind} store requires a file path"),
            )));
        }
    };
    Ok(backend)
}

fn ensure_parent_dir(path: &Path) -> DbResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Disk-backed SQLite store.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> DbResult<Self> {
        ensure_parent_dir(path)?;
        Ok(Self {
            conn: open_db(path)?,
        })
    }
}

impl StoreBackend for SqliteBackend {
    fn kind(&self) -> StoreKind {
        StoreKind::Sqlite
    }

    fn connection(&self) -> &Connection {
        &self.conn
    }

    fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// Volatile in-memory store without bulk delete support.
pub struct MemoryBackend {
    conn: Connection,
}

impl MemoryBackend {
    pub fn open() -> DbResult<Self> {
        Ok(Self {
            conn: open_db_in_memory()?,
        })
    }
}

impl StoreBackend for MemoryBackend {
    fn kind(&self) -> StoreKind {
        StoreKind::InMemory
    }

    fn connection(&self) -> &Connection {
        &self.conn
    }

    fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    fn bulk_delete(
        &mut self,
        _schema: &'static EntitySchema,
        _predicate: &Predicate,
    ) -> StoreResult<BulkDelete> {
        Ok(BulkDelete::Unsupported)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreImage {
    schema_version: u32,
    tables: Vec<TableImage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableImage {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Binary image store: an in-memory database mirrored to one image file.
pub struct BinaryBackend {
    conn: Connection,
    path: PathBuf,
}

impl BinaryBackend {
    pub fn open(path: &Path) -> DbResult<Self> {
        ensure_parent_dir(path)?;
        let mut conn = open_db_in_memory()?;
        if path.exists() {
            let file = File::open(path)?;
            let image: StoreImage = bincode::deserialize_from(BufReader::new(file))?;
            load_image(&mut conn, &image)?;
            info!(
                "event=binary_image_load module=store status=ok tables={}",
                image.tables.len()
            );
        }

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

}

impl StoreBackend for BinaryBackend {
    fn kind(&self) -> StoreKind {
        StoreKind::Binary
    }

    fn connection(&self) -> &Connection {
        &self.conn
    }

    fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    fn image_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

fn write_image(conn: &Connection, path: &Path) -> DbResult<()> {
    let image = dump_image(conn)?;
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    bincode::serialize_into(&mut file, &image)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| DbError::Io(err.error))?;
    Ok(())
}

fn dump_image(conn: &Connection) -> DbResult<StoreImage> {
    let mut tables = Vec::with_capacity(MODEL_SCHEMAS.len());
    for schema in MODEL_SCHEMAS {
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM \"{}\" ORDER BY rowid ASC;",
            schema.table
        ))?;
        let columns = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut rows = stmt.query([])?;
        let mut table_rows = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                values.push(row.get::<_, Value>(index)?);
            }
            table_rows.push(values);
        }
        tables.push(TableImage {
            name: schema.table.to_string(),
            columns,
            rows: table_rows,
        });
    }

    Ok(StoreImage {
        schema_version: current_user_version(conn)?,
        tables,
    })
}

fn load_image(conn: &mut Connection, image: &StoreImage) -> DbResult<()> {
    let latest = latest_version();
    if image.schema_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: image.schema_version,
            latest_supported: latest,
        });
    }

    let tx = conn.transaction()?;
    for table in &image.tables {
        let known = MODEL_SCHEMAS
            .iter()
            .any(|schema| schema.table == table.name.as_str());
        if !known {
            warn!(
                "event=binary_image_load module=store status=skip table={}",
                table.name
            );
            continue;
        }

        let existing = sql::table_columns(&tx, &table.name)?;
        let usable = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, column)| existing.contains(column))
            .collect::<Vec<_>>();
        let column_list = usable
            .iter()
            .map(|(_, column)| format!("\"{column}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = usable.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let statement = format!(
            "INSERT INTO \"{}\" ({column_list}) VALUES ({placeholders});",
            table.name
        );

        let mut stmt = tx.prepare(&statement)?;
        for row in &table.rows {
            let binds = usable
                .iter()
                .map(|(index, _)| row.get(*index).cloned().unwrap_or(Value::Null));
            stmt.execute(params_from_iter(binds))?;
        }
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        commit_mirrored, open_backend, BinaryBackend, BulkDelete, StoreBackend, StoreKind,
    };
    use crate::model::entity::Value;
    use crate::model::post::POST_SCHEMA;
    use crate::store::query::Predicate;
    use crate::store::sql::{insert_row, select_row};
    use uuid::Uuid;

    #[test]
    fn parses_store_kinds() {
        assert_eq!("SQLite".parse::<StoreKind>().unwrap(), StoreKind::Sqlite);
        assert_eq!("memory".parse::<StoreKind>().unwrap(), StoreKind::InMemory);
        assert_eq!(" Binary ".parse::<StoreKind>().unwrap(), StoreKind::Binary);
        assert!("plist".parse::<StoreKind>().is_err());
    }

    #[test]
    fn in_memory_backend_does_not_bulk_delete() {
        let mut backend = open_backend(StoreKind::InMemory, None).unwrap();
        let outcome = backend.bulk_delete(&POST_SCHEMA, &Predicate::True).unwrap();
        assert_eq!(outcome, BulkDelete::Unsupported);
    }

    #[test]
    fn file_kinds_require_a_path() {
        assert!(open_backend(StoreKind::Sqlite, None).is_err());
        assert!(open_backend(StoreKind::Binary, None).is_err());
    }

    #[test]
    fn binary_image_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Model.binstore");
        let object_id = Uuid::new_v4();
        let values = vec![
            Value::Integer(4),
            Value::Text("kept".into()),
            Value::Text("body".into()),
        ];

        let mut backend = BinaryBackend::open(&path).unwrap();
        let tx = backend.connection_mut().transaction().unwrap();
        insert_row(&tx, &POST_SCHEMA, object_id, &values).unwrap();
        commit_mirrored(tx, Some(path.as_path())).unwrap();
        drop(backend);

        let reopened = BinaryBackend::open(&path).unwrap();
        let row = select_row(reopened.connection(), &POST_SCHEMA, object_id)
            .unwrap()
            .unwrap();
        assert_eq!(row.values, values);
    }
}
