//! SQLite persistence of catalog rows.
//!
//! Statement helpers take a borrowed connection or transaction so callers
//! can group them; `CatalogRepository` runs each group on the blocking pool
//! inside one transaction that commits on success and rolls back otherwise.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use pds_sketch::identity::FilterIdentity;
use pds_sketch::{CardinalDescriptor, CardinalType, FilterDescriptor, FilterType};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use crate::error::{CatalogError, Result};

const CREATE_FILTERS: &str = "
CREATE TABLE IF NOT EXISTS filters (
    key VARCHAR NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    type VARCHAR NOT NULL,
    max_cardinality INTEGER NOT NULL,
    max_fp REAL NOT NULL,
    hash_func_num BIGINT NOT NULL,
    hash_func_type VARCHAR NOT NULL,
    blob BLOB,
    UNIQUE (type, key, max_cardinality, max_fp, hash_func_type)
);";

const CREATE_CARDINALS: &str = "
CREATE TABLE IF NOT EXISTS cardinals (
    type VARCHAR NOT NULL,
    key VARCHAR NOT NULL,
    blob BLOB,
    UNIQUE (type, key)
);";

/// Conflicts refresh the snapshot only; identity and tuning columns keep the
/// values of the first insert.
const UPSERT_FILTER: &str = "
INSERT INTO filters (type, key, max_cardinality, max_fp, hash_func_num, hash_func_type, blob)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT (type, key, max_cardinality, max_fp, hash_func_type) DO UPDATE
SET blob = excluded.blob";

const UPSERT_CARDINAL: &str = "
INSERT INTO cardinals (type, key, blob)
VALUES (?1, ?2, ?3)
ON CONFLICT (type, key) DO UPDATE
SET blob = excluded.blob";

const SELECT_FILTER_COLUMNS: &str =
    "SELECT type, key, max_cardinality, max_fp, hash_func_num, hash_func_type, blob, created_at FROM filters";

/// FilterRecord is one row of the filters table.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterRecord {
    pub descriptor: FilterDescriptor,
    pub state: Vec<u8>,
    pub created_at: Option<NaiveDateTime>,
}

/// CardinalRecord is one row of the cardinals table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardinalRecord {
    pub descriptor: CardinalDescriptor,
    pub state: Vec<u8>,
}

/// create_filters creates the filters table if it does not exist.
pub fn create_filters(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(CREATE_FILTERS)?;
    Ok(())
}

/// create_cardinals creates the cardinals table if it does not exist.
pub fn create_cardinals(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(CREATE_CARDINALS)?;
    Ok(())
}

/// insert_filter upserts a filter row with `state` as its snapshot.
pub fn insert_filter(tx: &Transaction<'_>, descriptor: &FilterDescriptor, state: &[u8]) -> Result<()> {
    tx.prepare_cached(UPSERT_FILTER)?.execute(params![
        descriptor.filter_type.as_str(),
        descriptor.key,
        to_i64(descriptor.max_cardinality)?,
        descriptor.max_fp,
        descriptor.hash_func_num as i64,
        descriptor.hash_func_type,
        state,
    ])?;
    Ok(())
}

/// insert_cardinal upserts a counter row with `state` as its snapshot.
pub fn insert_cardinal(
    tx: &Transaction<'_>,
    descriptor: &CardinalDescriptor,
    state: &[u8],
) -> Result<()> {
    tx.prepare_cached(UPSERT_CARDINAL)?.execute(params![
        descriptor.cardinal_type.as_str(),
        descriptor.key,
        state,
    ])?;
    Ok(())
}

/// select_filter returns the row with the given identity, if any.
pub fn select_filter(conn: &Connection, identity: &FilterIdentity) -> Result<Option<FilterRecord>> {
    let sql = format!(
        "{} WHERE type = ?1 AND key = ?2 AND max_cardinality = ?3 AND max_fp = ?4 AND hash_func_type = ?5",
        SELECT_FILTER_COLUMNS
    );
    let row = conn
        .prepare_cached(&sql)?
        .query_row(
            params![
                identity.filter_type.as_str(),
                identity.key,
                to_i64(identity.max_cardinality)?,
                identity.max_fp(),
                identity.hash_func_type,
            ],
            FilterRow::from_row,
        )
        .optional()?;

    row.map(FilterRow::into_record).transpose()
}

/// select_filters returns every row cataloged under (type, key), oldest first.
pub fn select_filters(conn: &Connection, filter_type: FilterType, key: &str) -> Result<Vec<FilterRecord>> {
    let sql = format!(
        "{} WHERE type = ?1 AND key = ?2 ORDER BY rowid",
        SELECT_FILTER_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![filter_type.as_str(), key], FilterRow::from_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?.into_record()?);
    }
    Ok(records)
}

/// select_cardinal returns the counter row for (type, key), if any.
pub fn select_cardinal(
    conn: &Connection,
    cardinal_type: CardinalType,
    key: &str,
) -> Result<Option<CardinalRecord>> {
    let state = conn
        .prepare_cached("SELECT blob FROM cardinals WHERE type = ?1 AND key = ?2")?
        .query_row(params![cardinal_type.as_str(), key], |row| {
            row.get::<_, Option<Vec<u8>>>(0)
        })
        .optional()?;

    Ok(state.map(|state| CardinalRecord {
        descriptor: CardinalDescriptor::new(cardinal_type, key),
        state: state.unwrap_or_default(),
    }))
}

/// Raw column values of a filters row.
struct FilterRow {
    filter_type: String,
    key: String,
    max_cardinality: i64,
    max_fp: f64,
    hash_func_num: i64,
    hash_func_type: String,
    blob: Option<Vec<u8>>,
    created_at: Option<NaiveDateTime>,
}

impl FilterRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            filter_type: row.get(0)?,
            key: row.get(1)?,
            max_cardinality: row.get(2)?,
            max_fp: row.get(3)?,
            hash_func_num: row.get(4)?,
            hash_func_type: row.get(5)?,
            blob: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<FilterRecord> {
        let corrupt = |what: &str| {
            CatalogError::Persistence(format!("corrupt filters row for key {}: {}", self.key, what))
        };

        let filter_type: FilterType = self
            .filter_type
            .parse()
            .map_err(|_| corrupt(&format!("type {}", self.filter_type)))?;
        let max_cardinality = u64::try_from(self.max_cardinality)
            .map_err(|_| corrupt(&format!("max_cardinality {}", self.max_cardinality)))?;
        let hash_func_num = u32::try_from(self.hash_func_num)
            .map_err(|_| corrupt(&format!("hash_func_num {}", self.hash_func_num)))?;

        Ok(FilterRecord {
            descriptor: FilterDescriptor {
                filter_type,
                key: self.key,
                max_cardinality,
                max_fp: self.max_fp,
                hash_func_num,
                hash_func_type: self.hash_func_type,
            },
            state: self.blob.unwrap_or_default(),
            created_at: self.created_at,
        })
    }
}

fn to_i64(v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| CatalogError::InvalidParameters(format!("{} is out of range", v)))
}

/// CatalogRepository owns the catalog connection.
#[derive(Clone)]
pub struct CatalogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self::with_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// run executes `f` on the blocking pool with the connection locked.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| CatalogError::Persistence("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| CatalogError::Persistence(e.to_string()))?
    }

    /// transaction runs `f` in one transaction. It commits if `f` succeeds;
    /// any error rolls the whole group back.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await
    }

    /// ensure_schema creates both catalog tables if absent. Safe to call on
    /// every start.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.transaction(|tx| {
            create_filters(tx)?;
            create_cardinals(tx)
        })
        .await?;
        debug!("catalog schema ready");
        Ok(())
    }

    pub async fn upsert_filter(&self, descriptor: &FilterDescriptor, state: Vec<u8>) -> Result<()> {
        let descriptor = descriptor.clone();
        self.transaction(move |tx| insert_filter(tx, &descriptor, &state))
            .await
    }

    pub async fn upsert_cardinal(&self, descriptor: &CardinalDescriptor, state: Vec<u8>) -> Result<()> {
        let descriptor = descriptor.clone();
        self.transaction(move |tx| insert_cardinal(tx, &descriptor, &state))
            .await
    }

    /// get_filter loads the row with the given identity.
    pub async fn get_filter(&self, identity: &FilterIdentity) -> Result<FilterRecord> {
        let identity = identity.clone();
        self.run(move |conn| {
            select_filter(conn, &identity)?.ok_or_else(|| {
                CatalogError::NotFound(format!(
                    "filter {} {} (capacity {}, error rate {})",
                    identity.filter_type,
                    identity.key,
                    identity.max_cardinality,
                    identity.max_fp()
                ))
            })
        })
        .await
    }

    /// list_filters loads every row cataloged under (type, key).
    pub async fn list_filters(&self, filter_type: FilterType, key: &str) -> Result<Vec<FilterRecord>> {
        let key = key.to_string();
        self.run(move |conn| select_filters(conn, filter_type, &key))
            .await
    }

    /// get_cardinal loads the counter row for (type, key).
    pub async fn get_cardinal(&self, cardinal_type: CardinalType, key: &str) -> Result<CardinalRecord> {
        let key = key.to_string();
        self.run(move |conn| {
            select_cardinal(conn, cardinal_type, &key)?.ok_or_else(|| {
                CatalogError::NotFound(format!("cardinal {} {}", cardinal_type, key))
            })
        })
        .await
    }
}
