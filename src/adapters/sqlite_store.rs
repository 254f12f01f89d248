//! SQLite implementation of the generic row store.
//!
//! Schemas are supplied by configuration as (table → ordered column list);
//! every column is stored as TEXT and typed parsing happens in the domain.
//! The first column of every table is `id` and acts as the primary key, so
//! re-inserting a derived id replaces the row instead of duplicating it.

use std::collections::HashMap;
use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params_from_iter;

use crate::domain::error::TraderError;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::{Row, StorePort};

/// Sentinel written for columns absent from an insert mapping.
pub const ABSENT: &str = "-";

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    schemas: HashMap<String, Vec<String>>,
}

impl SqliteStore {
    /// The platform's table layout, used when configuration carries no
    /// `[tables]` section (tests, regression runs).
    pub fn default_schemas() -> HashMap<String, Vec<String>> {
        let declare = |cols: &[&str]| cols.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        HashMap::from([
            ("ticks".to_string(), declare(&["id", "date_time", "symbol", "value"])),
            (
                "twaps".to_string(),
                declare(&["id", "start_time", "end_time", "symbol", "value"]),
            ),
            (
                "portfolios".to_string(),
                declare(&["id", "exchange", "cash", "allocation", "updated_by"]),
            ),
            (
                "assets".to_string(),
                declare(&["id", "portfolio_id", "symbol", "units", "current_exposure"]),
            ),
            (
                "strategies".to_string(),
                declare(&["id", "name", "portfolio_id", "updated_by"]),
            ),
            ("strategy_variables".to_string(), declare(&["id", "value"])),
            (
                "strategy_bread_crumbs".to_string(),
                declare(&["id", "strategy", "type", "timestamp", "data"]),
            ),
            (
                "jobs".to_string(),
                declare(&[
                    "id",
                    "name",
                    "script",
                    "version",
                    "log_path",
                    "phase_id",
                    "elapsed_time",
                ]),
            ),
            (
                "phases".to_string(),
                declare(&["id", "job_id", "date_time", "name"]),
            ),
            (
                "data_sources".to_string(),
                declare(&["id", "name", "configs"]),
            ),
        ])
    }

    /// Read schemas from the `[tables]` config section, where each key is a
    /// table name and each value a comma-separated ordered column list.
    /// Falls back to the defaults when the section is absent.
    pub fn schemas_from_config(config: &dyn ConfigPort) -> HashMap<String, Vec<String>> {
        let keys = config.section_keys("tables");
        if keys.is_empty() {
            return Self::default_schemas();
        }
        let mut schemas = HashMap::new();
        for table in keys {
            if let Some(raw) = config.get_string("tables", &table) {
                let columns: Vec<String> = raw
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if !columns.is_empty() {
                    schemas.insert(table, columns);
                }
            }
        }
        schemas
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TraderError> {
        let db_path = config
            .get_string("store", "path")
            .ok_or_else(|| TraderError::ConfigMissing {
                section: "store".into(),
                key: "path".into(),
            })?;
        let pool_size = config.get_int("store", "pool_size", 4) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e: r2d2::Error| TraderError::Store {
                reason: e.to_string(),
            })?;

        Ok(Self {
            pool,
            schemas: Self::schemas_from_config(config),
        })
    }

    pub fn open<P: AsRef<Path>>(
        path: P,
        schemas: HashMap<String, Vec<String>>,
    ) -> Result<Self, TraderError> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e: r2d2::Error| TraderError::Store {
                reason: e.to_string(),
            })?;
        Ok(Self { pool, schemas })
    }

    pub fn in_memory(schemas: HashMap<String, Vec<String>>) -> Result<Self, TraderError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| TraderError::Store {
                reason: e.to_string(),
            })?;
        Ok(Self { pool, schemas })
    }

    /// Create every configured table. First column is the primary key.
    pub fn initialize_schema(&self) -> Result<(), TraderError> {
        let conn = self.conn()?;
        for (table, columns) in &self.schemas {
            let decls: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(i, col)| {
                    if i == 0 {
                        format!("\"{col}\" TEXT PRIMARY KEY")
                    } else {
                        format!("\"{col}\" TEXT NOT NULL")
                    }
                })
                .collect();
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS \"{table}\" ({})",
                    decls.join(", ")
                ),
                [],
            )
            .map_err(|e: rusqlite::Error| TraderError::StoreQuery {
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn conn(
        &self,
    ) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, TraderError> {
        self.pool
            .get()
            .map_err(|e: r2d2::Error| TraderError::Store {
                reason: e.to_string(),
            })
    }

    fn table_exists(
        &self,
        conn: &rusqlite::Connection,
        table: &str,
    ) -> Result<bool, TraderError> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .map_err(|e: rusqlite::Error| TraderError::StoreQuery {
                reason: e.to_string(),
            })?;
        Ok(count > 0)
    }

    fn where_clause(predicate: &[(&str, &str)]) -> String {
        if predicate.is_empty() {
            return String::new();
        }
        let conds: Vec<String> = predicate
            .iter()
            .enumerate()
            .map(|(i, (col, _))| format!("\"{col}\" = ?{}", i + 1))
            .collect();
        format!(" WHERE {}", conds.join(" AND "))
    }
}

impl StorePort for SqliteStore {
    fn insert_row(
        &self,
        table: &str,
        values: &HashMap<String, String>,
    ) -> Result<(), TraderError> {
        let columns = self
            .schemas
            .get(table)
            .ok_or_else(|| TraderError::Store {
                reason: format!("no schema declared for table {table}"),
            })?
            .clone();

        let ordered: Vec<String> = columns
            .iter()
            .map(|col| values.get(col).cloned().unwrap_or_else(|| ABSENT.to_string()))
            .collect();

        let placeholders: Vec<String> =
            (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO \"{table}\" ({}) VALUES ({})",
            quoted.join(", "),
            placeholders.join(", ")
        );

        self.conn()?
            .execute(&sql, params_from_iter(ordered.iter()))
            .map_err(|e: rusqlite::Error| TraderError::StoreQuery {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn query(
        &self,
        table: &str,
        predicate: &[(&str, &str)],
        projection: Option<&[&str]>,
    ) -> Result<Option<Vec<Row>>, TraderError> {
        let conn = self.conn()?;
        if !self.table_exists(&conn, table)? {
            return Ok(None);
        }

        let columns: Vec<String> = match projection {
            Some(cols) => cols.iter().map(|c| c.to_string()).collect(),
            None => match self.schemas.get(table) {
                Some(cols) => cols.clone(),
                // Table exists but carries no declared schema: introspect.
                None => self.table_columns(table)?.unwrap_or_default(),
            },
        };
        let select = columns
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "SELECT {select} FROM \"{table}\"{}",
            Self::where_clause(predicate)
        );
        let mut stmt =
            conn.prepare(&sql)
                .map_err(|e: rusqlite::Error| TraderError::StoreQuery {
                    reason: e.to_string(),
                })?;

        let values: Vec<&str> = predicate.iter().map(|(_, v)| *v).collect();
        let mut rows_out = Vec::new();
        let mut rows = stmt
            .query(params_from_iter(values.iter().copied()))
            .map_err(|e: rusqlite::Error| TraderError::StoreQuery {
                reason: e.to_string(),
            })?;
        while let Some(row) = rows.next().map_err(|e: rusqlite::Error| {
            TraderError::StoreQuery {
                reason: e.to_string(),
            }
        })? {
            let mut out = Row::new();
            for (i, col) in columns.iter().enumerate() {
                let value: String =
                    row.get(i)
                        .map_err(|e: rusqlite::Error| TraderError::StoreQuery {
                            reason: e.to_string(),
                        })?;
                out.insert(col.clone(), value);
            }
            rows_out.push(out);
        }
        Ok(Some(rows_out))
    }

    fn query_one(
        &self,
        table: &str,
        predicate: &[(&str, &str)],
    ) -> Result<Option<Row>, TraderError> {
        let Some(mut rows) = self.query(table, predicate, None)? else {
            return Ok(None);
        };
        match rows.len() {
            0 => Ok(None),
            1 => Ok(Some(rows.remove(0))),
            n => Err(TraderError::StoreQuery {
                reason: format!("expected at most one row in {table}, found {n}"),
            }),
        }
    }

    fn update_value(
        &self,
        table: &str,
        predicate: &[(&str, &str)],
        column: &str,
        value: &str,
    ) -> Result<usize, TraderError> {
        let conds: Vec<String> = predicate
            .iter()
            .enumerate()
            .map(|(i, (col, _))| format!("\"{col}\" = ?{}", i + 2))
            .collect();
        let where_sql = if conds.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conds.join(" AND "))
        };
        let sql = format!("UPDATE \"{table}\" SET \"{column}\" = ?1{where_sql}");

        let mut params: Vec<&str> = vec![value];
        params.extend(predicate.iter().map(|(_, v)| *v));

        self.conn()?
            .execute(&sql, params_from_iter(params.iter()))
            .map_err(|e: rusqlite::Error| TraderError::StoreQuery {
                reason: e.to_string(),
            })
    }

    fn table_columns(&self, table: &str) -> Result<Option<Vec<String>>, TraderError> {
        let conn = self.conn()?;
        if !self.table_exists(&conn, table)? {
            return Ok(None);
        }
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info(\"{table}\")"))
            .map_err(|e: rusqlite::Error| TraderError::StoreQuery {
                reason: e.to_string(),
            })?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|e: rusqlite::Error| TraderError::StoreQuery {
                reason: e.to_string(),
            })?
            .collect::<Result<Vec<String>, rusqlite::Error>>()
            .map_err(|e| TraderError::StoreQuery {
                reason: e.to_string(),
            })?;
        Ok(Some(names))
    }
}
