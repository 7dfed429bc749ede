//! Backing store contract and SQLite implementation
//!
//! The sync engine only depends on the `ProductStore` trait: chunked upsert
//! keyed on `(source_id, external_id)`, id listing and cursor queries
//! scoped by unit, and id-targeted deletion. The SQLite implementation
//! owns its schema and creates it on connect.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Row, SqlitePool};

use crate::domain::error::PersistenceError;
use crate::domain::product::{CanonicalCategory, ProductRecord, UnitKey};

/// Backing store operations the pipeline requires. Upsert-by-key must be
/// atomic: concurrent writers to disjoint unit key spaces never race.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Cheap connectivity check used at setup.
    async fn ping(&self) -> Result<(), PersistenceError>;

    /// Upsert a chunk, conflict key `(source_id, external_id)`.
    async fn upsert_chunk(
        &self,
        unit: &UnitKey,
        records: &[ProductRecord],
    ) -> Result<(), PersistenceError>;

    /// Single-record upsert used when a chunk write degrades.
    async fn upsert_one(
        &self,
        unit: &UnitKey,
        record: &ProductRecord,
    ) -> Result<(), PersistenceError>;

    /// External ids currently stored for the unit.
    async fn stored_ids(&self, unit: &UnitKey) -> Result<HashSet<i64>, PersistenceError>;

    /// Highest stored external id for the unit (the sync cursor).
    async fn max_external_id(&self, unit: &UnitKey) -> Result<Option<i64>, PersistenceError>;

    /// Delete the given external ids from the unit. Returns rows removed.
    async fn delete_ids(&self, unit: &UnitKey, ids: &[i64]) -> Result<u64, PersistenceError>;
}

#[derive(Clone)]
pub struct SqliteProductStore {
    pool: SqlitePool,
}

impl SqliteProductStore {
    /// Connect and create the schema. The database file (and its parent
    /// directory) are created when missing.
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        if db_path != ":memory:" && !db_path.is_empty() {
            if let Some(parent) = Path::new(db_path).parent() {
                std::fs::create_dir_all(parent).map_err(|e| PersistenceError::BadPath {
                    path: db_path.to_string(),
                    reason: e.to_string(),
                })?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path).map_err(|e| PersistenceError::BadPath {
                    path: db_path.to_string(),
                    reason: e.to_string(),
                })?;
            }
        }

        // An in-memory database exists per connection, so it must not be
        // spread across a pool.
        let max_connections = if db_path == ":memory:" { 1 } else { 10 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                source_id TEXT NOT NULL,
                external_id INTEGER NOT NULL,
                unit_code TEXT NOT NULL,
                title TEXT NOT NULL,
                normalized_title TEXT NOT NULL,
                price INTEGER NOT NULL DEFAULT 0,
                image_url TEXT,
                category TEXT NOT NULL,
                native_category TEXT,
                promotion_tag TEXT,
                source_url TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                collected_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                PRIMARY KEY (source_id, external_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_products_unit ON products (source_id, unit_code)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Read a unit's rows back, newest external id first.
    pub async fn records_for_unit(
        &self,
        unit: &UnitKey,
    ) -> Result<Vec<ProductRecord>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT source_id, external_id, title, normalized_title, price, image_url,
                   category, native_category, promotion_tag, source_url, is_active,
                   collected_at, updated_at
            FROM products
            WHERE source_id = ? AND unit_code = ?
            ORDER BY external_id DESC
            "#,
        )
        .bind(&unit.source_id)
        .bind(&unit.unit_code)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(|row| ProductRecord {
                source_id: row.get("source_id"),
                external_id: row.get("external_id"),
                title: row.get("title"),
                normalized_title: row.get("normalized_title"),
                price: row.get("price"),
                image_url: row.get("image_url"),
                category: CanonicalCategory::from_label(row.get("category")),
                native_category: row.get("native_category"),
                promotion_tag: row.get("promotion_tag"),
                source_url: row.get("source_url"),
                is_active: row.get("is_active"),
                collected_at: row.get("collected_at"),
                updated_at: row.get("updated_at"),
            })
            .collect();
        Ok(records)
    }

    fn bind_upsert<'q>(
        unit: &'q UnitKey,
        record: &'q ProductRecord,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        sqlx::query(UPSERT_SQL)
            .bind(&record.source_id)
            .bind(record.external_id)
            .bind(&unit.unit_code)
            .bind(&record.title)
            .bind(&record.normalized_title)
            .bind(record.price)
            .bind(&record.image_url)
            .bind(record.category.as_str())
            .bind(&record.native_category)
            .bind(&record.promotion_tag)
            .bind(&record.source_url)
            .bind(record.is_active)
            .bind(record.collected_at)
            .bind(record.updated_at)
    }
}

const UPSERT_SQL: &str = r#"
    INSERT INTO products
        (source_id, external_id, unit_code, title, normalized_title, price, image_url,
         category, native_category, promotion_tag, source_url, is_active,
         collected_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(source_id, external_id) DO UPDATE SET
        unit_code = excluded.unit_code,
        title = excluded.title,
        normalized_title = excluded.normalized_title,
        price = excluded.price,
        image_url = excluded.image_url,
        category = excluded.category,
        native_category = excluded.native_category,
        promotion_tag = excluded.promotion_tag,
        source_url = excluded.source_url,
        is_active = excluded.is_active,
        updated_at = excluded.updated_at
"#;

#[async_trait]
impl ProductStore for SqliteProductStore {
    async fn ping(&self) -> Result<(), PersistenceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_chunk(
        &self,
        unit: &UnitKey,
        records: &[ProductRecord],
    ) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            Self::bind_upsert(unit, record).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_one(
        &self,
        unit: &UnitKey,
        record: &ProductRecord,
    ) -> Result<(), PersistenceError> {
        Self::bind_upsert(unit, record).execute(&self.pool).await?;
        Ok(())
    }

    async fn stored_ids(&self, unit: &UnitKey) -> Result<HashSet<i64>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT external_id FROM products WHERE source_id = ? AND unit_code = ?",
        )
        .bind(&unit.source_id)
        .bind(&unit.unit_code)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn max_external_id(&self, unit: &UnitKey) -> Result<Option<i64>, PersistenceError> {
        let row = sqlx::query(
            "SELECT MAX(external_id) FROM products WHERE source_id = ? AND unit_code = ?",
        )
        .bind(&unit.source_id)
        .bind(&unit.unit_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get(0))
    }

    async fn delete_ids(&self, unit: &UnitKey, ids: &[i64]) -> Result<u64, PersistenceError> {
        let mut deleted = 0u64;
        // Keep IN lists comfortably under the bind-parameter ceiling.
        for chunk in ids.chunks(100) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("DELETE FROM products WHERE source_id = ");
            builder.push_bind(&unit.source_id);
            builder.push(" AND unit_code = ");
            builder.push_bind(&unit.unit_code);
            builder.push(" AND external_id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            builder.push(")");
            deleted += builder.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(deleted)
    }
}
