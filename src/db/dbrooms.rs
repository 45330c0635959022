use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Error as SqlxError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use crate::services::room_service::{RoomRecord, RoomStore, StoreError, StoreFuture, DEFAULT_CODE};

/// Connect to the database and make sure the schema exists
///
/// # Arguments
/// * `database_url` - PostgreSQL connection string
pub async fn init_db(database_url: &str) -> Result<Arc<DbRooms>, StoreError> {
    let db = DbRooms::new(database_url).await?;
    db.ensure_schema().await?;
    Ok(Arc::new(db))
}

/// Room Row from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoomRow {
    pub id: String,
    pub code: Option<String>,
    pub language: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RoomRow> for RoomRecord {
    fn from(row: RoomRow) -> Self {
        RoomRecord {
            id: row.id,
            code: row.code.unwrap_or_else(|| DEFAULT_CODE.to_string()),
            language: row.language.unwrap_or_else(|| "python".to_string()),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Database connection pool
pub struct DbRooms {
    pool: PgPool,
}

impl DbRooms {
    /// Create a new database connection pool
    pub async fn new(database_url: &str) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Create the rooms table if it is missing
    pub async fn ensure_schema(&self) -> Result<(), SqlxError> {
        let query_sql = r#"
            CREATE TABLE IF NOT EXISTS rooms (
                id VARCHAR(36) PRIMARY KEY,
                code TEXT,
                language VARCHAR(50),
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
        "#;
        sqlx::query(query_sql).execute(&self.pool).await?;
        info!("Rooms table ready");
        Ok(())
    }

    fn log_pool_state(&self, action: &str, room_id: &str) {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        info!(
            "{} room {}. Pool connections: {} idle, {} in use",
            action,
            room_id,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );
    }

    /// Get a room by id
    ///
    /// # Returns
    /// * `Result<Option<RoomRow>, SqlxError>` - The room if found
    pub async fn get_room(&self, room_id: &str) -> Result<Option<RoomRow>, SqlxError> {
        self.log_pool_state("Loading", room_id);

        let query_sql = r#"
            SELECT id, code, language, created_at, updated_at
            FROM rooms
            WHERE id = $1;
        "#;
        sqlx::query_as::<_, RoomRow>(query_sql)
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Insert a room holding the default code
    ///
    /// An existing row with the same id is left untouched and returned instead,
    /// so two sessions racing to create the same room both succeed.
    pub async fn insert_room(&self, room_id: &str, language: &str) -> Result<RoomRow, SqlxError> {
        self.log_pool_state("Creating", room_id);

        // Begin a transaction
        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(
                    "Failed to acquire connection from pool for room {}: {}. Pool state: {} idle, {} total",
                    room_id,
                    e,
                    self.pool.num_idle(),
                    self.pool.size()
                );
                return Err(e);
            }
        };

        let insert_sql = r#"
            INSERT INTO rooms(id, code, language)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING;
        "#;
        sqlx::query(insert_sql)
            .bind(room_id)
            .bind(DEFAULT_CODE)
            .bind(language)
            .execute(&mut *tx)
            .await?;

        let select_sql = r#"
            SELECT id, code, language, created_at, updated_at
            FROM rooms
            WHERE id = $1;
        "#;
        let row = sqlx::query_as::<_, RoomRow>(select_sql)
            .bind(room_id)
            .fetch_one(&mut *tx)
            .await?;

        // Commit the transaction
        tx.commit().await?;

        info!("Room saved: {}", row.id);
        Ok(row)
    }

    /// Update the code of a room
    ///
    /// # Returns
    /// * `Result<bool, SqlxError>` - Whether a row was updated
    pub async fn update_room_code(&self, room_id: &str, code: &str) -> Result<bool, SqlxError> {
        self.log_pool_state("Updating", room_id);

        let query_sql = r#"
            UPDATE rooms
            SET code = $2, updated_at = now()
            WHERE id = $1;
        "#;
        let result = sqlx::query(query_sql)
            .bind(room_id)
            .bind(code)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl DbRooms {
    async fn fetch_record(&self, room_id: &str) -> Result<Option<RoomRecord>, StoreError> {
        Ok(self.get_room(room_id).await?.map(RoomRecord::from))
    }

    async fn create_record(&self, room_id: Option<&str>, language: &str) -> Result<RoomRecord, StoreError> {
        let id = room_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Ok(self.insert_room(&id, language).await?.into())
    }

    async fn write_text(&self, room_id: &str, text: &str) -> Result<(), StoreError> {
        if self.update_room_code(room_id, text).await? {
            info!("Room {} code updated", room_id);
            Ok(())
        } else {
            Err(StoreError::NotFound(room_id.to_string()))
        }
    }
}

impl RoomStore for DbRooms {
    fn fetch_room<'a>(&'a self, room_id: &'a str) -> StoreFuture<'a, Option<RoomRecord>> {
        Box::pin(self.fetch_record(room_id))
    }

    fn create_room<'a>(&'a self, room_id: Option<&'a str>, language: &'a str) -> StoreFuture<'a, RoomRecord> {
        Box::pin(self.create_record(room_id, language))
    }

    fn write_room_text<'a>(&'a self, room_id: &'a str, text: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(self.write_text(room_id, text))
    }
}
