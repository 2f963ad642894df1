use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Error as SqlxError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

/// Persisted room records expire after 24 hours.
pub const ROOM_TTL_SECS: i64 = 86_400;

// Global database instance
static DB: OnceCell<Arc<DbRooms>> = OnceCell::const_new();

/// Initialize the global database connection
pub async fn init_db(database_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = DbRooms::new(database_url).await?;
    DB.set(Arc::new(db))
        .map_err(|_| "Database already initialized")?;
    Ok(())
}

/// Get the global database instance
pub fn get_db() -> Option<Arc<DbRooms>> {
    DB.get().cloned()
}

/// Room row from the database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoomRow {
    pub room_code: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Database connection pool for the rooms table
pub struct DbRooms {
    pool: PgPool,
}

impl DbRooms {
    pub async fn new(database_url: &str) -> Result<Self, SqlxError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        info!("Rooms database ready");
        Ok(db)
    }

    async fn ensure_schema(&self) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                room_code     TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a new room. A duplicate code surfaces as the unique-violation
    /// database error; the caller maps it to a collision.
    pub async fn insert_room(&self, room_code: &str, password_hash: &str) -> Result<(), SqlxError> {
        sqlx::query("INSERT INTO rooms (room_code, password_hash) VALUES ($1, $2)")
            .bind(room_code)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Look up a room by code, ignoring expired records.
    pub async fn find_room(&self, room_code: &str) -> Result<Option<RoomRow>, SqlxError> {
        sqlx::query_as::<_, RoomRow>(
            "SELECT room_code, password_hash, created_at FROM rooms \
             WHERE room_code = $1 AND created_at > now() - make_interval(secs => $2)",
        )
        .bind(room_code)
        .bind(ROOM_TTL_SECS as f64)
        .fetch_optional(&self.pool)
        .await
    }

    /// Drop rooms past their TTL. Invoked opportunistically on creation.
    pub async fn purge_expired(&self) -> Result<u64, SqlxError> {
        let result =
            sqlx::query("DELETE FROM rooms WHERE created_at <= now() - make_interval(secs => $1)")
                .bind(ROOM_TTL_SECS as f64)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
