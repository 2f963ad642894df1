use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::info;

use crate::db::dbrooms::{DbRooms, ROOM_TTL_SECS};
use crate::models::StoreError;

/// bcrypt work factor for room passwords.
const HASH_COST: u32 = 10;

pub const ROOM_CODE_LEN: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random 6-character upper-case alphanumeric room code.
pub fn generate_room_code() -> String {
    let mut buf = [0u8; ROOM_CODE_LEN];
    OsRng.fill_bytes(&mut buf);
    buf.iter()
        .map(|b| CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char)
        .collect()
}

/// Authoritative record of a room's existence: code, password hash,
/// creation time. Plaintext passwords never leave this module.
///
/// Backed by Postgres when a database is configured, otherwise by an
/// in-process cache with the same 24-hour record TTL.
pub enum RoomStore {
    Memory(MemoryRoomStore),
    Pg(Arc<DbRooms>),
}

impl RoomStore {
    pub fn in_memory() -> Self {
        info!("Room store running in-memory (24h record TTL)");
        RoomStore::Memory(MemoryRoomStore::new())
    }

    pub fn postgres(db: Arc<DbRooms>) -> Self {
        RoomStore::Pg(db)
    }

    /// Create a room with a freshly generated code, returning the code.
    /// Fails with [`StoreError::CodeCollision`] when the generated code is
    /// already taken; the caller retries with a fresh one.
    pub async fn create_room(&self, password: &str) -> Result<String, StoreError> {
        let code = generate_room_code();
        let hash = hash_password(password.to_string()).await?;
        match self {
            RoomStore::Memory(store) => store.insert(&code, hash)?,
            RoomStore::Pg(db) => {
                let _ = db.purge_expired().await;
                db.insert_room(&code, &hash).await.map_err(map_insert_err)?;
            }
        }
        Ok(code)
    }

    /// Verify a join attempt against the stored hash.
    pub async fn authenticate(&self, code: &str, password: &str) -> Result<(), StoreError> {
        let hash = match self {
            RoomStore::Memory(store) => store.hash_of(code)?,
            RoomStore::Pg(db) => db
                .find_room(code)
                .await?
                .map(|row| row.password_hash)
                .ok_or(StoreError::RoomNotFound)?,
        };
        verify_password(password.to_string(), hash).await
    }
}

fn map_insert_err(e: sqlx::Error) -> StoreError {
    if matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation()) {
        return StoreError::CodeCollision;
    }
    StoreError::Db(e)
}

// bcrypt at cost 10 takes tens of milliseconds; keep it off the async
// executor threads.
async fn hash_password(password: String) -> Result<String, StoreError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, HASH_COST))
        .await
        .map_err(|e| StoreError::Db(sqlx::Error::Protocol(e.to_string())))?
        .map_err(StoreError::Hash)
}

async fn verify_password(password: String, hash: String) -> Result<(), StoreError> {
    let ok = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| StoreError::Db(sqlx::Error::Protocol(e.to_string())))?
        .map_err(StoreError::Hash)?;
    if ok {
        Ok(())
    } else {
        Err(StoreError::BadPassword)
    }
}

#[derive(Clone)]
struct StoredRoom {
    password_hash: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

/// Room records held in-process, expiring like their persisted counterpart.
pub struct MemoryRoomStore {
    rooms: Cache<String, StoredRoom>,
}

impl MemoryRoomStore {
    fn new() -> Self {
        Self {
            rooms: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(Duration::from_secs(ROOM_TTL_SECS as u64))
                .build(),
        }
    }

    fn insert(&self, code: &str, password_hash: String) -> Result<(), StoreError> {
        if self.rooms.contains_key(code) {
            return Err(StoreError::CodeCollision);
        }
        self.rooms.insert(
            code.to_string(),
            StoredRoom {
                password_hash,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn hash_of(&self, code: &str) -> Result<String, StoreError> {
        self.rooms
            .get(code)
            .map(|r| r.password_hash)
            .ok_or(StoreError::RoomNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_codes_are_six_upper_alphanumerics() {
        for _ in 0..20 {
            let code = generate_room_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn create_then_authenticate_round_trip() {
        let store = RoomStore::in_memory();
        let code = store.create_room("hunter2").await.unwrap();
        store.authenticate(&code, "hunter2").await.unwrap();
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let store = RoomStore::in_memory();
        let code = store.create_room("secret").await.unwrap();
        assert!(matches!(
            store.authenticate(&code, "guess").await,
            Err(StoreError::BadPassword)
        ));
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let store = RoomStore::in_memory();
        assert!(matches!(
            store.authenticate("ZZZZZZ", "p").await,
            Err(StoreError::RoomNotFound)
        ));
    }

    #[tokio::test]
    async fn duplicate_code_collides() {
        let store = MemoryRoomStore::new();
        store.insert("ABC123", "h1".into()).unwrap();
        assert!(matches!(
            store.insert("ABC123", "h2".into()),
            Err(StoreError::CodeCollision)
        ));
    }
}
