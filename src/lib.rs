pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod pty;
pub mod routes;
pub mod services;
pub mod ws;

use std::sync::Arc;

use crate::pty::PtyRegistry;
use crate::services::room_store::RoomStore;
use crate::services::rooms::RoomRegistry;
use crate::ws::hub::Hub;

/// Process-wide state shared by every connection.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub rooms: RoomRegistry,
    pub store: RoomStore,
    pub ptys: Arc<PtyRegistry>,
}

impl AppState {
    /// Must be created inside the tokio runtime (shell respawn timers run
    /// on it).
    pub fn new(store: RoomStore) -> Arc<Self> {
        Arc::new(Self {
            hub: Arc::new(Hub::new()),
            rooms: RoomRegistry::new(),
            store,
            ptys: PtyRegistry::new(),
        })
    }
}
