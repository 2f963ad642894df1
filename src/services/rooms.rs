use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::models::{FileNode, ItemKind, ServerEvent};
use crate::services::file_tree::{DiskEffect, DiskUpsert, FileTree};
use crate::services::sync_arbiter::{SyncArbiter, SyncKind, SyncOrigin};
use crate::services::watcher::{watch_room, WatchEvent, WatcherHandle};
use crate::services::workdir::WorkDir;
use crate::ws::hub::Hub;

/// The live, in-memory half of one room: tree, disk mirror, loop arbiter
/// and filesystem watcher. Exists only while the room has members.
pub struct RoomState {
    pub code: String,
    pub tree: Mutex<FileTree>,
    pub workdir: WorkDir,
    pub arbiter: SyncArbiter,
    watcher: std::sync::Mutex<Option<WatcherHandle>>,
}

impl RoomState {
    /// Apply one side effect of a tree mutation to the working directory,
    /// gated by the sync arbiter. Returns false when the opposite side
    /// holds the write and the effect was dropped.
    pub fn apply_effect(
        &self,
        effect: &DiskEffect,
        origin: SyncOrigin,
        kind: SyncKind,
    ) -> io::Result<bool> {
        let token_paths: Vec<&str> = match effect {
            DiskEffect::WriteFile { path, .. }
            | DiskEffect::CreateDir { path }
            | DiskEffect::Remove { path } => vec![path.as_str()],
            DiskEffect::Rename { from, to } => vec![from.as_str(), to.as_str()],
        };
        for path in token_paths {
            if !self.arbiter.begin(origin, kind, &self.code, path) {
                return Ok(false);
            }
        }
        self.workdir.apply(effect)
    }
}

pub fn sync_kind_of(kind: ItemKind) -> SyncKind {
    match kind {
        ItemKind::File => SyncKind::File,
        ItemKind::Folder => SyncKind::Folder,
    }
}

/// Registry of materialized rooms. A room materializes on first membership
/// (fresh tree with the default file, scratch directory, watcher) and is
/// torn down when the last member leaves.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<RoomState>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, code: &str) -> Option<Arc<RoomState>> {
        self.rooms.read().await.get(code).cloned()
    }

    pub async fn get_or_materialize(
        &self,
        code: &str,
        hub: &Arc<Hub>,
    ) -> io::Result<Arc<RoomState>> {
        if let Some(room) = self.get(code).await {
            return Ok(room);
        }

        // Build the room without holding the registry lock; the directory
        // setup is blocking filesystem work and stays off the executor
        // threads.
        let workdir = WorkDir::for_room(code);
        let tree = {
            let workdir = workdir.clone();
            tokio::task::spawn_blocking(move || -> io::Result<FileTree> {
                workdir.create()?;
                let tree = FileTree::with_default_file();
                for (path, node) in tree.snapshot() {
                    if let FileNode::File { content, .. } = node {
                        workdir.write_file(&path, &content)?;
                    }
                }
                Ok(tree)
            })
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))??
        };

        let room = Arc::new(RoomState {
            code: code.to_string(),
            tree: Mutex::new(tree),
            workdir: workdir.clone(),
            arbiter: SyncArbiter::new(),
            watcher: std::sync::Mutex::new(None),
        });

        let (handle, rx) = watch_room(code, workdir.root().to_path_buf())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        *room.watcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        tokio::spawn(apply_watch_events(Arc::clone(&room), Arc::clone(hub), rx));

        // The lock is held only for the insert. On a lost race the winner
        // owns the shared directory; our watcher stops and theirs stands.
        let existing = {
            let mut rooms = self.rooms.write().await;
            match rooms.get(code) {
                Some(existing) => Some(existing.clone()),
                None => {
                    rooms.insert(code.to_string(), Arc::clone(&room));
                    None
                }
            }
        };
        if let Some(existing) = existing {
            if let Some(handle) = room
                .watcher
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
            {
                handle.stop();
            }
            return Ok(existing);
        }

        info!("Room {code} materialized at {:?}", room.workdir.root());
        Ok(room)
    }

    /// Destroy a room's in-memory state: stop the watcher and remove the
    /// working directory. The persisted room record is untouched; a later
    /// join re-hydrates with defaults.
    pub async fn teardown(&self, code: &str) {
        let removed = self.rooms.write().await.remove(code);
        if let Some(room) = removed {
            if let Some(handle) = room
                .watcher
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
            {
                handle.stop();
            }
            room.workdir.cleanup();
            info!("Room {code} torn down");
        }
    }
}

/// Consume stabilized filesystem events for one room and reconcile them
/// into the tree, with `terminal` origin at the arbiter. Ends when the
/// watcher channel closes at teardown; late events are simply dropped with
/// the channel.
async fn apply_watch_events(
    room: Arc<RoomState>,
    hub: Arc<Hub>,
    mut rx: UnboundedReceiver<WatchEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            WatchEvent::FileAdded(path) | WatchEvent::FileChanged(path) => {
                if !room
                    .arbiter
                    .begin(SyncOrigin::Terminal, SyncKind::File, &room.code, &path)
                {
                    continue;
                }
                let content = match room.workdir.read_file(&path) {
                    Ok(content) => content,
                    Err(e) => {
                        debug!("Skipping unreadable {path} in room {}: {e}", room.code);
                        continue;
                    }
                };
                let (result, snapshot) = {
                    let mut tree = room.tree.lock().await;
                    let result = tree.upsert_from_disk(&path, content.clone());
                    (result, tree.snapshot())
                };
                if result != DiskUpsert::Unchanged {
                    hub.broadcast(&room.code, &ServerEvent::FilesUpdate(snapshot))
                        .await;
                    hub.broadcast(
                        &room.code,
                        &ServerEvent::FileSynced {
                            file_name: path,
                            content,
                        },
                    )
                    .await;
                }
            }
            WatchEvent::DirAdded(path) => {
                if !room
                    .arbiter
                    .begin(SyncOrigin::Terminal, SyncKind::Folder, &room.code, &path)
                {
                    continue;
                }
                let (created, snapshot) = {
                    let mut tree = room.tree.lock().await;
                    let created = tree.insert_folder_from_disk(&path);
                    (created, tree.snapshot())
                };
                if created {
                    hub.broadcast(&room.code, &ServerEvent::FilesUpdate(snapshot))
                        .await;
                    hub.broadcast(
                        &room.code,
                        &ServerEvent::FolderCreated { folder_path: path },
                    )
                    .await;
                }
            }
            WatchEvent::Removed(path) => {
                handle_disk_removal(&room, &hub, path).await;
            }
        }
    }
    debug!("Watch consumer for room {} ended", room.code);
}

async fn handle_disk_removal(room: &Arc<RoomState>, hub: &Arc<Hub>, path: String) {
    let kind = {
        let tree = room.tree.lock().await;
        tree.kind_of(&path)
    };
    let Some(kind) = kind else {
        return;
    };
    if !room
        .arbiter
        .begin(SyncOrigin::Terminal, sync_kind_of(kind), &room.code, &path)
    {
        return;
    }

    let deleted = {
        let mut tree = room.tree.lock().await;
        match tree.delete_item(&path) {
            Ok((outcome, kind)) => Ok((outcome.active_changes, kind, tree.snapshot())),
            Err(e) => Err(e),
        }
    };

    match deleted {
        Ok((active_changes, kind, snapshot)) => {
            hub.broadcast(&room.code, &ServerEvent::FilesUpdate(snapshot))
                .await;
            hub.broadcast(
                &room.code,
                &ServerEvent::ItemDeleted {
                    item_path: path,
                    kind,
                },
            )
            .await;
            for (user, file_name) in active_changes {
                hub.send_to(
                    &room.code,
                    &user,
                    &ServerEvent::ActiveFileChanged { file_name },
                )
                .await;
            }
        }
        Err(e) => {
            // The shell deleted the room's only file; the tree stays
            // authoritative, so put the bytes back on disk.
            warn!("Ignoring disk removal of {path} in room {}: {e}", room.code);
            let restore = {
                let tree = room.tree.lock().await;
                tree.content_of(&path).ok().map(str::to_string)
            };
            if let Some(content) = restore {
                if let Err(e) = room.workdir.write_file(&path, &content) {
                    error!("Failed to restore {path} in room {}: {e}", room.code);
                }
            }
        }
    }
}
