use std::sync::Arc;

use tracing::{error, info, warn};

use crate::models::{
    CodeChangePayload, CreateFilePayload, CreateFolderPayload, CreateRoomAck, CreateRoomPayload,
    DeleteItemPayload, FileContentAck, FilePayload, FilesAck, JoinRoomAck, JoinRoomPayload,
    MoveItemPayload, RenameItemPayload, RoomPayload, ServerEvent, StoreError, ToggleFolderPayload,
    WorkingDirectoryAck,
};
use crate::services::file_tree::{MutationOutcome, DEFAULT_FILE};
use crate::services::rooms::{sync_kind_of, RoomState};
use crate::services::sync_arbiter::{SyncKind, SyncOrigin};
use crate::ws::connctx::ConnCtx;
use crate::ws::hub::{ClientTx, Member};
use crate::ws::session::{send_ack, send_error, send_event};
use crate::AppState;

/// Attempts at drawing an unused room code before giving up.
const CREATE_ROOM_ATTEMPTS: u32 = 5;

/// Handle create-room: allocate a code, persist the hashed password,
/// materialize the room and make the creator its first member.
pub async fn create_room(
    state: &Arc<AppState>,
    ctx: &mut ConnCtx,
    tx: &ClientTx,
    p: CreateRoomPayload,
    ack: Option<u64>,
) {
    let mut code = None;
    for _ in 0..CREATE_ROOM_ATTEMPTS {
        match state.store.create_room(&p.password).await {
            Ok(c) => {
                code = Some(c);
                break;
            }
            Err(StoreError::CodeCollision) => continue,
            Err(e) => {
                error!("Room creation failed: {e}");
                break;
            }
        }
    }
    let Some(code) = code else {
        send_ack(
            tx,
            ack,
            &CreateRoomAck {
                success: false,
                room_code: None,
                error: Some("Failed to create room".to_string()),
            },
        );
        return;
    };

    ctx.username = p.username;
    if enter_room(state, ctx, tx, &code).await.is_none() {
        send_ack(
            tx,
            ack,
            &CreateRoomAck {
                success: false,
                room_code: None,
                error: Some("Failed to initialize room".to_string()),
            },
        );
        return;
    }

    info!("User {} created room {code}", ctx.username);
    send_ack(
        tx,
        ack,
        &CreateRoomAck {
            success: true,
            room_code: Some(code.clone()),
            error: None,
        },
    );
    send_event(tx, &ServerEvent::RoomCreated { room_code: code });
}

/// Handle join-room: verify the password, add the member, hand back the
/// current tree. A persisted room without live state re-hydrates with the
/// default file.
pub async fn join_room(
    state: &Arc<AppState>,
    ctx: &mut ConnCtx,
    tx: &ClientTx,
    p: JoinRoomPayload,
    ack: Option<u64>,
) {
    if let Err(e) = state.store.authenticate(&p.room_code, &p.password).await {
        let message = match &e {
            StoreError::RoomNotFound | StoreError::BadPassword => e.to_string(),
            other => {
                error!("Join authentication failed for {}: {other}", p.room_code);
                "Failed to join room".to_string()
            }
        };
        send_ack(
            tx,
            ack,
            &JoinRoomAck {
                success: false,
                files: None,
                active_file: None,
                error: Some(message),
            },
        );
        return;
    }

    ctx.username = p.username;
    let Some(room) = enter_room(state, ctx, tx, &p.room_code).await else {
        send_ack(
            tx,
            ack,
            &JoinRoomAck {
                success: false,
                files: None,
                active_file: None,
                error: Some("Failed to initialize room".to_string()),
            },
        );
        return;
    };

    let (files, active_file) = {
        let mut tree = room.tree.lock().await;
        let active = tree.first_file();
        if let Some(path) = &active {
            let _ = tree.set_active(&ctx.user_id, path);
        }
        (tree.snapshot(), active)
    };

    info!("User {} joined room {}", ctx.username, p.room_code);
    send_ack(
        tx,
        ack,
        &JoinRoomAck {
            success: true,
            files: Some(files),
            active_file,
            error: None,
        },
    );
    state
        .hub
        .broadcast_except(
            &p.room_code,
            &ctx.user_id,
            &ServerEvent::UserJoined {
                username: ctx.username.clone(),
                user_id: ctx.user_id.clone(),
            },
        )
        .await;
}

/// Shared tail of create-room and join-room: materialize, register with
/// the hub, point the active file at the default, spawn the shell.
async fn enter_room(
    state: &Arc<AppState>,
    ctx: &mut ConnCtx,
    tx: &ClientTx,
    code: &str,
) -> Option<Arc<RoomState>> {
    let room = match state.rooms.get_or_materialize(code, &state.hub).await {
        Ok(room) => room,
        Err(e) => {
            error!("Failed to materialize room {code}: {e}");
            return None;
        }
    };

    state
        .hub
        .join(
            code,
            Member {
                user_id: ctx.user_id.clone(),
                username: ctx.username.clone(),
                tx: tx.clone(),
            },
        )
        .await;
    ctx.room = Some(code.to_string());

    {
        let mut tree = room.tree.lock().await;
        if tree.active_of(&ctx.user_id).is_none() {
            let _ = tree.set_active(&ctx.user_id, DEFAULT_FILE);
        }
    }

    if let Err(e) = state.ptys.spawn_shell(
        &ctx.user_id,
        code,
        room.workdir.root(),
        tx.clone(),
        Arc::clone(&state.hub),
    ) {
        warn!("Failed to spawn shell for {} in {code}: {e}", ctx.user_id);
    }
    Some(room)
}

/// Resolve the room for a mutation event; the connection must have joined
/// it and it must still be materialized.
async fn room_of(
    state: &Arc<AppState>,
    ctx: &ConnCtx,
    tx: &ClientTx,
    room_code: &str,
) -> Option<Arc<RoomState>> {
    if ctx.room.as_deref() != Some(room_code) {
        send_error(tx, "Not a member of this room");
        return None;
    }
    let room = state.rooms.get(room_code).await;
    if room.is_none() {
        send_error(tx, "Room is not active");
    }
    room
}

/// Apply a mutation's disk side effects through the arbiter with editor
/// origin. A false return means the filesystem disagreed (not that the
/// arbiter suppressed the write).
fn apply_editor_effects(room: &RoomState, outcome: &MutationOutcome, kind: SyncKind) -> bool {
    let mut ok = true;
    for effect in &outcome.effects {
        if let Err(e) = room.apply_effect(effect, SyncOrigin::Editor, kind) {
            // For writes the tree stays authoritative and a later mutation
            // retries; callers that need rollback (rename) check the flag.
            error!("Disk side effect failed in room {}: {e}", room.code);
            ok = false;
        }
    }
    ok
}

async fn notify_active_changes(state: &Arc<AppState>, room_code: &str, outcome: &MutationOutcome) {
    for (user, file_name) in &outcome.active_changes {
        state
            .hub
            .send_to(
                room_code,
                user,
                &ServerEvent::ActiveFileChanged {
                    file_name: file_name.clone(),
                },
            )
            .await;
    }
}

pub async fn get_files(
    state: &Arc<AppState>,
    ctx: &ConnCtx,
    tx: &ClientTx,
    p: RoomPayload,
    ack: Option<u64>,
) {
    let Some(room) = room_of(state, ctx, tx, &p.room_code).await else {
        return;
    };
    let files = room.tree.lock().await.snapshot();
    send_ack(tx, ack, &FilesAck { files });
}

pub async fn get_file_content(
    state: &Arc<AppState>,
    ctx: &ConnCtx,
    tx: &ClientTx,
    p: FilePayload,
    ack: Option<u64>,
) {
    let Some(room) = room_of(state, ctx, tx, &p.room_code).await else {
        return;
    };
    let content = {
        let tree = room.tree.lock().await;
        tree.content_of(&p.file_name).map(str::to_string)
    };
    match content {
        Ok(content) => send_ack(tx, ack, &FileContentAck { content }),
        Err(e) => send_error(tx, e.to_string()),
    }
}

pub async fn get_working_directory(
    state: &Arc<AppState>,
    ctx: &ConnCtx,
    tx: &ClientTx,
    p: RoomPayload,
    ack: Option<u64>,
) {
    let Some(room) = room_of(state, ctx, tx, &p.room_code).await else {
        return;
    };
    send_ack(
        tx,
        ack,
        &WorkingDirectoryAck {
            working_directory: room.workdir.root().display().to_string(),
        },
    );
}

/// Handle switch-file: move the user's active file and hand back its
/// content. Replies go to the switching user only.
pub async fn switch_file(state: &Arc<AppState>, ctx: &ConnCtx, tx: &ClientTx, p: FilePayload) {
    let Some(room) = room_of(state, ctx, tx, &p.room_code).await else {
        return;
    };
    let content = {
        let mut tree = room.tree.lock().await;
        match tree.set_active(&ctx.user_id, &p.file_name) {
            Ok(()) => tree.content_of(&p.file_name).map(str::to_string),
            Err(e) => Err(e),
        }
    };
    match content {
        Ok(content) => {
            send_event(
                tx,
                &ServerEvent::ActiveFileChanged {
                    file_name: p.file_name.clone(),
                },
            );
            send_event(
                tx,
                &ServerEvent::FileContentUpdate {
                    file_name: p.file_name,
                    content,
                },
            );
        }
        Err(e) => send_error(tx, e.to_string()),
    }
}

/// Handle code-change: the tree takes the new content unconditionally, the
/// disk write goes through the arbiter, peers get the update.
pub async fn code_change(state: &Arc<AppState>, ctx: &ConnCtx, tx: &ClientTx, p: CodeChangePayload) {
    let Some(room) = room_of(state, ctx, tx, &p.room_code).await else {
        return;
    };
    let outcome = {
        let mut tree = room.tree.lock().await;
        tree.set_file_content(&p.file_name, p.code.clone())
    };
    match outcome {
        Ok(outcome) => {
            apply_editor_effects(&room, &outcome, SyncKind::File);
            state
                .hub
                .broadcast_except(
                    &p.room_code,
                    &ctx.user_id,
                    &ServerEvent::FileContentUpdate {
                        file_name: p.file_name,
                        content: p.code,
                    },
                )
                .await;
        }
        Err(e) => send_error(tx, e.to_string()),
    }
}

/// Join an optional parent folder onto a leaf name.
fn joined_path(parent: Option<String>, leaf: &str) -> String {
    match parent {
        Some(folder) if !folder.is_empty() => format!("{folder}/{leaf}"),
        _ => leaf.to_string(),
    }
}

pub async fn create_file(state: &Arc<AppState>, ctx: &ConnCtx, tx: &ClientTx, p: CreateFilePayload) {
    let Some(room) = room_of(state, ctx, tx, &p.room_code).await else {
        return;
    };
    let path = joined_path(p.parent_folder, &p.file_name);
    let result = {
        let mut tree = room.tree.lock().await;
        match tree.create_file(&path, None) {
            Ok(outcome) => Ok((outcome, tree.snapshot())),
            Err(e) => Err(e),
        }
    };
    match result {
        Ok((outcome, snapshot)) => {
            apply_editor_effects(&room, &outcome, SyncKind::File);
            state
                .hub
                .broadcast(&p.room_code, &ServerEvent::FilesUpdate(snapshot))
                .await;
            state
                .hub
                .broadcast(&p.room_code, &ServerEvent::FileCreated { file_name: path })
                .await;
        }
        Err(e) => send_error(tx, e.to_string()),
    }
}

pub async fn create_folder(
    state: &Arc<AppState>,
    ctx: &ConnCtx,
    tx: &ClientTx,
    p: CreateFolderPayload,
) {
    let Some(room) = room_of(state, ctx, tx, &p.room_code).await else {
        return;
    };
    let path = joined_path(p.parent_folder, &p.folder_name);
    let result = {
        let mut tree = room.tree.lock().await;
        match tree.create_folder(&path) {
            Ok(outcome) => Ok((outcome, tree.snapshot())),
            Err(e) => Err(e),
        }
    };
    match result {
        Ok((outcome, snapshot)) => {
            apply_editor_effects(&room, &outcome, SyncKind::Folder);
            state
                .hub
                .broadcast(&p.room_code, &ServerEvent::FilesUpdate(snapshot))
                .await;
            state
                .hub
                .broadcast(
                    &p.room_code,
                    &ServerEvent::FolderCreated { folder_path: path },
                )
                .await;
        }
        Err(e) => send_error(tx, e.to_string()),
    }
}

pub async fn delete_item(state: &Arc<AppState>, ctx: &ConnCtx, tx: &ClientTx, p: DeleteItemPayload) {
    let Some(room) = room_of(state, ctx, tx, &p.room_code).await else {
        return;
    };
    let result = {
        let mut tree = room.tree.lock().await;
        match tree.delete_item(&p.item_path) {
            Ok((outcome, kind)) => Ok((outcome, kind, tree.snapshot())),
            Err(e) => Err(e),
        }
    };
    match result {
        Ok((outcome, kind, snapshot)) => {
            apply_editor_effects(&room, &outcome, sync_kind_of(kind));
            state
                .hub
                .broadcast(&p.room_code, &ServerEvent::FilesUpdate(snapshot))
                .await;
            state
                .hub
                .broadcast(
                    &p.room_code,
                    &ServerEvent::ItemDeleted {
                        item_path: p.item_path,
                        kind,
                    },
                )
                .await;
            notify_active_changes(state, &p.room_code, &outcome).await;
        }
        Err(e) => send_error(tx, e.to_string()),
    }
}

pub async fn rename_item(state: &Arc<AppState>, ctx: &ConnCtx, tx: &ClientTx, p: RenameItemPayload) {
    let Some(room) = room_of(state, ctx, tx, &p.room_code).await else {
        return;
    };
    let result = {
        let mut tree = room.tree.lock().await;
        match tree.rename_item(&p.old_path, &p.new_path) {
            Ok((outcome, kind)) => Ok((outcome, kind, tree.snapshot())),
            Err(e) => Err(e),
        }
    };
    match result {
        Ok((outcome, kind, snapshot)) => {
            if !apply_editor_effects(&room, &outcome, sync_kind_of(kind)) {
                // Disk refused the rename: undo the logical operation.
                let mut tree = room.tree.lock().await;
                let _ = tree.rename_item(&p.new_path, &p.old_path);
                send_error(tx, format!("Failed to rename '{}'", p.old_path));
                return;
            }
            state
                .hub
                .broadcast(&p.room_code, &ServerEvent::FilesUpdate(snapshot))
                .await;
            state
                .hub
                .broadcast(
                    &p.room_code,
                    &ServerEvent::ItemRenamed {
                        old_path: p.old_path,
                        new_path: p.new_path,
                        kind,
                    },
                )
                .await;
            notify_active_changes(state, &p.room_code, &outcome).await;
        }
        Err(e) => send_error(tx, e.to_string()),
    }
}

pub async fn move_item(state: &Arc<AppState>, ctx: &ConnCtx, tx: &ClientTx, p: MoveItemPayload) {
    let Some(room) = room_of(state, ctx, tx, &p.room_code).await else {
        return;
    };
    let result = {
        let mut tree = room.tree.lock().await;
        match tree.move_item(&p.source_path, &p.target_path, p.item_type) {
            Ok((outcome, kind)) => Ok((outcome, kind, tree.snapshot())),
            Err(e) => Err(e),
        }
    };
    match result {
        Ok((outcome, kind, snapshot)) => {
            if !apply_editor_effects(&room, &outcome, sync_kind_of(kind)) {
                let mut tree = room.tree.lock().await;
                let _ = tree.rename_item(&p.target_path, &p.source_path);
                send_error(tx, format!("Failed to move '{}'", p.source_path));
                return;
            }
            state
                .hub
                .broadcast(&p.room_code, &ServerEvent::FilesUpdate(snapshot))
                .await;
            state
                .hub
                .broadcast(
                    &p.room_code,
                    &ServerEvent::ItemMoved {
                        source_path: p.source_path,
                        target_path: p.target_path,
                        item_type: kind,
                    },
                )
                .await;
            notify_active_changes(state, &p.room_code, &outcome).await;
        }
        Err(e) => send_error(tx, e.to_string()),
    }
}

pub async fn toggle_folder(
    state: &Arc<AppState>,
    ctx: &ConnCtx,
    tx: &ClientTx,
    p: ToggleFolderPayload,
) {
    let Some(room) = room_of(state, ctx, tx, &p.room_code).await else {
        return;
    };
    let result = {
        let mut tree = room.tree.lock().await;
        tree.toggle_folder(&p.folder_path)
    };
    match result {
        Ok(is_expanded) => {
            state
                .hub
                .broadcast(
                    &p.room_code,
                    &ServerEvent::FolderToggled {
                        folder_path: p.folder_path,
                        is_expanded,
                    },
                )
                .await;
        }
        Err(e) => send_error(tx, e.to_string()),
    }
}
