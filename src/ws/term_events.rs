use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::models::{
    ExecuteCommandPayload, FilePayload, RoomPayload, SaveAndRunPayload, ServerEvent,
    TerminalInputPayload, TerminalResizePayload,
};
use crate::services::run_dispatcher::command_for;
use crate::services::sync_arbiter::{SyncKind, SyncOrigin};
use crate::ws::connctx::ConnCtx;
use crate::ws::hub::ClientTx;
use crate::ws::session::{send_error, send_event};
use crate::AppState;

// Form feed; redraws the prompt like a local `clear`.
const CLEAR_SEQUENCE: &[u8] = b"\x0c";

fn in_room(ctx: &ConnCtx, room_code: &str) -> bool {
    ctx.room.as_deref() == Some(room_code)
}

/// Handle terminal-init. The shell is normally spawned at join; this is
/// the idempotent catch-up for clients that open the terminal tab late.
pub async fn terminal_init(state: &Arc<AppState>, ctx: &ConnCtx, tx: &ClientTx, p: RoomPayload) {
    if !in_room(ctx, &p.room_code) {
        send_error(tx, "Not a member of this room");
        return;
    }
    let Some(room) = state.rooms.get(&p.room_code).await else {
        send_error(tx, "Room is not active");
        return;
    };
    if let Err(e) = state.ptys.spawn_shell(
        &ctx.user_id,
        &p.room_code,
        room.workdir.root(),
        tx.clone(),
        Arc::clone(&state.hub),
    ) {
        error!("terminal-init failed for {}: {e}", ctx.user_id);
        send_error(tx, "Failed to start terminal");
    }
}

pub async fn terminal_input(
    state: &Arc<AppState>,
    ctx: &ConnCtx,
    _tx: &ClientTx,
    p: TerminalInputPayload,
) {
    if !in_room(ctx, &p.room_code) {
        return;
    }
    // Keystrokes racing a dead shell are dropped; the respawn banner has
    // already told the user.
    if let Err(e) = state.ptys.write_input(&ctx.user_id, p.input.as_bytes()) {
        debug!("Dropped terminal input for {}: {e}", ctx.user_id);
    }
}

pub async fn terminal_resize(
    state: &Arc<AppState>,
    ctx: &ConnCtx,
    _tx: &ClientTx,
    p: TerminalResizePayload,
) {
    if !in_room(ctx, &p.room_code) {
        return;
    }
    state.ptys.resize(&ctx.user_id, p.cols, p.rows);
}

pub async fn execute_command(
    state: &Arc<AppState>,
    ctx: &ConnCtx,
    tx: &ClientTx,
    p: ExecuteCommandPayload,
) {
    if !in_room(ctx, &p.room_code) {
        send_error(tx, "Not a member of this room");
        return;
    }
    if let Err(e) = state.ptys.execute_command(&ctx.user_id, &p.command) {
        debug!("execute-command failed for {}: {e}", ctx.user_id);
    }
}

pub async fn clear_terminal(state: &Arc<AppState>, ctx: &ConnCtx, _tx: &ClientTx, p: RoomPayload) {
    if !in_room(ctx, &p.room_code) {
        return;
    }
    let _ = state.ptys.write_input(&ctx.user_id, CLEAR_SEQUENCE);
}

/// Handle kill-process: ETX to this user's shell only; the foreground
/// process group gets SIGINT, nobody else's terminal is touched.
pub async fn kill_process(state: &Arc<AppState>, ctx: &ConnCtx, _tx: &ClientTx, p: RoomPayload) {
    if !in_room(ctx, &p.room_code) {
        return;
    }
    if let Err(e) = state.ptys.send_interrupt(&ctx.user_id) {
        debug!("kill-process failed for {}: {e}", ctx.user_id);
    }
}

pub async fn run_file(state: &Arc<AppState>, ctx: &ConnCtx, tx: &ClientTx, p: FilePayload) {
    flush_and_run(state, ctx, tx, &p.room_code, Some(p.file_name)).await;
}

pub async fn save_and_run(state: &Arc<AppState>, ctx: &ConnCtx, tx: &ClientTx, p: SaveAndRunPayload) {
    flush_and_run(state, ctx, tx, &p.room_code, p.file_name).await;
}

/// Flush the file's in-memory content to disk, then type the run command
/// into the user's shell. Without an explicit file the user's active file
/// runs.
async fn flush_and_run(
    state: &Arc<AppState>,
    ctx: &ConnCtx,
    tx: &ClientTx,
    room_code: &str,
    file_name: Option<String>,
) {
    if !in_room(ctx, room_code) {
        send_error(tx, "Not a member of this room");
        return;
    }
    let Some(room) = state.rooms.get(room_code).await else {
        send_error(tx, "Room is not active");
        return;
    };

    let resolved = {
        let tree = room.tree.lock().await;
        let path = file_name.or_else(|| tree.active_of(&ctx.user_id).map(str::to_string));
        match path {
            Some(path) => tree
                .content_of(&path)
                .map(|content| (path.clone(), content.to_string()))
                .map_err(|e| e.to_string()),
            None => Err("No file selected to run".to_string()),
        }
    };
    let (path, content) = match resolved {
        Ok(found) => found,
        Err(message) => {
            send_error(tx, message);
            return;
        }
    };

    // The shell must see the latest editor state before the command runs.
    if room
        .arbiter
        .begin(SyncOrigin::Editor, SyncKind::File, room_code, &path)
    {
        if let Err(e) = room.workdir.write_file(&path, &content) {
            warn!("Failed to flush {path} before run in room {room_code}: {e}");
        }
    }

    match command_for(&path) {
        Some(command) => {
            if let Err(e) = state.ptys.execute_command(&ctx.user_id, &command) {
                error!("Failed to run {path} for {}: {e}", ctx.user_id);
                send_error(tx, "Terminal is not available");
            }
        }
        None => {
            send_event(
                tx,
                &ServerEvent::TerminalOutput(format!(
                    "\r\n\x1b[31mNo run command for file type: {path}\x1b[0m\r\n"
                )),
            );
        }
    }
}
