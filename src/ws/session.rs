use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, info, warn};

use crate::models::{AckFrame, ClientEvent, ClientFrame, ServerEvent};
use crate::ws::connctx::ConnCtx;
use crate::ws::hub::ClientTx;
use crate::ws::{room_events, term_events};
use crate::AppState;

/// WebSocket upgrade handler for the event channel
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one client connection: a writer task drains the outbound queue
/// (per-client ordering comes from this single consumer), the read loop
/// dispatches inbound events in arrival order.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut ctx = ConnCtx::new();
    info!("Connection {} opened", ctx.conn_id);

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => dispatch(&state, &mut ctx, &tx, frame).await,
                Err(e) => {
                    debug!("Malformed frame from {}: {e}", ctx.conn_id);
                    send_error(&tx, format!("Malformed event: {e}"));
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    disconnect(&state, &ctx).await;
    writer.abort();
    info!("Connection {} closed", ctx.conn_id);
}

async fn dispatch(state: &Arc<AppState>, ctx: &mut ConnCtx, tx: &ClientTx, frame: ClientFrame) {
    let ack = frame.ack;
    match frame.event {
        ClientEvent::CreateRoom(p) => room_events::create_room(state, ctx, tx, p, ack).await,
        ClientEvent::JoinRoom(p) => room_events::join_room(state, ctx, tx, p, ack).await,
        ClientEvent::GetFiles(p) => room_events::get_files(state, ctx, tx, p, ack).await,
        ClientEvent::GetFileContent(p) => {
            room_events::get_file_content(state, ctx, tx, p, ack).await
        }
        ClientEvent::SwitchFile(p) => room_events::switch_file(state, ctx, tx, p).await,
        ClientEvent::CodeChange(p) => room_events::code_change(state, ctx, tx, p).await,
        ClientEvent::CreateFile(p) => room_events::create_file(state, ctx, tx, p).await,
        ClientEvent::CreateFolder(p) => room_events::create_folder(state, ctx, tx, p).await,
        ClientEvent::DeleteItem(p) => room_events::delete_item(state, ctx, tx, p).await,
        ClientEvent::RenameItem(p) => room_events::rename_item(state, ctx, tx, p).await,
        ClientEvent::MoveItem(p) => room_events::move_item(state, ctx, tx, p).await,
        ClientEvent::ToggleFolder(p) => room_events::toggle_folder(state, ctx, tx, p).await,
        ClientEvent::GetWorkingDirectory(p) => {
            room_events::get_working_directory(state, ctx, tx, p, ack).await
        }
        ClientEvent::TerminalInit(p) => term_events::terminal_init(state, ctx, tx, p).await,
        ClientEvent::TerminalInput(p) => term_events::terminal_input(state, ctx, tx, p).await,
        ClientEvent::TerminalResize(p) => term_events::terminal_resize(state, ctx, tx, p).await,
        ClientEvent::ExecuteCommand(p) => term_events::execute_command(state, ctx, tx, p).await,
        ClientEvent::ClearTerminal(p) => term_events::clear_terminal(state, ctx, tx, p).await,
        ClientEvent::KillProcess(p) => term_events::kill_process(state, ctx, tx, p).await,
        ClientEvent::RunFile(p) => term_events::run_file(state, ctx, tx, p).await,
        ClientEvent::SaveAndRun(p) => term_events::save_and_run(state, ctx, tx, p).await,
    }
}

/// Disconnect cascade: kill the shell, tell the peers, and tear the room
/// down when the last member leaves.
async fn disconnect(state: &Arc<AppState>, ctx: &ConnCtx) {
    let Some(room_code) = &ctx.room else {
        return;
    };

    state.ptys.kill(&ctx.user_id);
    let remaining = state.hub.leave(room_code, &ctx.user_id).await;
    state
        .hub
        .broadcast(
            room_code,
            &ServerEvent::UserLeft {
                username: ctx.username.clone(),
                user_id: ctx.user_id.clone(),
            },
        )
        .await;

    if let Some(room) = state.rooms.get(room_code).await {
        room.tree.lock().await.drop_user(&ctx.user_id);
    }

    if remaining == 0 {
        state.ptys.kill_room(room_code);
        state.rooms.teardown(room_code).await;
    } else {
        debug!("{remaining} member(s) remain in room {room_code}");
    }
}

// -- outbound helpers used by the event handlers ----------------------------

pub(crate) fn send_event(tx: &ClientTx, event: &ServerEvent) {
    let _ = tx.send(event.to_frame());
}

pub(crate) fn send_error(tx: &ClientTx, message: impl Into<String>) {
    send_event(
        tx,
        &ServerEvent::FileError {
            message: message.into(),
        },
    );
}

/// Reply to a frame that asked for an acknowledgement; silently skipped
/// when the client did not.
pub(crate) fn send_ack<T: Serialize>(tx: &ClientTx, ack: Option<u64>, data: &T) {
    let Some(ack) = ack else {
        return;
    };
    match serde_json::to_value(data) {
        Ok(data) => {
            let _ = tx.send(AckFrame { ack, data }.to_frame());
        }
        Err(e) => warn!("Failed to serialize ack payload: {e}"),
    }
}
