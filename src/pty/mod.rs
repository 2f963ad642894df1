//! Per-user shell sessions using the `portable-pty` crate.
//!
//! Every authenticated user of a room gets exactly one shell, spawned in
//! the room's working directory. Output is forwarded to the owning user's
//! private channel only; a crashed or exited shell is replaced
//! automatically while the user remains in the room.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, info, warn};

use crate::config;
use crate::models::{PtyError, ServerEvent};
use crate::ws::hub::{ClientTx, Hub};

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 30;
const RESPAWN_DELAY: Duration = Duration::from_secs(1);
const EXIT_BANNER: &str = "\r\n\x1b[31mTerminal session ended\x1b[0m\r\n";

fn default_shell() -> String {
    if let Some(shell) = &config::get_config().shell {
        return shell.clone();
    }
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        "bash".to_string()
    }
}

struct PtySession {
    room: String,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    /// Distinguishes a natural shell exit from a deliberate kill: the
    /// reader thread only reacts when its generation still owns the entry.
    generation: u64,
}

/// Registry of the live shell sessions, keyed by user id.
pub struct PtyRegistry {
    sessions: Mutex<HashMap<String, PtySession>>,
    next_generation: AtomicU64,
    runtime: tokio::runtime::Handle,
}

impl PtyRegistry {
    /// Must be created inside the tokio runtime; respawn timers run on it.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            runtime: tokio::runtime::Handle::current(),
        })
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, PtySession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the shell for a user joined to a room. Idempotent: a live
    /// session for the user is left untouched.
    pub fn spawn_shell(
        self: &Arc<Self>,
        user_id: &str,
        room: &str,
        workdir: &Path,
        tx: ClientTx,
        hub: Arc<Hub>,
    ) -> Result<(), PtyError> {
        {
            let sessions = self.lock_sessions();
            if sessions.contains_key(user_id) {
                return Ok(());
            }
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        let shell = default_shell();
        let mut cmd = CommandBuilder::new(&shell);
        cmd.cwd(workdir);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd.env("FORCE_COLOR", "1");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        info!("Spawned {shell} for user {user_id} in room {room}");

        // Reader thread: forward output to the owner until the shell exits.
        let registry = Arc::clone(self);
        let thread_user = user_id.to_string();
        let thread_room = room.to_string();
        let thread_workdir = workdir.to_path_buf();
        let thread_tx = tx.clone();
        std::thread::Builder::new()
            .name(format!("pty-{user_id}"))
            .spawn(move || {
                let mut buf = [0u8; 8192];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                            if thread_tx
                                .send(ServerEvent::TerminalOutput(chunk).to_frame())
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
                registry.on_shell_exit(
                    &thread_user,
                    generation,
                    thread_room,
                    thread_workdir,
                    thread_tx,
                    hub,
                );
            })
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        self.lock_sessions().insert(
            user_id.to_string(),
            PtySession {
                room: room.to_string(),
                master: pair.master,
                writer,
                child,
                generation,
            },
        );
        Ok(())
    }

    /// Reader thread callback once the shell's output stream closes. A
    /// deliberate kill has already removed the entry (or replaced it with a
    /// newer generation) and stays silent; a natural exit banners the owner
    /// and schedules a replacement shell.
    fn on_shell_exit(
        self: &Arc<Self>,
        user_id: &str,
        generation: u64,
        room: String,
        workdir: PathBuf,
        tx: ClientTx,
        hub: Arc<Hub>,
    ) {
        {
            let mut sessions = self.lock_sessions();
            match sessions.get(user_id) {
                Some(s) if s.generation == generation => {
                    sessions.remove(user_id);
                }
                _ => return,
            }
        }

        warn!("Shell for user {user_id} in room {room} exited");
        let _ = tx.send(ServerEvent::TerminalOutput(EXIT_BANNER.to_string()).to_frame());

        let registry = Arc::clone(self);
        let user = user_id.to_string();
        self.runtime.spawn(async move {
            tokio::time::sleep(RESPAWN_DELAY).await;
            // The user may have disconnected while the timer ran.
            if !hub.is_member(&room, &user).await {
                debug!("Skipping shell respawn for {user}: left room {room}");
                return;
            }
            if let Err(e) = registry.spawn_shell(&user, &room, &workdir, tx, hub) {
                warn!("Failed to respawn shell for {user}: {e}");
            }
        });
    }

    pub fn write_input(&self, user_id: &str, data: &[u8]) -> Result<(), PtyError> {
        let mut sessions = self.lock_sessions();
        let session = sessions
            .get_mut(user_id)
            .ok_or_else(|| PtyError::NoSession(user_id.to_string()))?;
        session.writer.write_all(data)?;
        session.writer.flush()?;
        Ok(())
    }

    /// Type a command line into the shell, terminated with a carriage
    /// return as a terminal would send it.
    pub fn execute_command(&self, user_id: &str, command: &str) -> Result<(), PtyError> {
        self.write_input(user_id, format!("{command}\r").as_bytes())
    }

    /// ETX through the controlling terminal; the foreground process group
    /// receives SIGINT.
    pub fn send_interrupt(&self, user_id: &str) -> Result<(), PtyError> {
        self.write_input(user_id, &[0x03])
    }

    /// Resize the terminal. Transient failures are swallowed; the next
    /// resize wins anyway.
    pub fn resize(&self, user_id: &str, cols: u16, rows: u16) {
        let sessions = self.lock_sessions();
        if let Some(session) = sessions.get(user_id) {
            if let Err(e) = session.master.resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            }) {
                debug!("Resize for user {user_id} failed: {e}");
            }
        }
    }

    pub fn has_session(&self, user_id: &str) -> bool {
        self.lock_sessions().contains_key(user_id)
    }

    /// Kill a user's shell without banner or respawn (disconnect path).
    pub fn kill(&self, user_id: &str) {
        let removed = self.lock_sessions().remove(user_id);
        if let Some(mut session) = removed {
            let _ = session.child.kill();
            debug!("Killed shell for user {user_id} in room {}", session.room);
        }
    }

    /// Kill every shell bound to a room (teardown path; catches stragglers
    /// such as a respawn racing the last disconnect).
    pub fn kill_room(&self, room: &str) {
        let mut sessions = self.lock_sessions();
        let users: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.room == room)
            .map(|(user, _)| user.clone())
            .collect();
        for user in users {
            if let Some(mut session) = sessions.remove(&user) {
                let _ = session.child.kill();
                debug!("Killed shell for user {user} in room {room}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test(flavor = "multi_thread")]
    #[cfg(unix)]
    async fn shell_echo_reaches_only_the_owner() {
        let registry = PtyRegistry::new();
        let hub = Arc::new(Hub::new());
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = unbounded_channel();

        registry
            .spawn_shell("alice", "ROOM01", dir.path(), tx, hub)
            .expect("spawn shell");
        registry
            .execute_command("alice", "echo pty_$((40+2))")
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut output = String::new();
        while Instant::now() < deadline && !output.contains("pty_42") {
            if let Ok(Some(frame)) =
                tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
            {
                let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
                if v["event"] == "terminal-output" {
                    output.push_str(v["data"].as_str().unwrap_or_default());
                }
            }
        }
        assert!(output.contains("pty_42"), "expected echo output, got: {output:?}");

        registry.kill_room("ROOM01");
        assert!(!registry.has_session("alice"));
    }

    #[tokio::test]
    async fn input_without_session_is_an_error() {
        let registry = PtyRegistry::new();
        assert!(matches!(
            registry.write_input("ghost", b"ls\r"),
            Err(PtyError::NoSession(_))
        ));
    }
}
