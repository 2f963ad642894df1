use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// A write must be quiet for this long before we read it; editors and
/// compilers flush in multiple bursts.
pub const STABILITY_WINDOW: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A change observed in a room's working directory, with the path relative
/// to the root in `/`-separated form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    FileAdded(String),
    FileChanged(String),
    DirAdded(String),
    /// File-or-directory is not distinguishable after the fact; the
    /// consumer resolves the kind against the in-memory tree.
    Removed(String),
}

/// Stops the watch thread when the room is torn down.
pub struct WatcherHandle {
    stop: Arc<AtomicBool>,
}

impl WatcherHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Watch a room's working directory. Raw notify events land on a dedicated
/// thread that debounces file writes until stable, then forwards
/// [`WatchEvent`]s over the returned channel. Dot-prefixed entries are
/// ignored; the initial directory contents produce no events.
pub fn watch_room(
    room_code: &str,
    root: PathBuf,
) -> notify::Result<(WatcherHandle, UnboundedReceiver<WatchEvent>)> {
    let (raw_tx, raw_rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = raw_tx.send(res);
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    let (out_tx, out_rx) = tokio::sync::mpsc::unbounded_channel();
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);
    let room = room_code.to_string();

    std::thread::Builder::new()
        .name(format!("watch-{room_code}"))
        .spawn(move || {
            // Keep the watcher alive for the lifetime of the loop.
            let _watcher = watcher;
            run_loop(&room, &root, raw_rx, out_tx, thread_stop);
            debug!("Watcher for room {room} stopped");
        })
        .map_err(notify::Error::io)?;

    Ok((WatcherHandle { stop }, out_rx))
}

struct PendingWrite {
    added: bool,
    last_seen: Instant,
    last_size: u64,
}

fn run_loop(
    room: &str,
    root: &Path,
    raw_rx: mpsc::Receiver<Result<notify::Event, notify::Error>>,
    out_tx: UnboundedSender<WatchEvent>,
    stop: Arc<AtomicBool>,
) {
    let mut pending: HashMap<String, PendingWrite> = HashMap::new();

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match raw_rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) => handle_raw(root, &event, &mut pending, &out_tx),
            Ok(Err(e)) => warn!("Watch error in room {room}: {e}"),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        flush_stable(root, &mut pending, &out_tx);
    }
}

fn handle_raw(
    root: &Path,
    event: &notify::Event,
    pending: &mut HashMap<String, PendingWrite>,
    out: &UnboundedSender<WatchEvent>,
) {
    // A rename carries [from, to]; the source is gone, the target is new.
    if matches!(
        event.kind,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both))
    ) && event.paths.len() >= 2
    {
        if let Some(rel) = relative_key(root, &event.paths[0]) {
            pending.remove(&rel);
            let _ = out.send(WatchEvent::Removed(rel));
        }
        if let Some(rel) = relative_key(root, &event.paths[1]) {
            note_arrival(root, rel, true, pending, out);
        }
        return;
    }

    for path in &event.paths {
        let Some(rel) = relative_key(root, path) else {
            continue;
        };
        match event.kind {
            EventKind::Create(CreateKind::Folder) => {
                let _ = out.send(WatchEvent::DirAdded(rel));
            }
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                note_arrival(root, rel, true, pending, out);
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
                pending.remove(&rel);
                let _ = out.send(WatchEvent::Removed(rel));
            }
            EventKind::Modify(_) => {
                note_arrival(root, rel, false, pending, out);
            }
            _ => {}
        }
    }
}

/// Record a file add/change for stabilization, or pass a directory
/// straight through.
fn note_arrival(
    root: &Path,
    rel: String,
    added: bool,
    pending: &mut HashMap<String, PendingWrite>,
    out: &UnboundedSender<WatchEvent>,
) {
    let abs = root.join(&rel);
    let Ok(meta) = abs.metadata() else {
        // Already gone again; the remove event handles it.
        return;
    };
    if meta.is_dir() {
        if added {
            let _ = out.send(WatchEvent::DirAdded(rel));
        }
        return;
    }
    let entry = pending.entry(rel).or_insert(PendingWrite {
        added,
        last_seen: Instant::now(),
        last_size: meta.len(),
    });
    entry.last_seen = Instant::now();
    entry.last_size = meta.len();
}

/// Emit pending writes whose files have been quiet for the stability
/// window; a still-growing file resets its clock.
fn flush_stable(
    root: &Path,
    pending: &mut HashMap<String, PendingWrite>,
    out: &UnboundedSender<WatchEvent>,
) {
    let mut ready = Vec::new();
    for (rel, entry) in pending.iter_mut() {
        let abs = root.join(rel.as_str());
        match abs.metadata() {
            Ok(meta) if meta.len() != entry.last_size => {
                entry.last_size = meta.len();
                entry.last_seen = Instant::now();
            }
            Ok(_) if entry.last_seen.elapsed() >= STABILITY_WINDOW => {
                ready.push(rel.clone());
            }
            Ok(_) => {}
            Err(_) => {
                // Vanished before stabilizing.
                ready.push(rel.clone());
            }
        }
    }
    for rel in ready {
        if let Some(entry) = pending.remove(&rel) {
            if root.join(&rel).exists() {
                let event = if entry.added {
                    WatchEvent::FileAdded(rel)
                } else {
                    WatchEvent::FileChanged(rel)
                };
                let _ = out.send(event);
            }
        }
    }
}

/// Relative `/`-separated key for an absolute path inside the root.
/// Returns None for the root itself, paths outside it, and anything with
/// a dot-prefixed component.
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for comp in rel.components() {
        let seg = comp.as_os_str().to_str()?;
        if seg.is_empty() || seg.starts_with('.') {
            return None;
        }
        parts.push(seg);
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_key_filters_dot_entries() {
        let root = Path::new("/tmp/compiler_TEST");
        assert_eq!(
            relative_key(root, Path::new("/tmp/compiler_TEST/src/a.js")),
            Some("src/a.js".to_string())
        );
        assert_eq!(relative_key(root, Path::new("/tmp/compiler_TEST/.git/x")), None);
        assert_eq!(relative_key(root, Path::new("/tmp/compiler_TEST")), None);
        assert_eq!(relative_key(root, Path::new("/elsewhere/a.js")), None);
    }

    #[tokio::test]
    async fn shell_style_write_surfaces_after_stabilizing() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, mut rx) = watch_room("TEST01", dir.path().to_path_buf()).unwrap();

        std::fs::write(dir.path().join("note.txt"), "hi\n").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("watcher should report the new file")
            .unwrap();
        assert_eq!(event, WatchEvent::FileAdded("note.txt".to_string()));
        handle.stop();
    }

    #[tokio::test]
    async fn dot_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, mut rx) = watch_room("TEST02", dir.path().to_path_buf()).unwrap();

        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        std::fs::write(dir.path().join("seen.txt"), "x").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("watcher should report the visible file")
            .unwrap();
        assert_eq!(event, WatchEvent::FileAdded("seen.txt".to_string()));
        handle.stop();
    }
}
