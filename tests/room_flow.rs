//! End-to-end flows over the room services: editor mutations reaching
//! disk, shell-side changes reaching the tree, and the arbiter keeping the
//! two sides from echoing each other.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::unbounded_channel;

use coderoom::services::file_tree::{FileTree, DEFAULT_FILE};
use coderoom::services::room_store::generate_room_code;
use coderoom::services::rooms::RoomRegistry;
use coderoom::services::sync_arbiter::{SyncArbiter, SyncKind, SyncOrigin};
use coderoom::services::workdir::WorkDir;
use coderoom::ws::hub::{Hub, Member};

fn scratch_workdir() -> (tempfile::TempDir, WorkDir) {
    let guard = tempfile::tempdir().unwrap();
    let wd = WorkDir::at(guard.path().join("room"));
    wd.create().unwrap();
    (guard, wd)
}

#[tokio::test]
async fn editor_edit_reaches_disk_exactly_once() {
    let (_guard, wd) = scratch_workdir();
    let mut tree = FileTree::with_default_file();

    let outcome = tree
        .set_file_content(DEFAULT_FILE, "x=1\n".to_string())
        .unwrap();
    let mut writes = 0;
    for effect in &outcome.effects {
        if wd.apply(effect).unwrap() {
            writes += 1;
        }
    }
    assert_eq!(writes, 1);
    assert_eq!(wd.read_file(DEFAULT_FILE).unwrap(), "x=1\n");

    // Applying the identical change again must not touch the filesystem.
    let outcome = tree
        .set_file_content(DEFAULT_FILE, "x=1\n".to_string())
        .unwrap();
    for effect in &outcome.effects {
        assert!(!wd.apply(effect).unwrap());
    }
}

#[tokio::test]
async fn folder_create_then_delete_restores_prior_state() {
    let (_guard, wd) = scratch_workdir();
    let mut tree = FileTree::with_default_file();
    let before = tree.snapshot();

    let outcome = tree.create_folder("pkg").unwrap();
    for effect in &outcome.effects {
        wd.apply(effect).unwrap();
    }
    assert!(wd.root().join("pkg").is_dir());

    let (outcome, _) = tree.delete_item("pkg").unwrap();
    for effect in &outcome.effects {
        wd.apply(effect).unwrap();
    }
    assert!(!wd.root().join("pkg").exists());
    assert_eq!(tree.snapshot(), before);
}

#[tokio::test]
async fn rename_moves_bytes_with_the_node() {
    let (_guard, wd) = scratch_workdir();
    let mut tree = FileTree::with_default_file();
    let outcome = tree
        .set_file_content(DEFAULT_FILE, "content\n".to_string())
        .unwrap();
    for effect in &outcome.effects {
        wd.apply(effect).unwrap();
    }

    let (outcome, _) = tree.rename_item(DEFAULT_FILE, "app.js").unwrap();
    for effect in &outcome.effects {
        wd.apply(effect).unwrap();
    }
    assert_eq!(wd.read_file("app.js").unwrap(), "content\n");
    assert!(!wd.root().join(DEFAULT_FILE).exists());
}

#[tokio::test]
async fn arbiter_suppresses_the_opposite_side() {
    let arbiter = SyncArbiter::new();
    // The editor wrote main.js; the watcher's echo must be dropped while
    // the token lives.
    assert!(arbiter.begin(SyncOrigin::Editor, SyncKind::File, "ROOM", "main.js"));
    assert!(!arbiter.begin(SyncOrigin::Terminal, SyncKind::File, "ROOM", "main.js"));
}

/// A file created behind the server's back (as a shell command would)
/// surfaces in the tree and is fanned out to every member.
#[tokio::test]
async fn shell_created_file_enters_tree_and_fans_out() {
    let hub = Arc::new(Hub::new());
    let registry = RoomRegistry::new();
    let code = generate_room_code();

    let room = registry.get_or_materialize(&code, &hub).await.unwrap();
    let (tx, mut rx) = unbounded_channel();
    hub.join(
        &code,
        Member {
            user_id: "alice".into(),
            username: "alice".into(),
            tx,
        },
    )
    .await;

    std::fs::write(room.workdir.root().join("note.txt"), "hi\n").unwrap();

    let mut saw_files_update = false;
    let mut saw_file_synced = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !(saw_files_update && saw_file_synced) {
        let frame = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("watcher should have fanned out the new file")
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        match v["event"].as_str() {
            Some("files-update") if v["data"]["note.txt"]["type"] == "file" => {
                assert_eq!(v["data"]["note.txt"]["content"], "hi\n");
                saw_files_update = true;
            }
            Some("file-synced") if v["data"]["fileName"] == "note.txt" => {
                assert_eq!(v["data"]["content"], "hi\n");
                saw_file_synced = true;
            }
            _ => {}
        }
    }

    {
        let tree = room.tree.lock().await;
        assert_eq!(tree.content_of("note.txt").unwrap(), "hi\n");
    }

    let root = room.workdir.root().to_path_buf();
    drop(room);
    registry.teardown(&code).await;
    assert!(!root.exists(), "teardown must remove the working directory");
}

/// Re-materializing after teardown starts from the defaults again.
#[tokio::test]
async fn rematerialized_room_starts_fresh() {
    let hub = Arc::new(Hub::new());
    let registry = RoomRegistry::new();
    let code = generate_room_code();

    let room = registry.get_or_materialize(&code, &hub).await.unwrap();
    {
        let mut tree = room.tree.lock().await;
        let outcome = tree.create_file("extra.py", None).unwrap();
        for effect in &outcome.effects {
            room.workdir.apply(effect).unwrap();
        }
    }
    drop(room);
    registry.teardown(&code).await;

    let room = registry.get_or_materialize(&code, &hub).await.unwrap();
    {
        let tree = room.tree.lock().await;
        assert!(tree.contains(DEFAULT_FILE));
        assert!(!tree.contains("extra.py"));
    }
    assert!(room.workdir.root().join(DEFAULT_FILE).is_file());
    registry.teardown(&code).await;
}
