use indexmap::IndexMap;
use std::collections::HashMap;

use crate::models::{
    default_content_for, extension_of, FileNode, ItemKind, TreeError, TreeSnapshot,
};

/// Name and body of the file every fresh room starts with.
pub const DEFAULT_FILE: &str = "main.js";
pub const DEFAULT_FILE_CONTENT: &str = "// start typing...";

/// A side effect the caller must apply to the room's working directory
/// after a successful tree mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskEffect {
    WriteFile { path: String, content: String },
    CreateDir { path: String },
    Remove { path: String },
    Rename { from: String, to: String },
}

/// What a mutating tree operation asks the caller to do besides fan-out.
#[derive(Debug, Default, PartialEq)]
pub struct MutationOutcome {
    pub effects: Vec<DiskEffect>,
    /// Users whose active file shifted (rename follows, delete falls back),
    /// with the path it shifted to.
    pub active_changes: Vec<(String, String)>,
}

/// Result of reconciling one on-disk file into the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskUpsert {
    Created,
    Updated,
    Unchanged,
}

/// In-memory file tree of one room: a flat, insertion-ordered mapping of
/// `/`-separated paths to nodes, plus the per-user active-file tracker.
///
/// All operations assume the caller holds the room's serialization domain.
pub struct FileTree {
    nodes: IndexMap<String, FileNode>,
    active: HashMap<String, String>,
}

impl FileTree {
    /// A fresh tree holding only the default file.
    pub fn with_default_file() -> Self {
        let mut nodes = IndexMap::new();
        nodes.insert(
            DEFAULT_FILE.to_string(),
            FileNode::file(DEFAULT_FILE, DEFAULT_FILE_CONTENT.to_string()),
        );
        Self {
            nodes,
            active: HashMap::new(),
        }
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        self.nodes.clone()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn kind_of(&self, path: &str) -> Option<ItemKind> {
        self.nodes.get(path).map(|n| match n {
            FileNode::File { .. } => ItemKind::File,
            FileNode::Folder { .. } => ItemKind::Folder,
        })
    }

    pub fn file_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_file()).count()
    }

    /// First file in insertion order; the fallback target for active files.
    pub fn first_file(&self) -> Option<String> {
        self.nodes
            .iter()
            .find(|(_, n)| n.is_file())
            .map(|(k, _)| k.clone())
    }

    pub fn content_of(&self, path: &str) -> Result<&str, TreeError> {
        match self.nodes.get(path) {
            Some(FileNode::File { content, .. }) => Ok(content),
            Some(_) => Err(TreeError::NotAFile(path.to_string())),
            None => Err(TreeError::NotFound(path.to_string())),
        }
    }

    // -- mutating operations ------------------------------------------------

    pub fn create_file(
        &mut self,
        path: &str,
        content: Option<String>,
    ) -> Result<MutationOutcome, TreeError> {
        if self.nodes.contains_key(path) {
            return Err(TreeError::AlreadyExists(path.to_string()));
        }
        let content =
            content.unwrap_or_else(|| default_content_for(&extension_of(path)).to_string());
        self.nodes
            .insert(path.to_string(), FileNode::file(path, content.clone()));
        Ok(MutationOutcome {
            effects: vec![DiskEffect::WriteFile {
                path: path.to_string(),
                content,
            }],
            active_changes: Vec::new(),
        })
    }

    pub fn create_folder(&mut self, path: &str) -> Result<MutationOutcome, TreeError> {
        if self.nodes.contains_key(path) {
            return Err(TreeError::AlreadyExists(path.to_string()));
        }
        self.nodes.insert(path.to_string(), FileNode::folder());
        Ok(MutationOutcome {
            effects: vec![DiskEffect::CreateDir {
                path: path.to_string(),
            }],
            active_changes: Vec::new(),
        })
    }

    /// Delete a file, or a folder together with every descendant. The last
    /// remaining file of a room may not be deleted, directly or via its
    /// containing folder.
    pub fn delete_item(&mut self, path: &str) -> Result<(MutationOutcome, ItemKind), TreeError> {
        let kind = self
            .kind_of(path)
            .ok_or_else(|| TreeError::NotFound(path.to_string()))?;

        let removed: Vec<String> = match kind {
            ItemKind::File => vec![path.to_string()],
            ItemKind::Folder => {
                let prefix = format!("{path}/");
                self.nodes
                    .keys()
                    .filter(|k| *k == path || k.starts_with(&prefix))
                    .cloned()
                    .collect()
            }
        };

        let removed_files = removed
            .iter()
            .filter(|k| self.nodes.get(*k).is_some_and(FileNode::is_file))
            .count();
        if removed_files > 0 && removed_files == self.file_count() {
            return Err(TreeError::CannotDeleteLastFile);
        }

        for key in &removed {
            self.nodes.shift_remove(key);
        }

        // Users pointed at a removed path fall back to the first file.
        let mut active_changes = Vec::new();
        if let Some(fallback) = self.first_file() {
            let orphaned: Vec<String> = self
                .active
                .iter()
                .filter(|(_, p)| removed.contains(p))
                .map(|(u, _)| u.clone())
                .collect();
            for user in orphaned {
                self.active.insert(user.clone(), fallback.clone());
                active_changes.push((user, fallback.clone()));
            }
        }

        Ok((
            MutationOutcome {
                effects: vec![DiskEffect::Remove {
                    path: path.to_string(),
                }],
                active_changes,
            },
            kind,
        ))
    }

    /// Rename a node; folders re-key every descendant in one step, files
    /// re-derive their extension from the new leaf name.
    pub fn rename_item(
        &mut self,
        old: &str,
        new: &str,
    ) -> Result<(MutationOutcome, ItemKind), TreeError> {
        let kind = self
            .kind_of(old)
            .ok_or_else(|| TreeError::NotFound(old.to_string()))?;
        if self.nodes.contains_key(new) {
            return Err(TreeError::AlreadyExists(new.to_string()));
        }

        self.rekey(old, new, kind == ItemKind::Folder);
        let active_changes = self.remap_active(old, new, kind == ItemKind::Folder);

        Ok((
            MutationOutcome {
                effects: vec![DiskEffect::Rename {
                    from: old.to_string(),
                    to: new.to_string(),
                }],
                active_changes,
            },
            kind,
        ))
    }

    /// Move is a rename that additionally refuses to move a folder into
    /// its own subtree.
    pub fn move_item(
        &mut self,
        source: &str,
        target: &str,
        kind: ItemKind,
    ) -> Result<(MutationOutcome, ItemKind), TreeError> {
        if kind == ItemKind::Folder && target.starts_with(&format!("{source}/")) {
            return Err(TreeError::IntoSelf(source.to_string()));
        }
        self.rename_item(source, target)
    }

    /// Flip a folder's view hint; returns the new state.
    pub fn toggle_folder(&mut self, path: &str) -> Result<bool, TreeError> {
        match self.nodes.get_mut(path) {
            Some(FileNode::Folder { is_expanded }) => {
                *is_expanded = !*is_expanded;
                Ok(*is_expanded)
            }
            Some(_) => Err(TreeError::NotAFolder(path.to_string())),
            None => Err(TreeError::NotFound(path.to_string())),
        }
    }

    pub fn set_file_content(
        &mut self,
        path: &str,
        content: String,
    ) -> Result<MutationOutcome, TreeError> {
        match self.nodes.get_mut(path) {
            Some(FileNode::File {
                content: existing, ..
            }) => {
                *existing = content.clone();
                Ok(MutationOutcome {
                    effects: vec![DiskEffect::WriteFile {
                        path: path.to_string(),
                        content,
                    }],
                    active_changes: Vec::new(),
                })
            }
            Some(_) => Err(TreeError::NotAFile(path.to_string())),
            None => Err(TreeError::NotFound(path.to_string())),
        }
    }

    // -- active-file tracker ------------------------------------------------

    pub fn set_active(&mut self, user_id: &str, path: &str) -> Result<(), TreeError> {
        match self.nodes.get(path) {
            Some(FileNode::File { .. }) => {
                self.active.insert(user_id.to_string(), path.to_string());
                Ok(())
            }
            Some(_) => Err(TreeError::NotAFile(path.to_string())),
            None => Err(TreeError::NotFound(path.to_string())),
        }
    }

    pub fn active_of(&self, user_id: &str) -> Option<&str> {
        self.active.get(user_id).map(String::as_str)
    }

    pub fn drop_user(&mut self, user_id: &str) {
        self.active.remove(user_id);
    }

    // -- disk reconciliation (watcher side) ---------------------------------

    /// Reconcile an on-disk file into the tree; content is only replaced
    /// when it differs from the in-memory node.
    pub fn upsert_from_disk(&mut self, path: &str, content: String) -> DiskUpsert {
        match self.nodes.get_mut(path) {
            Some(FileNode::File {
                content: existing, ..
            }) => {
                if *existing == content {
                    DiskUpsert::Unchanged
                } else {
                    *existing = content;
                    DiskUpsert::Updated
                }
            }
            Some(FileNode::Folder { .. }) => DiskUpsert::Unchanged,
            None => {
                self.nodes
                    .insert(path.to_string(), FileNode::file(path, content));
                DiskUpsert::Created
            }
        }
    }

    /// Insert a folder observed on disk. Returns false when already present.
    pub fn insert_folder_from_disk(&mut self, path: &str) -> bool {
        if self.nodes.contains_key(path) {
            return false;
        }
        self.nodes.insert(path.to_string(), FileNode::folder());
        true
    }

    // -- internals ----------------------------------------------------------

    /// Re-key `old` to `new` (and every `old/…` descendant when `folder`),
    /// preserving insertion order. File nodes re-derive their extension.
    fn rekey(&mut self, old: &str, new: &str, folder: bool) {
        let prefix = format!("{old}/");
        let nodes = std::mem::take(&mut self.nodes);
        self.nodes = nodes
            .into_iter()
            .map(|(key, node)| {
                let renamed = if key == old {
                    Some(new.to_string())
                } else if folder && key.starts_with(&prefix) {
                    Some(format!("{new}{}", &key[old.len()..]))
                } else {
                    None
                };
                match renamed {
                    Some(target) => {
                        let node = match node {
                            FileNode::File { content, .. } => FileNode::file(&target, content),
                            folder_node => folder_node,
                        };
                        (target, node)
                    }
                    None => (key, node),
                }
            })
            .collect();
    }

    /// Shift every active-file entry affected by a rename; returns the
    /// (user, new path) pairs that changed.
    fn remap_active(&mut self, old: &str, new: &str, folder: bool) -> Vec<(String, String)> {
        let prefix = format!("{old}/");
        let mut changes = Vec::new();
        for (user, path) in self.active.iter_mut() {
            if path == old {
                *path = new.to_string();
                changes.push((user.clone(), path.clone()));
            } else if folder && path.starts_with(&prefix) {
                *path = format!("{new}{}", &path[old.len()..]);
                changes.push((user.clone(), path.clone()));
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> FileTree {
        FileTree::with_default_file()
    }

    #[test]
    fn starts_with_default_file() {
        let t = tree();
        assert_eq!(t.first_file().as_deref(), Some(DEFAULT_FILE));
        assert_eq!(t.content_of(DEFAULT_FILE).unwrap(), DEFAULT_FILE_CONTENT);
    }

    #[test]
    fn create_file_uses_template_and_rejects_duplicates() {
        let mut t = tree();
        let outcome = t.create_file("script.py", None).unwrap();
        assert_eq!(
            outcome.effects,
            vec![DiskEffect::WriteFile {
                path: "script.py".into(),
                content: "print('Hello, world!')\n".into(),
            }]
        );
        assert_eq!(
            t.create_file("script.py", None),
            Err(TreeError::AlreadyExists("script.py".into()))
        );
    }

    #[test]
    fn last_file_cannot_be_deleted() {
        let mut t = tree();
        assert_eq!(
            t.delete_item(DEFAULT_FILE),
            Err(TreeError::CannotDeleteLastFile)
        );
        t.create_file("other.js", None).unwrap();
        assert!(t.delete_item(DEFAULT_FILE).is_ok());
        assert_eq!(
            t.delete_item("other.js"),
            Err(TreeError::CannotDeleteLastFile)
        );
    }

    #[test]
    fn folder_delete_removes_descendants() {
        let mut t = tree();
        t.create_folder("src").unwrap();
        t.create_file("src/a.js", None).unwrap();
        t.create_file("src/deep/b.js", None).unwrap();
        let (outcome, kind) = t.delete_item("src").unwrap();
        assert_eq!(kind, ItemKind::Folder);
        assert_eq!(
            outcome.effects,
            vec![DiskEffect::Remove { path: "src".into() }]
        );
        assert!(!t.contains("src/a.js"));
        assert!(!t.contains("src/deep/b.js"));
        assert!(t.contains(DEFAULT_FILE));
    }

    #[test]
    fn folder_delete_cannot_orphan_all_files() {
        let mut t = tree();
        t.create_folder("src").unwrap();
        t.create_file("src/only.js", None).unwrap();
        // main.js still exists, so deleting src is fine.
        t.delete_item("src").unwrap();

        t.create_folder("pkg").unwrap();
        t.create_file("pkg/main2.js", None).unwrap();
        t.delete_item(DEFAULT_FILE).unwrap();
        assert_eq!(t.delete_item("pkg"), Err(TreeError::CannotDeleteLastFile));
    }

    #[test]
    fn delete_reassigns_active_to_first_file() {
        let mut t = tree();
        t.create_file("notes.txt", None).unwrap();
        t.set_active("bob", "notes.txt").unwrap();
        let (outcome, _) = t.delete_item("notes.txt").unwrap();
        assert_eq!(
            outcome.active_changes,
            vec![("bob".to_string(), DEFAULT_FILE.to_string())]
        );
        assert_eq!(t.active_of("bob"), Some(DEFAULT_FILE));
    }

    #[test]
    fn rename_follows_active_and_rederives_extension() {
        let mut t = tree();
        t.set_active("bob", DEFAULT_FILE).unwrap();
        let (outcome, kind) = t.rename_item(DEFAULT_FILE, "app.py").unwrap();
        assert_eq!(kind, ItemKind::File);
        assert_eq!(
            outcome.active_changes,
            vec![("bob".to_string(), "app.py".to_string())]
        );
        match t.snapshot().get("app.py").unwrap() {
            FileNode::File { extension, content } => {
                assert_eq!(extension, "py");
                assert_eq!(content, DEFAULT_FILE_CONTENT);
            }
            _ => panic!("expected file"),
        }
    }

    #[test]
    fn folder_rename_rekeys_descendants() {
        let mut t = tree();
        t.create_folder("src").unwrap();
        t.create_file("src/a.js", None).unwrap();
        t.set_active("alice", "src/a.js").unwrap();
        let (outcome, _) = t.rename_item("src", "lib").unwrap();
        assert!(t.contains("lib/a.js"));
        assert!(!t.contains("src/a.js"));
        assert_eq!(
            outcome.active_changes,
            vec![("alice".to_string(), "lib/a.js".to_string())]
        );
    }

    #[test]
    fn rename_round_trip_is_identity() {
        let mut t = tree();
        let before = t.snapshot();
        t.rename_item(DEFAULT_FILE, "app.js").unwrap();
        t.rename_item("app.js", DEFAULT_FILE).unwrap();
        assert_eq!(t.snapshot(), before);
    }

    #[test]
    fn move_into_own_subtree_is_rejected() {
        let mut t = tree();
        t.create_folder("a").unwrap();
        assert_eq!(
            t.move_item("a", "a/b/a", ItemKind::Folder),
            Err(TreeError::IntoSelf("a".into()))
        );
        // A sibling move is a plain rename.
        assert!(t.move_item("a", "b", ItemKind::Folder).is_ok());
    }

    #[test]
    fn toggle_folder_flips_hint() {
        let mut t = tree();
        t.create_folder("src").unwrap();
        assert!(!t.toggle_folder("src").unwrap());
        assert!(t.toggle_folder("src").unwrap());
        assert_eq!(
            t.toggle_folder(DEFAULT_FILE),
            Err(TreeError::NotAFolder(DEFAULT_FILE.into()))
        );
    }

    #[test]
    fn upsert_from_disk_diffs_content() {
        let mut t = tree();
        assert_eq!(
            t.upsert_from_disk("note.txt", "hi\n".into()),
            DiskUpsert::Created
        );
        assert_eq!(
            t.upsert_from_disk("note.txt", "hi\n".into()),
            DiskUpsert::Unchanged
        );
        assert_eq!(
            t.upsert_from_disk("note.txt", "bye\n".into()),
            DiskUpsert::Updated
        );
    }

    #[test]
    fn set_file_content_rejects_folders() {
        let mut t = tree();
        t.create_folder("src").unwrap();
        assert_eq!(
            t.set_file_content("src", "x".into()),
            Err(TreeError::NotAFile("src".into()))
        );
        assert_eq!(
            t.set_file_content("ghost.js", "x".into()),
            Err(TreeError::NotFound("ghost.js".into()))
        );
    }
}
