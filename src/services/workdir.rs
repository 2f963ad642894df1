use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::services::file_tree::DiskEffect;

/// The on-disk mirror of one room's file tree, rooted at
/// `<os-temp>/compiler_<ROOMCODE>`. The shell sessions of the room run with
/// this directory as their working directory.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn for_room(room_code: &str) -> Self {
        Self {
            root: std::env::temp_dir().join(format!("compiler_{room_code}")),
        }
    }

    /// A working directory with an explicit root, for callers that manage
    /// their own scratch space.
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn create(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Resolve a tree path against the root, rejecting anything that could
    /// escape it.
    fn resolve(&self, rel: &str) -> io::Result<PathBuf> {
        let rel_path = Path::new(rel);
        let escapes = rel_path.components().any(|c| {
            !matches!(c, Component::Normal(seg) if !seg.is_empty())
        });
        if rel.is_empty() || escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid path '{rel}'"),
            ));
        }
        Ok(self.root.join(rel_path))
    }

    /// Write a file, creating parents as needed. The write is skipped when
    /// the on-disk bytes already match, so that a no-op never reaches the
    /// filesystem watcher. Returns whether bytes were written.
    pub fn write_file(&self, rel: &str, content: &str) -> io::Result<bool> {
        let path = self.resolve(rel)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Ok(existing) = fs::read(&path) {
            if existing == content.as_bytes() {
                return Ok(false);
            }
        }
        fs::write(&path, content)?;
        Ok(true)
    }

    pub fn read_file(&self, rel: &str) -> io::Result<String> {
        let path = self.resolve(rel)?;
        let bytes = fs::read(&path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn create_dir(&self, rel: &str) -> io::Result<()> {
        fs::create_dir_all(self.resolve(rel)?)
    }

    /// Remove a file or a directory tree; a missing target is not an error.
    pub fn delete_item(&self, rel: &str) -> io::Result<()> {
        let path = self.resolve(rel)?;
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    pub fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(source, target)
    }

    /// Apply one tree-mutation side effect. Returns whether the filesystem
    /// changed (writes report their diff result).
    pub fn apply(&self, effect: &DiskEffect) -> io::Result<bool> {
        match effect {
            DiskEffect::WriteFile { path, content } => self.write_file(path, content),
            DiskEffect::CreateDir { path } => self.create_dir(path).map(|_| true),
            DiskEffect::Remove { path } => self.delete_item(path).map(|_| true),
            DiskEffect::Rename { from, to } => self.rename(from, to).map(|_| true),
        }
    }

    /// Remove the whole directory. Called when the last member leaves.
    pub fn cleanup(&self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove working directory {:?}: {}", self.root, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, WorkDir) {
        let dir = tempfile::tempdir().unwrap();
        let wd = WorkDir::at(dir.path().join("room"));
        wd.create().unwrap();
        (dir, wd)
    }

    #[test]
    fn write_is_elided_when_bytes_match() {
        let (_g, wd) = scratch();
        assert!(wd.write_file("main.js", "x=1\n").unwrap());
        assert!(!wd.write_file("main.js", "x=1\n").unwrap());
        assert!(wd.write_file("main.js", "x=2\n").unwrap());
        assert_eq!(wd.read_file("main.js").unwrap(), "x=2\n");
    }

    #[test]
    fn write_creates_parent_directories() {
        let (_g, wd) = scratch();
        assert!(wd.write_file("src/deep/a.js", "a").unwrap());
        assert!(wd.root().join("src/deep/a.js").is_file());
    }

    #[test]
    fn delete_ignores_missing_targets() {
        let (_g, wd) = scratch();
        wd.delete_item("nothing-here.txt").unwrap();
        wd.write_file("src/a.js", "a").unwrap();
        wd.delete_item("src").unwrap();
        assert!(!wd.root().join("src").exists());
    }

    #[test]
    fn rename_ensures_target_parent() {
        let (_g, wd) = scratch();
        wd.write_file("a.js", "a").unwrap();
        wd.rename("a.js", "nested/b.js").unwrap();
        assert_eq!(wd.read_file("nested/b.js").unwrap(), "a");
        assert!(!wd.root().join("a.js").exists());
    }

    #[test]
    fn traversal_components_are_rejected() {
        let (_g, wd) = scratch();
        assert!(wd.write_file("../escape.txt", "x").is_err());
        assert!(wd.write_file("a/../../b", "x").is_err());
        assert!(wd.write_file("", "x").is_err());
    }

    #[test]
    fn folder_create_then_delete_restores_state() {
        let (_g, wd) = scratch();
        wd.create_dir("pkg").unwrap();
        assert!(wd.root().join("pkg").is_dir());
        wd.delete_item("pkg").unwrap();
        assert!(!wd.root().join("pkg").exists());
    }
}
