use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

/// How long a sync token stays active before auto-clearing.
pub const TOKEN_TTL: Duration = Duration::from_millis(300);

/// Which side of the mirror originated a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOrigin {
    Editor,
    Terminal,
}

impl SyncOrigin {
    fn opposite(self) -> Self {
        match self {
            SyncOrigin::Editor => SyncOrigin::Terminal,
            SyncOrigin::Terminal => SyncOrigin::Editor,
        }
    }

    fn prefix(self, kind: SyncKind) -> &'static str {
        match (self, kind) {
            (SyncOrigin::Editor, SyncKind::File) => "editor",
            (SyncOrigin::Editor, SyncKind::Folder) => "editor-folder",
            (SyncOrigin::Terminal, SyncKind::File) => "terminal",
            (SyncOrigin::Terminal, SyncKind::Folder) => "terminal-folder",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    File,
    Folder,
}

/// Breaks the editor/terminal reflection loop. A token asserts "a write from
/// this origin is in flight for (room, path)"; while it is active the
/// opposite direction drops its own write for the same pair. Tokens
/// auto-clear after [`TOKEN_TTL`].
#[derive(Debug, Clone, Default)]
pub struct SyncArbiter {
    tokens: Arc<Mutex<HashSet<String>>>,
}

impl SyncArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn token(origin: SyncOrigin, kind: SyncKind, room: &str, path: &str) -> String {
        format!("{}-{room}-{path}", origin.prefix(kind))
    }

    /// Try to claim the write for (room, path) on behalf of `origin`.
    ///
    /// Returns false when the opposite side already holds the write, in
    /// which case the caller must drop its side effect silently. On success
    /// the token is scheduled to clear after [`TOKEN_TTL`].
    pub fn begin(&self, origin: SyncOrigin, kind: SyncKind, room: &str, path: &str) -> bool {
        let own = Self::token(origin, kind, room, path);
        let opposite = Self::token(origin.opposite(), kind, room, path);

        {
            let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
            if tokens.contains(&opposite) {
                debug!("Sync suppressed for {room}/{path}: {opposite} active");
                return false;
            }
            tokens.insert(own.clone());
        }

        let tokens = Arc::clone(&self.tokens);
        tokio::spawn(async move {
            tokio::time::sleep(TOKEN_TTL).await;
            tokens
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&own);
        });
        true
    }

    #[cfg(test)]
    fn is_active(&self, origin: SyncOrigin, kind: SyncKind, room: &str, path: &str) -> bool {
        self.tokens
            .lock()
            .unwrap()
            .contains(&Self::token(origin, kind, room, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opposite_origin_is_gated() {
        let arbiter = SyncArbiter::new();
        assert!(arbiter.begin(SyncOrigin::Editor, SyncKind::File, "R1", "main.js"));
        // The terminal side must back off for the same (room, path)...
        assert!(!arbiter.begin(SyncOrigin::Terminal, SyncKind::File, "R1", "main.js"));
        // ...but a different path or room is unaffected.
        assert!(arbiter.begin(SyncOrigin::Terminal, SyncKind::File, "R1", "other.js"));
        assert!(arbiter.begin(SyncOrigin::Terminal, SyncKind::File, "R2", "main.js"));
    }

    #[tokio::test]
    async fn same_origin_may_repeat() {
        let arbiter = SyncArbiter::new();
        assert!(arbiter.begin(SyncOrigin::Editor, SyncKind::File, "R", "a.js"));
        assert!(arbiter.begin(SyncOrigin::Editor, SyncKind::File, "R", "a.js"));
    }

    #[tokio::test]
    async fn folder_tokens_do_not_collide_with_file_tokens() {
        let arbiter = SyncArbiter::new();
        assert!(arbiter.begin(SyncOrigin::Editor, SyncKind::Folder, "R", "src"));
        assert!(arbiter.begin(SyncOrigin::Terminal, SyncKind::File, "R", "src"));
    }

    #[tokio::test]
    async fn token_expires_after_ttl() {
        let arbiter = SyncArbiter::new();
        arbiter.begin(SyncOrigin::Editor, SyncKind::File, "R", "a.js");
        assert!(arbiter.is_active(SyncOrigin::Editor, SyncKind::File, "R", "a.js"));
        tokio::time::sleep(TOKEN_TTL + Duration::from_millis(50)).await;
        assert!(!arbiter.is_active(SyncOrigin::Editor, SyncKind::File, "R", "a.js"));
        assert!(arbiter.begin(SyncOrigin::Terminal, SyncKind::File, "R", "a.js"));
    }
}
