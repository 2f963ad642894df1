pub mod file_tree;
pub mod room_store;
pub mod rooms;
pub mod run_dispatcher;
pub mod sync_arbiter;
pub mod watcher;
pub mod workdir;
