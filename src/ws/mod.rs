pub mod connctx;
pub mod hub;
pub mod room_events;
pub mod session;
pub mod term_events;
