pub mod error;
pub mod filenode;
pub mod health;
pub mod messages;

pub use error::*;
pub use filenode::*;
pub use health::*;
pub use messages::*;
