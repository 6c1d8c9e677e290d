pub mod cache;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod presence;
pub mod session;
pub mod store;
pub mod transport;

pub use error::ChatError;
pub use session::{ChatSession, ChatSnapshot, SessionOptions};
