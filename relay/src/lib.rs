pub mod api;
pub mod config;
pub mod directory;
pub mod hub;
pub mod messages;
pub mod presence;
