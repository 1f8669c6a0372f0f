pub mod error;
pub mod config;
pub mod storage;
pub mod discord;
pub mod identity;
pub mod registration;
pub mod achievements;
pub mod notifier;
pub mod profile;
pub mod server;
