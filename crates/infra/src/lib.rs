//! Infrastructure layer: config, DB, persistence, outbox, messaging and workers.

pub mod config;
pub mod db;
pub mod event_bus;
pub mod messaging;
pub mod outbox;
pub mod persistence;
pub mod read_model;
pub mod workers;

pub use config::Settings;
pub use persistence::{CommandScope, CommandStore, PersistenceError};
pub use read_model::QueryRepositories;
