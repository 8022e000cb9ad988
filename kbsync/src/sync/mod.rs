pub mod backoff;
pub mod catalog;
pub mod detect;
pub mod engine;
mod fingerprint;
pub mod index_wait;
pub mod poll;
pub mod reap;
pub mod remote;
pub mod report;
pub mod state;
mod state_sqlite;
pub mod swap;
pub mod upload;

pub use fingerprint::Fingerprint;
pub use state_sqlite::SqliteStateStore;
