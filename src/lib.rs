pub mod backup;
pub mod config;
pub mod dedup;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod normalize;
pub mod notify;
pub mod output;
pub mod pipeline;
pub mod qc;
pub mod reader;
pub mod record;
pub mod schema;
pub mod sqlite;
pub mod store;
pub mod upload;
pub mod validate;
pub mod verify;
