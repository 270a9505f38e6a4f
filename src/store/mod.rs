//! Persistence layer: libSQL-backed storage for users and goals.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, GoalPatch, UserPatch};
