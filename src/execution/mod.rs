//! Execution Module - Running variant SQL against a database
//!
//! - ExecutionBackend / ExecutionHandle: pluggable database contract
//! - SqliteBackend: one configured connection per execution tier

pub mod backend;
pub mod sqlite;

pub use backend::{ExecutionBackend, ExecutionHandle, QueryRows};
pub use sqlite::{SqliteBackend, SqliteHandle};
