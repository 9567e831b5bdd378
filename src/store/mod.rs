//! Persistence layer: libSQL-backed ticket registry.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlTicketStore;
pub use traits::TicketStore;
