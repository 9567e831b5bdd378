//! Blue Stakes ingest: ticket notices from email into a ticket registry.

pub mod config;
pub mod error;
pub mod mail;
pub mod pipeline;
pub mod store;
pub mod tickets;
