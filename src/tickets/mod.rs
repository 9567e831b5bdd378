//! Ticket registry data model.

pub mod model;

pub use model::{HistorySnapshot, TicketHistory, TicketPatch, TicketRecord};
