//! Authoritative zone data: typed payloads, the in-memory store, the
//! per-RR-type handler registry and the mutation façade.

pub mod api;
pub mod rtypes;
pub mod store;
pub mod types;

pub use api::RecordApi;
pub use store::{SignTask, ZoneStore};
pub use types::ZoneData;
