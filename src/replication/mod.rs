//! Primary/secondary replication: debounced outbound NOTIFY, inbound
//! NOTIFY bookkeeping and the AXFR fetch worker.

pub mod fetch;
pub mod notify;

pub use fetch::FetchWorker;
pub use notify::{NotifyDecision, NotifyEngine};
