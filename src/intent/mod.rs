//! Structured change-intent capture: parsing Worker reports, persisting
//! intent records, and linking them to architecture decision records.

pub mod adr;
pub mod parser;
pub mod tracker;

pub use adr::AdrManager;
pub use parser::{IntentHeadings, IntentParser};
pub use tracker::IntentTracker;
