//! Merge recipient rows into personalized invitations, track who has already
//! been processed, and mail the results.

pub mod artifacts;
pub mod cli;
pub mod destination;
pub mod engine;
pub mod error;
pub mod job;
pub mod key;
pub mod mail;
pub mod model;
mod orchestrator;
pub mod render;
pub mod selection;
pub mod source;
pub mod template;
mod text_summary;
pub mod tracking;
#[cfg(feature = "tui")]
mod tui;
