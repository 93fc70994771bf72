// crates/core/src/lib.rs
pub mod config;
pub mod controller;
pub mod cursor;
pub mod error;
pub mod fragment;
pub mod inbox;
pub mod inject;
pub mod launcher;
pub mod lens;
pub mod logger;
pub mod paths;
pub mod statusline;
pub mod store;
pub mod tail;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::{LoadedConfig, NousConfig};
pub use controller::{classify, Decision, StopController, StopReport};
pub use cursor::{CursorStore, CursorUpdate};
pub use error::*;
pub use inbox::Inbox;
pub use launcher::{DetachedLauncher, ExtractionLauncher, Job, LaunchRequest};
pub use lens::{Lens, ALL_LENSES, KNOWLEDGE, LEARNINGS};
pub use logger::EventLog;
pub use store::EncodedStore;
pub use types::*;
