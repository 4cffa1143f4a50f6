//! rtwrap core - real-time host runtime for a single audio processing unit

pub mod audio;
pub mod engine;
pub mod plugin;
pub mod ring;
pub mod types;
pub mod units;
pub mod urid;

pub use types::*;
