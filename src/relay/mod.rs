//! One-way relay of a directory tree from a source endpoint to a destination.
//!
//! The engine walks the source depth-first, creating destination
//! directories on the way back up, and copies every file that is new or has
//! changed. Nothing is ever removed from the destination. With move
//! semantics enabled, each source file is deleted right after its copy.
//!
//! # Example
//!
//! ```rust,ignore
//! use sftp_relay::relay::RelayEngine;
//!
//! let mut engine = RelayEngine::new(&config.source, &config.destination, log.clone())?;
//! let relayed = engine.relay().await?;
//! println!("Relayed {relayed} file/s");
//! ```

mod engine;
mod filter;

pub use engine::{RelayEngine, file_has_changed};
pub use filter::FileNameFilter;
