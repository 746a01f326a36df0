//! Core container format for the Datavision Easy Store.
//!
//! A shard is an append-only, self-describing object:
//!
//! ```text
//! [ HEADER 8B ][ DATA ... ][ INDEX ][ FOOTER 12B ]
//! ```
//!
//! Everything in this crate is synchronous and storage-agnostic; readers
//! work over any `Read + Seek`, writers over any `Write`. Blob-store and
//! database integration lives in `des-store`.

pub mod bigfiles;
pub mod cache;
pub mod compression;
pub mod config;
pub mod error;
pub mod format;
pub mod index;
pub mod metadata;
pub mod reader;
pub mod routing;
pub mod writer;

pub use error::{ShardError, ShardResult};
