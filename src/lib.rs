#![forbid(unsafe_code)]

//! Core of the grabdeck media grabber: URL screening, metadata probing, format
//! planning, extractor-backed downloads and the per-session artifact registry.
//!
//! The HTTP host lives in `src/bin/backend.rs`; everything it needs is
//! exported from here.

pub mod bulk;
pub mod config;
pub mod converter;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod planner;
pub mod platform;
pub mod playlist;
pub mod probe;
pub mod registry;
pub mod review;
pub mod session;
pub mod thumbnail;

pub use error::GrabError;
