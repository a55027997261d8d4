#![forbid(unsafe_code)]

//! Public entry point for the tubefetch crate.
//!
//! The library holds everything the server binary needs: the format model,
//! the extraction seam and its yt-dlp implementation, stream selection, the
//! ffmpeg muxing pipeline and the axum router that ties them together.

pub mod catalog;
pub mod config;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod extractor;
pub mod metadata;
pub mod mux;
pub mod routes;
pub mod security;
pub mod selector;
pub mod ytdlp;
