#![forbid(unsafe_code)]

//! Library half of vidfetch: an HTTP façade over yt-dlp.
//!
//! The `backend` binary only parses flags and starts the server; everything
//! it serves is built from the modules below.

pub mod api;
pub mod config;
pub mod extractor;
pub mod fetch;
pub mod model;

#[cfg(test)]
mod testing;
