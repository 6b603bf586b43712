//! neon: an SSR front door for single-page applications.
//!
//! A request walks a chain of renderers (rewrite, header, static, robots,
//! sitemap, index, default); the index renderer assembles a keyed state
//! bundle from pre-fetched resources, runs the client bundle in a pooled
//! isolated JavaScript VM and splices the captured effects into an HTML
//! template. A scheduled loader keeps the fetch cache warm and materializes
//! template-derived resources from list payloads.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod init;
pub mod loader;
pub mod logging;
pub mod render;
pub mod server;
pub mod substitute;
pub mod vm;

pub use error::Error;
