//! Backblaze B2 API client

pub mod client;
pub mod types;

pub use client::B2Connector;
