//! Hiven REST API adapter.

mod client;

pub use client::HttpTransport;
