#![deny(missing_debug_implementations)]

//! # h2fetch
//!
//! A command-line HTTP/2 client.
//!
//! h2fetch fetches one or more resources per origin over a single
//! multiplexed connection, either TLS with next-protocol negotiation or
//! cleartext, and can additionally upload a request body, follow
//! same-origin asset links found in HTML responses, and record per-request
//! timings.
//!
//! The crate is a thin session engine around the [`h2`] framing library:
//! [`client`] drives one connection per origin on a current-thread runtime,
//! [`registry`] owns the requests multiplexed over it, and the remaining
//! modules cover transport setup, response decoding and link extraction.
//! The binary in `main.rs` only parses arguments and strings sessions
//! together.

pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod stats;
pub mod uri;

mod assets;
mod decode;
mod headers;
mod timeout;
mod tls;
mod transport;

pub use crate::error::{Error, Result};
