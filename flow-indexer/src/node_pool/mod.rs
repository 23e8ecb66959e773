//! Access Node connectivity: the REST client and the live/historic pool
//! built on top of it.
//!
//! - [`client`] - [`AccessNodeClient`], a plain `reqwest` client for one
//!   Access Node's REST API.
//! - [`pool`] - [`NodePool`], routing and retry across a live endpoint and
//!   zero or more historic (spork-scoped) endpoints.

mod client;
mod pool;

pub use client::{AccessNodeClient, BlockEnvelope};
pub use pool::NodePool;
