//! `Cache.ContentTracker` RPC transport (§4.6/§9): MsgPack messages over
//! HTTP, a `reqwest` client implementing `DistributedTracker`'s
//! `TransportClient`, and an `axum` server exposing the same RPC surface.

pub mod client;
pub mod messages;
pub mod server;

pub use client::ReqwestTransportClient;
pub use messages::{TrackerRequest, TrackerResponse, WireError};
pub use server::TransportServer;
