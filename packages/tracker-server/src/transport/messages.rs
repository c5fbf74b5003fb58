//! Wire messages for the `Cache.ContentTracker` RPC, encoded with
//! `rmp-serde`/`rmpv` the same way the cluster-state wire contract
//! (`tracker_core::wire`) uses `serde_json` for its own surface.

use serde::{Deserialize, Serialize};

use tracker_core::{ContentEntry, ContentHash as Hash};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrackerRequest {
    UpdateLocations { entries: Vec<ContentEntry> },
    GetLocations { hashes: Vec<Hash> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub kind: String,
    pub diagnostic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrackerResponse {
    Ack,
    Locations(Vec<ContentEntry>),
    Error(WireError),
}
