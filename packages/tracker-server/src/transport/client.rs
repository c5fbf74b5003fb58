//! `Cache.ContentTracker` RPC client over `reqwest`, bounded by
//! `remote_construction_timeout` and a `CancellationToken` per call.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracker_core::{ContentEntry, ContentHash as Hash, ErrorKind, MachineLocation};

use crate::distributed_tracker::TransportClient;

use super::messages::{TrackerRequest, TrackerResponse};

const CONTENT_TRACKER_PATH: &str = "cache/content-tracker";

/// Rewrites a `MachineLocation` (opaque to `tracker-core`, typically
/// `grpc://host:port/`) into the HTTP endpoint this transport actually
/// speaks. The `grpc://` scheme is a canonical-string convention inherited
/// from the surrounding system, not a real gRPC channel here (§9).
fn endpoint_url(location: &MachineLocation) -> String {
    let addr = location.as_str().split("://").last().unwrap_or(location.as_str());
    let addr = addr.trim_end_matches('/');
    format!("http://{addr}/{CONTENT_TRACKER_PATH}")
}

pub struct ReqwestTransportClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransportClient {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { client: reqwest::Client::new(), timeout }
    }

    async fn call(&self, target: &MachineLocation, request: &TrackerRequest, cancel: &CancellationToken) -> Result<TrackerResponse, ErrorKind> {
        let body = rmp_serde::to_vec(request).map_err(|err| ErrorKind::corrupted(err.to_string()))?;
        let url = endpoint_url(target);

        let send = self
            .client
            .post(&url)
            .header("content-type", "application/msgpack")
            .timeout(self.timeout)
            .body(body)
            .send();

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(ErrorKind::Cancelled),
            result = send => result.map_err(|err| {
                if err.is_timeout() {
                    ErrorKind::transient_with_cause("request timed out", err)
                } else {
                    ErrorKind::transient_with_cause("request failed", err)
                }
            })?,
        };

        let status = response.status();
        let bytes = response.bytes().await.map_err(|err| ErrorKind::transient_with_cause("failed reading response body", err))?;

        if status.is_server_error() {
            return Err(ErrorKind::transient(format!("server error: {status}")));
        }
        if status.is_client_error() {
            return Err(ErrorKind::permanent_rejected(format!("client error: {status}")));
        }

        rmp_serde::from_slice(&bytes).map_err(|err| ErrorKind::corrupted(err.to_string()))
    }
}

#[async_trait]
impl TransportClient for ReqwestTransportClient {
    async fn update_locations(&self, target: &MachineLocation, entries: Vec<ContentEntry>, cancel: &CancellationToken) -> Result<(), ErrorKind> {
        match self.call(target, &TrackerRequest::UpdateLocations { entries }, cancel).await? {
            TrackerResponse::Ack => Ok(()),
            TrackerResponse::Error(err) => Err(ErrorKind::permanent_rejected(err.diagnostic)),
            TrackerResponse::Locations(_) => Err(ErrorKind::corrupted("unexpected response shape")),
        }
    }

    async fn get_locations(&self, target: &MachineLocation, hashes: &[Hash], cancel: &CancellationToken) -> Result<Vec<ContentEntry>, ErrorKind> {
        match self.call(target, &TrackerRequest::GetLocations { hashes: hashes.to_vec() }, cancel).await? {
            TrackerResponse::Locations(entries) => Ok(entries),
            TrackerResponse::Error(err) => Err(ErrorKind::permanent_rejected(err.diagnostic)),
            TrackerResponse::Ack => Err(ErrorKind::corrupted("unexpected response shape")),
        }
    }
}
