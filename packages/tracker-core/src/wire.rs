//! The cluster-state JSON wire contract (§6/§8): a stable, exact-field-name
//! encoding independent of `tracker-core`'s internal representation, so the
//! internal types can evolve without breaking the contract.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::cluster_state::ClusterState;
use crate::machine::{MachineId, MachineLocation, MachineRecord, MachineState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStateWire {
    #[serde(rename = "NextMachineId")]
    pub next_machine_id: u32,
    #[serde(rename = "Records")]
    pub records: Vec<MachineRecordWire>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRecordWire {
    #[serde(rename = "Id")]
    pub id: u32,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "LastHeartbeatTimeUtc")]
    pub last_heartbeat_time_utc: String,
}

fn state_name(state: MachineState) -> &'static str {
    match state {
        MachineState::Open => "Open",
        MachineState::Closed => "Closed",
        MachineState::DeadUnavailable => "DeadUnavailable",
        MachineState::DeadExpired => "DeadExpired",
    }
}

fn parse_state_name(name: &str) -> Result<MachineState, String> {
    match name {
        "Open" => Ok(MachineState::Open),
        "Closed" => Ok(MachineState::Closed),
        "DeadUnavailable" => Ok(MachineState::DeadUnavailable),
        "DeadExpired" => Ok(MachineState::DeadExpired),
        other => Err(format!("unknown machine state {other:?}")),
    }
}

fn wire_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .expect("0001-01-01 is a valid date")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
}

/// Renders milliseconds since `0001-01-01T00:00:00Z` (see [`crate::clock::ClockSource`])
/// as an ISO-8601 timestamp with no fractional seconds and no trailing offset
/// designator, matching the `LastHeartbeatTimeUtc` shape in the wire contract.
/// A `millis` of `0` — an unregistered record's sentinel heartbeat — renders
/// as the contract's canonical `"0001-01-01T00:00:00"`.
fn format_millis(millis: i64) -> String {
    let dt = wire_epoch() + Duration::milliseconds(millis);
    dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn parse_millis(text: &str) -> Result<i64, String> {
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .map_err(|e| format!("invalid LastHeartbeatTimeUtc {text:?}: {e}"))?;
    Ok((naive - wire_epoch()).num_milliseconds())
}

impl From<&ClusterState> for ClusterStateWire {
    fn from(state: &ClusterState) -> Self {
        Self {
            next_machine_id: state.next_machine_id(),
            records: state.records().map(MachineRecordWire::from).collect(),
        }
    }
}

impl From<&MachineRecord> for MachineRecordWire {
    fn from(record: &MachineRecord) -> Self {
        Self {
            id: record.id.get(),
            location: record.location.as_str().to_string(),
            state: state_name(record.state).to_string(),
            last_heartbeat_time_utc: format_millis(record.last_heartbeat_millis),
        }
    }
}

impl ClusterStateWire {
    /// Converts the wire representation back into a live `ClusterState`.
    ///
    /// Any field this version of `tracker-core` doesn't recognize (an
    /// unexpected `State` name) is rejected rather than silently dropped,
    /// since unlike `serde`'s "unknown field" tolerance a bad enum value
    /// corrupts the liveness model if ignored.
    pub fn try_into_cluster_state(&self) -> Result<ClusterState, String> {
        let mut state = ClusterState::empty();
        for record in &self.records {
            let state_value = parse_state_name(&record.state)?;
            let millis = parse_millis(&record.last_heartbeat_time_utc)?;
            let location: MachineLocation = record.location.clone().into();
            state = state.force_register_machine(MachineId(record.id), location, millis);
            if state_value != MachineState::Open {
                let (next, _previous) = state
                    .heartbeat(MachineId(record.id), millis, state_value)
                    .map_err(|_| "force_register_machine should guarantee presence".to_string())?;
                state = next;
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_state::ClusterConfig;

    #[test]
    fn encodes_single_open_record() {
        let config = ClusterConfig::default();
        let empty = ClusterState::empty();
        let (state, _id) = empty.register_machine(&config, "grpc://node:1234/".into(), 0);

        let wire = ClusterStateWire::from(&state);
        let json = serde_json::to_string(&wire).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["NextMachineId"], 2);
        assert_eq!(parsed["Records"][0]["Id"], 1);
        assert_eq!(parsed["Records"][0]["Location"], "grpc://node:1234/");
        assert_eq!(parsed["Records"][0]["State"], "Open");
        assert_eq!(parsed["Records"][0]["LastHeartbeatTimeUtc"], "0001-01-01T00:00:00");
    }

    #[test]
    fn unknown_fields_are_ignored_on_read() {
        let json = r#"{"NextMachineId":2,"Records":[{"Id":1,"Location":"grpc://node:1234/","State":"Open","LastHeartbeatTimeUtc":"0001-01-01T00:00:00","Extra":"ignored"}]}"#;
        let wire: ClusterStateWire = serde_json::from_str(json).unwrap();
        assert_eq!(wire.next_machine_id, 2);
        assert_eq!(wire.records.len(), 1);
    }

    #[test]
    fn round_trips_through_cluster_state() {
        let config = ClusterConfig::default();
        let empty = ClusterState::empty();
        let (state, _id) = empty.register_machine(&config, "grpc://node:1234/".into(), 5_000);

        let wire = ClusterStateWire::from(&state);
        let restored = wire.try_into_cluster_state().unwrap();
        assert_eq!(ClusterStateWire::from(&restored), wire);
    }

    #[test]
    fn rejects_unknown_state_name() {
        let json = r#"{"NextMachineId":2,"Records":[{"Id":1,"Location":"grpc://node:1234/","State":"Bogus","LastHeartbeatTimeUtc":"0001-01-01T00:00:00"}]}"#;
        let wire: ClusterStateWire = serde_json::from_str(json).unwrap();
        assert!(wire.try_into_cluster_state().is_err());
    }
}
