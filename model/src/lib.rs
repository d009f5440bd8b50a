/// Shared data model for the ping monitor
///
/// This crate defines the values exchanged between the pinger and the
/// collector, together with their JSON wire shapes.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A monitored host as provisioned in the collector's store.
///
/// # Fields
/// * `id` - Identity assigned by the store, immutable for the process lifetime
/// * `name` - Host name, also the address the pinger probes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    #[serde(rename = "host_id")]
    pub id: i64,
    #[serde(rename = "host_name")]
    pub name: String,
}

/// Outcome of a single completed probe attempt against one host.
///
/// # Fields
/// * `host_id` - Host the probe was run against
/// * `ip` - Address the probe resolved to (may be empty when resolution failed)
/// * `time` - When the attempt started
/// * `rtt` - Round trip time, meaningful only when `success` is true
/// * `success` - Whether an echo reply arrived in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub host_id: i64,
    pub ip: String,
    pub time: DateTime<Utc>,
    #[serde(with = "duration_nanos")]
    pub rtt: Duration,
    pub success: bool,
}

/// Body of `POST /ping-results`: one batch of probe results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResultsBody {
    pub ping_results: Vec<ProbeResult>,
}

/// Borrowed form of [`PingResultsBody`] so a batch can be sent without copying it.
#[derive(Debug, Serialize)]
pub struct PingResultsRef<'a> {
    pub ping_results: &'a [ProbeResult],
}

/// Body of `GET /hosts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostsBody {
    pub hosts: Vec<Host>,
}

/// Latest known state of one host as served by the read path.
///
/// The probe fields are absent when nothing has been reported for the host yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub host_id: i64,
    pub host_name: String,
    #[serde(flatten)]
    pub last: Option<LastProbe>,
}

/// Probe fields of a [`HostStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastProbe {
    pub ip: String,
    pub time: DateTime<Utc>,
    #[serde(with = "duration_nanos")]
    pub rtt: Duration,
    pub success: bool,
}

impl From<&ProbeResult> for LastProbe {
    fn from(result: &ProbeResult) -> Self {
        Self {
            ip: result.ip.clone(),
            time: result.time,
            rtt: result.rtt,
            success: result.success,
        }
    }
}

/// Body of `GET /pub/ping-results`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatusBody {
    pub ping_results: Vec<HostStatus>,
}

// Durations travel as integer nanoseconds.
mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let nanos = u64::try_from(value.as_nanos()).map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_result() -> ProbeResult {
        ProbeResult {
            host_id: 7,
            ip: "10.0.0.7".to_string(),
            time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            rtt: Duration::from_micros(1500),
            success: true,
        }
    }

    #[test]
    fn test_batch_body_wire_shape() {
        let body = PingResultsBody {
            ping_results: vec![sample_result()],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            json!({
                "ping_results": [{
                    "host_id": 7,
                    "ip": "10.0.0.7",
                    "time": "2024-05-01T12:30:00Z",
                    "rtt": 1_500_000,
                    "success": true
                }]
            })
        );
    }

    #[test]
    fn test_host_uses_prefixed_keys() {
        let hosts: HostsBody =
            serde_json::from_str(r#"{"hosts":[{"host_id":1,"host_name":"db"}]}"#).unwrap();
        assert_eq!(
            hosts.hosts,
            vec![Host {
                id: 1,
                name: "db".to_string()
            }]
        );
    }

    #[test]
    fn test_unknown_host_status_omits_probe_fields() {
        let status = HostStatus {
            host_id: 3,
            host_name: "web".to_string(),
            last: None,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value, json!({"host_id": 3, "host_name": "web"}));

        let parsed: HostStatus = serde_json::from_value(value).unwrap();
        assert!(parsed.last.is_none());
    }

    #[test]
    fn test_known_host_status_is_flat() {
        let result = sample_result();
        let status = HostStatus {
            host_id: result.host_id,
            host_name: "web".to_string(),
            last: Some(LastProbe::from(&result)),
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["ip"], "10.0.0.7");
        assert_eq!(value["rtt"], 1_500_000);
        assert_eq!(value["success"], true);
    }

    #[test]
    fn test_rtt_rejects_negative() {
        let raw = r#"{"host_id":1,"ip":"","time":"2024-05-01T12:30:00Z","rtt":-1,"success":false}"#;
        assert!(serde_json::from_str::<ProbeResult>(raw).is_err());
    }
}
