use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A device's last reported address.
/// This is the canonical record shared by the registry daemon, its API, and the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Identifier the device registers under, e.g. "nas"
    pub hostname: String,

    /// Current network address, e.g. "192.168.1.50"
    #[serde(alias = "ip_address")]
    pub address: String,

    /// Time of the most recent accepted report, set by the registry
    #[serde(alias = "last_updated")]
    pub last_updated: DateTime<Utc>,
}

/// Body of `POST /report_ip`.
///
/// Both fields are optional at the wire level so a missing field is reported
/// as a validation error instead of a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Accepts `ip_address` for reporters written against the older field name
    #[serde(default, alias = "ip_address", skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    pub message: String,
    #[serde(flatten)]
    pub record: DeviceRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceList {
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub message: String,
    pub hostname: String,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
