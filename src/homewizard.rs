use crate::error::MeterError;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Request timeout for a single status poll.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Path of the local status endpoint, appended to the configured base URL.
pub const DATA_ENDPOINT: &str = "/api/v1/data";

/// Thin wrapper around the P1 meter's local REST API
pub struct HomeWizardAPI {
    endpoint_url: String,
    client: reqwest::Client,
}

impl HomeWizardAPI {
    /// `endpoint_url` is the full status URL, e.g. `http://10.0.0.5/api/v1/data`.
    pub fn new(endpoint_url: impl Into<String>) -> Result<Self, MeterError> {
        Self::with_timeout(endpoint_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        endpoint_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MeterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MeterError::Connectivity(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            endpoint_url: endpoint_url.into(),
            client,
        })
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Issues one GET against the status endpoint and decodes the body.
    pub async fn read_data(&self) -> Result<MeterReading, MeterError> {
        let response = self
            .client
            .get(&self.endpoint_url)
            .send()
            .await
            .map_err(|e| MeterError::Connectivity(format!("{}: {e}", self.endpoint_url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MeterError::Connectivity(format!(
                "no response from meter at {} (HTTP {status})",
                self.endpoint_url
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| MeterError::Connectivity(format!("{}: {e}", self.endpoint_url)))?;
        MeterReading::from_body(&body)
    }
}

/// Status payload of the meter, validated once at the JSON boundary.
///
/// The L2/L3 voltage fields keep key presence apart from the value: a key sent
/// as `null` decodes to `Some(None)`, an absent key to `None`. Presence of both
/// keys is what marks a three-phase meter.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_power_w: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_voltage_l1_v: Option<f64>,
    #[serde(
        default,
        deserialize_with = "present_key",
        skip_serializing_if = "Option::is_none"
    )]
    pub active_voltage_l2_v: Option<Option<f64>>,
    #[serde(
        default,
        deserialize_with = "present_key",
        skip_serializing_if = "Option::is_none"
    )]
    pub active_voltage_l3_v: Option<Option<f64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_current_l1_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_current_l2_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_current_l3_a: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_power_l1_w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_power_l2_w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_power_l3_w: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_power_import_kwh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_power_export_kwh: Option<f64>,
}

fn present_key<'de, D>(deserializer: D) -> Result<Option<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(Some)
}

impl MeterReading {
    /// Decodes a response body. Anything but a non-empty JSON object is a format error.
    pub fn from_body(body: &[u8]) -> Result<Self, MeterError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(MeterError::Connectivity(
                "meter answered with an empty body".to_string(),
            ));
        }

        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| MeterError::Format(format!("response is not JSON: {e}")))?;
        match value {
            serde_json::Value::Object(map) if !map.is_empty() => {
                serde_json::from_value(serde_json::Value::Object(map))
                    .map_err(|e| MeterError::Format(format!("unexpected field type: {e}")))
            }
            serde_json::Value::Object(_) => {
                Err(MeterError::Format("response is an empty JSON object".to_string()))
            }
            other => Err(MeterError::Format(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// True iff both the L2 and L3 voltage keys were reported, whatever their value.
    pub fn is_three_phase(&self) -> bool {
        self.active_voltage_l2_v.is_some() && self.active_voltage_l3_v.is_some()
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
