use crate::error::MeterError;
use crate::homewizard::{HomeWizardAPI, MeterReading};
use crate::mock_meter::MockMeter;
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

/// Serial reported when the meter cannot tell us its own.
pub const UNKNOWN_SERIAL: &str = "Unknown_P1_Meter";

/// Last reading that was fetched and decoded successfully.
#[derive(Debug, Clone)]
pub struct CachedReading {
    pub reading: MeterReading,
    pub received_at: DateTime<Utc>,
}

enum Source {
    Http(HomeWizardAPI),
    Mock(MockMeter),
}

/// Fetches readings from one P1 meter and masks transient failures behind the
/// last good reading.
pub struct MeterClient {
    source: Source,
    cache: Option<CachedReading>,
}

impl MeterClient {
    pub fn new(api: HomeWizardAPI) -> Self {
        Self {
            source: Source::Http(api),
            cache: None,
        }
    }

    /// Client answering from synthesized data; never use outside development.
    pub fn mock(meter: MockMeter) -> Self {
        Self {
            source: Source::Mock(meter),
            cache: None,
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self.source, Source::Mock(_))
    }

    pub fn cached_reading(&self) -> Option<&CachedReading> {
        self.cache.as_ref()
    }

    /// Returns a fresh reading, or the cached one when the meter cannot be
    /// reached or answers garbage. Errors only propagate while nothing is cached.
    pub async fn fetch_reading(&mut self) -> Result<MeterReading, MeterError> {
        let fetched = match &mut self.source {
            Source::Mock(meter) => Ok(meter.next_reading()),
            Source::Http(api) => {
                debug!(url = api.endpoint_url(), "requesting meter data");
                api.read_data().await
            }
        };

        match fetched {
            Ok(reading) => {
                self.cache = Some(CachedReading {
                    reading: reading.clone(),
                    received_at: Utc::now(),
                });
                debug!("meter data retrieved");
                Ok(reading)
            }
            Err(e) => match &self.cache {
                Some(cached) if e.is_recoverable_from_cache() => {
                    warn!(
                        error = %e,
                        cached_at = %cached.received_at,
                        "meter fetch failed, using cached reading"
                    );
                    Ok(cached.reading.clone())
                }
                _ => {
                    error!(error = %e, "meter fetch failed and no cached reading is available");
                    Err(e)
                }
            },
        }
    }

    /// Serial number of the meter. Never fails: falls back to [`UNKNOWN_SERIAL`].
    pub async fn meter_serial(&mut self) -> String {
        match self.fetch_reading().await {
            Ok(reading) => match reading.unique_id {
                Some(id) if !id.is_empty() => id,
                _ => {
                    warn!("meter response does not contain 'unique_id', using default");
                    UNKNOWN_SERIAL.to_string()
                }
            },
            Err(e) => {
                error!(error = %e, "error getting meter serial");
                UNKNOWN_SERIAL.to_string()
            }
        }
    }

    /// Whether `reading` comes from a three-phase meter.
    pub fn is_three_phase(reading: &MeterReading) -> bool {
        reading.is_three_phase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homewizard::DATA_ENDPOINT;

    const GOOD_BODY: &str = r#"{
        "unique_id": "5c2fafabcdef",
        "active_power_w": 1000,
        "active_voltage_l1_v": 230,
        "active_current_l1_a": 4.35,
        "active_power_l1_w": 1000,
        "total_power_import_kwh": 5000,
        "total_power_export_kwh": 100
    }"#;

    fn client_for(server: &mockito::ServerGuard) -> MeterClient {
        let api = HomeWizardAPI::new(format!("{}{}", server.url(), DATA_ENDPOINT)).unwrap();
        MeterClient::new(api)
    }

    #[tokio::test]
    async fn test_failures_after_success_return_cached_reading() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", DATA_ENDPOINT)
            .with_status(200)
            .with_body(GOOD_BODY)
            .expect(1)
            .create_async()
            .await;

        let mut client = client_for(&server);
        let first = client.fetch_reading().await.unwrap();
        ok.assert_async().await;
        ok.remove_async().await;

        let failing = server
            .mock("GET", DATA_ENDPOINT)
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let second = client.fetch_reading().await.unwrap();
        let third = client.fetch_reading().await.unwrap();
        failing.assert_async().await;

        assert_eq!(second, first);
        assert_eq!(third, first);
        assert_eq!(client.cached_reading().unwrap().reading, first);
    }

    #[tokio::test]
    async fn test_format_error_falls_back_to_cache() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", DATA_ENDPOINT)
            .with_status(200)
            .with_body(GOOD_BODY)
            .create_async()
            .await;

        let mut client = client_for(&server);
        let first = client.fetch_reading().await.unwrap();
        let cached_at = client.cached_reading().unwrap().received_at;
        ok.remove_async().await;

        let _garbage = server
            .mock("GET", DATA_ENDPOINT)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        assert_eq!(client.fetch_reading().await.unwrap(), first);
        assert_eq!(client.cached_reading().unwrap().received_at, cached_at);
    }

    #[tokio::test]
    async fn test_first_failure_propagates_and_serial_falls_back() {
        let mut server = mockito::Server::new_async().await;
        let _failing = server
            .mock("GET", DATA_ENDPOINT)
            .with_status(500)
            .create_async()
            .await;

        let mut client = client_for(&server);
        let err = client.fetch_reading().await.unwrap_err();
        assert!(matches!(err, MeterError::Connectivity(_)));
        assert!(client.cached_reading().is_none());

        assert_eq!(client.meter_serial().await, UNKNOWN_SERIAL);
    }

    #[tokio::test]
    async fn test_format_error_without_cache_is_distinct() {
        let mut server = mockito::Server::new_async().await;
        let _garbage = server
            .mock("GET", DATA_ENDPOINT)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let mut client = client_for(&server);
        let err = client.fetch_reading().await.unwrap_err();
        assert!(matches!(err, MeterError::Format(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_meter_serial() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("GET", DATA_ENDPOINT)
            .with_status(200)
            .with_body(GOOD_BODY)
            .create_async()
            .await;

        let mut client = client_for(&server);
        assert_eq!(client.meter_serial().await, "5c2fafabcdef");
    }

    #[tokio::test]
    async fn test_meter_serial_missing_or_empty_id() {
        for body in [
            r#"{"active_power_w": 10}"#,
            r#"{"unique_id": "", "active_power_w": 10}"#,
        ] {
            let mut server = mockito::Server::new_async().await;
            let _ok = server
                .mock("GET", DATA_ENDPOINT)
                .with_status(200)
                .with_body(body)
                .create_async()
                .await;

            let mut client = client_for(&server);
            assert_eq!(client.meter_serial().await, UNKNOWN_SERIAL);
        }
    }

    #[test]
    fn test_mock_client_never_touches_network() {
        let mut client = MeterClient::mock(MockMeter::with_seed(3));
        assert!(client.is_mock());
        tokio_test::block_on(async {
            let reading = client.fetch_reading().await.unwrap();
            assert!(reading.active_power_w.is_some());
            assert_eq!(client.meter_serial().await, crate::mock_meter::MOCK_SERIAL);
        });
        assert!(client.cached_reading().is_some());
    }

    #[test]
    fn test_is_three_phase_is_pure() {
        let reading = MeterReading {
            active_voltage_l2_v: Some(Some(0.0)),
            active_voltage_l3_v: Some(Some(0.0)),
            ..Default::default()
        };
        let before = reading.clone();
        assert!(MeterClient::is_three_phase(&reading));
        assert!(MeterClient::is_three_phase(&reading));
        assert_eq!(reading, before);
    }
}
