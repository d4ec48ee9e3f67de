use crate::config::{Config, Role};
use crate::data_bus::{measurement_paths, BusValue, DataBus};
use crate::error::MeterError;
use crate::homewizard::HomeWizardAPI;
use crate::meter_client::MeterClient;
use crate::mock_meter::MockMeter;
use crate::publisher::{Publisher, PublisherHandle};
use tracing::info;

pub const PRODUCT_NAME: &str = "Home Wizard Energy P1";
pub const CONNECTION: &str = "Home Wizard Energy P1 HTTP JSON service";
pub const PRODUCT_ID_PVINVERTER: i64 = 0xA144;
pub const PRODUCT_ID_GRID: i64 = 45069;
/// ET340 energy meter
pub const DEVICE_TYPE: i64 = 345;
pub const FIRMWARE_VERSION: f64 = 0.2;

/// Bus service name, e.g. `com.victronenergy.grid.http_40`.
pub fn service_name(role: Role, device_instance: u32) -> String {
    format!("com.victronenergy.{}.http_{device_instance:02}", role.as_str())
}

pub fn product_id(role: Role) -> i64 {
    match role {
        Role::PvInverter => PRODUCT_ID_PVINVERTER,
        Role::Grid => PRODUCT_ID_GRID,
    }
}

/// HTTP client for the configured meter, or the synthetic one when `mock` is set.
pub fn build_client(config: &Config, mock: bool) -> Result<MeterClient, MeterError> {
    if mock {
        info!("Using mock meter data");
        return Ok(MeterClient::mock(MockMeter::new()));
    }
    Ok(MeterClient::new(HomeWizardAPI::new(config.api_url())?))
}

/// Registers the identity and management paths that are set once at startup.
pub fn register_identity(bus: &DataBus, config: &Config, serial: &str) {
    bus.add_path("/Mgmt/ProcessName", env!("CARGO_PKG_NAME"));
    bus.add_path(
        "/Mgmt/ProcessVersion",
        format!("Version {}", env!("CARGO_PKG_VERSION")),
    );
    bus.add_path("/Mgmt/Connection", CONNECTION);

    bus.add_path("/DeviceInstance", i64::from(config.device_instance));
    bus.add_path("/ProductId", product_id(config.role));
    bus.add_path("/DeviceType", DEVICE_TYPE);
    bus.add_path("/ProductName", PRODUCT_NAME);
    bus.add_path("/CustomName", config.custom_name.as_str());
    bus.add_path("/Latency", BusValue::Empty);
    bus.add_path("/FirmwareVersion", FIRMWARE_VERSION);
    bus.add_path("/HardwareVersion", 0_i64);
    bus.add_path("/Connected", 1_i64);
    bus.add_path("/Role", config.role.as_str());
    bus.add_path("/Position", config.position);
    bus.add_path("/Serial", serial);
    bus.add_path("/UpdateIndex", 0_i64);
}

/// The running bridge: bus with every path registered plus the publisher task.
#[derive(Debug)]
pub struct MeterService {
    bus: DataBus,
    publisher: PublisherHandle,
}

impl MeterService {
    /// Discovers the meter serial, registers all bus paths and starts the timers.
    pub async fn start(config: &Config, mut client: MeterClient) -> Self {
        let bus = DataBus::new(service_name(config.role, config.device_instance));
        info!(service = bus.service_name(), "Initializing meter service");

        let serial = client.meter_serial().await;
        info!(%serial, "Meter serial");
        register_identity(&bus, config, &serial);

        for (path, unit) in measurement_paths() {
            bus.add_measurement(path, 0.0, unit);
        }
        bus.set_change_callback(Box::new(Publisher::on_external_write));

        let publisher = Publisher::new(client, bus.clone())
            .with_update_interval(config.update_interval)
            .with_liveness_interval(config.liveness_interval())
            .spawn();

        Self { bus, publisher }
    }

    pub fn bus(&self) -> &DataBus {
        &self.bus
    }

    pub async fn stop(self) {
        info!(service = self.bus.service_name(), "Stopping meter service");
        self.publisher.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_bus::paths;
    use crate::meter_client::UNKNOWN_SERIAL;
    use std::time::Duration;

    fn config(role: &str) -> Config {
        Config::from_toml(
            &format!(
                r#"
                [general]
                access_type = "OnPremise"
                device_instance = 7
                role = "{role}"
                position = 2
                update_interval_ms = 10
                [onpremise]
                host = "127.0.0.1:1"
                "#
            ),
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_service_name_and_product_id() {
        assert_eq!(service_name(Role::Grid, 7), "com.victronenergy.grid.http_07");
        assert_eq!(
            service_name(Role::PvInverter, 123),
            "com.victronenergy.pvinverter.http_123"
        );
        assert_eq!(product_id(Role::PvInverter), 0xA144);
        assert_eq!(product_id(Role::Grid), 45069);
    }

    #[test]
    fn test_register_identity() {
        let config = config("pvinverter");
        let bus = DataBus::new("test");
        register_identity(&bus, &config, "abc123");

        assert_eq!(bus.get("/Serial"), Some(BusValue::Text("abc123".into())));
        assert_eq!(bus.get("/ProductId"), Some(BusValue::Int(0xA144)));
        assert_eq!(bus.get("/DeviceInstance"), Some(BusValue::Int(7)));
        assert_eq!(bus.get("/Position"), Some(BusValue::Int(2)));
        assert_eq!(bus.get("/Role"), Some(BusValue::Text("pvinverter".into())));
        assert_eq!(bus.get("/Latency"), Some(BusValue::Empty));
        assert_eq!(bus.get("/Connected"), Some(BusValue::Int(1)));
    }

    #[tokio::test]
    async fn test_start_with_mock_meter() {
        let config = config("grid");
        let client = build_client(&config, true).unwrap();
        let service = MeterService::start(&config, client).await;

        assert_eq!(service.bus().service_name(), "com.victronenergy.grid.http_07");
        assert_eq!(
            service.bus().get("/Serial"),
            Some(BusValue::Text(crate::mock_meter::MOCK_SERIAL.into()))
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let power = service
            .bus()
            .get(paths::AC_POWER)
            .and_then(|v| v.as_f64())
            .unwrap();
        assert!(power > 0.0);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_start_with_unreachable_meter() {
        let config = config("grid");
        let client = build_client(&config, false).unwrap();
        let service = MeterService::start(&config, client).await;

        assert_eq!(
            service.bus().get("/Serial"),
            Some(BusValue::Text(UNKNOWN_SERIAL.into()))
        );
        assert_eq!(
            service.bus().get(paths::AC_POWER),
            Some(BusValue::Float(0.0))
        );
        service.stop().await;
    }
}
