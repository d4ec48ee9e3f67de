use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, warn};

/// Canonical measurement paths published on the bus.
pub mod paths {
    pub const AC_POWER: &str = "/Ac/Power";
    pub const AC_CURRENT: &str = "/Ac/Current";
    pub const AC_VOLTAGE: &str = "/Ac/Voltage";
    pub const AC_ENERGY_FORWARD: &str = "/Ac/Energy/Forward";
    pub const AC_ENERGY_REVERSE: &str = "/Ac/Energy/Reverse";

    /// Indexed by phase, L1 first.
    pub const PHASE_VOLTAGE: [&str; 3] = ["/Ac/L1/Voltage", "/Ac/L2/Voltage", "/Ac/L3/Voltage"];
    pub const PHASE_CURRENT: [&str; 3] = ["/Ac/L1/Current", "/Ac/L2/Current", "/Ac/L3/Current"];
    pub const PHASE_POWER: [&str; 3] = ["/Ac/L1/Power", "/Ac/L2/Power", "/Ac/L3/Power"];
    pub const PHASE_ENERGY_FORWARD: [&str; 3] = [
        "/Ac/L1/Energy/Forward",
        "/Ac/L2/Energy/Forward",
        "/Ac/L3/Energy/Forward",
    ];
    pub const PHASE_ENERGY_REVERSE: [&str; 3] = [
        "/Ac/L1/Energy/Reverse",
        "/Ac/L2/Energy/Reverse",
        "/Ac/L3/Energy/Reverse",
    ];
}

/// Unit kind of a measurement path; picks its text formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    KilowattHour,
    Ampere,
    Watt,
    Volt,
}

impl Unit {
    pub fn format(self, value: f64) -> String {
        match self {
            Unit::KilowattHour => format!("{value:.2} kWh"),
            Unit::Ampere => format!("{value:.1} A"),
            Unit::Watt => format!("{value:.1} W"),
            Unit::Volt => format!("{value:.1} V"),
        }
    }
}

/// Measurement path table: every writable path with its unit.
pub fn measurement_paths() -> Vec<(&'static str, Unit)> {
    let mut table = vec![
        (paths::AC_ENERGY_FORWARD, Unit::KilowattHour),
        (paths::AC_ENERGY_REVERSE, Unit::KilowattHour),
        (paths::AC_POWER, Unit::Watt),
        (paths::AC_CURRENT, Unit::Ampere),
        (paths::AC_VOLTAGE, Unit::Volt),
    ];
    for phase in 0..3 {
        table.push((paths::PHASE_VOLTAGE[phase], Unit::Volt));
        table.push((paths::PHASE_CURRENT[phase], Unit::Ampere));
        table.push((paths::PHASE_POWER[phase], Unit::Watt));
        table.push((paths::PHASE_ENERGY_FORWARD[phase], Unit::KilowattHour));
        table.push((paths::PHASE_ENERGY_REVERSE[phase], Unit::KilowattHour));
    }
    table
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusValue {
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
}

impl BusValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            BusValue::Float(v) => Some(*v),
            BusValue::Int(v) => Some(*v as f64),
            BusValue::Empty | BusValue::Text(_) => None,
        }
    }
}

impl fmt::Display for BusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusValue::Empty => f.write_str("--"),
            BusValue::Int(v) => write!(f, "{v}"),
            BusValue::Float(v) => write!(f, "{v}"),
            BusValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<f64> for BusValue {
    fn from(value: f64) -> Self {
        BusValue::Float(value)
    }
}

impl From<i64> for BusValue {
    fn from(value: i64) -> Self {
        BusValue::Int(value)
    }
}

impl From<&str> for BusValue {
    fn from(value: &str) -> Self {
        BusValue::Text(value.to_string())
    }
}

impl From<String> for BusValue {
    fn from(value: String) -> Self {
        BusValue::Text(value)
    }
}

/// Decides whether a write made by another bus client is accepted.
pub type ChangeCallback = Box<dyn Fn(&str, &BusValue) -> bool + Send + Sync>;

#[derive(Debug)]
struct Entry {
    value: BusValue,
    unit: Option<Unit>,
    writable: bool,
}

/// In-process, path-keyed value store standing in for the system data bus.
///
/// Cloning gives another handle onto the same store.
#[derive(Clone)]
pub struct DataBus {
    service_name: Arc<str>,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    on_change: Arc<Mutex<Option<ChangeCallback>>>,
}

impl fmt::Debug for DataBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBus")
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

impl DataBus {
    pub fn new(service_name: impl Into<String>) -> Self {
        let service_name: String = service_name.into();
        Self {
            service_name: service_name.into(),
            entries: Arc::new(Mutex::new(HashMap::new())),
            on_change: Arc::new(Mutex::new(None)),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Registers a read-only path; used for identity values set once at startup.
    pub fn add_path(&self, path: &str, value: impl Into<BusValue>) {
        self.insert(path, value.into(), None, false);
    }

    /// Registers a measurement path that other clients may also write.
    pub fn add_measurement(&self, path: &str, initial: impl Into<BusValue>, unit: Unit) {
        self.insert(path, initial.into(), Some(unit), true);
    }

    fn insert(&self, path: &str, value: BusValue, unit: Option<Unit>, writable: bool) {
        debug!(service = %self.service_name, path, %value, "adding bus path");
        self.lock_entries().insert(
            path.to_string(),
            Entry {
                value,
                unit,
                writable,
            },
        );
    }

    pub fn set_change_callback(&self, callback: ChangeCallback) {
        *self.on_change.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Owner write. Returns false when the path was never registered.
    pub fn set(&self, path: &str, value: impl Into<BusValue>) -> bool {
        match self.lock_entries().get_mut(path) {
            Some(entry) => {
                entry.value = value.into();
                true
            }
            None => {
                warn!(service = %self.service_name, path, "write to unregistered bus path");
                false
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<BusValue> {
        self.lock_entries().get(path).map(|entry| entry.value.clone())
    }

    /// Value rendered with the unit formatter of its path.
    pub fn text(&self, path: &str) -> Option<String> {
        let entries = self.lock_entries();
        let entry = entries.get(path)?;
        Some(match (entry.unit, entry.value.as_f64()) {
            (Some(unit), Some(value)) => unit.format(value),
            _ => entry.value.to_string(),
        })
    }

    /// Write coming from another bus client. Stored only if the path is
    /// writable and the change callback accepts it.
    pub fn external_write(&self, path: &str, value: impl Into<BusValue>) -> bool {
        let value = value.into();
        let writable = self
            .lock_entries()
            .get(path)
            .is_some_and(|entry| entry.writable);
        if !writable {
            debug!(service = %self.service_name, path, "rejected external write");
            return false;
        }

        // The store lock is not held while the callback runs, so it may read the bus.
        let accepted = match &*self.on_change.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(callback) => callback(path, &value),
            None => true,
        };
        if accepted {
            self.set(path, value);
        }
        accepted
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.lock_entries().keys().cloned().collect();
        paths.sort();
        paths
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn bus_with_measurements() -> DataBus {
        let bus = DataBus::new("com.victronenergy.grid.http_40");
        for (path, unit) in measurement_paths() {
            bus.add_measurement(path, 0.0, unit);
        }
        bus
    }

    #[test]
    fn test_measurement_table() {
        let table = measurement_paths();
        assert_eq!(table.len(), 20);
        assert!(table.contains(&(paths::AC_POWER, Unit::Watt)));
        assert!(table.contains(&("/Ac/L3/Energy/Reverse", Unit::KilowattHour)));
    }

    #[test]
    fn test_unit_format() {
        assert_eq!(Unit::KilowattHour.format(5.0), "5.00 kWh");
        assert_eq!(Unit::Ampere.format(4.351), "4.4 A");
        assert_eq!(Unit::Watt.format(1000.0), "1000.0 W");
        assert_eq!(Unit::Volt.format(229.96), "230.0 V");
    }

    #[test]
    fn test_set_and_get() {
        let bus = bus_with_measurements();
        assert_eq!(bus.get(paths::AC_POWER), Some(BusValue::Float(0.0)));
        assert!(bus.set(paths::AC_POWER, 1234.5));
        assert_eq!(bus.get(paths::AC_POWER), Some(BusValue::Float(1234.5)));
        assert_eq!(bus.text(paths::AC_POWER).as_deref(), Some("1234.5 W"));

        assert!(!bus.set("/Not/Registered", 1.0));
        assert_eq!(bus.get("/Not/Registered"), None);
    }

    #[test]
    fn test_clone_shares_store() {
        let bus = bus_with_measurements();
        let other = bus.clone();
        other.set(paths::PHASE_VOLTAGE[1], 231.0);
        assert_eq!(
            bus.get(paths::PHASE_VOLTAGE[1]).and_then(|v| v.as_f64()),
            Some(231.0)
        );
    }

    #[test]
    fn test_identity_paths_are_read_only() {
        let bus = DataBus::new("test");
        bus.add_path("/Serial", "abc");
        assert!(!bus.external_write("/Serial", "hacked"));
        assert_eq!(bus.get("/Serial"), Some(BusValue::Text("abc".into())));
        assert_eq!(bus.text("/Serial").as_deref(), Some("abc"));
    }

    #[test]
    fn test_external_write_goes_through_callback() {
        let bus = bus_with_measurements();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        bus.set_change_callback(Box::new(move |path, _value| {
            seen.fetch_add(1, Ordering::Relaxed);
            path != paths::AC_VOLTAGE
        }));

        assert!(bus.external_write(paths::AC_POWER, 42.0));
        assert_eq!(bus.get(paths::AC_POWER), Some(BusValue::Float(42.0)));

        assert!(!bus.external_write(paths::AC_VOLTAGE, 1.0));
        assert_eq!(bus.get(paths::AC_VOLTAGE), Some(BusValue::Float(0.0)));

        assert!(!bus.external_write("/Unknown", 1.0));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }
}
