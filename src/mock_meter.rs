use crate::homewizard::MeterReading;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;

pub const MOCK_SERIAL: &str = "MOCK_P1_METER_123";

const POWER_RANGE_W: Range<f64> = 800.0..1200.0;
const VOLTAGE_RANGE_V: Range<f64> = 225.0..235.0;

/// Synthesizes plausible meter readings without touching the network.
///
/// Energy counters only ever grow, so successive readings look like a real
/// cumulative register. Half of the readings carry full three-phase fields.
#[derive(Debug)]
pub struct MockMeter {
    rng: StdRng,
    import_kwh: f64,
    export_kwh: f64,
}

impl Default for MockMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMeter {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic sequence, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            import_kwh: 5000.0,
            export_kwh: 100.0,
        }
    }

    pub fn next_reading(&mut self) -> MeterReading {
        self.import_kwh += self.rng.gen_range(0.0..0.01);
        self.export_kwh += self.rng.gen_range(0.0..0.005);

        let (voltage_l1, current_l1, power_l1) = self.phase();
        let mut reading = MeterReading {
            unique_id: Some(MOCK_SERIAL.to_string()),
            active_power_w: Some(power_l1),
            active_voltage_l1_v: Some(voltage_l1),
            active_current_l1_a: Some(current_l1),
            active_power_l1_w: Some(power_l1),
            total_power_import_kwh: Some(self.import_kwh),
            total_power_export_kwh: Some(self.export_kwh),
            ..Default::default()
        };

        if self.rng.gen_bool(0.5) {
            let (voltage_l2, current_l2, power_l2) = self.phase();
            let (voltage_l3, current_l3, power_l3) = self.phase();
            reading.active_power_w = Some(power_l1 + power_l2 + power_l3);
            reading.active_voltage_l2_v = Some(Some(voltage_l2));
            reading.active_voltage_l3_v = Some(Some(voltage_l3));
            reading.active_current_l2_a = Some(current_l2);
            reading.active_current_l3_a = Some(current_l3);
            reading.active_power_l2_w = Some(power_l2);
            reading.active_power_l3_w = Some(power_l3);
        }

        tracing::debug!(
            three_phase = reading.is_three_phase(),
            "generated mock meter reading"
        );
        reading
    }

    /// One phase worth of (voltage, current, power).
    fn phase(&mut self) -> (f64, f64, f64) {
        let power = self.rng.gen_range(POWER_RANGE_W).floor();
        let voltage = self.rng.gen_range(VOLTAGE_RANGE_V);
        (voltage, power / voltage, power)
    }
}
