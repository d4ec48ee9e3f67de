use crate::data_bus::paths;
use crate::error::MeterError;
use crate::homewizard::MeterReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    SinglePhase,
    ThreePhase,
}

impl Topology {
    pub fn of(reading: &MeterReading) -> Self {
        if reading.is_three_phase() {
            Topology::ThreePhase
        } else {
            Topology::SinglePhase
        }
    }

    pub fn phase_count(self) -> usize {
        match self {
            Topology::SinglePhase => 1,
            Topology::ThreePhase => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseValues {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyTotals {
    /// Imported energy, MWh.
    pub forward: f64,
    /// Exported energy, MWh.
    pub reverse: f64,
}

/// Canonical record published each cycle.
///
/// `phases` holds exactly `topology.phase_count()` entries. `l1_energy` is only
/// set for single-phase meters, where it mirrors `energy`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReading {
    pub topology: Topology,
    pub power: f64,
    pub phases: Vec<PhaseValues>,
    pub energy: EnergyTotals,
    pub l1_energy: Option<EnergyTotals>,
}

fn require(value: Option<f64>, field: &'static str) -> Result<f64, MeterError> {
    value.ok_or(MeterError::MalformedReading(field))
}

fn kwh_to_mwh(kwh: f64) -> f64 {
    kwh / 1000.0
}

impl NormalizedReading {
    /// Validates every field the detected topology needs before anything is
    /// published, so a malformed reading never produces a partial write.
    pub fn from_reading(reading: &MeterReading) -> Result<Self, MeterError> {
        let topology = Topology::of(reading);

        let power = require(reading.active_power_w, "active_power_w")?;
        let mut phases = vec![PhaseValues {
            voltage: require(reading.active_voltage_l1_v, "active_voltage_l1_v")?,
            current: require(reading.active_current_l1_a, "active_current_l1_a")?,
            power: require(reading.active_power_l1_w, "active_power_l1_w")?,
        }];

        if topology == Topology::ThreePhase {
            phases.push(PhaseValues {
                voltage: require(reading.active_voltage_l2_v.flatten(), "active_voltage_l2_v")?,
                current: require(reading.active_current_l2_a, "active_current_l2_a")?,
                power: require(reading.active_power_l2_w, "active_power_l2_w")?,
            });
            phases.push(PhaseValues {
                voltage: require(reading.active_voltage_l3_v.flatten(), "active_voltage_l3_v")?,
                current: require(reading.active_current_l3_a, "active_current_l3_a")?,
                power: require(reading.active_power_l3_w, "active_power_l3_w")?,
            });
        }

        let energy = EnergyTotals {
            forward: kwh_to_mwh(require(
                reading.total_power_import_kwh,
                "total_power_import_kwh",
            )?),
            reverse: kwh_to_mwh(require(
                reading.total_power_export_kwh,
                "total_power_export_kwh",
            )?),
        };

        Ok(Self {
            topology,
            power,
            phases,
            energy,
            l1_energy: (topology == Topology::SinglePhase).then_some(energy),
        })
    }

    /// Every (path, value) pair this reading publishes.
    pub fn bus_values(&self) -> Vec<(&'static str, f64)> {
        let mut values = vec![
            (paths::AC_POWER, self.power),
            (paths::AC_ENERGY_FORWARD, self.energy.forward),
            (paths::AC_ENERGY_REVERSE, self.energy.reverse),
        ];
        for (index, phase) in self.phases.iter().enumerate() {
            values.push((paths::PHASE_VOLTAGE[index], phase.voltage));
            values.push((paths::PHASE_CURRENT[index], phase.current));
            values.push((paths::PHASE_POWER[index], phase.power));
        }
        if let Some(l1) = self.l1_energy {
            values.push((paths::PHASE_ENERGY_FORWARD[0], l1.forward));
            values.push((paths::PHASE_ENERGY_REVERSE[0], l1.reverse));
        }
        values
    }
}
