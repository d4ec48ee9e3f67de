use crate::data_bus::{paths, BusValue, DataBus};
use crate::meter_client::MeterClient;
use crate::normalize::{NormalizedReading, Topology};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Outcome of the last successful publish cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LifecycleState {
    pub last_update: Option<DateTime<Utc>>,
    pub last_power: Option<f64>,
}

/// What the liveness reporter saw.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessReport {
    pub last_update: Option<DateTime<Utc>>,
    pub last_power: Option<f64>,
    pub bus_power: Option<BusValue>,
}

/// Pulls readings from a [`MeterClient`], normalizes them and writes them to the bus.
pub struct Publisher {
    client: MeterClient,
    bus: DataBus,
    state: LifecycleState,
    update_interval: Duration,
    liveness_interval: Option<Duration>,
}

impl Publisher {
    pub fn new(client: MeterClient, bus: DataBus) -> Self {
        Self {
            client,
            bus,
            state: LifecycleState::default(),
            update_interval: DEFAULT_UPDATE_INTERVAL,
            liveness_interval: Some(DEFAULT_LIVENESS_INTERVAL),
        }
    }

    pub fn with_update_interval(mut self, update_interval: Duration) -> Self {
        self.update_interval = update_interval;
        self
    }

    /// `None` or a zero duration disables liveness reporting.
    pub fn with_liveness_interval(mut self, liveness_interval: Option<Duration>) -> Self {
        self.liveness_interval = liveness_interval.filter(|d| !d.is_zero());
        self
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.state
    }

    pub fn bus(&self) -> &DataBus {
        &self.bus
    }

    /// One acquisition cycle. Returns the published topology, or `None` when the
    /// cycle was skipped; in that case the bus keeps the previous values.
    pub async fn tick(&mut self) -> Option<Topology> {
        let reading = match self.client.fetch_reading().await {
            Ok(reading) => reading,
            Err(e) => {
                error!(error = %e, "no meter data available, skipping update");
                return None;
            }
        };

        let normalized = match NormalizedReading::from_reading(&reading) {
            Ok(normalized) => normalized,
            Err(e) => {
                error!(error = %e, "discarding meter reading");
                return None;
            }
        };

        for (path, value) in normalized.bus_values() {
            self.bus.set(path, value);
        }
        self.state = LifecycleState {
            last_update: Some(Utc::now()),
            last_power: Some(normalized.power),
        };
        debug!(
            topology = ?normalized.topology,
            power = normalized.power,
            "published meter reading"
        );
        Some(normalized.topology)
    }

    /// Logs when the bus was last updated and what was published. Read-only.
    pub fn report_liveness(&self) -> LivenessReport {
        let report = LivenessReport {
            last_update: self.state.last_update,
            last_power: self.state.last_power,
            bus_power: self.bus.get(paths::AC_POWER),
        };
        info!("--- Start: sign of life ---");
        match report.last_update {
            Some(at) => info!("Last update: {at}"),
            None => info!("Last update: never"),
        }
        match report.last_power {
            Some(power) => info!("Last '{}': {power}", paths::AC_POWER),
            None => info!("Last '{}': --", paths::AC_POWER),
        }
        info!("--- End: sign of life ---");
        report
    }

    /// Change callback for writes by other bus clients: always accepted, only logged.
    pub fn on_external_write(path: &str, value: &BusValue) -> bool {
        debug!("someone else updated {path} to {value}");
        true
    }

    /// Runs the update and liveness timers on one task until the handle is stopped.
    pub fn spawn(self) -> PublisherHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut publisher = self;
            publisher.run(shutdown_rx).await;
        });
        PublisherHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    async fn run(&mut self, mut shutdown: oneshot::Receiver<()>) {
        info!(
            update_ms = self.update_interval.as_millis() as u64,
            liveness = ?self.liveness_interval,
            "starting meter publisher"
        );

        let mut update_timer = periodic(self.update_interval);
        let mut liveness_timer = self.liveness_interval.map(|period| {
            let mut timer = periodic(period);
            // The first tick of an interval fires immediately; liveness waits a full period.
            timer.reset();
            timer
        });

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = update_timer.tick() => {
                    self.tick().await;
                }
                _ = next_tick(&mut liveness_timer) => {
                    self.report_liveness();
                }
            }
        }

        info!("meter publisher stopped");
    }
}

fn periodic(period: Duration) -> Interval {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Running publisher task.
#[derive(Debug)]
pub struct PublisherHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl PublisherHandle {
    /// Stops both timers. A cycle in progress runs to completion first.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!(error = %e, "meter publisher task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
