use crate::metrics::Metrics;
use crate::model::{iso_timestamp, DeviceConfig, LastReadings, Metric, ReadingStatus, TelemetryReading};
use crate::sensor::{Sample, SensorDriver};
use chrono::Utc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Per-metric sampling phase. A tick moves a metric `Idle -> Sampling ->
/// Published`; it returns to `Idle` at the start of the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sampling,
    Published,
}

#[derive(Debug, Clone, Copy)]
struct MetricState {
    phase: Phase,
    last_value: Option<f64>,
}

impl Default for MetricState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            last_value: None,
        }
    }
}

pub struct Sampler<D> {
    driver: D,
    metrics: Metrics,
    last_sample: Option<Instant>,
    states: [MetricState; 2],
}

impl<D: SensorDriver> Sampler<D> {
    pub fn new(driver: D, metrics: Metrics) -> Self {
        Self {
            driver,
            metrics,
            last_sample: None,
            states: [MetricState::default(); 2],
        }
    }

    pub fn phase(&self, metric: Metric) -> Phase {
        self.states[index(metric)].phase
    }

    pub fn is_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_sample {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval,
        }
    }

    /// Reads the sensor if the interval elapsed and returns one reading per
    /// metric. A failed read still yields readings, with status `error` and
    /// the last known value, so subscribers keep receiving a heartbeat.
    /// `readings` only advances on a successful read.
    pub fn tick(
        &mut self,
        now: Instant,
        config: &DeviceConfig,
        readings: &mut LastReadings,
    ) -> Vec<(Metric, TelemetryReading)> {
        for state in &mut self.states {
            if state.phase == Phase::Published {
                state.phase = Phase::Idle;
            }
        }

        let interval = Duration::from_secs(u64::from(config.sample_interval_seconds));
        if !self.is_due(now, interval) {
            return Vec::new();
        }
        self.last_sample = Some(now);

        for state in &mut self.states {
            state.phase = Phase::Sampling;
        }

        let at = Utc::now();
        let result = self.driver.read();

        let status = match result {
            Ok(Sample {
                temperature,
                humidity,
            }) => {
                debug!("Sensor read: T={:.1}°C, H={:.1}%", temperature, humidity);
                self.states[index(Metric::Temperature)].last_value = Some(temperature);
                self.states[index(Metric::Humidity)].last_value = Some(humidity);

                readings.temperature = Some(temperature);
                readings.humidity = Some(humidity);
                readings.timestamp = Some(iso_timestamp(at));
                ReadingStatus::Ok
            }
            Err(e) => {
                warn!("Sensor read failed: {}", e);
                self.metrics.sensor_faults_total.inc();
                ReadingStatus::Error
            }
        };

        Metric::ALL
            .iter()
            .map(|&metric| {
                let state = &mut self.states[index(metric)];
                state.phase = Phase::Published;
                let reading = TelemetryReading::new(
                    &config.device_id,
                    metric,
                    at,
                    state.last_value,
                    status,
                );
                (metric, reading)
            })
            .collect()
    }
}

fn index(metric: Metric) -> usize {
    match metric {
        Metric::Temperature => 0,
        Metric::Humidity => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{Error, Result};
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Result<Sample>>);

    impl SensorDriver for Scripted {
        fn read(&mut self) -> Result<Sample> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Err(Error::SensorRead("script exhausted".to_string())))
        }
    }

    fn sampler(script: Vec<Result<Sample>>) -> Sampler<Scripted> {
        Sampler::new(Scripted(script.into()), Metrics::new().unwrap())
    }

    fn sample(temperature: f64, humidity: f64) -> Result<Sample> {
        Ok(Sample {
            temperature,
            humidity,
        })
    }

    #[test]
    fn test_first_tick_samples_immediately() {
        let mut sampler = sampler(vec![sample(21.5, 40.0)]);
        let mut readings = LastReadings::default();

        let out = sampler.tick(Instant::now(), &DeviceConfig::default(), &mut readings);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, Metric::Temperature);
        assert_eq!(out[0].1.value, Some(21.5));
        assert_eq!(out[0].1.unit, "°C");
        assert_eq!(out[1].1.value, Some(40.0));
        assert_eq!(readings.temperature, Some(21.5));
        assert!(readings.timestamp.is_some());
        assert_eq!(sampler.phase(Metric::Temperature), Phase::Published);
    }

    #[test]
    fn test_interval_gates_sampling() {
        let mut sampler = sampler(vec![sample(21.5, 40.0), sample(22.0, 41.0)]);
        let mut readings = LastReadings::default();
        let config = DeviceConfig {
            sample_interval_seconds: 10,
            ..DeviceConfig::default()
        };
        let start = Instant::now();

        assert_eq!(sampler.tick(start, &config, &mut readings).len(), 2);
        assert!(sampler
            .tick(start + Duration::from_secs(9), &config, &mut readings)
            .is_empty());
        assert_eq!(sampler.phase(Metric::Humidity), Phase::Idle);

        let out = sampler.tick(start + Duration::from_secs(10), &config, &mut readings);
        assert_eq!(out[0].1.value, Some(22.0));
    }

    #[test]
    fn test_fault_reports_error_with_last_known_value() {
        let mut sampler = sampler(vec![
            sample(21.5, 40.0),
            Err(Error::SensorRead("timeout".to_string())),
        ]);
        let mut readings = LastReadings::default();
        let config = DeviceConfig {
            sample_interval_seconds: 1,
            ..DeviceConfig::default()
        };
        let start = Instant::now();

        sampler.tick(start, &config, &mut readings);
        let before = readings.clone();
        let out = sampler.tick(start + Duration::from_secs(1), &config, &mut readings);

        assert_eq!(out[0].1.status, ReadingStatus::Error);
        assert_eq!(out[0].1.value, Some(21.5));
        assert_eq!(readings, before);
        assert_eq!(sampler.metrics.sensor_faults_total.get(), 1);
    }

    #[test]
    fn test_fault_before_any_reading_has_null_value() {
        let mut sampler = sampler(vec![Err(Error::SensorRead("no sensor".to_string()))]);
        let mut readings = LastReadings::default();

        let out = sampler.tick(Instant::now(), &DeviceConfig::default(), &mut readings);

        assert_eq!(out[1].1.status, ReadingStatus::Error);
        assert_eq!(out[1].1.value, None);
        assert_eq!(readings, LastReadings::default());
    }
}
