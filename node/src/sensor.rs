use crate::errors::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

/// One DHT conversion: both metrics come from the same read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub temperature: f64,
    pub humidity: f64,
}

/// Bus driver for the temperature/humidity sensor. A read returns within the
/// sensor's native conversion time.
pub trait SensorDriver: Send {
    fn read(&mut self) -> Result<Sample>;
}

/// Host stand-in for a DHT sensor on `pin`: plausible indoor values with a
/// slow drift and the occasional checksum failure real DHT parts produce.
pub struct SimulatedDht {
    pin: u8,
    rng: StdRng,
    temperature: f64,
    humidity: f64,
    fault_rate: f64,
}

impl SimulatedDht {
    pub fn new(pin: u8) -> Self {
        info!("Simulated DHT sensor attached to GP{}", pin);
        Self::with_rng(pin, StdRng::from_entropy())
    }

    pub fn with_rng(pin: u8, mut rng: StdRng) -> Self {
        let temperature = rng.gen_range(18.0..26.0);
        let humidity = rng.gen_range(35.0..60.0);
        Self {
            pin,
            rng,
            temperature,
            humidity,
            fault_rate: 0.05,
        }
    }

    pub fn with_fault_rate(mut self, fault_rate: f64) -> Self {
        self.fault_rate = fault_rate.clamp(0.0, 1.0);
        self
    }
}

impl SensorDriver for SimulatedDht {
    fn read(&mut self) -> Result<Sample> {
        if self.rng.gen_bool(self.fault_rate) {
            return Err(Error::SensorRead(format!(
                "checksum mismatch on GP{}",
                self.pin
            )));
        }

        self.temperature = (self.temperature + self.rng.gen_range(-0.3..0.3)).clamp(-40.0, 80.0);
        self.humidity = (self.humidity + self.rng.gen_range(-1.0..1.0)).clamp(0.0, 100.0);

        // DHT resolution is one decimal
        Ok(Sample {
            temperature: (self.temperature * 10.0).round() / 10.0,
            humidity: (self.humidity * 10.0).round() / 10.0,
        })
    }
}
