//! Synthetic probes: a slow daily indoor curve plus jitter.

use super::{BusAddress, Sensor, SensorError};
use crate::config::Units;
use chrono::{Local, Timelike};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

const BASE_TEMP_C: f64 = 20.5;
const SEED: u64 = 0x7e49_0000_5eed_0001;

pub struct SimulatedSensor {
    address: BusAddress,
    offset_c: f64,
    rng: SmallRng,
}

impl SimulatedSensor {
    pub fn new(index: usize) -> Self {
        SimulatedSensor {
            address: BusAddress {
                bus: 0,
                ports: format!("{}", index + 1),
            },
            offset_c: index as f64 * 0.8,
            rng: SmallRng::seed_from_u64(SEED + index as u64),
        }
    }
}

pub fn enumerate(count: usize) -> Vec<Box<dyn Sensor>> {
    (0..count)
        .map(|i| Box::new(SimulatedSensor::new(i)) as Box<dyn Sensor>)
        .collect()
}

fn daily_curve(day_fraction: f64) -> f64 {
    // coolest around 05:00, warmest late afternoon
    ((day_fraction - 0.46) * 2.0 * PI).sin() * 1.5
}

impl Sensor for SimulatedSensor {
    fn address(&self) -> &BusAddress {
        &self.address
    }

    fn read(&mut self, units: Units) -> Result<f64, SensorError> {
        let now = Local::now();
        let day_fraction = f64::from(now.num_seconds_from_midnight()) / 86_400.0;
        let jitter = self.rng.random_range(-0.3..=0.3);
        let celsius = BASE_TEMP_C + self.offset_c + daily_curve(day_fraction) + jitter;
        Ok(units.convert_celsius(celsius))
    }
}
