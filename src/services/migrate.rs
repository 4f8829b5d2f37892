//! One-shot import of the legacy flat YAML history into a history store.
//!
//! The legacy file is a list of ticks:
//!
//! ```yaml
//! - date: '2016-01-02 03:04:05.000006'
//!   weather: 41.3
//!   sensors:
//!     - {temp: 70.1, token: abc123}
//! ```
//!
//! Every entry goes through the same append and commit calls as the polling
//! loop, one commit per entry.

use crate::db::store::ReadingStore;
use log::{info, warn};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct LegacyEntry {
    date: String,
    #[serde(default)]
    weather: Option<f64>,
    #[serde(default)]
    sensors: Vec<LegacySensor>,
}

#[derive(Debug, Deserialize)]
struct LegacySensor {
    temp: f64,
    token: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MigrationSummary {
    pub entries: usize,
    pub weather_rows: usize,
    pub sensor_rows: usize,
}

pub fn run(infile: &Path, outfile: &Path) -> Result<MigrationSummary, String> {
    info!("Setting up database {}", outfile.display());
    let (mut store, existing) = ReadingStore::open(outfile).map_err(|e| e.to_string())?;
    if existing > 0 {
        warn!(
            "{} already holds {} weather row(s); imported rows are appended after them",
            outfile.display(),
            existing
        );
    }

    info!("Reading input file {}", infile.display());
    let text = fs::read_to_string(infile).map_err(|e| format!("cannot read {}: {}", infile.display(), e))?;
    let summary = import(&mut store, &text)?;
    info!(
        "Migration complete (entries={}, weather_rows={}, sensor_rows={})",
        summary.entries, summary.weather_rows, summary.sensor_rows
    );
    Ok(summary)
}

fn import(store: &mut ReadingStore, text: &str) -> Result<MigrationSummary, String> {
    let entries: Vec<LegacyEntry> =
        serde_yaml::from_str(text).map_err(|e| format!("invalid legacy history: {}", e))?;
    info!("Processing {} entries", entries.len());

    let mut summary = MigrationSummary::default();
    for (index, entry) in entries.iter().enumerate() {
        if let Some(temp) = entry.weather {
            store
                .append_weather(&entry.date, temp)
                .map_err(|e| format!("entry {}: {}", index, e))?;
            summary.weather_rows += 1;
        }
        for sensor in &entry.sensors {
            store
                .append_sensor_reading(&entry.date, sensor.temp, &sensor.token)
                .map_err(|e| format!("entry {}: {}", index, e))?;
            summary.sensor_rows += 1;
        }
        store.commit().map_err(|e| format!("entry {}: {}", index, e))?;
        summary.entries += 1;
    }
    Ok(summary)
}
