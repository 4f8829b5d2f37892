//! Runtime configuration loaded once at startup from a YAML file.

use clap::ValueEnum;
use log::warn;
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;
use std::{fmt, fs};

pub const DEFAULT_GRAPH_TITLE: &str = "Temperature";
/// Keep a week's worth of measurements on the chart.
pub const DEFAULT_RETENTION_DAYS: u32 = 7;
/// Measure every 5 minutes.
pub const DEFAULT_FREQUENCY_MINUTES: i64 = 5;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SENSOR_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CHART_API_URL: &str = "https://api.plot.ly/v2";
pub const DEFAULT_CHART_STREAM_URL: &str = "https://stream.plot.ly";
pub const DEFAULT_WEATHER_API_URL: &str = "https://api.openweathermap.org";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Fahrenheit,
    Celsius,
}

impl Units {
    pub fn convert_celsius(self, celsius: f64) -> f64 {
        match self {
            Units::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
            Units::Celsius => celsius,
        }
    }

    /// Axis label for the chart.
    pub fn label(self) -> &'static str {
        match self {
            Units::Fahrenheit => "°F",
            Units::Celsius => "°C",
        }
    }
}

impl Display for Units {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Units::Fahrenheit => f.write_str("fahrenheit"),
            Units::Celsius => f.write_str("celsius"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteChartConfig {
    #[serde(default = "default_chart_api_url")]
    pub api_url: String,
    #[serde(default = "default_chart_stream_url")]
    pub stream_url: String,
    pub username: String,
    pub api_key: String,
    /// One channel per sensor, in discovery order.
    pub sensor_channel_ids: Vec<String>,
    pub weather_channel_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WeatherConfig {
    #[serde(default = "default_weather_api_url")]
    pub api_url: String,
    pub api_key: String,
    /// Free-form location, e.g. "Atlanta,GA,US".
    pub place: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SensorBackend {
    /// TEMPer USB probes via hidraw.
    #[default]
    Temper,
    /// Synthetic probes for running without hardware.
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SensorsConfig {
    #[serde(default)]
    pub backend: SensorBackend,
    #[serde(default = "default_simulated_count")]
    pub simulated_count: usize,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        SensorsConfig {
            backend: SensorBackend::default(),
            simulated_count: default_simulated_count(),
        }
    }
}

/// On-disk layout; [`Config`] is the validated form.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
    remote_chart: RemoteChartConfig,
    weather: WeatherConfig,
    #[serde(default)]
    sensors: SensorsConfig,
    #[serde(default = "default_graph_title")]
    graph_title: String,
    #[serde(default = "default_retention")]
    retention_period: u32,
    #[serde(default = "default_frequency")]
    frequency: i64,
    #[serde(default)]
    units: Units,
    #[serde(default = "default_http_timeout")]
    http_timeout: u64,
    #[serde(default = "default_sensor_timeout")]
    sensor_timeout: u64,
}

fn default_chart_api_url() -> String {
    DEFAULT_CHART_API_URL.to_string()
}
fn default_chart_stream_url() -> String {
    DEFAULT_CHART_STREAM_URL.to_string()
}
fn default_weather_api_url() -> String {
    DEFAULT_WEATHER_API_URL.to_string()
}
fn default_graph_title() -> String {
    DEFAULT_GRAPH_TITLE.to_string()
}
fn default_retention() -> u32 {
    DEFAULT_RETENTION_DAYS
}
fn default_frequency() -> i64 {
    DEFAULT_FREQUENCY_MINUTES
}
fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}
fn default_sensor_timeout() -> u64 {
    DEFAULT_SENSOR_TIMEOUT_SECS
}
fn default_simulated_count() -> usize {
    2
}

#[derive(Debug, Clone)]
pub struct Config {
    pub remote_chart: RemoteChartConfig,
    pub weather: WeatherConfig,
    pub sensors: SensorsConfig,
    pub graph_title: String,
    /// Days of history the chart keeps on screen.
    pub retention_days: u32,
    /// Minutes between ticks, at least 1.
    pub frequency_minutes: u32,
    pub units: Units,
    /// Upper bound for any single weather or chart request.
    pub http_timeout: Duration,
    /// Upper bound for a single probe read.
    pub sensor_timeout: Duration,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = fs::read_to_string(path).map_err(|e| format!("cannot read config {}: {}", path.display(), e))?;
        Self::from_yaml_str(&text).map_err(|e| format!("{}: {}", path.display(), e))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, String> {
        let raw: RawConfig = serde_yaml::from_str(text).map_err(|e| format!("invalid configuration: {}", e))?;

        let frequency_minutes = if raw.frequency < 1 {
            warn!("Cannot poll more often than 1 minute (frequency={})", raw.frequency);
            1
        } else {
            u32::try_from(raw.frequency).map_err(|_| format!("frequency {} is too large", raw.frequency))?
        };

        if raw.remote_chart.sensor_channel_ids.is_empty() {
            return Err("remote-chart.sensor-channel-ids must list at least one channel".to_string());
        }

        Ok(Config {
            remote_chart: raw.remote_chart,
            weather: raw.weather,
            sensors: raw.sensors,
            graph_title: raw.graph_title,
            retention_days: raw.retention_period,
            frequency_minutes,
            units: raw.units,
            http_timeout: Duration::from_secs(raw.http_timeout),
            sensor_timeout: Duration::from_secs(raw.sensor_timeout),
        })
    }

    /// Fixed delay between the end of one tick and the start of the next.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.frequency_minutes) * 60)
    }

    /// Points each chart channel keeps, enough to cover the retention period.
    pub fn max_points(&self) -> u32 {
        (60 / self.frequency_minutes)
            .max(1)
            .saturating_mul(24)
            .saturating_mul(self.retention_days)
    }
}
