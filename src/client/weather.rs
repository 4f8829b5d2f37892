//! Outside temperature from OpenWeatherMap.
//!
//! The configured place is geocoded once at startup; each tick then asks for
//! the current weather at the resolved coordinates.

use super::{agent, read_json, ClientError};
use crate::config::{Units, WeatherConfig};
use crate::models::openweather::{CurrentWeather, GeoPlace};
use log::debug;
use std::time::Duration;

/// Source of one outside temperature per tick.
pub trait WeatherSource {
    fn read(&mut self) -> Result<f64, ClientError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl From<GeoPlace> for Location {
    fn from(place: GeoPlace) -> Self {
        let name = [Some(place.name), place.state, place.country]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ");
        Location {
            name,
            lat: place.lat,
            lon: place.lon,
        }
    }
}

pub struct OpenWeatherClient {
    agent: ureq::Agent,
    api_url: String,
    api_key: String,
    units: Units,
}

impl OpenWeatherClient {
    pub fn new(cfg: &WeatherConfig, units: Units, timeout: Duration) -> Self {
        OpenWeatherClient {
            agent: agent(timeout),
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            units,
        }
    }

    /// Geocode `place`, taking the best match.
    pub fn resolve(&self, place: &str) -> Result<Location, ClientError> {
        let url = format!("{}/geo/1.0/direct", self.api_url);
        let resp = self
            .agent
            .get(&url)
            .header("Accept", "application/json")
            .query("q", place)
            .query("limit", "1")
            .query("appid", &self.api_key)
            .call()?;
        let places: Vec<GeoPlace> = read_json(resp)?;
        places
            .into_iter()
            .next()
            .map(Location::from)
            .ok_or_else(|| ClientError::NotFound(format!("no location matches {:?}", place)))
    }

    pub fn current_temperature(&self, location: &Location) -> Result<f64, ClientError> {
        let url = format!("{}/data/2.5/weather", self.api_url);
        let resp = self
            .agent
            .get(&url)
            .header("Accept", "application/json")
            .query("lat", location.lat.to_string())
            .query("lon", location.lon.to_string())
            .query("units", units_param(self.units))
            .query("appid", &self.api_key)
            .call()?;
        let weather: CurrentWeather = read_json(resp)?;
        debug!(
            "Weather at {}: {} ({})",
            weather.name.as_deref().unwrap_or(&location.name),
            weather.main.temp,
            self.units
        );
        Ok(weather.main.temp)
    }

    pub fn located(self, location: Location) -> LocalWeather {
        LocalWeather { client: self, location }
    }
}

fn units_param(units: Units) -> &'static str {
    match units {
        Units::Fahrenheit => "imperial",
        Units::Celsius => "metric",
    }
}

/// A client bound to the location resolved at startup.
pub struct LocalWeather {
    client: OpenWeatherClient,
    location: Location,
}

impl LocalWeather {
    pub fn location(&self) -> &Location {
        &self.location
    }
}

impl WeatherSource for LocalWeather {
    fn read(&mut self) -> Result<f64, ClientError> {
        self.client.current_temperature(&self.location)
    }
}
