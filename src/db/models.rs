//! Diesel model structs for the two reading kinds kept in the history store.

use diesel::prelude::*;

use crate::schema;

/// One outside-temperature sample.
#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::weather)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WeatherRow {
    pub id: i64,
    pub date: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::weather)]
pub struct NewWeatherRow<'a> {
    pub date: &'a str,
    pub temperature: f64,
}

/// One sample from a local probe. `token` names the chart channel the probe
/// publishes to.
#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::readings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SensorRow {
    pub id: i64,
    pub date: String,
    pub temperature: f64,
    pub token: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::readings)]
pub struct NewSensorRow<'a> {
    pub date: &'a str,
    pub temperature: f64,
    pub token: &'a str,
}
