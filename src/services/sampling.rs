use crate::client::chart::ChartSink;
use crate::client::weather::WeatherSource;
use crate::config::Units;
use crate::db::store::{ReadingStore, StoreError};
use crate::sensors::{sensor_names, Sensor};
use crate::services::replay::{replay_history, ReplaySummary};
use crate::utils::{logged, now_timestamp};
use log::{info, warn};
use std::thread;
use std::time::Duration;

/// A probe bound to its label and chart channel for the whole run.
pub struct SensorChannel {
    pub name: String,
    pub token: String,
    pub sensor: Box<dyn Sensor>,
}

impl SensorChannel {
    /// Label the probes and pair them with channel ids in discovery order.
    /// Every probe needs a channel; surplus ids are ignored.
    pub fn bind_all(sensors: Vec<Box<dyn Sensor>>, channel_ids: &[String]) -> Result<Vec<SensorChannel>, String> {
        if sensors.len() > channel_ids.len() {
            return Err(format!(
                "Found {} sensor(s) but only {} sensor channel id(s) are configured",
                sensors.len(),
                channel_ids.len()
            ));
        }
        if channel_ids.len() > sensors.len() {
            warn!(
                "Ignoring {} sensor channel id(s) without a sensor",
                channel_ids.len() - sensors.len()
            );
        }

        let names = sensor_names(&sensors.iter().map(|s| s.address()).collect::<Vec<_>>());
        Ok(sensors
            .into_iter()
            .zip(names)
            .zip(channel_ids)
            .map(|((sensor, name), token)| {
                info!(
                    "Found sensor on bus {} at port {} as \"{}\" -> channel {}",
                    sensor.address().bus,
                    sensor.address().ports,
                    name,
                    token
                );
                SensorChannel {
                    name,
                    token: token.clone(),
                    sensor,
                }
            })
            .collect())
    }
}

/// What one tick managed to acquire, store and publish.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub timestamp: String,
    pub outside: Option<f64>,
    /// One entry per sensor, in enumeration order.
    pub sensors: Vec<(String, Option<f64>)>,
    pub stored: usize,
    pub published: usize,
    pub failures: usize,
}

impl TickReport {
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("Outside: {}", fmt_temp(self.outside))];
        parts.extend(
            self.sensors
                .iter()
                .map(|(name, value)| format!("{}: {}", name, fmt_temp(*value))),
        );
        parts.join(", ")
    }
}

fn fmt_temp(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "n/a".to_string())
}

/// Owns every collaborator of the polling loop.
pub struct Sampler<W, C> {
    store: ReadingStore,
    weather: W,
    sink: C,
    weather_channel: String,
    sensors: Vec<SensorChannel>,
    units: Units,
}

impl<W: WeatherSource, C: ChartSink> Sampler<W, C> {
    pub fn new(
        store: ReadingStore,
        weather: W,
        sink: C,
        weather_channel: String,
        sensors: Vec<SensorChannel>,
        units: Units,
    ) -> Self {
        Sampler {
            store,
            weather,
            sink,
            weather_channel,
            sensors,
            units,
        }
    }

    #[cfg(test)]
    pub fn store_mut(&mut self) -> &mut ReadingStore {
        &mut self.store
    }

    #[cfg(test)]
    pub fn sink(&self) -> &C {
        &self.sink
    }

    /// Mirror the full stored history into the chart before new data arrives.
    pub fn replay(&mut self) -> Result<ReplaySummary, StoreError> {
        let history = self.store.read_all()?;
        if history.is_empty() {
            return Ok(ReplaySummary::default());
        }
        let tokens: Vec<&str> = self.sensors.iter().map(|s| s.token.as_str()).collect();
        Ok(replay_history(&history, &mut self.sink, &self.weather_channel, &tokens))
    }

    pub fn tick(&mut self) -> TickReport {
        self.tick_at(now_timestamp())
    }

    /// One pass over every source. Each acquisition, append and publish is
    /// its own step: a failure is logged, counted and skipped, never returned.
    pub fn tick_at(&mut self, timestamp: String) -> TickReport {
        let Sampler {
            store,
            weather,
            sink,
            weather_channel,
            sensors,
            units,
        } = self;
        let ts = timestamp.as_str();
        let mut report = TickReport {
            timestamp: timestamp.clone(),
            ..TickReport::default()
        };

        match logged("Could not read outside temperature", weather.read()) {
            Some(temp) => {
                report.outside = Some(temp);
                match logged("Could not store outside temperature", store.append_weather(ts, temp)) {
                    Some(()) => report.stored += 1,
                    None => report.failures += 1,
                }
                let published = sink.publish(weather_channel.as_str(), ts, temp);
                match logged("Could not update chart with outside temperature", published) {
                    Some(()) => report.published += 1,
                    None => report.failures += 1,
                }
            }
            None => report.failures += 1,
        }

        for channel in sensors.iter_mut() {
            let Some(temp) = logged(
                format_args!("Could not read temperature from {}", channel.name),
                channel.sensor.read(*units),
            ) else {
                report.failures += 1;
                report.sensors.push((channel.name.clone(), None));
                continue;
            };
            report.sensors.push((channel.name.clone(), Some(temp)));

            let stored = store.append_sensor_reading(ts, temp, &channel.token);
            match logged(format_args!("Could not store reading from {}", channel.name), stored) {
                Some(()) => report.stored += 1,
                None => report.failures += 1,
            }
            let published = sink.publish(&channel.token, ts, temp);
            match logged(format_args!("Could not update chart for {}", channel.name), published) {
                Some(()) => report.published += 1,
                None => report.failures += 1,
            }
        }

        // a failed append still opened the tick's transaction
        if logged("Could not commit readings", store.commit()).is_none() {
            report.failures += 1;
            report.stored = 0;
        }

        info!("{}", report.summary());
        report
    }
}

/// Tick forever with a fixed delay after each tick. Only process termination
/// ends the loop.
pub fn run_loop<W: WeatherSource, C: ChartSink>(sampler: &mut Sampler<W, C>, interval: Duration) -> ! {
    info!("Starting polling every {}s", interval.as_secs());
    loop {
        sampler.tick();
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use crate::sensors::{BusAddress, SensorError};
    use std::collections::VecDeque;
    use std::path::Path;

    struct ScriptedWeather(VecDeque<Result<f64, ClientError>>);

    impl WeatherSource for ScriptedWeather {
        fn read(&mut self) -> Result<f64, ClientError> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::Transport("script exhausted".to_string())))
        }
    }

    struct ScriptedSensor {
        address: BusAddress,
        script: VecDeque<Result<f64, SensorError>>,
    }

    impl Sensor for ScriptedSensor {
        fn address(&self) -> &BusAddress {
            &self.address
        }

        fn read(&mut self, _units: Units) -> Result<f64, SensorError> {
            self.script.pop_front().unwrap_or(Err(SensorError::Timeout(Duration::from_secs(1))))
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(String, String, f64)>,
        failing_channels: Vec<String>,
    }

    impl ChartSink for Recorder {
        fn publish(&mut self, channel: &str, timestamp: &str, value: f64) -> Result<(), ClientError> {
            if self.failing_channels.iter().any(|c| c == channel) {
                return Err(ClientError::Http {
                    status: 503,
                    message: "busy".to_string(),
                });
            }
            self.calls.push((channel.to_string(), timestamp.to_string(), value));
            Ok(())
        }
    }

    fn ok_weather(values: &[f64]) -> ScriptedWeather {
        ScriptedWeather(values.iter().map(|v| Ok(*v)).collect())
    }

    fn sensor(token: &str, script: Vec<Result<f64, SensorError>>) -> SensorChannel {
        SensorChannel {
            name: format!("Sensor {}", token),
            token: token.to_string(),
            sensor: Box::new(ScriptedSensor {
                address: BusAddress {
                    bus: 1,
                    ports: token.to_string(),
                },
                script: script.into_iter().collect(),
            }),
        }
    }

    fn open_store(path: &Path) -> ReadingStore {
        ReadingStore::open(path).expect("open store").0
    }

    fn sampler(
        path: &Path,
        weather: ScriptedWeather,
        sink: Recorder,
        sensors: Vec<SensorChannel>,
    ) -> Sampler<ScriptedWeather, Recorder> {
        Sampler::new(open_store(path), weather, sink, "tok-w".to_string(), sensors, Units::Fahrenheit)
    }

    #[test]
    fn weather_failure_does_not_block_sensors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");
        let weather = ScriptedWeather(VecDeque::from(vec![Err(ClientError::Transport("timed out".to_string()))]));
        let sensors = vec![sensor("a", vec![Ok(70.5)]), sensor("b", vec![Ok(68.0)])];
        let mut s = sampler(&path, weather, Recorder::default(), sensors);

        let report = s.tick_at("2024-01-01 00:00:00.000000".to_string());

        assert_eq!(report.outside, None);
        assert_eq!(report.stored, 2);
        assert_eq!(report.published, 2);
        assert_eq!(report.failures, 1);
        assert_eq!(s.sink().calls.len(), 2);

        let history = s.store_mut().read_all().expect("read");
        assert!(history.weather.is_empty());
        assert_eq!(history.readings.len(), 2);
    }

    #[test]
    fn failing_sensor_is_skipped_and_others_continue() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");
        let sensors = vec![
            sensor("a", vec![Err(SensorError::Protocol("short response".to_string()))]),
            sensor("b", vec![Ok(68.0)]),
        ];
        let mut s = sampler(&path, ok_weather(&[41.0]), Recorder::default(), sensors);

        let report = s.tick_at("2024-01-01 00:00:00.000000".to_string());

        assert_eq!(report.sensors, vec![("Sensor a".to_string(), None), ("Sensor b".to_string(), Some(68.0))]);
        let channels: Vec<_> = s.sink().calls.iter().map(|c| c.0.as_str()).collect();
        assert_eq!(channels, vec!["tok-w", "b"]);
        let history = s.store_mut().read_all().expect("read");
        assert_eq!(history.weather.len(), 1);
        assert_eq!(history.readings.len(), 1);
        assert_eq!(history.readings[0].token, "b");
    }

    #[test]
    fn publish_failure_still_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");
        let sink = Recorder {
            failing_channels: vec!["tok-w".to_string(), "a".to_string()],
            ..Default::default()
        };
        let sensors = vec![sensor("a", vec![Ok(70.0)]), sensor("b", vec![Ok(71.0)])];
        let mut s = sampler(&path, ok_weather(&[40.0]), sink, sensors);

        let report = s.tick_at("2024-01-01 00:00:00.000000".to_string());

        assert_eq!(report.stored, 3);
        assert_eq!(report.published, 1);
        assert_eq!(report.failures, 2);
        assert_eq!(s.store_mut().read_all().expect("read").len(), 3);
    }

    #[test]
    fn row_counts_track_successful_acquisitions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");
        let weather = ScriptedWeather(VecDeque::from(vec![
            Ok(40.0),
            Err(ClientError::Transport("down".to_string())),
            Ok(42.0),
            Ok(43.0),
        ]));
        let sensors = vec![
            sensor("a", vec![Ok(1.0), Ok(2.0), Err(SensorError::Timeout(Duration::from_secs(5))), Ok(4.0)]),
            sensor("b", vec![Ok(1.0), Ok(2.0), Ok(3.0), Ok(4.0)]),
        ];
        let mut s = sampler(&path, weather, Recorder::default(), sensors);

        let timestamps: Vec<String> = (0..4).map(|i| format!("2024-01-01 00:{:02}:00.000000", i * 5)).collect();
        for ts in &timestamps {
            s.tick_at(ts.clone());
        }

        let history = s.store_mut().read_all().expect("read");
        assert_eq!(history.weather.len(), 3);
        assert_eq!(history.readings.iter().filter(|r| r.token == "a").count(), 3);
        assert_eq!(history.readings.iter().filter(|r| r.token == "b").count(), 4);
        // all readings of a tick share one timestamp
        assert!(history.readings.iter().all(|r| timestamps.contains(&r.date)));
        assert_eq!(history.weather[1].date, timestamps[2]);
    }

    const REJECT_WEATHER: &str =
        "CREATE TRIGGER reject_weather BEFORE INSERT ON weather BEGIN SELECT RAISE(ABORT, 'disk full'); END;";

    #[test]
    fn store_write_failure_does_not_block_other_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");
        let sensors = vec![sensor("a", vec![Ok(70.0)]), sensor("b", vec![Ok(71.0)])];
        let mut s = sampler(&path, ok_weather(&[40.0]), Recorder::default(), sensors);
        s.store_mut().execute_batch(REJECT_WEATHER).expect("trigger");

        let report = s.tick_at("2024-01-01 00:00:00.000000".to_string());

        assert_eq!(report.outside, Some(40.0));
        assert_eq!(report.stored, 2);
        assert_eq!(report.published, 3);
        assert_eq!(report.failures, 1);
        drop(s);

        let (mut store, count) = ReadingStore::open(&path).expect("reopen");
        assert_eq!(count, 0);
        let history = store.read_all().expect("read");
        let tokens: Vec<_> = history.readings.iter().map(|r| r.token.as_str()).collect();
        assert_eq!(tokens, vec!["a", "b"]);
    }

    #[test]
    fn tick_with_only_failed_writes_closes_its_transaction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");
        let sensors = vec![sensor("a", vec![Err(SensorError::Timeout(Duration::from_secs(5))), Ok(72.0)])];
        let mut s = sampler(&path, ok_weather(&[40.0, 41.0]), Recorder::default(), sensors);
        s.store_mut().execute_batch(REJECT_WEATHER).expect("trigger");

        let report = s.tick_at("2024-01-01 00:00:00.000000".to_string());
        assert_eq!(report.stored, 0);
        assert!(!s.store_mut().in_transaction());

        s.store_mut().execute_batch("DROP TRIGGER reject_weather;").expect("drop trigger");
        let report = s.tick_at("2024-01-01 00:05:00.000000".to_string());
        assert_eq!(report.stored, 2);
        assert!(!s.store_mut().in_transaction());
        drop(s);

        let (mut store, count) = ReadingStore::open(&path).expect("reopen");
        assert_eq!(count, 1);
        let history = store.read_all().expect("read");
        assert_eq!(history.weather[0].date, "2024-01-01 00:05:00.000000");
        assert_eq!(history.readings.len(), 1);
    }

    #[test]
    fn committed_tick_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");
        {
            let sensors = vec![sensor("a", vec![Ok(70.0)])];
            let mut s = sampler(&path, ok_weather(&[40.0]), Recorder::default(), sensors);
            s.tick_at("2024-01-01 00:00:00.000000".to_string());
        }
        let (_store, count) = ReadingStore::open(&path).expect("reopen");
        assert_eq!(count, 1);
    }

    #[test]
    fn replay_publishes_stored_history_then_ticks_append() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");
        {
            let (mut store, _) = ReadingStore::open(&path).expect("open");
            for tick in 0..3 {
                let ts = format!("2024-01-01 00:{:02}:00.000000", tick * 5);
                store.append_weather(&ts, 40.0 + f64::from(tick)).expect("weather");
                store.append_sensor_reading(&ts, 70.0, "a").expect("a");
                store.append_sensor_reading(&ts, 71.0, "b").expect("b");
                store.commit().expect("commit");
            }
        }

        let (store, count) = ReadingStore::open(&path).expect("reopen");
        assert_eq!(count, 3);
        let sensors = vec![sensor("a", vec![Ok(72.0)]), sensor("b", vec![Ok(73.0)])];
        let mut s = Sampler::new(
            store,
            ok_weather(&[44.0]),
            Recorder::default(),
            "tok-w".to_string(),
            sensors,
            Units::Fahrenheit,
        );

        let summary = s.replay().expect("replay");
        assert_eq!(summary.published, 9);
        assert_eq!(s.sink().calls.len(), 9);
        assert_eq!(s.sink().calls[0], ("tok-w".to_string(), "2024-01-01 00:00:00.000000".to_string(), 40.0));

        s.tick_at("2024-01-01 00:15:00.000000".to_string());
        assert_eq!(s.sink().calls.len(), 12);
    }

    #[test]
    fn binds_sensors_to_channels_in_discovery_order() {
        let sensors = crate::sensors::simulated::enumerate(2);
        let ids = vec!["tok-a".to_string(), "tok-b".to_string(), "tok-c".to_string()];
        let bound = SensorChannel::bind_all(sensors, &ids).expect("bind");
        let pairs: Vec<_> = bound.iter().map(|c| (c.name.as_str(), c.token.as_str())).collect();
        assert_eq!(pairs, vec![("Sensor 1 (0/1)", "tok-a"), ("Sensor 2 (0/2)", "tok-b")]);
    }

    #[test]
    fn single_sensor_is_named_plainly() {
        let sensors = crate::sensors::simulated::enumerate(1);
        let bound = SensorChannel::bind_all(sensors, &["tok-a".to_string()]).expect("bind");
        assert_eq!(bound[0].name, "Sensor");
    }

    #[test]
    fn more_sensors_than_channels_is_an_error() {
        let sensors = crate::sensors::simulated::enumerate(2);
        assert!(SensorChannel::bind_all(sensors, &["tok-a".to_string()]).is_err());
    }

    #[test]
    fn summary_lists_outside_and_each_sensor() {
        let report = TickReport {
            outside: Some(48.2),
            sensors: vec![("Sensor 1 (1/1)".to_string(), Some(70.126)), ("Sensor 2 (1/2)".to_string(), None)],
            ..TickReport::default()
        };
        assert_eq!(report.summary(), "Outside: 48.20, Sensor 1 (1/1): 70.13, Sensor 2 (1/2): n/a");
    }
}
