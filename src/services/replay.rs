use crate::client::chart::ChartSink;
use crate::db::store::History;
use crate::utils::logged;
use log::{info, warn};
use std::collections::BTreeSet;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub published: usize,
    pub failed: usize,
    /// Sensor rows whose token is not one of the current channels.
    pub skipped: usize,
}

/// Push stored history into the chart, weather first, each kind in insertion
/// order. A failed point is logged and the replay carries on.
pub fn replay_history<C: ChartSink + ?Sized>(
    history: &History,
    sink: &mut C,
    weather_channel: &str,
    sensor_tokens: &[&str],
) -> ReplaySummary {
    let known: BTreeSet<&str> = sensor_tokens.iter().copied().collect();
    let mut summary = ReplaySummary::default();
    let mut unknown: BTreeSet<&str> = BTreeSet::new();

    info!(
        "Replaying {} weather and {} sensor point(s)",
        history.weather.len(),
        history.readings.len()
    );

    for row in &history.weather {
        let result = sink.publish(weather_channel, &row.date, row.temperature);
        match logged(format_args!("Could not replay weather point {}", row.id), result) {
            Some(()) => summary.published += 1,
            None => summary.failed += 1,
        }
    }

    for row in &history.readings {
        if !known.contains(row.token.as_str()) {
            unknown.insert(row.token.as_str());
            summary.skipped += 1;
            continue;
        }
        let result = sink.publish(&row.token, &row.date, row.temperature);
        match logged(format_args!("Could not replay sensor point {}", row.id), result) {
            Some(()) => summary.published += 1,
            None => summary.failed += 1,
        }
    }

    for token in unknown {
        warn!("History has readings for channel {} which is no longer configured; not replayed", token);
    }
    info!(
        "Replay complete (published={}, failed={}, skipped={})",
        summary.published, summary.failed, summary.skipped
    );
    summary
}
