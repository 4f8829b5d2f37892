//! Streaming chart client (Plotly REST + streaming endpoints).
//!
//! Startup: `authenticate`, then `create_channels` to (re)create the figure
//! with one streamed trace per channel, then `open` each channel once. After
//! that, [`ChartSink::publish`] appends single points.

use super::{agent, read_body, read_json, ClientError};
use crate::config::RemoteChartConfig;
use crate::models::chart::{Axis, CreatePlot, CreatePlotResponse, Figure, Layout, StreamPoint, StreamRef, Trace};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::debug;
use std::time::Duration;

const STREAM_TOKEN_HEADER: &str = "plotly-streamtoken";

/// Remote mirror of the readings; every call may fail and none is fatal.
pub trait ChartSink {
    fn publish(&mut self, channel: &str, timestamp: &str, value: f64) -> Result<(), ClientError>;
}

/// One trace of the figure. `token` is the channel identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    pub token: String,
    pub name: String,
}

pub struct PlotlyClient {
    agent: ureq::Agent,
    api_url: String,
    stream_url: String,
    authorization: String,
}

impl PlotlyClient {
    pub fn new(cfg: &RemoteChartConfig, timeout: Duration) -> Self {
        let credentials = STANDARD.encode(format!("{}:{}", cfg.username, cfg.api_key));
        PlotlyClient {
            agent: agent(timeout),
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            stream_url: cfg.stream_url.trim_end_matches('/').to_string(),
            authorization: format!("Basic {}", credentials),
        }
    }

    /// Verify the credentials.
    pub fn authenticate(&self) -> Result<(), ClientError> {
        let url = format!("{}/users/current", self.api_url);
        let resp = self
            .agent
            .get(&url)
            .header("Accept", "application/json")
            .header("Authorization", &self.authorization)
            .call()?;
        match read_body(resp) {
            Ok(_) => Ok(()),
            Err(ClientError::Http { status: 401 | 403, message }) => Err(ClientError::Auth(message)),
            Err(e) => Err(e),
        }
    }

    /// Create (or overwrite) the figure named `title`. Returns its web URL.
    pub fn create_channels(
        &self,
        channels: &[ChannelSpec],
        title: &str,
        unit_label: &str,
        max_points: u32,
    ) -> Result<String, ClientError> {
        let request = build_figure(channels, title, unit_label, max_points);
        let url = format!("{}/plots", self.api_url);
        let resp = self
            .agent
            .post(&url)
            .header("Accept", "application/json")
            .header("Authorization", &self.authorization)
            .send_json(&request)?;
        let created: CreatePlotResponse = read_json(resp)?;
        debug!("Created figure {:?}", created.file.fid);
        Ok(created.file.web_url.unwrap_or_else(|| String::from("<unknown>")))
    }

    /// Handshake on one channel's stream; a heartbeat line carries no data.
    pub fn open(&self, token: &str) -> Result<(), ClientError> {
        self.write_stream(token, "\n".to_string())
    }

    fn write_stream(&self, token: &str, body: String) -> Result<(), ClientError> {
        let resp = self
            .agent
            .post(&self.stream_url)
            .header(STREAM_TOKEN_HEADER, token)
            .header("Content-Type", "application/json")
            .send(body)?;
        read_body(resp).map(|_| ())
    }
}

impl ChartSink for PlotlyClient {
    fn publish(&mut self, channel: &str, timestamp: &str, value: f64) -> Result<(), ClientError> {
        self.write_stream(channel, stream_line(timestamp, value))
    }
}

fn build_figure<'a>(channels: &'a [ChannelSpec], title: &'a str, unit_label: &'a str, max_points: u32) -> CreatePlot<'a> {
    let data = channels
        .iter()
        .map(|c| Trace {
            kind: "scatter",
            mode: "lines",
            name: &c.name,
            x: Vec::new(),
            y: Vec::new(),
            stream: StreamRef {
                token: &c.token,
                maxpoints: max_points,
            },
        })
        .collect();
    CreatePlot {
        figure: Figure {
            data,
            layout: Layout {
                title,
                yaxis: Axis { title: unit_label },
            },
        },
        filename: title,
        world_readable: true,
    }
}

fn stream_line(timestamp: &str, value: f64) -> String {
    let point = StreamPoint { x: timestamp, y: value };
    // serializing two plain fields cannot fail
    let mut line = serde_json::to_string(&point).unwrap_or_default();
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn figure_has_one_streamed_trace_per_channel() {
        let channels = vec![
            ChannelSpec {
                token: "tok-w".to_string(),
                name: "Outside".to_string(),
            },
            ChannelSpec {
                token: "tok-a".to_string(),
                name: "Sensor".to_string(),
            },
        ];
        let request = build_figure(&channels, "Temperature", "°F", 2016);
        let json = serde_json::to_value(&request).expect("serialize");

        assert_eq!(json["filename"], "Temperature");
        assert_eq!(json["figure"]["layout"]["title"], "Temperature");
        assert_eq!(json["figure"]["layout"]["yaxis"]["title"], "°F");
        let data = json["figure"]["data"].as_array().expect("data");
        assert_eq!(data.len(), 2);
        assert_eq!(data[1]["type"], "scatter");
        assert_eq!(data[1]["name"], "Sensor");
        assert_eq!(data[1]["stream"]["token"], "tok-a");
        assert_eq!(data[1]["stream"]["maxpoints"], 2016);
    }

    #[test]
    fn stream_lines_are_newline_terminated_json() {
        let line = stream_line("2024-03-01 10:15:00.123456", 71.25);
        assert_eq!(line, "{\"x\":\"2024-03-01 10:15:00.123456\",\"y\":71.25}\n");
    }

    #[test]
    fn basic_auth_header_encodes_credentials() {
        let cfg = RemoteChartConfig {
            api_url: "https://charts.example/v2/".to_string(),
            stream_url: "https://stream.charts.example".to_string(),
            username: "user".to_string(),
            api_key: "key".to_string(),
            sensor_channel_ids: vec!["a".to_string()],
            weather_channel_id: "w".to_string(),
        };
        let client = PlotlyClient::new(&cfg, Duration::from_secs(1));
        assert_eq!(client.authorization, "Basic dXNlcjprZXk=");
        assert_eq!(client.api_url, "https://charts.example/v2");
    }
}
