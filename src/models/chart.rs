//! Request and response bodies of the streaming chart service.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct CreatePlot<'a> {
    pub figure: Figure<'a>,
    pub filename: &'a str,
    pub world_readable: bool,
}

#[derive(Debug, Serialize)]
pub struct Figure<'a> {
    pub data: Vec<Trace<'a>>,
    pub layout: Layout<'a>,
}

/// A scatter trace fed by a live stream.
#[derive(Debug, Serialize)]
pub struct Trace<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub mode: &'static str,
    pub name: &'a str,
    pub x: Vec<String>,
    pub y: Vec<f64>,
    pub stream: StreamRef<'a>,
}

#[derive(Debug, Serialize)]
pub struct StreamRef<'a> {
    pub token: &'a str,
    /// Points the chart keeps before dropping the oldest.
    pub maxpoints: u32,
}

#[derive(Debug, Serialize)]
pub struct Layout<'a> {
    pub title: &'a str,
    pub yaxis: Axis<'a>,
}

#[derive(Debug, Serialize)]
pub struct Axis<'a> {
    pub title: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct CreatePlotResponse {
    pub file: PlotFile,
}

#[derive(Debug, Deserialize)]
pub struct PlotFile {
    #[serde(default)]
    pub fid: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}

/// One line written to a stream.
#[derive(Debug, Serialize)]
pub struct StreamPoint<'a> {
    pub x: &'a str,
    pub y: f64,
}
