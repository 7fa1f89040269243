use serde::Serialize;
use std::collections::BTreeMap;

use crate::aggregate::{DateCount, TopicCount};

pub const TOPICS_CANVAS: &str = "topicsChart";
pub const SESSIONS_OVER_TIME_CANVAS: &str = "sessionsOverTimeChart";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Doughnut,
    Line,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub kind: ChartKind,
    pub labels: Vec<String>,
    pub values: Vec<u64>,
}

impl ChartSeries {
    pub fn topics(topics: &[TopicCount]) -> Self {
        Self {
            kind: ChartKind::Doughnut,
            labels: topics.iter().map(|t| t.topic.clone()).collect(),
            values: topics.iter().map(|t| t.count as u64).collect(),
        }
    }

    pub fn sessions_over_time(days: &[DateCount]) -> Self {
        Self {
            kind: ChartKind::Line,
            labels: days.iter().map(|d| d.date.format("%Y-%m-%d").to_string()).collect(),
            values: days.iter().map(|d| d.count as u64).collect(),
        }
    }
}

/// One live series per canvas id.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ChartRegistry {
    charts: BTreeMap<String, ChartSeries>,
}

impl ChartRegistry {
    /// Installs `series` on `canvas` and hands back the series it displaced.
    pub fn replace(&mut self, canvas: &str, series: ChartSeries) -> Option<ChartSeries> {
        self.charts.insert(canvas.to_string(), series)
    }
}
