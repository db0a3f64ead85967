use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// The metric series exported for every monitored database service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    DiskUsage,
    LoadAverage,
    MemUsage,
    DiskioWrites,
    MemAvailable,
    CpuUsage,
    DiskioReads,
    NetSend,
    NetReceive,
}

impl MetricKind {
    pub const ALL: [MetricKind; 9] = [
        MetricKind::DiskUsage,
        MetricKind::LoadAverage,
        MetricKind::MemUsage,
        MetricKind::DiskioWrites,
        MetricKind::MemAvailable,
        MetricKind::CpuUsage,
        MetricKind::DiskioReads,
        MetricKind::NetSend,
        MetricKind::NetReceive,
    ];

    /// Key under `metrics` in the service metrics API response.
    pub fn api_key(self) -> &'static str {
        match self {
            MetricKind::DiskUsage => "disk_usage",
            MetricKind::LoadAverage => "load_average",
            MetricKind::MemUsage => "mem_usage",
            MetricKind::DiskioWrites => "diskio_writes",
            MetricKind::MemAvailable => "mem_available",
            MetricKind::CpuUsage => "cpu_usage",
            MetricKind::DiskioReads => "diskio_read",
            MetricKind::NetSend => "net_send",
            MetricKind::NetReceive => "net_receive",
        }
    }

    /// Name of the exported gauge.
    pub fn gauge_name(self) -> &'static str {
        match self {
            MetricKind::DiskUsage => "dbaas_disk_usage",
            MetricKind::LoadAverage => "dbaas_load_average",
            MetricKind::MemUsage => "dbaas_memory_usage",
            MetricKind::DiskioWrites => "dbaas_disk_io_writes",
            MetricKind::MemAvailable => "dbaas_memory_available",
            MetricKind::CpuUsage => "dbaas_cpu_usage",
            MetricKind::DiskioReads => "dbaas_disk_io_reads",
            MetricKind::NetSend => "dbaas_network_transmit_bytes_per_sec",
            MetricKind::NetReceive => "dbaas_network_receive_bytes_per_sec",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            MetricKind::DiskUsage => "Disk space usage percentage",
            MetricKind::LoadAverage => "Load average (5 min)",
            MetricKind::MemUsage => "Memory usage percentage",
            MetricKind::DiskioWrites => "Disk IOPS (writes)",
            MetricKind::MemAvailable => "Memory available percentage",
            MetricKind::CpuUsage => "CPU usage percentage",
            MetricKind::DiskioReads => "Disk IOPS (reads)",
            MetricKind::NetSend => "Network transmit (bytes/s)",
            MetricKind::NetReceive => "Network receive (bytes/s)",
        }
    }
}

/// Service metrics API response: a `metrics` map of series, each carrying
/// time/value rows ordered oldest first.
#[derive(Deserialize, Debug)]
pub struct MetricsResponse {
    pub metrics: HashMap<String, MetricSeries>,
}

#[derive(Deserialize, Debug)]
pub struct MetricSeries {
    pub data: SeriesData,
}

#[derive(Deserialize, Debug)]
pub struct SeriesData {
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("metric `{0}` missing from response")]
    MissingMetric(&'static str),
    #[error("metric `{0}` has no rows")]
    NoRows(&'static str),
    #[error("metric `{0}` last row has no numeric value")]
    NotANumber(&'static str),
}

/// Latest sample of every metric for one database, extracted from a single
/// API response. Values are indexed by `MetricKind` declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMetrics {
    values: [f64; 9],
}

impl ServiceMetrics {
    /// Reduce a response to the latest sample per metric: the last row of
    /// each series, second element. Extraction is all-or-nothing so a
    /// partially usable response never updates a subset of the gauges.
    pub fn from_response(response: &MetricsResponse) -> Result<ServiceMetrics, ShapeError> {
        let mut values = [0.0; 9];
        for kind in MetricKind::ALL {
            let key = kind.api_key();
            let series = response
                .metrics
                .get(key)
                .ok_or(ShapeError::MissingMetric(key))?;
            let row = series.data.rows.last().ok_or(ShapeError::NoRows(key))?;
            let value = row
                .get(1)
                .and_then(Value::as_f64)
                .ok_or(ShapeError::NotANumber(key))?;
            values[kind as usize] = value;
        }
        Ok(ServiceMetrics { values })
    }

    pub fn get(&self, kind: MetricKind) -> f64 {
        self.values[kind as usize]
    }

    #[cfg(test)]
    pub(crate) fn constant(value: f64) -> ServiceMetrics {
        ServiceMetrics { values: [value; 9] }
    }
}
