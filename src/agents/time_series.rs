// Time-Series Agent: recent measurements / anomaly flags for named sensors.
// Mock-capable; a real backend speaks the same JSON-RPC/SSE protocol as the
// maintenance agent and returns the identical shape with `is_mock = false`.

use crate::agents::NamedAgent;
use crate::state::{Anomaly, GraphResult, Measurement, TimeSeriesResult};
use crate::tool_protocol::ToolSession;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;

const MAX_SENSORS: usize = 20;
const SAMPLES_PER_SENSOR: usize = 5;
const ANOMALY_PROBABILITY: f64 = 0.2;
const TOOL_NAME: &str = "get_recent_measurements";

/// Selects between the synthetic generator and a real backend without
/// changing the data contract: a single configuration flag, not two
/// different agent types.
#[derive(Clone, Copy)]
pub enum Backend<'a> {
    Mock,
    Real(&'a dyn ToolSession),
}

pub struct TimeSeriesAgent<'a> {
    backend: Backend<'a>,
}

impl<'a> NamedAgent for TimeSeriesAgent<'a> {
    fn name(&self) -> &'static str {
        "time_series_agent"
    }
}

impl<'a> TimeSeriesAgent<'a> {
    pub fn new(backend: Backend<'a>) -> Self {
        TimeSeriesAgent { backend }
    }

    /// Consumes up to the first 20 sensor names from graph rows.
    pub async fn execute(&self, graph_result: &GraphResult) -> TimeSeriesResult {
        let sensors = graph_sensor_names(graph_result, MAX_SENSORS);

        match &self.backend {
            Backend::Mock => Self::mock_result(&sensors),
            Backend::Real(tools) => Self::real_result(*tools, &sensors).await,
        }
    }

    fn mock_result(sensors: &[String]) -> TimeSeriesResult {
        let mut rng = rand::thread_rng();
        let mut measurements = Vec::new();
        let mut anomalies = Vec::new();
        let now = Utc::now();

        for sensor in sensors {
            let unit = infer_unit(sensor);
            for i in 0..SAMPLES_PER_SENSOR {
                let timestamp = now - ChronoDuration::minutes(5 * (SAMPLES_PER_SENSOR - i) as i64);
                let value = synthetic_value(&mut rng, &unit);
                let is_anomalous = rng.gen_bool(ANOMALY_PROBABILITY);
                let value = if is_anomalous {
                    value * 3.0
                } else {
                    value
                };

                measurements.push(Measurement {
                    sensor_name: sensor.clone(),
                    timestamp,
                    value,
                    unit: unit.clone(),
                });

                if is_anomalous {
                    anomalies.push(Anomaly {
                        sensor_name: sensor.clone(),
                        timestamp,
                        kind: if i % 2 == 0 {
                            "spike".to_string()
                        } else {
                            "out_of_range".to_string()
                        },
                    });
                }
            }
        }

        TimeSeriesResult {
            measurements,
            anomalies,
            is_mock: true,
            error: None,
        }
    }

    async fn real_result(tools: &dyn ToolSession, sensors: &[String]) -> TimeSeriesResult {
        #[derive(Deserialize)]
        struct WireSample {
            timestamp: chrono::DateTime<Utc>,
            value: f64,
            unit: String,
            #[serde(default)]
            anomalous: bool,
            #[serde(default)]
            anomaly_kind: Option<String>,
        }

        let mut measurements = Vec::new();
        let mut anomalies = Vec::new();
        let mut errors = Vec::new();

        for sensor in sensors {
            let args = json!({ "sensor_name": sensor });
            match tools.call_tool(TOOL_NAME, args).await {
                Ok(value) => {
                    let samples: Vec<WireSample> = match serde_json::from_value(value) {
                        Ok(s) => s,
                        Err(_) => continue,
                    };
                    for sample in samples {
                        if sample.anomalous {
                            anomalies.push(Anomaly {
                                sensor_name: sensor.clone(),
                                timestamp: sample.timestamp,
                                kind: sample.anomaly_kind.unwrap_or_else(|| "unknown".to_string()),
                            });
                        }
                        measurements.push(Measurement {
                            sensor_name: sensor.clone(),
                            timestamp: sample.timestamp,
                            value: sample.value,
                            unit: sample.unit,
                        });
                    }
                }
                Err(e) => errors.push(format!("{sensor}: {e}")),
            }
        }

        TimeSeriesResult {
            measurements,
            anomalies,
            is_mock: false,
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        }
    }
}

/// Unit inferred from the sensor tag's function-code letter:
/// `T*` -> °C, `P*` -> bar, `L*` -> %, `F*` -> L/min, anything else -> raw.
fn infer_unit(sensor_name: &str) -> String {
    let prefix = sensor_name.split('.').next().unwrap_or(sensor_name);
    let letter = prefix.chars().find(|c| c.is_ascii_alphabetic());
    match letter.map(|c| c.to_ascii_uppercase()) {
        Some('T') => "°C".to_string(),
        Some('P') => "bar".to_string(),
        Some('L') => "%".to_string(),
        Some('F') => "L/min".to_string(),
        _ => "raw".to_string(),
    }
}

fn synthetic_value(rng: &mut impl Rng, unit: &str) -> f64 {
    match unit {
        "°C" => rng.gen_range(15.0..90.0),
        "bar" => rng.gen_range(0.5..12.0),
        "%" => rng.gen_range(0.0..100.0),
        "L/min" => rng.gen_range(1.0..500.0),
        _ => rng.gen_range(0.0..1000.0),
    }
}

fn graph_sensor_names(graph_result: &GraphResult, limit: usize) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut names = Vec::new();
    for row in &graph_result.rows {
        for key in ["tag", "name", "s.name", "s.properties.tag"] {
            if let Some(Value::String(s)) = row.get(key) {
                if seen.insert(s.clone()) {
                    names.push(s.clone());
                    if names.len() >= limit {
                        return names;
                    }
                }
            }
        }
    }
    names
}
