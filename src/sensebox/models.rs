use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Device payload: GET /devices/{id}
//
//   {
//     "_id": "5c647389a100840019eea656",
//     "name": "...",
//     "sensors": [
//       { "title": "Temperatur",
//         "unit": "°C",
//         "lastMeasurement": { "value": "21.34", "createdAt": "2024-05-01T12:00:00.000Z" } },
//       ...
//     ]
//   }
//
// Only the fields the aggregator reads are modelled. Everything is optional
// because stations routinely omit `lastMeasurement` or whole sensor entries.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DevicePayload {
    #[serde(default)]
    pub sensors: Vec<Sensor>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sensor {
    pub title: Option<String>,
    #[serde(rename = "lastMeasurement")]
    pub last_measurement: Option<LastMeasurement>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LastMeasurement {
    pub value: Option<MeasurementValue>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
}

// ---------------------------------------------------------------------------
// MeasurementValue
//
// The API documents `value` as a decimal string, but some stations push raw
// JSON numbers. Number MUST come before Text so that `21.5` is not rejected.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MeasurementValue {
    Number(f64),
    Text(String),
}

impl MeasurementValue {
    /// Numeric value, or `None` for non-numeric and non-finite text.
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            MeasurementValue::Number(v) => *v,
            MeasurementValue::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        v.is_finite().then_some(v)
    }
}

/// A single temperature observation extracted from a device payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl DevicePayload {
    /// Locate the sensor titled `phenomenon` and read its latest measurement.
    ///
    /// Returns `None` when the sensor is missing, has no last measurement,
    /// or carries a non-numeric value or unparsable timestamp.
    pub fn measurement(&self, phenomenon: &str) -> Option<Measurement> {
        self.sensors
            .iter()
            .filter(|s| s.title.as_deref() == Some(phenomenon))
            .find_map(|s| {
                let last = s.last_measurement.as_ref()?;
                let value = last.value.as_ref()?.as_f64()?;
                let observed_at = DateTime::parse_from_rfc3339(last.created_at.as_deref()?)
                    .ok()?
                    .with_timezone(&Utc);
                Some(Measurement { value, observed_at })
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
