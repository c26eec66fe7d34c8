//! Weather sample translation. The feed reports every field as a string;
//! unparsable or absent values fall back to zero so a partial sample still
//! produces a row.

use super::records::WeatherSample;
use crate::feed::messages::WeatherData;
use chrono::{DateTime, Utc};

fn float(value: &Option<String>) -> f64 {
    value.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0.0)
}

fn rainfall(value: &Option<String>) -> i64 {
    match value.as_deref() {
        Some("1") | Some("true") => 1,
        _ => 0,
    }
}

pub fn weather_samples(
    samples: &[WeatherData],
    session_key: i64,
    now: DateTime<Utc>,
) -> Vec<WeatherSample> {
    let date = now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    samples
        .iter()
        .map(|sample| WeatherSample {
            session_key,
            date: date.clone(),
            air_temperature: float(&sample.air_temp),
            track_temperature: float(&sample.track_temp),
            humidity: float(&sample.humidity),
            pressure: float(&sample.pressure),
            rainfall: rainfall(&sample.rainfall),
            wind_direction: float(&sample.wind_direction),
            wind_speed: float(&sample.wind_speed),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-03-08T14:00:00Z".parse().unwrap()
    }

    #[test]
    fn full_sample_parses() {
        let sample = WeatherData {
            air_temp: Some("24.5".into()),
            track_temp: Some("41.2".into()),
            humidity: Some("55.0".into()),
            pressure: Some("1012.3".into()),
            rainfall: Some("1".into()),
            wind_direction: Some("120".into()),
            wind_speed: Some("3.4".into()),
        };
        let out = weather_samples(&[sample], 9999, now());
        assert_eq!(out[0].air_temperature, 24.5);
        assert_eq!(out[0].rainfall, 1);
        assert_eq!(out[0].wind_direction, 120.0);
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let out = weather_samples(&[WeatherData::default()], 9999, now());
        assert_eq!(out[0].air_temperature, 0.0);
        assert_eq!(out[0].rainfall, 0);
    }
}
