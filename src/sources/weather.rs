//! Severe-weather adapter.
//!
//! REAL provider polls an Open-Meteo style forecast API for monitored
//! maritime regions and converts severe wind/precipitation readings into
//! weather-alert events. Falls back to synthetic alerts in mock mode.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;

use crate::config::OmenConfig;
use crate::errors::AdapterError;
use crate::models::{GeoLocation, MarketMetadata, RawEvent, Source};
use crate::sources::{http_client, AdapterHealth, HealthState, SourceAdapter, SourceGuard};

const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Regions whose weather matters for shipping.
const MONITORED_REGIONS: &[(&str, f64, f64)] = &[
    ("Gulf of Mexico", 25.0, -90.0),
    ("South China Sea", 12.0, 113.0),
    ("Red Sea", 15.5, 42.5),
    ("North Atlantic", 45.0, -40.0),
    ("Bay of Bengal", 15.0, 88.0),
];

/// Sustained wind above this many km/h raises an alert.
const SEVERE_WIND_KMH: f64 = 90.0;

pub struct WeatherAdapter {
    provider: String,
    client: reqwest::Client,
    guard: SourceGuard,
}

impl WeatherAdapter {
    pub fn new(config: &OmenConfig) -> Self {
        Self {
            provider: config.weather.provider.clone(),
            client: http_client(config.fetch_timeout_secs),
            guard: SourceGuard::new(Source::Weather),
        }
    }

    pub fn is_real(&self) -> bool {
        self.provider == "openmeteo" || self.provider == "openweather"
    }

    async fn fetch_region(
        &self,
        name: &str,
        lat: f64,
        lon: f64,
    ) -> Result<Option<RawEvent>, AdapterError> {
        let response = self
            .client
            .get(OPEN_METEO_URL)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("hourly", "wind_speed_10m,precipitation".to_string()),
                ("forecast_days", "2".to_string()),
            ])
            .send()
            .await
            .map_err(|err| AdapterError::Unavailable {
                source_name: "weather".to_string(),
                reason: err.to_string(),
            })?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(AdapterError::Http {
                source_name: "weather".to_string(),
                status,
            });
        }
        let body: serde_json::Value =
            response.json().await.map_err(|err| AdapterError::Decode {
                source_name: "weather".to_string(),
                reason: err.to_string(),
            })?;

        let max_wind = body["hourly"]["wind_speed_10m"]
            .as_array()
            .map(|winds| {
                winds
                    .iter()
                    .filter_map(|v| v.as_f64())
                    .fold(0.0f64, f64::max)
            })
            .unwrap_or(0.0);

        if max_wind < SEVERE_WIND_KMH {
            return Ok(None);
        }
        Ok(Some(alert_event(name, lat, lon, max_wind)))
    }

    fn mock_events(&self) -> Vec<RawEvent> {
        let mut rng = rand::thread_rng();
        MONITORED_REGIONS
            .iter()
            .filter_map(|(name, lat, lon)| {
                if !rng.gen_bool(0.3) {
                    return None;
                }
                Some(alert_event(name, *lat, *lon, rng.gen_range(SEVERE_WIND_KMH..180.0)))
            })
            .collect()
    }
}

fn alert_event(region: &str, lat: f64, lon: f64, max_wind_kmh: f64) -> RawEvent {
    let mut source_metrics = HashMap::new();
    source_metrics.insert("max_wind_kmh".to_string(), serde_json::json!(max_wind_kmh));

    RawEvent {
        event_id: format!(
            "weather-{}-{}",
            region.to_lowercase().replace(' ', "-"),
            Utc::now().format("%Y%m%d%H")
        ),
        source: Source::Weather,
        source_metrics,
        title: format!("Severe storm conditions forecast for {}", region),
        description: format!(
            "Sustained winds up to {:.0} km/h forecast over {} in the next 48 hours",
            max_wind_kmh, region
        ),
        probability: ((max_wind_kmh - SEVERE_WIND_KMH) / 120.0 + 0.5).clamp(0.5, 0.95),
        keywords: vec![
            "storm".to_string(),
            "weather".to_string(),
            region.to_lowercase(),
        ],
        inferred_locations: vec![GeoLocation {
            name: region.to_string(),
            latitude: lat,
            longitude: lon,
        }],
        market: MarketMetadata {
            market_id: format!("weather-{}", region.to_lowercase().replace(' ', "-")),
            ..Default::default()
        },
        movement: None,
        observed_at: Utc::now(),
    }
}

#[async_trait]
impl SourceAdapter for WeatherAdapter {
    fn source(&self) -> Source {
        Source::Weather
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn fetch_events(&self, limit: usize) -> Result<Vec<RawEvent>, AdapterError> {
        if !self.is_real() {
            return Ok(self.mock_events().into_iter().take(limit).collect());
        }

        let mut events = Vec::new();
        for (name, lat, lon) in MONITORED_REGIONS {
            if events.len() >= limit {
                break;
            }
            let result = self
                .guard
                .run(|| self.fetch_region(name, *lat, *lon))
                .await;
            match result {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(AdapterError::CircuitOpen { .. }) => break,
                Err(err) => {
                    tracing::warn!(region = name, error = %err, "weather fetch failed");
                }
            }
        }
        Ok(events)
    }

    async fn health_check(&self) -> AdapterHealth {
        if !self.is_real() {
            return AdapterHealth {
                status: HealthState::Healthy,
                latency_ms: 0.0,
                error: None,
                metadata: serde_json::json!({"provider": "mock"}),
            };
        }
        let start = std::time::Instant::now();
        let result = self
            .client
            .get(OPEN_METEO_URL)
            .query(&[("latitude", "0"), ("longitude", "0"), ("hourly", "wind_speed_10m")])
            .send()
            .await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(response) if response.status().is_success() => AdapterHealth::healthy(latency_ms),
            Ok(response) => AdapterHealth {
                status: HealthState::Degraded,
                latency_ms,
                error: Some(format!("HTTP {}", response.status())),
                metadata: serde_json::json!({"provider": self.provider}),
            },
            Err(err) => AdapterHealth::unhealthy(latency_ms, err.to_string()),
        }
    }
}
