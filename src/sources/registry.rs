//! Data source registry: single source of truth for data provenance.
//!
//! Classifies every configured source REAL, MOCK, or DISABLED from the
//! process configuration, and enforces the live/demo contract: live mode
//! is only allowed when no enabled source is MOCK. Switching live with
//! blockers fails with an error naming every one of them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::OmenConfig;
use crate::errors::ConfigurationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Real,
    Mock,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub source_type: SourceType,
    pub provider_name: String,
    pub enabled: bool,
    pub config_var: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveModeStatus {
    pub can_go_live: bool,
    pub blockers: Vec<String>,
    pub sources: Vec<SourceInfo>,
    pub real_count: usize,
    pub mock_count: usize,
    pub checked_at: DateTime<Utc>,
}

pub struct SourceRegistry {
    sources: Vec<SourceInfo>,
}

impl SourceRegistry {
    /// Detect every source's classification from configuration.
    pub fn from_config(config: &OmenConfig) -> Self {
        let mut sources = Vec::new();

        // Polymarket rides the public Gamma API; always REAL.
        sources.push(SourceInfo {
            name: "polymarket".to_string(),
            source_type: SourceType::Real,
            provider_name: "gamma_api".to_string(),
            enabled: config.polymarket.enabled,
            config_var: "POLYMARKET_GAMMA_API_URL".to_string(),
            reason: "Live Gamma API endpoint configured".to_string(),
        });

        sources.push(Self::detect_keyed(
            "ais",
            &config.ais.provider,
            config.ais.api_key.as_deref(),
            config.ais.enabled,
            "OMEN_AIS_PROVIDER",
            &["aisstream"],
            "AIS stream credentials configured",
        ));

        // Open-Meteo needs no key.
        sources.push(if config.weather.provider == "openmeteo" {
            SourceInfo {
                name: "weather".to_string(),
                source_type: SourceType::Real,
                provider_name: "openmeteo".to_string(),
                enabled: config.weather.enabled,
                config_var: "OMEN_WEATHER_PROVIDER".to_string(),
                reason: "Open-Meteo API (no key required)".to_string(),
            }
        } else {
            Self::detect_keyed(
                "weather",
                &config.weather.provider,
                config.weather.api_key.as_deref(),
                config.weather.enabled,
                "OMEN_WEATHER_PROVIDER",
                &["openweather"],
                "OpenWeather API key configured",
            )
        });

        sources.push(Self::detect_keyed(
            "news",
            &config.news.provider,
            config.news.api_key.as_deref(),
            config.news.enabled,
            "NEWSDATA_API_KEY",
            &["auto", "newsdata", "newsapi"],
            "News API key configured",
        ));

        // FBX is public index data.
        sources.push(if config.freight.provider == "fbx" {
            SourceInfo {
                name: "freight".to_string(),
                source_type: SourceType::Real,
                provider_name: "fbx".to_string(),
                enabled: config.freight.enabled,
                config_var: "OMEN_FREIGHT_PROVIDER".to_string(),
                reason: "Freightos Baltic Index (public data)".to_string(),
            }
        } else {
            Self::detect_keyed(
                "freight",
                &config.freight.provider,
                config.freight.api_key.as_deref(),
                config.freight.enabled,
                "OMEN_FREIGHT_PROVIDER",
                &["freightos", "xeneta", "drewry"],
                "Freight API key configured",
            )
        });

        sources.push(if config.stock.provider != "mock" {
            SourceInfo {
                name: "stock".to_string(),
                source_type: SourceType::Real,
                provider_name: config.stock.provider.clone(),
                enabled: config.stock.enabled,
                config_var: "STOCK_PROVIDER".to_string(),
                reason: format!("Using real stock provider: {}", config.stock.provider),
            }
        } else {
            SourceInfo {
                name: "stock".to_string(),
                source_type: SourceType::Mock,
                provider_name: "mock".to_string(),
                enabled: config.stock.enabled,
                config_var: "STOCK_PROVIDER".to_string(),
                reason: "Using mock data (STOCK_PROVIDER=mock)".to_string(),
            }
        });

        sources.push(Self::detect_keyed(
            "commodity",
            &config.commodity.provider,
            config.commodity.api_key.as_deref(),
            config.commodity.enabled,
            "ALPHAVANTAGE_API_KEY",
            &["alphavantage"],
            "AlphaVantage API key configured",
        ));

        let real = sources
            .iter()
            .filter(|s| s.source_type == SourceType::Real)
            .count();
        let mock = sources
            .iter()
            .filter(|s| s.source_type == SourceType::Mock)
            .count();
        info!(real, mock, total = sources.len(), "source registry initialized");

        Self { sources }
    }

    fn detect_keyed(
        name: &str,
        provider: &str,
        api_key: Option<&str>,
        enabled: bool,
        config_var: &str,
        real_providers: &[&str],
        real_reason: &str,
    ) -> SourceInfo {
        let has_key = api_key.map(|k| k.len() >= 10).unwrap_or(false);
        let (source_type, provider_name, reason) = if provider == "mock" {
            (
                SourceType::Mock,
                "mock".to_string(),
                format!("Using mock data ({}=mock)", config_var),
            )
        } else if real_providers.contains(&provider) && has_key {
            (SourceType::Real, provider.to_string(), real_reason.to_string())
        } else if real_providers.contains(&provider) {
            (
                SourceType::Mock,
                provider.to_string(),
                format!("Provider '{}' configured but no API credentials", provider),
            )
        } else {
            (
                SourceType::Mock,
                provider.to_string(),
                format!("Unknown provider: {}", provider),
            )
        };

        SourceInfo {
            name: name.to_string(),
            source_type,
            provider_name,
            enabled,
            config_var: config_var.to_string(),
            reason,
        }
    }

    pub fn all_sources(&self) -> &[SourceInfo] {
        &self.sources
    }

    pub fn get(&self, name: &str) -> Option<&SourceInfo> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn mock_sources(&self) -> Vec<&SourceInfo> {
        self.sources
            .iter()
            .filter(|s| s.source_type == SourceType::Mock)
            .collect()
    }

    pub fn real_sources(&self) -> Vec<&SourceInfo> {
        self.sources
            .iter()
            .filter(|s| s.source_type == SourceType::Real)
            .collect()
    }

    /// (can_go_live, blockers): live is allowed iff no enabled source is
    /// classified MOCK.
    pub fn validate_live_mode(&self) -> (bool, Vec<String>) {
        let blockers: Vec<String> = self
            .mock_sources()
            .iter()
            .filter(|s| s.enabled)
            .map(|s| format!("{}: {}", s.name, s.reason))
            .collect();
        (blockers.is_empty(), blockers)
    }

    /// Fails with every blocker listed when live mode is not allowed.
    pub fn require_live_mode(&self) -> Result<(), ConfigurationError> {
        let (can_go_live, blockers) = self.validate_live_mode();
        if can_go_live {
            Ok(())
        } else {
            Err(ConfigurationError(format!(
                "Cannot enable LIVE mode: {}",
                blockers.join("; ")
            )))
        }
    }

    pub fn live_mode_status(&self) -> LiveModeStatus {
        let (can_go_live, blockers) = self.validate_live_mode();
        LiveModeStatus {
            can_go_live,
            blockers,
            sources: self.sources.clone(),
            real_count: self.real_sources().len(),
            mock_count: self.mock_sources().len(),
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn base_config() -> OmenConfig {
        let mut config = OmenConfig::for_tests();
        config.ais = ProviderConfig {
            provider: "mock".to_string(),
            api_key: None,
            enabled: true,
        };
        config.news = ProviderConfig {
            provider: "auto".to_string(),
            api_key: None,
            enabled: true,
        };
        config.weather = ProviderConfig {
            provider: "openmeteo".to_string(),
            api_key: None,
            enabled: true,
        };
        config.freight = ProviderConfig {
            provider: "fbx".to_string(),
            api_key: None,
            enabled: true,
        };
        config.stock = ProviderConfig {
            provider: "quote_api".to_string(),
            api_key: None,
            enabled: true,
        };
        config.commodity = ProviderConfig {
            provider: "alphavantage".to_string(),
            api_key: None,
            enabled: true,
        };
        config
    }

    #[test]
    fn mock_sources_block_live_mode() {
        let registry = SourceRegistry::from_config(&base_config());
        let (can_go_live, blockers) = registry.validate_live_mode();
        assert!(!can_go_live);
        // ais (mock), news (no key), commodity (no key) at minimum.
        assert!(blockers.iter().any(|b| b.starts_with("ais:")));
        assert!(blockers.iter().any(|b| b.starts_with("news:")));

        let err = registry.require_live_mode().unwrap_err();
        assert!(err.to_string().contains("ais"));
    }

    #[test]
    fn fully_keyed_config_can_go_live() {
        let mut config = base_config();
        config.ais = ProviderConfig {
            provider: "aisstream".to_string(),
            api_key: Some("0123456789abcdef".to_string()),
            enabled: true,
        };
        config.news.api_key = Some("0123456789abcdef".to_string());
        config.commodity.api_key = Some("0123456789abcdef".to_string());

        let registry = SourceRegistry::from_config(&config);
        let (can_go_live, blockers) = registry.validate_live_mode();
        assert!(can_go_live, "unexpected blockers: {:?}", blockers);
        assert!(registry.require_live_mode().is_ok());
    }

    #[test]
    fn short_api_key_still_counts_as_mock() {
        let mut config = base_config();
        config.ais = ProviderConfig {
            provider: "aisstream".to_string(),
            api_key: Some("short".to_string()),
            enabled: true,
        };
        let registry = SourceRegistry::from_config(&config);
        assert_eq!(
            registry.get("ais").unwrap().source_type,
            SourceType::Mock
        );
    }

    #[test]
    fn keyless_public_providers_are_real() {
        let registry = SourceRegistry::from_config(&base_config());
        assert_eq!(registry.get("weather").unwrap().source_type, SourceType::Real);
        assert_eq!(registry.get("freight").unwrap().source_type, SourceType::Real);
        assert_eq!(registry.get("polymarket").unwrap().source_type, SourceType::Real);
    }

    #[test]
    fn status_summarizes_counts() {
        let registry = SourceRegistry::from_config(&base_config());
        let status = registry.live_mode_status();
        assert_eq!(status.sources.len(), 7);
        assert_eq!(
            status.real_count + status.mock_count,
            status.sources.len()
        );
    }
}
