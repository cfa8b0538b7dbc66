//! Reverse geocoding.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GeocodingConfig;
use crate::error::{CollaboratorError, Result};

/// The parts of a postal address the handler speaks or sends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub road: Option<String>,
    #[serde(default)]
    pub neighbourhood: Option<String>,
    /// Some regions report the district here instead of `neighbourhood`.
    #[serde(default)]
    pub suburb: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub postcode: Option<String>,
}

impl Address {
    /// Neighbourhood, else suburb.
    pub fn district(&self) -> Option<&str> {
        self.neighbourhood
            .as_deref()
            .or(self.suburb.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn road(&self) -> Option<&str> {
        self.road.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Turns coordinates into an address.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn address(&self, lat: f64, lon: f64) -> Result<Address>;
}

/// Client for a Nominatim `/reverse` endpoint.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
    language: String,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: Option<Address>,
    #[serde(default)]
    error: Option<String>,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocodingConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
        })
    }

    fn reverse_url(&self) -> String {
        format!("{}/reverse", self.base_url)
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    #[tracing::instrument(skip(self))]
    async fn address(&self, lat: f64, lon: f64) -> Result<Address> {
        let response: ReverseResponse = self
            .client
            .get(self.reverse_url())
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("format", "json".to_string()),
                ("accept-language", self.language.clone()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let address = into_address(response)?;
        debug!(?address, "Reverse geocoded");
        Ok(address)
    }
}

fn into_address(response: ReverseResponse) -> Result<Address> {
    match (response.address, response.error) {
        (Some(address), _) => Ok(address),
        (None, Some(error)) => Err(CollaboratorError::InvalidResponse(error)),
        (None, None) => Err(CollaboratorError::InvalidResponse(
            "response has no address".to_string(),
        )),
    }
}

/// Geocoder used when geocoding is disabled: every lookup fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGeocoder;

#[async_trait]
impl Geocoder for DisabledGeocoder {
    async fn address(&self, _lat: f64, _lon: f64) -> Result<Address> {
        Err(CollaboratorError::InvalidResponse(
            "geocoding is disabled".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nominatim_response() {
        let body = r#"{
            "place_id": 1,
            "display_name": "Calle Isabel la Catolica, Centro, La Paz",
            "address": {
                "road": "Calle Isabel la Catolica",
                "suburb": "Centro",
                "city": "La Paz",
                "state": "Baja California Sur",
                "postcode": "23000",
                "country": "México",
                "country_code": "mx"
            }
        }"#;
        let response: ReverseResponse = serde_json::from_str(body).unwrap();
        let address = into_address(response).unwrap();
        assert_eq!(address.road(), Some("Calle Isabel la Catolica"));
        assert_eq!(address.neighbourhood, None);
        assert_eq!(address.district(), Some("Centro"));
        assert_eq!(address.city.as_deref(), Some("La Paz"));
    }

    #[test]
    fn test_neighbourhood_preferred_over_suburb() {
        let address = Address {
            neighbourhood: Some("El Esterito".to_string()),
            suburb: Some("Centro".to_string()),
            ..Default::default()
        };
        assert_eq!(address.district(), Some("El Esterito"));
    }

    #[test]
    fn test_blank_fields_are_unknown() {
        let address = Address {
            road: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(address.road(), None);
        assert_eq!(address.district(), None);
    }

    #[test]
    fn test_error_response() {
        let response: ReverseResponse =
            serde_json::from_str(r#"{"error": "Unable to geocode"}"#).unwrap();
        let err = into_address(response).unwrap_err();
        assert!(err.to_string().contains("Unable to geocode"));
    }

    #[test]
    fn test_reverse_url_trims_slash() {
        let config = GeocodingConfig {
            base_url: "https://nominatim.example.org/".to_string(),
            ..Default::default()
        };
        let geocoder = NominatimGeocoder::new(&config).unwrap();
        assert_eq!(geocoder.reverse_url(), "https://nominatim.example.org/reverse");
    }
}
