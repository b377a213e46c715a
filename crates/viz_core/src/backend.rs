//! Outbound backend commands and geocoding lookups.
//!
//! The backend is an external collaborator: the engine issues opaque
//! create/update requests and consumes either the synchronous JSON reply or
//! the resulting event stream. No particular backend implementation is
//! assumed.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use shared::{
    domain::SimulationId,
    geo::LngLat,
    protocol::{BackendRequest, SimulationCreated},
};
use tracing::info;

use crate::camera::Geocoder;

pub struct BackendClient {
    http: Client,
    base_url: String,
    geocode_base_url: String,
    mapbox_token: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    features: Vec<GeocodeFeature>,
}

#[derive(Debug, Deserialize)]
struct GeocodeFeature {
    center: [f64; 2],
}

impl BackendClient {
    pub fn new(
        base_url: impl Into<String>,
        geocode_base_url: impl Into<String>,
        mapbox_token: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            geocode_base_url: geocode_base_url.into(),
            mapbox_token: mapbox_token.into(),
        }
    }

    pub async fn create_simulation(
        &self,
        city: &str,
        policy_text: &str,
    ) -> anyhow::Result<SimulationCreated> {
        let response = self
            .http
            .post(format!("{}/orchestrate", self.base_url))
            .json(&BackendRequest::CreateSimulation {
                city: city.to_string(),
                policy_text: policy_text.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        let created: SimulationCreated = response.json().await?;
        info!(simulation = %created.simulation_id, channel = %created.channel, "simulation created");
        Ok(created)
    }

    pub async fn send_chat(&self, simulation_id: SimulationId, message: &str) -> anyhow::Result<()> {
        self.http
            .post(format!("{}/orchestrate", self.base_url))
            .json(&BackendRequest::SendChat {
                simulation_id,
                message: message.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Upload a policy document as a multipart `file` field, the shape the
    /// backend's `/upload` endpoint expects.
    pub async fn upload_document(&self, filename: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        self.http
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Geocoder for BackendClient {
    async fn geocode(&self, place: &str) -> anyhow::Result<LngLat> {
        // Place names go in a path segment, so they need percent-encoding,
        // not form encoding (which would turn spaces into literal plusses).
        let mut url = url::Url::parse(&self.geocode_base_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("geocode base url cannot carry a path"))?
            .pop_if_empty()
            .push(&format!("{place}.json"));
        url.query_pairs_mut()
            .append_pair("access_token", &self.mapbox_token)
            .append_pair("limit", "1");
        let response = self.http.get(url).send().await?.error_for_status()?;
        let body: GeocodeResponse = response.json().await?;
        let feature = body
            .features
            .first()
            .ok_or_else(|| anyhow::anyhow!("no geocode match for '{place}'"))?;
        Ok(LngLat::new(feature.center[0], feature.center[1]))
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
