use std::time::Duration;

use reqwest::{
    Client,
    ClientBuilder,
    Url,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use serde::Deserialize;
use serde_with::serde_as;

use crate::prelude::*;

/// Home Assistant REST API client.
pub struct Api {
    client: Client,
    base_url: Url,
}

impl Api {
    pub fn new(access_token: &str, base_url: Url) -> Result<Self> {
        let headers = HeaderMap::from_iter([(
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&format!("Bearer {access_token}"))?,
        )]);
        let client = ClientBuilder::new()
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut().map_err(|()| anyhow!("invalid base URL"))?.extend(segments);
        Ok(url)
    }

    /// Fetch the current state of every entity.
    #[instrument(skip_all)]
    pub async fn get_states(&self) -> Result<EntityStates> {
        let states: EntityStates = self
            .client
            .get(self.endpoint(&["states"])?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("failed to deserialize the states response")?;
        debug!(n_states = states.0.len(), "fetched");
        Ok(states)
    }

    /// Fire an event on the host's event bus. Best-effort: the host does not acknowledge delivery.
    #[instrument(skip_all, fields(event_type = event_type))]
    pub async fn fire_event(&self, event_type: &str, payload: &serde_json::Value) -> Result {
        self.client
            .post(self.endpoint(&["events", event_type])?)
            .json(payload)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("failed to fire `{event_type}`"))?;
        Ok(())
    }

    /// Create or update an entity state, together with its display attributes.
    #[instrument(skip_all, fields(entity_id = entity_id))]
    pub async fn publish_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: &serde_json::Value,
    ) -> Result {
        let body = serde_json::json!({ "state": state, "attributes": attributes });
        self.client
            .post(self.endpoint(&["states", entity_id])?)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("failed to publish `{entity_id}`"))?;
        Ok(())
    }
}

#[must_use]
#[serde_as]
#[derive(Deserialize, derive_more::IntoIterator)]
pub struct EntityStates(#[serde_as(as = "serde_with::VecSkipError<_>")] pub Vec<EntityState>);

#[must_use]
#[derive(Deserialize)]
pub struct EntityState {
    pub entity_id: String,

    #[serde(rename = "state")]
    pub value: String,
}

impl EntityState {
    /// Numeric value of the entity, `None` when the entity is unavailable, unknown,
    /// or not numeric — indistinguishable failure modes for the tracker.
    pub fn numeric_value(&self) -> Option<f64> {
        match self.value.as_str() {
            "unavailable" | "unknown" | "" => None,
            value => value.parse().ok(),
        }
    }
}
