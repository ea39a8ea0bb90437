use crate::config::LightingConfig;
use crate::error::{LightingError, Result};
use crate::types::{Bridge, Location};
use futures_util::future::try_join_all;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

#[derive(Deserialize)]
struct LocationsResponse {
    user_locations: Option<Vec<Location>>,
}

#[derive(Deserialize)]
struct TicketResponse {
    host: Option<String>,
    ticket: Option<String>,
    assets: Option<Vec<Asset>>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct Asset {
    uuid: Option<String>,
    id: Option<Value>,
}

impl Asset {
    fn bridge_id(&self) -> Option<String> {
        self.uuid.clone().or_else(|| match &self.id {
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        })
    }
}

/// Maps an account to its locations and each location's bridge channel
pub struct TopologyResolver {
    http: reqwest::Client,
    locations_url: String,
    tickets_url: String,
    channel_scheme: String,
}

impl TopologyResolver {
    pub fn new(config: &LightingConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            locations_url: config.locations_url.clone(),
            tickets_url: config.tickets_url.clone(),
            channel_scheme: config.channel_scheme.clone(),
        }
    }

    /// Resolve every bridge on the account
    ///
    /// Tickets are fetched for all locations concurrently. Locations without a
    /// bridge are skipped; the first failed lookup aborts the whole resolve.
    pub async fn resolve(&self, access_token: &SecretString) -> Result<Vec<Bridge>> {
        let locations = self.list_locations(access_token).await?;
        tracing::info!("Found {} location(s)", locations.len());

        let bridges: Vec<Bridge> = try_join_all(
            locations
                .iter()
                .map(|location| self.fetch_bridge(access_token, location)),
        )
        .await?
        .into_iter()
        .flatten()
        .collect();

        if bridges.is_empty() {
            return Err(LightingError::NoBridges);
        }
        Ok(bridges)
    }

    /// List the account's locations
    pub async fn list_locations(&self, access_token: &SecretString) -> Result<Vec<Location>> {
        let response: LocationsResponse = self
            .http
            .get(&self.locations_url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(|e| LightingError::Topology(format!("Could not get locations: {e}")))?
            .json()
            .await
            .map_err(|e| LightingError::Topology(format!("Could not get locations: {e}")))?;

        response
            .user_locations
            .ok_or_else(|| LightingError::Topology("Could not get locations".to_string()))
    }

    /// Redeem a ticket for one location; `None` when it has no bridge
    pub async fn fetch_bridge(
        &self,
        access_token: &SecretString,
        location: &Location,
    ) -> Result<Option<Bridge>> {
        tracing::info!("Getting details for location {}", location.name);

        let lookup_failed = |e: &dyn std::fmt::Display| {
            LightingError::Topology(format!(
                "Could not get devices for location {}: {e}",
                location.name
            ))
        };

        let response = self
            .http
            .get(&self.tickets_url)
            .query(&[("locationID", location.id.as_str())])
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(|e| lookup_failed(&e))?;

        // An `error` body only means "no bridge" on a successful response
        let status = response.status();
        if !status.is_success() {
            return Err(lookup_failed(&format!("HTTP {status}")));
        }

        let body = response.text().await.map_err(|e| lookup_failed(&e))?;

        let ticket: TicketResponse =
            serde_json::from_str(&body).map_err(|e| lookup_failed(&e))?;

        if let Some(error) = ticket.error {
            tracing::info!("No bridge at location {} ({})", location.name, error);
            return Ok(None);
        }

        let bridge_ids: Vec<String> = ticket
            .assets
            .unwrap_or_default()
            .iter()
            .filter_map(Asset::bridge_id)
            .collect();
        if bridge_ids.is_empty() {
            tracing::info!("No bridge at location {}", location.name);
            return Ok(None);
        }
        if bridge_ids.len() > 1 {
            tracing::warn!(
                "More than one smart bridge discovered at location {}; only the first is used",
                location.name
            );
        }

        let (Some(host), Some(ticket)) = (ticket.host, ticket.ticket) else {
            return Err(LightingError::Protocol(format!(
                "ticket for location {} lacks host or ticket",
                location.name
            )));
        };

        Ok(Some(Bridge {
            location_id: location.id.clone(),
            location_name: location.name.clone(),
            channel_url: self.channel_url(&host, &ticket)?,
            bridge_ids,
        }))
    }

    fn channel_url(&self, host: &str, ticket: &str) -> Result<String> {
        let mut url = Url::parse(&format!("{}://{}/", self.channel_scheme, host))
            .map_err(|e| LightingError::Protocol(format!("bad bridge host {host}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("authcode", ticket)
            .append_pair("ack", "false")
            .append_pair("EIO", "3");
        Ok(url.into())
    }
}
