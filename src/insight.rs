//! Optional narrative pass-through. A report summary is POSTed to an
//! external endpoint that turns it into prose; the endpoint is fully
//! optional and every failure degrades to an empty narrative.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Serialize)]
struct InsightRequest<'a> {
    summary: &'a str,
}

#[derive(Deserialize)]
struct InsightResponse {
    #[serde(default)]
    text: String,
}

pub struct InsightClient {
    client: Client,
    endpoint: Option<String>,
}

impl InsightClient {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, endpoint }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Exchanges a summary for a narrative. Returns the empty string
    /// when no endpoint is configured or the exchange fails; the report
    /// must render either way.
    pub async fn narrate(&self, summary: &str) -> String {
        let Some(endpoint) = &self.endpoint else {
            debug!("no insight endpoint configured");
            return String::new();
        };
        let result = self
            .client
            .post(endpoint)
            .json(&InsightRequest { summary })
            .send()
            .await;
        let response = match result {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, "insight request failed");
                return String::new();
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "insight endpoint returned an error");
            return String::new();
        }
        match response.json::<InsightResponse>().await {
            Ok(body) => body.text,
            Err(err) => {
                warn!(error = %err, "insight response was not decodable");
                String::new()
            }
        }
    }
}
