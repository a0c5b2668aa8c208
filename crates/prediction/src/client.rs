//! Remote prediction backend client

use crate::config::join_segments;
use crate::errors::PredictionError;
use crate::features;
use crate::types::{ApiConfig, CartLineItem, PredictionResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Seam between the orchestrator and whatever answers prediction requests.
///
/// One call is one request/response exchange. Implementations never retry.
#[async_trait]
pub trait PredictionBackend: Send + Sync {
    async fn request_prediction(
        &self,
        vendor_id: &str,
        items: &[CartLineItem],
    ) -> Result<PredictionResult, PredictionError>;

    async fn health(&self) -> Result<BackendHealth, PredictionError> {
        Err(PredictionError::Transport(
            "health probe not supported by this backend".to_string(),
        ))
    }
}

/// `POST /predict` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub vendor_id: String,
    pub items: Vec<RequestItem>,
    pub total_base_time_minutes: f64,
    pub max_complexity: u32,
    pub total_items: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestItem {
    pub menu_item_id: String,
    pub quantity: u32,
    pub base_preparation_time_minutes: f64,
    pub preparation_complexity: u32,
}

impl PredictionRequest {
    /// Validates the input and builds the payload with defaults applied.
    pub fn build(vendor_id: &str, items: &[CartLineItem]) -> Result<Self, PredictionError> {
        let vendor_id = vendor_id.trim();
        if vendor_id.is_empty() {
            return Err(PredictionError::Validation("vendor id is empty".to_string()));
        }
        if items.is_empty() {
            return Err(PredictionError::Validation("cart has no items".to_string()));
        }

        let features = features::extract(items);
        Ok(Self {
            vendor_id: vendor_id.to_string(),
            items: items
                .iter()
                .map(|item| RequestItem {
                    menu_item_id: item.item_id.clone(),
                    quantity: item.effective_quantity(),
                    base_preparation_time_minutes: item.effective_base_time(),
                    preparation_complexity: item.effective_complexity(),
                })
                .collect(),
            total_base_time_minutes: features.total_base_time_minutes,
            max_complexity: features.max_complexity,
            total_items: features.total_item_count,
        })
    }
}

/// `GET /health` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
    #[serde(default)]
    pub version: String,
}

/// HTTP client for the prediction service
pub struct PredictionClient {
    client: reqwest::Client,
    predict_url: Url,
    health_url: Url,
    timeout: Duration,
}

impl PredictionClient {
    pub fn new(config: &ApiConfig) -> Result<Self, PredictionError> {
        let base = Url::parse(config.endpoint.trim())?;
        let timeout = config.timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PredictionError::Config(e.to_string()))?;

        Ok(Self {
            client,
            predict_url: join_segments(&base, &["predict"])?,
            health_url: join_segments(&base, &["health"])?,
            timeout,
        })
    }

    pub fn predict_url(&self) -> &Url {
        &self.predict_url
    }

    async fn post_prediction(
        &self,
        request: &PredictionRequest,
    ) -> Result<PredictionResult, PredictionError> {
        let response = self
            .client
            .post(self.predict_url.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PredictionError::Transport(format!(
                "prediction request failed: {status} - {body}"
            )));
        }

        PredictionResult::from_json(&body)
    }
}

#[async_trait]
impl PredictionBackend for PredictionClient {
    async fn request_prediction(
        &self,
        vendor_id: &str,
        items: &[CartLineItem],
    ) -> Result<PredictionResult, PredictionError> {
        let request = PredictionRequest::build(vendor_id, items)?;
        debug!(
            vendor_id = %request.vendor_id,
            total_items = request.total_items,
            total_base_time_minutes = request.total_base_time_minutes,
            "requesting prediction"
        );

        // The client timeout covers the exchange too; this bounds body reads
        // on connections that trickle.
        tokio::time::timeout(self.timeout, self.post_prediction(&request)).await?
    }

    async fn health(&self) -> Result<BackendHealth, PredictionError> {
        let response = tokio::time::timeout(
            self.timeout,
            self.client.get(self.health_url.clone()).send(),
        )
        .await??;

        let status = response.status();
        if !status.is_success() {
            return Err(PredictionError::Transport(format!(
                "health probe failed: {status}"
            )));
        }
        Ok(response.json::<BackendHealth>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_payload_carries_items_and_aggregates() {
        let items = vec![
            CartLineItem::new("A", 2).with_base_time(5.0),
            CartLineItem::new("B", 1).with_complexity(3),
        ];
        let request = PredictionRequest::build(" v1 ", &items).unwrap();

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "vendor_id": "v1",
                "items": [
                    {
                        "menu_item_id": "A",
                        "quantity": 2,
                        "base_preparation_time_minutes": 5.0,
                        "preparation_complexity": 1
                    },
                    {
                        "menu_item_id": "B",
                        "quantity": 1,
                        "base_preparation_time_minutes": 5.0,
                        "preparation_complexity": 3
                    }
                ],
                "total_base_time_minutes": 15.0,
                "max_complexity": 3,
                "total_items": 3
            })
        );
    }

    #[test]
    fn empty_vendor_or_cart_is_a_validation_error() {
        let items = vec![CartLineItem::new("A", 1)];
        assert!(matches!(
            PredictionRequest::build("  ", &items),
            Err(PredictionError::Validation(_))
        ));
        assert!(matches!(
            PredictionRequest::build("v1", &[]),
            Err(PredictionError::Validation(_))
        ));
    }

    #[test]
    fn predict_url_resolves_against_base_path() {
        let client = PredictionClient::new(&ApiConfig {
            endpoint: "http://ml.internal:8000/api/".to_string(),
            ..ApiConfig::default()
        })
        .unwrap();
        assert_eq!(client.predict_url().as_str(), "http://ml.internal:8000/api/predict");
    }

    #[test]
    fn unparseable_endpoint_is_a_config_error() {
        let result = PredictionClient::new(&ApiConfig {
            endpoint: "not a url".to_string(),
            ..ApiConfig::default()
        });
        assert!(matches!(result, Err(PredictionError::Config(_))));
    }
}
