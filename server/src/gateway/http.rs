use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use super::{CreateIntentRequest, GatewayError, GatewayIntent, PaymentGateway};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: String,
    pub timeout: Duration,
}

/// REST client for the provider's payment-intent API.
#[derive(Clone)]
pub struct HttpGateway {
    config: Arc<GatewayConfig>,
    http_client: Client,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        if config.secret_key.is_empty() {
            return Err(GatewayError::Config(
                "payment gateway secret key is empty".to_string(),
            ));
        }

        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.config.secret_key)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::Parse(e.to_string()))
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            Err(GatewayError::Api {
                status_code: status.as_u16(),
                message,
            })
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Http(err.to_string())
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<GatewayIntent, GatewayError> {
        let mut builder = self
            .http_client
            .post(self.url("/v1/payment_intents"))
            .json(&request);
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }

        self.send(builder).await
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError> {
        let builder = self
            .http_client
            .get(self.url(&format!("/v1/payment_intents/{}", intent_id)));

        match self.send(builder).await {
            Err(GatewayError::Api {
                status_code: 404, ..
            }) => Err(GatewayError::NotFound(intent_id.to_string())),
            other => other,
        }
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<(), GatewayError> {
        let builder = self.http_client.post(self.url(&format!(
            "/v1/payment_intents/{}/cancel",
            intent_id
        )));

        let _: GatewayIntent = self.send(builder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &str) -> GatewayConfig {
        GatewayConfig {
            base_url: "https://payments.example.test/".to_string(),
            secret_key: secret.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        assert!(matches!(
            HttpGateway::new(config("")),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let gateway = HttpGateway::new(config("sk_test_123")).unwrap();
        assert_eq!(
            gateway.url("/v1/payment_intents"),
            "https://payments.example.test/v1/payment_intents"
        );
    }

    #[test]
    fn test_intent_status_wire_format() {
        let body = r#"{
            "id": "pi_123",
            "amount": 250,
            "currency": "usd",
            "status": "requires_payment_method",
            "client_secret": "pi_123_secret_abc",
            "last_payment_error": {"code": "card_declined", "message": "declined"}
        }"#;
        let intent: GatewayIntent = serde_json::from_str(body).unwrap();
        assert_eq!(
            intent.status,
            crate::gateway::GatewayIntentStatus::RequiresPaymentMethod
        );
        assert_eq!(intent.client_secret.as_deref(), Some("pi_123_secret_abc"));
    }
}
