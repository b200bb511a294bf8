//! Option Chain REST Client
//!
//! Fetches the nearest-expiry option chain from the Dhan v2 REST API.
//!
//! Both calls are `POST` requests with JSON bodies, authenticated with the
//! `access-token` and `client-id` headers, answering with a
//! `{"status": "success", "data": ...}` envelope. Requests are spaced at
//! least `min_interval` apart across all callers.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::application::ports::{OptionChainError, OptionChainPort, Underlying};
use crate::domain::signal::{OptionChainSnapshot, StrikeData, StrikeQuote};
use crate::infrastructure::config::{Credentials, SignalSettings};

const EXPIRY_LIST_PATH: &str = "/optionchain/expirylist";
const OPTION_CHAIN_PATH: &str = "/optionchain";
const EXPIRY_LIST_TIMEOUT: Duration = Duration::from_secs(10);
const OPTION_CHAIN_TIMEOUT: Duration = Duration::from_secs(15);

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ChainRequest<'a> {
    underlying_scrip: u32,
    underlying_seg: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiry: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ChainData {
    #[serde(default)]
    oc: HashMap<String, StrikeLegs>,
}

#[derive(Debug, Default, Deserialize)]
struct StrikeLegs {
    #[serde(default)]
    ce: Option<Leg>,
    #[serde(default)]
    pe: Option<Leg>,
}

#[derive(Debug, Default, Deserialize)]
struct Leg {
    #[serde(default)]
    oi: f64,
    #[serde(default)]
    last_price: f64,
}

impl Leg {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn open_interest(&self) -> u64 {
        if self.oi.is_finite() && self.oi > 0.0 {
            self.oi as u64
        } else {
            0
        }
    }
}

fn into_snapshot(expiry: String, data: ChainData) -> Result<OptionChainSnapshot, OptionChainError> {
    let strikes = data
        .oc
        .into_iter()
        .map(|(key, legs)| {
            let strike = key.trim().parse::<f64>().map_err(|_| OptionChainError::Parse {
                message: format!("invalid strike key {key:?}"),
            })?;
            let call = legs.ce.unwrap_or_default();
            let put = legs.pe.unwrap_or_default();
            Ok(StrikeQuote {
                strike,
                data: StrikeData {
                    call_oi: call.open_interest(),
                    put_oi: put.open_interest(),
                    call_ltp: call.last_price,
                    put_ltp: put.last_price,
                },
            })
        })
        .collect::<Result<Vec<_>, OptionChainError>>()?;

    Ok(OptionChainSnapshot::new(Some(expiry), strikes))
}

// =============================================================================
// Client
// =============================================================================

/// Dhan option-chain client.
#[derive(Debug)]
pub struct DhanRestClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl DhanRestClient {
    /// Create a client against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        credentials: Credentials,
        min_interval: Duration,
    ) -> Result<Self, OptionChainError> {
        let client = Client::builder()
            .build()
            .map_err(|e| OptionChainError::Network {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            min_interval,
            last_request: Mutex::new(None),
        })
    }

    /// Create a client from the signal settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_settings(
        settings: &SignalSettings,
        credentials: Credentials,
    ) -> Result<Self, OptionChainError> {
        Self::new(
            settings.rest_base_url.clone(),
            credentials,
            settings.rest_min_interval,
        )
    }

    /// Expiry dates for an underlying, nearest first.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-200 status, a non-success
    /// envelope, or an unparseable body.
    pub async fn expiry_list(&self, underlying: &Underlying) -> Result<Vec<String>, OptionChainError> {
        let body = ChainRequest {
            underlying_scrip: underlying.scrip,
            underlying_seg: &underlying.segment,
            expiry: None,
        };
        let expiries: Option<Vec<String>> = self
            .post(EXPIRY_LIST_PATH, &body, EXPIRY_LIST_TIMEOUT, "expiry_list")
            .await?;
        Ok(expiries.unwrap_or_default())
    }

    /// Option chain for one expiry.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-200 status, a non-success
    /// envelope, or an unparseable body.
    pub async fn option_chain_for_expiry(
        &self,
        underlying: &Underlying,
        expiry: &str,
    ) -> Result<OptionChainSnapshot, OptionChainError> {
        let body = ChainRequest {
            underlying_scrip: underlying.scrip,
            underlying_seg: &underlying.segment,
            expiry: Some(expiry),
        };
        let data: Option<ChainData> = self
            .post(OPTION_CHAIN_PATH, &body, OPTION_CHAIN_TIMEOUT, "option_chain")
            .await?;
        let data = data.ok_or_else(|| OptionChainError::Parse {
            message: "missing data".to_string(),
        })?;

        let snapshot = into_snapshot(expiry.to_string(), data)?;
        tracing::debug!(
            expiry,
            strikes = snapshot.strikes.len(),
            "Retrieved option chain"
        );
        Ok(snapshot)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &ChainRequest<'_>,
        timeout: Duration,
        operation: &'static str,
    ) -> Result<Option<T>, OptionChainError> {
        self.throttle().await;

        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("access-token", self.credentials.access_token())
            .header("client-id", self.credentials.client_id())
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&e, operation))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(&e, operation))?;

        if !status.is_success() {
            return Err(OptionChainError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(|e| OptionChainError::Parse {
                message: e.to_string(),
            })?;

        if envelope.status.as_deref() != Some("success") {
            return Err(OptionChainError::ApiFailure { message: text });
        }

        Ok(envelope.data)
    }

    /// Wait until `min_interval` has passed since the previous request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                tracing::debug!(
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "Rate limit: waiting"
                );
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn transport_error(error: &reqwest::Error, operation: &'static str) -> OptionChainError {
    if error.is_timeout() {
        OptionChainError::Timeout { operation }
    } else {
        OptionChainError::Network {
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl OptionChainPort for DhanRestClient {
    async fn fetch_option_chain(
        &self,
        underlying: &Underlying,
    ) -> Result<OptionChainSnapshot, OptionChainError> {
        let expiries = self.expiry_list(underlying).await?;
        let Some(expiry) = expiries.into_iter().next() else {
            return Err(OptionChainError::NoExpiries {
                underlying: underlying.clone(),
            });
        };
        tracing::debug!(%underlying, %expiry, "Using nearest expiry");
        self.option_chain_for_expiry(underlying, &expiry).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> DhanRestClient {
        DhanRestClient::new(
            server.uri(),
            Credentials::new("tok".to_string(), "cid".to_string()),
            Duration::ZERO,
        )
        .unwrap()
    }

    async fn mount_expiries(server: &MockServer, expiries: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/optionchain/expirylist"))
            .and(header("access-token", "tok"))
            .and(header("client-id", "cid"))
            .and(body_json(json!({"UnderlyingScrip": 51, "UnderlyingSeg": "IDX_I"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "success", "data": expiries})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetches_nearest_expiry_chain() {
        let server = MockServer::start().await;
        mount_expiries(&server, json!(["2024-06-07", "2024-06-14"])).await;
        Mock::given(method("POST"))
            .and(path("/optionchain"))
            .and(body_json(json!({
                "UnderlyingScrip": 51,
                "UnderlyingSeg": "IDX_I",
                "Expiry": "2024-06-07"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {
                    "last_price": 75000.0,
                    "oc": {
                        "75100.000000": {
                            "ce": {"oi": 1200, "last_price": 150.5},
                            "pe": {"oi": 1800, "last_price": 210.0}
                        },
                        "74900.000000": {
                            "ce": {"oi": 800.0, "last_price": 260.0},
                            "pe": {"oi": 400, "last_price": 95.25}
                        }
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = client(&server)
            .fetch_option_chain(&Underlying::default())
            .await
            .unwrap();

        assert_eq!(snapshot.expiry.as_deref(), Some("2024-06-07"));
        assert_eq!(snapshot.strikes.len(), 2);
        assert!((snapshot.strikes[0].strike - 74_900.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.total_call_oi(), 2_000);
        assert_eq!(snapshot.total_put_oi(), 2_200);
        assert!((snapshot.strikes[1].data.call_ltp - 150.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn missing_legs_count_as_zero() {
        let server = MockServer::start().await;
        mount_expiries(&server, json!(["2024-06-07"])).await;
        Mock::given(method("POST"))
            .and(path("/optionchain"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"oc": {"75000": {"pe": {"oi": 500}}}}
            })))
            .mount(&server)
            .await;

        let snapshot = client(&server)
            .fetch_option_chain(&Underlying::default())
            .await
            .unwrap();

        assert_eq!(snapshot.total_call_oi(), 0);
        assert_eq!(snapshot.total_put_oi(), 500);
        assert!(snapshot.pcr().abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn empty_expiry_list() {
        let server = MockServer::start().await;
        mount_expiries(&server, json!([])).await;

        let err = client(&server)
            .fetch_option_chain(&Underlying::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OptionChainError::NoExpiries {
                underlying: Underlying::default()
            }
        );
    }

    #[tokio::test]
    async fn http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&server)
            .await;

        let err = client(&server)
            .expiry_list(&Underlying::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OptionChainError::HttpStatus {
                status: 401,
                body: "invalid token".to_string()
            }
        );
    }

    #[tokio::test]
    async fn failure_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "failure", "remarks": "bad scrip"})),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .expiry_list(&Underlying::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "api_failure");
    }

    #[tokio::test]
    async fn unparseable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server)
            .expiry_list(&Underlying::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[tokio::test]
    async fn bad_strike_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/optionchain"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"oc": {"atm": {}}}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .option_chain_for_expiry(&Underlying::default(), "2024-06-07")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[tokio::test]
    async fn spaces_requests() {
        let server = MockServer::start().await;
        mount_expiries(&server, json!(["2024-06-07"])).await;
        let client = DhanRestClient::new(
            server.uri(),
            Credentials::new("tok".to_string(), "cid".to_string()),
            Duration::from_millis(200),
        )
        .unwrap();

        let start = std::time::Instant::now();
        client.expiry_list(&Underlying::default()).await.unwrap();
        client.expiry_list(&Underlying::default()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
