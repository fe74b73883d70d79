//! HTTP transport for the sync endpoints.
//!
//! Every endpoint answers with the `{ok, data, error}` envelope. Transport
//! failures are classified so the sync loop can tell a retryable outage
//! from a refused write.

use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use srsync_core::config::ClientConfig;
use srsync_core::error::TransportError;
use srsync_core::model::DeckId;
use srsync_core::traits::SyncTransport;
use srsync_core::wire::{
    ApiResponse, DeleteOutcome, DueCard, ProgressMap, SaveReport, SaveRequest, UpsertRequest,
    UpsertResponse,
};

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout_secs: u64,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout_secs,
        })
    }

    /// Build from the `[client]` section. The bearer token is read from `SRSYNC_TOKEN`.
    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .context("client.base_url is not configured")?;
        let token = std::env::var("SRSYNC_TOKEN").ok().filter(|t| !t.is_empty());
        Ok(Self::new(base_url, token, config.timeout_secs)?)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<reqwest::Url, TransportError> {
        let mut url = reqwest::Url::parse(&format!("{}/{endpoint}", self.base_url))
            .map_err(|e| TransportError::Network(format!("invalid URL: {e}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn map_send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout_secs)
        } else {
            TransportError::Network(e.to_string())
        }
    }

    /// Send a request and unwrap the response envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TransportError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;
        debug!(status, bytes = body.len(), "response received");

        let envelope: Option<ApiResponse<T>> = serde_json::from_str(&body).ok();
        if status == 401 || status == 403 {
            let message = envelope.and_then(|r| r.error).unwrap_or(body);
            return Err(TransportError::AccessDenied(message));
        }
        if status >= 400 {
            let message = envelope.and_then(|r| r.error).unwrap_or(body);
            return Err(TransportError::Api { status, message });
        }

        let envelope = match envelope {
            Some(envelope) => envelope,
            None => {
                let err = serde_json::from_str::<ApiResponse<T>>(&body)
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                return Err(TransportError::Decode(format!("failed to parse response: {err}")));
            }
        };
        if !envelope.ok {
            return Err(TransportError::Api {
                status,
                message: envelope.error.unwrap_or_else(|| "request rejected".into()),
            });
        }
        envelope
            .data
            .ok_or_else(|| TransportError::Decode("response carried no data".into()))
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn fetch(&self) -> Result<ProgressMap, TransportError> {
        let url = self.url("fetch", &[])?;
        self.send(self.client.get(url)).await
    }

    #[instrument(
        skip(self, request),
        fields(base_url = %self.base_url, records = request.records.len())
    )]
    async fn save(&self, request: &SaveRequest) -> Result<SaveReport, TransportError> {
        let url = self.url("save", &[])?;
        self.send(self.client.post(url).json(request)).await
    }

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn get_due_cards(&self, limit: usize) -> Result<Vec<DueCard>, TransportError> {
        let limit = limit.to_string();
        let url = self.url("get_due_cards", &[("limit", &limit)])?;
        self.send(self.client.get(url)).await
    }

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn delete_card(
        &self,
        deck_id: DeckId,
        card_id: &str,
    ) -> Result<DeleteOutcome, TransportError> {
        let deck = deck_id.to_string();
        let url = self.url("delete_card", &[("deckid", &deck), ("cardid", card_id)])?;
        self.send(self.client.post(url)).await
    }

    #[instrument(
        skip(self, request),
        fields(base_url = %self.base_url, card_id = %request.card_id)
    )]
    async fn upsert_card(&self, request: &UpsertRequest) -> Result<UpsertResponse, TransportError> {
        let url = self.url("upsert_card", &[])?;
        self.send(self.client.post(url).json(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use srsync_core::model::Progress;
    use srsync_core::wire::SaveRecord;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> HttpTransport {
        HttpTransport::new(&format!("{}/srs/", server.uri()), Some("secret".into()), 5).unwrap()
    }

    #[tokio::test]
    async fn fetch_decodes_progress_map() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/srs/fetch"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "data": {"4": {"hund": {
                    "step": 2, "due": 10, "addedAt": 1, "lastAt": 5, "hidden": 1
                }}}
            })))
            .mount(&server)
            .await;

        let map = transport(&server).fetch().await.unwrap();
        let progress = map[&4]["hund"];
        assert_eq!(progress.step, 2);
        assert!(progress.hidden);
    }

    #[tokio::test]
    async fn save_posts_wire_records() {
        let server = MockServer::start().await;
        let record = SaveRecord::new(4, "hund", Progress::new(7));
        let request = SaveRequest::from_records([&record]);
        Mock::given(method("POST"))
            .and(path("/srs/save"))
            .and(body_json(json!({"records": [record.to_wire()]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "data": {"inserted": 1, "replaced": 0, "kept": 0, "skipped": 0}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let report = transport(&server).save(&request).await.unwrap();
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn query_parameters_are_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/srs/delete_card"))
            .and(query_param("deckid", "3"))
            .and(query_param("cardid", "a b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true, "data": {"action": "hidden"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/srs/get_due_cards"))
            .and(query_param("limit", "25"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "data": []})))
            .mount(&server)
            .await;

        let t = transport(&server);
        assert_eq!(t.delete_card(3, "a b").await.unwrap(), DeleteOutcome::Hidden);
        assert!(t.get_due_cards(25).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forbidden_is_access_denied() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/srs/upsert_card"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "ok": false, "error": "deck belongs to another user"
            })))
            .mount(&server)
            .await;

        let err = transport(&server)
            .upsert_card(&UpsertRequest::default())
            .await
            .unwrap_err();
        match err {
            TransportError::AccessDenied(message) => assert!(message.contains("another user")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/srs/fetch"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = transport(&server).fetch().await.unwrap_err();
        assert!(matches!(
            &err,
            TransportError::Api { status: 503, message } if message == "maintenance"
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn rejected_envelope_is_an_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/srs/fetch"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "bad session"})),
            )
            .mount(&server)
            .await;

        let err = transport(&server).fetch().await.unwrap_err();
        assert!(matches!(err, TransportError::Api { status: 200, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn garbage_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/srs/fetch"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = transport(&server).fetch().await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/srs/fetch"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "data": {}}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let t = HttpTransport::new(&format!("{}/srs", server.uri()), None, 1).unwrap();
        let err = t.fetch().await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(1)));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        let t = HttpTransport::new("http://127.0.0.1:1", None, 2).unwrap();
        let err = t.fetch().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn debug_masks_token() {
        let t = HttpTransport::new("http://localhost", Some("hunter2".into()), 5).unwrap();
        let debug = format!("{t:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }
}
