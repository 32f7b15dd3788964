//! Chain gateway client
//!
//! The gateway fronts the blockchain node: it exposes the referenda map as
//! JSON, resolves block timestamps and signs proxy votes on our behalf.
//!
//! # Endpoints
//! - `GET  {base}/referenda`
//! - `GET  {base}/blocks/{n}/timestamp`
//! - `GET  {base}/proxy/balance`
//! - `POST {base}/proxy/votes`
//!
//! Reads are retried with exponential backoff. Vote submission is not, since
//! a retried submission could cast twice.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::sources::{GovernanceSource, ProxyVoteGateway, RetryConfig, SourceError};
use crate::models::{PlannedVote, Snapshot, SubmittedVotes};

#[derive(Debug, Deserialize)]
struct BlockTimestamp {
    /// Unix seconds
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct ProxyBalance {
    free: Decimal,
}

#[derive(Debug, Serialize)]
struct VoteBatch<'a> {
    votes: &'a [PlannedVote],
}

#[derive(Clone)]
pub struct ChainGatewayClient {
    base_url: String,
    client: reqwest::Client,
    retry_config: RetryConfig,
}

impl ChainGatewayClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        Self::with_retry_config(base_url, timeout, RetryConfig::default())
    }

    pub fn with_retry_config(
        base_url: &str,
        timeout: Duration,
        retry_config: RetryConfig,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retry_config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let url = self.url(path);
        let mut attempt = 0;

        loop {
            match self.get_once(&url).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry_config.max_retries => {
                    attempt += 1;
                    let delay = self.retry_config.delay_for(attempt);
                    warn!(
                        url = %url,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Gateway request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(url = %url, attempt = attempt, error = %e, "Gateway request failed");
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl GovernanceSource for ChainGatewayClient {
    async fn fetch_governance_snapshot(&self) -> Result<Snapshot, SourceError> {
        let value: serde_json::Value = self.get_json("referenda").await?;
        let snapshot = Snapshot::try_from(value)
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;
        debug!(proposals = snapshot.len(), "Fetched governance snapshot");
        Ok(snapshot)
    }
}

#[async_trait]
impl ProxyVoteGateway for ChainGatewayClient {
    async fn block_timestamp(&self, block: u64) -> Result<i64, SourceError> {
        let body: BlockTimestamp = self.get_json(&format!("blocks/{}/timestamp", block)).await?;
        Ok(body.timestamp)
    }

    async fn proxy_balance(&self) -> Result<Decimal, SourceError> {
        let body: ProxyBalance = self.get_json("proxy/balance").await?;
        Ok(body.free)
    }

    async fn submit_votes(&self, votes: &[PlannedVote]) -> Result<SubmittedVotes, SourceError> {
        let url = self.url("proxy/votes");
        let response = self
            .client
            .post(&url)
            .json(&VoteBatch { votes })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let receipt: SubmittedVotes = serde_json::from_str(&response.text().await?)?;
        info!(
            extrinsic_hash = %receipt.extrinsic_hash,
            votes = receipt.indexes.len(),
            "Proxy votes submitted"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyDecision;
    use httpmock::prelude::*;
    use serde_json::json;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    fn client(server: &MockServer) -> ChainGatewayClient {
        ChainGatewayClient::with_retry_config(&server.base_url(), Duration::from_secs(5), fast_retry())
            .unwrap()
    }

    #[test]
    fn test_url_joining() {
        let client = ChainGatewayClient::new("http://gw.local/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/referenda"), "http://gw.local/api/referenda");
        assert_eq!(client.url("proxy/balance"), "http://gw.local/api/proxy/balance");
    }

    #[test]
    fn test_transient_classification() {
        let server = SourceError::Status { status: 503, url: "u".into() };
        let client = SourceError::Status { status: 404, url: "u".into() };
        assert!(server.is_transient());
        assert!(!client.is_transient());
        assert!(!SourceError::InvalidResponse("x".into()).is_transient());
    }

    #[tokio::test]
    async fn test_fetch_snapshot() {
        let server = MockServer::start_async().await;
        let referenda = server
            .mock_async(|when, then| {
                when.method(GET).path("/referenda");
                then.status(200)
                    .json_body(json!({"12": {"Ongoing": {"track": 1}}, "13": {"Rejected": [1, null, null]}}));
            })
            .await;

        let snapshot = client(&server).fetch_governance_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.ongoing_ids().into_iter().collect::<Vec<_>>(), vec![12]);
        referenda.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_reported() {
        let server = MockServer::start_async().await;
        let referenda = server
            .mock_async(|when, then| {
                when.method(GET).path("/referenda");
                then.status(502);
            })
            .await;

        let err = client(&server).fetch_governance_snapshot().await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 502, .. }));
        // First attempt plus two retries
        referenda.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn test_non_object_snapshot_is_invalid() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/referenda");
                then.status(200).json_body(json!([1, 2]));
            })
            .await;

        let err = client(&server).fetch_governance_snapshot().await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let timestamp = server
            .mock_async(|when, then| {
                when.method(GET).path("/blocks/7/timestamp");
                then.status(404);
            })
            .await;

        let err = client(&server).block_timestamp(7).await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 404, .. }));
        timestamp.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_block_timestamp() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/blocks/1200/timestamp");
                then.status(200).json_body(json!({"timestamp": 1717200000}));
            })
            .await;

        assert_eq!(client(&server).block_timestamp(1200).await.unwrap(), 1717200000);
    }

    #[tokio::test]
    async fn test_proxy_endpoints() {
        let server = MockServer::start_async().await;
        let balance = server
            .mock_async(|when, then| {
                when.method(GET).path("/proxy/balance");
                then.status(200).json_body(json!({"free": "12.5"}));
            })
            .await;
        let votes = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/proxy/votes")
                    .json_body(json!({"votes": [{"proposal_index": 4, "decision": "aye", "conviction": "None"}]}));
                then.status(200)
                    .json_body(json!({"extrinsic_hash": "0xfeed", "indexes": [4]}));
            })
            .await;
        let client = client(&server);

        assert_eq!(client.proxy_balance().await.unwrap(), Decimal::new(125, 1));

        let receipt = client
            .submit_votes(&[PlannedVote {
                proposal_index: 4,
                decision: ProxyDecision::Aye,
                conviction: "None".to_string(),
            }])
            .await
            .unwrap();
        assert_eq!(receipt.extrinsic_hash, "0xfeed");
        assert_eq!(receipt.indexes, vec![4]);
        balance.assert_hits_async(1).await;
        votes.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_failed_submission_is_not_retried() {
        let server = MockServer::start_async().await;
        let votes = server
            .mock_async(|when, then| {
                when.method(POST).path("/proxy/votes");
                then.status(503);
            })
            .await;

        let err = client(&server).submit_votes(&[]).await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 503, .. }));
        votes.assert_hits_async(1).await;
    }
}
