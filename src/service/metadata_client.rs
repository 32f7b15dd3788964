//! Off-chain proposal metadata from the public governance forums
//!
//! Sources are tried in order and the first one that knows a title wins.
//! A proposal neither forum knows gets [`ProposalMetadata::unavailable`].

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::sources::{MetadataSource, SourceError};
use crate::models::ProposalMetadata;

pub const POLKASSEMBLY_TEMPLATE: &str =
    "https://api.polkassembly.io/api/v1/posts/on-chain-post?postId={id}&proposalType=referendums_v2";
pub const SUBSQUARE_TEMPLATE: &str = "https://{network}-api.subsquare.io/gov2/referendums/{id}";

#[derive(Debug, Deserialize)]
struct ForumPost {
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

pub struct MetadataClient {
    network: String,
    /// URL templates with `{id}` and `{network}` placeholders
    templates: Vec<String>,
    client: reqwest::Client,
}

impl MetadataClient {
    pub fn new(network: &str, timeout: Duration) -> Result<Self, SourceError> {
        Self::with_templates(
            network,
            vec![POLKASSEMBLY_TEMPLATE.to_string(), SUBSQUARE_TEMPLATE.to_string()],
            timeout,
        )
    }

    pub fn with_templates(
        network: &str,
        templates: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            network: network.to_lowercase(),
            templates,
            client,
        })
    }

    fn url(&self, template: &str, proposal_id: u64) -> String {
        template
            .replace("{network}", &self.network)
            .replace("{id}", &proposal_id.to_string())
    }

    async fn fetch_from(&self, url: &str) -> Result<ForumPost, SourceError> {
        let response = self
            .client
            .get(url)
            .header("x-network", &self.network)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(serde_json::from_str(&response.text().await?)?)
    }
}

fn usable_title(title: Option<String>) -> Option<String> {
    title.filter(|t| !t.is_empty() && t != "None")
}

#[async_trait]
impl MetadataSource for MetadataClient {
    async fn fetch_metadata(&self, proposal_id: u64) -> Result<ProposalMetadata, SourceError> {
        for template in &self.templates {
            let url = self.url(template, proposal_id);
            match self.fetch_from(&url).await {
                Ok(post) => match usable_title(post.title) {
                    Some(title) => {
                        debug!(proposal_id, url = %url, "Fetched proposal metadata");
                        return Ok(ProposalMetadata {
                            title: Some(title),
                            content: post.content.unwrap_or_default(),
                            source_url: Some(url),
                        });
                    }
                    None => warn!(proposal_id, url = %url, "Source has no title for proposal"),
                },
                Err(e) => error!(proposal_id, url = %url, error = %e, "Metadata request failed"),
            }
        }

        Ok(ProposalMetadata::unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> MetadataClient {
        let base = server.base_url();
        MetadataClient::with_templates(
            "Polkadot",
            vec![format!("{}/pa/{{id}}", base), format!("{}/{{network}}/sq/{{id}}", base)],
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_default_templates() {
        let client = MetadataClient::new("Kusama", Duration::from_secs(60)).unwrap();
        assert_eq!(
            client.url(SUBSQUARE_TEMPLATE, 42),
            "https://kusama-api.subsquare.io/gov2/referendums/42"
        );
        assert!(client.url(POLKASSEMBLY_TEMPLATE, 42).contains("postId=42"));
    }

    #[tokio::test]
    async fn test_first_source_wins() {
        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method(GET).path("/pa/9").header("x-network", "polkadot");
                then.status(200).json_body(json!({"title": "Treasury ask", "content": "Body"}));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(GET).path("/polkadot/sq/9");
                then.status(200).json_body(json!({"title": "Unused"}));
            })
            .await;

        let metadata = client(&server).fetch_metadata(9).await.unwrap();

        assert_eq!(metadata.title.as_deref(), Some("Treasury ask"));
        assert_eq!(metadata.content, "Body");
        assert_eq!(metadata.source_url, Some(server.url("/pa/9")));
        first.assert_hits_async(1).await;
        second.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_falls_back_when_first_has_no_title() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/pa/3");
                then.status(200).json_body(json!({"title": "None"}));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(GET).path("/polkadot/sq/3").header("x-network", "polkadot");
                then.status(200).json_body(json!({"title": "From subsquare", "content": "Text"}));
            })
            .await;

        let metadata = client(&server).fetch_metadata(3).await.unwrap();

        assert_eq!(metadata.title.as_deref(), Some("From subsquare"));
        assert_eq!(metadata.source_url, Some(server.url("/polkadot/sq/3")));
        second.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_both_failing_yields_sentinel() {
        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method(GET).path("/pa/3");
                then.status(500);
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(GET).path("/polkadot/sq/3");
                then.status(404);
            })
            .await;

        let metadata = client(&server).fetch_metadata(3).await.unwrap();

        assert_eq!(metadata, ProposalMetadata::unavailable());
        assert!(!metadata.is_available());
        first.assert_hits_async(1).await;
        second.assert_hits_async(1).await;
    }
}
