use std::time::Duration;

use async_trait::async_trait;

use super::fetcher::{build_client, fetch_document, FetchError};
use super::parser::parse_messages;
use crate::account::{ServiceAccount, StatedMessages, TaggedMessages};
use crate::model::{Feed, LabelRegistry, Message};

/// Plain RSS/Atom/JSON subscriptions fetched straight from their source URL.
///
/// Custom ids are entry GUIDs and therefore only unique within a feed; local
/// read and starred state is authoritative.
#[derive(Debug, Clone)]
pub struct StandardAccount {
    account_id: i64,
    client: reqwest::Client,
    request_timeout: Duration,
    labels: LabelRegistry,
}

impl StandardAccount {
    pub fn new(account_id: i64, request_timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            account_id,
            client: build_client(request_timeout)?,
            request_timeout,
            labels: LabelRegistry::default(),
        })
    }

    /// Uses an existing client instead of building one.
    pub fn with_client(account_id: i64, client: reqwest::Client, request_timeout: Duration) -> Self {
        Self {
            account_id,
            client,
            request_timeout,
            labels: LabelRegistry::default(),
        }
    }

    pub fn with_labels(mut self, labels: LabelRegistry) -> Self {
        self.labels = labels;
        self
    }
}

#[async_trait]
impl ServiceAccount for StandardAccount {
    fn account_id(&self) -> i64 {
        self.account_id
    }

    fn is_syncable(&self) -> bool {
        false
    }

    fn labels(&self) -> LabelRegistry {
        self.labels.clone()
    }

    async fn obtain_new_messages(
        &self,
        feed: &Feed,
        _stated_messages: &StatedMessages,
        _tagged_messages: &TaggedMessages,
    ) -> Result<Vec<Message>, FetchError> {
        let bytes = fetch_document(&self.client, &feed.source, self.request_timeout).await?;
        let mut messages = parse_messages(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

        for message in &mut messages {
            message.account_id = self.account_id;
            message.feed_id = feed.custom_id.clone();
        }

        tracing::debug!(feed = %feed.source, count = messages.len(), "Obtained messages");
        Ok(messages)
    }

    fn item_changed(&self, feeds: &[Feed]) {
        for feed in feeds {
            tracing::debug!(feed = %feed.custom_id, status = %feed.status, "Feed changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeedStatus;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn account() -> StandardAccount {
        StandardAccount::new(1, Duration::from_secs(10)).unwrap()
    }

    fn feed(source: String) -> Feed {
        Feed {
            account_id: 1,
            custom_id: "7".into(),
            source,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_messages_are_stamped_with_feed_and_account() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let messages = account()
            .obtain_new_messages(
                &feed(format!("{}/feed", mock_server.uri())),
                &Default::default(),
                &Default::default(),
            )
            .await
            .unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].feed_id, "7");
        assert_eq!(messages[0].account_id, 1);
        assert_eq!(messages[0].custom_id, "1");
    }

    #[tokio::test]
    async fn test_malformed_feed_is_a_parsing_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let err = account()
            .obtain_new_messages(
                &feed(format!("{}/feed", mock_server.uri())),
                &Default::default(),
                &Default::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
        assert_eq!(err.feed_status(), FeedStatus::ParsingError);
    }

    #[tokio::test]
    async fn test_forbidden_feed_is_an_auth_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let err = account()
            .obtain_new_messages(
                &feed(format!("{}/feed", mock_server.uri())),
                &Default::default(),
                &Default::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.feed_status(), FeedStatus::AuthError);
    }
}
