use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::domain::document::ProductDocument;
use crate::domain::ports::SearchIndex;
use crate::errors::SearchIndexError;

/// Elasticsearch/OpenSearch style document API: `PUT` to index, `DELETE` to remove.
pub struct HttpSearchIndex {
    client: Client,
    base_url: String,
    index: String,
}

impl HttpSearchIndex {
    pub fn new(client: Client, base_url: &str, index: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.into(),
        }
    }

    fn document_url(&self, id: &str) -> String {
        format!(
            "{}/{}/_doc/{}",
            self.base_url,
            urlencoding::encode(&self.index),
            urlencoding::encode(id)
        )
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn upsert(&self, document: &ProductDocument) -> Result<(), SearchIndexError> {
        let resp = self
            .client
            .put(self.document_url(&document.id))
            .json(document)
            .send()
            .await?;
        check(resp, false).await
    }

    async fn delete(&self, id: &str) -> Result<(), SearchIndexError> {
        let resp = self.client.delete(self.document_url(id)).send().await?;
        // Deleting a missing document is a no-op.
        check(resp, true).await
    }
}

async fn check(resp: reqwest::Response, allow_missing: bool) -> Result<(), SearchIndexError> {
    let status = resp.status();
    if status.is_success() || (allow_missing && status == StatusCode::NOT_FOUND) {
        return Ok(());
    }
    Err(SearchIndexError::Status {
        status: status.as_u16(),
        body: resp.text().await.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_url_joins_base_index_and_id() {
        let index = HttpSearchIndex::new(Client::new(), "http://search:9200/", "products");
        assert_eq!(
            index.document_url("p1"),
            "http://search:9200/products/_doc/p1"
        );
    }

    #[test]
    fn ids_are_percent_encoded() {
        let index = HttpSearchIndex::new(Client::new(), "http://search:9200", "products");
        assert_eq!(
            index.document_url("a b/c"),
            "http://search:9200/products/_doc/a%20b%2Fc"
        );
        assert_eq!(
            index.document_url("sku-1_2.3~"),
            "http://search:9200/products/_doc/sku-1_2.3~"
        );
    }

    #[tokio::test]
    async fn unreachable_index_reports_request_error() {
        let index = HttpSearchIndex::new(Client::new(), "http://127.0.0.1:1", "products");
        let err = index.delete("p1").await.unwrap_err();
        assert!(matches!(err, SearchIndexError::Request(_)));
    }
}
