use super::{EmbeddingClient, EmbeddingClientError, l2_normalize, validate_batch};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Embedding client for `POST {base_url}/embeddings` on OpenAI-compatible endpoints.
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddingClient {
    /// Build a client against `base_url` (for example `https://api.openai.com/v1`).
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        dimension: usize,
    ) -> Result<Self, EmbeddingClientError> {
        let http = Client::builder()
            .user_agent("rusty-docs/embeddings")
            .build()
            .map_err(|error| EmbeddingClientError::ProviderUnavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url,
            api_key,
            model,
            dimension,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }

    /// Only the `text-embedding-3` family accepts a requested output dimension.
    fn supports_dimensions(&self) -> bool {
        self.model.starts_with("text-embedding-3")
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        let expected = texts.len();
        let mut payload = json!({
            "model": self.model,
            "input": texts,
        });
        if self.supports_dimensions() {
            payload["dimensions"] = json!(self.dimension);
        }

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.endpoint()
                ))
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            return Err(EmbeddingClientError::ProviderUnavailable(format!(
                "embeddings endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let mut body: EmbeddingsResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode embeddings response: {error}"
            ))
        })?;

        // Responses carry an explicit index; restore input order before returning.
        body.data
            .sort_by_key(|item| item.index.unwrap_or(usize::MAX));
        let mut embeddings: Vec<Vec<f32>> =
            body.data.into_iter().map(|item| item.embedding).collect();
        validate_batch(&embeddings, expected, self.dimension)?;
        for vector in &mut embeddings {
            l2_normalize(vector);
        }

        tracing::debug!(model = %self.model, count = expected, "Generated OpenAI embeddings");
        Ok(embeddings)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn client(base_url: String, model: &str, dimension: usize) -> OpenAiEmbeddingClient {
        OpenAiEmbeddingClient::new(base_url, "sk-test".into(), model.into(), dimension)
            .expect("client")
    }

    #[tokio::test]
    async fn parses_embeddings_in_index_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/embeddings")
                    .header("authorization", "Bearer sk-test")
                    .json_body_partial(r#"{"model":"text-embedding-3-small","dimensions":2}"#);
                then.status(200).json_body(json!({
                    "data": [
                        { "index": 1, "embedding": [0.0, 2.0] },
                        { "index": 0, "embedding": [3.0, 0.0] }
                    ]
                }));
            })
            .await;

        let embeddings = client(server.base_url(), "text-embedding-3-small", 2)
            .generate_embeddings(vec!["first".into(), "second".into()])
            .await
            .expect("embeddings");

        mock.assert_async().await;
        assert_eq!(embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn reports_provider_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(429).body("rate limited");
            })
            .await;

        let error = client(server.base_url(), "text-embedding-ada-002", 2)
            .generate_embeddings(vec!["text".into()])
            .await
            .unwrap_err();

        assert!(
            matches!(error, EmbeddingClientError::GenerationFailed(ref message) if message.contains("429"))
        );
    }

    #[tokio::test]
    async fn rejects_short_responses() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200).json_body(json!({
                    "data": [{ "index": 0, "embedding": [1.0, 0.0] }]
                }));
            })
            .await;

        let error = client(server.base_url(), "text-embedding-ada-002", 2)
            .generate_embeddings(vec!["a".into(), "b".into()])
            .await
            .unwrap_err();

        assert!(matches!(error, EmbeddingClientError::InvalidResponse(_)));
    }
}
