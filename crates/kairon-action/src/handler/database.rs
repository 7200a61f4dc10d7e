//! Database action handler and the vector store client it shares with the
//! LLM handlers.
//!
//! Talks to a Qdrant-compatible REST API: embedding search goes through
//! `points/search`, payload search through `points/scroll`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::composer::{inline, to_utterance};
use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};
use crate::llm::LlmClient;
use crate::types::{ActionType, ParameterSpec, ResponseTemplate, SlotAssignment};

// =============================================================================
// Vector store client
// =============================================================================

pub struct VectorStore<'a> {
    http: &'a Client,
    base_url: &'a str,
}

impl<'a> VectorStore<'a> {
    pub fn new(http: &'a Client, base_url: Option<&'a str>) -> Result<Self, ActionError> {
        let base_url = base_url.ok_or_else(|| {
            ActionError::UpstreamFailure("vector database is not configured".to_string())
        })?;
        Ok(Self { http, base_url })
    }

    fn url(&self, collection: &str, op: &str) -> String {
        format!(
            "{}/collections/{}/points/{}",
            self.base_url.trim_end_matches('/'),
            collection,
            op
        )
    }

    async fn post(&self, url: String, body: Value) -> Result<Value, ActionError> {
        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(ActionError::UpstreamFailure(format!(
                "vector database returned {}: {}",
                status, body
            )));
        }
        Ok(body)
    }

    /// Nearest neighbours of `vector`, best first.
    pub async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f64>,
    ) -> Result<Vec<Value>, ActionError> {
        let mut body = json!({"vector": vector, "limit": limit, "with_payload": true});
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }
        let reply = self.post(self.url(collection, "search"), body).await?;
        Ok(reply["result"].as_array().cloned().unwrap_or_default())
    }

    /// Points whose payload matches `filter`.
    pub async fn scroll(
        &self,
        collection: &str,
        filter: Value,
        limit: usize,
    ) -> Result<Vec<Value>, ActionError> {
        let body = json!({"filter": filter, "limit": limit, "with_payload": true});
        let reply = self.post(self.url(collection, "scroll"), body).await?;
        Ok(reply["result"]["points"]
            .as_array()
            .cloned()
            .unwrap_or_default())
    }

    /// Embed `query` and return the matching payloads' `content` fields.
    pub async fn retrieve_content(
        &self,
        llm: &LlmClient,
        collection: &str,
        query: &str,
        limit: usize,
        score_threshold: Option<f64>,
    ) -> Result<Vec<String>, ActionError> {
        let vector = llm.embed(query).await?;
        let hits = self.search(collection, &vector, limit, score_threshold).await?;
        Ok(hits
            .iter()
            .filter_map(|hit| hit["payload"].get("content").map(inline))
            .collect())
    }
}

// =============================================================================
// Handler
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    EmbeddingSearch,
    PayloadSearch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseActionConfig {
    pub collection: String,
    pub query_type: QueryType,
    /// Search text for embedding search; a JSON filter for payload search.
    pub query: ParameterSpec,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub score_threshold: Option<f64>,
    #[serde(default)]
    pub response: ResponseTemplate,
    #[serde(default)]
    pub set_slots: Vec<SlotAssignment>,
}

fn default_limit() -> usize {
    10
}

pub struct DatabaseActionHandler;

#[async_trait]
impl ActionHandler for DatabaseActionHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Database
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: DatabaseActionConfig = ctx.parse_config()?;
        let context = ctx.context(false);
        let mut sources = vec![config.response.value.as_str()];
        sources.extend(config.set_slots.iter().map(|s| s.value.as_str()));
        let composer = ctx.default_composer(&context, &sources)?;
        let query = ctx.resolver(&context).resolve(&config.query)?;

        let store = VectorStore::new(
            &ctx.services.http,
            ctx.services.config.integrations.vector_db_url.as_deref(),
        )?;
        let results = match config.query_type {
            QueryType::EmbeddingSearch => {
                let vector = ctx.services.llm.embed(&inline(&query)).await?;
                store
                    .search(&config.collection, &vector, config.limit, config.score_threshold)
                    .await?
            }
            QueryType::PayloadSearch => {
                let filter = match &query {
                    Value::String(text) => serde_json::from_str(text).map_err(|e| {
                        ActionError::ParameterResolution(format!("payload filter is not JSON: {}", e))
                    })?,
                    other => other.clone(),
                };
                store.scroll(&config.collection, filter, config.limit).await?
            }
        };

        let data = json!({"data": results});
        ctx.log.push_event(
            "database",
            json!({"collection": config.collection, "query": query, "result": data["data"]}),
        );

        let composed = composer.compose(&config.response, &data).await?;
        let filled = composer.fill_slots(&config.set_slots, &data).await?;
        let mut slots: SlotChanges = filled.into_iter().collect();
        if config.response.dispatch {
            ctx.dispatcher
                .utter_message(to_utterance(&composed.value, config.response.dispatch_type));
        }
        ctx.log.set_bot_response(composed.value.clone());
        slots.set_response(composed.value);
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use kairon_core::types::SlotEvent;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, ResponseTemplate as MockResponse};

    #[tokio::test]
    async fn test_payload_search() {
        let harness = TestHarness::new().await;
        Mock::given(method("POST"))
            .and(path("/collections/products/points/scroll"))
            .and(body_partial_json(json!({"filter": {"must": [{"key": "sku", "match": {"value": "A1"}}]}})))
            .respond_with(MockResponse::new(200).set_body_json(json!({
                "result": {"points": [{"id": 1, "payload": {"name": "Lamp", "price": 20}}]}
            })))
            .mount(&harness.server)
            .await;
        harness.save_action(
            "action_lookup",
            "database_action",
            json!({
                "collection": "products",
                "query_type": "payload_search",
                "query": {
                    "key": "filter",
                    "parameter_type": "value",
                    "value": "{\"must\": [{\"key\": \"sku\", \"match\": {\"value\": \"A1\"}}]}"
                },
                "response": {"value": "${data.0.payload.name} costs ${data.0.payload.price}"},
                "set_slots": [{"name": "price", "value": "data.0.payload.price"}]
            }),
        );

        let reply = harness
            .executor
            .run(&harness.request("action_lookup", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.responses[0].text.as_deref(), Some("Lamp costs 20"));
        assert!(reply.events.contains(&SlotEvent::slot("price", json!(20))));
    }

    #[tokio::test]
    async fn test_embedding_search() {
        let harness = TestHarness::new().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(MockResponse::new(200).set_body_json(json!({
                "data": [{"embedding": [0.5, 0.25]}]
            })))
            .mount(&harness.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections/faq/points/search"))
            .and(body_partial_json(json!({"vector": [0.5, 0.25], "limit": 1})))
            .respond_with(MockResponse::new(200).set_body_json(json!({
                "result": [{"id": 3, "score": 0.91, "payload": {"content": "We open at 9."}}]
            })))
            .mount(&harness.server)
            .await;
        harness.save_action(
            "action_search",
            "database_action",
            json!({
                "collection": "faq",
                "query_type": "embedding_search",
                "query": {"key": "q", "parameter_type": "user_message"},
                "limit": 1,
                "response": {"value": "${data.0.payload.content}"}
            }),
        );

        let reply = harness
            .executor
            .run(&harness.request("action_search", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.responses[0].text.as_deref(), Some("We open at 9."));
    }
}
