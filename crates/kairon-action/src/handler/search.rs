//! Google custom search and generic web search actions.
//!
//! Both query with the latest user message unless a query parameter is
//! configured, format the top results as links and optionally copy the
//! formatted text into a slot.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::composer::inline;
use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{send_json, ActionContext, ActionHandler};
use crate::types::{ActionType, ParameterSpec};

const DEFAULT_FAILURE_RESPONSE: &str = "I have failed to process your request.";

/// One normalized search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

impl SearchResult {
    fn render(&self) -> String {
        format!(
            "{}\nTo know more, please visit: <a href = \"{}\" target=\"_blank\" >{}</a>",
            self.snippet, self.link, self.title
        )
    }
}

/// Join the top `limit` results into one reply.
pub fn format_results(results: &[SearchResult], limit: usize) -> String {
    results
        .iter()
        .take(limit)
        .map(SearchResult::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchOutput {
    #[serde(default = "default_num_results")]
    pub num_results: usize,
    /// Search text; defaults to the latest user message.
    #[serde(default)]
    pub query: Option<ParameterSpec>,
    #[serde(default = "default_failure_response")]
    pub failure_response: String,
    #[serde(default)]
    pub set_slot: Option<String>,
    #[serde(default = "default_dispatch")]
    pub dispatch_response: bool,
}

fn default_num_results() -> usize {
    1
}

fn default_failure_response() -> String {
    DEFAULT_FAILURE_RESPONSE.to_string()
}

fn default_dispatch() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleSearchConfig {
    pub api_key: ParameterSpec,
    pub search_engine_id: String,
    #[serde(flatten)]
    pub output: SearchOutput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSearchConfig {
    /// Restrict results to one site.
    #[serde(default)]
    pub website: Option<String>,
    #[serde(flatten)]
    pub output: SearchOutput,
}

fn search_query(ctx: &ActionContext<'_>, output: &SearchOutput) -> Result<String, ActionError> {
    let context = ctx.context(false);
    let query = match &output.query {
        Some(spec) => inline(&ctx.resolver(&context).resolve(spec)?),
        None => context.user_message().unwrap_or_default().to_string(),
    };
    if query.trim().is_empty() {
        return Err(ActionError::ParameterResolution(
            "search query is empty".to_string(),
        ));
    }
    Ok(query)
}

/// Log, dispatch and slot the search outcome.
fn respond(
    ctx: &mut ActionContext<'_>,
    kind: &str,
    query: &str,
    output: &SearchOutput,
    outcome: Result<Vec<SearchResult>, ActionError>,
) -> SlotChanges {
    let text = match &outcome {
        Ok(results) if !results.is_empty() => format_results(results, output.num_results),
        Ok(_) => output.failure_response.clone(),
        Err(e) => {
            warn!(bot = %ctx.bot, action = %ctx.action_name, error = %ctx.scrubbed(e), "Search failed");
            ctx.log.fail(e);
            output.failure_response.clone()
        }
    };
    ctx.log.push_event(
        kind,
        json!({
            "query": query,
            "results": outcome.as_ref().map(|r| r.len()).unwrap_or(0),
            "error": outcome.as_ref().err().map(|e| e.to_string()),
        }),
    );

    let mut slots = SlotChanges::new();
    if let Some(slot) = &output.set_slot {
        slots.set(slot.clone(), Value::String(text.clone()));
    }
    if output.dispatch_response {
        ctx.dispatcher.utter_text(text.clone());
    }
    ctx.log.set_bot_response(text.clone());
    slots.set_response(text);
    slots
}

pub struct GoogleSearchHandler;

#[async_trait]
impl ActionHandler for GoogleSearchHandler {
    fn action_type(&self) -> ActionType {
        ActionType::GoogleSearch
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: GoogleSearchConfig = ctx.parse_config()?;
        let query = search_query(ctx, &config.output)?;
        let context = ctx.context(false);
        let api_key = inline(&ctx.resolver(&context).resolve(&config.api_key)?);
        let num = config.output.num_results.to_string();

        let request = ctx
            .services
            .http
            .get(&ctx.services.config.integrations.google_search_url)
            .query(&[
                ("key", api_key.as_str()),
                ("cx", config.search_engine_id.as_str()),
                ("q", query.as_str()),
                ("num", num.as_str()),
            ]);
        let outcome = send_json(request, "Google search").await.map(|body| {
            body["items"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .map(|item| SearchResult {
                            title: inline(&item["title"]),
                            link: inline(&item["link"]),
                            snippet: inline(&item["snippet"]),
                        })
                        .collect()
                })
                .unwrap_or_default()
        });
        Ok(respond(ctx, "google_search", &query, &config.output, outcome))
    }
}

pub struct WebSearchHandler;

#[async_trait]
impl ActionHandler for WebSearchHandler {
    fn action_type(&self) -> ActionType {
        ActionType::WebSearch
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: WebSearchConfig = ctx.parse_config()?;
        let query = search_query(ctx, &config.output)?;

        let outcome = match ctx.services.config.integrations.web_search_url.as_deref() {
            Some(url) => {
                let mut params = vec![
                    ("text", query.clone()),
                    ("topn", config.output.num_results.to_string()),
                ];
                if let Some(site) = &config.website {
                    params.push(("site", site.clone()));
                }
                let request = ctx.services.http.get(url).query(&params);
                send_json(request, "Web search").await.map(|body| {
                    body["data"]
                        .as_array()
                        .map(|items| {
                            items
                                .iter()
                                .map(|item| SearchResult {
                                    title: inline(&item["title"]),
                                    link: inline(&item["url"]),
                                    snippet: inline(&item["description"]),
                                })
                                .collect()
                        })
                        .unwrap_or_default()
                })
            }
            None => Err(ActionError::UpstreamFailure(
                "web search service is not configured".to_string(),
            )),
        };
        Ok(respond(ctx, "web_search", &query, &config.output, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use kairon_core::types::{ActionStatus, SlotEvent};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    #[test]
    fn test_format_results_takes_top_n() {
        let results = vec![
            SearchResult {
                title: "One".into(),
                link: "https://one".into(),
                snippet: "first".into(),
            },
            SearchResult {
                title: "Two".into(),
                link: "https://two".into(),
                snippet: "second".into(),
            },
        ];
        let text = format_results(&results, 1);
        assert!(text.starts_with("first\n"));
        assert!(text.contains("https://one"));
        assert!(!text.contains("second"));
    }

    #[tokio::test]
    async fn test_google_search_uses_user_message_and_secret() {
        let harness = TestHarness::new().await;
        Mock::given(method("GET"))
            .and(path("/customsearch/v1"))
            .and(query_param("key", "sk-live-123"))
            .and(query_param("cx", "engine-1"))
            .and(query_param("q", "hello there"))
            .and(query_param("num", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"title": "Kairon", "link": "https://kairon.ai", "snippet": "Conversational AI"},
                    {"title": "Docs", "link": "https://docs.kairon.ai", "snippet": "Documentation"}
                ]
            })))
            .expect(1)
            .mount(&harness.server)
            .await;
        harness.save_action(
            "action_google",
            "google_search_action",
            json!({
                "api_key": {"key": "api_key", "parameter_type": "key_vault", "value": "API_KEY"},
                "search_engine_id": "engine-1",
                "num_results": 2,
                "set_slot": "search_result"
            }),
        );

        let reply = harness
            .executor
            .run(&harness.request("action_google", json!({})))
            .await
            .unwrap();
        let text = reply.responses[0].text.clone().unwrap();
        assert!(text.contains("Conversational AI"));
        assert!(text.contains("https://docs.kairon.ai"));
        assert!(reply
            .events
            .contains(&SlotEvent::slot("search_result", json!(text))));
        assert!(!serde_json::to_string(&harness.last_log())
            .unwrap()
            .contains("sk-live-123"));
    }

    #[tokio::test]
    async fn test_google_search_failure_uses_failure_response() {
        let harness = TestHarness::new().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "quota"})))
            .mount(&harness.server)
            .await;
        harness.save_action(
            "action_google",
            "google_search_action",
            json!({
                "api_key": {"key": "api_key", "parameter_type": "value", "value": "k"},
                "search_engine_id": "engine-1",
                "failure_response": "No luck."
            }),
        );
        let reply = harness
            .executor
            .run(&harness.request("action_google", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.responses[0].text.as_deref(), Some("No luck."));
        assert_eq!(harness.last_log().status, ActionStatus::Failure);
    }

    #[tokio::test]
    async fn test_web_search_with_site_and_query_slot() {
        let harness = TestHarness::new().await;
        Mock::given(method("GET"))
            .and(path("/websearch"))
            .and(query_param("text", "pricing"))
            .and(query_param("site", "kairon.ai"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"title": "Pricing", "url": "https://kairon.ai/pricing", "description": "Plans"}]
            })))
            .expect(1)
            .mount(&harness.server)
            .await;
        harness.save_action(
            "action_web",
            "web_search_action",
            json!({
                "website": "kairon.ai",
                "query": {"key": "q", "parameter_type": "slot", "value": "topic"}
            }),
        );
        let reply = harness
            .executor
            .run(&harness.request("action_web", json!({"topic": "pricing"})))
            .await
            .unwrap();
        assert!(reply.responses[0]
            .text
            .as_deref()
            .unwrap()
            .contains("https://kairon.ai/pricing"));
    }

    #[tokio::test]
    async fn test_empty_results_use_failure_response() {
        let harness = TestHarness::new().await;
        Mock::given(method("GET"))
            .and(path("/websearch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&harness.server)
            .await;
        harness.save_action("action_web", "web_search_action", json!({}));
        let reply = harness
            .executor
            .run(&harness.request("action_web", json!({})))
            .await
            .unwrap();
        assert_eq!(
            reply.responses[0].text.as_deref(),
            Some(DEFAULT_FAILURE_RESPONSE)
        );
        assert_eq!(harness.last_log().status, ActionStatus::Success);
    }
}
