use async_trait::async_trait;
use lazy_static::lazy_static;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::{parse_arguments, ToolHandler};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

pub const NAME: &str = "web_search";
pub const INSTANT_ANSWER_URL: &str = "https://api.duckduckgo.com/";
pub const HTML_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

const PAGE_CHARS: usize = 3000;
const PAGE_TIMEOUT: Duration = Duration::from_secs(5);
const SKIPPED_TAGS: [&str; 6] = ["script", "style", "nav", "footer", "header", "noscript"];
const RULE_WIDTH: usize = 80;

lazy_static! {
    static ref RESULT: Selector = Selector::parse(".result").unwrap();
    static ref RESULT_LINK: Selector = Selector::parse("a.result__a").unwrap();
    static ref RESULT_SNIPPET: Selector = Selector::parse(".result__snippet").unwrap();
}

/// Where searches are sent
#[derive(Debug, Clone, PartialEq)]
pub struct SearchEndpoints {
    pub instant_answer: String,
    pub html: String,
}

impl Default for SearchEndpoints {
    fn default() -> Self {
        Self {
            instant_answer: INSTANT_ANSWER_URL.to_string(),
            html: HTML_SEARCH_URL.to_string(),
        }
    }
}

fn default_max_results() -> usize {
    3
}

fn default_fetch_content() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    query: String,
    #[serde(default = "default_max_results")]
    max_results: usize,
    #[serde(default = "default_fetch_content")]
    fetch_content: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    answer: Value,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    definition: String,
    #[serde(default, rename = "DefinitionURL")]
    definition_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct WebSearch {
    client: Client,
    endpoints: SearchEndpoints,
}

impl WebSearch {
    /// `client` carries the User-Agent and timeouts used for every request
    pub fn new(client: Client, endpoints: SearchEndpoints) -> Self {
        Self { client, endpoints }
    }

    async fn instant_answer(&self, query: &str) -> Option<String> {
        let response = self
            .client
            .get(&self.endpoints.instant_answer)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;
        // The API answers with a javascript content type, so decode by hand
        let body = response.text().await.ok()?;
        let answer: InstantAnswer = serde_json::from_str(&body).ok()?;

        let direct = match &answer.answer {
            Value::String(s) => s.clone(),
            _ => String::new(),
        };
        let (text, url) = [
            (direct, String::new()),
            (answer.abstract_text, answer.abstract_url),
            (answer.definition, answer.definition_url),
        ]
        .into_iter()
        .find(|(text, _)| !text.trim().is_empty())?;

        let mut lines = vec![format!("Instant Answer: {}", text.trim())];
        if !url.is_empty() {
            lines.push(format!("Source: {}", url));
        }
        Some(lines.join("\n"))
    }

    async fn search(&self, query: &str, max_results: usize) -> AgentResult<Vec<SearchResult>> {
        let html = self
            .client
            .post(&self.endpoints.html)
            .form(&[("q", query)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AgentError::ExecutionError(format!("Failed to perform web search: {}", e)))?
            .text()
            .await
            .map_err(|e| AgentError::ExecutionError(format!("Failed to perform web search: {}", e)))?;

        Ok(parse_results(&html, max_results))
    }

    async fn fetch_page(&self, url: &str) -> String {
        let response = match self
            .client
            .get(url)
            .timeout(PAGE_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return "[Timeout: Page took too long to load]".to_string(),
            Err(e) => return format!("[Error fetching page: {}]", truncate(&e.to_string(), 100)),
        };
        match response.text().await {
            Ok(html) => truncate(&page_text(&html), PAGE_CHARS),
            Err(e) => format!("[Error fetching page: {}]", truncate(&e.to_string(), 100)),
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        format!("{}...", text.chars().take(limit).collect::<String>())
    } else {
        text.to_string()
    }
}

/// Result links are redirects carrying the target in their `uddg` parameter
fn resolve_link(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    Url::parse(&absolute)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "uddg")
                .map(|(_, target)| target.into_owned())
        })
        .unwrap_or(absolute)
}

pub fn parse_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    document
        .select(&RESULT)
        .filter_map(|result| {
            let link = result.select(&RESULT_LINK).next()?;
            let href = link.value().attr("href")?;
            let snippet = result
                .select(&RESULT_SNIPPET)
                .next()
                .map(|s| s.text().collect::<Vec<_>>().join(" "))
                .unwrap_or_default();
            Some(SearchResult {
                title: collapse_whitespace(&link.text().collect::<Vec<_>>().join(" ")),
                url: resolve_link(href),
                snippet: collapse_whitespace(&snippet),
            })
        })
        .take(max_results)
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible text of a page, without scripts, styles and page chrome
pub fn page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut words: Vec<&str> = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| SKIPPED_TAGS.contains(&element.name()))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

#[async_trait]
impl ToolHandler for WebSearch {
    fn definition(&self) -> Tool {
        Tool::new(
            NAME,
            "Search the internet for information using DuckDuckGo",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of results to return (default: 3)",
                        "default": 3
                    },
                    "fetch_content": {
                        "type": "boolean",
                        "description": "Whether to fetch full page content (default: true)",
                        "default": true
                    }
                },
                "required": ["query"]
            }),
        )
    }

    async fn execute(&self, arguments: Map<String, Value>) -> AgentResult<String> {
        let params: Params = parse_arguments(NAME, arguments)?;

        if let Some(answer) = self.instant_answer(&params.query).await {
            return Ok(answer);
        }

        let results = self.search(&params.query, params.max_results).await?;
        if results.is_empty() {
            return Ok("No results found.".to_string());
        }

        let rule = "=".repeat(RULE_WIDTH);
        let mut lines =
            vec!["WEB SEARCH RESULTS - Full content extracted and ready to use:\n".to_string()];
        for (index, result) in results.iter().enumerate() {
            lines.push(format!("\n{}", rule));
            lines.push(format!("Result #{}: {}", index + 1, result.title));
            lines.push(rule.clone());
            if params.fetch_content {
                lines.push(format!("\n[Fetching full content from {}...]\n", result.url));
                let content = self.fetch_page(&result.url).await;
                lines.push(format!("FULL PAGE CONTENT:\n{}\n", content));
            } else {
                lines.push(format!("\nSNIPPET: {}\n", result.snippet));
            }
            lines.push(format!("Source URL: {}", result.url));
        }
        lines.push(format!("\n{}", rule));
        lines.push(
            "\nNOTE: The content above has been extracted from actual web pages. \
             You can directly use and cite this information in your response. \
             You do NOT need to visit the URLs - the full content is already provided above."
                .to_string(),
        );
        Ok(lines.join("\n"))
    }
}
