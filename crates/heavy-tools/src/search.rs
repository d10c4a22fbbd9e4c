//! Web search through DuckDuckGo's HTML endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::debug;

use heavy_core::{Error, PropertySchema, Tool, ToolDefinition, ToolOutput, ToolParameters};

const DEFAULT_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const DEFAULT_MAX_RESULTS: usize = 5;
const MAX_RESULTS_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct SearchTool {
    client: Client,
    endpoint: String,
}

impl Default for SearchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchTool {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .user_agent(concat!("heavy/", env!("CARGO_PKG_VERSION")))
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web and return result titles, URLs and snippets."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property("query", PropertySchema::string("The search query"), true)
                .add_property(
                    "max_results",
                    PropertySchema::integer("Maximum number of results (1-10)")
                        .with_default(serde_json::json!(DEFAULT_MAX_RESULTS)),
                    false,
                ),
        )
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, Error> {
        let args: SearchArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool("search", format!("Invalid arguments: {}", e)))?;

        let query = args.query.trim();
        if query.is_empty() {
            return Ok(ToolOutput::error("Search query must not be empty"));
        }
        let max_results = args
            .max_results
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_LIMIT);

        debug!(query, max_results, "Searching");

        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("q", query)])
            .send()
            .await
            .map_err(|e| Error::tool("search", format!("Search request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::tool(
                "search",
                format!("Search returned HTTP {}", response.status()),
            ));
        }

        let html = response
            .text()
            .await
            .map_err(|e| Error::tool("search", format!("Failed to read response: {}", e)))?;

        let results = parse_results(&html, max_results)?;
        debug!(query, count = results.len(), "Search finished");

        if results.is_empty() {
            return Ok(ToolOutput::success(format!("No results found for '{}'", query)));
        }
        Ok(ToolOutput::success(format_results(&results)))
    }
}

/// Extract up to `limit` results from a DuckDuckGo HTML results page.
pub fn parse_results(html: &str, limit: usize) -> Result<Vec<SearchResult>, Error> {
    let selector = |css: &str| {
        Selector::parse(css).map_err(|_| Error::tool("search", format!("Invalid selector: {}", css)))
    };
    let result_sel = selector(".result")?;
    let title_sel = selector(".result__a")?;
    let snippet_sel = selector(".result__snippet")?;

    let document = Html::parse_document(html);
    let mut results = Vec::new();

    for result in document.select(&result_sel) {
        let Some(link) = result.select(&title_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };

        results.push(SearchResult {
            title: element_text(&link),
            url: resolve_link(href),
            snippet: result
                .select(&snippet_sel)
                .next()
                .map(|el| element_text(&el))
                .unwrap_or_default(),
        });

        if results.len() >= limit {
            break;
        }
    }

    Ok(results)
}

/// DuckDuckGo wraps targets in a redirect (`//duckduckgo.com/l/?uddg=...`).
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

fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_results(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut entry = format!("{}. {}\n   URL: {}", i + 1, r.title, r.url);
            if !r.snippet.is_empty() {
                entry.push_str(&format!("\n   {}", r.snippet));
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
        <html><body>
          <div class="result results_links">
            <h2 class="result__title">
              <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=abc">Rust <b>Programming</b> Language</a>
            </h2>
            <a class="result__snippet" href="#">A language empowering everyone to build reliable software.</a>
          </div>
          <div class="result results_links">
            <a class="result__a" href="https://doc.rust-lang.org/book/">The Rust Book</a>
          </div>
          <div class="result results_links">
            <a class="result__a" href="https://crates.io/">crates.io</a>
            <a class="result__snippet">The Rust community's crate registry</a>
          </div>
        </body></html>
    "##;

    #[test]
    fn test_parse_results() {
        let results = parse_results(PAGE, 10).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "Rust Programming Language");
        assert_eq!(results[0].url, "https://www.rust-lang.org/");
        assert!(results[0].snippet.starts_with("A language empowering"));
        assert_eq!(results[1].url, "https://doc.rust-lang.org/book/");
        assert!(results[1].snippet.is_empty());
    }

    #[test]
    fn test_parse_results_limit() {
        let results = parse_results(PAGE, 2).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_parse_empty_page() {
        assert!(parse_results("<html><body>No results.</body></html>", 5)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_format_results() {
        let formatted = format_results(&parse_results(PAGE, 2).unwrap());
        assert!(formatted.starts_with("1. Rust Programming Language\n   URL: https://www.rust-lang.org/"));
        assert!(formatted.contains("\n\n2. The Rust Book"));
    }

    #[tokio::test]
    async fn test_empty_query_is_reported() {
        let output = SearchTool::new()
            .execute(serde_json::json!({"query": "   "}))
            .await
            .unwrap();
        assert!(output.is_error);
    }
}
