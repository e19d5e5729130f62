//! Typed tool arguments.
//!
//! Arguments arrive as loose JSON. Each tool deserialises them into its own
//! struct, checks the constraints JSON Schema alone does not express well
//! here (URL syntax, minimums), and re-serialises the struct as the request
//! body for FetchFox. Unknown fields are dropped in the process.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::fetchfox::Operation;

/// How the crawler orders its visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStrategy {
    /// Depth first.
    Dfs,
    /// Breadth first.
    Bfs,
    /// Random order (the service default).
    Random,
}

/// How page HTML is reduced before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentTransform {
    /// Everything except scripts and styles.
    FullHtml,
    /// Text, links and images (the service default).
    SlimHtml,
    /// Text only.
    TextOnly,
    /// Embedded JSON only.
    JsonOnly,
    /// AI-selected page fragments.
    Reduce,
}

/// Output shape for extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Template {
    /// Natural-language description; the service picks the fields.
    Description(String),
    /// Field name to field description.
    Fields(Map<String, Value>),
}

/// Arguments of the `echo` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct EchoParams {
    /// Text to send back.
    pub message: String,
}

/// Arguments of the `add` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct AddParams {
    /// First addend.
    pub a: f64,
    /// Second addend.
    pub b: f64,
}

/// Arguments of the `crawl` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlParams {
    /// URL pattern; `*` matches within a path segment, `**` across segments.
    pub pattern: String,
    /// Depth-0 URLs. The service picks some when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_urls: Option<Vec<String>>,
    /// Maximum pages to visit, at least 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_visits: Option<u64>,
    /// Depth limit from the start URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u64>,
    /// Visit order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawl_strategy: Option<CrawlStrategy>,
}

/// Arguments of the `extract` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractParams {
    /// Pages to extract from.
    pub urls: Vec<String>,
    /// Output shape.
    pub template: Template,
    /// HTML reduction mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_transform: Option<ContentTransform>,
}

/// Arguments of the `scrape` tool: a crawl whose hits are extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeParams {
    /// URL pattern, as for `crawl`.
    pub pattern: String,
    /// Depth-0 URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_urls: Option<Vec<String>>,
    /// Maximum pages to visit, at least 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_visits: Option<u64>,
    /// Depth limit from the start URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u64>,
    /// Visit order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawl_strategy: Option<CrawlStrategy>,
    /// Maximum pages to extract from, at least 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_extracts: Option<u64>,
    /// Output shape.
    pub template: Template,
    /// HTML reduction mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_transform: Option<ContentTransform>,
}

/// Parses tool arguments, treating absent arguments as an empty object.
///
/// # Errors
///
/// Returns the deserialisation error message.
pub fn parse<T: DeserializeOwned>(arguments: &Value) -> Result<T, String> {
    let arguments = if arguments.is_null() {
        Value::Object(Map::new())
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments).map_err(|e| e.to_string())
}

/// Validates arguments for a remote operation and returns the request body.
///
/// # Errors
///
/// Returns a message describing the first problem found.
pub fn prepare(operation: Operation, arguments: &Value) -> Result<Value, String> {
    let body = match operation {
        Operation::Crawl => {
            let params: CrawlParams = parse(arguments)?;
            check_pattern(&params.pattern)?;
            check_urls("startUrls", params.start_urls.as_deref().unwrap_or_default())?;
            check_min("maxVisits", params.max_visits, 1)?;
            serde_json::to_value(params)
        }
        Operation::Extract => {
            let params: ExtractParams = parse(arguments)?;
            if params.urls.is_empty() {
                return Err("urls must contain at least one URL".to_string());
            }
            check_urls("urls", &params.urls)?;
            serde_json::to_value(params)
        }
        Operation::Scrape => {
            let params: ScrapeParams = parse(arguments)?;
            check_pattern(&params.pattern)?;
            check_urls("startUrls", params.start_urls.as_deref().unwrap_or_default())?;
            check_min("maxVisits", params.max_visits, 1)?;
            check_min("maxExtracts", params.max_extracts, 1)?;
            serde_json::to_value(params)
        }
    };
    body.map_err(|e| e.to_string())
}

fn check_pattern(pattern: &str) -> Result<(), String> {
    if pattern.trim().is_empty() {
        return Err("pattern cannot be empty".to_string());
    }
    Ok(())
}

fn check_urls(field: &str, urls: &[String]) -> Result<(), String> {
    for url in urls {
        Url::parse(url).map_err(|e| format!("{field}: '{url}' is not a valid URL: {e}"))?;
    }
    Ok(())
}

fn check_min(field: &str, value: Option<u64>, min: u64) -> Result<(), String> {
    match value {
        Some(v) if v < min => Err(format!("{field} must be at least {min}")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn crawl_body_is_camel_case() {
        let body = prepare(
            Operation::Crawl,
            &json!({
                "pattern": "https://example.com/books/*",
                "startUrls": ["https://example.com/books"],
                "maxVisits": 20,
                "crawlStrategy": "bfs",
                "somethingElse": true
            }),
        )
        .unwrap();

        assert_eq!(
            body,
            json!({
                "pattern": "https://example.com/books/*",
                "startUrls": ["https://example.com/books"],
                "maxVisits": 20,
                "crawlStrategy": "bfs"
            })
        );
    }

    #[test]
    fn crawl_rejects_bad_values() {
        assert!(prepare(Operation::Crawl, &json!({})).is_err());
        assert!(prepare(Operation::Crawl, &json!({"pattern": "  "})).is_err());
        assert!(prepare(Operation::Crawl, &json!({"pattern": "x", "maxVisits": 0})).is_err());
        assert!(prepare(Operation::Crawl, &json!({"pattern": "x", "maxDepth": -1})).is_err());
        assert!(
            prepare(Operation::Crawl, &json!({"pattern": "x", "crawlStrategy": "dijkstra"}))
                .is_err()
        );
        let err = prepare(
            Operation::Crawl,
            &json!({"pattern": "x", "startUrls": ["not a url"]}),
        )
        .unwrap_err();
        assert!(err.contains("startUrls"));
    }

    #[test]
    fn extract_accepts_both_template_forms() {
        let body = prepare(
            Operation::Extract,
            &json!({"urls": ["https://example.com/a"], "template": "{\"title\": \"page title\"}"}),
        )
        .unwrap();
        assert_eq!(body["template"], "{\"title\": \"page title\"}");

        let body = prepare(
            Operation::Extract,
            &json!({
                "urls": ["https://example.com/a"],
                "template": {"title": "page title"},
                "contentTransform": "text_only"
            }),
        )
        .unwrap();
        assert_eq!(body["template"]["title"], "page title");
        assert_eq!(body["contentTransform"], "text_only");
    }

    #[test]
    fn extract_requires_urls() {
        assert!(prepare(Operation::Extract, &json!({"template": "t"})).is_err());
        assert!(prepare(Operation::Extract, &json!({"urls": [], "template": "t"})).is_err());
    }

    #[test]
    fn scrape_checks_max_extracts() {
        let args = json!({"pattern": "https://a.test/**", "template": "t", "maxExtracts": 0});
        assert!(prepare(Operation::Scrape, &args).unwrap_err().contains("maxExtracts"));

        let args = json!({"pattern": "https://a.test/**", "template": "t", "maxExtracts": 5});
        let body = prepare(Operation::Scrape, &args).unwrap();
        assert_eq!(body["maxExtracts"], 5);
        assert!(body.get("urls").is_none());
    }

    #[test]
    fn null_arguments_are_empty() {
        let err = parse::<EchoParams>(&Value::Null).unwrap_err();
        assert!(err.contains("message"));
    }
}
