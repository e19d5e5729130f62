//! Tool registry: names, descriptions, schemas and handler bindings.

use serde::Serialize;
use serde_json::{json, Value};

use crate::fetchfox::Operation;

/// What handles a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Echoes its message; answered locally.
    Echo,
    /// Adds two numbers; answered locally.
    Add,
    /// Runs a FetchFox job.
    Remote(Operation),
}

impl ToolKind {
    /// Looks up a tool by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "echo" => Some(Self::Echo),
            "add" => Some(Self::Add),
            other => Operation::from_name(other).map(Self::Remote),
        }
    }
}

/// A tool definition for tools/list response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
    /// JSON Schema for the tool's `structuredContent`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

const PATTERN_DESCRIPTION: &str = "A URL pattern that can include * and ** wildcards. \
     It defines which URLs the crawl looks for. * matches any character except /, \
     ** matches any character including /.\n\n\
     Examples:\n\n\
     - https://example.com/** finds every URL on example.com\n\
     - https://example.com/books/* finds URLs directly under /books on example.com";

const START_URLS_DESCRIPTION: &str = "If given, the crawl starts at these URLs. \
     Starting URLs have depth 0, the pages they link to depth 1, and so on. \
     Without them FetchFox picks a random set of starting URLs.";

const TEMPLATE_DESCRIPTION: &str = "Output data format. Each page is converted into \
     structured data following the template. A string template lets the AI choose the \
     output fields; an object template fixes the fields to its keys.";

const CONTENT_TRANSFORM_DESCRIPTION: &str = "How FetchFox reduces page HTML before \
     extraction.\n\n\
     - \"full_html\": all HTML except scripts and styles. Use when data goes missing; \
     sends many tokens, so it is expensive.\n\
     - \"slim_html\": text, links and images only. The default, and a good balance of \
     cost and coverage.\n\
     - \"text_only\": page text only. Low cost.\n\
     - \"json_only\": JSON objects on the page only. Use only if the data is known to \
     be in JSON.\n\
     - \"reduce\": AI-written code picks the relevant parts of the page. Slow.";

fn crawl_properties() -> Value {
    json!({
        "pattern": {
            "type": "string",
            "description": PATTERN_DESCRIPTION
        },
        "startUrls": {
            "type": "array",
            "items": { "type": "string", "format": "uri" },
            "description": START_URLS_DESCRIPTION
        },
        "maxVisits": {
            "type": "integer",
            "minimum": 1,
            "description": "The maximum number of URLs to visit before ending the crawl."
        },
        "maxDepth": {
            "type": "integer",
            "minimum": 0,
            "description": "The maximum depth from the starting URLs. Only used with startUrls."
        },
        "crawlStrategy": {
            "type": "string",
            "enum": ["dfs", "bfs", "random"],
            "description": "Visit order: dfs = depth first, bfs = breadth first, random = random pick. Default is random."
        }
    })
}

fn extract_properties() -> Value {
    json!({
        "template": {
            "anyOf": [
                { "type": "string" },
                { "type": "object" }
            ],
            "description": TEMPLATE_DESCRIPTION
        },
        "contentTransform": {
            "type": "string",
            "enum": ["slim_html", "full_html", "text_only", "json_only", "reduce"],
            "description": CONTENT_TRANSFORM_DESCRIPTION
        }
    })
}

fn hits_schema() -> Value {
    json!({
        "type": "array",
        "items": { "type": "string" },
        "description": "URLs matching the pattern"
    })
}

fn items_schema() -> Value {
    json!({
        "type": "array",
        "items": { "type": "object" },
        "description": "Structured data extracted from the pages"
    })
}

fn merge(target: &mut Value, extra: Value) {
    if let (Value::Object(target), Value::Object(extra)) = (target, extra) {
        target.extend(extra);
    }
}

/// Returns the list of available tools, in `tools/list` order.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    let mut extract = json!({
        "urls": {
            "type": "array",
            "items": { "type": "string", "format": "uri" },
            "minItems": 1,
            "description": "The URLs to scrape. Each one is visited and its content \
                            extracted into structured data following the template."
        }
    });
    merge(&mut extract, extract_properties());

    let mut scrape = crawl_properties();
    merge(&mut scrape, extract_properties());
    merge(
        &mut scrape,
        json!({
            "maxExtracts": {
                "type": "integer",
                "minimum": 1,
                "description": "The maximum number of matched pages to extract data from."
            }
        }),
    );

    vec![
        ToolDefinition {
            name: "echo".to_string(),
            description: Some("Echo back a message".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                },
                "required": ["message"]
            }),
            output_schema: None,
        },
        ToolDefinition {
            name: "add".to_string(),
            description: Some("Add two numbers".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["a", "b"]
            }),
            output_schema: None,
        },
        ToolDefinition {
            name: "crawl".to_string(),
            description: Some("Crawl a website for URLs matching a URL pattern".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": crawl_properties(),
                "required": ["pattern"]
            }),
            output_schema: Some(json!({
                "type": "object",
                "properties": { "hits": hits_schema() },
                "required": ["hits"]
            })),
        },
        ToolDefinition {
            name: "extract".to_string(),
            description: Some(
                "Scrape data from a specific URL, or a list of URLs, converting it into \
                 structured data."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": extract,
                "required": ["urls", "template"]
            }),
            output_schema: Some(json!({
                "type": "object",
                "properties": { "items": items_schema() },
                "required": ["items"]
            })),
        },
        ToolDefinition {
            name: "scrape".to_string(),
            description: Some(
                "Scrape data based on a URL pattern, converting URLs that match the \
                 pattern into structured data."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": scrape,
                "required": ["pattern", "template"]
            }),
            output_schema: Some(json!({
                "type": "object",
                "properties": {
                    "hits": hits_schema(),
                    "items": items_schema()
                },
                "required": ["hits", "items"]
            })),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_definition_resolves() {
        for tool in tool_definitions() {
            assert!(
                ToolKind::from_name(&tool.name).is_some(),
                "{} has no handler",
                tool.name
            );
            assert!(tool.input_schema.is_object());
        }
        assert_eq!(ToolKind::from_name("nope"), None);
    }

    #[test]
    fn scrape_schema_is_crawl_plus_extract_without_urls() {
        let tools = tool_definitions();
        let scrape = tools.iter().find(|t| t.name == "scrape").unwrap();
        let props = scrape.input_schema["properties"].as_object().unwrap();

        for key in ["pattern", "startUrls", "maxVisits", "maxDepth", "crawlStrategy"] {
            assert!(props.contains_key(key), "missing {key}");
        }
        for key in ["template", "contentTransform", "maxExtracts"] {
            assert!(props.contains_key(key), "missing {key}");
        }
        assert!(!props.contains_key("urls"));
    }

    #[test]
    fn output_schemas_match_operation_fields() {
        let tools = tool_definitions();
        let props = |name: &str| {
            tools.iter().find(|t| t.name == name).unwrap().output_schema.as_ref().unwrap()
                ["properties"]
                .clone()
        };
        assert!(props("crawl").get("items").is_none());
        assert!(props("extract").get("hits").is_none());
        assert!(props("scrape").get("hits").is_some());
        assert!(props("scrape").get("items").is_some());
    }

    #[test]
    fn definitions_serialise_camel_case() {
        let value = serde_json::to_value(&tool_definitions()[2]).unwrap();
        assert!(value.get("inputSchema").is_some());
        assert!(value.get("outputSchema").is_some());
        let echo = serde_json::to_value(&tool_definitions()[0]).unwrap();
        assert!(echo.get("outputSchema").is_none());
    }
}
