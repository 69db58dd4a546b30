//! Scraping tools exposed to the agent runtime.
//!
//! Failures never propagate into the session loop: the diagnostic is
//! serialized into the tool text so the LLM can plan an alternative
//! step.

use crate::session::{SessionTool, ToolHandler, ToolOutcome};
use scorchcrawl_core::truncate_to_chars;
use scorchcrawl_engine::EngineClient;
use serde_json::{json, Value};
use std::sync::Arc;

/// Engine responses can be huge; the session only needs a bounded view.
const MAX_TOOL_TEXT_CHARS: usize = 20_000;

fn engine_outcome(tool: &'static str, result: scorchcrawl_core::Result<Value>) -> ToolOutcome {
    match result {
        Ok(v) => {
            let (text, _, _) = truncate_to_chars(&v.to_string(), MAX_TOOL_TEXT_CHARS);
            ToolOutcome::success(text)
        }
        Err(e) => ToolOutcome::failure(tool, e),
    }
}

fn copy_fields(from: &Value, to: &mut Value, keys: &[&str]) {
    for key in keys {
        if let Some(v) = from.get(*key) {
            to[*key] = v.clone();
        }
    }
}

fn web_scrape(engine: Arc<EngineClient>) -> SessionTool {
    let handler: ToolHandler = Arc::new(move |args: Value| {
        let engine = engine.clone();
        Box::pin(async move {
            let Some(url) = args.get("url").and_then(Value::as_str).map(str::to_string) else {
                return ToolOutcome::failure("web_scrape", "url is required");
            };
            let mut params = json!({ "url": url });
            copy_fields(&args, &mut params, &["formats", "onlyMainContent", "waitFor"]);
            engine_outcome("web_scrape", engine.scrape(params).await)
        })
    });
    SessionTool {
        name: "web_scrape",
        description: "Scrape a single URL and return its content",
        input_schema: json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "formats": { "type": "array", "items": { "type": "string" } },
                "onlyMainContent": { "type": "boolean" },
                "waitFor": { "type": "number" }
            },
            "required": ["url"]
        }),
        handler,
    }
}

fn web_search(engine: Arc<EngineClient>) -> SessionTool {
    let handler: ToolHandler = Arc::new(move |args: Value| {
        let engine = engine.clone();
        Box::pin(async move {
            let Some(query) = args.get("query").and_then(Value::as_str).map(str::to_string)
            else {
                return ToolOutcome::failure("web_search", "query is required");
            };
            let mut params = json!({ "query": query });
            copy_fields(&args, &mut params, &["limit"]);
            engine_outcome("web_search", engine.search(params).await)
        })
    });
    SessionTool {
        name: "web_search",
        description: "Search the web and return result snippets with URLs",
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "number" }
            },
            "required": ["query"]
        }),
        handler,
    }
}

fn web_map(engine: Arc<EngineClient>) -> SessionTool {
    let handler: ToolHandler = Arc::new(move |args: Value| {
        let engine = engine.clone();
        Box::pin(async move {
            let Some(url) = args.get("url").and_then(Value::as_str).map(str::to_string) else {
                return ToolOutcome::failure("web_map", "url is required");
            };
            let mut params = json!({ "url": url });
            copy_fields(&args, &mut params, &["search", "limit"]);
            engine_outcome("web_map", engine.map(params).await)
        })
    });
    SessionTool {
        name: "web_map",
        description: "Discover the URLs of a site, optionally filtered by a search term",
        input_schema: json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "search": { "type": "string" },
                "limit": { "type": "number" }
            },
            "required": ["url"]
        }),
        handler,
    }
}

fn web_extract(engine: Arc<EngineClient>) -> SessionTool {
    let handler: ToolHandler = Arc::new(move |args: Value| {
        let engine = engine.clone();
        Box::pin(async move {
            let urls = args.get("urls").cloned().unwrap_or(Value::Null);
            if !urls.is_array() || urls.as_array().is_some_and(Vec::is_empty) {
                return ToolOutcome::failure("web_extract", "urls must be a non-empty array");
            }
            let mut params = json!({ "urls": urls });
            copy_fields(&args, &mut params, &["prompt", "schema"]);
            engine_outcome("web_extract", engine.extract(params).await)
        })
    });
    SessionTool {
        name: "web_extract",
        description: "Extract structured data from one or more URLs",
        input_schema: json!({
            "type": "object",
            "properties": {
                "urls": { "type": "array", "items": { "type": "string" } },
                "prompt": { "type": "string" },
                "schema": { "type": "object" }
            },
            "required": ["urls"]
        }),
        handler,
    }
}

/// The callable tool set handed to every research session.
pub fn scraping_tools(engine: Arc<EngineClient>) -> Vec<SessionTool> {
    vec![
        web_scrape(engine.clone()),
        web_search(engine.clone()),
        web_map(engine.clone()),
        web_extract(engine),
    ]
}
