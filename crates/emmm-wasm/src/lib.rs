use serde::Serialize;
use wasm_bindgen::prelude::*;

use emmm_core::{Message, MessageSeverity};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderResult {
    html: String,
    messages: Vec<JsMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsMessage {
    code: String,
    severity: String,
    info: String,
    start: usize,
    end: usize,
    referred_from: Vec<JsRange>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsRange {
    start: usize,
    end: usize,
}

/// Parses `source` with the stock configuration and returns
/// `{ html, messages }` for the editor preview.
#[wasm_bindgen]
pub fn render_html(source: &str) -> Result<JsValue, JsValue> {
    let (html, messages) = emmm_renderer::render_html(source, "<preview>");

    let messages = messages.iter().map(js_message).collect();
    let result = RenderResult { html, messages };
    serde_wasm_bindgen::to_value(&result).map_err(|err| JsValue::from_str(&err.to_string()))
}

#[wasm_bindgen]
pub fn render_html_sanitized(source: &str) -> Result<JsValue, JsValue> {
    let (html, messages) = emmm_renderer::render_html_sanitized(source, "<preview>");

    let messages = messages.iter().map(js_message).collect();
    let result = RenderResult { html, messages };
    serde_wasm_bindgen::to_value(&result).map_err(|err| JsValue::from_str(&err.to_string()))
}

fn js_message(message: &Message) -> JsMessage {
    let origin = message.origin();
    let mut referred_from = Vec::new();
    let mut frame = message;
    while let Some(inner) = &frame.referred {
        referred_from.push(JsRange {
            start: frame.location.start,
            end: frame.location.end,
        });
        frame = inner;
    }
    JsMessage {
        code: origin.code.to_string(),
        severity: severity_label(origin.severity).to_string(),
        info: origin.info.clone(),
        start: origin.location.start,
        end: origin.location.end,
        referred_from,
    }
}

fn severity_label(severity: MessageSeverity) -> &'static str {
    match severity {
        MessageSeverity::Error => "error",
        MessageSeverity::Warning => "warning",
        MessageSeverity::Info => "info",
    }
}
