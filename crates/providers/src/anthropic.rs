//! Anthropic messages adapter.
//!
//! System turns move to the top-level `system` field and tool results
//! travel as `tool_result` blocks inside a user turn.

use std::collections::HashMap;

use serde_json::Value;

use cg_domain::error::{Error, Result};
use cg_domain::stream::{BoxStream, StreamEvent, Usage};
use cg_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};

use crate::credentials::from_reqwest;
use crate::handle::{Credential, ProviderHandle};
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    base_url: String,
    model: String,
    credential: Credential,
    max_tokens: u32,
    temperature: Option<f64>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_handle(handle: &ProviderHandle, client: reqwest::Client) -> Self {
        Self {
            base_url: handle.base_url.trim_end_matches('/').to_string(),
            model: handle.model_id.clone(),
            credential: handle.credential.clone(),
            max_tokens: handle.max_output_tokens,
            temperature: handle.temperature,
            client,
        }
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let mut system: Vec<String> = Vec::new();
        let mut messages: Vec<Value> = Vec::new();
        for msg in &req.messages {
            match msg.role {
                Role::System => system.push(msg.content.extract_all_text()),
                Role::User => messages.push(user_to_anthropic(msg)),
                Role::Assistant => messages.push(assistant_to_anthropic(msg)),
                Role::Tool => messages.push(tool_result_to_anthropic(msg)),
            }
        }

        let mut body = serde_json::json!({
            "model": req.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "stream": stream,
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
        });
        if !system.is_empty() {
            body["system"] = Value::String(system.join("\n\n"));
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_anthropic).collect());
        }
        if let Some(temp) = req.temperature.or(self.temperature) {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        if self.credential.is_empty() {
            return Err(Error::Provider {
                provider: "anthropic".into(),
                message: "no credential available".into(),
            });
        }
        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(Error::Provider {
            provider: "anthropic".into(),
            message: format!("HTTP {} - {}", status.as_u16(), text),
        })
    }
}

// ── message serialization ───────────────────────────────────────────

/// `data:image/png;base64,AAAA` → base64 source; anything else → url source.
fn image_source(url: &str, media_type: Option<&str>) -> Value {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((meta, data)) = rest.split_once(',') {
            let mt = meta.strip_suffix(";base64").unwrap_or(meta);
            return serde_json::json!({
                "type": "base64",
                "media_type": media_type.unwrap_or(mt),
                "data": data,
            });
        }
    }
    serde_json::json!({"type": "url", "url": url})
}

fn user_to_anthropic(msg: &Message) -> Value {
    let content = match &msg.content {
        MessageContent::Text(t) => Value::String(t.clone()),
        MessageContent::Parts(parts) => Value::Array(
            parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => {
                        Some(serde_json::json!({"type": "text", "text": text}))
                    }
                    ContentPart::Image { url, media_type } => Some(serde_json::json!({
                        "type": "image",
                        "source": image_source(url, media_type.as_deref()),
                    })),
                    _ => None,
                })
                .collect(),
        ),
    };
    serde_json::json!({"role": "user", "content": content})
}

fn assistant_to_anthropic(msg: &Message) -> Value {
    let blocks: Vec<Value> = match &msg.content {
        MessageContent::Text(t) => vec![serde_json::json!({"type": "text", "text": t})],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => {
                    Some(serde_json::json!({"type": "text", "text": text}))
                }
                ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input,
                })),
                _ => None,
            })
            .collect(),
    };
    serde_json::json!({"role": "assistant", "content": blocks})
}

fn tool_result_to_anthropic(msg: &Message) -> Value {
    let blocks: Vec<Value> = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult { tool_use_id, content, is_error } => {
                    Some(serde_json::json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": content,
                        "is_error": is_error,
                    }))
                }
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => vec![serde_json::json!({
            "type": "tool_result",
            "tool_use_id": "",
            "content": t,
        })],
    };
    serde_json::json!({"role": "user", "content": blocks})
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ── response parsing ────────────────────────────────────────────────

fn normalize_stop_reason(s: &str) -> String {
    match s {
        "end_turn" | "stop_sequence" => "stop".into(),
        "tool_use" => "tool_calls".into(),
        "max_tokens" => "length".into(),
        other => other.into(),
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()? as u32;
    let output = v.get("output_tokens").and_then(|o| o.as_u64()).unwrap_or(0) as u32;
    Some(Usage {
        prompt_tokens: input,
        completion_tokens: output,
        total_tokens: input + output,
    })
}

fn parse_response(body: &Value) -> ChatResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in body
        .get("content")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
    {
        match block.get("type").and_then(|v| v.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => tool_calls.push(ToolCall {
                call_id: str_field(block, "id"),
                tool_name: str_field(block, "name"),
                arguments: block
                    .get("input")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
            }),
            _ => {}
        }
    }

    ChatResponse {
        content: text,
        tool_calls,
        usage: body.get("usage").and_then(parse_usage),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason: body
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .map(normalize_stop_reason),
    }
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string()
}

// ── streaming ───────────────────────────────────────────────────────

struct OpenBlock {
    call_id: String,
    tool_name: String,
    arguments: String,
}

#[derive(Default)]
struct StreamState {
    /// Tool-use blocks keyed by content block index.
    blocks: HashMap<u64, OpenBlock>,
    usage: Option<Usage>,
    done: bool,
}

impl StreamState {
    fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };
        let index = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
        let mut out = Vec::new();

        match v.get("type").and_then(|t| t.as_str()).unwrap_or("") {
            "message_start" => {
                self.usage = v
                    .get("message")
                    .and_then(|m| m.get("usage"))
                    .and_then(parse_usage);
            }
            "content_block_start" => {
                let block = v.get("content_block").unwrap_or(&Value::Null);
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    let open = OpenBlock {
                        call_id: str_field(block, "id"),
                        tool_name: str_field(block, "name"),
                        arguments: String::new(),
                    };
                    out.push(Ok(StreamEvent::ToolCallStarted {
                        call_id: open.call_id.clone(),
                        tool_name: open.tool_name.clone(),
                    }));
                    self.blocks.insert(index, open);
                }
            }
            "content_block_delta" => {
                let delta = v.get("delta").unwrap_or(&Value::Null);
                match delta.get("type").and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        let text = str_field(delta, "text");
                        if !text.is_empty() {
                            out.push(Ok(StreamEvent::Token { text }));
                        }
                    }
                    Some("thinking_delta") => {
                        let text = str_field(delta, "thinking");
                        if !text.is_empty() {
                            out.push(Ok(StreamEvent::Thinking { text }));
                        }
                    }
                    Some("input_json_delta") => {
                        let partial = str_field(delta, "partial_json");
                        if let Some(open) = self.blocks.get_mut(&index) {
                            open.arguments.push_str(&partial);
                            out.push(Ok(StreamEvent::ToolCallDelta {
                                call_id: open.call_id.clone(),
                                delta: partial,
                            }));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                if let Some(open) = self.blocks.remove(&index) {
                    let arguments = if open.arguments.trim().is_empty() {
                        Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&open.arguments)
                            .unwrap_or_else(|_| Value::Object(Default::default()))
                    };
                    out.push(Ok(StreamEvent::ToolCallFinished {
                        call_id: open.call_id,
                        tool_name: open.tool_name,
                        arguments,
                    }));
                }
            }
            "message_delta" => {
                if let Some(output) = v
                    .get("usage")
                    .and_then(|u| u.get("output_tokens"))
                    .and_then(|o| o.as_u64())
                {
                    let u = self.usage.get_or_insert_with(Usage::default);
                    u.completion_tokens = output as u32;
                    u.total_tokens = u.prompt_tokens + u.completion_tokens;
                }
                if let Some(reason) = v
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|r| r.as_str())
                {
                    self.done = true;
                    out.push(Ok(StreamEvent::Done {
                        usage: self.usage,
                        finish_reason: Some(normalize_stop_reason(reason)),
                    }));
                }
            }
            "message_stop" if !self.done => {
                self.done = true;
                out.push(Ok(StreamEvent::Done {
                    usage: self.usage,
                    finish_reason: Some("stop".into()),
                }));
            }
            "error" => {
                let message = v
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error");
                out.push(Err(Error::Provider {
                    provider: "anthropic".into(),
                    message: message.to_string(),
                }));
            }
            _ => {}
        }
        out
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(req, false);
        tracing::debug!(model = %self.model, "anthropic chat request");
        let resp = self.send(&body).await?;
        let text = resp.text().await.map_err(from_reqwest)?;
        let json: Value = serde_json::from_str(&text)?;
        Ok(parse_response(&json))
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_body(req, true);
        tracing::debug!(model = %self.model, "anthropic stream request");
        let resp = self.send(&body).await?;
        let mut state = StreamState::default();
        Ok(crate::sse::sse_response_stream(resp, move |data| state.parse(data)))
    }

    fn provider_id(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunks: &[&str]) -> Vec<Result<StreamEvent>> {
        let mut s = StreamState::default();
        chunks.iter().flat_map(|c| s.parse(c)).collect()
    }

    #[test]
    fn tool_use_stream_assembles_arguments() {
        let out = run(&[
            r#"{"type":"message_start","message":{"usage":{"input_tokens":12,"output_tokens":1}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"tu_1","name":"save_memory"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"content\":\"x\"}"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":9}}"#,
            r#"{"type":"message_stop"}"#,
        ]);
        let events: Vec<StreamEvent> = out.into_iter().map(|e| e.unwrap()).collect();
        assert!(matches!(&events[0], StreamEvent::ToolCallStarted { call_id, .. } if call_id == "tu_1"));
        assert!(matches!(
            &events[2],
            StreamEvent::ToolCallFinished { arguments, .. } if arguments["content"] == "x"
        ));
        match &events[3] {
            StreamEvent::Done { usage, finish_reason } => {
                assert_eq!(finish_reason.as_deref(), Some("tool_calls"));
                assert_eq!(usage.unwrap().total_tokens, 21);
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn text_and_thinking_deltas() {
        let out = run(&[
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"plan"}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Hello"}}"#,
        ]);
        assert!(matches!(&out[0], Ok(StreamEvent::Thinking { text }) if text == "plan"));
        assert!(matches!(&out[1], Ok(StreamEvent::Token { text }) if text == "Hello"));
    }

    #[test]
    fn stream_error_is_retriable_when_overloaded() {
        let out = run(&[r#"{"type":"error","error":{"type":"overloaded_error","message":"overloaded"}}"#]);
        match &out[0] {
            Err(e) => assert!(e.is_retriable()),
            Ok(ev) => panic!("expected error, got {ev:?}"),
        }
    }

    #[test]
    fn data_url_images_become_base64_source() {
        let src = image_source("data:image/jpeg;base64,QUJD", None);
        assert_eq!(src["type"], "base64");
        assert_eq!(src["media_type"], "image/jpeg");
        assert_eq!(src["data"], "QUJD");
        assert_eq!(image_source("https://x/y.png", None)["type"], "url");
    }

    #[test]
    fn system_turns_are_hoisted() {
        let handle = ProviderHandle {
            agent_name: "claude".into(),
            provider: "anthropic".into(),
            wire: crate::handle::WireFormat::Anthropic,
            base_url: "https://api.anthropic.com/v1".into(),
            model_id: "claude-sonnet-4".into(),
            credential: Credential::new("k"),
            credential_source: crate::handle::CredentialSource::TenantKey,
            via_aggregator: false,
            rerouted_from: None,
            capabilities: Default::default(),
            max_prompt_tokens: 1000,
            max_output_tokens: 256,
            temperature: None,
        };
        let p = AnthropicProvider::from_handle(&handle, reqwest::Client::new());
        let req = ChatRequest {
            messages: vec![Message::system("be brief"), Message::user("hi")],
            ..Default::default()
        };
        let body = p.build_body(&req, false);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn response_text_and_stop_reason() {
        let body = serde_json::json!({
            "model": "claude-sonnet-4",
            "content": [{"type": "text", "text": "Done."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 4, "output_tokens": 2}
        });
        let r = parse_response(&body);
        assert_eq!(r.content, "Done.");
        assert_eq!(r.finish_reason.as_deref(), Some("stop"));
    }
}
