//! OpenAI chat-completions adapter.
//!
//! Serves every provider that speaks the OpenAI wire format: OpenAI,
//! DeepSeek, xAI, Perplexity, Google's compatibility endpoint and the
//! OpenRouter aggregator.

use std::collections::BTreeMap;

use serde_json::Value;

use cg_domain::error::{Error, Result};
use cg_domain::stream::{BoxStream, StreamEvent, Usage};
use cg_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};

use crate::credentials::from_reqwest;
use crate::handle::{Credential, ProviderHandle};
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    provider: String,
    base_url: String,
    model: String,
    credential: Credential,
    max_tokens: u32,
    temperature: Option<f64>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_handle(handle: &ProviderHandle, client: reqwest::Client) -> Self {
        Self {
            provider: handle.provider.clone(),
            base_url: handle.base_url.trim_end_matches('/').to_string(),
            model: handle.model_id.clone(),
            credential: handle.credential.clone(),
            max_tokens: handle.max_output_tokens,
            temperature: handle.temperature,
            client,
        }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn authed_post(&self) -> Result<reqwest::RequestBuilder> {
        if self.credential.is_empty() {
            return Err(Error::Provider {
                provider: self.provider.clone(),
                message: "no credential available".into(),
            });
        }
        Ok(self
            .client
            .post(self.url())
            .bearer_auth(self.credential.expose())
            .header("Content-Type", "application/json"))
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();
        let mut body = serde_json::json!({
            "model": req.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "stream": stream,
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_openai).collect());
        }
        if let Some(temp) = req.temperature.or(self.temperature) {
            body["temperature"] = serde_json::json!(temp);
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .authed_post()?
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
            provider: self.provider.clone(),
            message: format!("HTTP {} - {}", status.as_u16(), text),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::System => serde_json::json!({
            "role": "system",
            "content": msg.content.extract_all_text(),
        }),
        Role::User => user_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        Role::Tool => tool_result_to_openai(msg),
    }
}

fn user_to_openai(msg: &Message) -> Value {
    let parts = match &msg.content {
        MessageContent::Text(t) => return serde_json::json!({"role": "user", "content": t}),
        MessageContent::Parts(parts) => parts,
    };
    if !parts.iter().any(|p| matches!(p, ContentPart::Image { .. })) {
        return serde_json::json!({"role": "user", "content": msg.content.extract_all_text()});
    }
    let content: Vec<Value> = parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(serde_json::json!({"type": "text", "text": text})),
            ContentPart::Image { url, .. } => Some(serde_json::json!({
                "type": "image_url",
                "image_url": {"url": url},
            })),
            _ => None,
        })
        .collect();
    serde_json::json!({"role": "user", "content": content})
}

fn assistant_to_openai(msg: &Message) -> Value {
    let text = msg.content.extract_all_text();
    let tool_calls: Vec<Value> = match &msg.content {
        MessageContent::Text(_) => Vec::new(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": input.to_string()},
                })),
                _ => None,
            })
            .collect(),
    };

    let mut obj = serde_json::json!({"role": "assistant"});
    obj["content"] = if text.is_empty() { Value::Null } else { Value::String(text) };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult { tool_use_id, content, .. } = part {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "tool_call_id": "",
        "content": msg.content.extract_all_text(),
    })
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no choices in response".into(),
        })?;
    let message = choice.get("message").unwrap_or(&Value::Null);

    Ok(ChatResponse {
        content: message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        tool_calls: parse_tool_calls(message),
        usage: body.get("usage").and_then(parse_usage),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(arr) = message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|tc| {
            let func = tc.get("function")?;
            Some(ToolCall {
                call_id: tc.get("id")?.as_str()?.to_string(),
                tool_name: func.get("name")?.as_str()?.to_string(),
                arguments: parse_arguments(func.get("arguments").and_then(|v| v.as_str())),
            })
        })
        .collect()
}

fn parse_arguments(raw: Option<&str>) -> Value {
    raw.filter(|s| !s.trim().is_empty())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_else(|| Value::Object(Default::default()))
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let prompt = v.get("prompt_tokens")?.as_u64()? as u32;
    let completion = v.get("completion_tokens")?.as_u64()? as u32;
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: v
            .get("total_tokens")
            .and_then(|t| t.as_u64())
            .map(|t| t as u32)
            .unwrap_or(prompt + completion),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Assembles tool calls across chunks. OpenAI identifies a call by
/// `index`; only the first chunk of each call carries its id and name.
#[derive(Debug, Default)]
struct StreamState {
    calls: BTreeMap<u64, PartialCall>,
    finish_reason: Option<String>,
    done: bool,
}

impl StreamState {
    fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if self.done {
            return Vec::new();
        }
        if data.trim() == "[DONE]" {
            let mut out = self.flush_calls();
            out.push(self.done_event(None));
            return out;
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };
        let usage = v.get("usage").and_then(parse_usage);
        let Some(choice) = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
        else {
            // Usage-only trailer.
            return match usage {
                Some(u) => {
                    let mut out = self.flush_calls();
                    out.push(self.done_event(Some(u)));
                    out
                }
                None => Vec::new(),
            };
        };

        let mut out = Vec::new();
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(text) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                out.push(Ok(StreamEvent::Thinking { text: text.to_string() }));
            }
        }
        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                out.push(Ok(StreamEvent::Token { text: text.to_string() }));
            }
        }
        if let Some(tcs) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tcs {
                self.absorb_tool_delta(tc, &mut out);
            }
        }

        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            self.finish_reason = Some(fr.to_string());
            out.extend(self.flush_calls());
            if usage.is_some() {
                out.push(self.done_event(usage));
            }
        }
        out
    }

    fn absorb_tool_delta(&mut self, tc: &Value, out: &mut Vec<Result<StreamEvent>>) {
        let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
        let func = tc.get("function");
        let entry = self.calls.entry(index).or_default();

        if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
            if entry.id.is_empty() {
                entry.id = id.to_string();
                entry.name = func
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                out.push(Ok(StreamEvent::ToolCallStarted {
                    call_id: entry.id.clone(),
                    tool_name: entry.name.clone(),
                }));
            }
        }
        if let Some(args) = func
            .and_then(|f| f.get("arguments"))
            .and_then(|v| v.as_str())
        {
            if !args.is_empty() {
                entry.arguments.push_str(args);
                out.push(Ok(StreamEvent::ToolCallDelta {
                    call_id: entry.id.clone(),
                    delta: args.to_string(),
                }));
            }
        }
    }

    fn flush_calls(&mut self) -> Vec<Result<StreamEvent>> {
        std::mem::take(&mut self.calls)
            .into_values()
            .filter(|c| !c.name.is_empty())
            .map(|c| {
                Ok(StreamEvent::ToolCallFinished {
                    arguments: parse_arguments(Some(&c.arguments)),
                    call_id: c.id,
                    tool_name: c.name,
                })
            })
            .collect()
    }

    fn done_event(&mut self, usage: Option<Usage>) -> Result<StreamEvent> {
        self.done = true;
        Ok(StreamEvent::Done {
            usage,
            finish_reason: self.finish_reason.take().or_else(|| Some("stop".into())),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_chat_body(req, false);
        tracing::debug!(provider = %self.provider, model = %self.model, "openai_compat chat request");
        let resp = self.send(&body).await?;
        let text = resp.text().await.map_err(from_reqwest)?;
        let json: Value = serde_json::from_str(&text)?;
        parse_chat_response(&self.provider, &json)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_chat_body(req, true);
        tracing::debug!(provider = %self.provider, model = %self.model, "openai_compat stream request");
        let resp = self.send(&body).await?;
        let mut state = StreamState::default();
        Ok(crate::sse::sse_response_stream(resp, move |data| state.parse(data)))
    }

    fn provider_id(&self) -> &str {
        &self.provider
    }
}
