//! Streaming delta parser: lifts provider SSE events to uniform
//! [`StreamDelta`]s.
//!
//! Grounded on the teacher's streaming token-callback pattern in
//! `backend::Backend::complete_streaming` / `client::call_llm_streaming`,
//! generalized from "accumulate plain text" to the full Anthropic-family
//! event shape: content blocks, tool-use argument accumulation, and
//! usage propagation.

use crate::error::{self, CoreError, ErrorKind, NormalizeOpts, RawError};
use crate::sse::SseEvent;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallDelta {
    pub tool_id: String,
    pub tool_name: String,
    /// Cumulative argument text assembled so far (: "objects are
    /// JSON-serialized" when the provider streams them as JSON fragments).
    pub arguments_so_far: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// A provider-agnostic incremental message fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub id: String,
    pub role: Option<String>,
    pub content: Vec<ContentPart>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub finished: bool,
    pub usage: Option<Usage>,
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
enum BlockKind {
    Text,
    ToolUse { id: String, name: String },
}

#[derive(Debug, Clone)]
struct BlockState {
    kind: BlockKind,
    accumulated_input: String,
}

/// Stateful mapper from SSE events to [`StreamDelta`]s. State comprises the
/// message id (first seen), a sparse content-block array, and cumulative
/// usage.
#[derive(Debug, Default)]
pub struct DeltaParser {
    message_id: Option<String>,
    blocks: Vec<Option<BlockState>>,
    usage: Option<Usage>,
}

impl DeltaParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one framed SSE event, returning zero or one delta. Unknown
    /// event types and malformed JSON are skipped rather than erroring,
    /// only an explicit `error` event type raises.
    pub fn next(&mut self, event: &SseEvent) -> error::Result<Option<StreamDelta>> {
        let Ok(value) = serde_json::from_str::<Value>(&event.data) else {
            return Ok(None);
        };

        let event_type = value
            .get("type")
            .and_then(|v| v.as_str())
            .or(event.event.as_deref())
            .unwrap_or_default();

        match event_type {
            "message_start" => Ok(Some(self.handle_message_start(&value))),
            "content_block_start" => Ok(self.handle_content_block_start(&value)),
            "content_block_delta" => Ok(self.handle_content_block_delta(&value)),
            "content_block_stop" => Ok(self.handle_content_block_stop(&value)),
            "message_delta" => Ok(Some(self.handle_message_delta(&value))),
            "message_stop" => Ok(Some(self.handle_message_stop())),
            "error" => Err(self.handle_error(&value)),
            _ => Ok(None),
        }
    }

    fn message_id(&self) -> String {
        self.message_id.clone().unwrap_or_default()
    }

    fn handle_message_start(&mut self, value: &Value) -> StreamDelta {
        let id = value
            .get("message")
            .and_then(|m| m.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.message_id = Some(id.clone());

        let mut metadata = HashMap::new();
        metadata.insert("event".to_string(), Value::String("message_start".into()));
        if let Some(model) = value.get("message").and_then(|m| m.get("model")) {
            metadata.insert("model".to_string(), model.clone());
        }

        StreamDelta {
            id,
            role: Some("assistant".to_string()),
            finished: false,
            metadata,
            ..Default::default()
        }
    }

    fn handle_content_block_start(&mut self, value: &Value) -> Option<StreamDelta> {
        let index = value.get("index")?.as_u64()? as usize;
        let block = value.get("content_block")?;
        let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("text");

        let kind = if block_type == "tool_use" {
            BlockKind::ToolUse {
                id: block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                name: block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            }
        } else {
            BlockKind::Text
        };

        if self.blocks.len() <= index {
            self.blocks.resize_with(index + 1, || None);
        }
        self.blocks[index] = Some(BlockState {
            kind,
            accumulated_input: String::new(),
        });

        let mut metadata = HashMap::new();
        metadata.insert(
            "event".to_string(),
            Value::String("content_block_start".into()),
        );
        metadata.insert("index".to_string(), Value::from(index));

        Some(StreamDelta {
            id: self.message_id(),
            finished: false,
            metadata,
            ..Default::default()
        })
    }

    fn handle_content_block_delta(&mut self, value: &Value) -> Option<StreamDelta> {
        let index = value.get("index")?.as_u64()? as usize;
        let delta = value.get("delta")?;
        let delta_type = delta.get("type").and_then(|v| v.as_str()).unwrap_or("");

        match delta_type {
            "text_delta" => {
                let text = delta.get("text").and_then(|v| v.as_str())?.to_string();
                Some(StreamDelta {
                    id: self.message_id(),
                    content: vec![ContentPart::Text(text)],
                    finished: false,
                    ..Default::default()
                })
            }
            "input_json_delta" => {
                let fragment = match delta.get("partial_json") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => return None,
                };

                let block = self.blocks.get_mut(index)?.as_mut()?;
                block.accumulated_input.push_str(&fragment);

                let tool_call = if let BlockKind::ToolUse { id, name } = &block.kind {
                    (!id.is_empty() && !name.is_empty()).then(|| ToolCallDelta {
                        tool_id: id.clone(),
                        tool_name: name.clone(),
                        arguments_so_far: block.accumulated_input.clone(),
                    })
                } else {
                    None
                };

                tool_call.map(|tool_call| StreamDelta {
                    id: self.message_id(),
                    tool_calls: vec![tool_call],
                    finished: false,
                    ..Default::default()
                })
            }
            _ => None,
        }
    }

    fn handle_content_block_stop(&mut self, value: &Value) -> Option<StreamDelta> {
        let index = value.get("index").and_then(|v| v.as_u64());
        let mut metadata = HashMap::new();
        metadata.insert(
            "event".to_string(),
            Value::String("content_block_stop".into()),
        );
        if let Some(index) = index {
            metadata.insert("index".to_string(), Value::from(index));
        }
        Some(StreamDelta {
            id: self.message_id(),
            finished: false,
            metadata,
            ..Default::default()
        })
    }

    fn handle_message_delta(&mut self, value: &Value) -> StreamDelta {
        let mut metadata = HashMap::new();
        metadata.insert("event".to_string(), Value::String("message_delta".into()));
        if let Some(delta) = value.get("delta") {
            if let Some(stop_reason) = delta.get("stop_reason") {
                metadata.insert("stop_reason".to_string(), stop_reason.clone());
            }
            if let Some(stop_sequence) = delta.get("stop_sequence") {
                metadata.insert("stop_sequence".to_string(), stop_sequence.clone());
            }
        }
        if let Some(usage) = value.get("usage") {
            self.merge_usage(usage);
        }

        StreamDelta {
            id: self.message_id(),
            finished: false,
            metadata,
            ..Default::default()
        }
    }

    fn handle_message_stop(&mut self) -> StreamDelta {
        StreamDelta {
            id: self.message_id(),
            finished: true,
            usage: self.usage.clone(),
            ..Default::default()
        }
    }

    fn handle_error(&self, value: &Value) -> CoreError {
        match value.get("error") {
            Some(err) => {
                let message = err
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("streaming error");
                CoreError::new(ErrorKind::Streaming, message)
            }
            None => error::normalize(
                RawError::Message(format!("streaming error event: {}", value)),
                &NormalizeOpts::default(),
            ),
        }
    }

    fn merge_usage(&mut self, usage_value: &Value) {
        let usage = self.usage.get_or_insert_with(Usage::default);
        if let Some(v) = usage_value.get("input_tokens").and_then(|v| v.as_u64()) {
            usage.input_tokens = Some(v);
        }
        if let Some(v) = usage_value.get("output_tokens").and_then(|v| v.as_u64()) {
            usage.output_tokens = Some(v);
        }
    }
}

/// Concatenate all text content parts across a run of deltas, reconstructs
/// the assistant message text (the reconstruction invariant).
pub fn reconstruct_text(deltas: &[StreamDelta]) -> String {
    deltas
        .iter()
        .flat_map(|d| d.content.iter())
        .map(|part| match part {
            ContentPart::Text(t) => t.as_str(),
        })
        .collect()
}
