//! Streaming Transport
//!
//! Translates `RunEvent`s into chat-completion chunk frames compatible with
//! OpenAI-style streaming clients. Each frame is a small JSON payload carried
//! as one server-sent event; frames flush in production order and the stream
//! closes with a terminator chunk plus the `[DONE]` sentinel.

use kestrel_core::events::RunEvent;
use kestrel_core::types::WorkerId;
use serde::Serialize;

/// One wire frame: either a JSON chunk or the literal `[DONE]` sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Chunk(ChatCompletionChunk),
    DoneSentinel,
}

/// Incremental chat-completion chunk, mirroring the OpenAI chunk schema.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    fn content(stream_id: &str, created: i64, model: &str, text: String) -> Self {
        Self {
            id: stream_id.to_string(),
            object: "chat.completion.chunk",
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some(text),
                },
                finish_reason: None,
            }],
        }
    }

    fn finish(stream_id: &str, created: i64, model: &str, reason: &'static str) -> Self {
        Self {
            id: stream_id.to_string(),
            object: "chat.completion.chunk",
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta::default(),
                finish_reason: Some(reason),
            }],
        }
    }
}

/// Per-worker progress glyphs.
fn worker_emoji(worker: WorkerId) -> &'static str {
    match worker {
        WorkerId::Search => "\u{1f50d}",     // magnifying glass
        WorkerId::Analyst => "\u{1f4ca}",    // bar chart
        WorkerId::Geo => "\u{1f5fa}\u{fe0f}", // world map
        WorkerId::Code => "\u{1f4bb}",       // laptop
        WorkerId::Redactor => "\u{270f}\u{fe0f}", // pencil
        WorkerId::Reflection => "\u{1f914}", // thinking face
    }
}

/// Identity of one wire stream: chunk id, creation stamp, advertised model.
#[derive(Debug, Clone)]
pub struct StreamIdentity {
    pub stream_id: String,
    pub created: i64,
    pub model: String,
}

impl StreamIdentity {
    pub fn new(model: &str) -> Self {
        let created = chrono::Utc::now().timestamp();
        Self {
            stream_id: format!("chatcmpl-{}", created),
            created,
            model: model.to_string(),
        }
    }
}

/// Map one run event to its wire frames. Most events become a single content
/// chunk; terminators expand into a finish chunk plus the sentinel.
pub fn event_frames(identity: &StreamIdentity, event: &RunEvent) -> Vec<Frame> {
    let content = |text: String| {
        Frame::Chunk(ChatCompletionChunk::content(
            &identity.stream_id,
            identity.created,
            &identity.model,
            text,
        ))
    };

    match event {
        RunEvent::WorkerStarted { worker } => {
            vec![content(format!(
                "{} {}: starting\n",
                worker_emoji(*worker),
                worker
            ))]
        }
        RunEvent::WorkerProgress { text, .. } => vec![content(text.clone())],
        RunEvent::WorkerCompleted { worker, summary } => {
            vec![content(format!("\u{2713} {}: {}\n", worker, summary))]
        }
        RunEvent::Phase { name } => vec![content(format!("\n**{}**\n\n", name))],
        RunEvent::SynthesisDelta { text } => vec![content(text.clone())],
        RunEvent::Reflection { reflection } => {
            vec![content(format!("\n\n---\n\u{1f914} {}\n", reflection.summary()))]
        }
        RunEvent::Done => vec![
            Frame::Chunk(ChatCompletionChunk::finish(
                &identity.stream_id,
                identity.created,
                &identity.model,
                "stop",
            )),
            Frame::DoneSentinel,
        ],
        RunEvent::Error { kind, message } => vec![
            content(format!("\n\u{26a0} error ({}): {}\n", kind, message)),
            Frame::Chunk(ChatCompletionChunk::finish(
                &identity.stream_id,
                identity.created,
                &identity.model,
                "error",
            )),
            Frame::DoneSentinel,
        ],
    }
}

/// Render a frame as the SSE `data:` payload string.
pub fn frame_data(frame: &Frame) -> String {
    match frame {
        Frame::Chunk(chunk) => serde_json::to_string(chunk).unwrap_or_default(),
        Frame::DoneSentinel => "[DONE]".to_string(),
    }
}
