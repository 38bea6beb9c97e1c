//! Server-Sent Events decoding for the text-generation stream.
//!
//! The upstream emits one event per generated token:
//! `data:{"token":{"id":1,"text":"<","logprob":-0.1,"special":false},"generated_text":null,"details":null}`
//! and reports failures mid-stream as `data:{"error":"...","error_type":"..."}`.

use serde::Deserialize;

/// One incremental fragment of generated text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Token {
    #[serde(default)]
    pub id: u32,
    pub text: String,
    #[serde(default)]
    pub special: bool,
}

#[cfg(test)]
impl Token {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            id: 0,
            text: text.into(),
            special: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(Token),
    Error(String),
}

#[derive(Deserialize)]
struct EventPayload {
    token: Option<Token>,
    error: Option<String>,
    error_type: Option<String>,
}

/// Parses one SSE line. Returns `None` for lines that carry nothing to relay.
pub fn parse_sse_line(line: &str) -> Option<StreamEvent> {
    let line = line.trim();

    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let data = line.strip_prefix("data:")?.trim_start();

    let payload: EventPayload = match serde_json::from_str(data) {
        Ok(p) => p,
        Err(e) => return Some(StreamEvent::Error(format!("malformed event: {e}"))),
    };

    if let Some(error) = payload.error {
        return Some(StreamEvent::Error(match payload.error_type {
            Some(kind) => format!("{kind}: {error}"),
            None => error,
        }));
    }

    payload.token.map(StreamEvent::Token)
}

/// Reassembles lines that arrive split across network chunks.
///
/// Bytes are held until a newline completes the line, so a multi-byte
/// character cut between two chunks is decoded whole.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(decode_line(&line));
        }
        lines
    }

    /// Whatever is left once the upstream closes without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = decode_line(&std::mem::take(&mut self.pending));
        (!rest.trim().is_empty()).then_some(rest)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}
