//! Wire format for streamed answers.

use serde::{Deserialize, Serialize};

use coderag_memory::ScoredChunk;

/// A retrieved source location, sent ahead of the generated tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub path: String,
    pub kind: String,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub distance: f32,
}

impl From<&ScoredChunk> for Citation {
    fn from(chunk: &ScoredChunk) -> Self {
        Self {
            path: chunk.path.clone(),
            kind: chunk.meta.kind.clone(),
            name: chunk.meta.name.clone(),
            start_line: chunk.meta.start_line,
            end_line: chunk.meta.end_line,
            distance: chunk.distance,
        }
    }
}

/// One event in an answer stream.
///
/// Serializes as `{"type": ..., "data": ...}`; [`ChatEvent::Done`] carries no
/// data and doubles as the `[DONE]` marker in SSE form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ChatEvent {
    Citations(Vec<Citation>),
    Token(String),
    Error(String),
    Done,
}

impl ChatEvent {
    /// Render as a server-sent-events data line.
    #[must_use]
    pub fn to_sse(&self) -> String {
        if matches!(self, Self::Done) {
            return "data: [DONE]\n\n".to_owned();
        }
        match serde_json::to_string(self) {
            Ok(json) => format!("data: {json}\n\n"),
            Err(e) => format!("data: {{\"type\":\"error\",\"data\":\"{e}\"}}\n\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_event_wire_shape() {
        let json = serde_json::to_string(&ChatEvent::Token("fn ".into())).unwrap();
        assert_eq!(json, r#"{"type":"token","data":"fn "}"#);
    }

    #[test]
    fn error_event_wire_shape() {
        let json = serde_json::to_string(&ChatEvent::Error("backend down".into())).unwrap();
        assert_eq!(json, r#"{"type":"error","data":"backend down"}"#);
    }

    #[test]
    fn citations_event_carries_locations() {
        let event = ChatEvent::Citations(vec![Citation {
            path: "src/auth.py".into(),
            kind: "function_definition".into(),
            name: "login".into(),
            start_line: 10,
            end_line: 25,
            distance: 0.4,
        }]);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.starts_with(r#"{"type":"citations","data":["#));
        assert!(json.contains(r#""name":"login""#));
    }

    #[test]
    fn done_event_is_sse_marker() {
        assert_eq!(ChatEvent::Done.to_sse(), "data: [DONE]\n\n");
        assert_eq!(
            serde_json::to_string(&ChatEvent::Done).unwrap(),
            r#"{"type":"done"}"#
        );
    }

    #[test]
    fn sse_line_shape() {
        let sse = ChatEvent::Token("x".into()).to_sse();
        assert!(sse.starts_with("data: {"));
        assert!(sse.ends_with("\n\n"));
    }
}
