//! Stream frames and their NDJSON encoding.
//!
//! A response body is zero or more `content` frames, at most one `error`
//! frame, and exactly one trailing `done` frame, one JSON object per line.

use serde::{Deserialize, Serialize};

/// Content type of the streamed response body.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// One unit of the streaming protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    /// Partial model output
    Content { text: String },
    /// Upstream failure after streaming began
    Error { error: String },
    /// End of stream
    Done,
}

impl StreamFrame {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Encode as a single NDJSON line, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Parse an NDJSON body back into frames, skipping blank lines.
pub fn parse_ndjson(body: &str) -> Result<Vec<StreamFrame>, serde_json::Error> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_encode_as_single_lines() {
        assert_eq!(
            StreamFrame::content("He").to_line().unwrap(),
            "{\"type\":\"content\",\"text\":\"He\"}\n"
        );
        assert_eq!(StreamFrame::Done.to_line().unwrap(), "{\"type\":\"done\"}\n");

        let line = StreamFrame::content("multi\nline").to_line().unwrap();
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn encoding_matches_serde_representation() {
        for frame in [
            StreamFrame::content("abc"),
            StreamFrame::error("quota exceeded"),
            StreamFrame::Done,
        ] {
            let decoded: StreamFrame = serde_json::from_str(&frame.to_line().unwrap()).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn error_frame_uses_error_field() {
        let value: serde_json::Value =
            serde_json::from_str(&StreamFrame::error("boom").to_line().unwrap()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], "boom");
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[test]
    fn parse_ndjson_skips_blank_lines() {
        let body = "{\"type\":\"content\",\"text\":\"a\"}\n\n{\"type\":\"done\"}\n";
        let frames = parse_ndjson(body).unwrap();
        assert_eq!(frames, vec![StreamFrame::content("a"), StreamFrame::Done]);
    }
}
