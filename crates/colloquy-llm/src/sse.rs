//! Incremental parser for OpenAI-style server-sent-event bodies.

use serde::Deserialize;

/// One meaningful event decoded from the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A non-empty content fragment.
    Token(String),
    /// The stream finished, via `[DONE]` or a finish reason.
    Done,
    /// The server reported an error inside the stream.
    Error(String),
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Accumulates raw body bytes and yields events for every complete line.
///
/// Lines may be split across network reads, including inside a multi-byte
/// character, so bytes are buffered until a newline arrives.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network read and collect the events it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = parse_line(line.trim()) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that had no newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        parse_line(line.trim()).into_iter().collect()
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    if let Some(err) = chunk.error {
        let label = err.code.or(err.kind).unwrap_or_default();
        return Some(SseEvent::Error(if label.is_empty() {
            err.message
        } else {
            format!("{}: {}", label, err.message)
        }));
    }

    let choice = chunk.choices.into_iter().next()?;
    match choice.delta.content {
        Some(content) if !content.is_empty() => Some(SseEvent::Token(content)),
        _ if choice.finish_reason.is_some() => Some(SseEvent::Done),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(content: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":{}}},\"finish_reason\":null}}]}}\n\n",
            serde_json::to_string(content).unwrap()
        )
    }

    #[test]
    fn test_parses_tokens_and_done() {
        let mut parser = SseParser::new();
        let body = format!("{}{}data: [DONE]\n\n", delta("Hel"), delta("lo"));
        let events = parser.push(body.as_bytes());
        assert_eq!(
            events,
            vec![
                SseEvent::Token("Hel".to_string()),
                SseEvent::Token("lo".to_string()),
                SseEvent::Done
            ]
        );
    }

    #[test]
    fn test_split_across_reads() {
        let mut parser = SseParser::new();
        let body = delta("caf\u{00e9}");
        let bytes = body.as_bytes();
        // Split inside the two-byte character.
        let cut = body.find('\u{00e9}').unwrap() + 1;
        assert!(parser.push(&bytes[..cut]).is_empty());
        assert_eq!(
            parser.push(&bytes[cut..]),
            vec![SseEvent::Token("caf\u{00e9}".to_string())]
        );
    }

    #[test]
    fn test_role_only_and_comments_ignored() {
        let mut parser = SseParser::new();
        let body = ": keep-alive\n\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n";
        assert!(parser.push(body.as_bytes()).is_empty());
    }

    #[test]
    fn test_finish_reason_is_done() {
        let mut parser = SseParser::new();
        let body = "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n";
        assert_eq!(parser.push(body.as_bytes()), vec![SseEvent::Done]);
    }

    #[test]
    fn test_in_stream_error() {
        let mut parser = SseParser::new();
        let body = "data: {\"error\":{\"message\":\"Too many requests\",\"type\":\"requests\",\"code\":\"rate_limit_exceeded\"}}\n";
        assert_eq!(
            parser.push(body.as_bytes()),
            vec![SseEvent::Error("rate_limit_exceeded: Too many requests".to_string())]
        );
    }

    #[test]
    fn test_finish_flushes_trailing_line() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: [DONE]").is_empty());
        assert_eq!(parser.finish(), vec![SseEvent::Done]);
        assert!(parser.finish().is_empty());
    }
}
