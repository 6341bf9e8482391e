use std::borrow::Cow;
use std::time::Duration;

use bytes::Bytes;

/// An inbound data frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    /// Content as echoed back to the client. Binary frames are decoded lossily.
    pub fn content(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text),
            Self::Binary(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

/// Reply frame for a handled message: `[tag] message: <content> (perf: <ms>ms)`.
pub fn format_reply(tag: &str, payload: &Payload, elapsed: Duration) -> String {
    let ms = elapsed.as_secs_f64() * 1000.0;
    format!("[{tag}] message: {} (perf: {ms:.3}ms)", payload.content())
}

/// Error frame reported when the outbound call for a message fails.
pub fn format_error(tag: &str, error: &dyn std::fmt::Display) -> String {
    format!("[{tag}] error: {error}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DependencyError;

    #[test]
    fn reply_embeds_content_and_millis() {
        let reply = format_reply(
            "Session Actor",
            &Payload::Text("hello".into()),
            Duration::from_micros(5_123_456),
        );
        assert_eq!(reply, "[Session Actor] message: hello (perf: 5123.456ms)");
    }

    #[test]
    fn reply_for_zero_duration() {
        let reply = format_reply("T", &Payload::Text("x".into()), Duration::ZERO);
        assert_eq!(reply, "[T] message: x (perf: 0.000ms)");
    }

    #[test]
    fn binary_content_is_lossy_utf8() {
        let payload = Payload::Binary(Bytes::from_static(b"ab\xffc"));
        assert_eq!(payload.content(), "ab\u{fffd}c");
        assert_eq!(payload.kind(), "binary");
        assert_eq!(payload.len(), 4);
    }

    #[test]
    fn error_frame_format() {
        let err = DependencyError::Network("connection refused".into());
        assert_eq!(
            format_error("T", &err),
            "[T] error: dependency network error: connection refused"
        );
    }
}
