//! SSE parsing for streamed chat completions.
//!
//! The provider emits `data: {...}` lines terminated by `data: [DONE]`.
//! Chunks arrive on arbitrary byte boundaries, so lines are reassembled
//! through a string buffer before parsing. Only content deltas are
//! surfaced; other event payloads (role announcements, usage frames) are
//! skipped.

use futures::StreamExt;

use crate::types::LlmError;

use super::TokenSink;

/// Drain an SSE byte stream, forwarding each content token to `sink` and
/// accumulating the full text. Returns the accumulated text when the stream
/// completes.
///
/// A failed `sink.send` means the consumer disconnected; forwarding stops
/// but accumulation continues so the turn can still be finished and
/// persisted.
pub async fn drain_sse_stream(
    mut byte_stream: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
    sink: TokenSink,
) -> Result<String, LlmError> {
    let mut line_buf = String::new();
    let mut text = String::new();
    let mut client_gone = false;

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Transport(format!("stream read error: {e}"))
            }
        })?;

        let chunk_str = std::str::from_utf8(&chunk)
            .map_err(|e| LlmError::Transport(format!("stream UTF-8 decode error: {e}")))?;
        line_buf.push_str(chunk_str);

        while let Some(newline) = line_buf.find('\n') {
            let line = line_buf[..newline].trim_end_matches('\r').to_string();
            line_buf.drain(..=newline);

            let Some(token) = parse_sse_line(&line) else {
                continue;
            };
            text.push_str(&token);
            if !client_gone && sink.send(token).await.is_err() {
                client_gone = true;
                tracing::debug!("token sink closed; continuing without delivery");
            }
        }
    }

    // A final line without a trailing newline can still carry a delta.
    if let Some(token) = parse_sse_line(line_buf.trim_end()) {
        text.push_str(&token);
        if !client_gone {
            let _ = sink.send(token).await;
        }
    }

    Ok(text)
}

/// Extract the content delta from one SSE line, if it carries one.
/// Understands OpenAI-style chunks (`choices[0].delta.content`) and
/// Anthropic `content_block_delta` events (`delta.text`).
fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(data).ok()?;

    let delta = if value.get("type").and_then(|t| t.as_str()) == Some("content_block_delta") {
        value.get("delta")?.get("text")?.as_str()?
    } else {
        value
            .get("choices")?
            .get(0)?
            .get("delta")?
            .get("content")?
            .as_str()?
    };
    if delta.is_empty() {
        None
    } else {
        Some(delta.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sse_chunk(content: &str) -> String {
        format!(
            "data: {}\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    fn byte_stream(
        parts: Vec<&str>,
    ) -> impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin {
        let owned: Vec<Result<bytes::Bytes, reqwest::Error>> = parts
            .into_iter()
            .map(|p| Ok(bytes::Bytes::from(p.to_string())))
            .collect();
        futures::stream::iter(owned)
    }

    #[test]
    fn test_parse_sse_line_extracts_delta() {
        let line = sse_chunk("You enter");
        assert_eq!(
            parse_sse_line(line.trim_end()),
            Some("You enter".to_string())
        );
    }

    #[test]
    fn test_parse_sse_line_reads_anthropic_deltas() {
        let line = r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        assert_eq!(parse_sse_line(line), Some("Hi".to_string()));
        assert_eq!(
            parse_sse_line(r#"data: {"type":"message_stop"}"#),
            None
        );
    }

    #[test]
    fn test_parse_sse_line_skips_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]"), None);
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("event: ping"), None);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
    }

    #[tokio::test]
    async fn test_drain_reassembles_split_lines() {
        let full = sse_chunk("Hello, ");
        let (head, tail) = full.split_at(10);
        let mut parts = vec![head.to_string(), tail.to_string()];
        parts.push(sse_chunk("world."));
        parts.push("data: [DONE]\n".to_string());
        let parts_ref: Vec<&str> = parts.iter().map(|s| s.as_str()).collect();

        let (tx, mut rx) = mpsc::channel(16);
        let text = drain_sse_stream(byte_stream(parts_ref), tx).await.unwrap();
        assert_eq!(text, "Hello, world.");

        let mut tokens = Vec::new();
        while let Ok(token) = rx.try_recv() {
            tokens.push(token);
        }
        assert_eq!(tokens.concat(), text);
    }

    #[tokio::test]
    async fn test_closed_sink_does_not_abort_accumulation() {
        let chunks = [sse_chunk("one "), sse_chunk("two"), "data: [DONE]\n".to_string()];
        let parts: Vec<&str> = chunks.iter().map(|s| s.as_str()).collect();

        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let text = drain_sse_stream(byte_stream(parts), tx).await.unwrap();
        assert_eq!(text, "one two");
    }
}
