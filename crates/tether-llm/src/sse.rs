use tether_core::errors::GatewayError;
use tether_core::stream::ResponseChunk;

/// Incremental decoder for a `text/event-stream` body.
///
/// Bytes are fed in as they arrive and buffered undecoded, so a multi-byte
/// character or a `\r\n` pair split across reads is reassembled before
/// anything is interpreted. Each complete event yields its `data:` payload,
/// or a decode error if the event is not valid UTF-8. Multiple `data:`
/// lines within one event are joined with `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    pending_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes and return the payloads of every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<String, GatewayError>> {
        self.buffer.reserve(bytes.len());
        for &byte in bytes {
            // CRLF and lone CR both end a line.
            if std::mem::take(&mut self.pending_cr) {
                self.buffer.push(b'\n');
                if byte == b'\n' {
                    continue;
                }
            }
            if byte == b'\r' {
                self.pending_cr = true;
            } else {
                self.buffer.push(byte);
            }
        }

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..pos + 2).take(pos).collect();
            payloads.extend(decode_event(&event));
        }
        payloads
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Vec<Result<String, GatewayError>> {
        if std::mem::take(&mut self.pending_cr) {
            self.buffer.push(b'\n');
        }
        let rest = std::mem::take(&mut self.buffer);
        decode_event(&rest)
    }
}

fn decode_event(event: &[u8]) -> Vec<Result<String, GatewayError>> {
    match std::str::from_utf8(event) {
        Ok(text) => parse_sse_data(text).into_iter().map(Ok).collect(),
        Err(e) => vec![Err(GatewayError::Decode(format!(
            "invalid UTF-8 in event stream: {e}"
        )))],
    }
}

/// Extract `data:` payloads from raw SSE text, one per event.
pub fn parse_sse_data(raw: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        if line.is_empty() {
            payloads.extend(current.take());
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            match current.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(data);
                }
                None => current = Some(data.to_string()),
            }
        }
        // `event:`, `id:`, `retry:` and comments carry nothing we use.
    }
    payloads.extend(current);
    payloads
}

/// Decode one `data:` payload. `Ok(None)` for end-of-stream markers.
pub fn decode_chunk(payload: &str) -> Result<Option<ResponseChunk>, GatewayError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() || trimmed == "[DONE]" {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| GatewayError::Decode(format!("{e}: {trimmed}")))
}
