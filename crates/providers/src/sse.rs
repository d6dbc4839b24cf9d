//! Server-sent-event decoding shared by the provider adapters.
//!
//! [`SseDecoder`] accumulates raw body bytes and yields complete `data:`
//! payloads; [`sse_response_stream`] drives it over a `reqwest::Response`
//! and hands each payload to a provider-specific parser.

use cg_domain::error::Result;
use cg_domain::stream::{BoxStream, StreamEvent};

use crate::credentials::from_reqwest;

/// Incremental SSE framer. Events are separated by a blank line; only
/// `data:` fields are kept. `\r\n` line endings are normalised.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    /// Append a body chunk and return every payload it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
        self.drain()
    }

    /// Flush whatever is left once the body has closed.
    pub fn finish(&mut self) -> Vec<String> {
        if self.buffer.trim().is_empty() {
            self.buffer.clear();
            return Vec::new();
        }
        self.buffer.push_str("\n\n");
        self.drain()
    }

    fn drain(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            let data: Vec<&str> = block
                .lines()
                .filter_map(|l| l.strip_prefix("data:"))
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .collect();
            if !data.is_empty() {
                out.push(data.join("\n"));
            }
        }
        out
    }
}

/// Stream parsed events out of an SSE response.
///
/// `parse` may keep state across payloads (tool-call assembly). A
/// trailing `Done` is synthesised when the parser never produced one.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut decoder = SseDecoder::default();
        let mut saw_done = false;

        loop {
            let payloads = match response.chunk().await {
                Ok(Some(bytes)) => decoder.push(&bytes),
                Ok(None) => {
                    for data in decoder.finish() {
                        for event in parse(&data) {
                            saw_done |= matches!(event, Ok(StreamEvent::Done { .. }));
                            yield event;
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    return;
                }
            };
            for data in payloads {
                for event in parse(&data) {
                    saw_done |= matches!(event, Ok(StreamEvent::Done { .. }));
                    yield event;
                }
            }
        }

        if !saw_done {
            yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) });
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_complete_events_only() {
        let mut d = SseDecoder::default();
        assert_eq!(d.push(b"data: one\n\ndata: tw"), vec!["one"]);
        assert_eq!(d.push(b"o\n\n"), vec!["two"]);
    }

    #[test]
    fn ignores_other_fields_and_blank_data() {
        let mut d = SseDecoder::default();
        let out = d.push(b"event: ping\nid: 7\ndata: \n\nevent: x\ndata: {\"a\":1}\n\n");
        assert_eq!(out, vec!["{\"a\":1}"]);
    }

    #[test]
    fn crlf_framing() {
        let mut d = SseDecoder::default();
        assert_eq!(d.push(b"data: [DONE]\r\n\r\n"), vec!["[DONE]"]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: tail").is_empty());
        assert_eq!(d.finish(), vec!["tail"]);
        assert!(d.finish().is_empty());
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut d = SseDecoder::default();
        assert_eq!(d.push(b"data: a\ndata: b\n\n"), vec!["a\nb"]);
    }
}
