//! Server-sent events line decoder
//!
//! Buffers raw bytes and only decodes complete lines, so a multi-byte
//! character split across network chunks is never corrupted.

/// What a complete SSE line carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// `data:` payload, leading space removed
    Data(String),
    /// Terminal `[DONE]` payload
    Done,
}

/// Incremental SSE decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning the payload lines completed by them
    ///
    /// Comments, `event:`/`id:`/`retry:` fields and blank separators are ignored.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseLine> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(line) = Self::decode_line(&raw[..raw.len() - 1]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Decode whatever is left once the body ends without a trailing newline
    pub fn finish(&mut self) -> Option<SseLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        Self::decode_line(&raw)
    }

    fn decode_line(raw: &[u8]) -> Option<SseLine> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);
        let payload = line.strip_prefix("data:")?;
        let payload = payload.strip_prefix(' ').unwrap_or(payload);

        if payload.trim() == "[DONE]" {
            return Some(SseLine::Done);
        }
        Some(SseLine::Data(payload.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_lines() {
        let mut decoder = SseDecoder::new();
        let lines = decoder.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\r\n\r\n");
        assert_eq!(
            lines,
            vec![
                SseLine::Data("{\"a\":1}".to_string()),
                SseLine::Data("{\"b\":2}".to_string()),
            ]
        );
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"da").is_empty());
        assert!(decoder.push(b"ta: hel").is_empty());
        assert_eq!(decoder.push(b"lo\n"), vec![SseLine::Data("hello".to_string())]);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let bytes = "data: అర్థ\n".as_bytes();
        // Split inside the first Telugu character
        let (head, tail) = bytes.split_at(7);

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec![SseLine::Data("అర్థ".to_string())]);
    }

    #[test]
    fn test_done_and_ignored_fields() {
        let mut decoder = SseDecoder::new();
        let lines = decoder.push(b": keepalive\nevent: message\nid: 4\ndata: [DONE]\n");
        assert_eq!(lines, vec![SseLine::Done]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data:tail").is_empty());
        assert_eq!(decoder.finish(), Some(SseLine::Data("tail".to_string())));
        assert_eq!(decoder.finish(), None);
    }
}
