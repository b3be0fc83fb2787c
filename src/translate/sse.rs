//! Line decoder for the upstream `data: <json>` event stream.

/// One classified line of the upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Payload of a `data:` line.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
    /// Blank lines, comments, and fields other than `data`.
    Ignore,
}

/// Buffers raw bytes and yields complete lines. Bytes are kept undecoded
/// until a newline arrives so a UTF-8 sequence split across network chunks
/// survives intact.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(classify(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Flush a trailing line that never got its newline.
    pub fn finish(&mut self) -> Option<SseLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        match classify(&raw) {
            SseLine::Ignore => None,
            line => Some(line),
        }
    }
}

fn classify(raw: &[u8]) -> SseLine {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();

    if line.is_empty() || line.starts_with(':') {
        return SseLine::Ignore;
    }

    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Ignore;
    };

    let data = data.trim();
    if data == "[DONE]" {
        SseLine::Done
    } else if data.is_empty() {
        SseLine::Ignore
    } else {
        SseLine::Data(data.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        let lines = decoder.push(b":1}\n\ndata: [DONE]\n");
        assert_eq!(
            lines,
            vec![
                SseLine::Data("{\"a\":1}".to_string()),
                SseLine::Ignore,
                SseLine::Done
            ]
        );
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let bytes = "data: {\"t\":\"héllo\"}\n".as_bytes();
        // Split inside the two-byte 'é'.
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        let lines = decoder.push(&bytes[split..]);
        assert_eq!(lines, vec![SseLine::Data("{\"t\":\"héllo\"}".to_string())]);
    }

    #[test]
    fn test_comments_and_other_fields_ignored() {
        let mut decoder = SseLineDecoder::new();
        let lines = decoder.push(b": keep-alive\nevent: foo\nid: 3\r\ndata:{}\r\n");
        assert_eq!(
            lines,
            vec![
                SseLine::Ignore,
                SseLine::Ignore,
                SseLine::Ignore,
                SseLine::Data("{}".to_string())
            ]
        );
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseLineDecoder::new();
        decoder.push(b"data: [DONE]");
        assert_eq!(decoder.finish(), Some(SseLine::Done));
        assert_eq!(decoder.finish(), None);
    }
}
