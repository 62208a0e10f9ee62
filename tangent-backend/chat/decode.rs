//! Turning raw relay body chunks into text deltas.

/// Incremental UTF-8 decoder that holds back a trailing partial character
/// until the next chunk completes it.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            let err = match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    None
                }
                Err(err) => Some(err),
            };
            let Some(err) = err else {
                self.pending.clear();
                return out;
            };

            let valid = err.valid_up_to();
            out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
            match err.error_len() {
                // Incomplete sequence at the end: wait for more bytes.
                None => {
                    self.pending.drain(..valid);
                    return out;
                }
                Some(bad) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid + bad);
                }
            }
        }
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Some relays frame deltas as `data:` lines. Pull the payloads out when
/// present, otherwise treat the chunk as raw text. Data lines within one
/// event are joined with `\n`, so an empty payload still counts.
pub fn strip_data_lines(chunk: &str) -> String {
    if !chunk.lines().any(|line| line.starts_with("data:")) {
        return chunk.to_string();
    }
    chunk
        .split("\n\n")
        .filter_map(|event| {
            let lines: Vec<&str> = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
                .map(|rest| rest.strip_suffix('\r').unwrap_or(rest))
                .collect();
            (!lines.is_empty()).then(|| lines.join("\n"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_chunk_passes_through() {
        assert_eq!(strip_data_lines("Hello world"), "Hello world");
    }

    #[test]
    fn test_data_lines_are_stripped_and_joined() {
        assert_eq!(strip_data_lines("data: Hel\n\ndata: lo\n\n"), "Hello");
        assert_eq!(strip_data_lines("data:x"), "x");
    }

    #[test]
    fn test_blank_data_lines_keep_newline() {
        assert_eq!(strip_data_lines("data: \ndata: \n\n"), "\n");
        assert_eq!(strip_data_lines("data: a\ndata: b\n\n"), "a\nb");
        assert_eq!(strip_data_lines("data: \r\n\r\n"), "");
    }

    #[test]
    fn test_framing_never_leaks() {
        assert_eq!(strip_data_lines("data: \n\n"), "");
        assert_eq!(strip_data_lines("event: delta\ndata: hi\n\n"), "hi");
    }

    #[test]
    fn test_split_multibyte_character() {
        let bytes = "héllo".as_bytes();
        let mut decoder = Utf8Decoder::new();
        // 'é' is two bytes starting at index 1.
        let first = decoder.decode(&bytes[..2]);
        let second = decoder.decode(&bytes[2..]);
        assert_eq!(first, "h");
        assert_eq!(second, "éllo");
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut decoder = Utf8Decoder::new();
        let out = decoder.decode(&[b'a', 0xFF, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn test_finish_flushes_dangling_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[0xC3]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}
