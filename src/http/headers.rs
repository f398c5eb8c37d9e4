//! Ordered header-line sequences.
//!
//! A header block is kept as raw lines (request or status line first) rather
//! than parsed into a map: order and duplicates are preserved so anything we
//! don't rewrite goes out exactly as it came in.
//!
//! Lines are decoded as Latin-1, which maps every byte to one char, so a block
//! read off the wire and written back is byte-for-byte identical.

/// Line separator on the wire.
pub const CRLF: &[u8] = b"\r\n";

/// Ordered sequence of header lines. Element 0 is the request or status line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSequence {
    lines: Vec<String>,
}

impl HeaderSequence {
    /// Create an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sequence from raw block bytes (without the terminating blank
    /// line), splitting on CRLF.
    pub fn from_block(block: &[u8]) -> Self {
        let lines = split_crlf(block).map(decode_latin1).collect();
        Self { lines }
    }

    /// The request line (client side) or status line (upstream side).
    pub fn first_line(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    /// All lines in order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Append a line at the end.
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Remove every line starting with `prefix`, ignoring ASCII case.
    pub fn remove_if_prefix(&mut self, prefix: &str) {
        self.lines.retain(|line| !has_prefix_ignore_case(line, prefix));
    }

    /// Number of lines starting with `prefix`, ignoring ASCII case.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.lines
            .iter()
            .filter(|line| has_prefix_ignore_case(line, prefix))
            .count()
    }

    /// Encode as it goes on the wire: each line followed by CRLF, then one
    /// blank line.
    pub fn to_wire(&self) -> Vec<u8> {
        let size = self.lines.iter().map(|l| l.len() + 2).sum::<usize>() + 2;
        let mut out = Vec::with_capacity(size);
        for line in &self.lines {
            out.extend(line.chars().map(encode_latin1));
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(CRLF);
        out
    }
}

impl<S: Into<String>> FromIterator<S> for HeaderSequence {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().map(Into::into).collect(),
        }
    }
}

fn has_prefix_ignore_case(line: &str, prefix: &str) -> bool {
    let (line, prefix) = (line.as_bytes(), prefix.as_bytes());
    line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn split_crlf(block: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = Some(block);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.windows(2).position(|w| w == CRLF) {
            Some(at) => {
                rest = Some(&current[at + 2..]);
                Some(&current[..at])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

// Only lines built in code can hold chars above U+00FF.
fn encode_latin1(c: char) -> u8 {
    u8::try_from(u32::from(c)).unwrap_or(b'?')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_block_on_crlf() {
        let headers = HeaderSequence::from_block(b"GET / HTTP/1.1\r\nHost: a\r\nX: 1");
        assert_eq!(headers.lines(), ["GET / HTTP/1.1", "Host: a", "X: 1"]);
        assert_eq!(headers.first_line(), Some("GET / HTTP/1.1"));
    }

    #[test]
    fn lone_cr_or_lf_stays_inside_a_line() {
        let headers = HeaderSequence::from_block(b"A\nB\rC\r\nD");
        assert_eq!(headers.lines(), ["A\nB\rC", "D"]);
    }

    #[test]
    fn wire_format_ends_with_one_blank_line() {
        let headers: HeaderSequence = ["HTTP/1.1 200 OK", "X: 1"].into_iter().collect();
        assert_eq!(headers.to_wire(), b"HTTP/1.1 200 OK\r\nX: 1\r\n\r\n");
    }

    #[test]
    fn non_ascii_bytes_survive_unchanged() {
        let raw = b"GET / HTTP/1.1\r\nX-Name: caf\xe9 \xff";
        let headers = HeaderSequence::from_block(raw);
        let mut expected = raw.to_vec();
        expected.extend_from_slice(b"\r\n\r\n");
        assert_eq!(headers.to_wire(), expected);
    }

    #[test]
    fn prefix_removal_ignores_case_and_keeps_order() {
        let mut headers: HeaderSequence =
            ["GET / HTTP/1.1", "connection: keep-alive", "A: 1", "CONNECTION: x", "B: 2"]
                .into_iter()
                .collect();
        headers.remove_if_prefix("connection:");
        assert_eq!(headers.lines(), ["GET / HTTP/1.1", "A: 1", "B: 2"]);
    }

    #[test]
    fn prefix_must_match_from_line_start() {
        let headers: HeaderSequence = ["X-Connection: a", "Conn: b"].into_iter().collect();
        assert_eq!(headers.count_prefix("connection:"), 0);
    }
}
