/// Largest partial line kept between reads before it is flushed as-is
const MAX_PENDING: usize = 4096;

/// Splits the inbound byte stream into trimmed text lines
///
/// A line cut in half by a read boundary is held back until the rest
/// arrives. Blank lines (including the `\r` half of a CRLF) are dropped.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk read from the socket, returning the completed lines in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            push_line(&mut lines, &self.pending[start..end]);
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_PENDING {
            tracing::warn!(
                "No line terminator after {} bytes, flushing partial line",
                self.pending.len()
            );
            let overflow = std::mem::take(&mut self.pending);
            push_line(&mut lines, &overflow);
        }

        lines
    }

    /// Bytes held back waiting for a newline
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

fn push_line(lines: &mut Vec<String>, raw: &[u8]) {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if !text.is_empty() {
        lines.push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_crlf_lines() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"PWR0\r\nVOL121\r\n");
        assert_eq!(lines, vec!["PWR0", "VOL121"]);
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn reassembles_across_reads() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push(b"\r\nVO"), Vec::<String>::new());
        assert_eq!(splitter.pending(), 2);
        assert_eq!(splitter.push(b"L121\r\nFN"), vec!["VOL121"]);
        assert_eq!(splitter.push(b"04\r\n"), vec!["FN04"]);
    }

    #[test]
    fn blank_lines_are_dropped() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push(b"\r\n\r\n  \n"), Vec::<String>::new());
    }

    #[test]
    fn oversized_fragment_is_flushed() {
        let mut splitter = LineSplitter::new();
        let junk = vec![b'x'; MAX_PENDING + 1];
        let lines = splitter.push(&junk);
        assert_eq!(lines.len(), 1);
        assert_eq!(splitter.pending(), 0);
    }
}
