//! Newline framing for the daemon's stdout.

/// Reassembles newline-terminated lines from arbitrarily split reads.
///
/// Buffers raw bytes, not text, so a multi-byte UTF-8 sequence cut in half by
/// a read boundary is decoded only once it is complete.
#[derive(Debug, Default)]
pub struct LineBuffer {
    residue: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, without the
    /// terminator. Blank lines are skipped; the trailing partial line stays
    /// buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.residue.extend_from_slice(chunk);

        let Some(last_newline) = self.residue.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.residue.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.residue, rest);

        complete
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Bytes of the incomplete line currently held.
    pub fn pending_bytes(&self) -> usize {
        self.residue.len()
    }
}
