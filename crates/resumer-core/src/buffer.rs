/// Append-only, ordered chunks of one in-flight response plus a completion
/// marker. Once complete, further appends are ignored.
#[derive(Debug, Clone, Default)]
pub struct TokenBuffer {
    chunks: Vec<String>,
    complete: bool,
}

impl TokenBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the chunk was dropped because the buffer is complete.
    pub fn append(&mut self, chunk: impl Into<String>) -> bool {
        if self.complete {
            return false;
        }
        self.chunks.push(chunk.into());
        true
    }

    /// Returns `true` only on the transition to complete.
    pub fn complete(&mut self) -> bool {
        if self.complete {
            return false;
        }
        self.complete = true;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks at `position` and after. Positions past the end yield nothing.
    pub fn slice_from(&self, position: usize) -> &[String] {
        &self.chunks[position.min(self.chunks.len())..]
    }

    pub fn text(&self) -> String {
        self.chunks.concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_slice() {
        let mut buffer = TokenBuffer::new();
        assert!(buffer.is_empty());
        buffer.append("Hel");
        buffer.append("lo");
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.slice_from(0), ["Hel", "lo"]);
        assert_eq!(buffer.slice_from(1), ["lo"]);
        assert!(buffer.slice_from(5).is_empty());
        assert_eq!(buffer.text(), "Hello");
    }

    #[test]
    fn test_append_after_complete_is_ignored() {
        let mut buffer = TokenBuffer::new();
        buffer.append("a");
        assert!(buffer.complete());
        assert!(!buffer.complete());
        assert!(!buffer.append("b"));
        assert_eq!(buffer.len(), 1);
        assert!(buffer.is_complete());
    }
}
