//! Character cursor over metadata text

/// A forward-only cursor with peek/advance over a string slice
///
/// Positions are byte offsets into the original text.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    text: &'a str,
    position: usize,
}

impl<'a> Cursor<'a> {
    /// Start at the beginning of `text`
    pub fn new(text: &'a str) -> Self {
        Self { text, position: 0 }
    }

    /// Current byte offset
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether all input has been consumed
    pub fn is_at_end(&self) -> bool {
        self.position >= self.text.len()
    }

    /// Next character without consuming it
    pub fn peek(&self) -> Option<char> {
        self.text[self.position..].chars().next()
    }

    /// Consume and return the next character
    pub fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += c.len_utf8();
        Some(c)
    }

    /// Consume whitespace
    pub fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.advance();
        }
    }

    /// Consume characters up to (not including) whitespace or any of
    /// `stops`, returning the consumed slice
    pub fn take_until(&mut self, stops: &[char]) -> &'a str {
        let start = self.position;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || stops.contains(&c) {
                break;
            }
            self.advance();
        }
        &self.text[start..self.position]
    }
}
