// ============================================================
// Layer 4 — Caption Preprocessor
// ============================================================
// Cleans a raw caption before tokenisation.
//
// Caption files scraped from the web often contain:
//   - Non-breaking spaces (U+00A0) and zero-width spaces (U+200B)
//   - Byte order marks at the start of the file
//   - Tabs and stray control characters
//   - Runs of spaces
//
// Cleaning steps (applied in order):
//   1. Replace Unicode whitespace variants and control chars with a space
//   2. Collapse runs of spaces into one
//   3. Trim both ends
//   4. Lowercase, when the tokenizer expects lowercased text
//
// Reference: Rust Book §8 (Strings in Rust)

pub struct Preprocessor {
    lowercase: bool,
}

impl Preprocessor {
    pub fn new(lowercase: bool) -> Self {
        Self { lowercase }
    }

    /// Clean one caption. Captions are single-line, so newlines are
    /// treated like any other whitespace.
    pub fn clean(&self, text: &str) -> String {
        let mut out        = String::with_capacity(text.len());
        let mut last_space = true; // swallows leading whitespace

        for c in text.chars() {
            let c = match c {
                '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
                c if c.is_whitespace() || c.is_control() => ' ',
                c => c,
            };
            if c == ' ' {
                if !last_space {
                    out.push(' ');
                }
                last_space = true;
            } else {
                out.push(c);
                last_space = false;
            }
        }

        let trimmed = out.trim_end();
        if self.lowercase {
            trimmed.to_lowercase()
        } else {
            trimmed.to_string()
        }
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(false)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_multiple_spaces() {
        let p = Preprocessor::default();
        assert_eq!(p.clean("a  dog\t\truns"), "a dog runs");
    }

    #[test]
    fn test_trims_edges() {
        let p = Preprocessor::default();
        assert_eq!(p.clean("\u{FEFF}  two cats  "), "two cats");
    }

    #[test]
    fn test_removes_control_chars() {
        let p = Preprocessor::default();
        assert_eq!(p.clean("red\x01ball"), "red ball");
    }

    #[test]
    fn test_lowercases_when_asked() {
        assert_eq!(Preprocessor::new(true).clean("A Man On A Bike"), "a man on a bike");
        assert_eq!(Preprocessor::new(false).clean("A Man"), "A Man");
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(Preprocessor::default().clean(""), "");
    }
}
