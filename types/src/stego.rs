//! Stripping of invisible Unicode characters used to evade literal-text matching.
//!
//! Guest-produced strings can carry zero-width and Unicode tag characters
//! that split an otherwise-matchable literal (a secret, a banned identifier)
//! so that naive substring search misses it. This runs before any
//! pattern-based redaction or validation.

use std::borrow::Cow;

/// Characters stripped: zero-width space/joiner/non-joiner, BOM, and the
/// Unicode tag block (U+E0000-U+E007F) used for invisible-text smuggling.
fn is_steganographic(c: char) -> bool {
    matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}') || ('\u{E0000}'..='\u{E007F}').contains(&c)
}

/// Remove invisible Unicode characters commonly used to split or hide text.
#[must_use]
pub fn strip_steganographic_chars(input: &str) -> Cow<'_, str> {
    if !input.chars().any(is_steganographic) {
        return Cow::Borrowed(input);
    }
    Cow::Owned(input.chars().filter(|c| !is_steganographic(*c)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_unchanged() {
        assert_eq!(strip_steganographic_chars("hello"), "hello");
    }

    #[test]
    fn strips_zero_width_space() {
        assert_eq!(strip_steganographic_chars("he\u{200B}llo"), "hello");
    }

    #[test]
    fn strips_unicode_tag_block() {
        let input = "secret_\u{E0001}value";
        assert_eq!(strip_steganographic_chars(input), "secret_value");
    }
}
