//! String helpers for multi-byte (Korean) text.

/// Find the nearest valid UTF-8 char boundary at or before the given byte index.
#[inline]
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Truncate a string to at most `max_len` bytes without splitting a character.
#[inline]
pub fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        &s[..floor_char_boundary(s, max_len)]
    }
}

/// Single-line preview of document text for terminal output.
pub fn preview(text: &str, max_len: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let cut = truncate_str(&flat, max_len);
    if cut.len() < flat.len() {
        format!("{}...", cut.trim_end())
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_char_boundary_hangul() {
        // each syllable is 3 bytes
        let s = "제조규정";
        assert_eq!(floor_char_boundary(s, 0), 0);
        assert_eq!(floor_char_boundary(s, 3), 3);
        assert_eq!(floor_char_boundary(s, 4), 3);
        assert_eq!(floor_char_boundary(s, 5), 3);
        assert_eq!(floor_char_boundary(s, 100), s.len());
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("제조규정", 7), "제조");
        assert_eq!(truncate_str("abc", 10), "abc");
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("제1조\n(목적)  이 규정은", 100), "제1조 (목적) 이 규정은");
        assert_eq!(preview("의약품 제조", 10), "의약품...");
    }
}
