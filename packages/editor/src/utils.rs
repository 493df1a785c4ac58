//! String helpers shared by the text operations and the reconciler

use crate::node::Direction;

/// Length in characters
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte index of a character offset, clamped to the end of the string
pub fn byte_index(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(index, _)| index)
        .unwrap_or(text.len())
}

/// Substring by character range
pub fn char_slice(text: &str, start: usize, end: usize) -> &str {
    let start = byte_index(text, start);
    let end = byte_index(text, end).max(start);
    &text[start..end]
}

/// Replace `delete` characters at `offset` with `insert`
pub fn splice_chars(text: &str, offset: usize, delete: usize, insert: &str) -> String {
    let start = byte_index(text, offset);
    let end = byte_index(text, offset + delete);
    let mut out = String::with_capacity(text.len() + insert.len());
    out.push_str(&text[..start]);
    out.push_str(insert);
    out.push_str(&text[end..]);
    out
}

fn is_rtl_char(c: char) -> bool {
    matches!(c as u32, 0x0591..=0x07FF | 0xFB1D..=0xFDFD | 0xFE70..=0xFEFC)
}

fn is_ltr_char(c: char) -> bool {
    c.is_ascii_alphabetic()
        || matches!(
            c as u32,
            0x00C0..=0x00D6
                | 0x00D8..=0x00F6
                | 0x00F8..=0x02B8
                | 0x0300..=0x0590
                | 0x0800..=0x1FFF
                | 0x200E
                | 0x2C00..=0xFB1C
                | 0xFE00..=0xFE6F
                | 0xFEFD..=0xFFFF
        )
}

/// Direction of the first strongly directional character
pub fn text_direction(text: &str) -> Option<Direction> {
    for c in text.chars() {
        if is_rtl_char(c) {
            return Some(Direction::Rtl);
        }
        if is_ltr_char(c) {
            return Some(Direction::Ltr);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splice_chars_multibyte() {
        assert_eq!(splice_chars("héllo", 1, 1, "e"), "hello");
        assert_eq!(splice_chars("ab", 1, 0, "X"), "aXb");
        assert_eq!(char_slice("héllo", 1, 3), "él");
    }

    #[test]
    fn test_text_direction() {
        assert_eq!(text_direction("123 abc"), Some(Direction::Ltr));
        assert_eq!(text_direction("  שלום"), Some(Direction::Rtl));
        assert_eq!(text_direction("42!"), None);
    }
}
