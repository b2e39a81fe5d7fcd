//! Comments, white space and character classes of the PDF grammar.

use crate::reader::Reader;

#[inline(always)]
pub(crate) fn is_white_space_character(char: u8) -> bool {
    matches!(char, 0x00 | 0x09 | 0x0a | 0x0c | 0x0d | 0x20)
}

#[inline(always)]
pub(crate) fn is_regular_character(char: u8) -> bool {
    match char {
        // Whitespace characters
        0x00 | 0x09 | 0x0a | 0x0c | 0x0d | 0x20 => false,
        // Delimiter characters
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' => false,
        _ => true,
    }
}

#[inline(always)]
pub(crate) fn is_eol_character(char: u8) -> bool {
    matches!(char, 0x0a | 0x0d)
}

#[inline(always)]
pub(crate) fn is_digit(char: u8) -> bool {
    char.is_ascii_digit()
}

/// Skip a `%` comment up to (not including) the end-of-line marker.
pub(crate) fn skip_comment(r: &mut Reader<'_>) -> Option<()> {
    r.forward_tag(b"%")?;
    r.forward_while(|b| !is_eol_character(b));

    Some(())
}
