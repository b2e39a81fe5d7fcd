//! Parsing PDF objects out of raw bytes.
//!
//! The low-level functions return `Option` and leave the reader untouched on
//! failure; boundary operations attach offsets and reasons when they convert
//! a failed parse into an error.

use crate::object::{keys, Dict, Name, Object, ObjectId, PdfString, Stream, StringKind};
use crate::reader::Reader;
use crate::trivia::{is_digit, is_regular_character, is_white_space_character};
use log::warn;

/// How lenient stream parsing is.
#[derive(Debug, Copy, Clone)]
pub(crate) struct ParseOptions {
    /// In relaxed mode a missing or wrong `/Length` is recovered by scanning
    /// for the `endstream` keyword.
    pub relaxed: bool,
}

/// Resolves an indirect `/Length` entry while a stream is being parsed.
pub(crate) type LengthResolver<'r> = dyn FnMut(ObjectId) -> Option<i64> + 'r;

fn backtrack<'a, T>(r: &mut Reader<'a>, f: impl FnOnce(&mut Reader<'a>) -> Option<T>) -> Option<T> {
    let old = r.offset();

    f(r).or_else(|| {
        r.jump(old);
        None
    })
}

/// Expect a keyword: the tag itself, not followed by a regular character.
fn keyword(r: &mut Reader<'_>, tag: &[u8]) -> Option<()> {
    backtrack(r, |r| {
        r.forward_tag(tag)?;

        match r.peek_byte() {
            Some(b) if is_regular_character(b) => None,
            _ => Some(()),
        }
    })
}

/// Parse a direct object (anything except a stream).
pub(crate) fn parse_object(r: &mut Reader<'_>) -> Option<Object> {
    r.skip_white_spaces_and_comments();

    match r.peek_byte()? {
        b'n' => keyword(r, b"null").map(|_| Object::Null),
        b't' => keyword(r, b"true").map(|_| Object::Boolean(true)),
        b'f' => keyword(r, b"false").map(|_| Object::Boolean(false)),
        b'/' => parse_name(r).map(Object::Name),
        b'(' => parse_literal_string(r).map(Object::String),
        b'<' => {
            if r.peek_tag(b"<<").is_some() {
                parse_dict(r).map(Object::Dict)
            } else {
                parse_hex_string(r).map(Object::String)
            }
        }
        b'[' => parse_array(r),
        b'.' | b'+' | b'-' | b'0'..=b'9' => parse_numeric_or_reference(r),
        _ => None,
    }
}

/// Parse `num gen obj`.
pub(crate) fn parse_indirect_header(r: &mut Reader<'_>) -> Option<ObjectId> {
    backtrack(r, |r| {
        r.skip_white_spaces_and_comments();
        let num = r.read_uint::<u32>()?;
        r.skip_white_spaces_and_comments();
        let gen = r.read_uint::<u16>()?;
        r.skip_white_spaces_and_comments();
        keyword(r, b"obj")?;

        Some(ObjectId::new(num, gen))
    })
}

/// Parse a complete indirect object, including a stream payload when the
/// value is followed by the `stream` keyword.
pub(crate) fn parse_indirect_object(
    r: &mut Reader<'_>,
    opts: ParseOptions,
    resolve_length: &mut LengthResolver<'_>,
) -> Option<(ObjectId, Object)> {
    backtrack(r, |r| {
        let id = parse_indirect_header(r)?;
        r.skip_white_spaces_and_comments();

        let object = match r.peek_byte() {
            // An object body may legitimately be missing; treat it as null.
            Some(b'e') if keyword(&mut r.clone(), b"endobj").is_some() => Object::Null,
            _ => parse_object(r)?,
        };

        let object = if let Object::Dict(dict) = object {
            let mut probe = r.clone();
            probe.skip_white_spaces_and_comments();

            if probe.forward_tag(b"stream").is_some() {
                r.jump(probe.offset());
                let data = parse_stream_data(r, &dict, opts, resolve_length)?;
                Object::Stream(Stream::new(dict, data))
            } else {
                Object::Dict(dict)
            }
        } else {
            object
        };

        r.skip_white_spaces_and_comments();
        if keyword(r, b"endobj").is_none() {
            // Tolerated: plenty of files in the wild drop or misplace the
            // endobj keyword.
            warn!("object {id} is not terminated by endobj");
        }

        Some((id, object))
    })
}

/// Read the stream payload following the `stream` keyword (which has already
/// been consumed).
fn parse_stream_data(
    r: &mut Reader<'_>,
    dict: &Dict,
    opts: ParseOptions,
    resolve_length: &mut LengthResolver<'_>,
) -> Option<Vec<u8>> {
    // The keyword shall be followed by an EOL marker that is not part of the
    // payload.
    r.forward_tag(b"\r\n")
        .or_else(|| r.forward_tag(b"\n"))
        .or_else(|| r.forward_tag(b"\r"));

    let start = r.offset();

    let length = match dict.get(keys::LENGTH) {
        Some(Object::Integer(n)) => Some(*n),
        Some(Object::Reference(id)) => resolve_length(*id),
        _ => None,
    };

    if let Some(length) = length {
        let length = usize::try_from(length).ok()?;
        let mut probe = r.clone();

        if let Some(data) = probe.read_bytes(length) {
            probe.skip_white_spaces();

            if probe.forward_tag(b"endstream").is_some() {
                r.jump(probe.offset());
                return Some(data.to_vec());
            }
        }

        if !opts.relaxed {
            return None;
        }

        warn!("stream has invalid /Length {length}, scanning for endstream");
    } else if !opts.relaxed {
        return None;
    }

    scan_for_endstream(r, start)
}

/// Relaxed-mode recovery: locate the literal `endstream` and treat everything
/// before it (minus one optional trailing EOL) as the payload.
fn scan_for_endstream(r: &mut Reader<'_>, start: usize) -> Option<Vec<u8>> {
    r.jump(start);

    let tail = r.tail()?;
    let pos = tail
        .windows(b"endstream".len())
        .position(|w| w == b"endstream")?;

    // One EOL before the keyword belongs to the syntax, not the payload.
    let mut data = &tail[..pos];
    if data.ends_with(b"\r\n") {
        data = &data[..data.len() - 2];
    } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
        data = &data[..data.len() - 1];
    }

    r.jump(start + pos + b"endstream".len());

    Some(data.to_vec())
}

fn parse_name(r: &mut Reader<'_>) -> Option<Name> {
    backtrack(r, |r| {
        r.forward_tag(b"/")?;

        let start = r.offset();
        while let Some(b) = r.eat(is_regular_character) {
            if b == b'#' {
                r.eat(|n| n.is_ascii_hexdigit())?;
                r.eat(|n| n.is_ascii_hexdigit())?;
            }
        }

        Some(Name::from_encoded(r.range(start..r.offset())?))
    })
}

fn parse_numeric_or_reference(r: &mut Reader<'_>) -> Option<Object> {
    // `N G R` cannot be told apart from a number without lookahead.
    if let Some(reference) = backtrack(r, parse_reference) {
        return Some(reference);
    }

    parse_number(r)
}

fn parse_reference(r: &mut Reader<'_>) -> Option<Object> {
    let num = r.read_uint::<u32>()?;
    r.forward_while_1(is_white_space_character)?;
    let gen = r.read_uint::<u16>()?;
    r.skip_white_spaces_and_comments();
    keyword(r, b"R")?;

    Some(Object::reference(num, gen))
}

fn parse_number(r: &mut Reader<'_>) -> Option<Object> {
    backtrack(r, |r| {
        let start = r.offset();

        r.forward_if(|b| b == b'+' || b == b'-');

        let mut real = false;
        match r.peek_byte()? {
            b'.' => {
                real = true;
                r.forward();
                r.forward_while_1(is_digit)?;
            }
            b'0'..=b'9' => {
                r.forward_while_1(is_digit)?;
                if r.forward_tag(b".").is_some() {
                    real = true;
                    r.forward_while(is_digit);
                }
            }
            _ => return None,
        }

        let text = std::str::from_utf8(r.range(start..r.offset())?).ok()?;

        // A token is a real iff it contains a decimal point.
        if real {
            let mut text = std::borrow::Cow::Borrowed(text);
            // `5.` and `-.1` are valid PDF reals but not valid Rust floats.
            if text.ends_with('.') {
                text.to_mut().push('0');
            }

            text.parse::<f64>().ok().map(Object::Real)
        } else {
            text.parse::<i64>().ok().map(Object::Integer)
        }
    })
}

fn parse_literal_string(r: &mut Reader<'_>) -> Option<PdfString> {
    backtrack(r, |r| {
        r.forward_tag(b"(")?;
        let start = r.offset();

        let mut depth = 1usize;
        while depth > 0 {
            match r.read_byte()? {
                b'\\' => {
                    r.read_byte()?;
                }
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ => {}
            }
        }

        // Exclude the closing paren.
        let raw = r.range(start..r.offset() - 1)?;

        Some(PdfString::with_raw(
            decode_literal(raw),
            StringKind::Literal,
            raw.to_vec(),
        ))
    })
}

fn decode_literal(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut r = Reader::new(raw);

    while let Some(byte) = r.read_byte() {
        match byte {
            b'\\' => {
                let Some(next) = r.read_byte() else { break };

                if next.is_ascii_digit() && next < b'8' {
                    let mut value = (next - b'0') as u16;
                    for _ in 0..2 {
                        match r.eat(|b| (b'0'..=b'7').contains(&b)) {
                            Some(d) => value = value * 8 + (d - b'0') as u16,
                            None => break,
                        }
                    }

                    // A high-order overflow digit is simply dropped.
                    out.push(value as u8);
                } else {
                    match next {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0C),
                        b'(' => out.push(b'('),
                        b')' => out.push(b')'),
                        b'\\' => out.push(b'\\'),
                        // Line continuation: the backslash and the EOL marker
                        // both vanish.
                        b'\r' => {
                            let _ = r.forward_tag(b"\n");
                        }
                        b'\n' => {}
                        other => out.push(other),
                    }
                }
            }
            // A bare EOL marker reads as a single LINE FEED.
            b'\r' => {
                let _ = r.forward_tag(b"\n");
                out.push(b'\n');
            }
            other => out.push(other),
        }
    }

    out
}

fn parse_hex_string(r: &mut Reader<'_>) -> Option<PdfString> {
    backtrack(r, |r| {
        r.forward_tag(b"<")?;
        let start = r.offset();

        while let Some(b) = r.peek_byte() {
            if b.is_ascii_hexdigit() || is_white_space_character(b) {
                r.forward();
            } else {
                break;
            }
        }

        let raw = r.range(start..r.offset())?;
        r.forward_tag(b">")?;

        let mut digits: Vec<u8> = raw
            .iter()
            .copied()
            .filter(|b| !is_white_space_character(*b))
            .collect();

        // An odd count behaves as if a trailing zero were present.
        if digits.len() % 2 != 0 {
            digits.push(b'0');
        }

        let decoded = digits
            .chunks_exact(2)
            .map(|pair| hex_val(pair[0]) << 4 | hex_val(pair[1]))
            .collect();

        Some(PdfString::with_raw(
            decoded,
            StringKind::Hex,
            raw.to_vec(),
        ))
    })
}

#[inline]
fn hex_val(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

fn parse_array(r: &mut Reader<'_>) -> Option<Object> {
    backtrack(r, |r| {
        r.forward_tag(b"[")?;

        let mut items = vec![];
        loop {
            r.skip_white_spaces_and_comments();

            if r.forward_tag(b"]").is_some() {
                return Some(Object::Array(items));
            }

            items.push(parse_object(r)?);
        }
    })
}

pub(crate) fn parse_dict(r: &mut Reader<'_>) -> Option<Dict> {
    backtrack(r, |r| {
        r.forward_tag(b"<<")?;

        let mut dict = Dict::new();
        loop {
            r.skip_white_spaces_and_comments();

            if r.forward_tag(b">>").is_some() {
                return Some(dict);
            }

            let key = parse_name(r)?;
            let value = parse_object(r)?;
            // Duplicate keys resolve last-wins.
            dict.insert(key, value);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(data: &[u8]) -> Object {
        parse_object(&mut Reader::new(data)).unwrap()
    }

    #[test]
    fn null() {
        assert!(object(b"null").is_null());
    }

    #[test]
    fn booleans() {
        assert_eq!(object(b"true"), Object::Boolean(true));
        assert_eq!(object(b"false"), Object::Boolean(false));
    }

    #[test]
    fn integers() {
        assert_eq!(object(b"42"), Object::Integer(42));
        assert_eq!(object(b"-17"), Object::Integer(-17));
        assert_eq!(object(b"+9"), Object::Integer(9));
    }

    #[test]
    fn reals() {
        assert_eq!(object(b"34.5"), Object::Real(34.5));
        assert_eq!(object(b"-.002"), Object::Real(-0.002));
        assert_eq!(object(b"5."), Object::Real(5.0));
    }

    #[test]
    fn real_iff_decimal_point() {
        assert!(matches!(object(b"5"), Object::Integer(_)));
        assert!(matches!(object(b"5.0"), Object::Real(_)));
    }

    #[test]
    fn names() {
        assert_eq!(object(b"/Type"), Object::name(b"Type"));
        assert_eq!(object(b"/A#42"), Object::name(b"AB"));
        assert_eq!(object(b"/"), Object::name(b""));
    }

    #[test]
    fn literal_strings() {
        let check = |src: &[u8], expected: &[u8]| {
            let Object::String(s) = object(src) else {
                panic!("expected string");
            };
            assert_eq!(s.as_bytes(), expected);
        };

        check(b"(Hi there.)", b"Hi there.");
        check(b"(nested (paren) pairs)", b"nested (paren) pairs");
        check(b"(escaped \\( paren)", b"escaped ( paren");
        check(b"(Hi\\nWorld)", b"Hi\nWorld");
        check(b"(\\053)", b"+");
        check(b"(\\53)", b"+");
        check(b"(\\0533)", b"+3");
        check(b"(split \\\nline)", b"split line");
        check(b"(bare\nnewline)", b"bare\nnewline");
        check(b"(cr\r\npair)", b"cr\npair");
    }

    #[test]
    fn literal_string_keeps_raw() {
        let Object::String(s) = object(b"(Hi\\nWorld)") else {
            panic!("expected string");
        };
        assert_eq!(s.raw(), Some(&b"Hi\\nWorld"[..]));
        assert_eq!(s.kind(), StringKind::Literal);
    }

    #[test]
    fn hex_strings() {
        let check = |src: &[u8], expected: &[u8]| {
            let Object::String(s) = object(src) else {
                panic!("expected string");
            };
            assert_eq!(s.as_bytes(), expected);
            assert_eq!(s.kind(), StringKind::Hex);
        };

        check(b"<>", b"");
        check(b"<48656C6C6F>", b"Hello");
        check(b"<48 65 6C>", b"Hel");
        // Odd length pads with zero.
        check(b"<901FA>", &[0x90, 0x1F, 0xA0]);
    }

    #[test]
    fn arrays() {
        let Object::Array(items) = object(b"[1 2.5 /Name (str) [true] null]") else {
            panic!("expected array");
        };
        assert_eq!(items.len(), 6);
        assert_eq!(items[0], Object::Integer(1));
        assert!(matches!(items[4], Object::Array(_)));
    }

    #[test]
    fn dicts() {
        let Object::Dict(dict) = object(b"<< /Type /Catalog /Pages 2 0 R /Count 3 >>") else {
            panic!("expected dict");
        };
        assert!(dict.is_type(b"Catalog"));
        assert_eq!(dict.get_ref(b"Pages"), Some(ObjectId::new(2, 0)));
        assert_eq!(dict.get_int(b"Count"), Some(3));
    }

    #[test]
    fn dict_duplicate_keys_last_wins() {
        let Object::Dict(dict) = object(b"<< /K 1 /K 2 >>") else {
            panic!("expected dict");
        };
        assert_eq!(dict.get_int(b"K"), Some(2));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn references_need_lookahead() {
        assert_eq!(object(b"12 0 R"), Object::reference(12, 0));
        // Without the keyword the lookahead must fall back to a number.
        assert_eq!(object(b"12 0 RG"), Object::Integer(12));
        assert_eq!(object(b"12"), Object::Integer(12));
    }

    #[test]
    fn indirect_object() {
        let mut r = Reader::new(b"7 0 obj\n<< /Kind /Test >>\nendobj\n");
        let (id, obj) = parse_indirect_object(
            &mut r,
            ParseOptions { relaxed: false },
            &mut |_| None,
        )
        .unwrap();

        assert_eq!(id, ObjectId::new(7, 0));
        assert!(obj.as_dict().is_some());
    }

    #[test]
    fn stream_with_length() {
        let mut r = Reader::new(b"5 0 obj << /Length 10 >> stream\nabcdefghij\nendstream endobj");
        let (_, obj) = parse_indirect_object(
            &mut r,
            ParseOptions { relaxed: false },
            &mut |_| None,
        )
        .unwrap();

        assert_eq!(obj.as_stream().unwrap().raw_data(), b"abcdefghij");
    }

    #[test]
    fn stream_with_indirect_length() {
        let mut r = Reader::new(b"5 0 obj << /Length 8 0 R >> stream\nabcde\nendstream endobj");
        let (_, obj) = parse_indirect_object(
            &mut r,
            ParseOptions { relaxed: false },
            &mut |id| (id == ObjectId::new(8, 0)).then_some(5),
        )
        .unwrap();

        assert_eq!(obj.as_stream().unwrap().raw_data(), b"abcde");
    }

    #[test]
    fn stream_with_wrong_length_strict() {
        let data: &[u8] = b"5 0 obj << /Length 15 >> stream\nabcdefghij\nendstream endobj";
        let mut r = Reader::new(data);
        assert!(parse_indirect_object(
            &mut r,
            ParseOptions { relaxed: false },
            &mut |_| None,
        )
        .is_none());
    }

    #[test]
    fn stream_with_wrong_length_relaxed() {
        let data: &[u8] = b"5 0 obj << /Length 15 >> stream\nabcdefghij\nendstream endobj";
        let mut r = Reader::new(data);
        let (_, obj) = parse_indirect_object(
            &mut r,
            ParseOptions { relaxed: true },
            &mut |_| None,
        )
        .unwrap();

        assert_eq!(obj.as_stream().unwrap().raw_data(), b"abcdefghij");
    }

}
