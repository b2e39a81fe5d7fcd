//! The RunLengthDecode filter.

use crate::error::{Error, Result};

const NAME: &str = "RunLengthDecode";
const EOD: u8 = 128;

pub(crate) fn decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = vec![];
    let mut i = 0usize;

    while i < data.len() {
        let control = data[i];
        i += 1;

        if control == EOD {
            return Ok(out);
        }

        if control < EOD {
            let len = control as usize + 1;
            let literal = data
                .get(i..i + len)
                .ok_or_else(|| Error::decode(NAME, "truncated literal run"))?;
            out.extend_from_slice(literal);
            i += len;
        } else {
            let byte = *data
                .get(i)
                .ok_or_else(|| Error::decode(NAME, "truncated replicated run"))?;
            out.extend(std::iter::repeat(byte).take(257 - control as usize));
            i += 1;
        }
    }

    Err(Error::decode(NAME, "missing end-of-data marker"))
}

pub(crate) fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = vec![];
    let mut i = 0usize;

    while i < data.len() {
        let byte = data[i];
        let mut run = 1usize;

        while run < 128 && data.get(i + run) == Some(&byte) {
            run += 1;
        }

        if run >= 2 {
            out.push((257 - run) as u8);
            out.push(byte);
            i += run;
        } else {
            // Collect a literal run up to the next replicable pair.
            let start = i;
            let mut len = 0usize;

            while len < 128 && i < data.len() {
                if i + 2 < data.len() && data[i + 1] == data[i] && data[i + 2] == data[i] {
                    break;
                }
                i += 1;
                len += 1;
            }

            out.push((len - 1) as u8);
            out.extend_from_slice(&data[start..i]);
        }
    }

    out.push(EOD);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_runs() {
        // Two literal bytes, then five copies of 0x41.
        assert_eq!(decode(&[1, b'x', b'y', 252, b'A', EOD]).unwrap(), b"xyAAAAA");
    }

    #[test]
    fn decode_requires_eod() {
        assert!(decode(&[0, b'x']).is_err());
    }

    #[test]
    fn decode_truncation() {
        assert!(decode(&[5, b'x']).is_err());
    }

    #[test]
    fn round_trip() {
        for data in [
            &b""[..],
            &b"a"[..],
            &b"aaaaaaaaaa"[..],
            &b"abcabcabc"[..],
            &[0u8; 300][..],
            &b"mixed aaaa bbbb cc d"[..],
        ] {
            assert_eq!(decode(&encode(data)).unwrap(), data);
        }
    }
}
