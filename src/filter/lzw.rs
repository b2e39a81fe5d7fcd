//! The LZWDecode filter.

use crate::error::{Error, Result};
use bitreader::BitReader;
use rustc_hash::FxHashMap;

const NAME: &str = "LZWDecode";

const CLEAR_TABLE: usize = 256;
const EOD: usize = 257;
const MAX_ENTRIES: usize = 4096;
const INITIAL_SIZE: usize = 258;

pub(crate) fn decode(data: &[u8], early_change: bool) -> Result<Vec<u8>> {
    let mut table = Table::new(early_change);

    let mut reader = BitReader::new(data);
    let mut decoded = vec![];
    let mut prev: Option<usize> = None;

    loop {
        let next = match reader.read_u16(table.code_length()) {
            Ok(code) => code as usize,
            // Some encoders drop the final EOD marker.
            Err(_) => return Ok(decoded),
        };

        match next {
            CLEAR_TABLE => {
                table.clear();
                prev = None;
            }
            EOD => return Ok(decoded),
            new => {
                if let Some(entry) = table.get(new) {
                    let entry = entry.to_vec();
                    decoded.extend_from_slice(&entry);

                    if let Some(prev) = prev {
                        table
                            .register(prev, entry[0])
                            .ok_or_else(|| Error::decode(NAME, "code table overflow"))?;
                    }
                } else {
                    let prev =
                        prev.ok_or_else(|| Error::decode(NAME, "code without predecessor"))?;
                    let new_byte = table
                        .get(prev)
                        .ok_or_else(|| Error::decode(NAME, "invalid code"))?[0];

                    let entry = table
                        .register(prev, new_byte)
                        .ok_or_else(|| Error::decode(NAME, "code table overflow"))?
                        .to_vec();
                    decoded.extend_from_slice(&entry);
                }

                prev = Some(new);
            }
        }
    }
}

struct Table {
    early_change: bool,
    entries: Vec<Vec<u8>>,
}

impl Table {
    fn new(early_change: bool) -> Self {
        let mut entries: Vec<_> = (0..=255u8).map(|b| vec![b]).collect();

        // Clear table and EOD don't carry any data.
        entries.push(vec![0]);
        entries.push(vec![0]);

        Self {
            early_change,
            entries,
        }
    }

    fn register(&mut self, prev: usize, new_byte: u8) -> Option<&[u8]> {
        if self.entries.len() >= MAX_ENTRIES {
            return None;
        }

        let prev_entry = self.entries.get(prev)?;

        let mut new_entry = Vec::with_capacity(prev_entry.len() + 1);
        new_entry.extend_from_slice(prev_entry);
        new_entry.push(new_byte);
        self.entries.push(new_entry);

        self.entries.last().map(|v| &**v)
    }

    fn get(&self, index: usize) -> Option<&[u8]> {
        self.entries.get(index).map(|v| &**v)
    }

    fn clear(&mut self) {
        self.entries.truncate(INITIAL_SIZE);
    }

    fn code_length(&self) -> u8 {
        code_width(self.entries.len() + usize::from(self.early_change))
    }
}

fn code_width(adjusted: usize) -> u8 {
    if adjusted >= 2048 {
        12
    } else if adjusted >= 1024 {
        11
    } else if adjusted >= 512 {
        10
    } else {
        9
    }
}

struct BitWriter {
    out: Vec<u8>,
    accum: u32,
    bits: u8,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            out: vec![],
            accum: 0,
            bits: 0,
        }
    }

    fn push(&mut self, code: u16, width: u8) {
        self.accum = self.accum << width | code as u32;
        self.bits += width;

        while self.bits >= 8 {
            self.bits -= 8;
            self.out.push((self.accum >> self.bits) as u8);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.bits > 0 {
            self.out.push((self.accum << (8 - self.bits)) as u8);
        }

        self.out
    }
}

pub(crate) fn encode(data: &[u8], early_change: bool) -> Vec<u8> {
    let mut writer = BitWriter::new();

    // `table_len` mirrors the decoder's table size at the moment it reads
    // the next code, which is what determines the code width.
    let mut table_len = INITIAL_SIZE;
    let mut codes_since_clear = 0usize;
    let mut dict: FxHashMap<Vec<u8>, u16> = FxHashMap::default();
    let mut next_code: u16 = INITIAL_SIZE as u16;

    let width = |len: usize| code_width(len + usize::from(early_change));

    writer.push(CLEAR_TABLE as u16, width(table_len));

    let mut seq: Vec<u8> = vec![];

    let emit = |writer: &mut BitWriter,
                    code: u16,
                    table_len: &mut usize,
                    codes_since_clear: &mut usize| {
        writer.push(code, width(*table_len));
        *codes_since_clear += 1;
        if *codes_since_clear >= 2 {
            *table_len += 1;
        }
    };

    for b in data.iter().copied() {
        let mut candidate = seq.clone();
        candidate.push(b);

        if candidate.len() == 1 || dict.contains_key(&candidate) {
            seq = candidate;
            continue;
        }

        let code = if seq.len() == 1 {
            seq[0] as u16
        } else {
            dict[&seq]
        };
        emit(&mut writer, code, &mut table_len, &mut codes_since_clear);

        dict.insert(candidate, next_code);
        next_code += 1;

        // Reset well before the decoder's table can fill up.
        if next_code as usize >= MAX_ENTRIES - 3 {
            writer.push(CLEAR_TABLE as u16, width(table_len));
            dict.clear();
            next_code = INITIAL_SIZE as u16;
            table_len = INITIAL_SIZE;
            codes_since_clear = 0;
        }

        seq = vec![b];
    }

    if !seq.is_empty() {
        let code = if seq.len() == 1 {
            seq[0] as u16
        } else {
            dict[&seq]
        };
        emit(&mut writer, code, &mut table_len, &mut codes_since_clear);
    }

    writer.push(EOD as u16, width(table_len));

    writer.finish()
}
