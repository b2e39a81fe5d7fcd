//! Reconstructing the cross reference table: classical sections, xref
//! streams, hybrid files and the incremental-update chain.

use crate::error::{Error, Result};
use crate::filter;
use crate::object::{keys, Dict, Object, ObjectId, Stream};
use crate::parse::{
    parse_dict, parse_indirect_header, parse_indirect_object, parse_object, ParseOptions,
};
use crate::reader::Reader;
use log::warn;
use rustc_hash::FxHashMap;

/// The window scanned for the header and the `startxref` pointer.
const SCAN_WINDOW: usize = 1024;

/// How a numbered object can be located.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Entry {
    /// An object stored at a byte offset of the input.
    InUse {
        /// The byte offset of the `num gen obj` header.
        offset: usize,
        /// The generation number recorded for the slot.
        gen: u16,
    },
    /// An object packed into an object stream. The generation number is
    /// implicitly 0.
    InStream {
        /// The object number of the host stream.
        host: u32,
        /// The index within the host stream.
        index: u32,
    },
    /// A free slot of the free list.
    Free {
        /// The number of the next free object.
        next: u32,
        /// The generation to use if the slot is reused.
        gen: u16,
    },
}

/// The reconstructed cross reference table plus the resolved trailer.
#[derive(Debug, Clone, Default)]
pub struct XRefTable {
    entries: FxHashMap<u32, Entry>,
    /// The trailer dictionary, merged over the incremental-update chain.
    pub trailer: Dict,
    repaired: bool,
}

impl XRefTable {
    /// Look up the entry for an object number.
    pub fn get(&self, num: u32) -> Option<&Entry> {
        self.entries.get(&num)
    }

    /// Look up an entry by full identifier; a generation mismatch reads as
    /// an undefined object.
    pub fn entry_for(&self, id: ObjectId) -> Option<&Entry> {
        let entry = self.entries.get(&id.num)?;

        let matches = match entry {
            Entry::InUse { gen, .. } => *gen == id.gen,
            Entry::InStream { .. } => id.gen == 0,
            Entry::Free { .. } => false,
        };

        matches.then_some(entry)
    }

    /// The number of known slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no slot is known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if the table was rebuilt by the fallback scan.
    pub fn repaired(&self) -> bool {
        self.repaired
    }

    /// The identifiers of all in-use (located) objects.
    pub fn in_use_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self
            .entries
            .iter()
            .filter_map(|(num, entry)| match entry {
                Entry::InUse { gen, .. } => Some(ObjectId::new(*num, *gen)),
                Entry::InStream { .. } => Some(ObjectId::new(*num, 0)),
                Entry::Free { .. } => None,
            })
            .collect();

        ids.sort();
        ids
    }

    /// `/Size` semantics: one past the largest known object number.
    pub fn size(&self) -> u64 {
        self.entries.keys().max().map(|n| *n as u64 + 1).unwrap_or(1)
    }

    fn insert_if_absent(&mut self, num: u32, entry: Entry) {
        self.entries.entry(num).or_insert(entry);
    }

    pub(crate) fn insert(&mut self, num: u32, entry: Entry) {
        self.entries.insert(num, entry);
    }

    /// Merge a trailer dict from an older section: only missing keys fill in.
    fn merge_trailer(&mut self, dict: &Dict) {
        for (key, value) in dict.iter() {
            if !self.trailer.contains_key(key.as_bytes()) {
                self.trailer.insert(key.clone(), value.clone());
            }
        }
    }
}

pub(crate) struct ReadOptions {
    pub relaxed: bool,
    pub reader15: bool,
}

/// Locate `%PDF-M.m` within the first part of the file.
pub(crate) fn header_version(data: &[u8]) -> Option<(u8, u8)> {
    let window = &data[..data.len().min(SCAN_WINDOW)];
    let pos = window.windows(5).position(|w| w == b"%PDF-")?;

    let mut r = Reader::new_at(data, pos + 5);
    let major = r.read_uint::<u8>()?;
    r.forward_tag(b".")?;
    let minor = r.read_uint::<u8>()?;

    Some((major, minor))
}

/// Locate the `startxref` pointer within the final bytes of the file.
pub(crate) fn find_startxref(data: &[u8]) -> Option<usize> {
    let r = Reader::new(data);
    let pos = r.find_last(b"startxref", SCAN_WINDOW + b"startxref".len())?;

    let mut r = Reader::new_at(data, pos + b"startxref".len());
    r.skip_white_spaces_and_comments();

    r.read_uint::<usize>()
}

/// Reconstruct the xref table of the file.
///
/// In relaxed mode any failure of the chain walk falls back to scanning the
/// whole file for `num gen obj` markers.
pub(crate) fn read_xref(data: &[u8], opts: &ReadOptions) -> Result<XRefTable> {
    match read_xref_chain(data, opts) {
        Ok(table) => Ok(table),
        Err(err) if opts.relaxed => {
            warn!("xref table is unusable ({err}), rebuilding by scanning");

            rebuild_xref(data, opts)
        }
        Err(err) => Err(err),
    }
}

fn read_xref_chain(data: &[u8], opts: &ReadOptions) -> Result<XRefTable> {
    let start = find_startxref(data)
        .ok_or_else(|| Error::XRef("startxref pointer not found".into()))?;

    let mut table = XRefTable::default();
    let mut visited = vec![];
    // Sections queued newest first; an earlier section always shadows the
    // entries of a later-queued one.
    let mut queue = vec![start];

    while let Some(offset) = queue.pop() {
        if visited.contains(&offset) {
            return Err(Error::XRef(format!("cycle in /Prev chain at {offset}")));
        }
        visited.push(offset);

        if offset >= data.len() {
            return Err(Error::XRef(format!("xref offset {offset} is out of bounds")));
        }

        let mut r = Reader::new_at(data, offset);
        r.skip_white_spaces_and_comments();

        let (trailer, prev, xref_stm) = if r.peek_tag(b"xref").is_some() {
            read_classical_section(&mut r, &mut table)?
        } else {
            if !opts.reader15 {
                return Err(Error::Unsupported(
                    "cross reference streams require Reader15".into(),
                ));
            }

            let trailer = read_stream_section(data, &mut r, &mut table, opts)?;
            let prev = trailer.get_int(keys::PREV);
            (trailer, prev, None)
        };

        table.merge_trailer(&trailer);

        // In hybrid files the entries of the /XRefStm take priority over
        // /Prev, so it is queued later (and popped earlier).
        if let Some(prev) = prev {
            queue.insert(0, usize::try_from(prev).map_err(bad_offset)?);
        }

        if opts.reader15 {
            if let Some(stm) = xref_stm {
                queue.push(usize::try_from(stm).map_err(bad_offset)?);
            }
        }
    }

    if table.trailer.get(keys::ROOT).is_none() {
        return Err(Error::XRef("trailer has no /Root entry".into()));
    }

    if table.trailer.get_int(keys::SIZE).is_none() {
        if opts.relaxed {
            warn!("trailer has no /Size entry, using the reconstructed count");
            table
                .trailer
                .set(keys::SIZE, Object::Integer(table.size() as i64));
        } else {
            return Err(Error::XRef("trailer has no /Size entry".into()));
        }
    }

    Ok(table)
}

fn bad_offset<E>(_: E) -> Error {
    Error::XRef("negative section offset".into())
}

type SectionInfo = (Dict, Option<i64>, Option<i64>);

/// Parse a classical `xref` section and its trailer.
fn read_classical_section(r: &mut Reader<'_>, table: &mut XRefTable) -> Result<SectionInfo> {
    r.forward_tag(b"xref")
        .ok_or_else(|| Error::XRef("expected the xref keyword".into()))?;

    loop {
        r.skip_white_spaces_and_comments();

        if r.peek_tag(b"trailer").is_some() {
            break;
        }

        // A subsection header: `first count`.
        let Some(first) = r.read_uint::<u32>() else {
            return Err(Error::syntax(r.offset(), "malformed xref subsection header"));
        };
        r.skip_white_spaces();
        let count = r
            .read_uint::<u32>()
            .ok_or_else(|| Error::syntax(r.offset(), "malformed xref subsection header"))?;

        for num in first..first.saturating_add(count) {
            r.skip_white_spaces();

            // Nominally exactly 20 bytes, but whitespace-tolerant parsing
            // also accepts the 19-byte variants seen in the wild.
            let offset = r
                .read_uint::<u64>()
                .ok_or_else(|| Error::syntax(r.offset(), "malformed xref entry"))?;
            r.skip_white_spaces();
            let gen = r
                .read_uint::<u32>()
                .ok_or_else(|| Error::syntax(r.offset(), "malformed xref entry"))?;
            r.skip_white_spaces();

            let entry = match r.read_byte() {
                Some(b'n') => Entry::InUse {
                    offset: offset as usize,
                    gen: gen.min(u16::MAX as u32) as u16,
                },
                Some(b'f') => Entry::Free {
                    next: offset as u32,
                    gen: gen.min(u16::MAX as u32) as u16,
                },
                _ => {
                    return Err(Error::syntax(r.offset(), "xref entry is neither n nor f"));
                }
            };

            table.insert_if_absent(num, entry);
        }
    }

    r.forward_tag(b"trailer")
        .ok_or_else(|| Error::XRef("expected the trailer keyword".into()))?;
    r.skip_white_spaces_and_comments();

    let trailer =
        parse_dict(r).ok_or_else(|| Error::syntax(r.offset(), "malformed trailer dictionary"))?;

    let prev = trailer.get_int(keys::PREV);
    let xref_stm = trailer.get_int(keys::XREF_STM);

    Ok((trailer, prev, xref_stm))
}

/// Parse an xref stream section. Returns its dictionary, which doubles as the
/// trailer.
fn read_stream_section(
    data: &[u8],
    r: &mut Reader<'_>,
    table: &mut XRefTable,
    opts: &ReadOptions,
) -> Result<Dict> {
    // The stream's own /Length may be indirect; resolve it against entries
    // already known from newer sections.
    let entries = table.entries.clone();
    let mut resolve = |id: ObjectId| -> Option<i64> {
        let Entry::InUse { offset, .. } = entries.get(&id.num)? else {
            return None;
        };

        let mut r = Reader::new_at(data, *offset);
        let (_, obj) = parse_indirect_object(&mut r, ParseOptions { relaxed: false }, &mut |_| {
            None
        })?;

        obj.as_int()
    };

    let parse_opts = ParseOptions {
        relaxed: opts.relaxed,
    };

    let offset = r.offset();
    let (_, object) = parse_indirect_object(r, parse_opts, &mut resolve)
        .ok_or_else(|| Error::syntax(offset, "expected an xref stream object"))?;

    let stream = object
        .as_stream()
        .ok_or_else(|| Error::XRef("object at the xref offset is not a stream".into()))?;

    if !stream.dict.is_type(keys::XREF) {
        return Err(Error::XRef("xref stream is not of /Type /XRef".into()));
    }

    read_xref_stream_entries(stream, table, opts)?;

    Ok(stream.dict.clone())
}

/// Decode an xref stream's payload and insert its records.
pub(crate) fn read_xref_stream_entries(
    stream: &Stream,
    table: &mut XRefTable,
    opts: &ReadOptions,
) -> Result<()> {
    let dict = &stream.dict;

    let size = dict
        .get_uint(keys::SIZE)
        .ok_or_else(|| Error::XRef("xref stream has no /Size".into()))?;

    let widths = dict
        .get_array(keys::W)
        .ok_or_else(|| Error::XRef("xref stream has no /W".into()))?;

    let [w1, w2, w3] = match widths {
        [a, b, c] => [
            field_width(a)?,
            field_width(b)?,
            field_width(c)?,
        ],
        _ => return Err(Error::XRef("/W does not hold three widths".into())),
    };

    let subsections: Vec<(u64, u64)> = match dict.get_array(keys::INDEX) {
        Some(items) => {
            if items.len() % 2 != 0 {
                return Err(Error::XRef("/Index holds an odd number of values".into()));
            }

            items
                .chunks_exact(2)
                .map(|pair| {
                    let first = pair[0].as_int().unwrap_or(0).max(0) as u64;
                    let count = pair[1].as_int().unwrap_or(0).max(0) as u64;
                    (first, count)
                })
                .collect()
        }
        None => vec![(0, size)],
    };

    let payload = filter::decode_stream(stream, opts.relaxed)?;
    let mut r = Reader::new(&payload);

    for (first, count) in subsections {
        for num in first..first.saturating_add(count) {
            // A missing type field defaults to 1.
            let f1 = if w1 == 0 { 1 } else { read_field(&mut r, w1)? };
            let f2 = read_field(&mut r, w2)?;
            let f3 = read_field(&mut r, w3)?;

            let entry = match f1 {
                0 => Entry::Free {
                    next: f2 as u32,
                    gen: f3.min(u16::MAX as u64) as u16,
                },
                1 => Entry::InUse {
                    offset: f2 as usize,
                    gen: f3.min(u16::MAX as u64) as u16,
                },
                2 => Entry::InStream {
                    host: f2 as u32,
                    index: f3 as u32,
                },
                other => {
                    // Treated as a reference to the null object.
                    warn!("xref stream record has unknown type {other}");

                    continue;
                }
            };

            table.insert_if_absent(num as u32, entry);
        }
    }

    Ok(())
}

fn field_width(obj: &Object) -> Result<usize> {
    let width = obj
        .as_int()
        .and_then(|w| usize::try_from(w).ok())
        .ok_or_else(|| Error::XRef("invalid /W width".into()))?;

    if width > 8 {
        return Err(Error::XRef(format!("/W width {width} exceeds 8 bytes")));
    }

    Ok(width)
}

fn read_field(r: &mut Reader<'_>, width: usize) -> Result<u64> {
    if width == 0 {
        return Ok(0);
    }

    let bytes = r
        .read_bytes(width)
        .ok_or_else(|| Error::XRef("xref stream payload is truncated".into()))?;

    Ok(bytes.iter().fold(0u64, |acc, b| acc << 8 | *b as u64))
}

/// Rebuild the table by scanning the whole file for `num gen obj` markers.
///
/// Later definitions shadow earlier ones, mirroring the incremental-update
/// rule. Object streams encountered during the scan contribute their packed
/// objects as well.
pub(crate) fn rebuild_xref(data: &[u8], opts: &ReadOptions) -> Result<XRefTable> {
    let mut table = XRefTable::default();
    table.repaired = true;

    let mut r = Reader::new(data);
    let mut trailers: Vec<Dict> = vec![];
    let parse_opts = ParseOptions { relaxed: true };

    while !r.at_end() {
        let offset = r.offset();

        if let Some(id) = parse_indirect_header(&mut r.clone()) {
            let mut obj_reader = Reader::new_at(data, offset);

            if let Some((_, object)) =
                parse_indirect_object(&mut obj_reader, parse_opts, &mut |_| None)
            {
                table.insert(
                    id.num,
                    Entry::InUse {
                        offset,
                        gen: id.gen,
                    },
                );

                if opts.reader15 {
                    if let Some(stream) = object.as_stream() {
                        if stream.dict.is_type(keys::OBJ_STM) {
                            scan_object_stream(stream, id.num, &mut table);
                        }
                    }
                }

                r.jump(obj_reader.offset());
                continue;
            }
        }

        if r.peek_tag(b"trailer").is_some() {
            r.forward_tag(b"trailer");
            r.skip_white_spaces_and_comments();

            if let Some(dict) = parse_dict(&mut r) {
                trailers.push(dict);
                continue;
            }
        }

        r.forward();
    }

    // The youngest trailer carrying /Root wins; older ones fill gaps.
    for dict in trailers.iter().rev() {
        table.merge_trailer(dict);
    }

    if table.trailer.get(keys::ROOT).is_none() {
        // No usable trailer: find a catalog among the scanned objects.
        let catalog = table.entries.iter().find_map(|(num, entry)| {
            let Entry::InUse { offset, gen } = entry else {
                return None;
            };

            let mut r = Reader::new_at(data, *offset);
            let (_, obj) = parse_indirect_object(&mut r, parse_opts, &mut |_| None)?;

            obj.as_dict()
                .filter(|d| d.is_type(keys::CATALOG))
                .map(|_| ObjectId::new(*num, *gen))
        });

        match catalog {
            Some(id) => {
                warn!("no trailer found, using object {id} as the catalog");
                table.trailer.set(keys::ROOT, Object::Reference(id));
            }
            None => {
                return Err(Error::XRef(
                    "scan found neither a trailer nor a catalog".into(),
                ));
            }
        }
    }

    table
        .trailer
        .set(keys::SIZE, Object::Integer(table.size() as i64));

    warn!("rebuilt xref table with {} entries", table.len());

    Ok(table)
}

/// Record the members of an object stream found during a rebuild scan.
fn scan_object_stream(stream: &Stream, host: u32, table: &mut XRefTable) {
    let Ok(payload) = filter::decode_stream(stream, true) else {
        warn!("object stream {host} failed to decode during scan");

        return;
    };

    let Some(count) = stream.dict.get_uint(keys::N) else {
        return;
    };

    let mut r = Reader::new(&payload);

    for index in 0..count {
        r.skip_white_spaces_and_comments();
        let Some(num) = r.read_uint::<u32>() else { break };
        r.skip_white_spaces_and_comments();
        if r.read_uint::<u64>().is_none() {
            break;
        }

        table.insert(
            num,
            Entry::InStream {
                host,
                index: index as u32,
            },
        );
    }
}

/// The parsed header of an object stream: (object number, absolute offset)
/// pairs.
pub(crate) fn object_stream_offsets(stream: &Stream, payload: &[u8]) -> Result<Vec<(u32, usize)>> {
    let count = stream
        .dict
        .get_uint(keys::N)
        .ok_or_else(|| Error::XRef("object stream has no /N".into()))?;
    let first = stream
        .dict
        .get_uint(keys::FIRST)
        .ok_or_else(|| Error::XRef("object stream has no /First".into()))?;

    let mut r = Reader::new(payload);
    let mut offsets = Vec::with_capacity(count as usize);

    for _ in 0..count {
        r.skip_white_spaces_and_comments();
        let num = r
            .read_uint::<u32>()
            .ok_or_else(|| Error::XRef("malformed object stream header".into()))?;
        r.skip_white_spaces_and_comments();
        let relative = r
            .read_uint::<u64>()
            .ok_or_else(|| Error::XRef("malformed object stream header".into()))?;

        offsets.push((num, (first + relative) as usize));
    }

    Ok(offsets)
}

/// Parse one member of an object stream.
pub(crate) fn object_stream_member(payload: &[u8], offset: usize) -> Result<Object> {
    let mut r = Reader::new_at(payload, offset.min(payload.len()));
    r.skip_white_spaces_and_comments();

    parse_object(&mut r)
        .ok_or_else(|| Error::syntax(offset, "malformed object inside object stream"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTS: ReadOptions = ReadOptions {
        relaxed: false,
        reader15: true,
    };

    const RELAXED: ReadOptions = ReadOptions {
        relaxed: true,
        reader15: true,
    };

    fn classical_pdf() -> Vec<u8> {
        let mut out: Vec<u8> = b"%PDF-1.4\n".to_vec();

        let obj1 = out.len();
        out.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let obj2 = out.len();
        out.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");

        let xref = out.len();
        out.extend_from_slice(b"xref\n0 3\n");
        out.extend_from_slice(b"0000000000 65535 f \n");
        out.extend_from_slice(format!("{obj1:010} 00000 n \n").as_bytes());
        out.extend_from_slice(format!("{obj2:010} 00000 n \n").as_bytes());
        out.extend_from_slice(b"trailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n");
        out.extend_from_slice(format!("{xref}\n").as_bytes());
        out.extend_from_slice(b"%%EOF\n");

        out
    }

    #[test]
    fn header() {
        assert_eq!(header_version(b"%PDF-1.7\n..."), Some((1, 7)));
        assert_eq!(header_version(b"junk\n%PDF-2.0\n"), Some((2, 0)));
        assert_eq!(header_version(b"no header here"), None);
    }

    #[test]
    fn classical_table() {
        let data = classical_pdf();
        let table = read_xref(&data, &OPTS).unwrap();

        assert_eq!(table.len(), 3);
        assert!(matches!(table.get(0), Some(Entry::Free { .. })));
        assert!(matches!(table.get(1), Some(Entry::InUse { .. })));
        assert_eq!(
            table.trailer.get_ref(keys::ROOT),
            Some(ObjectId::new(1, 0))
        );
        assert!(!table.repaired());
    }

    #[test]
    fn generation_mismatch_is_undefined() {
        let data = classical_pdf();
        let table = read_xref(&data, &OPTS).unwrap();

        assert!(table.entry_for(ObjectId::new(1, 0)).is_some());
        assert!(table.entry_for(ObjectId::new(1, 3)).is_none());
    }

    #[test]
    fn incremental_update_shadows() {
        // An update appends a replacement for object 2 and a new xref
        // section pointing back via /Prev.
        let mut data = classical_pdf();
        let first_xref = find_startxref(&data).unwrap();

        let obj2 = data.len();
        data.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 1 >>\nendobj\n");

        let xref = data.len();
        data.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n2 1\n");
        data.extend_from_slice(format!("{obj2:010} 00000 n \n").as_bytes());
        data.extend_from_slice(
            format!("trailer\n<< /Size 3 /Root 1 0 R /Prev {first_xref} >>\nstartxref\n{xref}\n%%EOF\n")
                .as_bytes(),
        );

        let table = read_xref(&data, &OPTS).unwrap();

        // The newest layer wins for object 2; object 1 still resolves from
        // the base layer.
        assert_eq!(
            table.get(2),
            Some(&Entry::InUse {
                offset: obj2,
                gen: 0
            })
        );
        assert!(matches!(table.get(1), Some(Entry::InUse { .. })));
    }

    #[test]
    fn prev_cycle_is_detected() {
        let mut data: Vec<u8> = b"%PDF-1.4\n".to_vec();
        let xref = data.len();
        data.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n");
        data.extend_from_slice(
            format!("trailer\n<< /Size 1 /Root 1 0 R /Prev {xref} >>\nstartxref\n{xref}\n%%EOF\n")
                .as_bytes(),
        );

        assert!(matches!(read_xref(&data, &OPTS), Err(Error::XRef(_))));
    }

    fn xref_stream_pdf() -> (Vec<u8>, usize) {
        let mut out: Vec<u8> = b"%PDF-1.5\n".to_vec();

        let obj1 = out.len();
        out.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let obj2 = out.len();
        out.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");

        // Records of [1 2 1] fields, no compression.
        let xref = out.len();
        let mut records: Vec<u8> = vec![];
        for (kind, mid, gen) in [
            (0u8, 0u16, 0xFFu8),
            (1, obj1 as u16, 0),
            (1, obj2 as u16, 0),
            (1, xref as u16, 0),
        ] {
            records.push(kind);
            records.extend_from_slice(&mid.to_be_bytes());
            records.push(gen);
        }

        out.extend_from_slice(
            format!(
                "3 0 obj\n<< /Type /XRef /Size 4 /W [1 2 1] /Root 1 0 R /Length {} >>\nstream\n",
                records.len()
            )
            .as_bytes(),
        );
        out.extend_from_slice(&records);
        out.extend_from_slice(b"\nendstream\nendobj\n");
        out.extend_from_slice(format!("startxref\n{xref}\n%%EOF\n").as_bytes());

        (out, obj1)
    }

    #[test]
    fn xref_stream_table() {
        let (data, obj1) = xref_stream_pdf();
        let table = read_xref(&data, &OPTS).unwrap();

        assert_eq!(
            table.get(1),
            Some(&Entry::InUse {
                offset: obj1,
                gen: 0
            })
        );
        assert_eq!(table.trailer.get_ref(keys::ROOT), Some(ObjectId::new(1, 0)));
    }

    #[test]
    fn xref_stream_needs_reader15() {
        let (data, _) = xref_stream_pdf();
        let opts = ReadOptions {
            relaxed: false,
            reader15: false,
        };

        assert!(matches!(
            read_xref(&data, &opts),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn broken_offset_rebuilds_in_relaxed_mode() {
        let mut data = classical_pdf();

        // Corrupt the startxref pointer.
        let pos = data
            .windows(9)
            .rposition(|w| w == b"startxref")
            .unwrap();
        data[pos + 10] = b'9';
        data[pos + 11] = b'9';

        assert!(read_xref(&data, &OPTS).is_err());

        let table = read_xref(&data, &RELAXED).unwrap();
        assert!(table.repaired());
        assert!(matches!(table.get(1), Some(Entry::InUse { .. })));
        assert_eq!(table.trailer.get_ref(keys::ROOT), Some(ObjectId::new(1, 0)));
    }

    #[test]
    fn rebuild_without_trailer_finds_catalog() {
        let data: &[u8] =
            b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n2 0 obj\n<< /Type /Pages >>\nendobj\n";

        let table = rebuild_xref(data, &RELAXED).unwrap();
        assert_eq!(table.trailer.get_ref(keys::ROOT), Some(ObjectId::new(1, 0)));
    }
}
