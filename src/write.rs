//! Serializing the object graph back to a byte-exact, cross referenced PDF.
//!
//! Objects are renumbered contiguously in traversal order of the catalog,
//! which drops anything unreachable. Depending on the configuration the file
//! is terminated by a classical xref section or an xref stream, optionally
//! with non-stream objects packed into object streams.

use crate::config::CommandMode;
use crate::context::{encrypt_object, Context};
use crate::crypt::SecurityHandler;
use crate::error::Result;
use crate::filter::FilterChain;
use crate::object::{keys, Dict, Name, Object, ObjectId, PdfString, Stream, StringKind};
use crate::stats::{self, WriteStats};
use crate::trivia::is_regular_character;
use rand::RngCore;
use rustc_hash::FxHashMap;
use std::io::Write;
use std::path::Path;

/// The binary comment line marking the file as non-text.
const BINARY_MARKER: &[u8] = b"%\xE2\xE3\xCF\xD3";

/// How many objects an object stream accommodates.
const OBJECTS_PER_STREAM: usize = 200;

/// Catalog entries dropped under the reduced feature set.
const REDUCED_CATALOG_ENTRIES: &[&[u8]] =
    &[b"AcroForm", b"Outlines", b"Names", b"OpenAction", b"AA"];

/// Page entries dropped under the reduced feature set.
const REDUCED_PAGE_ENTRIES: &[&[u8]] = &[b"Annots", b"Thumb", b"AA"];

/// Serialize the context's object graph to a complete PDF byte stream.
pub fn write_document(ctx: &mut Context) -> Result<Vec<u8>> {
    ctx.materialize_all()?;

    let root = ctx.root_id()?;
    let info = ctx.xref.trailer.get_ref(keys::INFO);

    let (order, map) = renumber(ctx, root, info)?;

    if !map.contains_key(&root.num) {
        return Err(crate::error::Error::Validation(
            "the catalog could not be read, nothing to write".into(),
        ));
    }

    let file_id = build_file_id(ctx);
    let crypt = decide_crypt(ctx, &file_id.0)?;

    let eol = ctx.config().eol.as_bytes();
    let optimize = ctx.config().cmd == CommandMode::Optimize;

    // The graph is owned from here on; prepare every object for output.
    let mut objects = Vec::with_capacity(order.len());
    for old_id in &order {
        let mut object = ctx.dereference(*old_id)?.clone();
        prepare_object(ctx, *old_id == root, &mut object, optimize)?;
        objects.push(object);
    }

    let version = output_version(ctx, crypt.as_ref());

    let use_object_streams = ctx.config().write_object_stream;
    let use_xref_stream = use_object_streams || ctx.config().write_xref_stream;

    let ser = Serializer { map: &map, eol };

    let out = if use_xref_stream {
        emit_with_xref_stream(
            &objects,
            ser,
            version,
            crypt,
            &file_id,
            info.and_then(|i| map.get(&i.num).copied()),
            map.get(&root.num).copied().unwrap_or(1),
            use_object_streams,
        )?
    } else {
        emit_classical(
            &objects,
            ser,
            version,
            crypt,
            &file_id,
            info.and_then(|i| map.get(&i.num).copied()),
            map.get(&root.num).copied().unwrap_or(1),
        )?
    };

    Ok(out)
}

/// Write the assembled byte stream to a sink in one piece, so a failing sink
/// never observes a half-written document, and record statistics when asked
/// to.
pub fn write_to(ctx: &mut Context, sink: &mut dyn Write) -> Result<()> {
    let bytes = write_document(ctx)?;
    sink.write_all(&bytes)?;

    if ctx.config().collect_stats && !ctx.config().stats_file_name.is_empty() {
        let stats = WriteStats {
            objects: ctx.xref.len(),
            bytes: bytes.len(),
            version: ctx.version(),
            encrypted: ctx.security_handler().is_some(),
        };

        let path = ctx.config().stats_file_name.clone();
        stats::append(Path::new(&path), &stats)?;
    }

    Ok(())
}

/// Assign contiguous new numbers in traversal order of the catalog,
/// dropping unreferenced and null objects.
fn renumber(
    ctx: &mut Context,
    root: ObjectId,
    info: Option<ObjectId>,
) -> Result<(Vec<ObjectId>, FxHashMap<u32, u32>)> {
    let mut order = vec![];
    let mut map = FxHashMap::default();

    let mut stack = vec![];
    if let Some(info) = info {
        stack.push(info);
    }
    stack.push(root);

    while let Some(id) = stack.pop() {
        if map.contains_key(&id.num) {
            continue;
        }

        let object = ctx.dereference(id)?.clone();
        if object.is_null() {
            continue;
        }

        map.insert(id.num, order.len() as u32 + 1);
        order.push(id);

        // Children in reverse so the first reference resolves first.
        let mut refs = vec![];
        collect_refs(&object, &mut refs);
        for r in refs.into_iter().rev() {
            stack.push(r);
        }
    }

    Ok((order, map))
}

fn collect_refs(object: &Object, out: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        Object::Dict(dict) => {
            for (_, value) in dict.iter() {
                collect_refs(value, out);
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter() {
                collect_refs(value, out);
            }
        }
        _ => {}
    }
}

/// Per-object rewrite before serialization: reduced feature set stripping,
/// stream re-encoding and `/Length` recomputation.
fn prepare_object(
    ctx: &Context,
    is_catalog: bool,
    object: &mut Object,
    optimize: bool,
) -> Result<()> {
    if ctx.config().apply_reduced_feature_set() {
        if let Some(dict) = object.as_dict_mut() {
            let dropped: &[&[u8]] = if is_catalog {
                REDUCED_CATALOG_ENTRIES
            } else if dict.is_type(keys::PAGE) {
                REDUCED_PAGE_ENTRIES
            } else {
                &[]
            };

            for key in dropped {
                dict.remove(key);
            }
        }
    }

    if let Some(stream) = object.as_stream_mut() {
        // Optimization compresses streams that were stored uncompressed;
        // filtered payloads (image codecs included) are carried as they are.
        if optimize && !stream.dict.contains_key(keys::FILTER) {
            let chain = FilterChain::flate();
            let encoded = chain.encode(stream.raw_data())?;

            stream.set_raw(encoded);
            if let Some(filter) = chain.filter_object() {
                stream.dict.set(keys::FILTER, filter);
            }
        }

        stream
            .dict
            .set(keys::LENGTH, Object::Integer(stream.raw_data().len() as i64));
    }

    Ok(())
}

/// The document ID pair for the output: the first element is carried over
/// when present, the second is always fresh.
fn build_file_id(ctx: &Context) -> (Vec<u8>, Vec<u8>) {
    let mut rng = rand::thread_rng();

    let first = {
        let existing = ctx.first_file_id();
        if existing.is_empty() {
            let mut fresh = vec![0u8; 16];
            rng.fill_bytes(&mut fresh);
            fresh
        } else {
            existing
        }
    };

    let mut second = vec![0u8; 16];
    rng.fill_bytes(&mut second);

    (first, second)
}

/// Decide the output encryption: dropped for decrypt, fresh for encrypt and
/// password changes, re-keyed from the configuration when the input was
/// encrypted, absent otherwise.
fn decide_crypt(ctx: &Context, first_id: &[u8]) -> Result<Option<(SecurityHandler, Dict)>> {
    let wants_encryption = match ctx.config().cmd {
        CommandMode::Decrypt => false,
        CommandMode::Encrypt | CommandMode::ChangeUserPw | CommandMode::ChangeOwnerPw => true,
        _ => ctx.security_handler().is_some(),
    };

    if !wants_encryption {
        return Ok(None);
    }

    SecurityHandler::create(ctx.config(), first_id).map(Some)
}

fn output_version(ctx: &Context, crypt: Option<&(SecurityHandler, Dict)>) -> (u8, u8) {
    let mut version = ctx.version();

    if ctx.config().write_xref_stream || ctx.config().write_object_stream {
        version = version.max((1, 5));
    }

    if let Some((handler, _)) = crypt {
        version = version.max(handler.min_version());
    }

    version
}

#[derive(Copy, Clone)]
struct Serializer<'a> {
    map: &'a FxHashMap<u32, u32>,
    eol: &'static [u8],
}

impl Serializer<'_> {
    fn value(&self, out: &mut Vec<u8>, object: &Object) {
        match object {
            Object::Null => out.extend_from_slice(b"null"),
            Object::Boolean(true) => out.extend_from_slice(b"true"),
            Object::Boolean(false) => out.extend_from_slice(b"false"),
            Object::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => out.extend_from_slice(format_real(*r).as_bytes()),
            Object::Name(name) => write_name(out, name),
            Object::String(s) => write_string(out, s),
            Object::Array(items) => {
                out.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(b' ');
                    }
                    self.value(out, item);
                }
                out.push(b']');
            }
            Object::Dict(dict) => self.dict(out, dict),
            // Stream payloads need the indirect wrapper; writing one as a
            // direct value would be a bug upstream.
            Object::Stream(stream) => self.dict(out, &stream.dict),
            Object::Reference(id) => match self.map.get(&id.num) {
                Some(new_num) => {
                    out.extend_from_slice(format!("{new_num} 0 R").as_bytes());
                }
                // The target was dropped or never existed.
                None => out.extend_from_slice(b"null"),
            },
        }
    }

    fn dict(&self, out: &mut Vec<u8>, dict: &Dict) {
        out.extend_from_slice(b"<<");
        for (key, value) in dict.iter() {
            write_name(out, key);
            out.push(b' ');
            self.value(out, value);
        }
        out.extend_from_slice(b">>");
    }

    /// Emit `num 0 obj ... endobj`, with the stream payload when present.
    fn indirect(&self, out: &mut Vec<u8>, num: u32, object: &Object) {
        out.extend_from_slice(format!("{num} 0 obj").as_bytes());
        out.extend_from_slice(self.eol);
        self.value(out, object);
        out.extend_from_slice(self.eol);

        if let Object::Stream(stream) = object {
            // The stream keyword tolerates only LF or CRLF.
            let stream_eol: &[u8] = if self.eol == b"\r" { b"\n" } else { self.eol };

            out.extend_from_slice(b"stream");
            out.extend_from_slice(stream_eol);
            out.extend_from_slice(stream.raw_data());
            out.extend_from_slice(self.eol);
            out.extend_from_slice(b"endstream");
            out.extend_from_slice(self.eol);
        }

        out.extend_from_slice(b"endobj");
        out.extend_from_slice(self.eol);
    }

    fn header(&self, out: &mut Vec<u8>, version: (u8, u8)) {
        out.extend_from_slice(format!("%PDF-{}.{}", version.0, version.1).as_bytes());
        out.extend_from_slice(self.eol);
        out.extend_from_slice(BINARY_MARKER);
        out.extend_from_slice(self.eol);
    }

    fn footer(&self, out: &mut Vec<u8>, startxref: usize) {
        out.extend_from_slice(b"startxref");
        out.extend_from_slice(self.eol);
        out.extend_from_slice(startxref.to_string().as_bytes());
        out.extend_from_slice(self.eol);
        out.extend_from_slice(b"%%EOF");
        out.extend_from_slice(self.eol);
    }
}

fn format_real(r: f64) -> String {
    if r.fract() == 0.0 && r.abs() < 1e15 {
        format!("{r:.1}")
    } else {
        format!("{r}")
    }
}

fn write_name(out: &mut Vec<u8>, name: &Name) {
    out.push(b'/');

    // The preserved source spelling wins when the value is untouched.
    if let Some(raw) = name.raw() {
        out.extend_from_slice(raw);

        return;
    }

    for b in name.as_bytes() {
        if is_regular_character(*b) && *b != b'#' && (0x21..=0x7E).contains(b) {
            out.push(*b);
        } else {
            out.extend_from_slice(format!("#{b:02X}").as_bytes());
        }
    }
}

fn write_string(out: &mut Vec<u8>, s: &PdfString) {
    if let Some(raw) = s.raw() {
        match s.kind() {
            StringKind::Literal => {
                out.push(b'(');
                out.extend_from_slice(raw);
                out.push(b')');
            }
            StringKind::Hex => {
                out.push(b'<');
                out.extend_from_slice(raw);
                out.push(b'>');
            }
        }

        return;
    }

    match s.kind() {
        StringKind::Literal => {
            out.push(b'(');
            for b in s.as_bytes() {
                match b {
                    b'(' | b')' | b'\\' => {
                        out.push(b'\\');
                        out.push(*b);
                    }
                    b'\n' => out.extend_from_slice(b"\\n"),
                    b'\r' => out.extend_from_slice(b"\\r"),
                    _ => out.push(*b),
                }
            }
            out.push(b')');
        }
        StringKind::Hex => {
            out.push(b'<');
            for b in s.as_bytes() {
                out.extend_from_slice(format!("{b:02X}").as_bytes());
            }
            out.push(b'>');
        }
    }
}

fn trailer_dict(
    size: u64,
    root_num: u32,
    info_num: Option<u32>,
    file_id: &(Vec<u8>, Vec<u8>),
    encrypt_num: Option<u32>,
) -> Dict {
    let mut trailer = Dict::new();
    trailer.set(keys::SIZE, Object::Integer(size as i64));
    trailer.set(keys::ROOT, Object::reference(root_num, 0));

    if let Some(info) = info_num {
        trailer.set(keys::INFO, Object::reference(info, 0));
    }

    if let Some(encrypt) = encrypt_num {
        trailer.set(keys::ENCRYPT, Object::reference(encrypt, 0));
    }

    trailer.set(
        keys::ID,
        Object::Array(vec![
            PdfString::hex(file_id.0.clone()).into(),
            PdfString::hex(file_id.1.clone()).into(),
        ]),
    );

    trailer
}

#[allow(clippy::too_many_arguments)]
fn emit_classical(
    objects: &[Object],
    ser: Serializer<'_>,
    version: (u8, u8),
    crypt: Option<(SecurityHandler, Dict)>,
    file_id: &(Vec<u8>, Vec<u8>),
    info_num: Option<u32>,
    root_num: u32,
) -> Result<Vec<u8>> {
    let mut out = vec![];
    ser.header(&mut out, version);

    let (mut crypt_handler, crypt_dict) = match crypt {
        Some((handler, dict)) => (Some(handler), Some(dict)),
        None => (None, None),
    };

    let mut offsets = Vec::with_capacity(objects.len() + 1);

    for (i, object) in objects.iter().enumerate() {
        let num = i as u32 + 1;
        let mut object = object.clone();

        if let Some(handler) = crypt_handler.as_mut() {
            encrypt_object(handler, ObjectId::new(num, 0), &mut object)?;
        }

        offsets.push(out.len());
        ser.indirect(&mut out, num, &object);
    }

    // The encrypt dictionary itself is written in the clear.
    let encrypt_num = crypt_dict.as_ref().map(|_| objects.len() as u32 + 1);
    if let Some(dict) = &crypt_dict {
        offsets.push(out.len());
        ser.indirect(&mut out, encrypt_num.unwrap(), &Object::Dict(dict.clone()));
    }

    let size = offsets.len() as u64 + 1;
    let xref_offset = out.len();

    // A single subsection covering every object.
    out.extend_from_slice(b"xref");
    out.extend_from_slice(ser.eol);
    out.extend_from_slice(format!("0 {size}").as_bytes());
    out.extend_from_slice(ser.eol);

    // Each entry is exactly 20 bytes, padding single-byte terminators.
    let entry_eol: &[u8] = match ser.eol {
        b"\r\n" => b"\r\n",
        b"\r" => b" \r",
        _ => b" \n",
    };

    out.extend_from_slice(b"0000000000 65535 f");
    out.extend_from_slice(entry_eol);
    for offset in &offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n").as_bytes());
        out.extend_from_slice(entry_eol);
    }

    out.extend_from_slice(b"trailer");
    out.extend_from_slice(ser.eol);
    let trailer = trailer_dict(size, root_num, info_num, file_id, encrypt_num);
    ser.dict(&mut out, &trailer);
    out.extend_from_slice(ser.eol);

    ser.footer(&mut out, xref_offset);

    Ok(out)
}

enum Record {
    FreeHead,
    Offset(usize),
    InStream { host: u32, index: u32 },
}

#[allow(clippy::too_many_arguments)]
fn emit_with_xref_stream(
    objects: &[Object],
    ser: Serializer<'_>,
    version: (u8, u8),
    crypt: Option<(SecurityHandler, Dict)>,
    file_id: &(Vec<u8>, Vec<u8>),
    info_num: Option<u32>,
    root_num: u32,
    pack_objects: bool,
) -> Result<Vec<u8>> {
    let mut out = vec![];
    ser.header(&mut out, version);

    let (mut crypt_handler, crypt_dict) = match crypt {
        Some((handler, dict)) => (Some(handler), Some(dict)),
        None => (None, None),
    };

    // Partition: streams always stand alone, other objects pack into object
    // streams when enabled.
    let mut records: Vec<Record> = (1..=objects.len()).map(|_| Record::FreeHead).collect();

    let mut individual: Vec<u32> = vec![];
    let mut packed: Vec<u32> = vec![];

    for (i, object) in objects.iter().enumerate() {
        let num = i as u32 + 1;

        if pack_objects && !matches!(object, Object::Stream(_)) {
            packed.push(num);
        } else {
            individual.push(num);
        }
    }

    let mut next_num = objects.len() as u32 + 1;

    let encrypt_num = crypt_dict.as_ref().map(|_| {
        let num = next_num;
        next_num += 1;
        num
    });

    let groups: Vec<(u32, Vec<u32>)> = packed
        .chunks(OBJECTS_PER_STREAM)
        .map(|members| {
            let host = next_num;
            next_num += 1;
            (host, members.to_vec())
        })
        .collect();

    let xref_stream_num = next_num;

    let mut extra_records: Vec<(u32, Record)> = vec![];

    // Individual objects, encrypted under their own identifiers.
    for num in individual {
        let mut object = objects[num as usize - 1].clone();

        if let Some(handler) = crypt_handler.as_mut() {
            encrypt_object(handler, ObjectId::new(num, 0), &mut object)?;
        }

        records[num as usize - 1] = Record::Offset(out.len());
        ser.indirect(&mut out, num, &object);
    }

    // The encrypt dictionary, in the clear.
    if let Some(dict) = &crypt_dict {
        extra_records.push((encrypt_num.unwrap(), Record::Offset(out.len())));
        ser.indirect(&mut out, encrypt_num.unwrap(), &Object::Dict(dict.clone()));
    }

    // Object streams: members serialized unencrypted, the host encrypted as
    // one stream.
    for (host, members) in &groups {
        let mut header = vec![];
        let mut bodies = vec![];

        for (index, num) in members.iter().enumerate() {
            records[*num as usize - 1] = Record::InStream {
                host: *host,
                index: index as u32,
            };

            header.extend_from_slice(format!("{num} {}", bodies.len()).as_bytes());
            header.push(b' ');

            ser.value(&mut bodies, &objects[*num as usize - 1]);
            bodies.push(b' ');
        }

        let first = header.len();
        let mut payload = header;
        payload.extend_from_slice(&bodies);

        let chain = FilterChain::flate();
        let encoded = chain.encode(&payload)?;

        let mut dict = Dict::new();
        dict.set(keys::TYPE, Object::name(keys::OBJ_STM));
        dict.set(keys::N, Object::Integer(members.len() as i64));
        dict.set(keys::FIRST, Object::Integer(first as i64));
        dict.set(keys::FILTER, chain.filter_object().unwrap());
        dict.set(keys::LENGTH, Object::Integer(encoded.len() as i64));

        let mut host_object = Object::Stream(Stream::new(dict, encoded));

        if let Some(handler) = crypt_handler.as_mut() {
            encrypt_object(handler, ObjectId::new(*host, 0), &mut host_object)?;
        }

        extra_records.push((*host, Record::Offset(out.len())));
        ser.indirect(&mut out, *host, &host_object);
    }

    // The terminating xref stream, never encrypted.
    let xref_offset = out.len();
    extra_records.push((xref_stream_num, Record::Offset(xref_offset)));

    let size = xref_stream_num as u64 + 1;

    let mut all_records: Vec<Record> = records;
    extra_records.sort_by_key(|(num, _)| *num);
    for (num, record) in extra_records {
        debug_assert_eq!(num as usize, all_records.len() + 1);
        all_records.push(record);
    }

    let max_field2 = all_records
        .iter()
        .map(|r| match r {
            Record::FreeHead => 0,
            Record::Offset(offset) => *offset as u64,
            Record::InStream { host, .. } => *host as u64,
        })
        .max()
        .unwrap_or(0);

    let w2 = field_width_for(max_field2);
    // Wide enough for the 65535 generation of the free head.
    let w3 = 2usize;

    let mut payload = vec![];
    // Object 0, the head of the free list.
    payload.push(0u8);
    payload.extend_from_slice(&vec![0u8; w2]);
    payload.extend_from_slice(&0xFFFFu16.to_be_bytes());

    for record in &all_records {
        let (kind, f2, f3) = match record {
            Record::FreeHead => (0u8, 0u64, 0u64),
            Record::Offset(offset) => (1, *offset as u64, 0),
            Record::InStream { host, index } => (2, *host as u64, *index as u64),
        };

        payload.push(kind);
        payload.extend_from_slice(&f2.to_be_bytes()[8 - w2..]);
        payload.extend_from_slice(&f3.to_be_bytes()[8 - w3..]);
    }

    let chain = FilterChain::flate();
    let encoded = chain.encode(&payload)?;

    let mut dict = Dict::new();
    dict.set(keys::TYPE, Object::name(keys::XREF));
    dict.set(keys::SIZE, Object::Integer(size as i64));
    dict.set(
        keys::W,
        Object::Array(vec![
            Object::Integer(1),
            Object::Integer(w2 as i64),
            Object::Integer(w3 as i64),
        ]),
    );
    dict.set(keys::FILTER, chain.filter_object().unwrap());
    dict.set(keys::LENGTH, Object::Integer(encoded.len() as i64));

    for (key, value) in trailer_dict(size, root_num, info_num, file_id, encrypt_num).iter() {
        dict.insert(key.clone(), value.clone());
    }

    ser.indirect(
        &mut out,
        xref_stream_num,
        &Object::Stream(Stream::new(dict, encoded)),
    );

    ser.footer(&mut out, xref_offset);

    Ok(out)
}

fn field_width_for(max: u64) -> usize {
    let mut width = 1;
    while max >= 1u64 << (8 * width) {
        width += 1;
    }

    width
}
