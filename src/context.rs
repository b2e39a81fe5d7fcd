//! The context: configuration snapshot, byte source, xref table, object
//! store and security handler, bundled as the handle every operation works
//! through.

use crate::config::{Configuration, ValidationMode};
use crate::crypt::{CryptTarget, SecurityHandler};
use crate::error::{Error, Result};
use crate::filter;
use crate::object::{keys, Dict, Object, ObjectId, PdfString};
use crate::parse::{parse_indirect_object, ParseOptions};
use crate::reader::Reader;
use crate::xref::{self, Entry, ReadOptions, XRefTable};
use log::warn;
use rustc_hash::FxHashMap;

static NULL: Object = Object::Null;

#[derive(Debug, Clone)]
enum Slot {
    /// Being parsed right now; hit again only on a reference cycle.
    Pending,
    Ready(Object),
}

/// A PDF document being processed: the input bytes, the reconstructed xref
/// table, the lazily filled object store and the optional security handler.
///
/// A context serves one operation at a time; independent contexts are
/// independent.
pub struct Context {
    config: Configuration,
    data: Vec<u8>,
    /// The reconstructed cross reference table.
    pub xref: XRefTable,
    cache: FxHashMap<ObjectId, Slot>,
    crypt: Option<SecurityHandler>,
    header_version: (u8, u8),
    encrypt_ref: Option<ObjectId>,
}

impl Context {
    /// Read a PDF from a byte stream.
    pub fn read(data: Vec<u8>, config: Configuration) -> Result<Self> {
        let strict = config.validation_mode == ValidationMode::Strict;

        let header_version = match xref::header_version(&data) {
            Some(version) => version,
            None if strict => {
                return Err(Error::syntax(0, "missing %PDF header"));
            }
            None => {
                warn!("missing %PDF header, assuming version 1.7");

                (1, 7)
            }
        };

        let opts = ReadOptions {
            relaxed: !strict,
            reader15: config.reader15,
        };

        let table = xref::read_xref(&data, &opts)?;

        let mut ctx = Self {
            config,
            data,
            xref: table,
            cache: FxHashMap::default(),
            crypt: None,
            header_version,
            encrypt_ref: None,
        };

        ctx.setup_decryption()?;

        if ctx.config.decode_all_streams {
            ctx.decode_all_streams()?;
        }

        Ok(ctx)
    }

    /// The configuration snapshot taken at construction.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// The configuration, for callers that adjust write options between
    /// operations.
    pub fn config_mut(&mut self) -> &mut Configuration {
        &mut self.config
    }

    /// The PDF version from the header, possibly overridden by the catalog.
    pub fn version(&self) -> (u8, u8) {
        self.header_version
    }

    /// The security handler, when the document is encrypted.
    pub fn security_handler(&self) -> Option<&SecurityHandler> {
        self.crypt.as_ref()
    }

    /// The identifier of the `/Encrypt` dictionary, when it is indirect.
    pub fn encrypt_ref(&self) -> Option<ObjectId> {
        self.encrypt_ref
    }

    /// The effective permission mask: all bits set for unencrypted files.
    pub fn permissions(&self) -> u32 {
        self.crypt
            .as_ref()
            .map(|c| c.permissions())
            .unwrap_or(0xFFFF_FFFF)
    }

    /// The catalog reference from the trailer.
    pub fn root_id(&self) -> Result<ObjectId> {
        match self.xref.trailer.get(keys::ROOT) {
            Some(Object::Reference(id)) => Ok(*id),
            Some(_) => Err(Error::Validation("/Root is not an indirect reference".into())),
            None => Err(Error::XRef("trailer has no /Root entry".into())),
        }
    }

    fn relaxed(&self) -> bool {
        self.config.validation_mode != ValidationMode::Strict
    }

    /// Dereference an indirect object, parsing and caching it on first use.
    ///
    /// An undefined object reads as null. A reference cycle reads as null in
    /// relaxed mode and errors in strict mode.
    pub fn dereference(&mut self, id: ObjectId) -> Result<&Object> {
        self.materialize(id)?;

        match self.cache.get(&id) {
            Some(Slot::Ready(object)) => Ok(object),
            _ => Ok(&NULL),
        }
    }

    /// Follow a value one reference deep, cloning the result.
    pub fn resolve(&mut self, object: &Object) -> Result<Object> {
        match object {
            Object::Reference(id) => Ok(self.dereference(*id)?.clone()),
            other => Ok(other.clone()),
        }
    }

    /// Replace (or insert) an object in the store.
    pub fn set_object(&mut self, id: ObjectId, object: Object) {
        self.cache.insert(id, Slot::Ready(object));
        self.xref.insert(
            id.num,
            Entry::InUse {
                // The offset is recomputed by the writer.
                offset: 0,
                gen: id.gen,
            },
        );
    }

    /// Remove an object from the store.
    pub fn remove_object(&mut self, id: ObjectId) {
        self.cache.remove(&id);
        self.xref.insert(id.num, Entry::Free { next: 0, gen: id.gen });
    }

    /// Materialize every located object. The writer relies on this to own
    /// the whole graph.
    ///
    /// In relaxed mode an unreadable object degrades to null instead of
    /// failing the whole pass.
    pub fn materialize_all(&mut self) -> Result<()> {
        for id in self.xref.in_use_ids() {
            match self.materialize(id) {
                Ok(()) => {}
                Err(err) if self.relaxed() => {
                    warn!("object {id} could not be read ({err}), treating it as null");

                    self.cache.insert(id, Slot::Ready(Object::Null));
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// The decoded payload of a stream object, computed through the filter
    /// pipeline on first use and cached on the stream's decoded slot.
    pub fn decoded_stream(&mut self, id: ObjectId) -> Result<Vec<u8>> {
        self.materialize(id)?;
        self.resolve_filter_entries(id)?;
        let relaxed = self.relaxed();

        let Some(Slot::Ready(object)) = self.cache.get_mut(&id) else {
            return Err(Error::syntax(0, format!("object {id} is not available")));
        };

        let Some(stream) = object.as_stream_mut() else {
            return Err(Error::syntax(0, format!("object {id} is not a stream")));
        };

        if let Some(decoded) = stream.decoded_data() {
            return Ok(decoded.to_vec());
        }

        let decoded = filter::decode_stream(stream, relaxed)?;
        stream.set_decoded(decoded.clone());

        Ok(decoded)
    }

    /// `/Filter` and `/DecodeParms` may themselves be indirect; replace such
    /// entries with their resolved values before the pipeline looks at them.
    fn resolve_filter_entries(&mut self, id: ObjectId) -> Result<()> {
        for key in [keys::FILTER, keys::DECODE_PARMS] {
            let target = match self.cache.get(&id) {
                Some(Slot::Ready(object)) => object
                    .as_dict()
                    .and_then(|d| d.get(key))
                    .and_then(|v| v.as_reference()),
                _ => None,
            };

            let Some(target) = target else { continue };

            let resolved = self.dereference(target)?.clone();

            if let Some(Slot::Ready(object)) = self.cache.get_mut(&id) {
                if let Some(dict) = object.as_dict_mut() {
                    if let Some(slot) = dict.get_mut(key) {
                        *slot = resolved;
                    }
                }
            }
        }

        Ok(())
    }

    /// Force-decode every stream, for diagnostics.
    fn decode_all_streams(&mut self) -> Result<()> {
        for id in self.xref.in_use_ids() {
            self.materialize(id)?;

            let is_stream = matches!(
                self.cache.get(&id),
                Some(Slot::Ready(Object::Stream(_)))
            );

            if is_stream {
                self.decoded_stream(id)?;
            }
        }

        Ok(())
    }

    fn materialize(&mut self, id: ObjectId) -> Result<()> {
        match self.cache.get(&id) {
            Some(Slot::Ready(_)) => return Ok(()),
            Some(Slot::Pending) => {
                // A cycle: the object is on the current resolution path.
                return if self.relaxed() {
                    warn!("reference cycle through object {id}, reading it as null");

                    Ok(())
                } else {
                    Err(Error::syntax(0, format!("reference cycle through object {id}")))
                };
            }
            None => {}
        }

        let Some(entry) = self.xref.entry_for(id).copied() else {
            // An indirect reference to an undefined object is not an error;
            // it reads as the null object.
            self.cache.insert(id, Slot::Ready(Object::Null));

            return Ok(());
        };

        self.cache.insert(id, Slot::Pending);

        let result = match entry {
            Entry::InUse { offset, .. } => self.materialize_at(id, offset),
            Entry::InStream { host, index } => self.materialize_in_stream(host, index),
            Entry::Free { .. } => Ok(Object::Null),
        };

        match result {
            Ok(object) => {
                self.cache.insert(id, Slot::Ready(object));

                Ok(())
            }
            Err(err) => {
                self.cache.remove(&id);

                // A broken offset with an intact file around it: rebuild the
                // table once and retry.
                if self.relaxed() && !self.xref.repaired() {
                    warn!("broken xref entry for {id} ({err}), rebuilding the table");

                    let opts = ReadOptions {
                        relaxed: true,
                        reader15: self.config.reader15,
                    };

                    let trailer = self.xref.trailer.clone();
                    let mut rebuilt = xref::rebuild_xref(&self.data, &opts)?;
                    // The original trailer stays authoritative where present.
                    for (key, value) in trailer.iter() {
                        rebuilt.trailer.insert(key.clone(), value.clone());
                    }
                    self.xref = rebuilt;

                    return self.materialize(id);
                }

                Err(err)
            }
        }
    }

    fn materialize_at(&mut self, id: ObjectId, offset: usize) -> Result<Object> {
        if offset >= self.data.len() {
            return Err(Error::XRef(format!("offset of object {id} is out of bounds")));
        }

        let opts = ParseOptions {
            relaxed: self.relaxed(),
        };

        let data = &self.data;
        let table = &self.xref;

        // Depth-one resolver for an indirect /Length; anything deeper is
        // treated as unresolvable and recovered by the endstream scan.
        let mut resolve = |length_id: ObjectId| -> Option<i64> {
            let Entry::InUse { offset, .. } = table.entry_for(length_id)? else {
                return None;
            };

            let mut r = Reader::new_at(data, *offset);
            let (_, obj) =
                parse_indirect_object(&mut r, ParseOptions { relaxed: false }, &mut |_| None)?;

            obj.as_int()
        };

        let mut r = Reader::new_at(data, offset);
        let (parsed_id, mut object) = parse_indirect_object(&mut r, opts, &mut resolve)
            .ok_or_else(|| Error::syntax(offset, format!("malformed indirect object {id}")))?;

        if parsed_id != id {
            return Err(Error::XRef(format!(
                "object at offset {offset} is {parsed_id}, expected {id}"
            )));
        }

        // The encrypt dictionary itself is stored in the clear.
        if self.encrypt_ref != Some(id) {
            if let Some(crypt) = self.crypt.as_mut() {
                decrypt_object(crypt, id, &mut object)?;
            }
        }

        Ok(object)
    }

    fn materialize_in_stream(&mut self, host: u32, index: u32) -> Result<Object> {
        let host_id = ObjectId::new(host, 0);
        self.materialize(host_id)?;

        match self.cache.get(&host_id) {
            Some(Slot::Ready(object)) => {
                let is_obj_stm = object
                    .as_stream()
                    .map(|s| s.dict.is_type(keys::OBJ_STM))
                    .unwrap_or(false);

                if !is_obj_stm {
                    return Err(Error::XRef(format!(
                        "object {host_id} is not an object stream"
                    )));
                }
            }
            // A host claiming to contain itself; relaxed mode already
            // flagged the cycle.
            Some(Slot::Pending) => return Ok(Object::Null),
            None => {
                return Err(Error::XRef(format!(
                    "object stream {host_id} is not available"
                )));
            }
        }

        let payload = self.decoded_stream(host_id)?;

        let offsets = {
            let Some(Slot::Ready(object)) = self.cache.get(&host_id) else {
                unreachable!("host was just materialized");
            };

            xref::object_stream_offsets(object.as_stream().unwrap(), &payload)?
        };

        let (_, offset) = offsets.get(index as usize).ok_or_else(|| {
            Error::XRef(format!("object stream {host_id} has no member {index}"))
        })?;

        // Members of an object stream are never individually encrypted; the
        // host stream was.
        xref::object_stream_member(&payload, *offset)
    }

    fn setup_decryption(&mut self) -> Result<()> {
        let encrypt = match self.xref.trailer.get(keys::ENCRYPT).cloned() {
            None => return Ok(()),
            Some(Object::Reference(id)) => {
                self.encrypt_ref = Some(id);

                self.dereference(id)?
                    .as_dict()
                    .cloned()
                    .ok_or_else(|| Error::Encryption("/Encrypt is not a dictionary".into()))?
            }
            Some(Object::Dict(dict)) => dict,
            Some(_) => {
                return Err(Error::Encryption("/Encrypt is not a dictionary".into()));
            }
        };

        let file_id = self.first_file_id();

        if file_id.is_empty() {
            if self.relaxed() {
                warn!("encrypted document without /ID entry");
            } else {
                return Err(Error::Encryption("encrypted document has no /ID".into()));
            }
        }

        let handler = SecurityHandler::open(
            &encrypt,
            &file_id,
            &self.config.user_pw,
            &self.config.owner_pw,
        )?;

        self.crypt = Some(handler);

        Ok(())
    }

    /// The first element of the document ID, fed into key derivation.
    pub fn first_file_id(&self) -> Vec<u8> {
        self.xref
            .trailer
            .get_array(keys::ID)
            .and_then(|id| id.first())
            .and_then(|o| o.as_string())
            .map(|s| s.as_bytes().to_vec())
            .unwrap_or_default()
    }

}

/// Walk a materialized value, decrypting every string and stream payload
/// with the containing object's key.
fn decrypt_object(
    crypt: &mut SecurityHandler,
    id: ObjectId,
    object: &mut Object,
) -> Result<()> {
    match object {
        Object::String(s) => {
            let decrypted = crypt.decrypt(id, s.as_bytes(), CryptTarget::String)?;
            s.set_value(decrypted);
        }
        Object::Array(items) => {
            for item in items {
                decrypt_object(crypt, id, item)?;
            }
        }
        Object::Dict(dict) => {
            decrypt_dict_values(crypt, id, dict)?;
        }
        Object::Stream(stream) => {
            decrypt_dict_values(crypt, id, &mut stream.dict)?;

            // The xref stream is never encrypted, and metadata only when
            // EncryptMetadata says so.
            let skip = stream.dict.is_type(keys::XREF)
                || (stream.dict.is_type(b"Metadata") && !crypt.encrypts_metadata());

            if !skip {
                let decrypted = crypt.decrypt(id, stream.raw_data(), CryptTarget::Stream)?;
                stream.set_raw(decrypted);
            }
        }
        _ => {}
    }

    Ok(())
}

fn decrypt_dict_values(
    crypt: &mut SecurityHandler,
    id: ObjectId,
    dict: &mut Dict,
) -> Result<()> {
    for (_, value) in dict.iter_mut() {
        decrypt_object(crypt, id, value)?;
    }

    Ok(())
}

/// Encrypt-side twin of [`decrypt_object`], used by the writer.
pub(crate) fn encrypt_object(
    crypt: &mut SecurityHandler,
    id: ObjectId,
    object: &mut Object,
) -> Result<()> {
    match object {
        Object::String(s) => {
            let encrypted = crypt.encrypt(id, s.as_bytes(), CryptTarget::String)?;
            // Encrypted strings are conventionally written in hex form.
            *s = PdfString::hex(encrypted);
        }
        Object::Array(items) => {
            for item in items {
                encrypt_object(crypt, id, item)?;
            }
        }
        Object::Dict(dict) => {
            for (_, value) in dict.iter_mut() {
                encrypt_object(crypt, id, value)?;
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter_mut() {
                encrypt_object(crypt, id, value)?;
            }

            let skip = stream.dict.is_type(keys::XREF)
                || (stream.dict.is_type(b"Metadata") && !crypt.encrypts_metadata());

            if !skip {
                let encrypted = crypt.encrypt(id, stream.raw_data(), CryptTarget::Stream)?;
                stream.set_raw(encrypted);
                stream
                    .dict
                    .set(keys::LENGTH, Object::Integer(stream.raw_data().len() as i64));
            }
        }
        _ => {}
    }

    Ok(())
}
