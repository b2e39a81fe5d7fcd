//! The standard security handler of ISO 32000-1 §7.6.3: password-based key
//! derivation, access validation and the RC4/AES transforms applied to
//! strings and streams.

mod rc4;

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::object::{keys, Dict, Object, ObjectId, PdfString};
use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use log::warn;
use md5::{Digest, Md5};
use rand::RngCore;
use rc4::Rc4;
use rustc_hash::FxHashMap;
use sha2::{Sha256, Sha384, Sha512};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// What kind of value is being transformed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CryptTarget {
    /// A string object.
    String,
    /// A stream payload.
    Stream,
}

/// The cipher selected for one class of values.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum CryptMethod {
    Identity,
    Rc4,
    Aes128,
    Aes256,
}

impl CryptMethod {
    fn from_cfm(name: &[u8]) -> Option<Self> {
        match name {
            b"None" | b"Identity" => Some(Self::Identity),
            b"V2" => Some(Self::Rc4),
            b"AESV2" => Some(Self::Aes128),
            b"AESV3" => Some(Self::Aes256),
            _ => None,
        }
    }

    fn is_aes(&self) -> bool {
        matches!(self, Self::Aes128 | Self::Aes256)
    }
}

/// The standard security handler attached to a context.
///
/// Constructed at xref-parse time when the trailer carries `/Encrypt`, or by
/// the writer when a new encryption is requested. Holds the file encryption
/// key and a per-object key cache; rekeying always builds a fresh handler, so
/// the cache is never invalidated in place.
#[derive(Debug, Clone)]
pub struct SecurityHandler {
    version: u8,
    revision: u8,
    key: Vec<u8>,
    string_method: CryptMethod,
    stream_method: CryptMethod,
    permissions: u32,
    encrypt_metadata: bool,
    owner_authenticated: bool,
    object_keys: FxHashMap<(ObjectId, CryptMethod), Vec<u8>>,
}

impl SecurityHandler {
    /// Authenticate against an `/Encrypt` dictionary and derive the file key.
    ///
    /// The owner password is tried first; a file opened with a valid owner
    /// password grants all permissions regardless of the `P` mask.
    pub fn open(
        encrypt: &Dict,
        file_id: &[u8],
        user_pw: &str,
        owner_pw: &str,
    ) -> Result<Self> {
        let filter = encrypt
            .get_name(b"Filter")
            .ok_or_else(|| Error::Encryption("missing /Filter entry".into()))?;

        if filter.as_bytes() != b"Standard" {
            return Err(Error::Unsupported(format!(
                "security handler /{}",
                filter.as_str()
            )));
        }

        let version = required_u8(encrypt, b"V")?;
        let revision = required_u8(encrypt, b"R")?;
        let encrypt_metadata = encrypt.get_bool(b"EncryptMetadata").unwrap_or(true);
        let permissions = encrypt
            .get_int(b"P")
            .ok_or_else(|| Error::Encryption("missing /P entry".into()))?
            as i32 as u32;

        let owner_string = required_string(encrypt, b"O")?;
        let user_string = required_string(encrypt, b"U")?;

        let length_bits: u16 = match version {
            1 => 40,
            2 => encrypt.get_int(keys::LENGTH).unwrap_or(40) as u16,
            4 => encrypt.get_int(keys::LENGTH).unwrap_or(128) as u16,
            5 => 256,
            v => {
                return Err(Error::Unsupported(format!("encryption version {v}")));
            }
        };

        let (string_method, stream_method) = match version {
            1 | 2 => (CryptMethod::Rc4, CryptMethod::Rc4),
            _ => crypt_filters(encrypt)?,
        };

        let mut handler = Self {
            version,
            revision,
            key: vec![],
            string_method,
            stream_method,
            permissions,
            encrypt_metadata,
            owner_authenticated: false,
            object_keys: FxHashMap::default(),
        };

        if version < 5 {
            handler.authenticate_legacy(
                &owner_string,
                &user_string,
                file_id,
                length_bits,
                user_pw,
                owner_pw,
            )?;
        } else {
            if !matches!(revision, 5 | 6) {
                return Err(Error::Unsupported(format!("encryption revision {revision}")));
            }

            handler.authenticate_v5(encrypt, &owner_string, &user_string, user_pw, owner_pw)?;
        }

        Ok(handler)
    }

    /// Set up a new encryption as requested by the configuration, returning
    /// the handler and the `/Encrypt` dictionary describing it.
    pub fn create(config: &Configuration, file_id: &[u8]) -> Result<(Self, Dict)> {
        let user_pw = config
            .user_pw_new
            .as_deref()
            .unwrap_or(&config.user_pw);
        let owner_pw = config
            .owner_pw_new
            .as_deref()
            .unwrap_or(&config.owner_pw);
        // An empty owner password falls back to the user password.
        let owner_pw = if owner_pw.is_empty() { user_pw } else { owner_pw };

        let permissions = config.permissions_extended();

        match (config.encrypt_using_aes, config.encrypt_key_length) {
            (true, 256) => Self::create_v5(user_pw, owner_pw, permissions),
            // AESV2 is always a 128-bit cipher.
            (true, 40 | 128) => {
                Self::create_legacy(4, 4, 128, user_pw, owner_pw, permissions, file_id)
            }
            (false, 40) => Self::create_legacy(1, 2, 40, user_pw, owner_pw, permissions, file_id),
            (false, 128) => Self::create_legacy(2, 3, 128, user_pw, owner_pw, permissions, file_id),
            (aes, len) => Err(Error::Encryption(format!(
                "key length {len} is not supported for {}",
                if aes { "AES" } else { "RC4" }
            ))),
        }
    }

    /// The effective 32-bit permission mask. All bits are granted after an
    /// owner password authentication.
    pub fn permissions(&self) -> u32 {
        if self.owner_authenticated {
            0xFFFF_FFFF
        } else {
            self.permissions
        }
    }

    /// Returns `true` if the owner password authenticated.
    pub fn owner_authenticated(&self) -> bool {
        self.owner_authenticated
    }

    /// Returns `true` unless `/EncryptMetadata false` exempts metadata
    /// streams.
    pub fn encrypts_metadata(&self) -> bool {
        self.encrypt_metadata
    }

    /// The minimum PDF version able to express this encryption.
    pub fn min_version(&self) -> (u8, u8) {
        match self.version {
            1 | 2 => (1, 4),
            4 => (1, 6),
            _ => (1, 7),
        }
    }

    /// Decrypt a string or stream payload belonging to the given object.
    pub fn decrypt(
        &mut self,
        id: ObjectId,
        data: &[u8],
        target: CryptTarget,
    ) -> Result<Vec<u8>> {
        let method = self.method_for(target);

        match method {
            CryptMethod::Identity => Ok(data.to_vec()),
            CryptMethod::Rc4 => {
                let key = self.object_key(id, method);
                Ok(Rc4::new(&key).apply(data))
            }
            CryptMethod::Aes128 | CryptMethod::Aes256 => {
                let key = self.object_key(id, method);

                // The initialization vector is the first 16 bytes of the
                // ciphertext.
                let (iv, body) = data.split_at_checked(16).ok_or_else(|| {
                    Error::Encryption("AES payload shorter than its IV".into())
                })?;

                aes_cbc_decrypt(&key, iv.try_into().unwrap(), body, true)
            }
        }
    }

    /// Encrypt a string or stream payload belonging to the given object.
    pub fn encrypt(
        &mut self,
        id: ObjectId,
        data: &[u8],
        target: CryptTarget,
    ) -> Result<Vec<u8>> {
        let method = self.method_for(target);

        match method {
            CryptMethod::Identity => Ok(data.to_vec()),
            CryptMethod::Rc4 => {
                let key = self.object_key(id, method);
                Ok(Rc4::new(&key).apply(data))
            }
            CryptMethod::Aes128 | CryptMethod::Aes256 => {
                let key = self.object_key(id, method);

                let mut iv = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut iv);

                let mut out = iv.to_vec();
                out.extend(aes_cbc_encrypt(&key, &iv, data, true)?);

                Ok(out)
            }
        }
    }

    fn method_for(&self, target: CryptTarget) -> CryptMethod {
        match target {
            CryptTarget::String => self.string_method,
            CryptTarget::Stream => self.stream_method,
        }
    }

    /// The per-object key of §7.6.2, cached by object identifier.
    fn object_key(&mut self, id: ObjectId, method: CryptMethod) -> Vec<u8> {
        // Revision 5/6 uses the file key for every object.
        if self.version >= 5 {
            return self.key.clone();
        }

        if let Some(key) = self.object_keys.get(&(id, method)) {
            return key.clone();
        }

        let n = self.key.len();

        let mut input = self.key.clone();
        input.extend(&id.num.to_le_bytes()[..3]);
        input.extend(&id.gen.to_le_bytes()[..2]);

        if method.is_aes() {
            input.extend(b"sAlT");
        }

        let hash = md5(&[&input]);
        let key = hash[..(n + 5).min(16)].to_vec();

        self.object_keys.insert((id, method), key.clone());

        key
    }

    // ---- revision 2-4 ----

    fn authenticate_legacy(
        &mut self,
        owner_string: &[u8],
        user_string: &[u8],
        file_id: &[u8],
        length_bits: u16,
        user_pw: &str,
        owner_pw: &str,
    ) -> Result<()> {
        if !matches!(self.revision, 2 | 3 | 4) {
            return Err(Error::Unsupported(format!(
                "encryption revision {}",
                self.revision
            )));
        }

        let n = match self.revision {
            2 => 5,
            _ => (length_bits / 8) as usize,
        };

        if n < 5 || n > 16 {
            return Err(Error::Encryption(format!(
                "invalid key length of {length_bits} bits"
            )));
        }

        // Algorithm 7: the owner password recovers the padded user password
        // from O, which then has to pass user validation.
        let okey = owner_key(owner_pw.as_bytes(), self.revision, n);
        let mut candidate = owner_string.to_vec();

        if self.revision == 2 {
            candidate = Rc4::new(&okey).apply(&candidate);
        } else {
            for i in (0..20u8).rev() {
                let key: Vec<u8> = okey.iter().map(|b| b ^ i).collect();
                candidate = Rc4::new(&key).apply(&candidate);
            }
        }

        let candidate: Option<[u8; 32]> = candidate.try_into().ok();

        if let Some(padded_user) = candidate {
            if let Some(key) = self.validate_user_padded(
                &padded_user,
                owner_string,
                user_string,
                file_id,
                n,
            ) {
                self.key = key;
                self.owner_authenticated = true;

                return Ok(());
            }
        }

        // Algorithm 6: straight user password validation.
        let padded = pad_password(user_pw.as_bytes());
        if let Some(key) =
            self.validate_user_padded(&padded, owner_string, user_string, file_id, n)
        {
            self.key = key;

            return Ok(());
        }

        Err(Error::Encryption("wrong password".into()))
    }

    /// Derive the file key from an already-padded user password and check it
    /// against U. Returns the key on success.
    fn validate_user_padded(
        &self,
        padded_pw: &[u8; 32],
        owner_string: &[u8],
        user_string: &[u8],
        file_id: &[u8],
        n: usize,
    ) -> Option<Vec<u8>> {
        let key = file_key_legacy(
            padded_pw,
            owner_string,
            self.permissions,
            file_id,
            self.revision,
            self.encrypt_metadata,
            n,
        );

        let expected = match self.revision {
            2 => user_entry_rev2(&key),
            _ => user_entry_rev34(&key, file_id),
        };

        let matches = match self.revision {
            2 => expected.as_slice() == user_string,
            _ => Some(&expected[..16]) == user_string.get(..16),
        };

        matches.then_some(key)
    }

    fn create_legacy(
        version: u8,
        revision: u8,
        length_bits: u16,
        user_pw: &str,
        owner_pw: &str,
        permissions: u32,
        file_id: &[u8],
    ) -> Result<(Self, Dict)> {
        let n = (length_bits / 8) as usize;

        let okey = owner_key(owner_pw.as_bytes(), revision, n);
        let padded_user = pad_password(user_pw.as_bytes());

        // Algorithm 3: the O entry.
        let mut o = padded_user.to_vec();
        if revision == 2 {
            o = Rc4::new(&okey).apply(&o);
        } else {
            for i in 0..20u8 {
                let key: Vec<u8> = okey.iter().map(|b| b ^ i).collect();
                o = Rc4::new(&key).apply(&o);
            }
        }

        let key = file_key_legacy(&padded_user, &o, permissions, file_id, revision, true, n);

        let u = match revision {
            2 => user_entry_rev2(&key),
            _ => user_entry_rev34(&key, file_id),
        };

        let mut dict = Dict::new();
        dict.set(b"Filter", Object::name(b"Standard"));
        dict.set(b"V", Object::Integer(version as i64));
        dict.set(b"R", Object::Integer(revision as i64));
        dict.set(keys::LENGTH, Object::Integer(length_bits as i64));
        dict.set(b"O", PdfString::hex(o).into());
        dict.set(b"U", PdfString::hex(u).into());
        dict.set(b"P", Object::Integer(permissions as i32 as i64));

        let (string_method, stream_method) = if version == 4 {
            dict.set(b"CF", std_crypt_filter(b"AESV2", 16));
            dict.set(b"StmF", Object::name(b"StdCF"));
            dict.set(b"StrF", Object::name(b"StdCF"));

            (CryptMethod::Aes128, CryptMethod::Aes128)
        } else {
            (CryptMethod::Rc4, CryptMethod::Rc4)
        };

        let handler = Self {
            version,
            revision,
            key,
            string_method,
            stream_method,
            permissions,
            encrypt_metadata: true,
            owner_authenticated: true,
            object_keys: FxHashMap::default(),
        };

        Ok((handler, dict))
    }

    // ---- revision 5/6 ----

    fn authenticate_v5(
        &mut self,
        encrypt: &Dict,
        owner_string: &[u8],
        user_string: &[u8],
        user_pw: &str,
        owner_pw: &str,
    ) -> Result<()> {
        let invalid = || Error::Encryption("malformed V5 encryption dictionary".into());

        let o48 = owner_string.get(..48).ok_or_else(invalid)?;
        let u48 = user_string.get(..48).ok_or_else(invalid)?;

        let (o_hash, o_vsalt, o_ksalt) = (&o48[..32], &o48[32..40], &o48[40..48]);
        let (u_hash, u_vsalt, u_ksalt) = (&u48[..32], &u48[32..40], &u48[40..48]);

        // Algorithm 2.A: owner first, then user.
        let owner_pw = truncate_utf8(owner_pw);
        let user_pw = truncate_utf8(user_pw);

        if hash_rev56(self.revision, owner_pw, o_vsalt, Some(u48))? == o_hash {
            let intermediate = hash_rev56(self.revision, owner_pw, o_ksalt, Some(u48))?;
            let oe = required_string(encrypt, b"OE")?;

            self.key = unwrap_file_key(&intermediate, &oe)?;
            self.owner_authenticated = true;
        } else if hash_rev56(self.revision, user_pw, u_vsalt, None)? == u_hash {
            let intermediate = hash_rev56(self.revision, user_pw, u_ksalt, None)?;
            let ue = required_string(encrypt, b"UE")?;

            self.key = unwrap_file_key(&intermediate, &ue)?;
        } else {
            return Err(Error::Encryption("wrong password".into()));
        }

        // The Perms entry double-checks P against an encrypted copy.
        if let Some(perms) = encrypt.get_string(b"Perms") {
            match decode_perms(&self.key, perms.as_bytes()) {
                Some(p) if p != self.permissions => {
                    warn!("/Perms disagrees with /P ({p:#x} vs {:#x})", self.permissions);
                }
                None => warn!("/Perms entry is malformed"),
                _ => {}
            }
        }

        Ok(())
    }

    fn create_v5(user_pw: &str, owner_pw: &str, permissions: u32) -> Result<(Self, Dict)> {
        let revision = 6u8;
        let user_pw = truncate_utf8(user_pw);
        let owner_pw = truncate_utf8(owner_pw);

        let mut rng = rand::thread_rng();

        let mut key = vec![0u8; 32];
        rng.fill_bytes(&mut key);

        // Algorithm 8: the U and UE entries.
        let mut u_salts = [0u8; 16];
        rng.fill_bytes(&mut u_salts);
        let (u_vsalt, u_ksalt) = u_salts.split_at(8);

        let mut u = hash_rev56(revision, user_pw, u_vsalt, None)?.to_vec();
        u.extend_from_slice(&u_salts);

        let ue = {
            let intermediate = hash_rev56(revision, user_pw, u_ksalt, None)?;
            aes_cbc_encrypt(&intermediate, &[0u8; 16], &key, false)?
        };

        // Algorithm 9: the O and OE entries.
        let mut o_salts = [0u8; 16];
        rng.fill_bytes(&mut o_salts);
        let (o_vsalt, o_ksalt) = o_salts.split_at(8);

        let mut o = hash_rev56(revision, owner_pw, o_vsalt, Some(&u))?.to_vec();
        o.extend_from_slice(&o_salts);

        let oe = {
            let intermediate = hash_rev56(revision, owner_pw, o_ksalt, Some(&u))?;
            aes_cbc_encrypt(&intermediate, &[0u8; 16], &key, false)?
        };

        // Algorithm 10: the Perms entry.
        let mut perms = [0u8; 16];
        perms[..4].copy_from_slice(&permissions.to_le_bytes());
        perms[4..8].copy_from_slice(&[0xFF; 4]);
        perms[8] = b'T';
        perms[9..12].copy_from_slice(b"adb");
        rng.fill_bytes(&mut perms[12..16]);

        let cipher = aes::Aes256::new_from_slice(&key)
            .map_err(|_| Error::Encryption("invalid AES-256 key".into()))?;
        let mut block = GenericArray::clone_from_slice(&perms);
        cipher.encrypt_block(&mut block);

        let mut dict = Dict::new();
        dict.set(b"Filter", Object::name(b"Standard"));
        dict.set(b"V", Object::Integer(5));
        dict.set(b"R", Object::Integer(revision as i64));
        dict.set(keys::LENGTH, Object::Integer(256));
        dict.set(b"O", PdfString::hex(o).into());
        dict.set(b"U", PdfString::hex(u).into());
        dict.set(b"OE", PdfString::hex(oe).into());
        dict.set(b"UE", PdfString::hex(ue).into());
        dict.set(b"P", Object::Integer(permissions as i32 as i64));
        dict.set(b"Perms", PdfString::hex(block.to_vec()).into());
        dict.set(b"CF", std_crypt_filter(b"AESV3", 32));
        dict.set(b"StmF", Object::name(b"StdCF"));
        dict.set(b"StrF", Object::name(b"StdCF"));

        let handler = Self {
            version: 5,
            revision,
            key,
            string_method: CryptMethod::Aes256,
            stream_method: CryptMethod::Aes256,
            permissions,
            encrypt_metadata: true,
            owner_authenticated: true,
            object_keys: FxHashMap::default(),
        };

        Ok((handler, dict))
    }
}

fn required_u8(dict: &Dict, key: &[u8]) -> Result<u8> {
    dict.get_int(key)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| {
            Error::Encryption(format!(
                "missing or invalid /{} entry",
                String::from_utf8_lossy(key)
            ))
        })
}

fn required_string(dict: &Dict, key: &[u8]) -> Result<Vec<u8>> {
    dict.get_string(key)
        .map(|s| s.as_bytes().to_vec())
        .ok_or_else(|| {
            Error::Encryption(format!(
                "missing /{} entry",
                String::from_utf8_lossy(key)
            ))
        })
}

/// Resolve `/CF`, `/StmF` and `/StrF` into the methods for strings and
/// streams. Unnamed filters fall back to Identity.
fn crypt_filters(encrypt: &Dict) -> Result<(CryptMethod, CryptMethod)> {
    let lookup = |selector: &[u8]| -> Result<CryptMethod> {
        let name = match encrypt.get_name(selector) {
            Some(name) => name.as_bytes().to_vec(),
            None => return Ok(CryptMethod::Identity),
        };

        if name == b"Identity" {
            return Ok(CryptMethod::Identity);
        }

        let cf = encrypt
            .get_dict(b"CF")
            .and_then(|cf| cf.get_dict(&name))
            .ok_or_else(|| {
                Error::Encryption(format!(
                    "crypt filter /{} is not declared in /CF",
                    String::from_utf8_lossy(&name)
                ))
            })?;

        let cfm = cf
            .get_name(b"CFM")
            .ok_or_else(|| Error::Encryption("crypt filter without /CFM".into()))?;

        CryptMethod::from_cfm(cfm.as_bytes())
            .ok_or_else(|| Error::Unsupported(format!("crypt filter method /{}", cfm.as_str())))
    };

    Ok((lookup(b"StrF")?, lookup(b"StmF")?))
}

fn std_crypt_filter(cfm: &[u8], length: i64) -> Object {
    let mut std_cf = Dict::new();
    std_cf.set(b"AuthEvent", Object::name(b"DocOpen"));
    std_cf.set(b"CFM", Object::name(cfm));
    std_cf.set(keys::LENGTH, Object::Integer(length));

    let mut cf = Dict::new();
    cf.set(b"StdCF", Object::Dict(std_cf));

    Object::Dict(cf)
}

/// Pad or truncate a password to exactly 32 bytes with the canonical padding
/// string.
fn pad_password(pw: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let n = pw.len().min(32);

    out[..n].copy_from_slice(&pw[..n]);
    out[n..].copy_from_slice(&PASSWORD_PADDING[..32 - n]);

    out
}

fn md5(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }

    hasher.finalize().into()
}

/// The RC4 key derived from the owner password (algorithm 3, steps a-d).
fn owner_key(owner_pw: &[u8], revision: u8, n: usize) -> Vec<u8> {
    let padded = pad_password(owner_pw);
    let mut hash = md5(&[&padded]);

    if revision >= 3 {
        for _ in 0..50 {
            hash = md5(&[&hash]);
        }
    }

    hash[..n].to_vec()
}

/// Algorithm 2: the file encryption key for revision 4 and earlier.
fn file_key_legacy(
    padded_pw: &[u8; 32],
    owner_string: &[u8],
    permissions: u32,
    file_id: &[u8],
    revision: u8,
    encrypt_metadata: bool,
    n: usize,
) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(padded_pw);
    hasher.update(owner_string);
    hasher.update(permissions.to_le_bytes());
    // Only the first 16 bytes of the file identifier enter the hash.
    hasher.update(&file_id[..file_id.len().min(16)]);

    if revision >= 4 && !encrypt_metadata {
        hasher.update([0xFF, 0xFF, 0xFF, 0xFF]);
    }

    let mut hash: [u8; 16] = hasher.finalize().into();

    if revision >= 3 {
        for _ in 0..50 {
            hash = md5(&[&hash[..n]]);
        }
    }

    hash[..n].to_vec()
}

/// Algorithm 4: the U entry for revision 2.
fn user_entry_rev2(key: &[u8]) -> Vec<u8> {
    Rc4::new(key).apply(&PASSWORD_PADDING)
}

/// Algorithm 5: the U entry for revision 3 and 4.
fn user_entry_rev34(key: &[u8], file_id: &[u8]) -> Vec<u8> {
    // As in the file key derivation, at most 16 bytes of the identifier.
    let hash = md5(&[&PASSWORD_PADDING, &file_id[..file_id.len().min(16)]]);

    let mut out = Rc4::new(key).apply(&hash);

    for i in 1..=19u8 {
        let step_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
        out = Rc4::new(&step_key).apply(&out);
    }

    out.resize(32, 0);
    out
}

/// Passwords for revision 5/6 enter the hash as UTF-8, truncated to 127
/// bytes.
fn truncate_utf8(pw: &str) -> &[u8] {
    let bytes = pw.as_bytes();
    &bytes[..bytes.len().min(127)]
}

/// Algorithm 2.B: the password hash for revision 5 and 6.
fn hash_rev56(
    revision: u8,
    password: &[u8],
    salt: &[u8],
    user_data: Option<&[u8]>,
) -> Result<[u8; 32]> {
    let mut k: Vec<u8> = {
        let mut hasher = Sha256::new();
        hasher.update(password);
        hasher.update(salt);
        if let Some(user_data) = user_data {
            hasher.update(user_data);
        }

        let hash: [u8; 32] = hasher.finalize().into();

        // Revision 5 stops after the initial hash.
        if revision == 5 {
            return Ok(hash);
        }

        hash.to_vec()
    };

    let mut round: u16 = 0;

    loop {
        // a) 64 repetitions of password || K || (user data).
        let k1 = {
            let mut single = Vec::with_capacity(password.len() + k.len() + 48);
            single.extend_from_slice(password);
            single.extend_from_slice(&k);
            if let Some(user_data) = user_data {
                single.extend_from_slice(user_data);
            }

            single.repeat(64)
        };

        // b) AES-128-CBC with the halves of K as key and IV.
        let e = aes_cbc_encrypt(&k[..16], k[16..32].try_into().unwrap(), &k1, false)?;

        // c) + d) The first 16 bytes of E modulo 3 select the next hash.
        let selector = e[..16].iter().fold(0u32, |acc, b| (acc + *b as u32) % 3);

        k = match selector {
            0 => Sha256::digest(&e).to_vec(),
            1 => Sha384::digest(&e).to_vec(),
            _ => Sha512::digest(&e).to_vec(),
        };

        round += 1;

        // e) + f) After 64 rounds, continue until the last byte of E is at
        // most round - 32.
        if round > 63 && (*e.last().unwrap() as u16) <= round - 32 {
            break;
        }
    }

    Ok(k[..32].try_into().unwrap())
}

/// Recover the 32-byte file key from UE or OE with the intermediate key.
fn unwrap_file_key(intermediate: &[u8; 32], wrapped: &[u8]) -> Result<Vec<u8>> {
    if wrapped.len() != 32 {
        return Err(Error::Encryption("UE/OE entry is not 32 bytes".into()));
    }

    aes_cbc_decrypt(intermediate, &[0u8; 16], wrapped, false)
}

/// Decrypt the Perms entry, returning the embedded P value if the marker
/// bytes check out.
fn decode_perms(key: &[u8], perms: &[u8]) -> Option<u32> {
    let cipher = aes::Aes256::new_from_slice(key).ok()?;
    let mut block = GenericArray::clone_from_slice(perms.get(..16)?);
    cipher.decrypt_block(&mut block);

    if &block[9..12] != b"adb" {
        return None;
    }

    Some(u32::from_le_bytes(block[..4].try_into().ok()?))
}

fn aes_cbc_encrypt(key: &[u8], iv: &[u8; 16], data: &[u8], pad: bool) -> Result<Vec<u8>> {
    let bad_key = || Error::Encryption("invalid AES key length".into());

    match (key.len(), pad) {
        (16, true) => Ok(Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .encrypt_padded_vec_mut::<Pkcs7>(data)),
        (16, false) => Ok(Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .encrypt_padded_vec_mut::<NoPadding>(data)),
        (32, true) => Ok(Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .encrypt_padded_vec_mut::<Pkcs7>(data)),
        (32, false) => Ok(Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .encrypt_padded_vec_mut::<NoPadding>(data)),
        _ => Err(bad_key()),
    }
}

fn aes_cbc_decrypt(key: &[u8], iv: &[u8; 16], data: &[u8], pad: bool) -> Result<Vec<u8>> {
    let bad_key = || Error::Encryption("invalid AES key length".into());
    let bad_pad = |_| Error::Encryption("invalid AES padding".into());

    match (key.len(), pad) {
        (16, true) => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(bad_pad),
        (16, false) => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .decrypt_padded_vec_mut::<NoPadding>(data)
            .map_err(bad_pad),
        (32, true) => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(bad_pad),
        (32, false) => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .decrypt_padded_vec_mut::<NoPadding>(data)
            .map_err(bad_pad),
        _ => Err(bad_key()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PERMISSIONS_NONE;

    const FILE_ID: &[u8] = b"\x01\x23\x45\x67\x89\xAB\xCD\xEF\x01\x23\x45\x67\x89\xAB\xCD\xEF";

    fn rc4_config(user: &str, owner: &str, bits: u16) -> Configuration {
        Configuration::new_rc4(user, owner, bits)
    }

    fn aes_config(user: &str, owner: &str, bits: u16) -> Configuration {
        Configuration::new_aes(user, owner, bits)
    }

    #[test]
    fn pad_password_lengths() {
        assert_eq!(pad_password(b""), PASSWORD_PADDING);

        let padded = pad_password(b"user");
        assert_eq!(&padded[..4], b"user");
        assert_eq!(&padded[4..], &PASSWORD_PADDING[..28]);

        let long = [b'x'; 40];
        assert_eq!(pad_password(&long), [b'x'; 32]);
    }

    fn check_round_trip(config: &Configuration) {
        let (mut handler, dict) = SecurityHandler::create(config, FILE_ID).unwrap();

        let id = ObjectId::new(7, 0);
        let data = b"some protected content";

        let encrypted = handler.encrypt(id, data, CryptTarget::Stream).unwrap();
        assert_ne!(&encrypted, data);

        // A fresh handler opened with the user password inverts it.
        let mut reader =
            SecurityHandler::open(&dict, FILE_ID, &config.user_pw, "").unwrap();
        assert!(!reader.owner_authenticated());
        assert_eq!(
            reader.decrypt(id, &encrypted, CryptTarget::Stream).unwrap(),
            data
        );

        // The owner password unlocks everything regardless of P.
        let mut owner =
            SecurityHandler::open(&dict, FILE_ID, "", &config.owner_pw).unwrap();
        assert!(owner.owner_authenticated());
        assert_eq!(owner.permissions(), 0xFFFF_FFFF);
        assert_eq!(
            owner.decrypt(id, &encrypted, CryptTarget::Stream).unwrap(),
            data
        );

        // A wrong password has to be rejected.
        assert!(matches!(
            SecurityHandler::open(&dict, FILE_ID, "wrong", "also wrong"),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn rc4_40_round_trip() {
        check_round_trip(&rc4_config("user", "owner", 40));
    }

    #[test]
    fn rc4_128_round_trip() {
        check_round_trip(&rc4_config("user", "owner", 128));
    }

    #[test]
    fn aes_128_round_trip() {
        check_round_trip(&aes_config("user", "owner", 128));
    }

    #[test]
    fn aes_256_round_trip() {
        check_round_trip(&aes_config("pw", "opw", 256));
    }

    #[test]
    fn empty_user_password_opens() {
        let config = aes_config("", "owner", 256);
        let (_, dict) = SecurityHandler::create(&config, FILE_ID).unwrap();

        let handler = SecurityHandler::open(&dict, FILE_ID, "", "").unwrap();
        assert!(!handler.owner_authenticated());
    }

    #[test]
    fn permissions_are_sign_extended() {
        let mut config = rc4_config("u", "o", 128);
        config.permissions = PERMISSIONS_NONE;

        let (handler, dict) = SecurityHandler::create(&config, FILE_ID).unwrap();
        assert_eq!(dict.get_int(b"P"), Some(0xFFFF_F0C3u32 as i32 as i64));
        assert_eq!(handler.permissions, 0xFFFF_F0C3);
    }

    #[test]
    fn rejects_bad_key_lengths() {
        assert!(SecurityHandler::create(&rc4_config("u", "o", 256), FILE_ID).is_err());
        assert!(SecurityHandler::create(&rc4_config("u", "o", 64), FILE_ID).is_err());
        assert!(SecurityHandler::create(&aes_config("u", "o", 99), FILE_ID).is_err());
    }

    #[test]
    fn per_object_keys_differ_and_cache() {
        let config = rc4_config("u", "o", 128);
        let (mut handler, _) = SecurityHandler::create(&config, FILE_ID).unwrap();

        let k1 = handler.object_key(ObjectId::new(1, 0), CryptMethod::Rc4);
        let k2 = handler.object_key(ObjectId::new(2, 0), CryptMethod::Rc4);
        assert_ne!(k1, k2);

        assert_eq!(handler.object_key(ObjectId::new(1, 0), CryptMethod::Rc4), k1);
        assert_eq!(handler.object_keys.len(), 2);
    }

    #[test]
    fn aes_string_payload_carries_iv() {
        let config = aes_config("u", "o", 128);
        let (mut handler, _) = SecurityHandler::create(&config, FILE_ID).unwrap();

        let id = ObjectId::new(3, 0);
        let encrypted = handler.encrypt(id, b"abc", CryptTarget::String).unwrap();

        // 16-byte IV plus one padded block.
        assert_eq!(encrypted.len(), 32);
        assert_eq!(
            handler.decrypt(id, &encrypted, CryptTarget::String).unwrap(),
            b"abc"
        );
    }

    #[test]
    fn rev6_hash_is_stable() {
        // The iterated hash must be deterministic for a fixed input.
        let a = hash_rev56(6, b"pw", b"12345678", None).unwrap();
        let b = hash_rev56(6, b"pw", b"12345678", None).unwrap();
        assert_eq!(a, b);

        let c = hash_rev56(6, b"pw2", b"12345678", None).unwrap();
        assert_ne!(a, c);
    }
}
