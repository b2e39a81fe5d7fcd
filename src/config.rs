//! The configuration surface consumed by a [`Context`](crate::Context).
//!
//! A context takes an immutable snapshot of the configuration at construction
//! time and never re-reads it, so callers are free to keep a mutable default
//! configuration around and tweak it between operations.

use std::fmt;

/// The standard stats filename.
pub const STATS_FILE_NAME_DEFAULT: &str = "stats.csv";

/// Enables all user access permission bits.
pub const PERMISSIONS_ALL: i16 = -1; // 0xFFFF

/// Disables all user access permission bits.
pub const PERMISSIONS_NONE: i16 = -3901; // 0xF0C3

/// How strictly the assembled object graph is checked against ISO 32000-1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// 100% compliance with the specification.
    Strict,
    /// Tolerates and repairs frequently encountered validation errors.
    #[default]
    Relaxed,
    /// Bypasses validation.
    None,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMode::Strict => write!(f, "strict"),
            ValidationMode::Relaxed => write!(f, "relaxed"),
            ValidationMode::None => write!(f, "none"),
        }
    }
}

/// The line terminator used by the writer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Eol {
    /// `\n`
    #[default]
    Lf,
    /// `\r`
    Cr,
    /// `\r\n`
    CrLf,
}

impl Eol {
    /// The byte sequence of the line terminator.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Eol::Lf => b"\n",
            Eol::Cr => b"\r",
            Eol::CrLf => b"\r\n",
        }
    }
}

impl fmt::Display for Eol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eol::Lf => write!(f, "EolLF"),
            Eol::Cr => write!(f, "EolCR"),
            Eol::CrLf => write!(f, "EolCRLF"),
        }
    }
}

/// The unit used when echoing paper sizes.
///
/// Carried for the caller's benefit only, the engine itself never measures
/// anything in it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DisplayUnit {
    /// PDF user space units.
    #[default]
    Points,
    /// Inches.
    Inches,
    /// Centimetres.
    Centimetres,
    /// Millimetres.
    Millimetres,
}

impl fmt::Display for DisplayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayUnit::Points => write!(f, "points"),
            DisplayUnit::Inches => write!(f, "inches"),
            DisplayUnit::Centimetres => write!(f, "cm"),
            DisplayUnit::Millimetres => write!(f, "mm"),
        }
    }
}

/// The operation being executed.
///
/// The engine inspects the command only to decide whether a reduced feature
/// set applies; everything else about a command is the caller's concern.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum CommandMode {
    #[default]
    Validate,
    Optimize,
    Split,
    MergeCreate,
    MergeAppend,
    ExtractImages,
    ExtractFonts,
    ExtractPages,
    ExtractContent,
    ExtractMetadata,
    Trim,
    AddAttachments,
    AddAttachmentsPortfolio,
    RemoveAttachments,
    ExtractAttachments,
    ListAttachments,
    SetPermissions,
    ListPermissions,
    Encrypt,
    Decrypt,
    ChangeUserPw,
    ChangeOwnerPw,
    AddWatermarks,
    RemoveWatermarks,
    ImportImages,
    InsertPagesBefore,
    InsertPagesAfter,
    RemovePages,
    Rotate,
    NUp,
    Info,
    InstallFonts,
    ListFonts,
    ListKeywords,
    AddKeywords,
    RemoveKeywords,
    ListProperties,
    AddProperties,
    RemoveProperties,
    Collect,
}

/// Configuration of a [`Context`](crate::Context).
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Enables PDF 1.5 compatible processing of object streams, xref streams
    /// and hybrid PDF files.
    pub reader15: bool,
    /// Enables decoding of all streams (font files, images, ..) at read time,
    /// for diagnostic purposes.
    pub decode_all_streams: bool,
    /// Validate against ISO 32000-1: strict or relaxed.
    pub validation_mode: ValidationMode,
    /// End of line sequence for writing.
    pub eol: Eol,
    /// Turns on object stream generation: any new non-stream object is
    /// compressed into an object stream. `true` enforces `write_xref_stream`.
    pub write_object_stream: bool,
    /// Switches between an xref section (<= 1.4) and an xref stream (>= 1.5)
    /// terminating the written file.
    pub write_xref_stream: bool,
    /// Turns on stats collection.
    pub collect_stats: bool,
    /// A CSV filename receiving the statistics.
    pub stats_file_name: String,
    /// Supplied user password.
    pub user_pw: String,
    /// New user password for rekeying.
    pub user_pw_new: Option<String>,
    /// Supplied owner password.
    pub owner_pw: String,
    /// New owner password for rekeying.
    pub owner_pw_new: Option<String>,
    /// `true`: AES encryption, `false`: RC4 encryption.
    pub encrypt_using_aes: bool,
    /// AES: 40, 128, 256. RC4: 40, 128.
    pub encrypt_key_length: u16,
    /// Supplied user access permissions, see table 22 of the specification.
    pub permissions: i16,
    /// Command being executed.
    pub cmd: CommandMode,
    /// Chosen unit for echoing paper sizes.
    pub units: DisplayUnit,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            reader15: true,
            decode_all_streams: false,
            validation_mode: ValidationMode::Relaxed,
            eol: Eol::Lf,
            write_object_stream: true,
            write_xref_stream: true,
            collect_stats: false,
            stats_file_name: String::new(),
            user_pw: String::new(),
            user_pw_new: None,
            owner_pw: String::new(),
            owner_pw_new: None,
            encrypt_using_aes: true,
            encrypt_key_length: 256,
            permissions: PERMISSIONS_NONE,
            cmd: CommandMode::default(),
            units: DisplayUnit::default(),
        }
    }
}

impl Configuration {
    /// A default configuration for AES encryption.
    pub fn new_aes(user_pw: &str, owner_pw: &str, key_length: u16) -> Self {
        Self {
            user_pw: user_pw.to_string(),
            owner_pw: owner_pw.to_string(),
            encrypt_using_aes: true,
            encrypt_key_length: key_length,
            ..Self::default()
        }
    }

    /// A default configuration for RC4 encryption.
    pub fn new_rc4(user_pw: &str, owner_pw: &str, key_length: u16) -> Self {
        Self {
            user_pw: user_pw.to_string(),
            owner_pw: owner_pw.to_string(),
            encrypt_using_aes: false,
            encrypt_key_length: key_length,
            ..Self::default()
        }
    }

    /// Returns `true` if complex entries like annotations shall not be
    /// written.
    pub fn apply_reduced_feature_set(&self) -> bool {
        matches!(
            self.cmd,
            CommandMode::Split
                | CommandMode::Trim
                | CommandMode::ExtractPages
                | CommandMode::MergeCreate
                | CommandMode::MergeAppend
                | CommandMode::ImportImages
        )
    }

    /// The effective 32-bit permission mask.
    ///
    /// The i16 surface value is sign-extended, so the sentinel `-1` maps to
    /// `0xFFFFFFFF` and `-3901` to `0xFFFFF0C3`.
    pub fn permissions_extended(&self) -> u32 {
        self.permissions as i32 as u32
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "configuration:")?;
        writeln!(f, "Reader15:          {}", self.reader15)?;
        writeln!(f, "DecodeAllStreams:  {}", self.decode_all_streams)?;
        writeln!(f, "ValidationMode:    {}", self.validation_mode)?;
        writeln!(f, "Eol:               {}", self.eol)?;
        writeln!(f, "WriteObjectStream: {}", self.write_object_stream)?;
        writeln!(f, "WriteXRefStream:   {}", self.write_xref_stream)?;
        writeln!(f, "EncryptUsingAES:   {}", self.encrypt_using_aes)?;
        writeln!(f, "EncryptKeyLength:  {}", self.encrypt_key_length)?;
        writeln!(f, "Permissions:       {}", self.permissions)?;
        writeln!(f, "Units:             {}", self.units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduced_feature_set() {
        let mut config = Configuration::default();
        assert!(!config.apply_reduced_feature_set());

        config.cmd = CommandMode::Split;
        assert!(config.apply_reduced_feature_set());

        config.cmd = CommandMode::Encrypt;
        assert!(!config.apply_reduced_feature_set());
    }

    #[test]
    fn permission_sentinels() {
        let mut config = Configuration::default();
        config.permissions = PERMISSIONS_ALL;
        assert_eq!(config.permissions_extended(), 0xFFFF_FFFF);

        config.permissions = PERMISSIONS_NONE;
        assert_eq!(config.permissions_extended(), 0xFFFF_F0C3);
    }
}
