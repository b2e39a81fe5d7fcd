/*!
A library for reading, validating, transforming and writing PDF files.

`pdfmill` ingests a PDF byte stream, reconstructs its object graph (classical
xref tables, xref streams, hybrid files and incremental updates included),
lets the caller transform that graph, and serializes it back to a conforming
PDF. Streams pass through a composable filter pipeline, and password-protected
documents are handled by the standard security handler in both directions:
existing encryption is opened and re-keyed, new encryption is authored.

The crate implements the document machinery only. Page-level commands
(merging, watermarking, n-up and friends) are transformations a caller applies
to the graph through a [`Context`]; the operations shipped here are the ones
the engine itself needs: [`validate()`], [`optimize`], [`encrypt`],
[`decrypt`] and the password changes.

# Example

```no_run
use pdfmill::{Configuration, Context};

let data = std::fs::read("input.pdf").unwrap();

// Reconstruct the object graph.
let mut ctx = Context::read(data, Configuration::default()).unwrap();

// Check it against the document schema.
let findings = pdfmill::validate(&mut ctx).unwrap();
assert!(findings.is_empty());

// Serialize it back, renumbered and freshly cross referenced.
let out = pdfmill::write_document(&mut ctx).unwrap();
std::fs::write("output.pdf", out).unwrap();
```

# Configuration

Every behavior switch lives in [`Configuration`]: reader features
(`reader15`), validation strictness, writer line endings, object stream and
xref stream emission, encryption parameters and the permission mask. A
[`Context`] snapshots the configuration at construction and never re-reads
it, so independent contexts can run on independent inputs in parallel.
*/

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod context;
mod crypt;
mod error;
pub mod filter;
pub mod object;
mod parse;
pub mod reader;
mod stats;
mod trivia;
pub mod validate;
mod write;
pub mod xref;

pub use config::{CommandMode, Configuration, DisplayUnit, Eol, ValidationMode};
pub use context::Context;
pub use crypt::{CryptTarget, SecurityHandler};
pub use error::{Error, Result};
pub use validate::validate;
pub use write::{write_document, write_to};

use config::CommandMode as Cmd;

/// Read, validate and rewrite a document, dropping unreferenced objects and
/// compressing unfiltered streams.
pub fn optimize(data: Vec<u8>, mut config: Configuration) -> Result<Vec<u8>> {
    config.cmd = Cmd::Optimize;

    let mut ctx = Context::read(data, config)?;
    validate::validate(&mut ctx)?;

    write_document(&mut ctx)
}

/// Encrypt a document with the passwords and parameters of the
/// configuration.
pub fn encrypt(data: Vec<u8>, mut config: Configuration) -> Result<Vec<u8>> {
    config.cmd = Cmd::Encrypt;

    let mut ctx = Context::read(data, config)?;

    write_document(&mut ctx)
}

/// Decrypt a document, emitting an unprotected twin.
pub fn decrypt(data: Vec<u8>, mut config: Configuration) -> Result<Vec<u8>> {
    config.cmd = Cmd::Decrypt;

    let mut ctx = Context::read(data, config)?;

    write_document(&mut ctx)
}

/// Re-key a document with a new user password. The configuration carries the
/// current passwords and `user_pw_new`.
pub fn change_user_password(data: Vec<u8>, mut config: Configuration) -> Result<Vec<u8>> {
    config.cmd = Cmd::ChangeUserPw;

    let mut ctx = Context::read(data, config)?;

    write_document(&mut ctx)
}

/// Re-key a document with a new owner password. The configuration carries
/// the current passwords and `owner_pw_new`.
pub fn change_owner_password(data: Vec<u8>, mut config: Configuration) -> Result<Vec<u8>> {
    config.cmd = Cmd::ChangeOwnerPw;

    let mut ctx = Context::read(data, config)?;

    write_document(&mut ctx)
}
