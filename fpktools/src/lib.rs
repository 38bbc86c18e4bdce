// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tools for building FPK containers: one or more firmware images plus
//! metadata, optionally encrypted and signed, sealed with a CRC-32.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod checksum;
pub mod container;
pub mod crypto;
pub mod key;
pub mod spec;

pub use checksum::Checksum;
pub use container::{FpkBuilder, Preamble};
pub use crypto::{Cipher, Signatory};
pub use spec::{Advisory, BuildSpec, Image};

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not parse spec document: {0}")]
    SpecParse(#[source] serde_json::Error),

    #[error("no key source in `{section}`: expected `key` or `key-file`")]
    NoKeySource { section: &'static str },

    #[error("missing required field `{field}`")]
    MissingField { field: String },

    #[error("unknown {family} method `{name}`")]
    UnknownMethod { family: &'static str, name: String },

    #[error("field `{field}` must be {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
    },

    #[error("invalid key: {0}")]
    InvalidKey(#[source] hex::FromHexError),

    #[error("wrong key length: expected {expected} bytes, got {actual}")]
    WrongKeyLength { expected: usize, actual: usize },

    #[error("{what} {value:?} is too long ({len} bytes, max {max})")]
    TooLong {
        what: &'static str,
        value: String,
        len: usize,
        max: usize,
    },

    #[error("too many {what} ({count}, max {max})")]
    TooMany {
        what: &'static str,
        count: usize,
        max: usize,
    },

    #[error("image id must not be empty")]
    EmptyImageId,

    #[error("image `{id}` is too large ({len} bytes)")]
    ImageTooLarge { id: String, len: usize },

    #[error("build timestamp {0} does not fit in 32 bits")]
    TimestampOutOfRange(u64),

    #[error("system clock is before the Unix epoch")]
    ClockBeforeEpoch(#[source] std::time::SystemTimeError),

    #[error("image file {} not found", .path.display())]
    ImageNotFound { path: PathBuf },

    #[error("could not read image file {}: {source}", .path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read key file {}: {source}", .path.display())]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write key file {}: {source}", .path.display())]
    KeyWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read spec file {}: {source}", .path.display())]
    SpecRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write output file {}: {source}", .path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload is {0} bytes, which is not a multiple of the block size")]
    MisalignedPayload(usize),

    #[error("payload of {0} bytes exceeds the block count field")]
    PayloadTooLarge(usize),

    #[error("{method} rejected its key")]
    CryptoKey { method: &'static str },
}

/// Broad classes of failure, for callers that want to react differently to
/// a bad spec than to a broken disk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing spec fields, unknown methods
    Config,
    /// Limits exceeded, type mismatches, bad key material
    Validation,
    /// Filesystem failures
    Io,
    /// Broken encoder invariants or host clock; never the spec author's fault
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SpecParse(..)
            | Error::NoKeySource { .. }
            | Error::MissingField { .. }
            | Error::UnknownMethod { .. } => ErrorKind::Config,

            Error::TypeMismatch { .. }
            | Error::InvalidKey(..)
            | Error::WrongKeyLength { .. }
            | Error::TooLong { .. }
            | Error::TooMany { .. }
            | Error::EmptyImageId
            | Error::ImageTooLarge { .. }
            | Error::TimestampOutOfRange(..) => ErrorKind::Validation,

            Error::ImageNotFound { .. }
            | Error::ImageRead { .. }
            | Error::KeyRead { .. }
            | Error::KeyWrite { .. }
            | Error::SpecRead { .. }
            | Error::OutputWrite { .. }
            | Error::Io(..) => ErrorKind::Io,

            Error::MisalignedPayload(..)
            | Error::PayloadTooLarge(..)
            | Error::ClockBeforeEpoch(..)
            | Error::CryptoKey { .. } => ErrorKind::Internal,
        }
    }
}

/// Joins `path` onto `root` unless it is already absolute
pub(crate) fn resolve_path(root: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_owned()
    } else {
        root.join(path)
    }
}

/// Reads the spec at `spec_file`, builds the container in memory and only
/// then writes it to `fpk_file`.
///
/// Relative image and key-file paths are resolved against `root_dir`. If
/// `timestamp` is `None`, the current time is stamped into the preamble.
pub fn pack(
    spec_file: &Path,
    fpk_file: &Path,
    root_dir: &Path,
    timestamp: Option<u64>,
) -> Result<(), Error> {
    let text =
        std::fs::read_to_string(spec_file).map_err(|source| Error::SpecRead {
            path: spec_file.to_owned(),
            source,
        })?;
    let spec = BuildSpec::from_json(&text, root_dir)?;

    let mut builder = FpkBuilder::new(spec);
    if let Some(t) = timestamp {
        let t = u32::try_from(t).map_err(|_| Error::TimestampOutOfRange(t))?;
        builder.timestamp(t);
    }
    let fpk = builder.build_to_vec()?;

    std::fs::write(fpk_file, &fpk).map_err(|source| Error::OutputWrite {
        path: fpk_file.to_owned(),
        source,
    })?;
    tracing::debug!("wrote {} bytes to {}", fpk.len(), fpk_file.display());
    Ok(())
}
