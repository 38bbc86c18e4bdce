// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

use crate::crypto::BLOCK_SIZE;
use crate::spec::{Image, MAX_ENTRIES, MAX_ID_LEN, MAX_KEY_LEN, MAX_VALUE_LEN};
use crate::{BuildSpec, Checksum, Error};

pub const MAGIC: [u8; 3] = *b"FPK";
pub const VERSION: u8 = 0;

/// Fixed header at the start of every container, followed by zero padding
/// up to [`BLOCK_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Preamble {
    pub magic: [u8; 3],
    pub version: u8,
    /// Seconds since the Unix epoch
    pub timestamp: U32<LittleEndian>,
    /// Length of the (possibly encrypted) payload in 16-byte blocks
    pub block_count: U32<LittleEndian>,
    pub signature_method: u8,
    pub cipher_method: u8,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PreambleError {
    #[error("container is too short for a preamble ({0} bytes)")]
    TooShort(usize),

    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 3]),

    #[error("unsupported container version {0}")]
    UnsupportedVersion(u8),
}

impl Preamble {
    /// Size of the preamble once padded
    pub const PADDED_LEN: usize = padded_len(std::mem::size_of::<Self>());

    /// Reads the preamble from the front of a container, rejecting anything
    /// that is not a version 0 FPK.
    pub fn parse(bytes: &[u8]) -> Result<Self, PreambleError> {
        let (preamble, _) =
            LayoutVerified::<_, Preamble>::new_unaligned_from_prefix(bytes)
                .ok_or(PreambleError::TooShort(bytes.len()))?;
        let preamble = *preamble;
        if preamble.magic != MAGIC {
            return Err(PreambleError::BadMagic(preamble.magic));
        }
        if preamble.version != VERSION {
            return Err(PreambleError::UnsupportedVersion(preamble.version));
        }
        Ok(preamble)
    }
}

const fn padded_len(len: usize) -> usize {
    (len + BLOCK_SIZE - 1) / BLOCK_SIZE * BLOCK_SIZE
}

/// Zero-pads `buf` out to the next block boundary
fn pad(buf: &mut Vec<u8>) {
    buf.resize(padded_len(buf.len()), 0);
}

/// `FpkBuilder` encodes a validated [`BuildSpec`] into a finished container.
///
/// The layout is the preamble, the payload (metadata block and image list,
/// encrypted if a cipher is configured), the signature over that payload if
/// a signatory is configured, and finally a CRC-32 over everything before
/// it. Every segment is padded to [`BLOCK_SIZE`].
pub struct FpkBuilder {
    spec: BuildSpec,
    timestamp: Option<u32>,
}

impl FpkBuilder {
    pub fn new(spec: BuildSpec) -> Self {
        Self {
            spec,
            timestamp: None,
        }
    }

    /// Pins the build timestamp instead of using the current time.
    pub fn timestamp(&mut self, timestamp: u32) -> &mut Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build<W>(self, mut out: W) -> Result<W, Error>
    where
        W: io::Write,
    {
        let spec = self.spec;
        for advisory in spec.advisories() {
            tracing::warn!("{advisory}");
        }

        let mut payload = Vec::new();
        encode_metadata(&mut payload, &spec.metadata)?;
        encode_images(&mut payload, &spec.images)?;
        pad(&mut payload);
        tracing::debug!("plaintext payload is {} bytes", payload.len());

        let payload = spec.cipher.encrypt(payload)?;
        if payload.len() % BLOCK_SIZE != 0 {
            return Err(Error::MisalignedPayload(payload.len()));
        }
        let block_count = u32::try_from(payload.len() / BLOCK_SIZE)
            .map_err(|_| Error::PayloadTooLarge(payload.len()))?;

        let timestamp = match self.timestamp {
            Some(t) => t,
            None => unix_seconds(SystemTime::now())?,
        };
        let preamble = Preamble {
            magic: MAGIC,
            version: VERSION,
            timestamp: U32::new(timestamp),
            block_count: U32::new(block_count),
            signature_method: spec.signatory.id(),
            cipher_method: spec.cipher.id(),
        };
        let mut header = preamble.as_bytes().to_vec();
        pad(&mut header);

        // The signature covers exactly the payload bytes as emitted, which
        // means the IV and ciphertext when a cipher is configured.
        let signature = spec.signatory.sign(&payload)?;

        let mut crc = Checksum::new();
        crc.update(&header).update(&payload).update(&signature);
        let mut epilogue = crc.to_le_bytes().to_vec();
        pad(&mut epilogue);
        tracing::debug!(
            "{block_count} payload blocks, {}-byte signature, crc {:#010x}",
            signature.len(),
            crc.digest()
        );

        out.write_all(&header)?;
        out.write_all(&payload)?;
        out.write_all(&signature)?;
        out.write_all(&epilogue)?;
        Ok(out)
    }

    pub fn build_to_vec(self) -> Result<Vec<u8>, Error> {
        self.build(Vec::new())
    }
}

/// Converts `time` to the preamble's 32-bit seconds-since-epoch field
fn unix_seconds(time: SystemTime) -> Result<u32, Error> {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map_err(Error::ClockBeforeEpoch)?
        .as_secs();
    u32::try_from(secs).map_err(|_| Error::TimestampOutOfRange(secs))
}

fn encode_count(
    out: &mut Vec<u8>,
    what: &'static str,
    count: usize,
) -> Result<(), Error> {
    let count16 = u16::try_from(count).map_err(|_| Error::TooMany {
        what,
        count,
        max: MAX_ENTRIES,
    })?;
    out.extend_from_slice(&count16.to_le_bytes());
    Ok(())
}

/// Writes a one-byte length followed by the UTF-8 bytes of `s`
fn encode_short_str(
    out: &mut Vec<u8>,
    what: &'static str,
    s: &str,
    max: usize,
) -> Result<(), Error> {
    if s.len() > max {
        return Err(Error::TooLong {
            what,
            value: s.to_owned(),
            len: s.len(),
            max,
        });
    }
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn encode_metadata(
    out: &mut Vec<u8>,
    metadata: &[(String, String)],
) -> Result<(), Error> {
    encode_count(out, "metadata entries", metadata.len())?;
    for (k, v) in metadata {
        encode_short_str(out, "metadata key", k, MAX_KEY_LEN)?;
        encode_short_str(out, "metadata value", v, MAX_VALUE_LEN)?;
    }
    Ok(())
}

fn encode_images(out: &mut Vec<u8>, images: &[Image]) -> Result<(), Error> {
    encode_count(out, "images", images.len())?;
    for image in images {
        encode_short_str(out, "image id", &image.id, MAX_ID_LEN)?;
        let len = u32::try_from(image.data.len()).map_err(|_| {
            Error::ImageTooLarge {
                id: image.id.clone(),
                len: image.data.len(),
            }
        })?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&image.data);
    }
    Ok(())
}
