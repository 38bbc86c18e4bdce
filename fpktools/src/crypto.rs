// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing and encryption methods that may be applied to an FPK payload

use aes::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::key::KeySource;
use crate::Error;

/// AES block size, which is also the container's alignment unit
pub const BLOCK_SIZE: usize = 16;

pub const HMAC_SHA256_KEY_LEN: usize = 32;
pub const HMAC_SHA256_TAG_LEN: usize = 32;
pub const AES128_KEY_LEN: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

/// Produces an authentication tag over the (possibly encrypted) payload
#[derive(Clone)]
pub enum Signatory {
    None,
    HmacSha256 {
        key: Zeroizing<[u8; HMAC_SHA256_KEY_LEN]>,
    },
}

impl Signatory {
    pub const FAMILY: &'static str = "signature";

    pub fn hmac_sha256(key: [u8; HMAC_SHA256_KEY_LEN]) -> Self {
        Signatory::HmacSha256 {
            key: Zeroizing::new(key),
        }
    }

    /// Picks a signatory by method name (case-insensitive), resolving its key
    /// only once the method is known.
    pub fn from_method(method: &str, key: &KeySource) -> Result<Self, Error> {
        match method.to_ascii_lowercase().as_str() {
            "none" => Ok(Signatory::None),
            "hmac-sha256" => Ok(Signatory::HmacSha256 {
                key: key.resolve()?,
            }),
            _ => Err(Error::UnknownMethod {
                family: Self::FAMILY,
                name: method.to_owned(),
            }),
        }
    }

    /// Method id recorded in the preamble
    pub fn id(&self) -> u8 {
        match self {
            Signatory::None => 0,
            Signatory::HmacSha256 { .. } => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Signatory::None => "none",
            Signatory::HmacSha256 { .. } => "hmac-sha256",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Signatory::None)
    }

    /// Computes the signature segment for `data`; empty when unsigned
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Signatory::None => Ok(vec![]),
            Signatory::HmacSha256 { key } => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key.as_slice())
                    .map_err(|_| Error::CryptoKey { method: self.name() })?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }
}

impl std::fmt::Debug for Signatory {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Signatory({})", self.name())
    }
}

/// Encrypts the payload, prepending a fresh IV
#[derive(Clone)]
pub enum Cipher {
    None,
    Aes128Cbc {
        key: Zeroizing<[u8; AES128_KEY_LEN]>,
    },
}

impl Cipher {
    pub const FAMILY: &'static str = "cipher";

    pub fn aes128_cbc(key: [u8; AES128_KEY_LEN]) -> Self {
        Cipher::Aes128Cbc {
            key: Zeroizing::new(key),
        }
    }

    /// Picks a cipher by method name (case-insensitive), resolving its key
    /// only once the method is known.
    pub fn from_method(method: &str, key: &KeySource) -> Result<Self, Error> {
        match method.to_ascii_lowercase().as_str() {
            "none" => Ok(Cipher::None),
            "aes128-cbc" => Ok(Cipher::Aes128Cbc {
                key: key.resolve()?,
            }),
            _ => Err(Error::UnknownMethod {
                family: Self::FAMILY,
                name: method.to_owned(),
            }),
        }
    }

    /// Method id recorded in the preamble
    pub fn id(&self) -> u8 {
        match self {
            Cipher::None => 0,
            Cipher::Aes128Cbc { .. } => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Cipher::None => "none",
            Cipher::Aes128Cbc { .. } => "aes128-cbc",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Cipher::None)
    }

    /// Encrypts `data`, which must already be a whole number of blocks.
    ///
    /// Returns `data` untouched when no cipher is configured, otherwise
    /// `iv || ciphertext` with a freshly generated IV.
    pub fn encrypt(&self, data: Vec<u8>) -> Result<Vec<u8>, Error> {
        if data.len() % BLOCK_SIZE != 0 {
            return Err(Error::MisalignedPayload(data.len()));
        }
        match self {
            Cipher::None => Ok(data),
            Cipher::Aes128Cbc { key } => {
                let mut iv = [0u8; BLOCK_SIZE];
                rand::rng().fill_bytes(&mut iv);
                let enc = Aes128CbcEnc::new_from_slices(key.as_slice(), &iv)
                    .map_err(|_| Error::CryptoKey { method: self.name() })?;

                let mut out = Vec::with_capacity(BLOCK_SIZE + data.len());
                out.extend_from_slice(&iv);
                out.extend(enc.encrypt_padded_vec_mut::<NoPadding>(&data));
                Ok(out)
            }
        }
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Cipher({})", self.name())
    }
}
