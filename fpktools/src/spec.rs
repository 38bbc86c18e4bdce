// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turns a JSON container spec into validated, typed build inputs.
//!
//! The document looks like this; every top-level section is optional:
//!
//! ```json
//! {
//!     "signature": { "method": "hmac-sha256", "key-file": "sign.key" },
//!     "cipher": { "method": "aes128-cbc", "key": "00112233445566778899aabbccddeeff" },
//!     "metadata": { "board": "gimlet", "revision": 3 },
//!     "images": [ { "id": "boot", "path": "boot.bin" } ]
//! }
//! ```

use std::io::ErrorKind;
use std::path::Path;

use serde_json::{Map, Value};
use zeroize::Zeroizing;

use crate::crypto::{Cipher, Signatory};
use crate::key::KeySource;
use crate::{resolve_path, Error};

/// Longest metadata key, in UTF-8 bytes
pub const MAX_KEY_LEN: usize = 15;
/// Longest metadata value, in UTF-8 bytes
pub const MAX_VALUE_LEN: usize = 63;
/// Longest image id, in UTF-8 bytes
pub const MAX_ID_LEN: usize = 15;
/// Most metadata entries or images in one container
pub const MAX_ENTRIES: usize = u16::MAX as usize;

/// A firmware image, loaded in full
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Non-fatal findings about an otherwise valid spec
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Advisory {
    /// Payload is encrypted but nothing authenticates it
    CipherWithoutSignature,
}

impl std::fmt::Display for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Advisory::CipherWithoutSignature => {
                write!(f, "payload is encrypted but not signed")
            }
        }
    }
}

/// Everything needed to encode a container, already checked against the
/// format's limits.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub signatory: Signatory,
    pub cipher: Cipher,
    /// Metadata in document order; a repeated key keeps its first position
    /// and takes its last value.
    pub metadata: Vec<(String, String)>,
    pub images: Vec<Image>,
}

impl BuildSpec {
    pub fn from_json(text: &str, root: &Path) -> Result<Self, Error> {
        let doc: Value = serde_json::from_str(text).map_err(Error::SpecParse)?;
        Self::from_value(&doc, root)
    }

    /// Validates a parsed document, loading images and resolving keys.
    ///
    /// Relative paths are taken relative to `root`.
    pub fn from_value(doc: &Value, root: &Path) -> Result<Self, Error> {
        let doc = doc.as_object().ok_or_else(|| Error::TypeMismatch {
            field: "(root)".to_owned(),
            expected: "an object",
        })?;

        let signatory = match method_section(doc, Signatory::FAMILY, root)? {
            Some((method, key)) => Signatory::from_method(method, &key)?,
            None => Signatory::None,
        };
        let cipher = match method_section(doc, Cipher::FAMILY, root)? {
            Some((method, key)) => Cipher::from_method(method, &key)?,
            None => Cipher::None,
        };
        tracing::debug!("signature: {}, cipher: {}", signatory.name(), cipher.name());

        let metadata = match doc.get("metadata") {
            Some(m) => metadata(m)?,
            None => vec![],
        };
        let images = match doc.get("images") {
            Some(i) => images(i, root)?,
            None => vec![],
        };

        Ok(Self {
            signatory,
            cipher,
            metadata,
            images,
        })
    }

    pub fn advisories(&self) -> Vec<Advisory> {
        let mut out = vec![];
        if !self.cipher.is_none() && self.signatory.is_none() {
            out.push(Advisory::CipherWithoutSignature);
        }
        out
    }
}

/// Reads a `{ method, key | key-file }` section, if present
fn method_section<'a>(
    doc: &'a Map<String, Value>,
    section: &'static str,
    root: &Path,
) -> Result<Option<(&'a str, KeySource)>, Error> {
    let Some(value) = doc.get(section) else {
        return Ok(None);
    };
    let obj = value.as_object().ok_or_else(|| Error::TypeMismatch {
        field: section.to_owned(),
        expected: "an object",
    })?;

    let method = obj
        .get("method")
        .ok_or_else(|| Error::MissingField {
            field: format!("{section}.method"),
        })?
        .as_str()
        .ok_or_else(|| Error::TypeMismatch {
            field: format!("{section}.method"),
            expected: "a string",
        })?;

    let inline = optional_str(obj, section, "key")?
        .map(|s| Zeroizing::new(s.to_owned()));
    let file = optional_str(obj, section, "key-file")?
        .map(|p| resolve_path(root, p));

    Ok(Some((
        method,
        KeySource {
            inline,
            file,
            section,
        },
    )))
}

fn optional_str<'a>(
    obj: &'a Map<String, Value>,
    section: &str,
    field: &str,
) -> Result<Option<&'a str>, Error> {
    match obj.get(field) {
        None => Ok(None),
        Some(v) => v.as_str().map(Some).ok_or_else(|| Error::TypeMismatch {
            field: format!("{section}.{field}"),
            expected: "a string",
        }),
    }
}

fn check_len(what: &'static str, s: &str, max: usize) -> Result<(), Error> {
    if s.len() > max {
        return Err(Error::TooLong {
            what,
            value: s.to_owned(),
            len: s.len(),
            max,
        });
    }
    Ok(())
}

fn check_count(what: &'static str, count: usize) -> Result<(), Error> {
    if count > MAX_ENTRIES {
        return Err(Error::TooMany {
            what,
            count,
            max: MAX_ENTRIES,
        });
    }
    Ok(())
}

fn metadata(value: &Value) -> Result<Vec<(String, String)>, Error> {
    let map = value.as_object().ok_or_else(|| Error::TypeMismatch {
        field: "metadata".to_owned(),
        expected: "an object",
    })?;
    check_count("metadata entries", map.len())?;

    // Map keys are already unique; a repeated key in the document replaced
    // the earlier value in place while parsing.
    let mut out = Vec::with_capacity(map.len());
    for (k, v) in map {
        check_len("metadata key", k, MAX_KEY_LEN)?;
        let v = match v {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => {
                return Err(Error::TypeMismatch {
                    field: format!("metadata.{k}"),
                    expected: "a string, number or boolean",
                })
            }
        };
        check_len("metadata value", &v, MAX_VALUE_LEN)?;
        out.push((k.clone(), v));
    }
    Ok(out)
}

fn images(value: &Value, root: &Path) -> Result<Vec<Image>, Error> {
    let list = value.as_array().ok_or_else(|| Error::TypeMismatch {
        field: "images".to_owned(),
        expected: "an array",
    })?;
    check_count("images", list.len())?;

    let mut out = Vec::with_capacity(list.len());
    for (i, entry) in list.iter().enumerate() {
        let field = format!("images[{i}]");
        let obj = entry.as_object().ok_or_else(|| Error::TypeMismatch {
            field: field.clone(),
            expected: "an object",
        })?;
        let id = required_str(obj, &field, "id")?;
        if id.is_empty() {
            return Err(Error::EmptyImageId);
        }
        check_len("image id", id, MAX_ID_LEN)?;

        let path = resolve_path(root, required_str(obj, &field, "path")?);
        let data = std::fs::read(&path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                Error::ImageNotFound { path: path.clone() }
            } else {
                Error::ImageRead {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        if u32::try_from(data.len()).is_err() {
            return Err(Error::ImageTooLarge {
                id: id.to_owned(),
                len: data.len(),
            });
        }
        tracing::debug!("loaded image {id:?}: {} bytes", data.len());

        out.push(Image {
            id: id.to_owned(),
            data,
        });
    }
    Ok(out)
}

fn required_str<'a>(
    obj: &'a Map<String, Value>,
    section: &str,
    field: &str,
) -> Result<&'a str, Error> {
    optional_str(obj, section, field)?.ok_or_else(|| Error::MissingField {
        field: format!("{section}.{field}"),
    })
}
