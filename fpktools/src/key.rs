// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::Error;

/// Where the key for a signatory or cipher comes from
#[derive(Clone, PartialEq, Eq)]
pub struct KeySource {
    /// Hex-encoded key written directly in the spec
    pub inline: Option<Zeroizing<String>>,
    /// Key file, already resolved against the root directory
    pub file: Option<PathBuf>,
    /// Spec section this source was read from, for error messages
    pub section: &'static str,
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("KeySource")
            .field("inline", &self.inline.as_ref().map(|_| ".."))
            .field("file", &self.file)
            .field("section", &self.section)
            .finish()
    }
}

impl KeySource {
    /// Produces exactly `N` bytes of key material.
    ///
    /// An inline key always wins; if a key file is also named, the inline key
    /// is written to it. Otherwise the key file is read, and if it does not
    /// exist a fresh random key is generated and saved there.
    pub fn resolve<const N: usize>(&self) -> Result<Zeroizing<[u8; N]>, Error> {
        match (&self.inline, &self.file) {
            (Some(text), file) => {
                let key = decode::<N>(text.as_bytes())?;
                if let Some(path) = file {
                    write_key_file(path, key.as_slice())?;
                }
                Ok(key)
            }
            (None, Some(path)) => match std::fs::read(path) {
                Ok(text) => decode::<N>(&Zeroizing::new(text)),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    let mut key = Zeroizing::new([0u8; N]);
                    rand::rng().fill_bytes(key.as_mut_slice());
                    write_key_file(path, key.as_slice())?;
                    tracing::info!(
                        "generated new {}-byte key in {}",
                        N,
                        path.display()
                    );
                    Ok(key)
                }
                Err(source) => Err(Error::KeyRead {
                    path: path.clone(),
                    source,
                }),
            },
            (None, None) => Err(Error::NoKeySource {
                section: self.section,
            }),
        }
    }
}

/// Decodes hex text (surrounding ASCII whitespace ignored) into exactly `N`
/// bytes
pub fn decode<const N: usize>(text: &[u8]) -> Result<Zeroizing<[u8; N]>, Error> {
    let start = text
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(text.len());
    let end = text
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);

    let bytes = Zeroizing::new(
        hex::decode(&text[start..end]).map_err(Error::InvalidKey)?,
    );
    if bytes.len() != N {
        return Err(Error::WrongKeyLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut key = Zeroizing::new([0u8; N]);
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Replaces `path` with the hex-encoded key.
///
/// The key is staged in a uniquely named sibling file, which is created
/// owner-only before anything is written to it, then renamed over `path`.
fn write_key_file(path: &Path, key: &[u8]) -> Result<(), Error> {
    let err = |source| Error::KeyWrite {
        path: path.to_owned(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut staging = NamedTempFile::new_in(dir).map_err(err)?;

    let text = Zeroizing::new(hex::encode(key));
    staging.write_all(text.as_bytes()).map_err(err)?;
    staging.write_all(b"\n").map_err(err)?;
    staging.as_file().sync_all().map_err(err)?;
    // A failed persist drops, and so removes, the staging file
    staging.persist(path).map_err(|e| err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(inline: Option<&str>, file: Option<PathBuf>) -> KeySource {
        KeySource {
            inline: inline.map(|s| Zeroizing::new(s.to_owned())),
            file,
            section: "signature",
        }
    }

    #[test]
    fn decode_exact_length() {
        let key = decode::<16>(b"000102030405060708090a0b0c0d0e0f").unwrap();
        assert_eq!(key[15], 0x0f);

        let key = decode::<16>(b" 000102030405060708090A0B0C0D0E0F\r\n").unwrap();
        assert_eq!(key[10], 0x0a);
    }

    #[test]
    fn decode_wrong_length() {
        for len in [0, 1, 15, 17] {
            assert!(matches!(
                decode::<16>("00".repeat(len).as_bytes()),
                Err(Error::WrongKeyLength { expected: 16, .. })
            ));
        }
        // Odd number of digits is never valid hex
        assert!(matches!(
            decode::<16>("0".repeat(31).as_bytes()),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn decode_bad_hex() {
        let text = format!("zz{}", "00".repeat(31));
        assert!(matches!(decode::<32>(text.as_bytes()), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn no_source() {
        let err = source(None, None).resolve::<32>().unwrap_err();
        assert!(matches!(err, Error::NoKeySource { section: "signature" }));
    }

    #[test]
    fn inline_key_is_written_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k");
        std::fs::write(&path, "old contents").unwrap();

        let hex = "ab".repeat(16);
        let key = source(Some(&hex), Some(path.clone()))
            .resolve::<16>()
            .unwrap();
        assert_eq!(*key, [0xab; 16]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), hex + "\n");
    }

    #[test]
    fn inline_key_without_file() {
        let key = source(Some(&"01".repeat(32)), None)
            .resolve::<32>()
            .unwrap();
        assert_eq!(*key, [1; 32]);
    }

    #[test]
    fn reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k");
        std::fs::write(&path, format!("{}\n", "7F".repeat(32))).unwrap();

        let key = source(None, Some(path)).resolve::<32>().unwrap();
        assert_eq!(*key, [0x7f; 32]);
    }

    #[test]
    fn existing_file_with_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k");
        std::fs::write(&path, "00".repeat(16)).unwrap();

        let err = source(None, Some(path)).resolve::<32>().unwrap_err();
        assert!(matches!(
            err,
            Error::WrongKeyLength {
                expected: 32,
                actual: 16
            }
        ));
    }

    #[test]
    fn generates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k");

        let key = source(None, Some(path.clone())).resolve::<32>().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.len(), 65);
        assert_eq!(decode::<32>(text.as_bytes()).unwrap(), key);
        // Only the key file itself is left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        // A second resolution reuses the key rather than generating anew
        let again = source(None, Some(path)).resolve::<32>().unwrap();
        assert_eq!(again, key);
    }

    #[cfg(unix)]
    #[test]
    fn generated_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k");
        source(None, Some(path.clone())).resolve::<16>().unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn rewritten_file_drops_loose_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k");
        std::fs::write(&path, "").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .unwrap();

        source(Some(&"00".repeat(16)), Some(path.clone()))
            .resolve::<16>()
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[test]
    fn non_utf8_key_file_is_invalid_hex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k");
        std::fs::write(&path, [0xff; 64]).unwrap();

        let err = source(None, Some(path)).resolve::<32>().unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }

    #[test]
    fn staging_leaves_neighbours_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k");
        let neighbour = dir.path().join("k.tmp");
        std::fs::write(&neighbour, "not ours").unwrap();

        source(None, Some(path.clone())).resolve::<16>().unwrap();
        source(Some(&"00".repeat(16)), Some(path))
            .resolve::<16>()
            .unwrap();
        assert_eq!(std::fs::read_to_string(&neighbour).unwrap(), "not ours");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn unreadable_key_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory exists but cannot be read as text
        let err = source(None, Some(dir.path().to_owned()))
            .resolve::<16>()
            .unwrap_err();
        assert!(matches!(err, Error::KeyRead { .. }));
    }
}
