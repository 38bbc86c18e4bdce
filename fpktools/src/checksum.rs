// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Running CRC-32 (the zip/gzip variant) over everything written to it.
///
/// Feeding the same bytes in any number of `update` calls yields the same
/// digest, so the encoder can fold in each segment as it is emitted.
#[derive(Clone, Default)]
pub struct Checksum {
    hasher: crc32fast::Hasher,
}

impl std::fmt::Debug for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Checksum({:#010x})", self.digest())
    }
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns to the initial state, discarding everything folded in so far
    pub fn reset(&mut self) {
        self.hasher.reset();
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update(bytes);
        self
    }

    /// Current value of the checksum; does not disturb the running state
    pub fn digest(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// The digest as serialized into the container epilogue
    pub fn to_le_bytes(&self) -> [u8; 4] {
        self.digest().to_le_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_zip_crc32() {
        let mut crc = Checksum::new();
        crc.update(b"123456789");
        assert_eq!(crc.digest(), 0xcbf4_3926);
        assert_eq!(crc.to_le_bytes(), [0x26, 0x39, 0xf4, 0xcb]);
    }

    #[test]
    fn empty_input() {
        assert_eq!(Checksum::new().digest(), 0);
    }

    #[test]
    fn chunking_does_not_matter() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut whole = Checksum::new();
        whole.update(&data);

        for chunk_size in [1, 3, 16, 17, 999] {
            let mut split = Checksum::new();
            for chunk in data.chunks(chunk_size) {
                split.update(chunk);
            }
            assert_eq!(split.digest(), whole.digest(), "chunks of {chunk_size}");
        }
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut crc = Checksum::new();
        crc.update(b"some bytes");
        let first = crc.digest();

        crc.update(b"and more");
        crc.reset();
        assert_eq!(crc.digest(), Checksum::new().digest());

        crc.update(b"some bytes");
        assert_eq!(crc.digest(), first);
    }
}
