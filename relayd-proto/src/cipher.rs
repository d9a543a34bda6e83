//! Keyed byte-level cipher used to obscure tunnel frame bodies.
//!
//! `cipher[i] = data[i] ^ key[i % key_len] ^ modifier(i)`
//!
//! This is a symmetric, length-preserving transform keyed solely by the shared
//! token — it is **not** an authenticated cipher and carries no message-integrity
//! guarantee. That is a deliberate wire-compatibility property, not an omission:
//! reimplementations must preserve it rather than silently upgrade to an AEAD.

/// modifier(i) = substitution_table[(i + salt) % 256], table derived from the key.
#[derive(Clone)]
pub struct Cipher {
    key: Vec<u8>,
    salt: u32,
    sub_table: [u8; 256],
}

impl Cipher {
    /// Builds a cipher from the raw shared token. `key` must not be empty.
    pub fn new(key: Vec<u8>) -> Self {
        assert!(!key.is_empty(), "cipher key must not be empty");
        let salt = key.iter().fold(0x9e3779b9u32, |acc, &b| {
            acc.wrapping_mul(0x01000193).wrapping_add(b as u32)
        });

        let mut sub_table = [0u8; 256];
        let mut state = salt;
        for (i, entry) in sub_table.iter_mut().enumerate() {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            state ^= key[i % key.len()] as u32;
            *entry = (state >> 16) as u8;
        }

        Self {
            key,
            salt,
            sub_table,
        }
    }

    #[inline]
    fn modifier(&self, i: usize) -> u8 {
        self.sub_table[i.wrapping_add(self.salt as usize) % 256]
    }

    /// Apply (or remove, the transform is its own inverse) the cipher in place.
    pub fn apply(&self, data: &mut [u8]) {
        let key_len = self.key.len();
        for (i, byte) in data.iter_mut().enumerate() {
            let key_byte = self.key[i % key_len];
            *byte ^= key_byte ^ self.modifier(i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let cipher = Cipher::new(b"shared-token-1234567890".to_vec());
        let original = b"Hello, World! This is a test payload.".to_vec();
        let mut data = original.clone();

        cipher.apply(&mut data);
        assert_ne!(data, original);

        cipher.apply(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn wrong_key_does_not_roundtrip() {
        let a = Cipher::new(b"correct-key".to_vec());
        let b = Cipher::new(b"wrong---key".to_vec());

        let original = b"secret payload".to_vec();
        let mut data = original.clone();
        a.apply(&mut data);
        b.apply(&mut data);
        assert_ne!(data, original);
    }

    #[test]
    fn length_preserving() {
        let cipher = Cipher::new(b"k".to_vec());
        let mut data = vec![0u8; 513];
        let len_before = data.len();
        cipher.apply(&mut data);
        assert_eq!(data.len(), len_before);
    }
}
