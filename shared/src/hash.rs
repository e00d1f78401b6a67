use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Hash de 256 bits usado para identificar blocos, transações, imagens de
/// chave e IDs de pagamento
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Creates a zeroed hash
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Creates a hash from a 32-byte array
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the hash
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes Keccak-256 hash of the provided data
    ///
    /// Este é o `cn_fast_hash` da rede: todas as identidades de consenso
    /// (hashes de transação, de bloco e de prefixo) derivam dele.
    #[must_use]
    pub fn keccak256(data: &[u8]) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    /// Interpreta o hash como quatro palavras de 64 bits little-endian
    ///
    /// Usado pela verificação de prova de trabalho, que trata o hash longo
    /// como um inteiro de 256 bits.
    #[must_use]
    pub fn as_u64_words(&self) -> [u64; 4] {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&self.0[i * 8..(i + 1) * 8]);
            *word = u64::from_le_bytes(buf);
        }
        words
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Hash256 {
    type Err = crate::NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| crate::NodeError::InvalidHash)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| crate::NodeError::InvalidHash)?;
        Ok(Self(bytes))
    }
}
