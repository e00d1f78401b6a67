//! Blocos da rede Umbra
//!
//! O cabeçalho é fixo (versões, timestamp, hash anterior, nonce de 4 bytes);
//! a partir da versão 2 um bloco pai embutido permite mineração mesclada. O
//! corpo é a transação base mais a lista ordenada dos hashes das transações
//! incluídas. `CachedBlock` memoiza as formas binárias de hashing, o hash do
//! bloco, o hash longo (PoW) e o índice.

use crate::pow;
use crate::serialization::{
    varint_len, write_varint, BinaryReader, ConsensusDecode, ConsensusEncode,
};
use crate::transaction::{Transaction, TransactionInput};
use serde::{Deserialize, Serialize};
use shared::{Hash256, NodeError, Result};
use std::sync::OnceLock;

/// Versão principal inaugural
pub const BLOCK_MAJOR_VERSION_1: u8 = 1;
/// Versão principal que introduz o bloco pai de mineração mesclada
pub const BLOCK_MAJOR_VERSION_2: u8 = 2;

/// Tamanho máximo do bloco pai serializado, em bytes
pub const PARENT_BLOCK_SIZE_LIMIT: u64 = 2048;

/// Bloco pai embutido para mineração mesclada (versão ≥ 2)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentBlock {
    pub major_version: u8,
    pub minor_version: u8,
    pub previous_block_hash: Hash256,
    pub transaction_count: u16,
    pub base_transaction: Transaction,
}

impl ConsensusEncode for ParentBlock {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        write_varint(out, u64::from(self.major_version));
        write_varint(out, u64::from(self.minor_version));
        out.extend_from_slice(self.previous_block_hash.as_bytes());
        write_varint(out, u64::from(self.transaction_count));
        self.base_transaction.consensus_encode(out);
    }
}

impl ConsensusDecode for ParentBlock {
    fn consensus_decode(reader: &mut BinaryReader<'_>) -> Result<Self> {
        let major_version = reader.read_varint()? as u8;
        let minor_version = reader.read_varint()? as u8;
        let previous_block_hash = reader.read_hash()?;
        let transaction_count = u16::try_from(reader.read_varint()?).map_err(|_| {
            NodeError::SerializationError(
                "Contagem de transações do bloco pai fora do intervalo".to_string(),
            )
        })?;
        let base_transaction = Transaction::consensus_decode(reader)?;

        Ok(Self {
            major_version,
            minor_version,
            previous_block_hash,
            transaction_count,
            base_transaction,
        })
    }
}

/// Template de bloco: cabeçalho, transação base e hashes incluídos
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub major_version: u8,
    pub minor_version: u8,
    pub timestamp: u64,
    pub previous_block_hash: Hash256,
    /// Nonce de mineração, largura fixa de 4 bytes
    pub nonce: u32,
    /// Presente somente a partir da versão 2
    pub parent_block: Option<ParentBlock>,
    pub base_transaction: Transaction,
    pub transaction_hashes: Vec<Hash256>,
}

impl BlockTemplate {
    /// Bytes do cabeçalho usados no hashing
    #[must_use]
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(48);
        write_varint(&mut out, u64::from(self.major_version));
        write_varint(&mut out, u64::from(self.minor_version));
        write_varint(&mut out, self.timestamp);
        out.extend_from_slice(self.previous_block_hash.as_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out
    }
}

impl ConsensusEncode for BlockTemplate {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header_bytes());
        if self.major_version >= BLOCK_MAJOR_VERSION_2 {
            if let Some(parent) = &self.parent_block {
                parent.consensus_encode(out);
            } else {
                ParentBlock::default().consensus_encode(out);
            }
        }
        self.base_transaction.consensus_encode(out);
        write_varint(out, self.transaction_hashes.len() as u64);
        for hash in &self.transaction_hashes {
            out.extend_from_slice(hash.as_bytes());
        }
    }
}

impl ConsensusDecode for BlockTemplate {
    fn consensus_decode(reader: &mut BinaryReader<'_>) -> Result<Self> {
        let major_version = reader.read_varint()? as u8;
        let minor_version = reader.read_varint()? as u8;
        let timestamp = reader.read_varint()?;
        let previous_block_hash = reader.read_hash()?;
        let nonce = reader.read_u32_le()?;

        let parent_block = if major_version >= BLOCK_MAJOR_VERSION_2 {
            Some(ParentBlock::consensus_decode(reader)?)
        } else {
            None
        };

        let base_transaction = Transaction::consensus_decode(reader)?;

        let hash_count = reader.read_varint()? as usize;
        let mut transaction_hashes = Vec::with_capacity(hash_count.min(4096));
        for _ in 0..hash_count {
            transaction_hashes.push(reader.read_hash()?);
        }

        Ok(Self {
            major_version,
            minor_version,
            timestamp,
            previous_block_hash,
            nonce,
            parent_block,
            base_transaction,
            transaction_hashes,
        })
    }
}

/// Bloco serializado acompanhado dos corpos das suas transações, na ordem
/// declarada em `transaction_hashes`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlock {
    pub block: Vec<u8>,
    pub transactions: Vec<Vec<u8>>,
}

/// Árvore de hashes do CryptoNote
///
/// Dobra a lista para a maior potência de dois abaixo do tamanho e reduz
/// pares com Keccak-256 até restar a raiz.
#[must_use]
pub fn tree_hash(hashes: &[Hash256]) -> Hash256 {
    fn hash_pair(a: &Hash256, b: &Hash256) -> Hash256 {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(a.as_bytes());
        data.extend_from_slice(b.as_bytes());
        Hash256::keccak256(&data)
    }

    match hashes.len() {
        0 => Hash256::zero(),
        1 => hashes[0],
        2 => hash_pair(&hashes[0], &hashes[1]),
        count => {
            let mut cnt = 1usize;
            while cnt * 2 < count {
                cnt *= 2;
            }

            let mut level: Vec<Hash256> = hashes[..2 * cnt - count].to_vec();
            let mut i = 2 * cnt - count;
            while i < count {
                level.push(hash_pair(&hashes[i], &hashes[i + 1]));
                i += 2;
            }

            while level.len() > 1 {
                let mut next = Vec::with_capacity(level.len() / 2);
                for pair in level.chunks(2) {
                    next.push(hash_pair(&pair[0], &pair[1]));
                }
                level = next;
            }

            level[0]
        }
    }
}

/// Prefixo de domínio do aninhamento do bloco pai (versão ≥ 2)
fn parent_nesting_domain() -> Hash256 {
    static DOMAIN: OnceLock<Hash256> = OnceLock::new();
    *DOMAIN.get_or_init(|| Hash256::keccak256(b"umbra.parent_block.nesting"))
}

/// Bloco com formas de hashing memoizadas
#[derive(Debug, Clone)]
pub struct CachedBlock {
    block: BlockTemplate,
    block_binary: OnceLock<Vec<u8>>,
    hashing_blob: OnceLock<Vec<u8>>,
    parent_binary: OnceLock<Vec<u8>>,
    transaction_tree_hash: OnceLock<Hash256>,
    block_hash: OnceLock<Hash256>,
    long_hash: OnceLock<Hash256>,
    auxiliary_hash: OnceLock<Hash256>,
    block_index: OnceLock<u32>,
}

impl CachedBlock {
    #[must_use]
    pub fn new(block: BlockTemplate) -> Self {
        Self {
            block,
            block_binary: OnceLock::new(),
            hashing_blob: OnceLock::new(),
            parent_binary: OnceLock::new(),
            transaction_tree_hash: OnceLock::new(),
            block_hash: OnceLock::new(),
            long_hash: OnceLock::new(),
            auxiliary_hash: OnceLock::new(),
            block_index: OnceLock::new(),
        }
    }

    /// Desserializa e embrulha, preservando os bytes originais
    ///
    /// # Errors
    ///
    /// Retorna erro se os bytes não formarem um template válido
    pub fn from_binary(data: &[u8]) -> Result<Self> {
        let block = BlockTemplate::from_binary(data)?;
        let cached = Self::new(block);
        let _ = cached.block_binary.set(data.to_vec());
        Ok(cached)
    }

    #[must_use]
    pub const fn block(&self) -> &BlockTemplate {
        &self.block
    }

    /// Forma binária completa do template
    #[must_use]
    pub fn block_binary(&self) -> &[u8] {
        self.block_binary.get_or_init(|| self.block.to_binary())
    }

    /// Raiz da árvore de hashes: transação base seguida das incluídas
    #[must_use]
    pub fn transaction_tree_hash(&self) -> Hash256 {
        *self.transaction_tree_hash.get_or_init(|| {
            let mut hashes = Vec::with_capacity(1 + self.block.transaction_hashes.len());
            hashes.push(self.block.base_transaction.hash());
            hashes.extend_from_slice(&self.block.transaction_hashes);
            tree_hash(&hashes)
        })
    }

    /// Forma binária do bloco pai embutido (vazia na versão 1)
    #[must_use]
    pub fn parent_block_binary(&self) -> &[u8] {
        self.parent_binary.get_or_init(|| {
            self.block
                .parent_block
                .as_ref()
                .map(ConsensusEncode::to_binary)
                .unwrap_or_default()
        })
    }

    /// Vetor binário de hashing do bloco
    ///
    /// Cabeçalho, raiz da árvore de transações e contagem; na versão ≥ 2 o
    /// conjunto é prefixado pelo domínio de aninhamento e sufixado pelo
    /// bloco pai serializado.
    #[must_use]
    pub fn hashing_blob(&self) -> &[u8] {
        self.hashing_blob.get_or_init(|| {
            let mut blob = Vec::new();
            if self.block.major_version >= BLOCK_MAJOR_VERSION_2 {
                blob.extend_from_slice(parent_nesting_domain().as_bytes());
            }
            blob.extend_from_slice(&self.block.header_bytes());
            blob.extend_from_slice(self.transaction_tree_hash().as_bytes());
            write_varint(&mut blob, self.block.transaction_hashes.len() as u64 + 1);
            if self.block.major_version >= BLOCK_MAJOR_VERSION_2 {
                blob.extend_from_slice(self.parent_block_binary());
            }
            blob
        })
    }

    /// Hash de identidade do bloco
    ///
    /// Keccak-256 sobre o vetor de hashing prefixado pelo seu comprimento.
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        *self.block_hash.get_or_init(|| {
            let blob = self.hashing_blob();
            let mut prefixed = Vec::with_capacity(blob.len() + varint_len(blob.len() as u64));
            write_varint(&mut prefixed, blob.len() as u64);
            prefixed.extend_from_slice(blob);
            Hash256::keccak256(&prefixed)
        })
    }

    /// Hash longo de prova de trabalho
    #[must_use]
    pub fn long_hash(&self) -> Hash256 {
        *self.long_hash.get_or_init(|| {
            pow::pow_hash_for_height(
                self.hashing_blob(),
                self.block_index(),
                self.block.major_version,
            )
        })
    }

    /// Hash auxiliar do cabeçalho pai (igual ao hash do bloco na versão 1)
    #[must_use]
    pub fn auxiliary_block_header_hash(&self) -> Hash256 {
        *self.auxiliary_hash.get_or_init(|| {
            if self.block.major_version >= BLOCK_MAJOR_VERSION_2 {
                Hash256::keccak256(self.parent_block_binary())
            } else {
                self.hash()
            }
        })
    }

    /// Índice do bloco, extraído da entrada base
    #[must_use]
    pub fn block_index(&self) -> u32 {
        *self.block_index.get_or_init(|| {
            match self.block.base_transaction.prefix.inputs.first() {
                Some(TransactionInput::Base(base)) => base.block_index,
                _ => 0,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{BaseInput, KeyOutput, TransactionOutput, TransactionOutputTarget};
    use shared::PublicKey;

    fn sample_block(index: u32) -> BlockTemplate {
        BlockTemplate {
            major_version: 1,
            minor_version: 0,
            timestamp: 1000,
            previous_block_hash: Hash256::keccak256(b"anterior"),
            nonce: 42,
            parent_block: None,
            base_transaction: Transaction {
                prefix: crate::transaction::TransactionPrefix {
                    version: 1,
                    unlock_time: u64::from(index) + 40,
                    inputs: vec![TransactionInput::Base(BaseInput { block_index: index })],
                    outputs: vec![TransactionOutput {
                        amount: 100,
                        target: TransactionOutputTarget::Key(KeyOutput {
                            key: PublicKey([3u8; 32]),
                        }),
                    }],
                    extra: vec![],
                },
                signatures: vec![],
            },
            transaction_hashes: vec![],
        }
    }

    #[test]
    fn test_block_binary_round_trip() {
        let block = sample_block(7);
        let decoded = BlockTemplate::from_binary(&block.to_binary()).unwrap();
        assert_eq!(block, decoded);
    }

    #[test]
    fn test_block_hash_depends_on_nonce() {
        let mut block = sample_block(7);
        let first = CachedBlock::new(block.clone()).hash();
        block.nonce += 1;
        let second = CachedBlock::new(block).hash();
        assert_ne!(first, second);
    }

    #[test]
    fn test_block_index_extraction() {
        let cached = CachedBlock::new(sample_block(55));
        assert_eq!(cached.block_index(), 55);
    }

    #[test]
    fn test_tree_hash_sizes() {
        let leaves: Vec<Hash256> = (0u8..6)
            .map(|i| Hash256::keccak256(&[i]))
            .collect();

        assert_eq!(tree_hash(&[]), Hash256::zero());
        assert_eq!(tree_hash(&leaves[..1]), leaves[0]);

        // Raízes distintas para conjuntos distintos
        let mut roots: Vec<Hash256> = (1..=6).map(|n| tree_hash(&leaves[..n])).collect();
        roots.dedup();
        assert_eq!(roots.len(), 6);
    }

    #[test]
    fn test_v2_block_round_trip_with_parent() {
        let mut block = sample_block(3);
        block.major_version = 2;
        block.parent_block = Some(ParentBlock {
            major_version: 1,
            minor_version: 0,
            previous_block_hash: Hash256::keccak256(b"pai"),
            transaction_count: 1,
            base_transaction: Transaction::default(),
        });

        let decoded = BlockTemplate::from_binary(&block.to_binary()).unwrap();
        assert_eq!(block, decoded);
        assert!(!CachedBlock::new(block).parent_block_binary().is_empty());
    }
}
