//! Cache de cadeia por segmento
//!
//! Um segmento guarda uma faixa contígua de blocos `[start, start+count)` que
//! compartilha história com o segmento pai em `start-1`, junto com os índices
//! por bloco que a validação consulta: imagens de chave gastas, saídas
//! enumeráveis por valor, transações por hash, IDs de pagamento e as somas
//! prefixadas de dificuldade, tamanho e moedas emitidas.
//!
//! O segmento é deliberadamente local: consultas que atravessam a fronteira
//! com o pai são orquestradas pelo núcleo, que conhece a árvore.

use crate::block::RawBlock;
use serde::{Deserialize, Serialize};
use shared::{Hash256, KeyImage, PublicKey};
use std::collections::HashMap;

/// Localização compacta de uma saída dentro do segmento
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedOutIndex {
    pub block_index: u32,
    pub transaction_index: u16,
    pub output_index: u16,
}

/// Metadados memoizados de um bloco do segmento
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedBlockInfo {
    pub block_hash: Hash256,
    pub timestamp: u64,
    /// Soma das dificuldades até este bloco, inclusive
    pub cumulative_difficulty: u64,
    /// Moedas emitidas até este bloco, inclusive
    pub already_generated_coins: u64,
    /// Transações acumuladas até este bloco, inclusive
    pub already_generated_transactions: u64,
    pub block_size: u64,
}

/// Uma saída por chave registrada numa transação
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KeyOutputInfo {
    pub amount: u64,
    pub key: PublicKey,
}

/// Metadados de uma transação confirmada no segmento
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTransactionInfo {
    pub block_index: u32,
    pub transaction_index: u16,
    pub transaction_hash: Hash256,
    pub unlock_time: u64,
    pub is_base: bool,
    pub outputs: Vec<KeyOutputInfo>,
    /// Índice global de cada saída no balde do seu valor
    pub global_indexes: Vec<u32>,
    pub payment_id: Option<Hash256>,
}

/// Registro de uma saída no balde do seu valor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OutputRecord {
    pub global_index: u32,
    pub packed: PackedOutIndex,
    pub key: PublicKey,
    pub unlock_time: u64,
}

/// Dados de uma transação prontos para inserção
#[derive(Debug, Clone)]
pub struct TransactionPushData {
    pub hash: Hash256,
    pub unlock_time: u64,
    pub is_base: bool,
    pub outputs: Vec<KeyOutputInfo>,
    pub global_indexes: Vec<u32>,
    pub key_images: Vec<KeyImage>,
    pub payment_id: Option<Hash256>,
}

/// Dados de um bloco prontos para inserção
#[derive(Debug, Clone)]
pub struct BlockPushData {
    pub block_hash: Hash256,
    pub timestamp: u64,
    pub block_size: u64,
    pub block_difficulty: u64,
    pub emission_change: i64,
    /// Base primeiro, depois as incluídas na ordem do bloco
    pub transactions: Vec<TransactionPushData>,
    pub raw_block: RawBlock,
}

/// Valores cumulativos do bloco imediatamente anterior ao segmento
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChainTail {
    pub cumulative_difficulty: u64,
    pub already_generated_coins: u64,
    pub already_generated_transactions: u64,
}

/// Cache indexado de uma faixa contígua de blocos
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockchainCache {
    start_index: u32,
    block_infos: Vec<CachedBlockInfo>,
    block_tx_hashes: Vec<Vec<Hash256>>,
    raw_blocks: Vec<RawBlock>,
    block_index_by_hash: HashMap<Hash256, u32>,
    transactions: HashMap<Hash256, CachedTransactionInfo>,
    spent_key_images: HashMap<KeyImage, u32>,
    key_outputs: HashMap<u64, Vec<OutputRecord>>,
    payment_ids: HashMap<Hash256, Vec<Hash256>>,
}

impl BlockchainCache {
    #[must_use]
    pub fn new(start_index: u32) -> Self {
        Self {
            start_index,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn start_block_index(&self) -> u32 {
        self.start_index
    }

    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.block_infos.len() as u32
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block_infos.is_empty()
    }

    /// Índice do bloco mais alto; válido somente com blocos presentes
    #[must_use]
    pub fn top_block_index(&self) -> u32 {
        self.start_index + self.block_count() - 1
    }

    #[must_use]
    pub fn top_block_hash(&self) -> Hash256 {
        self.block_infos
            .last()
            .map_or_else(Hash256::zero, |info| info.block_hash)
    }

    #[must_use]
    pub fn contains_index(&self, block_index: u32) -> bool {
        block_index >= self.start_index
            && block_index < self.start_index + self.block_count()
    }

    #[must_use]
    pub fn has_block(&self, block_hash: &Hash256) -> bool {
        self.block_index_by_hash.contains_key(block_hash)
    }

    #[must_use]
    pub fn block_index_of(&self, block_hash: &Hash256) -> Option<u32> {
        self.block_index_by_hash.get(block_hash).copied()
    }

    /// Metadados de um bloco pelo índice absoluto
    #[must_use]
    pub fn block_info(&self, block_index: u32) -> Option<&CachedBlockInfo> {
        let local = self.local_index(block_index)?;
        self.block_infos.get(local)
    }

    #[must_use]
    pub fn block_hash(&self, block_index: u32) -> Option<Hash256> {
        self.block_info(block_index).map(|info| info.block_hash)
    }

    /// Bloco serializado pelo índice absoluto
    #[must_use]
    pub fn raw_block(&self, block_index: u32) -> Option<&RawBlock> {
        let local = self.local_index(block_index)?;
        self.raw_blocks.get(local)
    }

    /// Hashes das transações do bloco, base primeiro
    #[must_use]
    pub fn block_transaction_hashes(&self, block_index: u32) -> Option<&[Hash256]> {
        let local = self.local_index(block_index)?;
        self.block_tx_hashes.get(local).map(Vec::as_slice)
    }

    fn local_index(&self, block_index: u32) -> Option<usize> {
        if self.contains_index(block_index) {
            Some((block_index - self.start_index) as usize)
        } else {
            None
        }
    }

    /// Insere um bloco no topo do segmento
    ///
    /// `tail` carrega os valores cumulativos do bloco anterior (do pai, para
    /// o primeiro bloco do segmento).
    pub fn push_block(&mut self, data: BlockPushData, tail: ChainTail) {
        let block_index = self.start_index + self.block_count();

        let already_generated_coins = if data.emission_change >= 0 {
            tail.already_generated_coins
                .saturating_add(data.emission_change as u64)
        } else {
            tail.already_generated_coins
                .saturating_sub(data.emission_change.unsigned_abs())
        };

        let info = CachedBlockInfo {
            block_hash: data.block_hash,
            timestamp: data.timestamp,
            cumulative_difficulty: tail
                .cumulative_difficulty
                .saturating_add(data.block_difficulty),
            already_generated_coins,
            already_generated_transactions: tail.already_generated_transactions
                + data.transactions.len() as u64,
            block_size: data.block_size,
        };

        let mut tx_hashes = Vec::with_capacity(data.transactions.len());
        for (tx_index, tx) in data.transactions.into_iter().enumerate() {
            tx_hashes.push(tx.hash);

            for key_image in &tx.key_images {
                self.spent_key_images.insert(*key_image, block_index);
            }

            for (output_index, (output, global_index)) in
                tx.outputs.iter().zip(&tx.global_indexes).enumerate()
            {
                self.key_outputs
                    .entry(output.amount)
                    .or_default()
                    .push(OutputRecord {
                        global_index: *global_index,
                        packed: PackedOutIndex {
                            block_index,
                            transaction_index: tx_index as u16,
                            output_index: output_index as u16,
                        },
                        key: output.key,
                        unlock_time: tx.unlock_time,
                    });
            }

            if let Some(payment_id) = tx.payment_id {
                self.payment_ids.entry(payment_id).or_default().push(tx.hash);
            }

            self.transactions.insert(
                tx.hash,
                CachedTransactionInfo {
                    block_index,
                    transaction_index: tx_index as u16,
                    transaction_hash: tx.hash,
                    unlock_time: tx.unlock_time,
                    is_base: tx.is_base,
                    outputs: tx.outputs,
                    global_indexes: tx.global_indexes,
                    payment_id: tx.payment_id,
                },
            );
        }

        self.block_index_by_hash.insert(data.block_hash, block_index);
        self.block_infos.push(info);
        self.block_tx_hashes.push(tx_hashes);
        self.raw_blocks.push(data.raw_block);
    }

    /// Valores cumulativos do topo do segmento
    #[must_use]
    pub fn tail(&self) -> ChainTail {
        self.block_infos.last().map_or_else(ChainTail::default, |info| ChainTail {
            cumulative_difficulty: info.cumulative_difficulty,
            already_generated_coins: info.already_generated_coins,
            already_generated_transactions: info.already_generated_transactions,
        })
    }

    /// Dificuldade cumulativa do topo do segmento
    #[must_use]
    pub fn current_cumulative_difficulty(&self) -> u64 {
        self.block_infos
            .last()
            .map_or(0, |info| info.cumulative_difficulty)
    }

    /// Particiona o segmento em `split_index`
    ///
    /// Os blocos `[start, split_index)` permanecem; `[split_index, fim)` vão
    /// para o segmento superior devolvido, com todos os índices migrados.
    #[must_use]
    pub fn split(&mut self, split_index: u32) -> Self {
        let local = (split_index - self.start_index) as usize;

        let mut upper = Self::new(split_index);
        upper.block_infos = self.block_infos.split_off(local);
        upper.block_tx_hashes = self.block_tx_hashes.split_off(local);
        upper.raw_blocks = self.raw_blocks.split_off(local);

        for hashes in &upper.block_tx_hashes {
            for hash in hashes {
                if let Some(info) = self.transactions.remove(hash) {
                    if let Some(payment_id) = info.payment_id {
                        move_payment_link(&mut self.payment_ids, &mut upper.payment_ids, payment_id, *hash);
                    }
                    upper.transactions.insert(*hash, info);
                }
            }
        }

        let moved_images: Vec<KeyImage> = self
            .spent_key_images
            .iter()
            .filter(|(_, index)| **index >= split_index)
            .map(|(image, _)| *image)
            .collect();
        for image in moved_images {
            if let Some(index) = self.spent_key_images.remove(&image) {
                upper.spent_key_images.insert(image, index);
            }
        }

        let amounts: Vec<u64> = self.key_outputs.keys().copied().collect();
        for amount in amounts {
            if let Some(records) = self.key_outputs.get_mut(&amount) {
                let at = records.partition_point(|record| record.packed.block_index < split_index);
                if at < records.len() {
                    let moved = records.split_off(at);
                    upper.key_outputs.insert(amount, moved);
                }
                if records.is_empty() {
                    self.key_outputs.remove(&amount);
                }
            }
        }

        let moved_blocks: Vec<Hash256> = self
            .block_index_by_hash
            .iter()
            .filter(|(_, index)| **index >= split_index)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in moved_blocks {
            if let Some(index) = self.block_index_by_hash.remove(&hash) {
                upper.block_index_by_hash.insert(hash, index);
            }
        }

        upper
    }

    /// Anexa um segmento filho contíguo a este
    pub fn merge(&mut self, mut other: Self) {
        self.block_infos.append(&mut other.block_infos);
        self.block_tx_hashes.append(&mut other.block_tx_hashes);
        self.raw_blocks.append(&mut other.raw_blocks);
        self.block_index_by_hash.extend(other.block_index_by_hash);
        self.transactions.extend(other.transactions);
        self.spent_key_images.extend(other.spent_key_images);
        for (amount, mut records) in other.key_outputs {
            self.key_outputs.entry(amount).or_default().append(&mut records);
        }
        for (payment_id, mut hashes) in other.payment_ids {
            self.payment_ids.entry(payment_id).or_default().append(&mut hashes);
        }
    }

    /// Verifica se a imagem de chave foi gasta neste segmento até o índice
    #[must_use]
    pub fn is_spent(&self, key_image: &KeyImage, block_index: u32) -> bool {
        self.spent_key_images
            .get(key_image)
            .is_some_and(|spent_at| *spent_at <= block_index)
    }

    #[must_use]
    pub fn has_transaction(&self, transaction_hash: &Hash256) -> bool {
        self.transactions.contains_key(transaction_hash)
    }

    #[must_use]
    pub fn transaction_info(&self, transaction_hash: &Hash256) -> Option<&CachedTransactionInfo> {
        self.transactions.get(transaction_hash)
    }

    /// Corpo serializado de uma transação confirmada
    ///
    /// A transação base é recuperada do template do bloco; as demais, da
    /// lista de corpos do bloco cru.
    #[must_use]
    pub fn raw_transaction(&self, block_index: u32, transaction_index: u16) -> Option<Vec<u8>> {
        use crate::serialization::{ConsensusDecode, ConsensusEncode};

        let raw_block = self.raw_block(block_index)?;
        if transaction_index == 0 {
            let template = crate::block::BlockTemplate::from_binary(&raw_block.block).ok()?;
            Some(template.base_transaction.to_binary())
        } else {
            raw_block
                .transactions
                .get(usize::from(transaction_index) - 1)
                .cloned()
        }
    }

    /// Hashes de todas as transações não-base do segmento
    #[must_use]
    pub fn non_base_transaction_hashes(&self) -> Vec<Hash256> {
        self.transactions
            .values()
            .filter(|info| !info.is_base)
            .map(|info| info.transaction_hash)
            .collect()
    }

    /// Número de transações confirmadas no segmento
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Saídas registradas para um valor, até o índice de bloco dado
    #[must_use]
    pub fn key_outputs_count_for_amount(&self, amount: u64, block_index: u32) -> u32 {
        self.key_outputs.get(&amount).map_or(0, |records| {
            records.partition_point(|record| record.packed.block_index <= block_index) as u32
        })
    }

    /// Registro de uma saída pelo seu índice global
    #[must_use]
    pub fn output_record(&self, amount: u64, global_index: u32) -> Option<&OutputRecord> {
        let records = self.key_outputs.get(&amount)?;
        let position = records
            .binary_search_by_key(&global_index, |record| record.global_index)
            .ok()?;
        records.get(position)
    }

    /// Registros de saída de um valor, na ordem dos índices globais
    #[must_use]
    pub fn output_records(&self, amount: u64) -> &[OutputRecord] {
        self.key_outputs
            .get(&amount)
            .map_or(&[], Vec::as_slice)
    }

    /// Transações do segmento associadas a um ID de pagamento
    #[must_use]
    pub fn transaction_hashes_by_payment_id(&self, payment_id: &Hash256) -> Vec<Hash256> {
        self.payment_ids
            .get(payment_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Hashes de blocos com timestamp dentro de `[begin, begin+seconds]`
    #[must_use]
    pub fn block_hashes_by_timestamps(&self, timestamp_begin: u64, seconds: u64) -> Vec<Hash256> {
        let end = timestamp_begin.saturating_add(seconds);
        self.block_infos
            .iter()
            .filter(|info| info.timestamp >= timestamp_begin && info.timestamp <= end)
            .map(|info| info.block_hash)
            .collect()
    }

    /// Primeiro índice de bloco com timestamp não inferior ao dado
    #[must_use]
    pub fn timestamp_lower_bound_index(&self, timestamp: u64) -> Option<u32> {
        let local = self
            .block_infos
            .iter()
            .position(|info| info.timestamp >= timestamp)?;
        Some(self.start_index + local as u32)
    }

    /// Hashes de blocos a partir de `start`, limitado a `max_count`
    #[must_use]
    pub fn block_hashes_range(&self, start: u32, max_count: usize) -> Vec<Hash256> {
        let Some(local) = self.local_index(start) else {
            return Vec::new();
        };
        self.block_infos[local..]
            .iter()
            .take(max_count)
            .map(|info| info.block_hash)
            .collect()
    }
}

fn move_payment_link(
    from: &mut HashMap<Hash256, Vec<Hash256>>,
    to: &mut HashMap<Hash256, Vec<Hash256>>,
    payment_id: Hash256,
    tx_hash: Hash256,
) {
    if let Some(hashes) = from.get_mut(&payment_id) {
        hashes.retain(|hash| *hash != tx_hash);
        if hashes.is_empty() {
            from.remove(&payment_id);
        }
    }
    to.entry(payment_id).or_default().push(tx_hash);
}
