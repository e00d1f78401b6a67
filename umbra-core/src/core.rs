//! Núcleo de consenso da Umbra
//!
//! O núcleo é o dono da árvore de segmentos enraizada no gênese: cada
//! segmento não-raiz tem exatamente um pai e zero ou mais filhos, e a folha
//! de maior dificuldade cumulativa é o topo canônico. Todas as mutações
//! (inserção de bloco, admissão ao pool, reorganizações, limpeza) correm em
//! série numa única pista lógica; consultas servem-se dos índices imutáveis.

use crate::block::{BlockTemplate, CachedBlock, ParentBlock, RawBlock, BLOCK_MAJOR_VERSION_2, PARENT_BLOCK_SIZE_LIMIT};
use crate::checkpoints::Checkpoints;
use crate::currency::{
    self, Currency, CHAIN_SYNC_MAX_HASH_COUNT, WALLET_SYNC_MAX_BLOCK_COUNT,
};
use crate::error::{
    AddBlockError, AddBlockResult, BlockValidationError, CoreError, TransactionValidationError,
};
use crate::messages::{
    make_add_transaction_message, make_chain_switch_message, make_del_transaction_message,
    make_new_alternative_block_message, make_new_block_message, BlockchainMessage,
    DeleteTransactionReason,
};
use crate::mixins;
use crate::pool::TransactionPoolCleaner;
use crate::segment::{
    BlockchainCache, BlockPushData, CachedBlockInfo, ChainTail, KeyOutputInfo, OutputRecord,
    TransactionPushData,
};
use crate::serialization::{ConsensusDecode, ConsensusEncode};
use crate::storage::{MainChainStorage, SnapshotStore};
use crate::transaction::{
    payment_id_from_extra, relative_to_absolute_offsets, CachedTransaction, Transaction,
    TransactionInput, TransactionOutputTarget,
};
use crate::upgrades::UpgradeManager;
use crate::validator_state::{extract_spent_outputs, TransactionValidatorState};
use crate::wallet_sync::{raw_coinbase_transaction, raw_wallet_transaction, WalletBlockInfo};
use rand::seq::SliceRandom;
use shared::{check_key, check_ring_signature, key_image_in_prime_subgroup, Hash256, KeyImage, PublicKey};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Capacidade da fila de mensagens de cada observador
const OBSERVER_QUEUE_CAPACITY: usize = 256;

/// Tentativas de ajuste fino do tamanho da transação base no template
const COINBASE_SIZE_FIX_TRIES: usize = 10;

/// Fonte de tempo de parede do núcleo
pub trait TimeProvider: Send + Sync {
    fn now(&self) -> u64;
}

/// Relógio do sistema
#[derive(Debug, Default)]
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }
}

/// Resposta do construtor de templates
#[derive(Debug, Clone)]
pub struct BlockTemplateResponse {
    pub block_template: BlockTemplate,
    pub difficulty: u64,
    pub height: u32,
}

/// Resumo do estado do núcleo
#[derive(Debug, Clone)]
pub struct CoreStatistics {
    pub transaction_pool_size: usize,
    pub blockchain_transaction_count: usize,
    pub alternative_block_count: u64,
    pub top_block_index: u32,
    pub top_block_hash: Hash256,
}

/// Situação de um conjunto de transações consultadas
#[derive(Debug, Clone, Default)]
pub struct TransactionsStatus {
    pub in_pool: HashSet<Hash256>,
    pub in_block: HashSet<Hash256>,
    pub unknown: HashSet<Hash256>,
}

struct SegmentNode {
    cache: BlockchainCache,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Dados da mensagem de troca de cadeia, computados antes da promoção
struct ChainSwitchInfo {
    common_root_index: u32,
    blocks_from_common_root: Vec<Hash256>,
}

/// Núcleo de consenso: árvore de segmentos, pool, validação e consultas
pub struct Core {
    currency: Currency,
    checkpoints: Checkpoints,
    upgrade_manager: UpgradeManager,
    segments: Vec<SegmentNode>,
    /// Folhas da árvore; a posição 0 é a folha da cadeia principal
    leaves: Vec<usize>,
    main_chain_set: HashSet<usize>,
    pool: TransactionPoolCleaner,
    storage: Box<dyn MainChainStorage>,
    snapshot: Option<SnapshotStore>,
    notifier: broadcast::Sender<BlockchainMessage>,
    block_median_size: u64,
    interrupted: Arc<AtomicBool>,
    time: Box<dyn TimeProvider>,
    start_time: u64,
}

impl Core {
    /// Constrói e carrega o núcleo
    ///
    /// Reconcilia o snapshot indexado com o vetor de blocos crus: importa
    /// blocos faltantes, corta o cache que estiver à frente e reimporta a
    /// partir do ancestral comum quando as pontas divergem. Um núcleo só
    /// existe carregado.
    ///
    /// # Errors
    ///
    /// Retorna erro em blockchain corrompida, falha de armazenamento ou
    /// interrupção durante a importação
    pub fn load(
        currency: Currency,
        checkpoints: Checkpoints,
        storage: Box<dyn MainChainStorage>,
        snapshot: Option<SnapshotStore>,
        time: Box<dyn TimeProvider>,
    ) -> Result<Self, CoreError> {
        let mut upgrade_manager = UpgradeManager::new();
        for (version, height) in currency.upgrade_heights() {
            upgrade_manager.add_major_block_version(*version, *height);
        }

        let (notifier, _) = broadcast::channel(OBSERVER_QUEUE_CAPACITY);
        let mempool_live_time = currency.mempool_tx_live_time();

        let mut core = Self {
            currency,
            checkpoints,
            upgrade_manager,
            segments: Vec::new(),
            leaves: Vec::new(),
            main_chain_set: HashSet::new(),
            pool: TransactionPoolCleaner::new(mempool_live_time),
            storage,
            snapshot,
            notifier,
            block_median_size: 0,
            interrupted: Arc::new(AtomicBool::new(false)),
            time,
            start_time: 0,
        };

        core.start_time = core.time.now();
        core.init_root_segment()?;

        if core.storage.block_count() == 0 {
            let genesis = core.currency.genesis_block();
            let raw = RawBlock {
                block: genesis.block_binary().to_vec(),
                transactions: vec![],
            };
            core.storage
                .push_block(raw)
                .map_err(|err| CoreError::Storage(err.to_string()))?;
        }

        core.reconcile_with_storage()?;
        core.update_block_median_size();

        info!(
            top_index = core.top_block_index(),
            top_hash = %core.top_block_hash(),
            "Núcleo carregado"
        );

        Ok(core)
    }

    /// Sinaliza interrupção: laços longos desistem com erro próprio
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Alça compartilhada do sinal de interrupção
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Abre uma fila de mensagens de observador
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BlockchainMessage> {
        self.notifier.subscribe()
    }

    #[must_use]
    pub const fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Instante em que o núcleo foi carregado
    #[must_use]
    pub const fn start_time(&self) -> u64 {
        self.start_time
    }

    // ------------------------------------------------------------------
    // Consultas
    // ------------------------------------------------------------------

    #[must_use]
    pub fn top_block_index(&self) -> u32 {
        self.segments[self.main_leaf()].cache.top_block_index()
    }

    #[must_use]
    pub fn top_block_hash(&self) -> Hash256 {
        self.segments[self.main_leaf()].cache.top_block_hash()
    }

    /// Hash de um bloco da cadeia principal pelo índice
    #[must_use]
    pub fn block_hash_by_index(&self, block_index: u32) -> Option<Hash256> {
        let seg = self.find_main_chain_segment_containing_index(block_index)?;
        self.segments[seg].cache.block_hash(block_index)
    }

    /// Timestamp de um bloco da cadeia principal pelo índice
    #[must_use]
    pub fn block_timestamp_by_index(&self, block_index: u32) -> Option<u64> {
        let seg = self.find_main_chain_segment_containing_index(block_index)?;
        self.segments[seg]
            .cache
            .block_info(block_index)
            .map(|info| info.timestamp)
    }

    /// Verifica se o bloco existe em qualquer cadeia viva
    #[must_use]
    pub fn has_block(&self, block_hash: &Hash256) -> bool {
        self.find_segment_containing_block_hash(block_hash).is_some()
    }

    /// Template de um bloco da cadeia principal pelo índice
    #[must_use]
    pub fn block_by_index(&self, block_index: u32) -> Option<BlockTemplate> {
        let seg = self.find_main_chain_segment_containing_index(block_index)?;
        let raw = self.segments[seg].cache.raw_block(block_index)?;
        BlockTemplate::from_binary(&raw.block).ok()
    }

    /// Template de um bloco da cadeia principal pelo hash
    #[must_use]
    pub fn block_by_hash(&self, block_hash: &Hash256) -> Option<BlockTemplate> {
        let seg = self.find_main_chain_segment_containing_block_hash(block_hash)?;
        let index = self.segments[seg].cache.block_index_of(block_hash)?;
        let raw = self.segments[seg].cache.raw_block(index)?;
        BlockTemplate::from_binary(&raw.block).ok()
    }

    /// Bloco cru da cadeia principal pelo índice
    #[must_use]
    pub fn raw_block_by_index(&self, block_index: u32) -> Option<RawBlock> {
        let seg = self.find_main_chain_segment_containing_index(block_index)?;
        self.segments[seg].cache.raw_block(block_index).cloned()
    }

    /// Blocos crus da cadeia principal a partir de `min_index`
    #[must_use]
    pub fn blocks_by_range(&self, min_index: u32, count: u32) -> Vec<RawBlock> {
        if count == 0 {
            return Vec::new();
        }
        let top = self.top_block_index();
        let max_index = min_index.saturating_add(count - 1).min(top);
        (min_index..=max_index)
            .filter_map(|index| self.raw_block_by_index(index))
            .collect()
    }

    /// Blocos crus por hash, em qualquer cadeia; devolve também os ausentes
    #[must_use]
    pub fn blocks_by_hashes(&self, hashes: &[Hash256]) -> (Vec<RawBlock>, Vec<Hash256>) {
        let mut blocks = Vec::new();
        let mut missed = Vec::new();
        for hash in hashes {
            match self.find_segment_containing_block_hash(hash).and_then(|seg| {
                let index = self.segments[seg].cache.block_index_of(hash)?;
                self.segments[seg].cache.raw_block(index).cloned()
            }) {
                Some(raw) => blocks.push(raw),
                None => missed.push(*hash),
            }
        }
        (blocks, missed)
    }

    /// Verifica se a transação está confirmada ou no pool
    #[must_use]
    pub fn has_transaction(&self, transaction_hash: &Hash256) -> bool {
        self.find_segment_containing_transaction(transaction_hash)
            .is_some()
            || self.pool.pool().contains(transaction_hash)
    }

    /// Corpo serializado de uma transação confirmada ou pendente
    #[must_use]
    pub fn transaction(&self, transaction_hash: &Hash256) -> Option<Vec<u8>> {
        if let Some(seg) = self.find_segment_containing_transaction(transaction_hash) {
            let info = self.segments[seg].cache.transaction_info(transaction_hash)?;
            return self.segments[seg]
                .cache
                .raw_transaction(info.block_index, info.transaction_index);
        }

        self.pool
            .pool()
            .get(transaction_hash)
            .map(|entry| entry.cached.binary().to_vec())
    }

    /// Transações confirmadas por hash; devolve também as ausentes
    #[must_use]
    pub fn transactions(&self, hashes: &[Hash256]) -> (Vec<Vec<u8>>, Vec<Hash256>) {
        let mut found = Vec::new();
        let mut missed = Vec::new();
        for hash in hashes {
            match self.find_segment_containing_transaction(hash).and_then(|seg| {
                let info = self.segments[seg].cache.transaction_info(hash)?;
                self.segments[seg]
                    .cache
                    .raw_transaction(info.block_index, info.transaction_index)
            }) {
                Some(binary) => found.push(binary),
                None => missed.push(*hash),
            }
        }
        (found, missed)
    }

    /// Dificuldade individual de um bloco da cadeia principal
    #[must_use]
    pub fn block_difficulty(&self, block_index: u32) -> Option<u64> {
        let leaf = self.main_leaf();
        let info = self.block_info_in_chain(leaf, block_index)?;
        if block_index == 0 {
            return Some(info.cumulative_difficulty);
        }
        let previous = self.block_info_in_chain(leaf, block_index - 1)?;
        Some(info.cumulative_difficulty - previous.cumulative_difficulty)
    }

    /// Dificuldade exigida do próximo bloco da cadeia principal
    #[must_use]
    pub fn difficulty_for_next_block(&self) -> u64 {
        self.difficulty_for_next_block_at(self.main_leaf(), self.top_block_index())
    }

    /// Moedas emitidas até o bloco dado da cadeia principal
    #[must_use]
    pub fn already_generated_coins(&self, block_index: u32) -> Option<u64> {
        self.block_info_in_chain(self.main_leaf(), block_index)
            .map(|info| info.already_generated_coins)
    }

    /// Índices globais das saídas de uma transação confirmada
    #[must_use]
    pub fn transaction_global_indexes(&self, transaction_hash: &Hash256) -> Option<Vec<u32>> {
        let seg = self.find_segment_containing_transaction(transaction_hash)?;
        self.segments[seg]
            .cache
            .transaction_info(transaction_hash)
            .map(|info| info.global_indexes.clone())
    }

    /// Índices globais de todas as transações num intervalo de alturas
    #[must_use]
    pub fn global_indexes_for_range(
        &self,
        start_index: u32,
        end_index: u32,
    ) -> HashMap<Hash256, Vec<u32>> {
        let mut indexes = HashMap::new();
        let leaf = self.main_leaf();
        for block_index in start_index..end_index {
            let Some(seg) = self.chain_segment_for_index(leaf, block_index) else {
                break;
            };
            let Some(hashes) = self.segments[seg].cache.block_transaction_hashes(block_index)
            else {
                continue;
            };
            for hash in hashes {
                if let Some(info) = self.segments[seg].cache.transaction_info(hash) {
                    indexes.insert(*hash, info.global_indexes.clone());
                }
            }
        }
        indexes
    }

    /// Sorteia saídas de um valor para compor anéis
    ///
    /// Falha sem resultado parcial quando não existem `count` saídas
    /// qualificadas (maduras e abaixo da janela de desbloqueio).
    #[must_use]
    pub fn random_outputs(&self, amount: u64, count: usize) -> Option<(Vec<u32>, Vec<PublicKey>)> {
        if count == 0 {
            return Some((Vec::new(), Vec::new()));
        }

        let top = self.top_block_index();
        if top < self.currency.mined_money_unlock_window() {
            debug!("Altura da cadeia menor que a janela de maturação");
            return None;
        }

        let mut candidates: Vec<OutputRecord> = Vec::new();
        for seg in self.chain_ancestors(self.main_leaf()) {
            for record in self.segments[seg].cache.output_records(amount) {
                if record.packed.block_index <= top
                    && self.is_unlocked(record.unlock_time, top)
                {
                    candidates.push(*record);
                }
            }
        }

        if candidates.len() < count {
            debug!(amount, have = candidates.len(), want = count, "Saídas insuficientes");
            return None;
        }

        let mut rng = rand::thread_rng();
        let mut picked: Vec<OutputRecord> = candidates
            .choose_multiple(&mut rng, count)
            .copied()
            .collect();
        picked.sort_by_key(|record| record.global_index);

        let global_indexes = picked.iter().map(|record| record.global_index).collect();
        let public_keys = picked.iter().map(|record| record.key).collect();
        Some((global_indexes, public_keys))
    }

    /// Hashes de blocos da cadeia principal por janela de timestamps
    #[must_use]
    pub fn block_hashes_by_timestamps(&self, timestamp_begin: u64, seconds: u64) -> Vec<Hash256> {
        let mut hashes = Vec::new();
        for seg in self.chain_ancestors_rooted(self.main_leaf()) {
            hashes.extend(
                self.segments[seg]
                    .cache
                    .block_hashes_by_timestamps(timestamp_begin, seconds),
            );
        }
        hashes
    }

    /// Transações (confirmadas e pendentes) com o ID de pagamento
    #[must_use]
    pub fn transaction_hashes_by_payment_id(&self, payment_id: &Hash256) -> Vec<Hash256> {
        let mut hashes = Vec::new();
        for seg in self.chain_ancestors_rooted(self.main_leaf()) {
            hashes.extend(
                self.segments[seg]
                    .cache
                    .transaction_hashes_by_payment_id(payment_id),
            );
        }
        hashes.extend(self.pool.pool().transaction_hashes_by_payment_id(payment_id));
        hashes
    }

    /// Classifica transações em: no pool, em bloco ou desconhecidas
    #[must_use]
    pub fn transactions_status(&self, hashes: &[Hash256]) -> TransactionsStatus {
        let mut status = TransactionsStatus::default();
        for hash in hashes {
            if self.pool.pool().contains(hash) {
                status.in_pool.insert(*hash);
            } else if self.find_segment_containing_transaction(hash).is_some() {
                status.in_block.insert(*hash);
            } else {
                status.unknown.insert(*hash);
            }
        }
        status
    }

    /// Cadeia esparsa do topo: afinamento geométrico dos hashes conhecidos
    #[must_use]
    pub fn build_sparse_chain(&self) -> Vec<Hash256> {
        let top = self.top_block_index();
        let mut sparse = vec![self.top_block_hash()];

        let mut step = 1u32;
        while step < top {
            if let Some(hash) = self.block_hash_by_index(top - step) {
                sparse.push(hash);
            }
            step = step.saturating_mul(2);
        }

        let genesis = self.currency.genesis_hash();
        if sparse.last() != Some(&genesis) {
            sparse.push(genesis);
        }
        sparse
    }

    /// Índice do bloco mais recente da cadeia principal conhecido do par
    ///
    /// Uma lista vazia significa um par sem história: índice 0.
    #[must_use]
    pub fn find_blockchain_supplement_index(&self, remote_block_ids: &[Hash256]) -> Option<u32> {
        if remote_block_ids.is_empty() {
            return Some(0);
        }

        for hash in remote_block_ids {
            if let Some(seg) = self.find_main_chain_segment_containing_block_hash(hash) {
                return self.segments[seg].cache.block_index_of(hash);
            }
        }

        // Nem o gênese confere: o par está noutra rede
        None
    }

    /// Cauda da cadeia principal a partir do último bloco comum
    #[must_use]
    pub fn find_blockchain_supplement(
        &self,
        remote_block_ids: &[Hash256],
        max_count: usize,
    ) -> Option<(Vec<Hash256>, u32, u32)> {
        let start_index = self.find_blockchain_supplement_index(remote_block_ids)?;
        let total_count = self.top_block_index() + 1;
        let hashes = self.main_chain_hashes_range(start_index, max_count.min(CHAIN_SYNC_MAX_HASH_COUNT));
        Some((hashes, total_count, start_index))
    }

    /// Hashes da cadeia principal a partir de `start`, até `max_count`
    #[must_use]
    pub fn main_chain_hashes_range(&self, start: u32, max_count: usize) -> Vec<Hash256> {
        let mut hashes = Vec::new();
        let top = self.top_block_index();
        let mut index = start;
        while hashes.len() < max_count && index <= top {
            let Some(seg) = self.chain_segment_for_index(self.main_leaf(), index) else {
                break;
            };
            let chunk = self.segments[seg]
                .cache
                .block_hashes_range(index, max_count - hashes.len());
            if chunk.is_empty() {
                break;
            }
            index += chunk.len() as u32;
            hashes.extend(chunk);
        }
        hashes
    }

    /// Janela de sincronização de carteira
    ///
    /// Devolve blocos simplificados a partir do mais alto entre a altura
    /// pedida, o timestamp convertido em altura e o último hash conhecido,
    /// limitado pelo teto do servidor.
    #[must_use]
    pub fn wallet_sync_data(
        &self,
        known_block_hashes: &[Hash256],
        start_height: u64,
        start_timestamp: u64,
        block_count: u64,
    ) -> Option<Vec<WalletBlockInfo>> {
        let current_index = u64::from(self.top_block_index());

        let mut actual_count = block_count.min(WALLET_SYNC_MAX_BLOCK_COUNT);
        if actual_count == 0 {
            actual_count = WALLET_SYNC_MAX_BLOCK_COUNT;
        }

        let timestamp_height = if start_timestamp == 0 {
            0
        } else {
            match self.block_height_for_timestamp(start_timestamp) {
                Some(height) => u64::from(height),
                // Ainda não sincronizamos até esse instante: sem blocos por ora
                None => return Some(Vec::new()),
            }
        };

        let first_height = if start_height == 0 {
            timestamp_height
        } else {
            start_height
        };

        let last_known = u64::from(
            self.find_blockchain_supplement_index(known_block_hashes)
                .unwrap_or(0),
        );

        let start_index = first_height.max(if last_known == 0 { 0 } else { last_known + 1 });

        if current_index < start_index {
            return Some(Vec::new());
        }

        let end_index = start_index + actual_count.min(current_index - start_index + 1);

        let mut wallet_blocks = Vec::new();
        for index in start_index..end_index {
            let raw = self.raw_block_by_index(index as u32)?;
            let template = BlockTemplate::from_binary(&raw.block).ok()?;
            let cached = CachedBlock::new(template.clone());

            let mut transactions = Vec::with_capacity(raw.transactions.len());
            for raw_tx in &raw.transactions {
                let transaction = Transaction::from_binary(raw_tx).ok()?;
                transactions.push(raw_wallet_transaction(&transaction));
            }

            wallet_blocks.push(WalletBlockInfo {
                block_height: index as u32,
                block_hash: cached.hash(),
                block_timestamp: template.timestamp,
                coinbase_transaction: raw_coinbase_transaction(&template.base_transaction),
                transactions,
            });
        }

        Some(wallet_blocks)
    }

    /// Primeira altura da cadeia principal com timestamp não inferior
    #[must_use]
    pub fn block_height_for_timestamp(&self, timestamp: u64) -> Option<u32> {
        for seg in self.chain_ancestors_rooted(self.main_leaf()) {
            if let Some(index) = self.segments[seg].cache.timestamp_lower_bound_index(timestamp) {
                return Some(index);
            }
        }
        None
    }

    /// Resumo do estado corrente
    #[must_use]
    pub fn core_statistics(&self) -> CoreStatistics {
        let alternative_block_count = self
            .segments
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.main_chain_set.contains(index))
            .map(|(_, node)| u64::from(node.cache.block_count()))
            .sum();

        let blockchain_transaction_count = self
            .main_chain_set
            .iter()
            .map(|seg| self.segments[*seg].cache.transaction_count())
            .sum();

        CoreStatistics {
            transaction_pool_size: self.pool.pool().transaction_count(),
            blockchain_transaction_count,
            alternative_block_count,
            top_block_index: self.top_block_index(),
            top_block_hash: self.top_block_hash(),
        }
    }

    // ------------------------------------------------------------------
    // Pool
    // ------------------------------------------------------------------

    #[must_use]
    pub fn pool_transaction_hashes(&self) -> Vec<Hash256> {
        self.pool.pool().transaction_hashes()
    }

    #[must_use]
    pub fn pool_transaction(&self, transaction_hash: &Hash256) -> Option<Vec<u8>> {
        self.pool
            .pool()
            .get(transaction_hash)
            .map(|entry| entry.cached.binary().to_vec())
    }

    #[must_use]
    pub fn pool_transaction_count(&self) -> usize {
        self.pool.pool().transaction_count()
    }

    /// Diferença do pool contra um conjunto conhecido
    ///
    /// Devolve (corpos adicionados, hashes removidos, topo ainda válido).
    #[must_use]
    pub fn pool_changes(
        &self,
        last_block_hash: &Hash256,
        known_hashes: &[Hash256],
    ) -> (Vec<Vec<u8>>, Vec<Hash256>, bool) {
        let pool_hashes: HashSet<Hash256> = self.pool.pool().transaction_hashes().into_iter().collect();
        let known: HashSet<Hash256> = known_hashes.iter().copied().collect();

        let added = pool_hashes
            .difference(&known)
            .filter_map(|hash| self.pool_transaction(hash))
            .collect();
        let deleted = known.difference(&pool_hashes).copied().collect();

        (added, deleted, self.top_block_hash() == *last_block_hash)
    }

    /// Oferece uma transação crua ao pool
    pub fn add_transaction_to_pool(&mut self, transaction_binary: &[u8]) -> bool {
        let Ok(cached) = CachedTransaction::from_binary(transaction_binary) else {
            warn!("Transação recusada no pool por erro de desserialização");
            return false;
        };

        let transaction_hash = cached.hash();
        let receive_time = self.time.now();
        if !self.add_cached_transaction_to_pool(cached, receive_time) {
            return false;
        }

        self.notify(make_add_transaction_message(vec![transaction_hash]));
        true
    }

    fn add_cached_transaction_to_pool(
        &mut self,
        cached: CachedTransaction,
        receive_time: u64,
    ) -> bool {
        let transaction_hash = cached.hash();

        let Some(validator_state) = self.transaction_valid_for_pool(&cached) else {
            return false;
        };

        if validator_state.intersects(self.pool.pool().pool_state()) {
            debug!(
                hash = %transaction_hash,
                "Transação recusada: imagem de chave já pendente no pool"
            );
            return false;
        }

        if !self
            .pool
            .push_transaction(cached, validator_state, receive_time)
        {
            debug!(hash = %transaction_hash, "Transação já presente ou suprimida no pool");
            return false;
        }

        debug!(hash = %transaction_hash, "Transação admitida no pool");
        true
    }

    /// Valida a transação para admissão ao pool; devolve o estado de gasto
    fn transaction_valid_for_pool(
        &self,
        cached: &CachedTransaction,
    ) -> Option<TransactionValidatorState> {
        let top_index = self.top_block_index();

        if mixins::validate(std::slice::from_ref(cached), top_index).is_err() {
            debug!(hash = %cached.hash(), "Tamanho de anel fora da janela do pool");
            return None;
        }

        if cached.transaction().prefix.extra.len() >= currency::MAX_EXTRA_SIZE_POOL {
            debug!(hash = %cached.hash(), "Extra grande demais para o pool");
            return None;
        }

        let mut validator_state = TransactionValidatorState::new();
        let fee = match self.validate_transaction(
            cached,
            &mut validator_state,
            self.main_leaf(),
            top_index,
        ) {
            Ok(fee) => fee,
            Err(err) => {
                debug!(hash = %cached.hash(), error = %err, "Transação inválida para o pool");
                return None;
            }
        };

        let max_size = self
            .currency
            .max_transaction_allowed_size(self.block_median_size);
        if cached.binary_size() > max_size {
            warn!(
                hash = %cached.hash(),
                size = cached.binary_size(),
                max_size,
                "Transação grande demais para o pool"
            );
            return None;
        }

        let is_fusion = fee == 0
            && self
                .currency
                .is_fusion_transaction(cached.transaction(), cached.binary_size());
        if !is_fusion && fee < self.currency.minimum_fee() {
            warn!(
                hash = %cached.hash(),
                fee,
                "Taxa insuficiente e a transação não é uma fusão"
            );
            return None;
        }

        Some(validator_state)
    }

    /// Passo de limpeza do pool: idade e revalidação contra o topo
    ///
    /// Devolve os hashes removidos e notifica observadores com o motivo.
    pub fn clean_pool(&mut self) -> Vec<Hash256> {
        let now = self.time.now();

        let verdicts: HashMap<Hash256, bool> = self
            .pool
            .pool()
            .transaction_hashes()
            .into_iter()
            .filter_map(|hash| {
                let entry = self.pool.pool().get(&hash)?;
                let mut state = TransactionValidatorState::new();
                let valid = mixins::validate(
                    std::slice::from_ref(&entry.cached),
                    self.top_block_index(),
                )
                .is_ok()
                    && self
                        .validate_transaction(
                            &entry.cached,
                            &mut state,
                            self.main_leaf(),
                            self.top_block_index(),
                        )
                        .is_ok();
                Some((hash, valid))
            })
            .collect();

        let deleted = self
            .pool
            .clean(now, |cached| verdicts.get(&cached.hash()).copied().unwrap_or(false));

        let (outdated, not_actual): (Vec<_>, Vec<_>) =
            deleted.iter().partition(|(_, by_age)| *by_age);

        let outdated: Vec<Hash256> = outdated.into_iter().map(|(hash, _)| hash).collect();
        let not_actual: Vec<Hash256> = not_actual.into_iter().map(|(hash, _)| hash).collect();

        if !outdated.is_empty() {
            self.notify(make_del_transaction_message(
                outdated.clone(),
                DeleteTransactionReason::Outdated,
            ));
        }
        if !not_actual.is_empty() {
            self.notify(make_del_transaction_message(
                not_actual.clone(),
                DeleteTransactionReason::NotActual,
            ));
        }

        outdated.into_iter().chain(not_actual).collect()
    }

    /// Reinsere todo o pool contra o topo corrente, descartando rejeitadas
    fn actualize_pool_transactions(&mut self) {
        for hash in self.pool.pool().transaction_hashes() {
            let Some(entry) = self.pool.remove_transaction(&hash) else {
                continue;
            };
            let receive_time = entry.receive_time;
            if !self.add_cached_transaction_to_pool(entry.cached, receive_time) {
                self.notify(make_del_transaction_message(
                    vec![hash],
                    DeleteTransactionReason::NotActual,
                ));
            }
        }
    }

    /// Variante leve: remove só conflitos de gasto e excessos de tamanho
    fn actualize_pool_transactions_lite(&mut self, validator_state: &TransactionValidatorState) {
        let max_size = self
            .currency
            .max_transaction_allowed_size(self.block_median_size);

        for hash in self.pool.pool().transaction_hashes() {
            let Some(entry) = self.pool.pool().get(&hash) else {
                continue;
            };

            let conflicting = entry.validator_state.intersects(validator_state);
            let oversized = entry.cached.binary_size() > max_size;
            if conflicting || oversized {
                self.pool.remove_transaction(&hash);
                self.notify(make_del_transaction_message(
                    vec![hash],
                    DeleteTransactionReason::NotActual,
                ));
            }
        }
    }

    // ------------------------------------------------------------------
    // Inserção de blocos
    // ------------------------------------------------------------------

    /// Ingere um bloco cru vindo de um par
    ///
    /// # Errors
    ///
    /// Devolve a categoria de rejeição; nenhuma falha muda o estado
    pub fn add_block(&mut self, raw_block: RawBlock) -> Result<AddBlockResult, AddBlockError> {
        let cached = CachedBlock::from_binary(&raw_block.block)
            .map_err(|_| AddBlockError::DeserializationFailed)?;
        self.add_cached_block(cached, raw_block)
    }

    /// Submete um template minerado localmente
    ///
    /// Recusa templates que referenciam transações ausentes do pool.
    ///
    /// # Errors
    ///
    /// Devolve a categoria de rejeição; nenhuma falha muda o estado
    pub fn submit_block(&mut self, raw_template: Vec<u8>) -> Result<AddBlockResult, AddBlockError> {
        let template = BlockTemplate::from_binary(&raw_template).map_err(|err| {
            warn!(error = %err, "Template de bloco indecifrável");
            AddBlockError::DeserializationFailed
        })?;

        let mut transactions = Vec::with_capacity(template.transaction_hashes.len());
        for transaction_hash in &template.transaction_hashes {
            let Some(binary) = self.pool_transaction(transaction_hash) else {
                warn!(hash = %transaction_hash, "Transação do template ausente do pool");
                return Err(BlockValidationError::TransactionAbsentInPool.into());
            };
            transactions.push(binary);
        }

        let cached = CachedBlock::from_binary(&raw_template)
            .map_err(|_| AddBlockError::DeserializationFailed)?;
        self.add_cached_block(
            cached,
            RawBlock {
                block: raw_template,
                transactions,
            },
        )
    }

    /// Ingestão com o bloco já desserializado e memoizado
    ///
    /// # Errors
    ///
    /// Devolve a categoria de rejeição; nenhuma falha muda o estado
    pub fn add_cached_block(
        &mut self,
        cached: CachedBlock,
        raw_block: RawBlock,
    ) -> Result<AddBlockResult, AddBlockError> {
        let block_hash = cached.hash();
        let block_index = cached.block_index();
        debug!(%block_hash, block_index, "Pedido de inserção de bloco");

        if self.has_block(&block_hash) {
            debug!(%block_hash, "Bloco já existe");
            return Ok(AddBlockResult::AlreadyExists);
        }

        let previous_hash = cached.block().previous_block_hash;
        let Some(seg) = self.find_segment_containing_block_hash(&previous_hash) else {
            debug!(%block_hash, "Bloco rejeitado como órfão");
            return Err(AddBlockError::RejectedAsOrphaned);
        };

        if raw_block.transactions.len() != cached.block().transaction_hashes.len() {
            return Err(AddBlockError::DeserializationFailed);
        }

        let mut transactions = Vec::with_capacity(raw_block.transactions.len());
        let mut transactions_size = 0u64;
        for raw_transaction in &raw_block.transactions {
            if raw_transaction.len() as u64 > self.currency.max_tx_size() {
                debug!(size = raw_transaction.len(), "Transação crua grande demais");
                return Err(AddBlockError::DeserializationFailed);
            }
            let transaction = CachedTransaction::from_binary(raw_transaction)
                .map_err(|_| AddBlockError::DeserializationFailed)?;
            transactions_size += raw_transaction.len() as u64;
            transactions.push(transaction);
        }

        for (transaction, declared) in
            transactions.iter().zip(&cached.block().transaction_hashes)
        {
            if transaction.hash() != *declared {
                return Err(AddBlockError::DeserializationFailed);
            }
        }

        let coinbase_size = cached.block().base_transaction.binary_size();
        let cumulative_block_size = coinbase_size + transactions_size;

        let previous_index = self.segments[seg]
            .cache
            .block_index_of(&previous_hash)
            .ok_or(AddBlockError::RejectedAsOrphaned)?;
        let add_on_top = self.segments[seg].cache.top_block_index() == previous_index;

        if cumulative_block_size
            > self
                .currency
                .max_block_cumulative_size(u64::from(previous_index) + 1)
        {
            debug!(%block_hash, "Tamanho cumulativo grande demais");
            return Err(BlockValidationError::CumulativeBlockSizeTooBig.into());
        }

        let miner_reward = self.validate_block(&cached, seg)?;

        let current_difficulty = self.difficulty_for_next_block_at(seg, previous_index);
        if current_difficulty == 0 {
            debug!(%block_hash, "Sobrecarga de dificuldade");
            return Err(BlockValidationError::DifficultyOverhead.into());
        }

        // Janela transitória: durante a maturação da recompensa aceitamos
        // anéis pela regra antiga, para drenar o pool num soft fork
        if mixins::validate(&transactions, block_index).is_err() {
            let relaxed_height =
                block_index.saturating_sub(self.currency.mined_money_unlock_window());
            mixins::validate(&transactions, relaxed_height)
                .map_err(AddBlockError::TransactionValidation)?;
        }

        let mut validator_state = TransactionValidatorState::new();
        let mut cumulative_fee = 0u64;
        for transaction in &transactions {
            let fee = self
                .validate_transaction(transaction, &mut validator_state, seg, previous_index)
                .map_err(|err| {
                    debug!(
                        hash = %transaction.hash(),
                        error = %err,
                        "Falha ao validar transação do bloco"
                    );
                    AddBlockError::TransactionValidation(err)
                })?;
            cumulative_fee += fee;
        }

        let sizes = self.last_units(
            seg,
            previous_index,
            self.currency.reward_blocks_window(),
            true,
            |info| info.block_size,
        );
        let median_size = median(sizes);
        let already_generated_coins = self
            .block_info_in_chain(seg, previous_index)
            .map_or(0, |info| info.already_generated_coins);

        let (expected_reward, emission_change) = self
            .currency
            .block_reward(
                cached.block().major_version,
                median_size,
                cumulative_block_size,
                already_generated_coins,
                cumulative_fee,
            )
            .ok_or(BlockValidationError::CumulativeBlockSizeTooBig)?;

        if miner_reward != expected_reward {
            debug!(
                %block_hash,
                expected = expected_reward,
                got = miner_reward,
                "Recompensa do minerador não confere"
            );
            return Err(BlockValidationError::BlockRewardMismatch.into());
        }

        if self.checkpoints.is_in_checkpoint_zone(block_index) {
            if !self.checkpoints.check_block(block_index, &block_hash) {
                warn!(%block_hash, block_index, "Hash não confere com o checkpoint");
                return Err(BlockValidationError::CheckpointBlockHashMismatch.into());
            }
        } else if !self.currency.check_proof_of_work(&cached, current_difficulty) {
            warn!(%block_hash, "Prova de trabalho fraca demais");
            return Err(BlockValidationError::ProofOfWorkTooWeak.into());
        }

        let included_hashes = cached.block().transaction_hashes.clone();
        let mut result = AddBlockResult::AddedToAlternative;
        let mut switch_info = None;

        if add_on_top {
            if self.segments[seg].children.is_empty() {
                if seg == self.main_leaf() {
                    self.storage
                        .push_block(raw_block.clone())
                        .map_err(|err| CoreError::Storage(err.to_string()))?;
                    self.push_block_to_segment(
                        seg,
                        &cached,
                        &transactions,
                        cumulative_block_size,
                        emission_change,
                        current_difficulty,
                        raw_block,
                    );
                    self.update_block_median_size();

                    let mut removed = Vec::new();
                    for hash in &included_hashes {
                        if self.pool.remove_transaction(hash).is_some() {
                            removed.push(*hash);
                        }
                    }
                    self.actualize_pool_transactions_lite(&validator_state);

                    result = AddBlockResult::AddedToMain;
                    debug!(%block_hash, "Bloco inserido na cadeia principal");
                    if (previous_index + 1) % 100 == 0 {
                        info!(%block_hash, index = previous_index + 1, "Cadeia principal avançou");
                    }

                    if !removed.is_empty() {
                        self.notify(make_del_transaction_message(
                            removed,
                            DeleteTransactionReason::InBlock,
                        ));
                    }
                } else {
                    self.push_block_to_segment(
                        seg,
                        &cached,
                        &transactions,
                        cumulative_block_size,
                        emission_change,
                        current_difficulty,
                        raw_block,
                    );
                    debug!(%block_hash, "Bloco inserido em cadeia alternativa");

                    if let Some(info) = self.try_switch_to_leaf(seg)? {
                        switch_info = Some(info);
                        result = AddBlockResult::AddedToAlternativeAndSwitched;
                    }
                }
            } else {
                // Mais de um bloco alternativo na mesma altura: nova folha
                let new_seg = self.add_child_segment(seg, previous_index + 1);
                debug!(%block_hash, "Resolvendo bifurcação no topo de segmento interno");
                self.push_block_to_segment(
                    new_seg,
                    &cached,
                    &transactions,
                    cumulative_block_size,
                    emission_change,
                    current_difficulty,
                    raw_block,
                );
                self.update_main_chain_set();
                self.update_block_median_size();

                if let Some(info) = self.try_switch_to_leaf(new_seg)? {
                    switch_info = Some(info);
                    result = AddBlockResult::AddedToAlternativeAndSwitched;
                }
            }
        } else {
            debug!(%block_hash, "Resolvendo bifurcação no meio de segmento");
            self.split_segment(seg, previous_index + 1);
            let new_seg = self.add_child_segment(seg, previous_index + 1);
            self.push_block_to_segment(
                new_seg,
                &cached,
                &transactions,
                cumulative_block_size,
                emission_change,
                current_difficulty,
                raw_block,
            );
            self.update_main_chain_set();

            if let Some(info) = self.try_switch_to_leaf(new_seg)? {
                switch_info = Some(info);
                result = AddBlockResult::AddedToAlternativeAndSwitched;
            }
        }

        debug!(%block_hash, "Bloco inserido com sucesso");
        self.notify_on_success(result, previous_index, block_hash, switch_info);
        Ok(result)
    }

    fn notify_on_success(
        &self,
        result: AddBlockResult,
        previous_index: u32,
        block_hash: Hash256,
        switch_info: Option<ChainSwitchInfo>,
    ) {
        match result {
            AddBlockResult::AddedToMain => {
                self.notify(make_new_block_message(previous_index + 1, block_hash));
            }
            AddBlockResult::AddedToAlternative => {
                self.notify(make_new_alternative_block_message(
                    previous_index + 1,
                    block_hash,
                ));
            }
            AddBlockResult::AddedToAlternativeAndSwitched => {
                if let Some(info) = switch_info {
                    self.notify(make_chain_switch_message(
                        info.common_root_index,
                        info.blocks_from_common_root,
                    ));
                }
            }
            AddBlockResult::AlreadyExists => {}
        }
    }

    // ------------------------------------------------------------------
    // Validação
    // ------------------------------------------------------------------

    /// Regras contextuais de um bloco candidato; devolve a recompensa
    fn validate_block(
        &self,
        cached: &CachedBlock,
        seg: usize,
    ) -> Result<u64, AddBlockError> {
        let block = cached.block();
        let previous_index = self.segments[seg]
            .cache
            .block_index_of(&block.previous_block_hash)
            .ok_or(AddBlockError::RejectedAsOrphaned)?;
        let height = previous_index + 1;

        if self.upgrade_manager.major_version_for_height(height) != block.major_version {
            return Err(BlockValidationError::WrongVersion.into());
        }

        if block.major_version >= BLOCK_MAJOR_VERSION_2 {
            match &block.parent_block {
                Some(parent) if parent.major_version == 1 => {}
                _ => {
                    error!(
                        hash = %cached.hash(),
                        "Bloco pai com versão principal incorreta"
                    );
                    return Err(BlockValidationError::ParentBlockWrongVersion.into());
                }
            }

            if cached.parent_block_binary().len() as u64 > PARENT_BLOCK_SIZE_LIMIT {
                return Err(BlockValidationError::ParentBlockSizeTooBig.into());
            }
        }

        if block.timestamp > self.time.now() + self.currency.block_future_time_limit(height) {
            return Err(BlockValidationError::TimestampTooFarInFuture.into());
        }

        let window = self.currency.timestamp_check_window(height);
        let timestamps = self.last_units(seg, previous_index, window, true, |info| info.timestamp);
        if timestamps.len() >= window {
            let median_timestamp = median(timestamps);
            if block.timestamp < median_timestamp {
                return Err(BlockValidationError::TimestampTooFarInPast.into());
            }
        }

        let base = &block.base_transaction;
        if base.prefix.inputs.len() != 1 {
            return Err(TransactionValidationError::InputWrongCount.into());
        }

        match &base.prefix.inputs[0] {
            TransactionInput::Base(input) => {
                if input.block_index != height {
                    return Err(TransactionValidationError::BaseInputWrongBlockIndex.into());
                }
            }
            TransactionInput::Key(_) => {
                return Err(TransactionValidationError::InputUnexpectedType.into());
            }
        }

        if base.prefix.unlock_time
            != u64::from(height) + u64::from(self.currency.mined_money_unlock_window())
        {
            return Err(TransactionValidationError::WrongTransactionUnlockTime.into());
        }

        let mut miner_reward = 0u64;
        for output in &base.prefix.outputs {
            if output.amount == 0 {
                return Err(TransactionValidationError::OutputZeroAmount.into());
            }
            match output.target {
                TransactionOutputTarget::Key(key_output) => {
                    if !check_key(&key_output.key) {
                        return Err(TransactionValidationError::OutputInvalidKey.into());
                    }
                }
            }
            miner_reward = miner_reward
                .checked_add(output.amount)
                .ok_or(TransactionValidationError::OutputsAmountOverflow)?;
        }

        Ok(miner_reward)
    }

    /// Regras semânticas independentes de contexto; devolve a taxa
    fn validate_semantic(
        &self,
        transaction: &Transaction,
        block_index: u32,
    ) -> Result<u64, TransactionValidationError> {
        if transaction.prefix.inputs.is_empty() {
            return Err(TransactionValidationError::EmptyInputs);
        }

        // Folga de uma janela de maturação até exigir o limite, para drenar
        // transações antigas que eram válidas quando entraram no pool
        let extra_limit_height = currency::MAX_EXTRA_SIZE_V2_HEIGHT
            + self.currency.mined_money_unlock_window();
        if block_index >= extra_limit_height
            && transaction.prefix.extra.len() >= currency::MAX_EXTRA_SIZE_V2
        {
            return Err(TransactionValidationError::ExtraTooLarge);
        }

        let mut output_amount = 0u64;
        for output in &transaction.prefix.outputs {
            if output.amount == 0 {
                return Err(TransactionValidationError::OutputZeroAmount);
            }
            match output.target {
                TransactionOutputTarget::Key(key_output) => {
                    if !check_key(&key_output.key) {
                        return Err(TransactionValidationError::OutputInvalidKey);
                    }
                }
            }
            output_amount = output_amount
                .checked_add(output.amount)
                .ok_or(TransactionValidationError::OutputsAmountOverflow)?;
        }

        let mut input_amount = 0u64;
        let mut key_images: HashSet<KeyImage> = HashSet::new();
        for input in &transaction.prefix.inputs {
            let amount = match input {
                TransactionInput::Key(key) => {
                    if !key_images.insert(key.key_image) {
                        return Err(TransactionValidationError::InputIdenticalKeyImages);
                    }

                    if key.output_indexes.is_empty() {
                        return Err(TransactionValidationError::InputEmptyOutputUsage);
                    }

                    // A imagem precisa viver no subgrupo de ordem prima;
                    // fora dele o mesmo gasto geraria imagens distintas
                    if !key_image_in_prime_subgroup(&key.key_image) {
                        return Err(TransactionValidationError::InputInvalidDomainKeyImages);
                    }

                    // O primeiro índice é absoluto; os deltas seguintes não
                    // podem ser zero (saída repetida no anel)
                    if key.output_indexes[1..].contains(&0) {
                        return Err(TransactionValidationError::InputIdenticalOutputIndexes);
                    }

                    key.amount
                }
                TransactionInput::Base(_) => {
                    return Err(TransactionValidationError::InputUnexpectedType);
                }
            };

            input_amount = input_amount
                .checked_add(amount)
                .ok_or(TransactionValidationError::InputsAmountOverflow)?;
        }

        if output_amount > input_amount {
            return Err(TransactionValidationError::WrongAmount);
        }

        Ok(input_amount - output_amount)
    }

    /// Regras contextuais de uma transação; devolve a taxa
    fn validate_transaction(
        &self,
        cached: &CachedTransaction,
        state: &mut TransactionValidatorState,
        seg: usize,
        block_index: u32,
    ) -> Result<u64, TransactionValidationError> {
        let transaction = cached.transaction();
        let fee = self.validate_semantic(transaction, block_index)?;

        let mut signature_index = 0usize;
        for input in &transaction.prefix.inputs {
            let TransactionInput::Key(key) = input else {
                return Err(TransactionValidationError::InputUnexpectedType);
            };

            if !state.insert(key.key_image) {
                return Err(TransactionValidationError::InputKeyImageAlreadySpent);
            }

            if !self.checkpoints.is_in_checkpoint_zone(block_index + 1) {
                if self.is_spent_in_chain(seg, &key.key_image, block_index) {
                    return Err(TransactionValidationError::InputKeyImageAlreadySpent);
                }

                let global_indexes = relative_to_absolute_offsets(&key.output_indexes);
                let mut ring = Vec::with_capacity(global_indexes.len());
                for global_index in &global_indexes {
                    let record =
                        self.chain_output_record(seg, key.amount, *global_index, block_index)?;
                    if !self.is_unlocked(record.unlock_time, block_index) {
                        return Err(TransactionValidationError::InputSpendLockedOut);
                    }
                    ring.push(record.key);
                }

                let signatures = transaction
                    .signatures
                    .get(signature_index)
                    .ok_or(TransactionValidationError::InputInvalidSignatures)?;
                if !check_ring_signature(
                    &cached.prefix_hash(),
                    &key.key_image,
                    &ring,
                    signatures,
                ) {
                    return Err(TransactionValidationError::InputInvalidSignatures);
                }
            }

            signature_index += 1;
        }

        Ok(fee)
    }

    // ------------------------------------------------------------------
    // Template de bloco
    // ------------------------------------------------------------------

    /// Monta um template de bloco para o minerador
    ///
    /// # Errors
    ///
    /// Retorna erro em sobrecarga de dificuldade ou falha do ajuste fino do
    /// tamanho da transação base
    pub fn block_template(
        &mut self,
        miner_key: &PublicKey,
        extra_nonce: &[u8],
    ) -> shared::Result<BlockTemplateResponse> {
        let height = self.top_block_index() + 1;
        let difficulty = self.difficulty_for_next_block();
        if difficulty == 0 {
            error!("Sobrecarga de dificuldade ao montar template");
            return Err(shared::NodeError::ConfigError(
                "Sobrecarga de dificuldade".to_string(),
            ));
        }

        let major_version = self.upgrade_manager.major_version_for_height(height);
        let parent_block = if major_version >= BLOCK_MAJOR_VERSION_2 {
            Some(ParentBlock {
                major_version: 1,
                minor_version: 0,
                previous_block_hash: Hash256::zero(),
                transaction_count: 1,
                base_transaction: Transaction::default(),
            })
        } else {
            None
        };

        // Um atacante com hashrate pode arrastar a mediana de timestamps
        // para a frente do relógio; nesse caso assinamos com a mediana para
        // continuar produzindo blocos aceitáveis
        let mut timestamp = self.time.now();
        let window = self.currency.timestamp_check_window(height);
        if height as usize >= window {
            let timestamps = self.last_units(
                self.main_leaf(),
                height - 1,
                window,
                true,
                |info| info.timestamp,
            );
            let median_timestamp = median(timestamps);
            if timestamp < median_timestamp {
                timestamp = median_timestamp;
            }
        }

        let median_size = self.cumulative_block_size_limit(height) / 2;
        let already_generated_coins = self
            .already_generated_coins(height - 1)
            .unwrap_or(0);
        let max_cumulative_size = self.currency.max_block_cumulative_size(u64::from(height));

        let (transaction_hashes, transactions_size, fee) =
            self.fill_block_template(height, median_size, max_cumulative_size);

        // Geração em duas fases: o tamanho exato do bloco depende do tamanho
        // da transação base, que depende da recompensa, que depende do
        // tamanho do bloco
        let mut base_transaction = self.currency.construct_miner_tx(
            major_version,
            height,
            median_size,
            already_generated_coins,
            transactions_size,
            fee,
            miner_key,
            extra_nonce,
            11,
        )?;

        let mut cumulative_size = transactions_size + base_transaction.binary_size();
        for try_count in 0..COINBASE_SIZE_FIX_TRIES {
            base_transaction = self.currency.construct_miner_tx(
                major_version,
                height,
                median_size,
                already_generated_coins,
                cumulative_size,
                fee,
                miner_key,
                extra_nonce,
                11,
            )?;

            let coinbase_size = base_transaction.binary_size();
            if coinbase_size > cumulative_size - transactions_size {
                cumulative_size = transactions_size + coinbase_size;
                continue;
            }

            if coinbase_size < cumulative_size - transactions_size {
                let delta = cumulative_size - transactions_size - coinbase_size;
                base_transaction
                    .prefix
                    .extra
                    .extend(std::iter::repeat(0u8).take(delta as usize));

                // O contador do extra é varint: crescer o campo pode custar
                // um byte a mais no comprimento serializado
                if cumulative_size != transactions_size + base_transaction.binary_size() {
                    if cumulative_size + 1 != transactions_size + base_transaction.binary_size()
                    {
                        error!(
                            cumulative_size,
                            transactions_size,
                            coinbase = base_transaction.binary_size(),
                            "Tamanhos inconsistentes ao ajustar a transação base"
                        );
                        return Err(shared::NodeError::ConfigError(
                            "Ajuste do template inconsistente".to_string(),
                        ));
                    }

                    let len = base_transaction.prefix.extra.len();
                    base_transaction.prefix.extra.truncate(len - 1);
                    if cumulative_size != transactions_size + base_transaction.binary_size() {
                        // Fronteira de varint ingrata: cresce e tenta de novo
                        debug!(try_count, delta, "Ajuste do extra sem sorte; repetindo");
                        cumulative_size += delta - 1;
                        continue;
                    }

                    debug!(
                        extra = base_transaction.prefix.extra.len(),
                        try_count,
                        "Extra da transação base ajustado"
                    );
                }
            }

            let block_template = BlockTemplate {
                major_version,
                minor_version: 0,
                timestamp,
                previous_block_hash: self.top_block_hash(),
                nonce: 0,
                parent_block,
                base_transaction,
                transaction_hashes,
            };

            return Ok(BlockTemplateResponse {
                block_template,
                difficulty,
                height,
            });
        }

        error!(tries = COINBASE_SIZE_FIX_TRIES, "Falha ao montar template");
        Err(shared::NodeError::ConfigError(
            "Falha ao ajustar o tamanho do template".to_string(),
        ))
    }

    /// Preenche o template com transações do pool
    ///
    /// Fusões (taxa zero) entram primeiro até o teto próprio; depois as
    /// pagantes por taxa decrescente. Entradas que deixaram de validar e já
    /// passaram do tempo de vida são removidas do pool no caminho.
    fn fill_block_template(
        &mut self,
        height: u32,
        median_size: u64,
        max_cumulative_size: u64,
    ) -> (Vec<Hash256>, u64, u64) {
        let max_total_size = (125 * median_size / 100)
            .min(max_cumulative_size)
            .saturating_sub(self.currency.coinbase_blob_reserved_size());

        let now = self.time.now();
        let live_time = self.currency.mempool_tx_live_time();

        struct Candidate {
            hash: Hash256,
            fee: u64,
            size: u64,
            receive_time: u64,
            cached: CachedTransaction,
        }

        let candidates: Vec<Candidate> = self
            .pool
            .pool()
            .entries_by_fee()
            .into_iter()
            .map(|entry| Candidate {
                hash: entry.cached.hash(),
                fee: entry.cached.fee(),
                size: entry.cached.binary_size(),
                receive_time: entry.receive_time,
                cached: entry.cached.clone(),
            })
            .collect();

        let mut spent_inputs = TransactionValidatorState::new();
        let mut included: Vec<Hash256> = Vec::new();
        let mut transactions_size = 0u64;
        let mut total_fee = 0u64;
        let mut evict: Vec<Hash256> = Vec::new();

        // Fusões primeiro, dentro do teto de tamanho de fusão
        for candidate in candidates.iter().rev().take_while(|c| c.fee == 0) {
            if currency::FUSION_TX_MAX_SIZE < transactions_size + candidate.size {
                continue;
            }

            if !self.validate_block_template_transaction(&candidate.cached, height) {
                if now.saturating_sub(candidate.receive_time) >= live_time {
                    evict.push(candidate.hash);
                }
                continue;
            }

            let state = extract_spent_outputs(candidate.cached.transaction());
            if !state.intersects(&spent_inputs) {
                spent_inputs.merge(&state);
                transactions_size += candidate.size;
                included.push(candidate.hash);
                debug!(hash = %candidate.hash, "Fusão incluída no template");
            }
        }

        for candidate in &candidates {
            if included.contains(&candidate.hash) {
                continue;
            }

            let size_limit = if candidate.fee == 0 {
                median_size
            } else {
                max_total_size
            };
            if size_limit < transactions_size + candidate.size {
                continue;
            }

            if !self.validate_block_template_transaction(&candidate.cached, height) {
                if now.saturating_sub(candidate.receive_time) >= live_time {
                    evict.push(candidate.hash);
                }
                continue;
            }

            let state = extract_spent_outputs(candidate.cached.transaction());
            if state.intersects(&spent_inputs) {
                debug!(hash = %candidate.hash, "Transação em conflito ficou de fora");
                continue;
            }

            spent_inputs.merge(&state);
            transactions_size += candidate.size;
            total_fee += candidate.fee;
            included.push(candidate.hash);
            debug!(hash = %candidate.hash, "Transação incluída no template");
        }

        for hash in evict {
            debug!(%hash, "Removendo do pool transação vencida e inválida");
            self.pool.remove_transaction(&hash);
        }

        (included, transactions_size, total_fee)
    }

    /// Uma transação válida ao entrar no pool pode não ser mais válida
    /// quando o template é montado, se as regras da rede mudaram
    fn validate_block_template_transaction(
        &self,
        cached: &CachedTransaction,
        height: u32,
    ) -> bool {
        if cached.transaction().prefix.extra.len() >= currency::MAX_EXTRA_SIZE_BLOCK {
            debug!(hash = %cached.hash(), "Extra grande demais para o template");
            return false;
        }

        if mixins::validate(std::slice::from_ref(cached), height).is_err() {
            debug!(hash = %cached.hash(), "Anel fora da janela para o template");
            return false;
        }

        true
    }

    /// Limite de tamanho cumulativo usado pelo construtor de templates
    fn cumulative_block_size_limit(&self, height: u32) -> u64 {
        let version = self.upgrade_manager.major_version_for_height(height);
        let zone = self.currency.granted_full_reward_zone_by_version(version);

        let sizes = self.last_units(
            self.main_leaf(),
            self.top_block_index(),
            self.currency.reward_blocks_window(),
            true,
            |info| info.block_size,
        );
        median(sizes).max(zone) * 2
    }

    // ------------------------------------------------------------------
    // Manutenção
    // ------------------------------------------------------------------

    /// Compacta e persiste: descarta alternativas, funde a cadeia principal
    /// num único segmento raiz e grava o snapshot
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de escrita do snapshot
    pub fn save(&mut self) -> Result<(), CoreError> {
        self.compact_to_main_chain();

        if let Some(snapshot) = &self.snapshot {
            snapshot
                .save(&self.segments[0].cache)
                .map_err(|err| CoreError::Storage(err.to_string()))?;
        }

        Ok(())
    }

    /// Funde o caminho principal num único segmento raiz e descarta o resto
    fn compact_to_main_chain(&mut self) {
        let path = self.chain_ancestors_rooted(self.main_leaf());

        let mut caches: Vec<BlockchainCache> = path
            .into_iter()
            .map(|seg| std::mem::take(&mut self.segments[seg].cache))
            .collect();

        let mut root = caches.remove(0);
        for cache in caches {
            root.merge(cache);
        }

        self.segments = vec![SegmentNode {
            cache: root,
            parent: None,
            children: Vec::new(),
        }];
        self.leaves = vec![0];
        self.main_chain_set = HashSet::from([0]);
    }

    fn init_root_segment(&mut self) -> Result<(), CoreError> {
        let restored = match &self.snapshot {
            Some(store) => store
                .load()
                .map_err(|err| CoreError::Storage(err.to_string()))?,
            None => None,
        };

        let (cache, fresh) = match restored {
            Some(cache) if !cache.is_empty() => (cache, false),
            _ => (BlockchainCache::new(0), true),
        };

        self.segments = vec![SegmentNode {
            cache,
            parent: None,
            children: Vec::new(),
        }];
        self.leaves = vec![0];
        self.main_chain_set = HashSet::from([0]);

        if fresh {
            self.push_genesis();
        }

        Ok(())
    }

    fn push_genesis(&mut self) {
        let genesis = self.currency.genesis_block().clone();
        let raw = RawBlock {
            block: genesis.block_binary().to_vec(),
            transactions: vec![],
        };
        let reward = genesis.block().base_transaction.output_amount();
        let size = genesis.block_binary().len() as u64;
        self.push_block_to_segment(0, &genesis, &[], size, reward as i64, 1, raw);
    }

    fn reconcile_with_storage(&mut self) -> Result<(), CoreError> {
        let storage_count = self.storage.block_count();
        let cache_count = self.segments[0].cache.block_count();

        debug!(storage_count, cache_count, "Reconciliando armazenamentos");

        if storage_count > cache_count {
            info!("Importando blocos do vetor de blocos crus");
            self.import_blocks_from_storage()?;
        } else if storage_count < cache_count {
            let cut_from = self.find_common_root()? + 1;
            info!(cut_from, "Cache indexado à frente do vetor; cortando");
            self.cut_root_segment(cut_from);
        } else {
            let tip = self
                .storage
                .block_by_index(storage_count - 1)
                .map_err(|err| CoreError::Storage(err.to_string()))?;
            let tip_hash = CachedBlock::from_binary(&tip.block)
                .map_err(|err| CoreError::CorruptedBlockchain(err.to_string()))?
                .hash();

            if tip_hash != self.segments[0].cache.top_block_hash() {
                info!("Armazenamentos em cadeias distintas; reimportando do ancestral comum");
                self.import_blocks_from_storage()?;
            } else {
                debug!("Armazenamentos na mesma altura e cadeia");
            }
        }

        Ok(())
    }

    /// Maior índice em que o vetor de blocos e o cache raiz coincidem
    fn find_common_root(&mut self) -> Result<u32, CoreError> {
        let storage_count = self.storage.block_count();
        let cache_count = self.segments[0].cache.block_count();
        let mut index = storage_count.min(cache_count);

        while index > 0 {
            index -= 1;
            let raw = self
                .storage
                .block_by_index(index)
                .map_err(|err| CoreError::Storage(err.to_string()))?;
            let hash = CachedBlock::from_binary(&raw.block)
                .map_err(|err| CoreError::CorruptedBlockchain(err.to_string()))?
                .hash();

            if self.segments[0].cache.block_hash(index) == Some(hash) {
                return Ok(index);
            }
        }

        Err(CoreError::CorruptedBlockchain(
            "Vetor de blocos e cache não compartilham nem o gênese".to_string(),
        ))
    }

    fn cut_root_segment(&mut self, start_index: u32) {
        let cache = &mut self.segments[0].cache;
        if cache.is_empty() || cache.top_block_index() < start_index {
            return;
        }
        info!(start_index, "Cortando o segmento raiz");
        let _discarded = cache.split(start_index);
    }

    fn import_blocks_from_storage(&mut self) -> Result<(), CoreError> {
        let common_index = self.find_common_root()?;
        self.cut_root_segment(common_index + 1);

        let mut previous_hash = self.segments[0]
            .cache
            .block_hash(common_index)
            .unwrap_or_else(Hash256::zero);

        let block_count = self.storage.block_count();
        for index in common_index + 1..block_count {
            if self.interrupted.load(Ordering::SeqCst) {
                return Err(CoreError::Interrupted);
            }

            let raw = self
                .storage
                .block_by_index(index)
                .map_err(|err| CoreError::Storage(err.to_string()))?;
            let cached = CachedBlock::from_binary(&raw.block).map_err(|err| {
                CoreError::CorruptedBlockchain(format!(
                    "Bloco {index} indecifrável: {err}"
                ))
            })?;

            if cached.block().previous_block_hash != previous_hash {
                error!(
                    index,
                    "Bloco importado não encadeia com o anterior; ressincronize o nó"
                );
                return Err(CoreError::CorruptedBlockchain(format!(
                    "Bloco {index} não encadeia com o anterior"
                )));
            }
            previous_hash = cached.hash();

            let mut transactions = Vec::with_capacity(raw.transactions.len());
            let mut cumulative_size = cached.block().base_transaction.binary_size();
            for raw_transaction in &raw.transactions {
                let transaction =
                    CachedTransaction::from_binary(raw_transaction).map_err(|err| {
                        CoreError::CorruptedBlockchain(format!(
                            "Transação indecifrável no bloco {index}: {err}"
                        ))
                    })?;
                cumulative_size += raw_transaction.len() as u64;
                transactions.push(transaction);
            }

            let cumulative_fee: u64 = transactions.iter().map(CachedTransaction::fee).sum();
            let current_difficulty = self.difficulty_for_next_block_at(0, index - 1);

            let sizes = self.last_units(
                0,
                index - 1,
                self.currency.reward_blocks_window(),
                true,
                |info| info.block_size,
            );
            let median_size = median(sizes);
            let coins = self
                .block_info_in_chain(0, index - 1)
                .map_or(0, |info| info.already_generated_coins);

            let (_, emission_change) = self
                .currency
                .block_reward(
                    cached.block().major_version,
                    median_size,
                    cumulative_size,
                    coins,
                    cumulative_fee,
                )
                .ok_or_else(|| {
                    CoreError::CorruptedBlockchain(format!(
                        "Bloco {index} com tamanho inaceitável"
                    ))
                })?;

            self.push_block_to_segment(
                0,
                &cached,
                &transactions,
                cumulative_size,
                emission_change,
                current_difficulty,
                raw,
            );

            if index % 1000 == 0 {
                info!(index, total = block_count - 1, "Importação em andamento");
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Árvore de segmentos
    // ------------------------------------------------------------------

    fn main_leaf(&self) -> usize {
        self.leaves[0]
    }

    /// Ancestrais de um segmento, do próprio até a raiz
    fn chain_ancestors(&self, seg: usize) -> Vec<usize> {
        let mut path = vec![seg];
        let mut current = seg;
        while let Some(parent) = self.segments[current].parent {
            path.push(parent);
            current = parent;
        }
        path
    }

    /// Caminho da raiz até o segmento, em ordem crescente de altura
    fn chain_ancestors_rooted(&self, seg: usize) -> Vec<usize> {
        let mut path = self.chain_ancestors(seg);
        path.reverse();
        path
    }

    /// Segmento do caminho que contém o índice dado
    fn chain_segment_for_index(&self, from: usize, block_index: u32) -> Option<usize> {
        let mut current = from;
        loop {
            if self.segments[current].cache.contains_index(block_index) {
                return Some(current);
            }
            current = self.segments[current].parent?;
        }
    }

    fn find_main_chain_segment_containing_index(&self, block_index: u32) -> Option<usize> {
        self.chain_segment_for_index(self.main_leaf(), block_index)
    }

    fn find_main_chain_segment_containing_block_hash(&self, hash: &Hash256) -> Option<usize> {
        let mut current = self.main_leaf();
        loop {
            if self.segments[current].cache.has_block(hash) {
                return Some(current);
            }
            current = self.segments[current].parent?;
        }
    }

    fn find_alternative_segment_containing_block_hash(&self, hash: &Hash256) -> Option<usize> {
        for leaf in self.leaves.iter().skip(1) {
            let mut current = *leaf;
            loop {
                if self.main_chain_set.contains(&current) {
                    break;
                }
                if self.segments[current].cache.has_block(hash) {
                    return Some(current);
                }
                match self.segments[current].parent {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
        }
        None
    }

    /// Segmento alternativo que contém o índice, se existir
    ///
    /// Devolve o primeiro candidato encontrado entre as folhas alternativas.
    #[allow(dead_code)]
    fn find_alternative_segment_containing_index(&self, block_index: u32) -> Option<usize> {
        for leaf in self.leaves.iter().skip(1) {
            let mut current = *leaf;
            loop {
                if self.main_chain_set.contains(&current) {
                    break;
                }
                if self.segments[current].cache.contains_index(block_index) {
                    return Some(current);
                }
                match self.segments[current].parent {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
        }
        None
    }

    fn find_segment_containing_block_hash(&self, hash: &Hash256) -> Option<usize> {
        self.find_main_chain_segment_containing_block_hash(hash)
            .or_else(|| self.find_alternative_segment_containing_block_hash(hash))
    }

    fn find_segment_containing_transaction(&self, transaction_hash: &Hash256) -> Option<usize> {
        // Primeiro o caminho principal
        let mut current = self.main_leaf();
        loop {
            if self.segments[current].cache.has_transaction(transaction_hash) {
                return Some(current);
            }
            match self.segments[current].parent {
                Some(parent) => current = parent,
                None => break,
            }
        }

        // Depois as cadeias alternativas, até encostar na principal
        for leaf in self.leaves.iter().skip(1) {
            let mut current = *leaf;
            while !self.main_chain_set.contains(&current) {
                if self.segments[current].cache.has_transaction(transaction_hash) {
                    return Some(current);
                }
                match self.segments[current].parent {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
        }
        None
    }

    fn block_info_in_chain(&self, from: usize, block_index: u32) -> Option<&CachedBlockInfo> {
        let seg = self.chain_segment_for_index(from, block_index)?;
        self.segments[seg].cache.block_info(block_index)
    }

    /// Janela de valores por bloco terminando em `block_index`, inclusive
    ///
    /// Coleta até `count` valores em ordem crescente de altura; com
    /// `include_genesis` falso a janela para no bloco 1.
    fn last_units(
        &self,
        from: usize,
        block_index: u32,
        count: usize,
        include_genesis: bool,
        map: impl Fn(&CachedBlockInfo) -> u64,
    ) -> Vec<u64> {
        let lowest = u32::from(!include_genesis);
        let mut values = Vec::with_capacity(count);
        let mut index = block_index;

        while values.len() < count && index >= lowest {
            if let Some(info) = self.block_info_in_chain(from, index) {
                values.push(map(info));
            }
            if index == 0 {
                break;
            }
            index -= 1;
        }

        values.reverse();
        values
    }

    fn is_spent_in_chain(&self, seg: usize, key_image: &KeyImage, block_index: u32) -> bool {
        self.chain_ancestors(seg)
            .into_iter()
            .any(|current| self.segments[current].cache.is_spent(key_image, block_index))
    }

    /// Registro de saída pelo índice global, respeitando a altura limite
    fn chain_output_record(
        &self,
        seg: usize,
        amount: u64,
        global_index: u32,
        block_index: u32,
    ) -> Result<OutputRecord, TransactionValidationError> {
        for current in self.chain_ancestors(seg) {
            if let Some(record) = self.segments[current].cache.output_record(amount, global_index)
            {
                if record.packed.block_index > block_index {
                    return Err(TransactionValidationError::InputInvalidGlobalIndex);
                }
                return Ok(*record);
            }
        }
        Err(TransactionValidationError::InputInvalidGlobalIndex)
    }

    /// Total de saídas registradas para um valor ao longo do caminho
    fn chain_key_outputs_total(&self, seg: usize, amount: u64) -> u32 {
        self.chain_ancestors(seg)
            .into_iter()
            .map(|current| self.segments[current].cache.output_records(amount).len() as u32)
            .sum()
    }

    /// Interpreta o tempo de desbloqueio como altura ou timestamp
    fn is_unlocked(&self, unlock_time: u64, block_index: u32) -> bool {
        if unlock_time < currency::UNLOCK_TIME_HEIGHT_THRESHOLD {
            u64::from(block_index) + currency::LOCKED_TX_ALLOWED_DELTA_BLOCKS >= unlock_time
        } else {
            self.time.now() + currency::LOCKED_TX_ALLOWED_DELTA_SECONDS >= unlock_time
        }
    }

    /// Dificuldade do bloco seguinte a `block_index` no caminho de `seg`
    fn difficulty_for_next_block_at(&self, seg: usize, block_index: u32) -> u64 {
        let next_index = block_index + 1;
        let version = self.upgrade_manager.major_version_for_height(next_index);
        let count = (block_index as usize).min(crate::difficulty::difficulty_blocks_count(version));

        let timestamps = self.last_units(seg, block_index, count, false, |info| info.timestamp);
        let difficulties =
            self.last_units(seg, block_index, count, false, |info| info.cumulative_difficulty);

        self.currency
            .next_difficulty(version, next_index, timestamps, difficulties)
    }

    fn update_block_median_size(&mut self) {
        let top = self.top_block_index();
        let sizes = self.last_units(
            self.main_leaf(),
            top,
            self.currency.reward_blocks_window(),
            true,
            |info| info.block_size,
        );

        let version = self.upgrade_manager.major_version_for_height(top + 1);
        self.block_median_size = median(sizes)
            .max(self.currency.granted_full_reward_zone_by_version(version));
    }

    fn update_main_chain_set(&mut self) {
        self.main_chain_set = self.chain_ancestors(self.main_leaf()).into_iter().collect();
    }

    /// Particiona um segmento, preservando a topologia da árvore
    fn split_segment(&mut self, seg: usize, split_index: u32) -> usize {
        let upper_cache = self.segments[seg].cache.split(split_index);
        let upper_children = std::mem::take(&mut self.segments[seg].children);

        let upper = self.segments.len();
        self.segments.push(SegmentNode {
            cache: upper_cache,
            parent: Some(seg),
            children: upper_children,
        });

        let children = self.segments[upper].children.clone();
        for child in children {
            self.segments[child].parent = Some(upper);
        }
        self.segments[seg].children = vec![upper];

        // Se o segmento partido era folha, a parte superior o substitui
        if let Some(position) = self.leaves.iter().position(|leaf| *leaf == seg) {
            self.leaves[position] = upper;
        }

        upper
    }

    /// Registra uma nova folha filha começando em `start_index`
    fn add_child_segment(&mut self, seg: usize, start_index: u32) -> usize {
        let new_seg = self.segments.len();
        self.segments.push(SegmentNode {
            cache: BlockchainCache::new(start_index),
            parent: Some(seg),
            children: Vec::new(),
        });
        self.segments[seg].children.push(new_seg);
        self.leaves.push(new_seg);
        new_seg
    }

    /// Insere um bloco validado no topo de um segmento
    #[allow(clippy::too_many_arguments)]
    fn push_block_to_segment(
        &mut self,
        seg: usize,
        cached: &CachedBlock,
        transactions: &[CachedTransaction],
        block_size: u64,
        emission_change: i64,
        block_difficulty: u64,
        raw_block: RawBlock,
    ) {
        let tail = if self.segments[seg].cache.is_empty() {
            let start = self.segments[seg].cache.start_block_index();
            match self.segments[seg].parent {
                Some(parent) if start > 0 => self
                    .block_info_in_chain(parent, start - 1)
                    .map_or_else(ChainTail::default, |info| ChainTail {
                        cumulative_difficulty: info.cumulative_difficulty,
                        already_generated_coins: info.already_generated_coins,
                        already_generated_transactions: info.already_generated_transactions,
                    }),
                _ => ChainTail::default(),
            }
        } else {
            self.segments[seg].cache.tail()
        };

        // Índices globais: continuam a contagem da cadeia por valor
        let mut next_global: HashMap<u64, u32> = HashMap::new();
        let mut all = Vec::with_capacity(1 + transactions.len());
        all.push((
            cached.block().base_transaction.clone(),
            cached.block().base_transaction.hash(),
            true,
        ));
        for transaction in transactions {
            all.push((transaction.transaction().clone(), transaction.hash(), false));
        }

        let mut push_transactions = Vec::with_capacity(all.len());
        for (transaction, hash, is_base) in all {
            let mut outputs = Vec::with_capacity(transaction.prefix.outputs.len());
            let mut global_indexes = Vec::with_capacity(transaction.prefix.outputs.len());
            for output in &transaction.prefix.outputs {
                let TransactionOutputTarget::Key(key_output) = output.target;
                let next = next_global.entry(output.amount).or_insert_with(|| {
                    self.chain_key_outputs_total(seg, output.amount)
                });
                outputs.push(KeyOutputInfo {
                    amount: output.amount,
                    key: key_output.key,
                });
                global_indexes.push(*next);
                *next += 1;
            }

            let key_images = transaction
                .prefix
                .inputs
                .iter()
                .filter_map(|input| match input {
                    TransactionInput::Key(key) => Some(key.key_image),
                    TransactionInput::Base(_) => None,
                })
                .collect();

            push_transactions.push(TransactionPushData {
                hash,
                unlock_time: transaction.prefix.unlock_time,
                is_base,
                outputs,
                global_indexes,
                key_images,
                payment_id: payment_id_from_extra(&transaction.prefix.extra),
            });
        }

        self.segments[seg].cache.push_block(
            BlockPushData {
                block_hash: cached.hash(),
                timestamp: cached.block().timestamp,
                block_size,
                block_difficulty,
                emission_change,
                transactions: push_transactions,
                raw_block,
            },
            tail,
        );
    }

    /// Promove `seg` a folha principal se a sua dificuldade cumulativa
    /// exceder estritamente a da cadeia principal corrente
    ///
    /// Todos os dados da troca (hashes do anúncio, blocos crus do ramo) são
    /// juntados antes de qualquer mutação, e a reescrita do vetor de blocos
    /// vem antes das mutações em memória: uma falha na reescrita devolve o
    /// erro com o estado pré-troca do núcleo intacto. Devolve os dados da
    /// mensagem de troca quando a promoção acontece.
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de escrita do vetor de blocos crus
    fn try_switch_to_leaf(
        &mut self,
        seg: usize,
    ) -> Result<Option<ChainSwitchInfo>, CoreError> {
        let main_leaf = self.main_leaf();
        if self.segments[seg].cache.current_cumulative_difficulty()
            <= self.segments[main_leaf].cache.current_cumulative_difficulty()
        {
            return Ok(None);
        }

        let Some(endpoint) = self.leaves.iter().position(|leaf| *leaf == seg) else {
            return Ok(None);
        };

        // Segmentos do novo ramo fora da cadeia principal corrente, em
        // ordem crescente de altura
        let mut branch_segments = Vec::new();
        let mut current = seg;
        loop {
            if self.main_chain_set.contains(&current) {
                break;
            }
            branch_segments.push(current);
            match self.segments[current].parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        branch_segments.reverse();

        let Some(first_segment) = branch_segments.first() else {
            return Ok(None);
        };
        let split_index = self.segments[*first_segment].cache.start_block_index();
        let common_root_index = split_index.saturating_sub(1);

        // Anúncio da troca: raiz comum seguida de todo o novo ramo, mesmo
        // quando ele atravessa mais de um segmento
        let mut hashes = Vec::new();
        if split_index > 0 {
            let root_hash = self
                .chain_segment_for_index(seg, common_root_index)
                .and_then(|s| self.segments[s].cache.block_hash(common_root_index));
            if let Some(root_hash) = root_hash {
                hashes.push(root_hash);
            }
        }
        for branch_segment in &branch_segments {
            let cache = &self.segments[*branch_segment].cache;
            hashes.extend(cache.block_hashes_range(cache.start_block_index(), usize::MAX));
        }

        // Blocos crus do novo ramo, juntados antes de tocar no arquivo
        let top = self.segments[seg].cache.top_block_index();
        let mut branch_blocks = Vec::with_capacity((top - split_index + 1) as usize);
        for index in split_index..=top {
            let raw = self
                .chain_segment_for_index(seg, index)
                .and_then(|s| self.segments[s].cache.raw_block(index).cloned())
                .ok_or_else(|| {
                    CoreError::CorruptedBlockchain(format!(
                        "Bloco {index} ausente do novo ramo principal"
                    ))
                })?;
            branch_blocks.push(raw);
        }

        self.rewrite_main_chain_storage(split_index, branch_blocks)?;

        // Daqui em diante só mutações infalíveis
        self.leaves.swap(0, endpoint);
        self.update_main_chain_set();
        self.update_block_median_size();
        self.actualize_pool_transactions();
        self.copy_transactions_to_pool(self.leaves[endpoint]);

        info!(
            new_top = self.top_block_index(),
            previous_top = self.segments[self.leaves[endpoint]].cache.top_block_index(),
            "Troca de cadeia resolvida"
        );

        Ok(Some(ChainSwitchInfo {
            common_root_index,
            blocks_from_common_root: hashes,
        }))
    }

    /// Reescreve o vetor de blocos crus para refletir a nova cadeia
    ///
    /// Rebobina até o ancestral comum com a cadeia antiga e empurra os
    /// blocos do novo ramo.
    fn rewrite_main_chain_storage(
        &mut self,
        split_index: u32,
        branch_blocks: Vec<RawBlock>,
    ) -> Result<(), CoreError> {
        let storage_count = self.storage.block_count();
        for _ in split_index..storage_count {
            self.storage
                .pop_block()
                .map_err(|err| CoreError::Storage(err.to_string()))?;
        }

        for raw in branch_blocks {
            self.storage
                .push_block(raw)
                .map_err(|err| CoreError::Storage(err.to_string()))?;
        }

        Ok(())
    }

    /// Devolve ao pool as transações do ramo abandonado, no melhor esforço
    fn copy_transactions_to_pool(&mut self, abandoned_leaf: usize) {
        let mut current = abandoned_leaf;
        loop {
            if self.main_chain_set.contains(&current) {
                break;
            }

            let hashes = self.segments[current].cache.non_base_transaction_hashes();
            let mut binaries = Vec::with_capacity(hashes.len());
            for hash in hashes {
                if let Some(info) = self.segments[current].cache.transaction_info(&hash) {
                    if let Some(binary) = self.segments[current]
                        .cache
                        .raw_transaction(info.block_index, info.transaction_index)
                    {
                        binaries.push(binary);
                    }
                }
            }

            let now = self.time.now();
            for binary in binaries {
                if let Ok(cached) = CachedTransaction::from_binary(&binary) {
                    // Inválidas contra a nova cadeia são simplesmente descartadas
                    let _ = self.add_cached_transaction_to_pool(cached, now);
                }
            }

            match self.segments[current].parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }

    fn notify(&self, message: BlockchainMessage) {
        // Sem observadores inscritos o envio falha; não é um erro
        let _ = self.notifier.send(message);
    }
}

/// Mediana de uma amostra; zero para amostras vazias
fn median(mut values: Vec<u64>) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.sort_unstable();
    let middle = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[middle - 1] + values[middle]) / 2
    } else {
        values[middle]
    }
}

/// Laço do limpador do pool
///
/// Roda até o sinal de desligamento; cada passe toma a pista de escrita do
/// núcleo apenas pelo tempo da limpeza.
pub async fn run_pool_cleaner(
    core: Arc<tokio::sync::RwLock<Core>>,
    period: std::time::Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = core.write().await.clean_pool();
                if !evicted.is_empty() {
                    debug!(count = evicted.len(), "Passo do limpador do pool concluído");
                }
            }
            _ = shutdown.changed() => {
                debug!("Limpador do pool encerrado");
                return;
            }
        }
    }
}
