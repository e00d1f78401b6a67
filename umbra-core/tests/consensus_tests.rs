//! Testes de ponta a ponta do núcleo de consenso
//!
//! Cada teste monta nós com moeda de rede reduzida (janela de maturação
//! curta) e minera blocos de verdade contra a dificuldade corrente.

use shared::{
    derive_output_key, derive_output_secret_key, generate_key_image, generate_ring_signature,
    torsioned_point_bytes, Hash256, KeyImage, KeyPair,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use umbra_core::block::{CachedBlock, RawBlock};
use umbra_core::checkpoints::Checkpoints;
use umbra_core::core::{Core, TimeProvider};
use umbra_core::currency::{Currency, CurrencyBuilder};
use umbra_core::difficulty::check_hash;
use umbra_core::error::{AddBlockError, AddBlockResult, BlockValidationError};
use umbra_core::messages::BlockchainMessage;
use umbra_core::serialization::{ConsensusDecode, ConsensusEncode};
use umbra_core::storage::MainChainStorage;
use umbra_core::transaction::{
    build_extra, public_key_from_extra, KeyInput, KeyOutput, Transaction, TransactionInput,
    TransactionOutput, TransactionOutputTarget, TransactionPrefix,
};

const START_TIME: u64 = 1_700_000_000;
const BLOCK_INTERVAL: u64 = 90;
const TEST_FEE: u64 = 10_000;

/// Relógio manual compartilhado entre o teste e o núcleo
#[derive(Clone)]
struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    fn new() -> Self {
        Self(Arc::new(AtomicU64::new(START_TIME)))
    }

    fn advance(&self, seconds: u64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }

    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl TimeProvider for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Vetor de blocos inspecionável por fora do núcleo
#[derive(Clone, Default)]
struct SharedStorage(Arc<Mutex<Vec<RawBlock>>>);

impl SharedStorage {
    fn block_hashes(&self) -> Vec<Hash256> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|raw| CachedBlock::from_binary(&raw.block).unwrap().hash())
            .collect()
    }
}

impl MainChainStorage for SharedStorage {
    fn push_block(&mut self, raw_block: RawBlock) -> shared::Result<()> {
        self.0.lock().unwrap().push(raw_block);
        Ok(())
    }

    fn pop_block(&mut self) -> shared::Result<()> {
        self.0
            .lock()
            .unwrap()
            .pop()
            .map(|_| ())
            .ok_or_else(|| shared::NodeError::StorageError("vazio".to_string()))
    }

    fn block_by_index(&mut self, index: u32) -> shared::Result<RawBlock> {
        self.0
            .lock()
            .unwrap()
            .get(index as usize)
            .cloned()
            .ok_or_else(|| shared::NodeError::StorageError("fora do vetor".to_string()))
    }

    fn block_count(&self) -> u32 {
        self.0.lock().unwrap().len() as u32
    }

    fn clear(&mut self) -> shared::Result<()> {
        self.0.lock().unwrap().clear();
        Ok(())
    }
}

struct Node {
    core: Core,
    clock: ManualClock,
    storage: SharedStorage,
    wallet: KeyPair,
}

fn test_currency() -> Currency {
    CurrencyBuilder::new()
        .mined_money_unlock_window(4)
        .currency()
}

fn small_zone_currency() -> Currency {
    CurrencyBuilder::new()
        .mined_money_unlock_window(4)
        .granted_full_reward_zone_v1(1000)
        .granted_full_reward_zone(1000)
        .currency()
}

fn new_node(currency: Currency) -> Node {
    new_node_with_checkpoints(currency, Checkpoints::new())
}

fn new_node_with_checkpoints(currency: Currency, checkpoints: Checkpoints) -> Node {
    let clock = ManualClock::new();
    let storage = SharedStorage::default();
    let core = Core::load(
        currency,
        checkpoints,
        Box::new(storage.clone()),
        None,
        Box::new(clock.clone()),
    )
    .unwrap();

    Node {
        core,
        clock,
        storage,
        wallet: KeyPair::generate(),
    }
}

/// Minera o próximo bloco do nó, incluindo o que o pool oferecer
fn mine_raw_block(node: &mut Node) -> (RawBlock, Hash256) {
    let miner_key = node.wallet.public_key;
    let response = node.core.block_template(&miner_key, &[]).unwrap();

    let mut template = response.block_template;
    let transactions: Vec<Vec<u8>> = template
        .transaction_hashes
        .iter()
        .map(|hash| node.core.pool_transaction(hash).unwrap())
        .collect();

    loop {
        let cached = CachedBlock::new(template.clone());
        if check_hash(&cached.long_hash(), response.difficulty) {
            let hash = cached.hash();
            return (
                RawBlock {
                    block: template.to_binary(),
                    transactions,
                },
                hash,
            );
        }
        template.nonce = template.nonce.wrapping_add(1);
    }
}

/// Minera e insere um bloco na cadeia principal do nó
fn mine_and_add(node: &mut Node) -> Hash256 {
    let (raw, hash) = mine_raw_block(node);
    let result = node.core.add_block(raw).unwrap();
    assert!(matches!(
        result,
        AddBlockResult::AddedToMain | AddBlockResult::AddedToAlternativeAndSwitched
    ));
    node.clock.advance(BLOCK_INTERVAL);
    hash
}

/// Constrói uma transação que gasta a maior saída da base do bloco dado
fn build_spend_transaction(
    node: &Node,
    coinbase_height: u32,
    fee: u64,
    output_split: usize,
) -> Vec<u8> {
    let block = node.core.block_by_index(coinbase_height).unwrap();
    let base = &block.base_transaction;

    let tx_public_key = public_key_from_extra(&base.prefix.extra).unwrap();
    let output_index = base.prefix.outputs.len() - 1;
    let output = &base.prefix.outputs[output_index];
    let TransactionOutputTarget::Key(key_output) = output.target;

    let global_indexes = node
        .core
        .transaction_global_indexes(&base.hash())
        .unwrap();
    let global_index = global_indexes[output_index];

    let secret =
        derive_output_secret_key(&tx_public_key, output_index as u64, &node.wallet).unwrap();
    let spend_keys = KeyPair {
        public_key: key_output.key,
        secret_key: secret.clone(),
    };
    let key_image = generate_key_image(&spend_keys).unwrap();

    let destination = KeyPair::generate();
    let new_tx_keys = KeyPair::generate();

    let spendable = output.amount - fee;
    let mut outputs = Vec::new();
    let split = output_split.max(1);
    let remainder = spendable - (split as u64 - 1);
    for index in 0..split {
        let amount = if index == 0 { remainder } else { 1 };
        outputs.push(TransactionOutput {
            amount,
            target: TransactionOutputTarget::Key(KeyOutput {
                key: derive_output_key(
                    &new_tx_keys.public_key,
                    index as u64,
                    &destination.public_key,
                )
                .unwrap(),
            }),
        });
    }

    let mut transaction = Transaction {
        prefix: TransactionPrefix {
            version: 1,
            unlock_time: 0,
            inputs: vec![TransactionInput::Key(KeyInput {
                amount: output.amount,
                output_indexes: vec![global_index],
                key_image,
            })],
            outputs,
            extra: build_extra(&new_tx_keys.public_key, &[]),
        },
        signatures: vec![],
    };

    let ring = vec![key_output.key];
    let signature =
        generate_ring_signature(&transaction.prefix_hash(), &key_image, &ring, &secret, 0)
            .unwrap();
    transaction.signatures.push(signature);

    transaction.to_binary()
}

#[test]
fn test_fresh_node_starts_at_genesis() {
    let node = new_node(test_currency());

    assert_eq!(node.core.top_block_index(), 0);
    assert_eq!(node.core.top_block_hash(), node.core.currency().genesis_hash());
    assert_eq!(node.core.difficulty_for_next_block(), 1);
    assert_eq!(node.storage.block_hashes().len(), 1);
}

#[test]
fn test_genesis_node_accepts_canonical_block() {
    let mut node = new_node(test_currency());

    let (raw, hash) = mine_raw_block(&mut node);
    let result = node.core.add_block(raw).unwrap();

    assert!(matches!(result, AddBlockResult::AddedToMain));
    assert_eq!(node.core.top_block_index(), 1);
    assert_eq!(node.core.top_block_hash(), hash);
    assert_eq!(node.storage.block_hashes().last(), Some(&hash));
}

#[test]
fn test_add_block_is_idempotent() {
    let mut node = new_node(test_currency());

    let (raw, _) = mine_raw_block(&mut node);
    let first = node.core.add_block(raw.clone()).unwrap();
    let second = node.core.add_block(raw).unwrap();

    assert!(matches!(first, AddBlockResult::AddedToMain));
    assert!(matches!(second, AddBlockResult::AlreadyExists));
    assert_eq!(node.core.top_block_index(), 1);
}

#[test]
fn test_orphan_block_is_rejected() {
    let mut node = new_node(test_currency());
    let mut foreign = new_node(test_currency());

    // Bloco de um nó à frente chega sem o pai: órfão
    mine_and_add(&mut foreign);
    let (raw, _) = mine_raw_block(&mut foreign);

    let result = node.core.add_block(raw);
    assert!(matches!(result, Err(AddBlockError::RejectedAsOrphaned)));
}

#[test]
fn test_timestamp_future_limit_boundary() {
    let mut node = new_node(test_currency());
    let limit = 7200;

    // Exatamente no limite: aceito
    let response = node
        .core
        .block_template(&node.wallet.public_key, &[])
        .unwrap();
    let mut template = response.block_template;
    template.timestamp = node.clock.now() + limit;
    loop {
        let cached = CachedBlock::new(template.clone());
        if check_hash(&cached.long_hash(), response.difficulty) {
            break;
        }
        template.nonce = template.nonce.wrapping_add(1);
    }
    let result = node
        .core
        .add_block(RawBlock {
            block: template.to_binary(),
            transactions: vec![],
        })
        .unwrap();
    assert!(matches!(result, AddBlockResult::AddedToMain));

    // Um segundo além do limite: rejeitado antes da prova de trabalho
    let response = node
        .core
        .block_template(&node.wallet.public_key, &[])
        .unwrap();
    let mut template = response.block_template;
    template.timestamp = node.clock.now() + limit + 1;
    let result = node.core.add_block(RawBlock {
        block: template.to_binary(),
        transactions: vec![],
    });
    assert!(matches!(
        result,
        Err(AddBlockError::BlockValidation(
            BlockValidationError::TimestampTooFarInFuture
        ))
    ));
}

#[test]
fn test_reorg_to_heavier_fork() {
    let mut node1 = new_node(test_currency());
    let mut node2 = new_node(test_currency());

    // História compartilhada de seis blocos
    for _ in 0..6 {
        let (raw, _) = mine_raw_block(&mut node1);
        node1.core.add_block(raw.clone()).unwrap();
        node2.core.add_block(raw).unwrap();
        node1.clock.advance(BLOCK_INTERVAL);
        node2.clock.advance(BLOCK_INTERVAL);
    }

    // node1 minera o bloco 7 com uma transação exclusiva
    let spend = build_spend_transaction(&node1, 1, TEST_FEE, 1);
    let spend_hash = umbra_core::transaction::CachedTransaction::from_binary(&spend)
        .unwrap()
        .hash();
    assert!(node1.core.add_transaction_to_pool(&spend));

    let (raw7, _) = mine_raw_block(&mut node1);
    assert_eq!(raw7.transactions.len(), 1);
    node1.core.add_block(raw7).unwrap();
    node1.clock.advance(BLOCK_INTERVAL);
    assert!(node1.core.pool_transaction_hashes().is_empty());

    // node2 minera um ramo mais pesado: 7' e 8'
    let (raw7b, hash7b) = mine_raw_block(&mut node2);
    node2.core.add_block(raw7b.clone()).unwrap();
    node2.clock.advance(BLOCK_INTERVAL);
    let (raw8b, hash8b) = mine_raw_block(&mut node2);
    node2.core.add_block(raw8b.clone()).unwrap();
    node2.clock.advance(BLOCK_INTERVAL);

    // O ramo chega ao node1
    let mut observer = node1.core.subscribe();
    let result7 = node1.core.add_block(raw7b).unwrap();
    assert!(matches!(result7, AddBlockResult::AddedToAlternative));

    let result8 = node1.core.add_block(raw8b).unwrap();
    assert!(matches!(
        result8,
        AddBlockResult::AddedToAlternativeAndSwitched
    ));

    // Topo e vetor de blocos refletem o novo ramo
    assert_eq!(node1.core.top_block_index(), 8);
    assert_eq!(node1.core.top_block_hash(), hash8b);
    let hashes = node1.storage.block_hashes();
    assert_eq!(hashes.len(), 9);
    assert_eq!(hashes[7], hash7b);
    assert_eq!(hashes[8], hash8b);

    // A transação exclusiva do ramo abandonado volta ao pool
    assert!(node1.core.pool_transaction_hashes().contains(&spend_hash));

    // Observadores recebem a troca de cadeia a partir da raiz comum
    let mut saw_switch = false;
    while let Ok(message) = observer.try_recv() {
        if let BlockchainMessage::ChainSwitch {
            common_root_index,
            blocks_from_common_root,
        } = message
        {
            assert_eq!(common_root_index, 6);
            assert!(blocks_from_common_root.contains(&hash7b));
            assert!(blocks_from_common_root.contains(&hash8b));
            saw_switch = true;
        }
    }
    assert!(saw_switch);
}

#[test]
fn test_reorg_after_sibling_fork_at_same_height() {
    let mut node1 = new_node(test_currency());
    let mut node2 = new_node(test_currency());
    let mut node3 = new_node(test_currency());

    // História compartilhada de cinco blocos
    let mut hash5 = Hash256::zero();
    for _ in 0..5 {
        let (raw, hash) = mine_raw_block(&mut node1);
        node1.core.add_block(raw.clone()).unwrap();
        node2.core.add_block(raw.clone()).unwrap();
        node3.core.add_block(raw).unwrap();
        node1.clock.advance(BLOCK_INTERVAL);
        node2.clock.advance(BLOCK_INTERVAL);
        node3.clock.advance(BLOCK_INTERVAL);
        hash5 = hash;
    }

    // node1 avança a principal até a altura 7
    mine_and_add(&mut node1);
    mine_and_add(&mut node1);

    // Primeira bifurcação na altura 6 parte a raiz e cria um filho
    let (raw6b, _hash6b) = mine_raw_block(&mut node2);
    node2.core.add_block(raw6b.clone()).unwrap();
    node2.clock.advance(BLOCK_INTERVAL);
    assert!(matches!(
        node1.core.add_block(raw6b).unwrap(),
        AddBlockResult::AddedToAlternative
    ));

    // Segunda bifurcação na MESMA altura: o pai já tem um filho, então o
    // novo bloco vira uma folha irmã
    let (raw6c, hash6c) = mine_raw_block(&mut node3);
    node3.core.add_block(raw6c.clone()).unwrap();
    node3.clock.advance(BLOCK_INTERVAL);
    assert!(matches!(
        node1.core.add_block(raw6c).unwrap(),
        AddBlockResult::AddedToAlternative
    ));

    // A folha irmã cresce até pesar mais que a principal
    let (raw7c, hash7c) = mine_raw_block(&mut node3);
    node3.core.add_block(raw7c.clone()).unwrap();
    node3.clock.advance(BLOCK_INTERVAL);
    assert!(matches!(
        node1.core.add_block(raw7c).unwrap(),
        AddBlockResult::AddedToAlternative
    ));

    let (raw8c, hash8c) = mine_raw_block(&mut node3);
    node3.core.add_block(raw8c.clone()).unwrap();
    node3.clock.advance(BLOCK_INTERVAL);

    let mut observer = node1.core.subscribe();
    assert!(matches!(
        node1.core.add_block(raw8c).unwrap(),
        AddBlockResult::AddedToAlternativeAndSwitched
    ));

    assert_eq!(node1.core.top_block_index(), 8);
    assert_eq!(node1.core.top_block_hash(), hash8c);

    // O vetor de blocos reflete o novo ramo por inteiro
    let hashes = node1.storage.block_hashes();
    assert_eq!(hashes.len(), 9);
    assert_eq!(hashes[5], hash5);
    assert_eq!(hashes[6], hash6c);
    assert_eq!(hashes[7], hash7c);
    assert_eq!(hashes[8], hash8c);

    // A troca é anunciada a partir da raiz comum
    let mut saw_switch = false;
    while let Ok(message) = observer.try_recv() {
        if let BlockchainMessage::ChainSwitch {
            common_root_index,
            blocks_from_common_root,
        } = message
        {
            assert_eq!(common_root_index, 5);
            assert_eq!(
                blocks_from_common_root,
                vec![hash5, hash6c, hash7c, hash8c]
            );
            saw_switch = true;
        }
    }
    assert!(saw_switch);
    assert!(node1.core.pool_transaction_hashes().is_empty());
}

#[test]
fn test_reorg_after_fork_below_alternative_tip() {
    let mut node1 = new_node(test_currency());
    let mut node2 = new_node(test_currency());
    let mut node3 = new_node(test_currency());

    // História compartilhada de cinco blocos
    let mut hash5 = Hash256::zero();
    for _ in 0..5 {
        let (raw, hash) = mine_raw_block(&mut node1);
        node1.core.add_block(raw.clone()).unwrap();
        node2.core.add_block(raw.clone()).unwrap();
        node3.core.add_block(raw).unwrap();
        node1.clock.advance(BLOCK_INTERVAL);
        node2.clock.advance(BLOCK_INTERVAL);
        node3.clock.advance(BLOCK_INTERVAL);
        hash5 = hash;
    }

    // node1 avança até a altura 7; o bloco 7 leva uma transação exclusiva
    mine_and_add(&mut node1);
    let spend = build_spend_transaction(&node1, 1, TEST_FEE, 1);
    let spend_hash = umbra_core::transaction::CachedTransaction::from_binary(&spend)
        .unwrap()
        .hash();
    assert!(node1.core.add_transaction_to_pool(&spend));
    let (raw7, _) = mine_raw_block(&mut node1);
    assert_eq!(raw7.transactions.len(), 1);
    node1.core.add_block(raw7).unwrap();
    node1.clock.advance(BLOCK_INTERVAL);

    // node2 minera um ramo alternativo 6',7' que chega inteiro ao node1
    let (raw6b, hash6b) = mine_raw_block(&mut node2);
    node2.core.add_block(raw6b.clone()).unwrap();
    node2.clock.advance(BLOCK_INTERVAL);
    node3.core.add_block(raw6b.clone()).unwrap();
    node3.clock.advance(BLOCK_INTERVAL);
    assert!(matches!(
        node1.core.add_block(raw6b).unwrap(),
        AddBlockResult::AddedToAlternative
    ));

    let (raw7b, _hash7b) = mine_raw_block(&mut node2);
    node2.core.add_block(raw7b.clone()).unwrap();
    node2.clock.advance(BLOCK_INTERVAL);
    assert!(matches!(
        node1.core.add_block(raw7b).unwrap(),
        AddBlockResult::AddedToAlternative
    ));

    // node3 bifurca ABAIXO do topo do ramo alternativo: o 7'' parte o
    // segmento [6',7'] ao meio
    let (raw7c, hash7c) = mine_raw_block(&mut node3);
    node3.core.add_block(raw7c.clone()).unwrap();
    node3.clock.advance(BLOCK_INTERVAL);
    assert!(matches!(
        node1.core.add_block(raw7c).unwrap(),
        AddBlockResult::AddedToAlternative
    ));

    // O sub-ramo cresce e fica mais pesado que a principal
    let (raw8c, hash8c) = mine_raw_block(&mut node3);
    node3.core.add_block(raw8c.clone()).unwrap();
    node3.clock.advance(BLOCK_INTERVAL);

    let mut observer = node1.core.subscribe();
    assert!(matches!(
        node1.core.add_block(raw8c).unwrap(),
        AddBlockResult::AddedToAlternativeAndSwitched
    ));

    assert_eq!(node1.core.top_block_index(), 8);
    assert_eq!(node1.core.top_block_hash(), hash8c);

    // O novo ramo atravessa dois segmentos ([6'] e [7'',8'']); o vetor de
    // blocos precisa carregar o bloco do segmento intermediário também
    let hashes = node1.storage.block_hashes();
    assert_eq!(hashes.len(), 9);
    assert_eq!(hashes[5], hash5);
    assert_eq!(hashes[6], hash6b);
    assert_eq!(hashes[7], hash7c);
    assert_eq!(hashes[8], hash8c);

    // O anúncio cobre todos os segmentos do novo ramo
    let mut saw_switch = false;
    while let Ok(message) = observer.try_recv() {
        if let BlockchainMessage::ChainSwitch {
            common_root_index,
            blocks_from_common_root,
        } = message
        {
            assert_eq!(common_root_index, 5);
            assert_eq!(
                blocks_from_common_root,
                vec![hash5, hash6b, hash7c, hash8c]
            );
            saw_switch = true;
        }
    }
    assert!(saw_switch);

    // A transação exclusiva do ramo abandonado volta ao pool
    assert!(node1.core.pool_transaction_hashes().contains(&spend_hash));
}

#[test]
fn test_pool_ttl_eviction() {
    let currency = CurrencyBuilder::new()
        .mined_money_unlock_window(4)
        .mempool_tx_live_time(100)
        .currency();
    let mut node = new_node(currency);

    for _ in 0..6 {
        mine_and_add(&mut node);
    }

    let spend = build_spend_transaction(&node, 1, TEST_FEE, 1);
    let spend_hash = umbra_core::transaction::CachedTransaction::from_binary(&spend)
        .unwrap()
        .hash();
    assert!(node.core.add_transaction_to_pool(&spend));
    assert!(node.core.has_transaction(&spend_hash));

    let mut observer = node.core.subscribe();
    node.clock.advance(101);
    let evicted = node.core.clean_pool();

    assert_eq!(evicted, vec![spend_hash]);
    assert!(!node.core.has_transaction(&spend_hash));

    let mut saw_outdated = false;
    while let Ok(message) = observer.try_recv() {
        if let BlockchainMessage::DeleteTransaction { hashes, reason } = message {
            assert_eq!(hashes, vec![spend_hash]);
            assert!(matches!(
                reason,
                umbra_core::messages::DeleteTransactionReason::Outdated
            ));
            saw_outdated = true;
        }
    }
    assert!(saw_outdated);

    // Recém-removida: o pool suprime a readmissão
    assert!(!node.core.add_transaction_to_pool(&spend));
}

#[test]
fn test_pool_rejects_double_spend() {
    let mut node = new_node(test_currency());
    for _ in 0..6 {
        mine_and_add(&mut node);
    }

    // Dois gastos da mesma saída: hashes distintos, mesma imagem de chave
    let first = build_spend_transaction(&node, 1, TEST_FEE, 1);
    let second = build_spend_transaction(&node, 1, TEST_FEE, 2);

    assert!(node.core.add_transaction_to_pool(&first));
    assert_eq!(node.core.pool_transaction_count(), 1);

    assert!(!node.core.add_transaction_to_pool(&second));
    assert_eq!(node.core.pool_transaction_count(), 1);
}

#[test]
fn test_pool_rejects_zero_amount_output() {
    let mut node = new_node(test_currency());
    for _ in 0..6 {
        mine_and_add(&mut node);
    }

    // Desserializa um gasto válido, zera a saída e tenta de novo
    let spend = build_spend_transaction(&node, 1, TEST_FEE, 1);
    let mut decoded = Transaction::from_binary(&spend).unwrap();
    decoded.prefix.outputs[0].amount = 0;
    assert!(!node.core.add_transaction_to_pool(&decoded.to_binary()));
}

#[test]
fn test_pool_rejects_torsioned_key_image() {
    let mut node = new_node(test_currency());
    for _ in 0..6 {
        mine_and_add(&mut node);
    }

    let spend = build_spend_transaction(&node, 1, TEST_FEE, 1);
    let mut decoded = Transaction::from_binary(&spend).unwrap();
    if let TransactionInput::Key(key) = &mut decoded.prefix.inputs[0] {
        key.key_image = KeyImage(torsioned_point_bytes());
    }
    assert!(!node.core.add_transaction_to_pool(&decoded.to_binary()));
}

#[test]
fn test_template_excludes_oversized_transaction() {
    let mut node = new_node(small_zone_currency());
    for _ in 0..6 {
        mine_and_add(&mut node);
    }

    // Transação de ~1KB: cabe no pool, não cabe no orçamento do template
    let bulky = build_spend_transaction(&node, 1, TEST_FEE, 20);
    assert!(bulky.len() > 650);
    assert!(node.core.add_transaction_to_pool(&bulky));

    let response = node
        .core
        .block_template(&node.wallet.public_key, &[])
        .unwrap();
    assert!(response.block_template.transaction_hashes.is_empty());
}

#[test]
fn test_template_includes_fitting_transaction() {
    let mut node = new_node(test_currency());
    for _ in 0..6 {
        mine_and_add(&mut node);
    }

    let spend = build_spend_transaction(&node, 1, TEST_FEE, 1);
    let spend_hash = umbra_core::transaction::CachedTransaction::from_binary(&spend)
        .unwrap()
        .hash();
    assert!(node.core.add_transaction_to_pool(&spend));

    let (raw, _) = mine_raw_block(&mut node);
    assert_eq!(raw.transactions.len(), 1);
    let result = node.core.add_block(raw).unwrap();
    assert!(matches!(result, AddBlockResult::AddedToMain));
    assert!(node.core.has_transaction(&spend_hash));
    assert!(node.core.pool_transaction_hashes().is_empty());
}

#[test]
fn test_submit_block_requires_pool_presence() {
    let mut node = new_node(test_currency());

    let response = node
        .core
        .block_template(&node.wallet.public_key, &[])
        .unwrap();
    let mut template = response.block_template;
    template
        .transaction_hashes
        .push(Hash256::keccak256(b"inexistente"));

    let result = node.core.submit_block(template.to_binary());
    assert!(matches!(
        result,
        Err(AddBlockError::BlockValidation(
            BlockValidationError::TransactionAbsentInPool
        ))
    ));
}

#[test]
fn test_checkpoint_pins_block_hash() {
    // Minera o bloco 1 num nó de rascunho para conhecer o hash
    let mut scratch = new_node(test_currency());
    let (raw1, hash1) = mine_raw_block(&mut scratch);

    let mut pinned = Checkpoints::new();
    pinned.add_checkpoint(1, &hash1.to_string()).unwrap();
    let mut good = new_node_with_checkpoints(test_currency(), pinned);
    let result = good.core.add_block(raw1.clone()).unwrap();
    assert!(matches!(result, AddBlockResult::AddedToMain));

    let mut wrong = Checkpoints::new();
    wrong
        .add_checkpoint(1, &Hash256::keccak256(b"outro").to_string())
        .unwrap();
    let mut bad = new_node_with_checkpoints(test_currency(), wrong);
    let result = bad.core.add_block(raw1);
    assert!(matches!(
        result,
        Err(AddBlockError::BlockValidation(
            BlockValidationError::CheckpointBlockHashMismatch
        ))
    ));
}

#[test]
fn test_random_outputs_window_and_count() {
    let mut node = new_node(test_currency());

    // Cadeia mais curta que a janela de maturação: falha
    assert!(node.core.random_outputs(100, 1).is_none());

    for _ in 0..6 {
        mine_and_add(&mut node);
    }

    let block1 = node.core.block_by_index(1).unwrap();
    let amount = block1.base_transaction.prefix.outputs.last().unwrap().amount;

    let (indexes, keys) = node.core.random_outputs(amount, 1).unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(keys.len(), 1);

    // Pedido maior que o disponível: falha sem resultado parcial
    assert!(node.core.random_outputs(amount, 1000).is_none());
    // Valor que não é parcela canônica de nenhuma base: falha
    assert!(node.core.random_outputs(123_456_789_123, 1).is_none());
}

#[test]
fn test_wallet_sync_window() {
    let mut node = new_node(test_currency());
    for _ in 0..8 {
        mine_and_add(&mut node);
    }

    let genesis_hash = node.core.currency().genesis_hash();
    let blocks = node
        .core
        .wallet_sync_data(&[genesis_hash], 0, 0, 5)
        .unwrap();

    assert_eq!(blocks.len(), 5);
    assert_eq!(blocks[0].block_height, 0);
    assert_eq!(blocks[0].block_hash, genesis_hash);

    for block in &blocks {
        let template = node
            .core
            .block_by_index(block.block_height)
            .unwrap();
        let expected_key = public_key_from_extra(&template.base_transaction.prefix.extra)
            .unwrap_or_default();
        assert_eq!(
            block.coinbase_transaction.transaction_public_key,
            expected_key
        );
        assert_eq!(block.block_timestamp, template.timestamp);
    }
}

#[test]
fn test_sparse_chain_shape() {
    let mut node = new_node(test_currency());
    for _ in 0..8 {
        mine_and_add(&mut node);
    }

    let sparse = node.core.build_sparse_chain();
    assert_eq!(sparse[0], node.core.top_block_hash());
    assert_eq!(*sparse.last().unwrap(), node.core.currency().genesis_hash());

    // Afinamento geométrico: topo, -1, -2, -4, ... , gênese
    assert_eq!(sparse[1], node.core.block_hash_by_index(7).unwrap());
    assert_eq!(sparse[2], node.core.block_hash_by_index(6).unwrap());
    assert_eq!(sparse[3], node.core.block_hash_by_index(4).unwrap());
}

#[test]
fn test_blockchain_supplement() {
    let mut node = new_node(test_currency());
    let mut hashes = vec![node.core.currency().genesis_hash()];
    for _ in 0..5 {
        hashes.push(mine_and_add(&mut node));
    }

    // O par conhece até o bloco 2
    let known = vec![hashes[2], hashes[0]];
    let (supplement, total, start) = node
        .core
        .find_blockchain_supplement(&known, 500)
        .unwrap();

    assert_eq!(total, 6);
    assert_eq!(start, 2);
    assert_eq!(supplement[0], hashes[2]);
    assert_eq!(*supplement.last().unwrap(), hashes[5]);

    // Par de outra rede: nada em comum
    let alien = vec![Hash256::keccak256(b"outra rede")];
    assert!(node.core.find_blockchain_supplement(&alien, 500).is_none());
}

#[test]
fn test_save_and_reload_round_trip() {
    let dir = std::env::temp_dir().join(format!("umbra-core-reload-{}", std::process::id()));
    std::fs::remove_dir_all(&dir).ok();

    let clock = ManualClock::new();
    let storage = SharedStorage::default();

    let top_hash = {
        let core = Core::load(
            test_currency(),
            Checkpoints::new(),
            Box::new(storage.clone()),
            Some(umbra_core::storage::SnapshotStore::open(dir.clone()).unwrap()),
            Box::new(clock.clone()),
        )
        .unwrap();

        let mut node = Node {
            core,
            clock: clock.clone(),
            storage: storage.clone(),
            wallet: KeyPair::generate(),
        };
        for _ in 0..3 {
            mine_and_add(&mut node);
        }
        node.core.save().unwrap();
        node.core.top_block_hash()
    };

    // Recarrega do snapshot + vetor de blocos
    let reloaded = Core::load(
        test_currency(),
        Checkpoints::new(),
        Box::new(storage.clone()),
        Some(umbra_core::storage::SnapshotStore::open(dir.clone()).unwrap()),
        Box::new(clock.clone()),
    )
    .unwrap();
    assert_eq!(reloaded.top_block_index(), 3);
    assert_eq!(reloaded.top_block_hash(), top_hash);
    drop(reloaded);

    // Sem snapshot: reimporta tudo do vetor de blocos crus
    let reimported = Core::load(
        test_currency(),
        Checkpoints::new(),
        Box::new(storage),
        None,
        Box::new(clock),
    )
    .unwrap();
    assert_eq!(reimported.top_block_index(), 3);
    assert_eq!(reimported.top_block_hash(), top_hash);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_transactions_status_classification() {
    let mut node = new_node(test_currency());
    for _ in 0..6 {
        mine_and_add(&mut node);
    }

    let pending = build_spend_transaction(&node, 1, TEST_FEE, 1);
    let pending_hash = umbra_core::transaction::CachedTransaction::from_binary(&pending)
        .unwrap()
        .hash();
    node.core.add_transaction_to_pool(&pending);

    let confirmed_hash = node
        .core
        .block_by_index(1)
        .unwrap()
        .base_transaction
        .hash();
    let unknown_hash = Hash256::keccak256(b"nunca vista");

    let status = node
        .core
        .transactions_status(&[pending_hash, confirmed_hash, unknown_hash]);

    assert!(status.in_pool.contains(&pending_hash));
    assert!(status.in_block.contains(&confirmed_hash));
    assert!(status.unknown.contains(&unknown_hash));
}
