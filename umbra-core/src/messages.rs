//! Mensagens observáveis do núcleo
//!
//! Cada mutação aceita produz uma mensagem imutável, entregue aos
//! observadores na ordem em que o núcleo a produziu.

use shared::Hash256;

/// Motivo da remoção de transações do pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTransactionReason {
    /// Incluída num bloco aceito na cadeia principal
    InBlock,
    /// Expirou o tempo de vida no pool
    Outdated,
    /// Deixou de ser válida contra o novo topo
    NotActual,
}

/// Mensagem de mudança de estado da blockchain
#[derive(Debug, Clone)]
pub enum BlockchainMessage {
    NewBlock {
        block_index: u32,
        block_hash: Hash256,
    },
    NewAlternativeBlock {
        block_index: u32,
        block_hash: Hash256,
    },
    ChainSwitch {
        common_root_index: u32,
        /// Hashes da nova cadeia principal a partir da raiz comum
        blocks_from_common_root: Vec<Hash256>,
    },
    AddTransaction {
        hashes: Vec<Hash256>,
    },
    DeleteTransaction {
        hashes: Vec<Hash256>,
        reason: DeleteTransactionReason,
    },
}

/// Fábricas das mensagens, na forma usada pelo núcleo
#[must_use]
pub fn make_new_block_message(block_index: u32, block_hash: Hash256) -> BlockchainMessage {
    BlockchainMessage::NewBlock {
        block_index,
        block_hash,
    }
}

#[must_use]
pub fn make_new_alternative_block_message(
    block_index: u32,
    block_hash: Hash256,
) -> BlockchainMessage {
    BlockchainMessage::NewAlternativeBlock {
        block_index,
        block_hash,
    }
}

#[must_use]
pub fn make_chain_switch_message(
    common_root_index: u32,
    blocks_from_common_root: Vec<Hash256>,
) -> BlockchainMessage {
    BlockchainMessage::ChainSwitch {
        common_root_index,
        blocks_from_common_root,
    }
}

#[must_use]
pub fn make_add_transaction_message(hashes: Vec<Hash256>) -> BlockchainMessage {
    BlockchainMessage::AddTransaction { hashes }
}

#[must_use]
pub fn make_del_transaction_message(
    hashes: Vec<Hash256>,
    reason: DeleteTransactionReason,
) -> BlockchainMessage {
    BlockchainMessage::DeleteTransaction { hashes, reason }
}
