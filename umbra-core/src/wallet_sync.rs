//! Formas simplificadas de bloco e transação para sincronização de carteira
//!
//! A carteira só precisa do que permite escanear saídas: chave pública da
//! transação, tempo de desbloqueio, saídas por chave e, para gastos, as
//! entradas por chave. O restante do corpo fica de fora da resposta.

use crate::transaction::{
    payment_id_from_extra, public_key_from_extra, KeyInput, Transaction, TransactionInput,
    TransactionOutputTarget,
};
use serde::{Deserialize, Serialize};
use shared::{Hash256, PublicKey};

/// Uma saída por chave na forma que a carteira consome
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WalletKeyOutput {
    pub amount: u64,
    pub key: PublicKey,
}

/// Transação base simplificada
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCoinbaseTransaction {
    pub hash: Hash256,
    pub transaction_public_key: PublicKey,
    pub unlock_time: u64,
    pub key_outputs: Vec<WalletKeyOutput>,
}

/// Transação comum simplificada
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWalletTransaction {
    pub hash: Hash256,
    pub transaction_public_key: PublicKey,
    pub payment_id: Option<Hash256>,
    pub unlock_time: u64,
    pub key_outputs: Vec<WalletKeyOutput>,
    pub key_inputs: Vec<KeyInput>,
}

/// Um bloco da janela de sincronização de carteira
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBlockInfo {
    pub block_height: u32,
    pub block_hash: Hash256,
    pub block_timestamp: u64,
    pub coinbase_transaction: RawCoinbaseTransaction,
    pub transactions: Vec<RawWalletTransaction>,
}

fn key_outputs_of(transaction: &Transaction) -> Vec<WalletKeyOutput> {
    transaction
        .prefix
        .outputs
        .iter()
        .map(|output| {
            let TransactionOutputTarget::Key(key_output) = output.target;
            WalletKeyOutput {
                amount: output.amount,
                key: key_output.key,
            }
        })
        .collect()
}

/// Simplifica uma transação base
#[must_use]
pub fn raw_coinbase_transaction(transaction: &Transaction) -> RawCoinbaseTransaction {
    RawCoinbaseTransaction {
        hash: transaction.hash(),
        transaction_public_key: public_key_from_extra(&transaction.prefix.extra)
            .unwrap_or_default(),
        unlock_time: transaction.prefix.unlock_time,
        key_outputs: key_outputs_of(transaction),
    }
}

/// Simplifica uma transação comum
#[must_use]
pub fn raw_wallet_transaction(transaction: &Transaction) -> RawWalletTransaction {
    let key_inputs = transaction
        .prefix
        .inputs
        .iter()
        .filter_map(|input| match input {
            TransactionInput::Key(key) => Some(key.clone()),
            TransactionInput::Base(_) => None,
        })
        .collect();

    RawWalletTransaction {
        hash: transaction.hash(),
        transaction_public_key: public_key_from_extra(&transaction.prefix.extra)
            .unwrap_or_default(),
        payment_id: payment_id_from_extra(&transaction.prefix.extra),
        unlock_time: transaction.prefix.unlock_time,
        key_outputs: key_outputs_of(transaction),
        key_inputs,
    }
}
