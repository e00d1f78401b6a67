//! Pool de transações com limpeza periódica
//!
//! O pool guarda transações válidas ainda não incluídas em bloco, junto com
//! o estado agregado de gasto (a união disjunta dos estados de cada
//! entrada). O embrulho de limpeza suprime a readmissão de transações
//! recém-removidas e expulsa entradas velhas ou que deixaram de validar.

use crate::transaction::{payment_id_from_extra, CachedTransaction};
use crate::validator_state::TransactionValidatorState;
use shared::Hash256;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Uma transação pendente e seus metadados
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub cached: CachedTransaction,
    pub validator_state: TransactionValidatorState,
    pub receive_time: u64,
}

/// Pool de transações pendentes
#[derive(Debug, Default)]
pub struct TransactionPool {
    entries: HashMap<Hash256, PoolEntry>,
    payment_ids: HashMap<Hash256, HashSet<Hash256>>,
    /// União disjunta dos estados de todas as entradas
    pool_state: TransactionValidatorState,
}

impl TransactionPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insere uma transação já validada
    ///
    /// Devolve `false` se o hash já estiver presente. O chamador garante que
    /// o estado não intersecta o agregado do pool.
    pub fn push_transaction(
        &mut self,
        cached: CachedTransaction,
        validator_state: TransactionValidatorState,
        receive_time: u64,
    ) -> bool {
        let hash = cached.hash();
        if self.entries.contains_key(&hash) {
            return false;
        }

        if let Some(payment_id) = payment_id_from_extra(&cached.transaction().prefix.extra) {
            self.payment_ids.entry(payment_id).or_default().insert(hash);
        }

        self.pool_state.merge(&validator_state);
        self.entries.insert(
            hash,
            PoolEntry {
                cached,
                validator_state,
                receive_time,
            },
        );
        true
    }

    /// Remove uma transação; devolve a entrada removida
    pub fn remove_transaction(&mut self, hash: &Hash256) -> Option<PoolEntry> {
        let entry = self.entries.remove(hash)?;

        self.pool_state.subtract(&entry.validator_state);

        if let Some(payment_id) = payment_id_from_extra(&entry.cached.transaction().prefix.extra)
        {
            if let Some(hashes) = self.payment_ids.get_mut(&payment_id) {
                hashes.remove(hash);
                if hashes.is_empty() {
                    self.payment_ids.remove(&payment_id);
                }
            }
        }

        Some(entry)
    }

    #[must_use]
    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains_key(hash)
    }

    #[must_use]
    pub fn get(&self, hash: &Hash256) -> Option<&PoolEntry> {
        self.entries.get(hash)
    }

    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn transaction_hashes(&self) -> Vec<Hash256> {
        self.entries.keys().copied().collect()
    }

    /// Entradas ordenadas por taxa decrescente, desempate por chegada
    #[must_use]
    pub fn entries_by_fee(&self) -> Vec<&PoolEntry> {
        let mut entries: Vec<&PoolEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            b.cached
                .fee()
                .cmp(&a.cached.fee())
                .then(a.receive_time.cmp(&b.receive_time))
        });
        entries
    }

    /// Estado agregado de gasto do pool
    #[must_use]
    pub const fn pool_state(&self) -> &TransactionValidatorState {
        &self.pool_state
    }

    #[must_use]
    pub fn transaction_hashes_by_payment_id(&self, payment_id: &Hash256) -> Vec<Hash256> {
        self.payment_ids
            .get(payment_id)
            .map(|hashes| hashes.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Embrulho do pool com limpeza por idade e revalidação
///
/// Hashes removidos por idade entram em `recently_deleted` e não são
/// readmitidos até o próprio registro expirar.
#[derive(Debug)]
pub struct TransactionPoolCleaner {
    pool: TransactionPool,
    recently_deleted: HashMap<Hash256, u64>,
    /// Tempo de vida de uma transação no pool, em segundos
    timeout: u64,
}

impl TransactionPoolCleaner {
    #[must_use]
    pub fn new(timeout: u64) -> Self {
        Self {
            pool: TransactionPool::new(),
            recently_deleted: HashMap::new(),
            timeout,
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    /// Insere uma transação, recusando hashes recém-removidos
    pub fn push_transaction(
        &mut self,
        cached: CachedTransaction,
        validator_state: TransactionValidatorState,
        receive_time: u64,
    ) -> bool {
        !self.is_recently_deleted(&cached.hash(), receive_time)
            && self
                .pool
                .push_transaction(cached, validator_state, receive_time)
    }

    /// Remove uma transação sem registrá-la como recém-removida
    pub fn remove_transaction(&mut self, hash: &Hash256) -> Option<PoolEntry> {
        self.pool.remove_transaction(hash)
    }

    fn is_recently_deleted(&self, hash: &Hash256, now: u64) -> bool {
        self.recently_deleted
            .get(hash)
            .is_some_and(|deleted_at| now.saturating_sub(*deleted_at) < self.timeout)
    }

    /// Passo de limpeza do pool
    ///
    /// Expulsa entradas mais velhas que o tempo de vida e, em seguida,
    /// entradas que o revalidador rejeita contra o topo corrente. Devolve os
    /// pares (hash, expirou-por-idade) removidos.
    pub fn clean(
        &mut self,
        now: u64,
        mut revalidate: impl FnMut(&CachedTransaction) -> bool,
    ) -> Vec<(Hash256, bool)> {
        let mut deleted = Vec::new();

        for hash in self.pool.transaction_hashes() {
            let Some(entry) = self.pool.get(&hash) else {
                continue;
            };

            let age = now.saturating_sub(entry.receive_time);
            if age >= self.timeout {
                debug!(%hash, age, "Expulsando transação expirada do pool");
                self.recently_deleted.insert(hash, now);
                self.pool.remove_transaction(&hash);
                deleted.push((hash, true));
                continue;
            }

            if !revalidate(&entry.cached) {
                debug!(%hash, "Expulsando transação que deixou de validar");
                self.recently_deleted.insert(hash, now);
                self.pool.remove_transaction(&hash);
                deleted.push((hash, false));
            }
        }

        self.forget_old_deletions(now);

        if !deleted.is_empty() {
            info!(count = deleted.len(), "Limpeza do pool removeu transações");
        }

        deleted
    }

    fn forget_old_deletions(&mut self, now: u64) {
        let timeout = self.timeout;
        self.recently_deleted
            .retain(|_, deleted_at| now.saturating_sub(*deleted_at) < timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{
        KeyInput, Transaction, TransactionInput, TransactionPrefix,
    };
    use crate::validator_state::extract_spent_outputs;
    use shared::KeyImage;

    fn tx_spending(image_byte: u8) -> (CachedTransaction, TransactionValidatorState) {
        let transaction = Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: 0,
                inputs: vec![TransactionInput::Key(KeyInput {
                    amount: 100,
                    output_indexes: vec![image_byte as u32],
                    key_image: KeyImage([image_byte; 32]),
                })],
                outputs: vec![],
                extra: vec![],
            },
            signatures: vec![],
        };
        let state = extract_spent_outputs(&transaction);
        (CachedTransaction::new(transaction), state)
    }

    #[test]
    fn test_push_and_duplicate() {
        let mut pool = TransactionPool::new();
        let (tx, state) = tx_spending(1);
        let hash = tx.hash();

        assert!(pool.push_transaction(tx.clone(), state.clone(), 0));
        assert!(!pool.push_transaction(tx, state, 0));
        assert!(pool.contains(&hash));
        assert_eq!(pool.transaction_count(), 1);
    }

    #[test]
    fn test_aggregate_state_is_disjoint_union() {
        let mut pool = TransactionPool::new();
        let (tx1, state1) = tx_spending(1);
        let (tx2, state2) = tx_spending(2);
        let hash1 = tx1.hash();

        pool.push_transaction(tx1, state1, 0);
        pool.push_transaction(tx2, state2, 0);
        assert_eq!(pool.pool_state().len(), 2);

        pool.remove_transaction(&hash1);
        assert_eq!(pool.pool_state().len(), 1);
        assert!(pool.pool_state().contains(&KeyImage([2u8; 32])));
    }

    #[test]
    fn test_cleaner_evicts_by_age() {
        let mut cleaner = TransactionPoolCleaner::new(100);
        let (tx, state) = tx_spending(1);
        let hash = tx.hash();

        cleaner.push_transaction(tx, state, 0);

        // Antes do vencimento nada acontece
        assert!(cleaner.clean(99, |_| true).is_empty());
        assert!(cleaner.pool().contains(&hash));

        let deleted = cleaner.clean(101, |_| true);
        assert_eq!(deleted, vec![(hash, true)]);
        assert!(!cleaner.pool().contains(&hash));
    }

    #[test]
    fn test_cleaner_suppresses_readmission() {
        let mut cleaner = TransactionPoolCleaner::new(100);
        let (tx, state) = tx_spending(1);

        cleaner.push_transaction(tx.clone(), state.clone(), 0);
        cleaner.clean(150, |_| true);

        // Recém-removida: não readmite dentro do tempo de vida
        assert!(!cleaner.push_transaction(tx.clone(), state.clone(), 200));
        // Depois do tempo de vida volta a ser aceitável
        assert!(cleaner.push_transaction(tx, state, 300));
    }

    #[test]
    fn test_cleaner_evicts_invalidated() {
        let mut cleaner = TransactionPoolCleaner::new(1000);
        let (tx, state) = tx_spending(1);
        let hash = tx.hash();

        cleaner.push_transaction(tx, state, 0);
        let deleted = cleaner.clean(10, |_| false);

        assert_eq!(deleted, vec![(hash, false)]);
        assert!(!cleaner.pool().contains(&hash));
    }

    #[test]
    fn test_entries_by_fee_order() {
        let mut pool = TransactionPool::new();

        let make = |image: u8, fee: u64| {
            let transaction = Transaction {
                prefix: TransactionPrefix {
                    version: 1,
                    unlock_time: 0,
                    inputs: vec![TransactionInput::Key(KeyInput {
                        amount: 100 + fee,
                        output_indexes: vec![1],
                        key_image: KeyImage([image; 32]),
                    })],
                    outputs: vec![crate::transaction::TransactionOutput {
                        amount: 100,
                        target: crate::transaction::TransactionOutputTarget::Key(
                            crate::transaction::KeyOutput {
                                key: shared::PublicKey([image; 32]),
                            },
                        ),
                    }],
                    extra: vec![],
                },
                signatures: vec![],
            };
            let state = extract_spent_outputs(&transaction);
            (CachedTransaction::new(transaction), state)
        };

        let (low, low_state) = make(1, 10);
        let (high, high_state) = make(2, 50);
        pool.push_transaction(low, low_state, 0);
        pool.push_transaction(high, high_state, 1);

        let fees: Vec<u64> = pool.entries_by_fee().iter().map(|e| e.cached.fee()).collect();
        assert_eq!(fees, vec![50, 10]);
    }
}
