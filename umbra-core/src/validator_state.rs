//! Estado do validador de transações
//!
//! O conjunto de imagens de chave que um grupo de transações pendentes
//! gastaria. Dois estados que se intersectam representam um gasto duplo.

use crate::transaction::{Transaction, TransactionInput};
use serde::{Deserialize, Serialize};
use shared::KeyImage;
use std::collections::HashSet;

/// Conjunto de imagens de chave gastas por transações pendentes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionValidatorState {
    pub spent_key_images: HashSet<KeyImage>,
}

impl TransactionValidatorState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra uma imagem de chave; devolve `false` se já estava presente
    pub fn insert(&mut self, key_image: KeyImage) -> bool {
        self.spent_key_images.insert(key_image)
    }

    #[must_use]
    pub fn contains(&self, key_image: &KeyImage) -> bool {
        self.spent_key_images.contains(key_image)
    }

    /// Funde outro estado neste
    pub fn merge(&mut self, other: &Self) {
        self.spent_key_images
            .extend(other.spent_key_images.iter().copied());
    }

    /// Remove as imagens de outro estado deste
    pub fn subtract(&mut self, other: &Self) {
        for key_image in &other.spent_key_images {
            self.spent_key_images.remove(key_image);
        }
    }

    /// Verifica se os conjuntos de imagens se sobrepõem
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        let (smaller, larger) = if self.spent_key_images.len() <= other.spent_key_images.len() {
            (self, other)
        } else {
            (other, self)
        };

        smaller
            .spent_key_images
            .iter()
            .any(|key_image| larger.spent_key_images.contains(key_image))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spent_key_images.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.spent_key_images.len()
    }
}

/// Extrai o estado de gasto de uma transação
#[must_use]
pub fn extract_spent_outputs(transaction: &Transaction) -> TransactionValidatorState {
    let mut state = TransactionValidatorState::new();
    for input in &transaction.prefix.inputs {
        if let TransactionInput::Key(key) = input {
            state.insert(key.key_image);
        }
    }
    state
}

/// Extrai o estado de gasto conjunto de várias transações
#[must_use]
pub fn extract_spent_outputs_many<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
) -> TransactionValidatorState {
    let mut state = TransactionValidatorState::new();
    for transaction in transactions {
        state.merge(&extract_spent_outputs(transaction));
    }
    state
}
