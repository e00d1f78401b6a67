//! Limites de tamanho de anel por altura
//!
//! O tamanho do anel de uma entrada (contagem de `output_indexes`) precisa
//! caber na janela vigente na altura do bloco. As janelas endurecem ao longo
//! da vida da rede para aumentar o conjunto de anonimato mínimo.

use crate::error::TransactionValidationError;
use crate::transaction::{CachedTransaction, TransactionInput};

/// Janelas de tamanho de anel: (altura de ativação, mínimo, máximo)
///
/// Em ordem crescente de altura; vigora a última cuja ativação já ocorreu.
const RING_SIZE_WINDOWS: &[(u32, usize, usize)] = &[
    (0, 1, 101),
    (3_000, 2, 8),
    (120_000, 4, 8),
];

/// Janela de tamanho de anel vigente na altura
#[must_use]
pub fn ring_size_bounds(height: u32) -> (usize, usize) {
    let mut bounds = (1, 101);
    for (activation, min, max) in RING_SIZE_WINDOWS {
        if height >= *activation {
            bounds = (*min, *max);
        }
    }
    bounds
}

/// Valida o tamanho de anel de todas as entradas das transações
///
/// # Errors
///
/// Retorna `InvalidMixin` se alguma entrada sair da janela da altura
pub fn validate(
    transactions: &[CachedTransaction],
    height: u32,
) -> Result<(), TransactionValidationError> {
    let (min, max) = ring_size_bounds(height);

    for transaction in transactions {
        for input in &transaction.transaction().prefix.inputs {
            if let TransactionInput::Key(key) = input {
                let ring_size = key.output_indexes.len();
                if ring_size < min || ring_size > max {
                    return Err(TransactionValidationError::InvalidMixin);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{KeyInput, Transaction, TransactionPrefix};
    use shared::KeyImage;

    fn tx_with_ring_size(size: usize) -> CachedTransaction {
        CachedTransaction::new(Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: 0,
                inputs: vec![TransactionInput::Key(KeyInput {
                    amount: 100,
                    output_indexes: vec![1; size],
                    key_image: KeyImage([1u8; 32]),
                })],
                outputs: vec![],
                extra: vec![],
            },
            signatures: vec![],
        })
    }

    #[test]
    fn test_bounds_by_height() {
        assert_eq!(ring_size_bounds(0), (1, 101));
        assert_eq!(ring_size_bounds(3_000), (2, 8));
        assert_eq!(ring_size_bounds(500_000), (4, 8));
    }

    #[test]
    fn test_ring_size_inside_window_passes() {
        let txs = vec![tx_with_ring_size(3)];
        assert!(validate(&txs, 3_000).is_ok());
    }

    #[test]
    fn test_ring_size_outside_window_fails() {
        let txs = vec![tx_with_ring_size(1)];
        assert_eq!(
            validate(&txs, 3_000),
            Err(TransactionValidationError::InvalidMixin)
        );

        let txs = vec![tx_with_ring_size(50)];
        assert_eq!(
            validate(&txs, 3_000),
            Err(TransactionValidationError::InvalidMixin)
        );
    }
}
