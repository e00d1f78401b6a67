//! Checkpoints: pinagem de hashes por altura
//!
//! Abaixo da zona de checkpoints a prova de trabalho é curto-circuitada: o
//! hash do bloco precisa apenas coincidir com o pino da altura.

use shared::{Hash256, NodeError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Conjunto ordenado de pares (altura, hash obrigatório)
#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    points: BTreeMap<u32, Hash256>,
}

impl Checkpoints {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            points: BTreeMap::new(),
        }
    }

    /// Número de checkpoints carregados
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Adiciona um checkpoint
    ///
    /// # Errors
    ///
    /// Retorna erro se o hash não for hexadecimal válido ou se a altura já
    /// tiver um checkpoint registrado
    pub fn add_checkpoint(&mut self, index: u32, hash_str: &str) -> Result<()> {
        let hash: Hash256 = hash_str.parse().map_err(|_| {
            NodeError::ConfigError(format!("Hash de checkpoint inválido na altura {index}"))
        })?;

        if self.points.contains_key(&index) {
            return Err(NodeError::ConfigError(format!(
                "Checkpoint duplicado na altura {index}"
            )));
        }

        self.points.insert(index, hash);
        Ok(())
    }

    /// Carrega checkpoints de um arquivo CSV no formato `indice,hash`
    ///
    /// # Errors
    ///
    /// Retorna erro se o arquivo não existir ou contiver linhas malformadas
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path).map_err(|err| {
            NodeError::ConfigError(format!(
                "Não foi possível ler o arquivo de checkpoints {}: {err}",
                path.display()
            ))
        })?;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((index_str, hash_str)) = line.split_once(',') else {
                return Err(NodeError::ConfigError(format!(
                    "Linha de checkpoint malformada: {line}"
                )));
            };

            let index: u32 = index_str.trim().parse().map_err(|_| {
                NodeError::ConfigError(format!(
                    "Altura de checkpoint não numérica: {index_str}"
                ))
            })?;

            self.add_checkpoint(index, hash_str.trim())?;
        }

        info!(
            count = self.points.len(),
            file = %path.display(),
            "Checkpoints carregados"
        );
        Ok(())
    }

    /// Verifica se a altura está na zona coberta por checkpoints
    #[must_use]
    pub fn is_in_checkpoint_zone(&self, index: u32) -> bool {
        self.points
            .last_key_value()
            .is_some_and(|(last, _)| index <= *last)
    }

    /// Verifica o hash de um bloco contra o checkpoint da altura
    ///
    /// Alturas sem checkpoint passam sempre.
    #[must_use]
    pub fn check_block(&self, index: u32, hash: &Hash256) -> bool {
        match self.points.get(&index) {
            None => true,
            Some(expected) if expected == hash => true,
            Some(expected) => {
                warn!(
                    index,
                    expected = %expected,
                    fetched = %hash,
                    "Hash não confere com o checkpoint"
                );
                false
            }
        }
    }

    /// Altura do checkpoint mais alto, se houver
    #[must_use]
    pub fn top_checkpoint_index(&self) -> Option<u32> {
        self.points.last_key_value().map(|(index, _)| *index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: &str = "aa00000000000000000000000000000000000000000000000000000000000000";
    const HASH_B: &str = "bb00000000000000000000000000000000000000000000000000000000000000";

    #[test]
    fn test_add_and_check() {
        let mut checkpoints = Checkpoints::new();
        checkpoints.add_checkpoint(10, HASH_A).unwrap();

        assert!(checkpoints.check_block(10, &HASH_A.parse().unwrap()));
        assert!(!checkpoints.check_block(10, &HASH_B.parse().unwrap()));
        // Altura sem checkpoint passa sempre
        assert!(checkpoints.check_block(11, &HASH_B.parse().unwrap()));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut checkpoints = Checkpoints::new();
        checkpoints.add_checkpoint(10, HASH_A).unwrap();
        assert!(checkpoints.add_checkpoint(10, HASH_B).is_err());
    }

    #[test]
    fn test_invalid_hash_rejected() {
        let mut checkpoints = Checkpoints::new();
        assert!(checkpoints.add_checkpoint(10, "nao-e-hex").is_err());
    }

    #[test]
    fn test_checkpoint_zone() {
        let mut checkpoints = Checkpoints::new();
        assert!(!checkpoints.is_in_checkpoint_zone(0));

        checkpoints.add_checkpoint(50, HASH_A).unwrap();
        assert!(checkpoints.is_in_checkpoint_zone(50));
        assert!(checkpoints.is_in_checkpoint_zone(10));
        assert!(!checkpoints.is_in_checkpoint_zone(51));
    }

    #[test]
    fn test_csv_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "umbra-checkpoints-{}.csv",
            std::process::id()
        ));
        fs::write(&path, format!("10,{HASH_A}\n20,{HASH_B}\n")).unwrap();

        let mut from_file = Checkpoints::new();
        from_file.load_from_file(&path).unwrap();

        let mut manual = Checkpoints::new();
        manual.add_checkpoint(10, HASH_A).unwrap();
        manual.add_checkpoint(20, HASH_B).unwrap();

        assert_eq!(from_file.len(), manual.len());
        assert_eq!(from_file.top_checkpoint_index(), manual.top_checkpoint_index());
        assert!(from_file.check_block(10, &HASH_A.parse().unwrap()));
        assert!(from_file.check_block(20, &HASH_B.parse().unwrap()));

        fs::remove_file(&path).ok();
    }
}
