//! Tipos compartilhados entre módulos do Umbra

use serde::{Deserialize, Serialize};

/// Alias para identificador único de transação
pub type TxId = crate::Hash256;

/// Alias para identificador único de bloco
pub type BlockId = crate::Hash256;

/// Alias para valor monetário em unidades atômicas
pub type Amount = u64;

/// Alias para timestamp Unix em segundos
pub type Timestamp = u64;

/// Alias para índice de bloco na cadeia (gênese é 0)
pub type BlockIndex = u32;

/// Alias para dificuldade de prova de trabalho
pub type Difficulty = u64;

/// Alias para índice global de uma saída dentro do balde de um valor
pub type GlobalOutputIndex = u32;

/// Network configurations for different environments
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    /// Main production network
    Mainnet,
    /// Test network
    Testnet,
    /// Local development network
    #[default]
    Devnet,
}

/// Configurações globais do nó
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Tipo de rede
    pub network: NetworkType,
    /// Porta P2P para comunicação
    pub p2p_port: u16,
    /// Endereço de bind
    pub bind_address: String,
    /// Peers para conexão inicial
    pub bootstrap_peers: Vec<String>,
    /// Diretório de dados do nó
    pub data_dir: String,
    /// Arquivo CSV opcional de checkpoints (`indice,hash`)
    pub checkpoints_file: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkType::Devnet,
            p2p_port: 17317,
            bind_address: "0.0.0.0".to_string(),
            bootstrap_peers: vec![],
            data_dir: "./data".to_string(),
            checkpoints_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_defaults() {
        let config = NodeConfig::default();

        assert_eq!(config.network, NetworkType::Devnet);
        assert_eq!(config.p2p_port, 17317);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert!(config.checkpoints_file.is_none());
    }
}
