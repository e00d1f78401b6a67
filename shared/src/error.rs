use thiserror::Error;

/// Erros transversais do nó Umbra
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Erro de serialização: {0}")]
    SerializationError(String),

    #[error("Hash inválido")]
    InvalidHash,

    #[error("Chave inválida")]
    InvalidKey,

    #[error("Assinatura inválida")]
    InvalidSignature,

    #[error("Erro criptográfico: {0}")]
    CryptographicError(String),

    #[error("Erro de armazenamento: {0}")]
    StorageError(String),

    #[error("Erro de I/O: {0}")]
    IoError(String),

    #[error("Erro de rede: {0}")]
    NetworkError(String),

    #[error("Erro de configuração: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
