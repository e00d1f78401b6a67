//! Taxonomia de erros do núcleo de consenso
//!
//! Erros de validação são valores devolvidos ao chamador e nunca alteram o
//! estado do núcleo. A interrupção é uma categoria própria, propagada pelo
//! cancelamento cooperativo.

use thiserror::Error;

/// Falhas de validação contextual de um bloco candidato
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockValidationError {
    #[error("Versão principal do bloco incorreta para a altura")]
    WrongVersion,

    #[error("Bloco pai com versão principal incorreta")]
    ParentBlockWrongVersion,

    #[error("Bloco pai serializado excede o tamanho máximo")]
    ParentBlockSizeTooBig,

    #[error("Timestamp muito à frente do relógio da rede")]
    TimestampTooFarInFuture,

    #[error("Timestamp abaixo da mediana da janela de verificação")]
    TimestampTooFarInPast,

    #[error("Tamanho cumulativo do bloco excede o limite da altura")]
    CumulativeBlockSizeTooBig,

    #[error("Recompensa do minerador não confere com a recompensa esperada")]
    BlockRewardMismatch,

    #[error("Hash do bloco não confere com o checkpoint da altura")]
    CheckpointBlockHashMismatch,

    #[error("Prova de trabalho insuficiente para a dificuldade corrente")]
    ProofOfWorkTooWeak,

    #[error("Dificuldade calculada é zero")]
    DifficultyOverhead,

    #[error("Transação referenciada ausente do pool")]
    TransactionAbsentInPool,
}

/// Falhas de validação semântica ou contextual de uma transação
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionValidationError {
    #[error("Transação sem entradas")]
    EmptyInputs,

    #[error("Entrada de tipo desconhecido")]
    InputUnknownType,

    #[error("Transação base com número de entradas diferente de um")]
    InputWrongCount,

    #[error("Entrada de tipo inesperado para o contexto")]
    InputUnexpectedType,

    #[error("Entrada sem índices de saída referenciados")]
    InputEmptyOutputUsage,

    #[error("Imagem de chave fora do subgrupo de ordem prima")]
    InputInvalidDomainKeyImages,

    #[error("Imagens de chave repetidas na mesma transação")]
    InputIdenticalKeyImages,

    #[error("Índices de saída repetidos na mesma entrada")]
    InputIdenticalOutputIndexes,

    #[error("Imagem de chave já gasta na cadeia ou no estado pendente")]
    InputKeyImageAlreadySpent,

    #[error("Índice global de saída inexistente para o valor")]
    InputInvalidGlobalIndex,

    #[error("Saída referenciada ainda bloqueada para gasto")]
    InputSpendLockedOut,

    #[error("Assinaturas em anel inválidas")]
    InputInvalidSignatures,

    #[error("Saída com valor zero")]
    OutputZeroAmount,

    #[error("Saída com chave fora da curva")]
    OutputInvalidKey,

    #[error("Saída de tipo desconhecido")]
    OutputUnknownType,

    #[error("Overflow na soma das saídas")]
    OutputsAmountOverflow,

    #[error("Overflow na soma das entradas")]
    InputsAmountOverflow,

    #[error("Soma das saídas excede a soma das entradas")]
    WrongAmount,

    #[error("Tempo de desbloqueio da transação base incorreto")]
    WrongTransactionUnlockTime,

    #[error("Entrada base com índice de bloco incorreto")]
    BaseInputWrongBlockIndex,

    #[error("Campo extra excede o tamanho máximo")]
    ExtraTooLarge,

    #[error("Tamanho do anel fora da janela permitida na altura")]
    InvalidMixin,
}

/// Resultado de uma inserção de bloco bem-sucedida
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddBlockResult {
    /// Estendeu a cadeia principal
    AddedToMain,
    /// Estendeu uma cadeia alternativa
    AddedToAlternative,
    /// Estendeu uma alternativa e provocou troca de cadeia
    AddedToAlternativeAndSwitched,
    /// O bloco já estava na árvore; nenhum estado foi alterado
    AlreadyExists,
}

/// Falhas de inserção de bloco
#[derive(Error, Debug)]
pub enum AddBlockError {
    #[error("Bloco órfão: pai desconhecido")]
    RejectedAsOrphaned,

    #[error("Falha ao desserializar bloco ou transações")]
    DeserializationFailed,

    #[error("Bloco rejeitado: {0}")]
    BlockValidation(#[from] BlockValidationError),

    #[error("Transação rejeitada: {0}")]
    TransactionValidation(#[from] TransactionValidationError),

    #[error("Falha interna do núcleo: {0}")]
    Core(#[from] CoreError),
}

/// Falhas internas do núcleo fora do caminho de validação
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Blockchain corrompida: {0}")]
    CorruptedBlockchain(String),

    #[error("Operação interrompida")]
    Interrupted,

    #[error("Erro de armazenamento: {0}")]
    Storage(String),
}

impl From<shared::NodeError> for CoreError {
    fn from(err: shared::NodeError) -> Self {
        Self::Storage(err.to_string())
    }
}
