//! Transações da rede Umbra
//!
//! Uma transação é um prefixo (versão, tempo de desbloqueio, entradas,
//! saídas, extra) seguido das assinaturas em anel, uma por entrada. Entradas
//! e saídas são somas fechadas com tag explícita no formato binário; o
//! despacho é sempre por `match` exaustivo.

use crate::serialization::{
    write_varint, BinaryReader, ConsensusDecode, ConsensusEncode,
};
use serde::{Deserialize, Serialize};
use shared::{Hash256, KeyImage, NodeError, PublicKey, Result, RingSignature};
use std::sync::OnceLock;

/// Tag binária de entrada base (coinbase)
const INPUT_TAG_BASE: u8 = 0xff;
/// Tag binária de entrada por chave
const INPUT_TAG_KEY: u8 = 0x02;
/// Tag binária de saída por chave
const OUTPUT_TAG_KEY: u8 = 0x02;

/// Tag do campo extra que precede a chave pública da transação
pub const EXTRA_TAG_PUBLIC_KEY: u8 = 0x01;
/// Tag do campo extra que precede o nonce extra
pub const EXTRA_TAG_NONCE: u8 = 0x02;
/// Sub-tag, dentro do nonce extra, que precede um ID de pagamento
pub const EXTRA_NONCE_PAYMENT_ID: u8 = 0x00;

/// Entrada de recompensa de mineração, uma por bloco
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseInput {
    /// Índice do bloco que a transação base recompensa
    pub block_index: u32,
}

/// Entrada que gasta uma saída anterior através de um anel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInput {
    /// Valor gasto
    pub amount: u64,
    /// Índices das saídas do anel: o primeiro é absoluto, os demais são
    /// deslocamentos positivos sobre o anterior
    pub output_indexes: Vec<u32>,
    /// Imagem de chave que marca o gasto
    pub key_image: KeyImage,
}

/// Entrada de transação
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionInput {
    Base(BaseInput),
    Key(KeyInput),
}

/// Saída endereçada a uma chave única
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOutput {
    pub key: PublicKey,
}

/// Alvo de uma saída de transação
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionOutputTarget {
    Key(KeyOutput),
}

/// Saída de transação
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub amount: u64,
    pub target: TransactionOutputTarget,
}

/// Prefixo de transação: tudo menos as assinaturas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPrefix {
    pub version: u64,
    /// Altura (ou instante) a partir da qual as saídas podem ser gastas
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    /// Carrega a chave pública da transação e, opcionalmente, um ID de
    /// pagamento embutido no nonce extra
    pub extra: Vec<u8>,
}

impl Default for TransactionInput {
    fn default() -> Self {
        Self::Base(BaseInput { block_index: 0 })
    }
}

/// Transação completa
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub prefix: TransactionPrefix,
    /// Uma assinatura em anel por entrada por chave, na ordem das entradas
    pub signatures: Vec<RingSignature>,
}

impl ConsensusEncode for TransactionPrefix {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        write_varint(out, self.version);
        write_varint(out, self.unlock_time);

        write_varint(out, self.inputs.len() as u64);
        for input in &self.inputs {
            match input {
                TransactionInput::Base(base) => {
                    out.push(INPUT_TAG_BASE);
                    write_varint(out, u64::from(base.block_index));
                }
                TransactionInput::Key(key) => {
                    out.push(INPUT_TAG_KEY);
                    write_varint(out, key.amount);
                    write_varint(out, key.output_indexes.len() as u64);
                    for offset in &key.output_indexes {
                        write_varint(out, u64::from(*offset));
                    }
                    out.extend_from_slice(&key.key_image.0);
                }
            }
        }

        write_varint(out, self.outputs.len() as u64);
        for output in &self.outputs {
            write_varint(out, output.amount);
            match output.target {
                TransactionOutputTarget::Key(key_output) => {
                    out.push(OUTPUT_TAG_KEY);
                    out.extend_from_slice(&key_output.key.0);
                }
            }
        }

        write_varint(out, self.extra.len() as u64);
        out.extend_from_slice(&self.extra);
    }
}

impl ConsensusDecode for TransactionPrefix {
    fn consensus_decode(reader: &mut BinaryReader<'_>) -> Result<Self> {
        let version = reader.read_varint()?;
        let unlock_time = reader.read_varint()?;

        let input_count = reader.read_varint()? as usize;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            let tag = reader.read_u8()?;
            let input = match tag {
                INPUT_TAG_BASE => TransactionInput::Base(BaseInput {
                    block_index: u32::try_from(reader.read_varint()?).map_err(|_| {
                        NodeError::SerializationError(
                            "Índice de bloco fora do intervalo".to_string(),
                        )
                    })?,
                }),
                INPUT_TAG_KEY => {
                    let amount = reader.read_varint()?;
                    let offset_count = reader.read_varint()? as usize;
                    let mut output_indexes = Vec::with_capacity(offset_count.min(1024));
                    for _ in 0..offset_count {
                        output_indexes.push(u32::try_from(reader.read_varint()?).map_err(
                            |_| {
                                NodeError::SerializationError(
                                    "Deslocamento de saída fora do intervalo".to_string(),
                                )
                            },
                        )?);
                    }
                    let key_image = reader.read_key_image()?;
                    TransactionInput::Key(KeyInput {
                        amount,
                        output_indexes,
                        key_image,
                    })
                }
                _ => {
                    return Err(NodeError::SerializationError(format!(
                        "Tag de entrada desconhecida: {tag:#04x}"
                    )))
                }
            };
            inputs.push(input);
        }

        let output_count = reader.read_varint()? as usize;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            let amount = reader.read_varint()?;
            let tag = reader.read_u8()?;
            let target = match tag {
                OUTPUT_TAG_KEY => TransactionOutputTarget::Key(KeyOutput {
                    key: reader.read_public_key()?,
                }),
                _ => {
                    return Err(NodeError::SerializationError(format!(
                        "Tag de saída desconhecida: {tag:#04x}"
                    )))
                }
            };
            outputs.push(TransactionOutput { amount, target });
        }

        let extra_len = reader.read_varint()? as usize;
        let extra = reader.read_bytes(extra_len)?.to_vec();

        Ok(Self {
            version,
            unlock_time,
            inputs,
            outputs,
            extra,
        })
    }
}

impl ConsensusEncode for Transaction {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        self.prefix.consensus_encode(out);
        for ring in &self.signatures {
            for signature in ring {
                out.extend_from_slice(&signature.c);
                out.extend_from_slice(&signature.r);
            }
        }
    }
}

impl ConsensusDecode for Transaction {
    fn consensus_decode(reader: &mut BinaryReader<'_>) -> Result<Self> {
        let prefix = TransactionPrefix::consensus_decode(reader)?;

        // A estrutura das assinaturas é implicada pelas entradas: cada
        // entrada por chave carrega um anel do tamanho dos seus índices
        let mut signatures = Vec::with_capacity(prefix.inputs.len());
        for input in &prefix.inputs {
            match input {
                TransactionInput::Base(_) => {}
                TransactionInput::Key(key) => {
                    let mut ring = Vec::with_capacity(key.output_indexes.len());
                    for _ in 0..key.output_indexes.len() {
                        ring.push(reader.read_signature()?);
                    }
                    signatures.push(ring);
                }
            }
        }

        Ok(Self { prefix, signatures })
    }
}

impl Transaction {
    /// Verifica se esta é uma transação base (coinbase)
    #[must_use]
    pub fn is_base(&self) -> bool {
        matches!(
            self.prefix.inputs.as_slice(),
            [TransactionInput::Base(_)]
        )
    }

    /// Soma dos valores das entradas por chave
    #[must_use]
    pub fn input_amount(&self) -> u64 {
        self.prefix
            .inputs
            .iter()
            .map(|input| match input {
                TransactionInput::Key(key) => key.amount,
                TransactionInput::Base(_) => 0,
            })
            .fold(0u64, u64::wrapping_add)
    }

    /// Soma dos valores das saídas
    #[must_use]
    pub fn output_amount(&self) -> u64 {
        self.prefix
            .outputs
            .iter()
            .map(|output| output.amount)
            .fold(0u64, u64::wrapping_add)
    }

    /// Hash canônico da transação
    ///
    /// Transações comuns: `cn_fast_hash` da forma binária completa.
    /// Transações base de versão ≥ 2: árvore de três folhas com o hash do
    /// prefixo, o separador de domínio fixo e uma cauda de preenchimento.
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        if self.prefix.version >= 2 && self.is_base() {
            let leaves = [
                self.prefix_hash(),
                base_transaction_domain_separator(),
                Hash256::zero(),
            ];
            crate::block::tree_hash(&leaves)
        } else {
            Hash256::keccak256(&self.to_binary())
        }
    }

    /// Hash do prefixo, base das assinaturas em anel
    #[must_use]
    pub fn prefix_hash(&self) -> Hash256 {
        Hash256::keccak256(&self.prefix.to_binary())
    }
}

/// Separador de domínio das transações base de versão ≥ 2
#[must_use]
pub fn base_transaction_domain_separator() -> Hash256 {
    static SEPARATOR: OnceLock<Hash256> = OnceLock::new();
    *SEPARATOR.get_or_init(|| Hash256::keccak256(b"umbra.base_transaction.v2"))
}

/// Transação com formas derivadas memoizadas
///
/// Hash, hash de prefixo, forma binária e taxa são calculados uma única vez
/// e reutilizados ao longo da validação e do pool.
#[derive(Debug, Clone)]
pub struct CachedTransaction {
    transaction: Transaction,
    binary: OnceLock<Vec<u8>>,
    hash: OnceLock<Hash256>,
    prefix_hash: OnceLock<Hash256>,
    fee: OnceLock<u64>,
}

impl CachedTransaction {
    #[must_use]
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            binary: OnceLock::new(),
            hash: OnceLock::new(),
            prefix_hash: OnceLock::new(),
            fee: OnceLock::new(),
        }
    }

    /// Desserializa e embrulha, preservando os bytes originais
    ///
    /// # Errors
    ///
    /// Retorna erro se os bytes não formarem uma transação válida
    pub fn from_binary(data: &[u8]) -> Result<Self> {
        let transaction = Transaction::from_binary(data)?;
        let cached = Self::new(transaction);
        let _ = cached.binary.set(data.to_vec());
        Ok(cached)
    }

    #[must_use]
    pub const fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    #[must_use]
    pub fn binary(&self) -> &[u8] {
        self.binary.get_or_init(|| self.transaction.to_binary())
    }

    #[must_use]
    pub fn binary_size(&self) -> u64 {
        self.binary().len() as u64
    }

    #[must_use]
    pub fn hash(&self) -> Hash256 {
        *self.hash.get_or_init(|| self.transaction.hash())
    }

    #[must_use]
    pub fn prefix_hash(&self) -> Hash256 {
        *self.prefix_hash.get_or_init(|| self.transaction.prefix_hash())
    }

    /// Taxa da transação: entradas menos saídas (zero para a base)
    #[must_use]
    pub fn fee(&self) -> u64 {
        *self.fee.get_or_init(|| {
            self.transaction
                .input_amount()
                .saturating_sub(self.transaction.output_amount())
        })
    }

    /// Desfaz o embrulho devolvendo a transação
    #[must_use]
    pub fn into_transaction(self) -> Transaction {
        self.transaction
    }
}

/// Monta um campo extra com chave pública e nonce opcional
#[must_use]
pub fn build_extra(public_key: &PublicKey, nonce: &[u8]) -> Vec<u8> {
    let mut extra = Vec::with_capacity(34 + nonce.len());
    extra.push(EXTRA_TAG_PUBLIC_KEY);
    extra.extend_from_slice(&public_key.0);
    if !nonce.is_empty() {
        extra.push(EXTRA_TAG_NONCE);
        extra.push(nonce.len() as u8);
        extra.extend_from_slice(nonce);
    }
    extra
}

/// Monta o conteúdo de nonce extra carregando um ID de pagamento
#[must_use]
pub fn payment_id_nonce(payment_id: &Hash256) -> Vec<u8> {
    let mut nonce = Vec::with_capacity(33);
    nonce.push(EXTRA_NONCE_PAYMENT_ID);
    nonce.extend_from_slice(payment_id.as_bytes());
    nonce
}

/// Extrai a chave pública da transação do campo extra
///
/// A chave segue a tag `0x01`. Uma tag sem espaço suficiente à frente é
/// ignorada.
#[must_use]
pub fn public_key_from_extra(extra: &[u8]) -> Option<PublicKey> {
    let mut i = 0;
    while i < extra.len() {
        if extra[i] == EXTRA_TAG_PUBLIC_KEY {
            let remaining = extra.len() - i - 1;
            if remaining < 32 {
                return None;
            }
            let mut key = [0u8; 32];
            key.copy_from_slice(&extra[i + 1..i + 33]);
            return Some(PublicKey(key));
        }
        i += 1;
    }
    None
}

/// Extrai o ID de pagamento embutido no nonce extra, se existir
///
/// O layout é `0x02 [tamanho] 0x00 [id de 32 bytes]`.
#[must_use]
pub fn payment_id_from_extra(extra: &[u8]) -> Option<Hash256> {
    let mut i = 0;
    while i < extra.len() {
        if extra[i] == EXTRA_TAG_NONCE {
            let remaining = extra.len() - i - 1;
            if remaining < 32 + 2 {
                return None;
            }
            if extra[i + 2] == EXTRA_NONCE_PAYMENT_ID {
                let mut id = [0u8; 32];
                id.copy_from_slice(&extra[i + 3..i + 35]);
                return Some(Hash256::from_bytes(id));
            }
        }
        i += 1;
    }
    None
}

/// Converte índices relativos (primeiro absoluto, demais deltas) em absolutos
#[must_use]
pub fn relative_to_absolute_offsets(offsets: &[u32]) -> Vec<u32> {
    let mut absolute = offsets.to_vec();
    for i in 1..absolute.len() {
        absolute[i] = absolute[i - 1].wrapping_add(absolute[i]);
    }
    absolute
}

/// Converte índices absolutos estritamente crescentes em relativos
#[must_use]
pub fn absolute_to_relative_offsets(offsets: &[u32]) -> Vec<u32> {
    if offsets.is_empty() {
        return Vec::new();
    }
    let mut relative = offsets.to_vec();
    for i in (1..relative.len()).rev() {
        relative[i] -= relative[i - 1];
    }
    relative
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Signature;

    fn sample_key_transaction() -> Transaction {
        Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: 0,
                inputs: vec![TransactionInput::Key(KeyInput {
                    amount: 5000,
                    output_indexes: vec![3, 1, 4],
                    key_image: KeyImage([7u8; 32]),
                })],
                outputs: vec![TransactionOutput {
                    amount: 4900,
                    target: TransactionOutputTarget::Key(KeyOutput {
                        key: PublicKey([9u8; 32]),
                    }),
                }],
                extra: build_extra(&PublicKey([1u8; 32]), &[]),
            },
            signatures: vec![vec![Signature::default(); 3]],
        }
    }

    #[test]
    fn test_transaction_binary_round_trip() {
        let tx = sample_key_transaction();
        let binary = tx.to_binary();
        let decoded = Transaction::from_binary(&binary).unwrap();

        assert_eq!(tx, decoded);
        assert_eq!(tx.hash(), decoded.hash());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut binary = sample_key_transaction().to_binary();
        binary.push(0);
        assert!(Transaction::from_binary(&binary).is_err());
    }

    #[test]
    fn test_fee_calculation() {
        let tx = CachedTransaction::new(sample_key_transaction());
        assert_eq!(tx.fee(), 100);
    }

    #[test]
    fn test_base_transaction_v2_hash_differs_from_v1() {
        let base = |version| Transaction {
            prefix: TransactionPrefix {
                version,
                unlock_time: 40,
                inputs: vec![TransactionInput::Base(BaseInput { block_index: 1 })],
                outputs: vec![TransactionOutput {
                    amount: 100,
                    target: TransactionOutputTarget::Key(KeyOutput {
                        key: PublicKey([2u8; 32]),
                    }),
                }],
                extra: vec![],
            },
            signatures: vec![],
        };

        assert_ne!(base(1).hash(), base(2).hash());
    }

    #[test]
    fn test_extra_public_key_round_trip() {
        let key = PublicKey([5u8; 32]);
        let extra = build_extra(&key, &[1, 2, 3]);
        assert_eq!(public_key_from_extra(&extra), Some(key));
    }

    #[test]
    fn test_extra_payment_id_round_trip() {
        let key = PublicKey([5u8; 32]);
        let id = Hash256::keccak256(b"pagamento");
        let extra = build_extra(&key, &payment_id_nonce(&id));

        assert_eq!(payment_id_from_extra(&extra), Some(id));
        assert_eq!(public_key_from_extra(&extra), Some(key));
    }

    #[test]
    fn test_extra_truncated_tag_ignored() {
        let mut extra = vec![EXTRA_TAG_PUBLIC_KEY];
        extra.extend_from_slice(&[0u8; 16]); // espaço insuficiente
        assert_eq!(public_key_from_extra(&extra), None);
    }

    #[test]
    fn test_offset_conversion_round_trip() {
        let absolute = vec![3, 4, 8, 20];
        let relative = absolute_to_relative_offsets(&absolute);
        assert_eq!(relative, vec![3, 1, 4, 12]);
        assert_eq!(relative_to_absolute_offsets(&relative), absolute);
    }

    #[test]
    fn test_offset_conversion_empty() {
        assert!(absolute_to_relative_offsets(&[]).is_empty());
        assert!(relative_to_absolute_offsets(&[]).is_empty());
    }
}
