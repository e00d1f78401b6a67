//! Parâmetros e regras monetárias da rede Umbra
//!
//! `Currency` concentra as constantes de consenso e as funções derivadas:
//! curva de emissão, penalidade quadrática de blocos grandes, decomposição
//! de valores, construção da transação do minerador, regras de fusão e o
//! bloco gênese determinístico.

use crate::block::{BlockTemplate, CachedBlock};
use crate::difficulty;
use crate::transaction::{
    build_extra, BaseInput, KeyOutput, Transaction, TransactionInput, TransactionOutput,
    TransactionOutputTarget, TransactionPrefix,
};
use shared::{derive_output_key, deterministic_public_key, KeyPair, NodeError, PublicKey, Result};

/// Intervalo alvo entre blocos, em segundos
pub const DIFFICULTY_TARGET: u64 = 90;

/// Janela de maturação da recompensa de mineração, em blocos
pub const MINED_MONEY_UNLOCK_WINDOW: u32 = 40;

/// Janela de mediana para validação de timestamp
pub const TIMESTAMP_CHECK_WINDOW: usize = 60;
/// Janela reduzida após a ativação da LWMA
pub const TIMESTAMP_CHECK_WINDOW_V2: usize = 11;

/// Tolerância de timestamp futuro, em segundos
pub const BLOCK_FUTURE_TIME_LIMIT: u64 = 7200;
/// Tolerância reduzida após a ativação da LWMA
pub const BLOCK_FUTURE_TIME_LIMIT_V2: u64 = 360;

/// Janela de mediana de tamanhos para o cálculo de recompensa
pub const REWARD_BLOCKS_WINDOW: usize = 100;

/// Zona de recompensa integral da versão 1, em bytes
pub const GRANTED_FULL_REWARD_ZONE_V1: u64 = 20_000;
/// Zona de recompensa integral a partir da versão 2, em bytes
pub const GRANTED_FULL_REWARD_ZONE: u64 = 100_000;

/// Bytes reservados no template para o crescimento da transação base
pub const COINBASE_BLOB_RESERVED_SIZE: u64 = 600;

/// Tamanho máximo de uma transação serializada
pub const MAX_TX_SIZE: u64 = 1_000_000;

/// Limite cumulativo inicial de bloco, em bytes
pub const MAX_BLOCK_SIZE_INITIAL: u64 = 100_000;
/// Crescimento do limite cumulativo por ano, em bytes
pub const MAX_BLOCK_SIZE_GROWTH_NUMERATOR: u64 = 100_000;
/// Blocos por ano no alvo de 90 segundos
pub const MAX_BLOCK_SIZE_GROWTH_DENOMINATOR: u64 = 350_400;

/// Oferta monetária total, em unidades atômicas
pub const MONEY_SUPPLY: u64 = u64::MAX;
/// Fator de velocidade de emissão (deslocamento binário)
pub const EMISSION_SPEED_FACTOR: u32 = 23;

/// Casas decimais da moeda
pub const DECIMAL_PLACES: u32 = 6;
/// Uma moeda inteira em unidades atômicas
pub const COIN: u64 = 1_000_000;

/// Taxa mínima de uma transação não-fusão
pub const MINIMUM_FEE: u64 = 10_000;
/// Limiar de poeira na decomposição de valores
pub const DUST_THRESHOLD: u64 = 10;

/// Tempo de vida de uma transação no pool, em segundos
pub const MEMPOOL_TX_LIVE_TIME: u64 = 86_400;

/// Tamanho máximo de uma transação de fusão
pub const FUSION_TX_MAX_SIZE: u64 = 30_000;
/// Número mínimo de entradas de uma fusão
pub const FUSION_TX_MIN_INPUT_COUNT: usize = 12;
/// Razão mínima entradas/saídas de uma fusão
pub const FUSION_TX_MIN_IN_OUT_COUNT_RATIO: usize = 4;

/// Limite do campo extra imposto pelo consenso após o fork
pub const MAX_EXTRA_SIZE_V2: usize = 1024;
/// Altura de ativação do limite de extra
pub const MAX_EXTRA_SIZE_V2_HEIGHT: u32 = 40_000;
/// Limite do campo extra na admissão ao pool
pub const MAX_EXTRA_SIZE_POOL: usize = 512;
/// Limite do campo extra na inclusão em template
pub const MAX_EXTRA_SIZE_BLOCK: usize = 512;

/// Alturas de ativação das versões principais
pub const UPGRADE_HEIGHT_V2: u32 = 1;
pub const UPGRADE_HEIGHT_V3: u32 = 2;
pub const UPGRADE_HEIGHT_V4: u32 = 3_000;
pub const UPGRADE_HEIGHT_V5: u32 = 120_000;

/// Limiar do tempo de desbloqueio: abaixo é altura, acima é timestamp
pub const UNLOCK_TIME_HEIGHT_THRESHOLD: u64 = 500_000_000;
/// Folga em blocos para gastos com desbloqueio por altura
pub const LOCKED_TX_ALLOWED_DELTA_BLOCKS: u64 = 1;
/// Folga em segundos para gastos com desbloqueio por tempo
pub const LOCKED_TX_ALLOWED_DELTA_SECONDS: u64 = DIFFICULTY_TARGET;

/// Máximo de blocos devolvidos por janela de sincronização de carteira
pub const WALLET_SYNC_MAX_BLOCK_COUNT: u64 = 100;
/// Máximo de hashes devolvidos numa resposta de sincronização de cadeia
pub const CHAIN_SYNC_MAX_HASH_COUNT: usize = 500;

/// Timestamp fixo do bloco gênese
const GENESIS_TIMESTAMP: u64 = 0;
/// Nonce fixo do bloco gênese
const GENESIS_NONCE: u32 = 70;

/// Parâmetros e regras monetárias da rede
#[derive(Debug, Clone)]
pub struct Currency {
    mined_money_unlock_window: u32,
    timestamp_check_window: usize,
    timestamp_check_window_v2: usize,
    block_future_time_limit: u64,
    block_future_time_limit_v2: u64,
    money_supply: u64,
    emission_speed_factor: u32,
    genesis_block_reward: u64,
    reward_blocks_window: usize,
    granted_full_reward_zone_v1: u64,
    granted_full_reward_zone: u64,
    coinbase_blob_reserved_size: u64,
    minimum_fee: u64,
    dust_threshold: u64,
    difficulty_target: u64,
    max_tx_size: u64,
    max_block_size_initial: u64,
    max_block_size_growth_numerator: u64,
    max_block_size_growth_denominator: u64,
    mempool_tx_live_time: u64,
    fusion_tx_max_size: u64,
    fusion_tx_min_input_count: usize,
    fusion_tx_min_in_out_count_ratio: usize,
    upgrade_heights: Vec<(u8, u32)>,
    genesis_block: CachedBlock,
}

impl Currency {
    #[must_use]
    pub const fn mined_money_unlock_window(&self) -> u32 {
        self.mined_money_unlock_window
    }

    #[must_use]
    pub const fn difficulty_target(&self) -> u64 {
        self.difficulty_target
    }

    #[must_use]
    pub const fn minimum_fee(&self) -> u64 {
        self.minimum_fee
    }

    #[must_use]
    pub const fn dust_threshold(&self) -> u64 {
        self.dust_threshold
    }

    #[must_use]
    pub const fn max_tx_size(&self) -> u64 {
        self.max_tx_size
    }

    #[must_use]
    pub const fn mempool_tx_live_time(&self) -> u64 {
        self.mempool_tx_live_time
    }

    #[must_use]
    pub const fn reward_blocks_window(&self) -> usize {
        self.reward_blocks_window
    }

    #[must_use]
    pub const fn coinbase_blob_reserved_size(&self) -> u64 {
        self.coinbase_blob_reserved_size
    }

    /// Recompensa fixada para o bloco gênese
    #[must_use]
    pub const fn genesis_block_reward(&self) -> u64 {
        self.genesis_block_reward
    }

    /// Alturas de ativação das versões principais, em ordem crescente
    #[must_use]
    pub fn upgrade_heights(&self) -> &[(u8, u32)] {
        &self.upgrade_heights
    }

    /// Altura de ativação de uma versão principal
    #[must_use]
    pub fn upgrade_height(&self, major_version: u8) -> Option<u32> {
        self.upgrade_heights
            .iter()
            .find(|(version, _)| *version == major_version)
            .map(|(_, height)| *height)
    }

    /// Janela de mediana de timestamps vigente na altura
    #[must_use]
    pub fn timestamp_check_window(&self, height: u32) -> usize {
        if self.is_lwma_active(height) {
            self.timestamp_check_window_v2
        } else {
            self.timestamp_check_window
        }
    }

    /// Tolerância de timestamp futuro vigente na altura
    #[must_use]
    pub fn block_future_time_limit(&self, height: u32) -> u64 {
        if self.is_lwma_active(height) {
            self.block_future_time_limit_v2
        } else {
            self.block_future_time_limit
        }
    }

    fn is_lwma_active(&self, height: u32) -> bool {
        self.upgrade_height(difficulty::LWMA_BLOCK_VERSION)
            .is_some_and(|activation| height >= activation)
    }

    /// Zona de recompensa integral da versão principal
    #[must_use]
    pub const fn granted_full_reward_zone_by_version(&self, major_version: u8) -> u64 {
        if major_version >= 2 {
            self.granted_full_reward_zone
        } else {
            self.granted_full_reward_zone_v1
        }
    }

    /// Recompensa base da curva de emissão
    #[must_use]
    pub const fn base_reward(&self, already_generated_coins: u64) -> u64 {
        (self.money_supply - already_generated_coins) >> self.emission_speed_factor
    }

    /// Recompensa do bloco e variação de emissão
    ///
    /// A mediana efetiva nunca fica abaixo da zona de recompensa integral.
    /// Blocos acima da mediana sofrem a penalidade quadrática
    /// `penalizado = valor · tamanho · (2·mediana − tamanho) / mediana²`;
    /// acima do dobro da mediana o bloco é inaceitável e devolve `None`.
    #[must_use]
    pub fn block_reward(
        &self,
        major_version: u8,
        median_size: u64,
        current_block_size: u64,
        already_generated_coins: u64,
        fee: u64,
    ) -> Option<(u64, i64)> {
        let base = self.base_reward(already_generated_coins);
        let median = median_size.max(self.granted_full_reward_zone_by_version(major_version));

        if current_block_size > 2 * median {
            return None;
        }

        let penalized_base = penalized_amount(base, median, current_block_size);
        let penalized_fee = if major_version >= 2 {
            penalized_amount(fee, median, current_block_size)
        } else {
            fee
        };

        let reward = penalized_base + penalized_fee;
        let emission_change = penalized_base as i64 - (fee - penalized_fee) as i64;
        Some((reward, emission_change))
    }

    /// Limite de tamanho cumulativo de bloco na altura
    #[must_use]
    pub const fn max_block_cumulative_size(&self, height: u64) -> u64 {
        self.max_block_size_initial
            + height * self.max_block_size_growth_numerator
                / self.max_block_size_growth_denominator
    }

    /// Tamanho máximo de transação aceitável dado o tamanho mediano de bloco
    #[must_use]
    pub fn max_transaction_allowed_size(&self, block_median_size: u64) -> u64 {
        (2 * block_median_size)
            .saturating_sub(self.coinbase_blob_reserved_size)
            .min(self.max_tx_size)
    }

    /// Próxima dificuldade para a regra da versão
    #[must_use]
    pub fn next_difficulty(
        &self,
        major_version: u8,
        height: u32,
        timestamps: Vec<u64>,
        cumulative_difficulties: Vec<u64>,
    ) -> u64 {
        difficulty::next_difficulty(
            major_version,
            height,
            timestamps,
            cumulative_difficulties,
            self.difficulty_target,
        )
    }

    /// Verifica a prova de trabalho de um bloco
    #[must_use]
    pub fn check_proof_of_work(&self, block: &CachedBlock, current_difficulty: u64) -> bool {
        difficulty::check_hash(&block.long_hash(), current_difficulty)
    }

    /// Constrói a transação do minerador
    ///
    /// Geração em duas fases: o chamador ainda não conhece o tamanho final do
    /// bloco, então chama primeiro com uma estimativa e depois refina.
    ///
    /// # Errors
    ///
    /// Retorna erro se o tamanho corrente tornar o bloco inaceitável ou se a
    /// chave do minerador for inválida
    #[allow(clippy::too_many_arguments)]
    pub fn construct_miner_tx(
        &self,
        major_version: u8,
        height: u32,
        median_size: u64,
        already_generated_coins: u64,
        current_block_size: u64,
        fee: u64,
        miner_key: &PublicKey,
        extra_nonce: &[u8],
        max_outs: usize,
    ) -> Result<Transaction> {
        let (reward, _) = self
            .block_reward(
                major_version,
                median_size,
                current_block_size,
                already_generated_coins,
                fee,
            )
            .ok_or_else(|| {
                NodeError::ConfigError("Bloco grande demais para qualquer recompensa".to_string())
            })?;

        let tx_keys = KeyPair::generate();
        self.build_coinbase(height, reward, &tx_keys.public_key, miner_key, extra_nonce, max_outs)
    }

    fn build_coinbase(
        &self,
        height: u32,
        reward: u64,
        tx_public_key: &PublicKey,
        miner_key: &PublicKey,
        extra_nonce: &[u8],
        max_outs: usize,
    ) -> Result<Transaction> {
        let mut amounts = decompose_amount(reward, self.dust_threshold);
        while amounts.len() > max_outs.max(1) {
            let tail = amounts.pop().unwrap_or(0);
            if let Some(last) = amounts.last_mut() {
                *last += tail;
            }
        }

        let mut outputs = Vec::with_capacity(amounts.len());
        for (index, amount) in amounts.iter().enumerate() {
            let key = derive_output_key(tx_public_key, index as u64, miner_key)?;
            outputs.push(TransactionOutput {
                amount: *amount,
                target: TransactionOutputTarget::Key(KeyOutput { key }),
            });
        }

        Ok(Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: u64::from(height) + u64::from(self.mined_money_unlock_window),
                inputs: vec![TransactionInput::Base(BaseInput { block_index: height })],
                outputs,
                extra: build_extra(tx_public_key, extra_nonce),
            },
            signatures: vec![],
        })
    }

    /// Verifica se a transação qualifica como fusão
    ///
    /// Fusões consolidam muitas saídas pequenas: taxa zero, tamanho limitado,
    /// número mínimo de entradas, razão mínima entradas/saídas, entradas com
    /// valores canônicos acima da poeira e saídas exatamente na decomposição
    /// canônica da soma.
    #[must_use]
    pub fn is_fusion_transaction(&self, transaction: &Transaction, size: u64) -> bool {
        if size > self.fusion_tx_max_size {
            return false;
        }

        let mut input_amounts = Vec::with_capacity(transaction.prefix.inputs.len());
        for input in &transaction.prefix.inputs {
            match input {
                TransactionInput::Key(key) => input_amounts.push(key.amount),
                TransactionInput::Base(_) => return false,
            }
        }

        if input_amounts.len() < self.fusion_tx_min_input_count {
            return false;
        }

        if input_amounts.len()
            < transaction.prefix.outputs.len() * self.fusion_tx_min_in_out_count_ratio
        {
            return false;
        }

        let mut input_total = 0u64;
        for amount in &input_amounts {
            if *amount <= self.dust_threshold || !is_canonical_amount(*amount) {
                return false;
            }
            match input_total.checked_add(*amount) {
                Some(total) => input_total = total,
                None => return false,
            }
        }

        let mut expected = decompose_amount(input_total, self.dust_threshold);
        expected.sort_unstable();

        let mut actual: Vec<u64> = transaction
            .prefix
            .outputs
            .iter()
            .map(|output| output.amount)
            .collect();
        actual.sort_unstable();

        expected == actual
    }

    /// Bloco gênese da rede
    #[must_use]
    pub const fn genesis_block(&self) -> &CachedBlock {
        &self.genesis_block
    }

    /// Hash do bloco gênese
    #[must_use]
    pub fn genesis_hash(&self) -> shared::Hash256 {
        self.genesis_block.hash()
    }

    /// Formata um valor em unidades atômicas como moeda decimal
    #[must_use]
    pub fn format_amount(&self, amount: u64) -> String {
        format!(
            "{}.{:06}",
            amount / COIN,
            amount % COIN
        )
    }
}

/// Penalidade quadrática sobre blocos acima da mediana
fn penalized_amount(amount: u64, median_size: u64, current_block_size: u64) -> u64 {
    if current_block_size <= median_size {
        return amount;
    }

    let amount = u128::from(amount);
    let median = u128::from(median_size);
    let size = u128::from(current_block_size);

    let product = amount * size * (2 * median - size) / (median * median);
    product as u64
}

/// Decompõe um valor em parcelas `dígito · 10^k`
///
/// Parcelas menores ou iguais ao limiar de poeira são agregadas e emitidas
/// uma única vez, antes das demais. A soma das parcelas é sempre o valor
/// original.
#[must_use]
pub fn decompose_amount(amount: u64, dust_threshold: u64) -> Vec<u64> {
    let mut chunks = Vec::new();
    let mut dust = 0u64;
    let mut remaining = amount;
    let mut order = 1u64;

    while remaining > 0 {
        let digit = remaining % 10;
        remaining /= 10;

        let chunk = digit * order;
        if chunk != 0 {
            if chunk <= dust_threshold {
                dust += chunk;
            } else {
                chunks.push(chunk);
            }
        }

        match order.checked_mul(10) {
            Some(next) => order = next,
            None => break,
        }
    }

    if dust > 0 {
        chunks.insert(0, dust);
    }

    chunks
}

/// Verifica se o valor é uma parcela canônica `dígito · 10^k`
#[must_use]
pub fn is_canonical_amount(mut amount: u64) -> bool {
    while amount >= 10 && amount % 10 == 0 {
        amount /= 10;
    }
    amount < 10
}

/// Construtor fluente de moedas
///
/// Os padrões correspondem à rede principal; os testes reduzem janelas e
/// alturas de fork para tamanhos exercitáveis.
pub struct CurrencyBuilder {
    mined_money_unlock_window: u32,
    timestamp_check_window: usize,
    timestamp_check_window_v2: usize,
    block_future_time_limit: u64,
    block_future_time_limit_v2: u64,
    money_supply: u64,
    emission_speed_factor: u32,
    genesis_block_reward: u64,
    reward_blocks_window: usize,
    granted_full_reward_zone_v1: u64,
    granted_full_reward_zone: u64,
    coinbase_blob_reserved_size: u64,
    minimum_fee: u64,
    dust_threshold: u64,
    difficulty_target: u64,
    max_tx_size: u64,
    max_block_size_initial: u64,
    max_block_size_growth_numerator: u64,
    max_block_size_growth_denominator: u64,
    mempool_tx_live_time: u64,
    fusion_tx_max_size: u64,
    fusion_tx_min_input_count: usize,
    fusion_tx_min_in_out_count_ratio: usize,
    upgrade_heights: Vec<(u8, u32)>,
}

impl Default for CurrencyBuilder {
    fn default() -> Self {
        Self {
            mined_money_unlock_window: MINED_MONEY_UNLOCK_WINDOW,
            timestamp_check_window: TIMESTAMP_CHECK_WINDOW,
            timestamp_check_window_v2: TIMESTAMP_CHECK_WINDOW_V2,
            block_future_time_limit: BLOCK_FUTURE_TIME_LIMIT,
            block_future_time_limit_v2: BLOCK_FUTURE_TIME_LIMIT_V2,
            money_supply: MONEY_SUPPLY,
            emission_speed_factor: EMISSION_SPEED_FACTOR,
            genesis_block_reward: 0,
            reward_blocks_window: REWARD_BLOCKS_WINDOW,
            granted_full_reward_zone_v1: GRANTED_FULL_REWARD_ZONE_V1,
            granted_full_reward_zone: GRANTED_FULL_REWARD_ZONE,
            coinbase_blob_reserved_size: COINBASE_BLOB_RESERVED_SIZE,
            minimum_fee: MINIMUM_FEE,
            dust_threshold: DUST_THRESHOLD,
            difficulty_target: DIFFICULTY_TARGET,
            max_tx_size: MAX_TX_SIZE,
            max_block_size_initial: MAX_BLOCK_SIZE_INITIAL,
            max_block_size_growth_numerator: MAX_BLOCK_SIZE_GROWTH_NUMERATOR,
            max_block_size_growth_denominator: MAX_BLOCK_SIZE_GROWTH_DENOMINATOR,
            mempool_tx_live_time: MEMPOOL_TX_LIVE_TIME,
            fusion_tx_max_size: FUSION_TX_MAX_SIZE,
            fusion_tx_min_input_count: FUSION_TX_MIN_INPUT_COUNT,
            fusion_tx_min_in_out_count_ratio: FUSION_TX_MIN_IN_OUT_COUNT_RATIO,
            upgrade_heights: vec![
                (2, UPGRADE_HEIGHT_V2),
                (3, UPGRADE_HEIGHT_V3),
                (4, UPGRADE_HEIGHT_V4),
                (5, UPGRADE_HEIGHT_V5),
            ],
        }
    }
}

impl CurrencyBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn mined_money_unlock_window(mut self, value: u32) -> Self {
        self.mined_money_unlock_window = value;
        self
    }

    #[must_use]
    pub const fn timestamp_check_window(mut self, value: usize) -> Self {
        self.timestamp_check_window = value;
        self
    }

    #[must_use]
    pub const fn block_future_time_limit(mut self, value: u64) -> Self {
        self.block_future_time_limit = value;
        self
    }

    #[must_use]
    pub const fn money_supply(mut self, value: u64) -> Self {
        self.money_supply = value;
        self
    }

    #[must_use]
    pub const fn emission_speed_factor(mut self, value: u32) -> Self {
        self.emission_speed_factor = value;
        self
    }

    #[must_use]
    pub const fn genesis_block_reward(mut self, value: u64) -> Self {
        self.genesis_block_reward = value;
        self
    }

    #[must_use]
    pub const fn reward_blocks_window(mut self, value: usize) -> Self {
        self.reward_blocks_window = value;
        self
    }

    #[must_use]
    pub const fn granted_full_reward_zone(mut self, value: u64) -> Self {
        self.granted_full_reward_zone = value;
        self
    }

    #[must_use]
    pub const fn granted_full_reward_zone_v1(mut self, value: u64) -> Self {
        self.granted_full_reward_zone_v1 = value;
        self
    }

    #[must_use]
    pub const fn minimum_fee(mut self, value: u64) -> Self {
        self.minimum_fee = value;
        self
    }

    #[must_use]
    pub const fn difficulty_target(mut self, value: u64) -> Self {
        self.difficulty_target = value;
        self
    }

    #[must_use]
    pub const fn mempool_tx_live_time(mut self, value: u64) -> Self {
        self.mempool_tx_live_time = value;
        self
    }

    #[must_use]
    pub const fn fusion_tx_min_input_count(mut self, value: usize) -> Self {
        self.fusion_tx_min_input_count = value;
        self
    }

    #[must_use]
    pub const fn max_block_size_initial(mut self, value: u64) -> Self {
        self.max_block_size_initial = value;
        self
    }

    /// Substitui a tabela de alturas de ativação das versões principais
    #[must_use]
    pub fn upgrade_heights(mut self, heights: Vec<(u8, u32)>) -> Self {
        self.upgrade_heights = heights;
        self
    }

    /// Finaliza a moeda, gerando o bloco gênese determinístico
    #[must_use]
    pub fn currency(self) -> Currency {
        let genesis_reward = if self.genesis_block_reward > 0 {
            self.genesis_block_reward
        } else {
            (self.money_supply) >> self.emission_speed_factor
        };

        let genesis_block = generate_genesis_block(
            genesis_reward,
            self.mined_money_unlock_window,
            self.dust_threshold,
        );

        let mut upgrade_heights = self.upgrade_heights;
        upgrade_heights.sort_by_key(|(_, height)| *height);

        Currency {
            mined_money_unlock_window: self.mined_money_unlock_window,
            timestamp_check_window: self.timestamp_check_window,
            timestamp_check_window_v2: self.timestamp_check_window_v2,
            block_future_time_limit: self.block_future_time_limit,
            block_future_time_limit_v2: self.block_future_time_limit_v2,
            money_supply: self.money_supply,
            emission_speed_factor: self.emission_speed_factor,
            genesis_block_reward: genesis_reward,
            reward_blocks_window: self.reward_blocks_window,
            granted_full_reward_zone_v1: self.granted_full_reward_zone_v1,
            granted_full_reward_zone: self.granted_full_reward_zone,
            coinbase_blob_reserved_size: self.coinbase_blob_reserved_size,
            minimum_fee: self.minimum_fee,
            dust_threshold: self.dust_threshold,
            difficulty_target: self.difficulty_target,
            max_tx_size: self.max_tx_size,
            max_block_size_initial: self.max_block_size_initial,
            max_block_size_growth_numerator: self.max_block_size_growth_numerator,
            max_block_size_growth_denominator: self.max_block_size_growth_denominator,
            mempool_tx_live_time: self.mempool_tx_live_time,
            fusion_tx_max_size: self.fusion_tx_max_size,
            fusion_tx_min_input_count: self.fusion_tx_min_input_count,
            fusion_tx_min_in_out_count_ratio: self.fusion_tx_min_in_out_count_ratio,
            upgrade_heights,
            genesis_block,
        }
    }
}

/// Gera o bloco gênese com chaves determinísticas
fn generate_genesis_block(
    reward: u64,
    unlock_window: u32,
    dust_threshold: u64,
) -> CachedBlock {
    let tx_public_key = deterministic_public_key(b"umbra.genesis.tx_key");

    let amounts = decompose_amount(reward, dust_threshold);
    let outputs = amounts
        .iter()
        .enumerate()
        .map(|(index, amount)| TransactionOutput {
            amount: *amount,
            target: TransactionOutputTarget::Key(KeyOutput {
                key: deterministic_public_key(
                    format!("umbra.genesis.output.{index}").as_bytes(),
                ),
            }),
        })
        .collect();

    let base_transaction = Transaction {
        prefix: TransactionPrefix {
            version: 1,
            unlock_time: u64::from(unlock_window),
            inputs: vec![TransactionInput::Base(BaseInput { block_index: 0 })],
            outputs,
            extra: build_extra(&tx_public_key, &[]),
        },
        signatures: vec![],
    };

    CachedBlock::new(BlockTemplate {
        major_version: 1,
        minor_version: 0,
        timestamp: GENESIS_TIMESTAMP,
        previous_block_hash: shared::Hash256::zero(),
        nonce: GENESIS_NONCE,
        parent_block: None,
        base_transaction,
        transaction_hashes: vec![],
    })
}
