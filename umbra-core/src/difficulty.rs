//! Motor de dificuldade
//!
//! Duas regras convivem na cadeia: a janela legada com média aparada para as
//! versões antigas e a LWMA (média linearmente ponderada dos tempos de
//! solução) a partir da versão que a ativou. O motor é puro: recebe janelas
//! de timestamps e dificuldades cumulativas e devolve a próxima dificuldade.

use shared::Hash256;

/// Corte de outliers da janela legada, em blocos de cada extremo
pub const DIFFICULTY_CUT: usize = 60;

/// Janela legada de amostragem
pub const DIFFICULTY_WINDOW: usize = 720;

/// Atraso da janela legada
pub const DIFFICULTY_LAG: usize = 15;

/// Janela da LWMA, em intervalos
pub const LWMA_WINDOW: usize = 60;

/// Versão principal a partir da qual a LWMA governa a dificuldade
pub const LWMA_BLOCK_VERSION: u8 = 4;

/// Blocos de amostra necessários para a regra da versão dada
#[must_use]
pub const fn difficulty_blocks_count(major_version: u8) -> usize {
    if major_version >= LWMA_BLOCK_VERSION {
        LWMA_WINDOW + 1
    } else {
        DIFFICULTY_WINDOW + DIFFICULTY_LAG
    }
}

/// Verifica se `hash × difficulty` cabe em 192 bits
///
/// O hash longo é interpretado como inteiro de 256 bits little-endian; o
/// produto não pode transbordar a cadeia de vai-um das três palavras altas.
#[must_use]
pub fn check_hash(hash: &Hash256, difficulty: u64) -> bool {
    fn mul(a: u64, b: u64) -> (u64, u64) {
        let wide = u128::from(a) * u128::from(b);
        (wide as u64, (wide >> 64) as u64)
    }

    fn cadd(a: u64, b: u64) -> bool {
        a.wrapping_add(b) < a
    }

    fn cadc(a: u64, b: u64, carry: bool) -> bool {
        let sum = a.wrapping_add(b);
        sum < a || (carry && sum == u64::MAX)
    }

    let words = hash.as_u64_words();

    // A palavra mais alta falha primeiro para um hash aleatório
    let (top, high) = mul(words[3], difficulty);
    if high != 0 {
        return false;
    }

    let (_, mut current) = mul(words[0], difficulty);
    let (low1, high1) = mul(words[1], difficulty);
    let mut carry = cadd(current, low1);
    current = high1;
    let (low2, high2) = mul(words[2], difficulty);
    carry = cadc(current, low2, carry);
    carry = cadc(high2, top, carry);
    !carry
}

/// Próxima dificuldade segundo a regra da versão
///
/// `timestamps` e `cumulative_difficulties` são janelas paralelas em ordem
/// crescente de altura, com no máximo `difficulty_blocks_count` entradas.
/// Nunca devolve zero.
#[must_use]
pub fn next_difficulty(
    major_version: u8,
    _height: u32,
    timestamps: Vec<u64>,
    cumulative_difficulties: Vec<u64>,
    target_seconds: u64,
) -> u64 {
    if major_version >= LWMA_BLOCK_VERSION {
        next_difficulty_lwma(&timestamps, &cumulative_difficulties, target_seconds)
    } else {
        next_difficulty_legacy(timestamps, cumulative_difficulties, target_seconds)
    }
}

/// Janela legada com média aparada
fn next_difficulty_legacy(
    mut timestamps: Vec<u64>,
    mut cumulative_difficulties: Vec<u64>,
    target_seconds: u64,
) -> u64 {
    if timestamps.len() > DIFFICULTY_WINDOW {
        timestamps.truncate(DIFFICULTY_WINDOW);
        cumulative_difficulties.truncate(DIFFICULTY_WINDOW);
    }

    let length = timestamps.len();
    if length <= 1 {
        return 1;
    }

    timestamps.sort_unstable();

    // Apara os extremos quando há amostra suficiente
    let (cut_begin, cut_end) = if length <= DIFFICULTY_WINDOW - 2 * DIFFICULTY_CUT {
        (0, length)
    } else {
        let cut_begin = (length - (DIFFICULTY_WINDOW - 2 * DIFFICULTY_CUT) + 1) / 2;
        (cut_begin, cut_begin + (DIFFICULTY_WINDOW - 2 * DIFFICULTY_CUT))
    };

    let mut time_span = timestamps[cut_end - 1].saturating_sub(timestamps[cut_begin]);
    if time_span == 0 {
        time_span = 1;
    }

    let total_work =
        cumulative_difficulties[cut_end - 1].saturating_sub(cumulative_difficulties[cut_begin]);
    if total_work == 0 {
        return 1;
    }

    let numerator = u128::from(total_work) * u128::from(target_seconds)
        + u128::from(time_span)
        - 1;
    let next = numerator / u128::from(time_span);
    u64::try_from(next).unwrap_or(u64::MAX).max(1)
}

/// LWMA: média dos tempos de solução ponderada pela recência
fn next_difficulty_lwma(
    timestamps: &[u64],
    cumulative_difficulties: &[u64],
    target_seconds: u64,
) -> u64 {
    let n = timestamps.len().saturating_sub(1);
    if n == 0 {
        return 1;
    }

    let max_solve_time = 6 * target_seconds;
    let mut weighted_solve_times: u128 = 0;

    for i in 1..=n {
        // Timestamps fora de ordem contam como o tempo de solução mínimo
        let solve_time = timestamps[i]
            .saturating_sub(timestamps[i - 1])
            .clamp(1, max_solve_time);
        weighted_solve_times += u128::from(solve_time) * i as u128;
    }

    let total_work =
        u128::from(cumulative_difficulties[n].saturating_sub(cumulative_difficulties[0]));
    if total_work == 0 {
        return 1;
    }

    let weight_sum = (n as u128 * (n as u128 + 1)) / 2;
    let next =
        total_work * weight_sum * u128::from(target_seconds) / (n as u128 * weighted_solve_times);
    u64::try_from(next).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_hash_low_difficulty() {
        let hash = Hash256::keccak256(b"qualquer");
        assert!(check_hash(&hash, 1));
    }

    #[test]
    fn test_check_hash_boundary() {
        // Hash máximo: só passa com dificuldade 1
        let hash = Hash256::from_bytes([0xff; 32]);
        assert!(check_hash(&hash, 1));
        assert!(!check_hash(&hash, 2));
    }

    #[test]
    fn test_check_hash_small_hash_big_difficulty() {
        let mut bytes = [0u8; 32];
        bytes[0] = 1;
        let hash = Hash256::from_bytes(bytes);
        assert!(check_hash(&hash, u64::MAX / 2));
    }

    #[test]
    fn test_legacy_steady_state() {
        // Blocos no alvo exato: a dificuldade converge para o trabalho médio
        let target = 90u64;
        let mut timestamps = Vec::new();
        let mut cumulative = Vec::new();
        for i in 0..100u64 {
            timestamps.push(i * target);
            cumulative.push((i + 1) * 1000);
        }

        let next = next_difficulty(1, 100, timestamps, cumulative, target);
        assert!((900..=1100).contains(&next));
    }

    #[test]
    fn test_lwma_steady_state() {
        let target = 90u64;
        let mut timestamps = Vec::new();
        let mut cumulative = Vec::new();
        for i in 0..=LWMA_WINDOW as u64 {
            timestamps.push(i * target);
            cumulative.push((i + 1) * 1000);
        }

        let next = next_difficulty(LWMA_BLOCK_VERSION, 100, timestamps, cumulative, target);
        assert!((900..=1100).contains(&next));
    }

    #[test]
    fn test_lwma_rises_on_fast_blocks() {
        let target = 90u64;
        let mut timestamps = Vec::new();
        let mut cumulative = Vec::new();
        for i in 0..=LWMA_WINDOW as u64 {
            timestamps.push(i * 10); // blocos muito rápidos
            cumulative.push((i + 1) * 1000);
        }

        let next = next_difficulty(LWMA_BLOCK_VERSION, 100, timestamps, cumulative, target);
        assert!(next > 1000);
    }

    #[test]
    fn test_difficulty_never_zero() {
        assert_eq!(next_difficulty(1, 5, vec![10], vec![5], 90), 1);
        assert_eq!(next_difficulty(4, 5, vec![10], vec![5], 90), 1);
        assert_eq!(next_difficulty(1, 5, vec![], vec![], 90), 1);
    }
}
