//! Seleção e cálculo do hash de prova de trabalho
//!
//! O hash lento da Umbra é Keccak-256 iterado com separação de domínio por
//! rodada. A variante é função pura da versão principal e da altura: redes
//! v1 e v2 usam contagens fixas de rodadas; a partir da v3 entra a variante
//! "soft-shell", cuja contagem oscila com a altura numa onda triangular, de
//! modo que o custo por bloco sobe e desce ao longo de cada janela.

use shared::Hash256;

/// Janela da oscilação soft-shell, em blocos
pub const SOFT_SHELL_WINDOW: u32 = 2048;

/// Rodadas adicionais no pico da oscilação
const SOFT_SHELL_PEAK_EXTRA: u32 = 32;

/// Variante do hash lento
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowVariant {
    /// Rede inaugural
    V0,
    /// Endurecimento da versão 2
    V1,
    /// Oscilação parametrizada pela altura
    SoftShell,
}

/// Seleciona a variante para um bloco
#[must_use]
pub const fn variant_for(major_version: u8, _height: u32) -> PowVariant {
    match major_version {
        0 | 1 => PowVariant::V0,
        2 => PowVariant::V1,
        _ => PowVariant::SoftShell,
    }
}

/// Número de rodadas da variante na altura dada
#[must_use]
pub fn rounds_for(variant: PowVariant, height: u32) -> u32 {
    match variant {
        PowVariant::V0 => 4,
        PowVariant::V1 => 8,
        PowVariant::SoftShell => {
            // Onda triangular: sobe até o pico no meio da janela e desce
            let offset = height % (2 * SOFT_SHELL_WINDOW);
            let ascent = if offset < SOFT_SHELL_WINDOW {
                offset
            } else {
                2 * SOFT_SHELL_WINDOW - offset
            };
            8 + ascent * SOFT_SHELL_PEAK_EXTRA / SOFT_SHELL_WINDOW
        }
    }
}

/// Hash lento de prova de trabalho para um bloco
///
/// Contrato puro: mesmos bytes, altura e versão produzem sempre o mesmo
/// hash. A altura participa do estado inicial para amarrar o trabalho ao
/// ponto da cadeia.
#[must_use]
pub fn pow_hash_for_height(data: &[u8], height: u32, major_version: u8) -> Hash256 {
    let variant = variant_for(major_version, height);
    let rounds = rounds_for(variant, height);

    let mut seed = Vec::with_capacity(data.len() + 8);
    seed.extend_from_slice(&u64::from(height).to_le_bytes());
    seed.extend_from_slice(data);

    let mut state = Hash256::keccak256(&seed);
    let mut buffer = [0u8; 40];
    for round in 0..rounds {
        buffer[..32].copy_from_slice(state.as_bytes());
        buffer[32..36].copy_from_slice(&round.to_le_bytes());
        buffer[36..40].copy_from_slice(&u32::from(major_version).to_le_bytes());
        state = Hash256::keccak256(&buffer);
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow_hash_is_deterministic() {
        let a = pow_hash_for_height(b"bloco", 10, 1);
        let b = pow_hash_for_height(b"bloco", 10, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_pow_hash_varies_with_height_and_version() {
        let base = pow_hash_for_height(b"bloco", 10, 1);
        assert_ne!(base, pow_hash_for_height(b"bloco", 11, 1));
        assert_ne!(base, pow_hash_for_height(b"bloco", 10, 2));
    }

    #[test]
    fn test_soft_shell_oscillation() {
        // Vale da janela: custo mínimo
        assert_eq!(rounds_for(PowVariant::SoftShell, 0), 8);
        // Pico no meio da janela
        assert_eq!(
            rounds_for(PowVariant::SoftShell, SOFT_SHELL_WINDOW),
            8 + SOFT_SHELL_PEAK_EXTRA
        );
        // Volta ao vale no fim da janela dupla
        assert_eq!(rounds_for(PowVariant::SoftShell, 2 * SOFT_SHELL_WINDOW), 8);
    }

    #[test]
    fn test_variant_selection() {
        assert_eq!(variant_for(1, 0), PowVariant::V0);
        assert_eq!(variant_for(2, 0), PowVariant::V1);
        assert_eq!(variant_for(3, 0), PowVariant::SoftShell);
        assert_eq!(variant_for(5, 0), PowVariant::SoftShell);
    }
}
