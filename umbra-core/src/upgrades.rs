//! Gerenciador de atualizações de versão por altura

/// Tabela ordenada de ativação de versões principais
///
/// Cada entrada fixa a altura a partir da qual a versão se torna
/// obrigatória. A versão vigente numa altura é a maior cuja ativação já
/// ocorreu; abaixo da primeira ativação vigora a versão 1.
#[derive(Debug, Clone, Default)]
pub struct UpgradeManager {
    upgrades: Vec<(u8, u32)>,
}

impl UpgradeManager {
    #[must_use]
    pub const fn new() -> Self {
        Self { upgrades: Vec::new() }
    }

    /// Registra a ativação de uma versão principal
    pub fn add_major_block_version(&mut self, major_version: u8, activation_height: u32) {
        self.upgrades.push((major_version, activation_height));
        self.upgrades.sort_by_key(|(_, height)| *height);
    }

    /// Versão principal obrigatória na altura
    #[must_use]
    pub fn major_version_for_height(&self, height: u32) -> u8 {
        self.upgrades
            .iter()
            .rev()
            .find(|(_, activation)| height >= *activation)
            .map_or(1, |(version, _)| *version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> UpgradeManager {
        let mut manager = UpgradeManager::new();
        manager.add_major_block_version(4, 300);
        manager.add_major_block_version(2, 10);
        manager.add_major_block_version(3, 100);
        manager
    }

    #[test]
    fn test_version_below_first_activation() {
        assert_eq!(manager().major_version_for_height(0), 1);
        assert_eq!(manager().major_version_for_height(9), 1);
    }

    #[test]
    fn test_version_at_activation_boundaries() {
        let manager = manager();
        assert_eq!(manager.major_version_for_height(10), 2);
        assert_eq!(manager.major_version_for_height(99), 2);
        assert_eq!(manager.major_version_for_height(100), 3);
        assert_eq!(manager.major_version_for_height(300), 4);
        assert_eq!(manager.major_version_for_height(1_000_000), 4);
    }
}
