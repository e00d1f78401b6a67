pub mod block;
pub mod checkpoints;
pub mod core;
pub mod currency;
pub mod difficulty;
pub mod error;
pub mod messages;
pub mod mixins;
pub mod pool;
pub mod pow;
pub mod segment;
pub mod serialization;
pub mod storage;
pub mod transaction;
pub mod upgrades;
pub mod validator_state;
pub mod wallet_sync;

// Re-exports principais
pub use block::{BlockTemplate, CachedBlock, ParentBlock, RawBlock};
pub use checkpoints::Checkpoints;
pub use crate::core::{
    run_pool_cleaner, BlockTemplateResponse, Core, CoreStatistics, RealTimeProvider,
    TimeProvider, TransactionsStatus,
};
pub use currency::{Currency, CurrencyBuilder};
pub use error::{
    AddBlockError, AddBlockResult, BlockValidationError, CoreError, TransactionValidationError,
};
pub use messages::{BlockchainMessage, DeleteTransactionReason};
pub use storage::{
    create_swapped_main_chain_storage, InMemoryMainChainStorage, MainChainStorage,
    SnapshotStore, SwappedMainChainStorage,
};
pub use transaction::{CachedTransaction, Transaction, TransactionPrefix};
pub use upgrades::UpgradeManager;
pub use validator_state::TransactionValidatorState;
pub use wallet_sync::WalletBlockInfo;

// Re-exports de tipos compartilhados
pub use shared::{Hash256, KeyImage, NodeError, PublicKey, Result};
