pub mod collector;
pub mod ledger;
pub mod runtime;

pub use collector::poller::{CycleSummary, Poller};
pub use collector::processor::{
    AssetRecord, BlockProcessor, BlockReport, MintRecord, ProcessingError, ProcessorFuture,
    TransferRecord, TransferReporter,
};
pub use collector::progress::ProgressTracker;
pub use ledger::client::{AsyncLedgerClient, BlockSource, FetchError};
pub use ledger::genesis::{GenesisBlock, GenesisBuilder};
pub use ledger::options::LedgerClientOptions;
pub use ledger::status::{StatusEvent, StatusPublisher, StatusSubscription, TerminalStatus};
pub use ledger::types::{
    AccountAsset, AccountId, AssetId, Block, Instruction, QueryPayload, QueryRequest,
    SignedQuery, SignedTransaction, Transaction, TransactionBuilder,
};
pub use runtime::config::{CollectorConfig, CollectorConfigBuilder, CollectorConfigParams};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
