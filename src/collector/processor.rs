//! Block processing: turning a fetched block into a structured report of the
//! ledger activity it carries.

use crate::ledger::types::{
    parse_fixed, AccountId, AssetId, Block, Instruction, MAX_AMOUNT_PRECISION,
};
use anyhow::{anyhow, Error as AnyError};
use core::future::Future;
use core::pin::Pin;

pub type ProcessorFuture<'a> =
    Pin<Box<dyn Future<Output = Result<BlockReport, ProcessingError>> + Send + 'a>>;

/// Error raised when a fetched block cannot be interpreted. Recovered by the
/// poller: logged, counted, and retried on the next tick.
#[derive(Debug)]
pub struct ProcessingError {
    height: u64,
    source: AnyError,
}

impl ProcessingError {
    pub fn new(height: u64, source: AnyError) -> Self {
        Self { height, source }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl core::fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "failed to process block {}: {}", self.height, self.source)
    }
}

impl std::error::Error for ProcessingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// One asset movement between two accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub source: AccountId,
    pub destination: AccountId,
    pub asset: AssetId,
    pub description: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    pub asset: AssetId,
    pub precision: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRecord {
    pub asset: AssetId,
    pub amount: String,
}

/// Values derived from one block. Reports are per-block; nothing accumulates
/// across cycles, so reprocessing a block after a failed cycle is harmless.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockReport {
    pub height: u64,
    pub transfers: Vec<TransferRecord>,
    pub accounts_created: Vec<AccountId>,
    pub assets_created: Vec<AssetRecord>,
    pub mints: Vec<MintRecord>,
    pub rejected_transactions: usize,
}

/// Trait implemented by downstream consumers of fetched blocks.
///
/// Invoked sequentially by the poll loop, never concurrently with itself.
pub trait BlockProcessor: Send + Sync + 'static {
    fn process<'a>(&'a mut self, block: &'a Block) -> ProcessorFuture<'a>;
}

/// Default processor: extracts transfers, account and asset creations, and
/// mints from the committed transactions of a block and logs one summary line.
#[derive(Debug, Default)]
pub struct TransferReporter;

impl TransferReporter {
    pub fn new() -> Self {
        Self
    }

    fn derive(block: &Block) -> Result<BlockReport, ProcessingError> {
        let mut report = BlockReport {
            height: block.height,
            ..BlockReport::default()
        };

        for tx in &block.transactions {
            let hash = tx
                .hash()
                .map_err(|err| ProcessingError::new(block.height, err))?;
            if block.is_rejected(&hash) {
                report.rejected_transactions += 1;
                continue;
            }

            for instruction in &tx.payload.instructions {
                match instruction {
                    Instruction::TransferAsset {
                        source,
                        destination,
                        asset,
                        description,
                        amount,
                    } => {
                        validate_amount(block.height, amount)?;
                        report.transfers.push(TransferRecord {
                            source: source.clone(),
                            destination: destination.clone(),
                            asset: asset.clone(),
                            description: description.clone(),
                            amount: amount.clone(),
                        });
                    }
                    Instruction::CreateAccount { name, domain, .. } => {
                        let account = AccountId::new(name.clone(), domain.clone())
                            .map_err(|err| ProcessingError::new(block.height, err))?;
                        report.accounts_created.push(account);
                    }
                    Instruction::CreateAsset {
                        name,
                        domain,
                        precision,
                    } => {
                        if *precision > MAX_AMOUNT_PRECISION {
                            return Err(ProcessingError::new(
                                block.height,
                                anyhow!("asset precision {precision} is out of range"),
                            ));
                        }
                        let asset = AssetId::new(name.clone(), domain.clone())
                            .map_err(|err| ProcessingError::new(block.height, err))?;
                        report.assets_created.push(AssetRecord {
                            asset,
                            precision: *precision,
                        });
                    }
                    Instruction::AddAssetQuantity { asset, amount } => {
                        validate_amount(block.height, amount)?;
                        report.mints.push(MintRecord {
                            asset: asset.clone(),
                            amount: amount.clone(),
                        });
                    }
                    Instruction::AddPeer { .. }
                    | Instruction::CreateRole { .. }
                    | Instruction::CreateDomain { .. } => {}
                }
            }
        }

        Ok(report)
    }
}

fn validate_amount(height: u64, amount: &str) -> Result<(), ProcessingError> {
    parse_fixed(amount, MAX_AMOUNT_PRECISION)
        .map(|_| ())
        .map_err(|err| ProcessingError::new(height, err))
}

impl BlockProcessor for TransferReporter {
    fn process<'a>(&'a mut self, block: &'a Block) -> ProcessorFuture<'a> {
        Box::pin(async move {
            let report = Self::derive(block)?;
            tracing::info!(
                height = report.height,
                transfers = report.transfers.len(),
                accounts_created = report.accounts_created.len(),
                assets_created = report.assets_created.len(),
                mints = report.mints.len(),
                rejected = report.rejected_transactions,
                "block report"
            );
            Ok(report)
        })
    }
}
