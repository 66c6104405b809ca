//! Network bootstrap: the transactions executed once at genesis (peers, roles,
//! domains, accounts, assets, initial quantities).

use crate::ledger::types::Transaction;

/// Ordered set of setup transactions applied as block one of a fresh ledger.
#[derive(Debug, Clone, Default)]
pub struct GenesisBlock {
    transactions: Vec<Transaction>,
}

impl GenesisBlock {
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn into_transactions(self) -> Vec<Transaction> {
        self.transactions
    }
}

/// Collects genesis transactions in submission order.
///
/// Genesis transactions may be unsigned and may carry no creator; validation of
/// their instructions is the ledger's concern.
#[derive(Debug, Clone, Default)]
pub struct GenesisBuilder {
    transactions: Vec<Transaction>,
}

impl GenesisBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transaction(mut self, transaction: Transaction) -> Self {
        self.transactions.push(transaction);
        self
    }

    pub fn build(self) -> GenesisBlock {
        GenesisBlock {
            transactions: self.transactions,
        }
    }
}
