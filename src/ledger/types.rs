//! Wire-level data model shared by the ledger client, the collector, and the
//! test harness: identifiers, instructions, transactions, queries, and blocks.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Highest asset precision the collector accepts when validating amounts.
pub const MAX_AMOUNT_PRECISION: u32 = 18;

/// Previous-block hash carried by the genesis block.
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Account identifier rendered as `name@domain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId {
    name: String,
    domain: String,
}

impl AccountId {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let domain = domain.into();
        validate_label(&name, "account name")?;
        validate_label(&domain, "domain")?;
        Ok(Self { name, domain })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)
    }
}

impl FromStr for AccountId {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.split_once('@') {
            Some((name, domain)) => Self::new(name, domain),
            None => bail!("account id {value:?} must use the name@domain form"),
        }
    }
}

impl TryFrom<String> for AccountId {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        value.to_string()
    }
}

/// Asset identifier rendered as `name#domain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId {
    name: String,
    domain: String,
}

impl AssetId {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let domain = domain.into();
        validate_label(&name, "asset name")?;
        validate_label(&domain, "domain")?;
        Ok(Self { name, domain })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.domain)
    }
}

impl FromStr for AssetId {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.split_once('#') {
            Some((name, domain)) => Self::new(name, domain),
            None => bail!("asset id {value:?} must use the name#domain form"),
        }
    }
}

impl TryFrom<String> for AssetId {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AssetId> for String {
    fn from(value: AssetId) -> Self {
        value.to_string()
    }
}

fn validate_label(value: &str, field: &str) -> Result<()> {
    if value.is_empty() {
        bail!("{field} cannot be empty");
    }
    if value.contains('@') || value.contains('#') {
        bail!("{field} {value:?} must not contain id separators");
    }
    Ok(())
}

/// Parses a decimal amount string into integer minor units at the given precision.
///
/// Amounts are unsigned; more fractional digits than the precision allows is an error.
pub fn parse_fixed(amount: &str, precision: u32) -> Result<u128> {
    if precision > MAX_AMOUNT_PRECISION {
        bail!("precision {precision} exceeds the supported maximum {MAX_AMOUNT_PRECISION}");
    }

    let amount = amount.trim();
    let (integer, fraction) = match amount.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (amount, ""),
    };

    if integer.is_empty() || !integer.bytes().all(|b| b.is_ascii_digit()) {
        bail!("amount {amount:?} is not a valid decimal number");
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        bail!("amount {amount:?} is not a valid decimal number");
    }
    if fraction.len() as u32 > precision {
        bail!("amount {amount:?} has more than {precision} fractional digits");
    }

    let scale = 10u128
        .checked_pow(precision)
        .context("precision scale overflow")?;
    let integer: u128 = integer
        .parse()
        .with_context(|| format!("integer part of {amount:?} overflows"))?;
    let mut fraction_units: u128 = if fraction.is_empty() {
        0
    } else {
        fraction
            .parse()
            .with_context(|| format!("fractional part of {amount:?} overflows"))?
    };
    for _ in fraction.len() as u32..precision {
        fraction_units = fraction_units
            .checked_mul(10)
            .context("fractional scale overflow")?;
    }

    integer
        .checked_mul(scale)
        .and_then(|units| units.checked_add(fraction_units))
        .with_context(|| format!("amount {amount:?} overflows at precision {precision}"))
}

/// Renders integer minor units back into a decimal string, trimming trailing zeros.
pub fn format_fixed(units: u128, precision: u32) -> String {
    if precision == 0 {
        return units.to_string();
    }

    let scale = 10u128.saturating_pow(precision);
    let integer = units / scale;
    let fraction = units % scale;
    if fraction == 0 {
        return integer.to_string();
    }

    let mut rendered = format!("{integer}.{fraction:0width$}", width = precision as usize);
    while rendered.ends_with('0') {
        rendered.pop();
    }
    rendered
}

/// Ledger commands understood by the collector and executed by the test ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    AddPeer {
        address: String,
        public_key: String,
    },
    CreateRole {
        name: String,
        permissions: Vec<String>,
    },
    CreateDomain {
        name: String,
        default_role: String,
    },
    CreateAccount {
        name: String,
        domain: String,
        public_key: String,
    },
    CreateAsset {
        name: String,
        domain: String,
        precision: u32,
    },
    AddAssetQuantity {
        asset: AssetId,
        amount: String,
    },
    TransferAsset {
        source: AccountId,
        destination: AccountId,
        asset: AssetId,
        description: String,
        amount: String,
    },
}

/// Transaction payload. Genesis transactions may carry no creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub creator: Option<AccountId>,
    pub quorum: u32,
    pub created_ms: u64,
    pub instructions: Vec<Instruction>,
}

impl Transaction {
    pub fn builder(creator: Option<AccountId>) -> TransactionBuilder {
        TransactionBuilder {
            creator,
            quorum: 1,
            created_ms: None,
            instructions: Vec::new(),
        }
    }

    /// Content hash of the payload: hex-encoded sha256 over the canonical JSON form.
    pub fn hash(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self).context("failed to serialize transaction payload")?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Attaches an opaque signature for the given key. No cryptographic scheme is
    /// implied; the ledger only checks the key against the account's registered key.
    pub fn sign(self, public_key: impl Into<String>) -> Result<SignedTransaction> {
        let payload_hash = self.hash()?;
        Ok(SignedTransaction {
            payload: self,
            signatures: vec![Signature {
                public_key: public_key.into(),
                payload: payload_hash,
            }],
        })
    }

    /// Wraps the payload without any signature, as genesis transactions are allowed to be.
    pub fn unsigned(self) -> SignedTransaction {
        SignedTransaction {
            payload: self,
            signatures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    creator: Option<AccountId>,
    quorum: u32,
    created_ms: Option<u64>,
    instructions: Vec<Instruction>,
}

impl TransactionBuilder {
    pub fn quorum(mut self, quorum: u32) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn created_ms(mut self, created_ms: u64) -> Self {
        self.created_ms = Some(created_ms);
        self
    }

    pub fn add_peer(mut self, address: impl Into<String>, public_key: impl Into<String>) -> Self {
        self.instructions.push(Instruction::AddPeer {
            address: address.into(),
            public_key: public_key.into(),
        });
        self
    }

    pub fn create_role(mut self, name: impl Into<String>, permissions: Vec<String>) -> Self {
        self.instructions.push(Instruction::CreateRole {
            name: name.into(),
            permissions,
        });
        self
    }

    pub fn create_domain(
        mut self,
        name: impl Into<String>,
        default_role: impl Into<String>,
    ) -> Self {
        self.instructions.push(Instruction::CreateDomain {
            name: name.into(),
            default_role: default_role.into(),
        });
        self
    }

    pub fn create_account(
        mut self,
        name: impl Into<String>,
        domain: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        self.instructions.push(Instruction::CreateAccount {
            name: name.into(),
            domain: domain.into(),
            public_key: public_key.into(),
        });
        self
    }

    pub fn create_asset(
        mut self,
        name: impl Into<String>,
        domain: impl Into<String>,
        precision: u32,
    ) -> Self {
        self.instructions.push(Instruction::CreateAsset {
            name: name.into(),
            domain: domain.into(),
            precision,
        });
        self
    }

    pub fn add_asset_quantity(mut self, asset: AssetId, amount: impl Into<String>) -> Self {
        self.instructions.push(Instruction::AddAssetQuantity {
            asset,
            amount: amount.into(),
        });
        self
    }

    pub fn transfer_asset(
        mut self,
        source: AccountId,
        destination: AccountId,
        asset: AssetId,
        description: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        self.instructions.push(Instruction::TransferAsset {
            source,
            destination,
            asset,
            description: description.into(),
            amount: amount.into(),
        });
        self
    }

    pub fn build(self) -> Transaction {
        Transaction {
            creator: self.creator,
            quorum: self.quorum,
            created_ms: self.created_ms.unwrap_or_else(now_ms),
            instructions: self.instructions,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or_default()
}

/// Opaque signature: a key identifier plus an uninterpreted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub public_key: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub payload: Transaction,
    pub signatures: Vec<Signature>,
}

impl SignedTransaction {
    pub fn hash(&self) -> Result<String> {
        self.payload.hash()
    }
}

/// Read request payload carried by a signed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryRequest {
    AccountAssets { account: AccountId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPayload {
    pub creator: AccountId,
    pub counter: u64,
    pub request: QueryRequest,
}

impl QueryPayload {
    pub fn account_assets(creator: AccountId, counter: u64, account: AccountId) -> Self {
        Self {
            creator,
            counter,
            request: QueryRequest::AccountAssets { account },
        }
    }

    pub fn sign(self, public_key: impl Into<String>) -> Result<SignedQuery> {
        let bytes = serde_json::to_vec(&self).context("failed to serialize query payload")?;
        Ok(SignedQuery {
            payload: self,
            signature: Signature {
                public_key: public_key.into(),
                payload: hex::encode(Sha256::digest(&bytes)),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedQuery {
    pub payload: QueryPayload,
    pub signature: Signature,
}

/// One `(asset, balance)` pair from an account-assets query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAsset {
    pub asset: AssetId,
    pub balance: String,
}

/// One committed increment of ledger state. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub created_ms: u64,
    pub prev_hash: String,
    pub transactions: Vec<SignedTransaction>,
    pub rejected_hashes: Vec<String>,
    pub hash: String,
}

impl Block {
    /// Assembles a block and derives its content hash from the header fields
    /// and the transaction payload hashes.
    pub fn seal(
        height: u64,
        created_ms: u64,
        prev_hash: impl Into<String>,
        transactions: Vec<SignedTransaction>,
        rejected_hashes: Vec<String>,
    ) -> Result<Self> {
        let prev_hash = prev_hash.into();
        let mut hasher = Sha256::new();
        hasher.update(height.to_be_bytes());
        hasher.update(created_ms.to_be_bytes());
        hasher.update(prev_hash.as_bytes());
        for tx in &transactions {
            hasher.update(tx.hash()?.as_bytes());
        }
        let hash = hex::encode(hasher.finalize());

        Ok(Self {
            height,
            created_ms,
            prev_hash,
            transactions,
            rejected_hashes,
            hash,
        })
    }

    /// Whether the given transaction hash was rejected by stateful validation.
    pub fn is_rejected(&self, tx_hash: &str) -> bool {
        self.rejected_hashes
            .iter()
            .any(|rejected| rejected.eq_ignore_ascii_case(tx_hash))
    }
}
