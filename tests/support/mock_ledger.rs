use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, RwLock},
};

use anyhow::{anyhow, bail, Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use ledgertap::ledger::types::{format_fixed, parse_fixed, GENESIS_PREV_HASH};
use ledgertap::{
    AccountAsset, AccountId, AssetId, Block, GenesisBlock, Instruction, QueryRequest, SignedQuery,
    SignedTransaction, Transaction,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// In-memory ledger: executes genesis and submitted transactions, commits one
/// block per submission, and answers the collector's read queries.
#[derive(Clone)]
pub struct MockLedger {
    inner: Arc<RwLock<LedgerState>>,
}

#[derive(Clone)]
enum TxDisposition {
    Committed,
    Rejected(String),
}

#[derive(Default, Clone)]
struct LedgerState {
    roles: HashMap<String, Vec<String>>,
    domains: HashMap<String, String>,
    accounts: HashMap<AccountId, String>,
    assets: HashMap<AssetId, u32>,
    balances: HashMap<(AccountId, AssetId), u128>,
    blocks: Vec<Block>,
    statuses: HashMap<String, TxDisposition>,
    peers: Vec<String>,
}

impl MockLedger {
    /// Boots a ledger by executing the genesis transactions and sealing them
    /// as block one. Genesis instructions must all succeed.
    pub fn with_genesis(genesis: GenesisBlock) -> Result<Self> {
        let ledger = Self {
            inner: Arc::new(RwLock::new(LedgerState::default())),
        };

        {
            let mut state = ledger.inner.write().expect("mock ledger poisoned");
            let transactions = genesis.into_transactions();
            for tx in &transactions {
                for instruction in &tx.instructions {
                    apply_instruction(&mut state, tx.creator.as_ref(), instruction)
                        .context("genesis instruction failed")?;
                }
            }

            let signed: Vec<SignedTransaction> =
                transactions.into_iter().map(Transaction::unsigned).collect();
            let block = Block::seal(1, 1, GENESIS_PREV_HASH, signed, Vec::new())?;
            for tx in &block.transactions {
                state
                    .statuses
                    .insert(tx.hash()?, TxDisposition::Committed);
            }
            state.blocks.push(block);
        }

        Ok(ledger)
    }

    pub fn latest_height(&self) -> u64 {
        let state = self.inner.read().expect("mock ledger poisoned");
        state.blocks.len() as u64
    }

    pub fn block(&self, height: u64) -> Option<Block> {
        if height == 0 {
            return None;
        }
        let state = self.inner.read().expect("mock ledger poisoned");
        state.blocks.get((height - 1) as usize).cloned()
    }

    /// Applies a submitted transaction and seals it as a new block. A failed
    /// validation still produces a block, with the transaction hash listed as
    /// rejected. Returns the transaction hash.
    pub fn submit(&self, tx: &SignedTransaction) -> Result<String> {
        let hash = tx.hash()?;
        let mut state = self.inner.write().expect("mock ledger poisoned");

        let disposition = match validate_and_apply(&mut state, tx) {
            Ok(()) => TxDisposition::Committed,
            Err(err) => TxDisposition::Rejected(format!("{err:#}")),
        };

        let height = state.blocks.len() as u64 + 1;
        let prev_hash = state
            .blocks
            .last()
            .map(|block| block.hash.clone())
            .unwrap_or_else(|| GENESIS_PREV_HASH.to_owned());
        let rejected = match &disposition {
            TxDisposition::Rejected(_) => vec![hash.clone()],
            TxDisposition::Committed => Vec::new(),
        };
        let block = Block::seal(height, height, prev_hash, vec![tx.clone()], rejected)?;
        state.blocks.push(block);
        state.statuses.insert(hash.clone(), disposition);

        Ok(hash)
    }

    fn status_wire(&self, hash: &str) -> Option<Value> {
        let state = self.inner.read().expect("mock ledger poisoned");
        state.statuses.get(hash).map(|disposition| match disposition {
            TxDisposition::Committed => json!({ "status": "committed" }),
            TxDisposition::Rejected(reason) => {
                json!({ "status": "rejected", "reason": reason })
            }
        })
    }

    pub fn account_assets(&self, query: &SignedQuery) -> Result<Vec<AccountAsset>> {
        let state = self.inner.read().expect("mock ledger poisoned");

        let registered = state
            .accounts
            .get(&query.payload.creator)
            .ok_or_else(|| anyhow!("unknown query creator {}", query.payload.creator))?;
        if *registered != query.signature.public_key {
            bail!("query signature key does not match the creator's registered key");
        }

        let QueryRequest::AccountAssets { account } = &query.payload.request;
        let mut entries: Vec<AccountAsset> = state
            .balances
            .iter()
            .filter(|((owner, _), _)| owner == account)
            .map(|((_, asset), units)| {
                let precision = state.assets.get(asset).copied().unwrap_or(0);
                AccountAsset {
                    asset: asset.clone(),
                    balance: format_fixed(*units, precision),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(entries)
    }
}

fn validate_and_apply(state: &mut LedgerState, tx: &SignedTransaction) -> Result<()> {
    let creator = tx
        .payload
        .creator
        .as_ref()
        .ok_or_else(|| anyhow!("submitted transactions must have a creator"))?;
    let registered = state
        .accounts
        .get(creator)
        .ok_or_else(|| anyhow!("unknown creator account {creator}"))?;
    if !tx
        .signatures
        .iter()
        .any(|signature| signature.public_key == *registered)
    {
        bail!("transaction is not signed with the creator's key");
    }

    // Instructions apply to a scratch copy so a failing one leaves no partial state.
    let mut scratch = state.clone();
    for instruction in &tx.payload.instructions {
        apply_instruction(&mut scratch, Some(creator), instruction)?;
    }
    *state = scratch;
    Ok(())
}

fn apply_instruction(
    state: &mut LedgerState,
    creator: Option<&AccountId>,
    instruction: &Instruction,
) -> Result<()> {
    match instruction {
        Instruction::AddPeer { address, .. } => {
            state.peers.push(address.clone());
        }
        Instruction::CreateRole { name, permissions } => {
            state.roles.insert(name.clone(), permissions.clone());
        }
        Instruction::CreateDomain { name, default_role } => {
            if !state.roles.contains_key(default_role) {
                bail!("default role {default_role} does not exist");
            }
            state.domains.insert(name.clone(), default_role.clone());
        }
        Instruction::CreateAccount {
            name,
            domain,
            public_key,
        } => {
            if !state.domains.contains_key(domain) {
                bail!("domain {domain} does not exist");
            }
            let account = AccountId::new(name.clone(), domain.clone())?;
            if state.accounts.contains_key(&account) {
                bail!("account {account} already exists");
            }
            state.accounts.insert(account, public_key.clone());
        }
        Instruction::CreateAsset {
            name,
            domain,
            precision,
        } => {
            if !state.domains.contains_key(domain) {
                bail!("domain {domain} does not exist");
            }
            let asset = AssetId::new(name.clone(), domain.clone())?;
            if state.assets.contains_key(&asset) {
                bail!("asset {asset} already exists");
            }
            state.assets.insert(asset, *precision);
        }
        Instruction::AddAssetQuantity { asset, amount } => {
            let creator =
                creator.ok_or_else(|| anyhow!("add_asset_quantity requires a creator"))?;
            let precision = *state
                .assets
                .get(asset)
                .ok_or_else(|| anyhow!("asset {asset} does not exist"))?;
            let units = parse_fixed(amount, precision)?;
            let balance = state
                .balances
                .entry((creator.clone(), asset.clone()))
                .or_insert(0);
            *balance = balance
                .checked_add(units)
                .ok_or_else(|| anyhow!("balance overflow for {asset}"))?;
        }
        Instruction::TransferAsset {
            source,
            destination,
            asset,
            amount,
            ..
        } => {
            let precision = *state
                .assets
                .get(asset)
                .ok_or_else(|| anyhow!("asset {asset} does not exist"))?;
            let units = parse_fixed(amount, precision)?;
            if !state.accounts.contains_key(destination) {
                bail!("destination account {destination} does not exist");
            }
            let from = state
                .balances
                .get_mut(&(source.clone(), asset.clone()))
                .filter(|balance| **balance >= units)
                .ok_or_else(|| anyhow!("insufficient balance of {asset} on {source}"))?;
            *from -= units;
            *state
                .balances
                .entry((destination.clone(), asset.clone()))
                .or_insert(0) += units;
        }
    }
    Ok(())
}

/// HTTP JSON-RPC front for [`MockLedger`], compatible with `AsyncLedgerClient`.
pub struct MockLedgerServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockLedgerServer {
    pub async fn start(ledger: MockLedger) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock ledger listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let ledger = ledger.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(ledger.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock ledger server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(
    ledger: MockLedger,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("invalid JSON payload: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let response_value = if payload.is_array() {
        Value::Array(
            payload
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|call| handle_call(&ledger, call))
                .collect(),
        )
    } else {
        handle_call(&ledger, payload)
    };

    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn handle_call(ledger: &MockLedger, call: Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = call
        .get("params")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));

    match method.as_str() {
        "latest_height" => success(id, json!(ledger.latest_height())),
        "get_block" => {
            let height = params
                .as_array()
                .and_then(|arr| arr.first())
                .and_then(Value::as_u64);
            match height.and_then(|h| ledger.block(h)) {
                Some(block) => match serde_json::to_value(&block) {
                    Ok(value) => success(id, value),
                    Err(err) => error(id, -32603, format!("failed to encode block: {err}")),
                },
                None => error(id, -8, "Block height out of range"),
            }
        }
        "submit_transaction" => match first_param::<SignedTransaction>(&params) {
            Ok(tx) => match ledger.submit(&tx) {
                Ok(hash) => success(id, Value::String(hash)),
                Err(err) => error(id, -32603, format!("submission failed: {err:#}")),
            },
            Err(message) => error(id, -32602, message),
        },
        "transaction_status" => {
            let hash = params
                .as_array()
                .and_then(|arr| arr.first())
                .and_then(Value::as_str)
                .map(str::to_owned);
            match hash.and_then(|h| ledger.status_wire(&h)) {
                Some(value) => success(id, value),
                None => error(id, -7, "unknown transaction"),
            }
        }
        "account_assets" => match first_param::<SignedQuery>(&params) {
            Ok(query) => match ledger.account_assets(&query) {
                Ok(assets) => match serde_json::to_value(&assets) {
                    Ok(value) => success(id, value),
                    Err(err) => error(id, -32603, format!("failed to encode assets: {err}")),
                },
                Err(err) => error(id, -3, format!("query failed: {err:#}")),
            },
            Err(message) => error(id, -32602, message),
        },
        _ => error(id, -32601, format!("unknown method {method}")),
    }
}

fn first_param<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T, String> {
    params
        .as_array()
        .and_then(|arr| arr.first())
        .cloned()
        .ok_or_else(|| "missing parameter".to_owned())
        .and_then(|value| {
            serde_json::from_value(value).map_err(|err| format!("invalid parameter: {err}"))
        })
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
