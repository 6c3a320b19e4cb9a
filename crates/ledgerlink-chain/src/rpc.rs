//! HTTP gateway clients.
//!
//! Each chain is reached through a JSON gateway that hides node selection
//! and the chain's own RPC dialect. Amounts travel as decimal strings of base
//! units so they survive JSON number precision.

use async_trait::async_trait;
use ledgerlink_core::{Amount, ChainId, ChatMessage, MessageKind, StoredRecord, Timestamp, TransactionUpdate, TxStatus};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::ports::{
    ChainRpc, KeyValueStore, MessageTransport, PageRequest, Receipt, SentMessage, SignedPayload, SortOrder,
};

#[derive(Debug, Deserialize)]
struct BalanceDto {
    balance: String,
}

#[derive(Debug, Default, Deserialize)]
struct TransactionDto {
    id: String,
    #[serde(default)]
    sender_id: Option<String>,
    #[serde(default)]
    recipient_id: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    fee: Option<String>,
    #[serde(default)]
    timestamp: Option<Timestamp>,
    #[serde(default)]
    height: Option<u64>,
    #[serde(default)]
    confirmations: Option<u64>,
    #[serde(default)]
    status: Option<TxStatus>,
    #[serde(default)]
    instant_send: Option<bool>,
    #[serde(default)]
    gas_price: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

fn base_units(field: &str, value: Option<String>) -> Result<Option<Amount>, SyncError> {
    value
        .map(|v| {
            v.trim()
                .parse::<Amount>()
                .map_err(|e| SyncError::InvalidData(format!("{} '{}': {}", field, v, e)))
        })
        .transpose()
}

impl TryFrom<TransactionDto> for TransactionUpdate {
    type Error = SyncError;

    fn try_from(dto: TransactionDto) -> Result<Self, Self::Error> {
        Ok(TransactionUpdate {
            amount: base_units("amount", dto.amount)?,
            fee: base_units("fee", dto.fee)?,
            gas_price: base_units("gas_price", dto.gas_price)?,
            id: dto.id,
            sender_id: dto.sender_id,
            recipient_id: dto.recipient_id,
            timestamp: dto.timestamp,
            height: dto.height,
            confirmations: dto.confirmations,
            status: dto.status,
            instant_send: dto.instant_send,
            data: dto.data,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ReceiptDto {
    success: bool,
    #[serde(default)]
    block_number: Option<u64>,
    #[serde(default)]
    gas_used: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockDto {
    #[serde(default)]
    timestamp: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
struct BroadcastDto<'a> {
    id: &'a str,
    raw: String,
}

#[derive(Debug, Deserialize)]
struct BroadcastReplyDto {
    id: String,
}

fn order_param(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Asc => "asc",
        SortOrder::Desc => "desc",
    }
}

/// Shared request plumbing.
#[derive(Debug, Clone)]
struct Gateway {
    client: reqwest::Client,
    base_url: String,
}

impl Gateway {
    fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET a JSON document; `Ok(None)` on 404.
    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, SyncError> {
        let url = self.url(path);
        tracing::trace!("GET {}", url);
        let response = self.client.get(&url).query(query).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SyncError::Network(format!("{}: HTTP {}", url, response.status())));
        }
        Ok(Some(response.json::<T>().await?))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, SyncError> {
        self.get_optional(path, query)
            .await?
            .ok_or_else(|| SyncError::NotFound(self.url(path)))
    }
}

/// [`ChainRpc`] over one chain's gateway.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    chain: ChainId,
    gateway: Gateway,
}

impl HttpGateway {
    pub fn new(chain: ChainId, base_url: &str) -> Self {
        Self {
            chain,
            gateway: Gateway::new(base_url),
        }
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    pub fn base_url(&self) -> &str {
        &self.gateway.base_url
    }
}

#[async_trait]
impl ChainRpc for HttpGateway {
    async fn get_balance(&self, address: &str) -> Result<Amount, SyncError> {
        let dto: Option<BalanceDto> = self.gateway.get_optional(&format!("balance/{}", address), &[]).await?;
        let dto = dto.ok_or_else(|| SyncError::AccountNotFound(address.to_string()))?;
        base_units("balance", Some(dto.balance))?.ok_or_else(|| SyncError::InvalidData("balance".to_string()))
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<TransactionUpdate>, SyncError> {
        let dto: Option<TransactionDto> = self.gateway.get_optional(&format!("tx/{}", id), &[]).await?;
        dto.map(TransactionUpdate::try_from).transpose()
    }

    async fn get_transactions_page(&self, request: &PageRequest) -> Result<Vec<TransactionUpdate>, SyncError> {
        let mut query = vec![
            ("order", order_param(request.order).to_string()),
            ("limit", request.limit.to_string()),
        ];
        if let Some(after) = request.after {
            query.push(("after", after.to_string()));
        }
        if let Some(before) = request.before {
            query.push(("before", before.to_string()));
        }
        let page: Vec<TransactionDto> = self
            .gateway
            .get(&format!("address/{}/txs", request.address), &query)
            .await?;
        tracing::debug!("{} page of {} transactions", self.chain, page.len());
        page.into_iter().map(TransactionUpdate::try_from).collect()
    }

    async fn send_transaction(&self, payload: &SignedPayload) -> Result<String, SyncError> {
        let url = self.gateway.url("tx");
        let body = BroadcastDto {
            id: &payload.id,
            raw: hex::encode(&payload.raw),
        };
        let response = self.gateway.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(SyncError::Network(format!("{}: HTTP {}", url, response.status())));
        }
        let reply: BroadcastReplyDto = response.json().await?;
        Ok(reply.id)
    }

    async fn get_receipt(&self, id: &str) -> Result<Option<Receipt>, SyncError> {
        let dto: Option<ReceiptDto> = self.gateway.get_optional(&format!("tx/{}/receipt", id), &[]).await?;
        dto.map(|r| {
            Ok(Receipt {
                success: r.success,
                block_number: r.block_number,
                gas_used: base_units("gas_used", r.gas_used)?,
            })
        })
        .transpose()
    }

    async fn get_block_time(&self, height: u64) -> Result<Option<Timestamp>, SyncError> {
        let dto: Option<BlockDto> = self.gateway.get_optional(&format!("block/{}", height), &[]).await?;
        Ok(dto.and_then(|b| b.timestamp))
    }
}

/// Read-only home-chain gateway: stored values and chat history.
/// Writing needs a signing transport, which a watch-only client lacks.
#[derive(Debug, Clone)]
pub struct HomeGateway {
    gateway: Gateway,
}

impl HomeGateway {
    pub fn new(base_url: &str) -> Self {
        Self {
            gateway: Gateway::new(base_url),
        }
    }
}

#[async_trait]
impl KeyValueStore for HomeGateway {
    async fn get_stored(&self, key: &str, owner: &str, max_records: u32) -> Result<Vec<StoredRecord>, SyncError> {
        let query = [
            ("key", key.to_string()),
            ("owner", owner.to_string()),
            ("limit", max_records.to_string()),
        ];
        Ok(self.gateway.get_optional("states", &query).await?.unwrap_or_default())
    }

    async fn store_value(&self, key: &str, _value: &str) -> Result<bool, SyncError> {
        Err(SyncError::Signing(format!("read-only gateway cannot store '{}'", key)))
    }
}

#[async_trait]
impl MessageTransport for HomeGateway {
    async fn send_message(&self, recipient: &str, _kind: &MessageKind) -> Result<SentMessage, SyncError> {
        Err(SyncError::Signing(format!("read-only gateway cannot message {}", recipient)))
    }

    async fn get_messages(&self, user_id: &str, after_height: u64) -> Result<Vec<ChatMessage>, SyncError> {
        let query = [("after_height", after_height.to_string())];
        Ok(self
            .gateway
            .get_optional(&format!("chats/{}/messages", user_id), &query)
            .await?
            .unwrap_or_default())
    }
}
