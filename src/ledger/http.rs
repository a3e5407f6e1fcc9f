//! JSON-RPC endpoint over HTTP
//!
//! Request/response calls go through JSON-RPC 2.0 `POST`s; account activity
//! streams are read as server-sent events from the same host.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client as HttpClient, StatusCode};
use serde_json::{json, Value};

use super::rpc::*;
use crate::events::TransactionMeta;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One ledger RPC endpoint reached over HTTP
pub struct JsonRpcClient {
    url: String,
    http: HttpClient,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RpcError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_http_client(url, http))
    }

    pub fn with_http_client(url: impl Into<String>, http: HttpClient) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            http,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RpcError::Unavailable {
                status: status.as_u16(),
                message,
            });
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(format!("{} returned invalid JSON: {}", method, e)))?;

        parse_envelope(status, value)
    }
}

/// Unwrap a JSON-RPC response envelope into its `result`
fn parse_envelope(status: StatusCode, mut value: Value) -> Result<Value, RpcError> {
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();

        // Malformed request or parameters: the payload itself is at fault
        return Err(if (-32602..=-32600).contains(&code) {
            RpcError::Rejected {
                code: code.to_string(),
                detail: message,
            }
        } else {
            RpcError::Unavailable {
                status: status.as_u16(),
                message: format!("{} ({})", message, code),
            }
        });
    }

    match value.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(RpcError::InvalidResponse("missing result".to_string())),
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> RpcError {
    if err.is_timeout() {
        RpcError::Timeout
    } else {
        RpcError::Network(err.to_string())
    }
}

fn number(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

fn parse_account(account_id: &str, result: &Value) -> Result<AccountInfo, RpcError> {
    let sequence = number(result.get("sequence").or_else(|| result.get("seqNum")))
        .ok_or_else(|| RpcError::InvalidResponse("account without sequence".to_string()))?;

    Ok(AccountInfo {
        account_id: text(result.get("id")).unwrap_or_else(|| account_id.to_string()),
        sequence: sequence as i64,
    })
}

fn parse_fee_stats(result: &Value) -> Result<FeeStats, RpcError> {
    let inclusion = result.get("inclusionFee");
    let last_base_fee = number(inclusion.and_then(|f| f.get("min")))
        .or_else(|| number(result.get("last_ledger_base_fee")));
    let p99 = number(inclusion.and_then(|f| f.get("p99")))
        .or_else(|| number(result.get("fee_charged").and_then(|f| f.get("p99"))));

    match (last_base_fee, p99) {
        (Some(last_base_fee), Some(p99_charged_fee)) => Ok(FeeStats {
            last_base_fee,
            p99_charged_fee,
            latest_ledger: number(result.get("latestLedger")).unwrap_or_default() as u32,
        }),
        _ => Err(RpcError::InvalidResponse("incomplete fee statistics".to_string())),
    }
}

fn parse_send(endpoint: &str, result: &Value) -> Result<SubmitResponse, RpcError> {
    let hash = text(result.get("hash")).unwrap_or_default();
    let latest_ledger = number(result.get("latestLedger")).unwrap_or_default() as u32;
    let status = match result.get("status").and_then(Value::as_str) {
        Some("PENDING") => SubmitStatus::Pending,
        Some("DUPLICATE") => SubmitStatus::Duplicate,
        Some("TRY_AGAIN_LATER") => return Err(RpcError::TryAgainLater(hash)),
        Some("ERROR") => {
            let detail = text(result.get("errorResultXdr"))
                .or_else(|| result.get("errorResultJson").map(Value::to_string))
                .unwrap_or_default();
            return Err(RpcError::Rejected {
                code: "tx_error".to_string(),
                detail,
            });
        }
        other => {
            return Err(RpcError::InvalidResponse(format!(
                "unknown submission status {:?}",
                other
            )))
        }
    };

    Ok(SubmitResponse {
        hash,
        status,
        latest_ledger,
        endpoint: endpoint.to_string(),
    })
}

fn parse_simulation(result: &Value) -> SimulationResponse {
    let cost = result.get("cost");
    let first = result
        .get("results")
        .and_then(Value::as_array)
        .and_then(|r| r.first());

    SimulationResponse {
        cost: ResourceCost {
            cpu_instructions: number(cost.and_then(|c| c.get("cpuInsns"))).unwrap_or_default(),
            memory_bytes: number(cost.and_then(|c| c.get("memBytes"))).unwrap_or_default(),
        },
        min_resource_fee: number(result.get("minResourceFee")).unwrap_or_default(),
        transaction_data: text(result.get("transactionData")),
        auth: first
            .and_then(|r| r.get("auth"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        return_value: first
            .and_then(|r| r.get("returnValueJson").or_else(|| r.get("retval")))
            .cloned(),
        error: text(result.get("error")),
        latest_ledger: number(result.get("latestLedger")).unwrap_or_default() as u32,
    }
}

fn parse_transaction(hash: &str, result: &Value) -> Result<TransactionStatus, RpcError> {
    match result.get("status").and_then(Value::as_str) {
        Some("NOT_FOUND") | Some("PENDING") => Ok(TransactionStatus::NotFound),
        Some("FAILED") => Ok(TransactionStatus::Failed {
            result: text(result.get("resultXdr"))
                .or_else(|| result.get("resultJson").map(Value::to_string)),
        }),
        Some("SUCCESS") => Ok(TransactionStatus::Success(TransactionMeta {
            transaction_hash: text(result.get("txHash")).unwrap_or_else(|| hash.to_string()),
            ledger_sequence: number(result.get("ledger")).unwrap_or_default() as u32,
            closed_at: number(result.get("createdAt")).unwrap_or_default() as i64,
            result_meta: result.get("resultMetaJson").cloned().unwrap_or(Value::Null),
            return_value: result.get("returnValueJson").cloned(),
        })),
        other => Err(RpcError::InvalidResponse(format!(
            "unknown transaction status {:?}",
            other
        ))),
    }
}

/// Parse one SSE `data:` line. Keep-alive and non-JSON lines yield `None`.
/// Longest event-stream line accepted before the stream is dropped
const MAX_LINE_BYTES: usize = 1 << 20;

/// Splits a byte stream into lines. Bytes are kept raw until a full line is
/// in, so a character split across network chunks decodes intact.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) -> Result<(), RpcError> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() > MAX_LINE_BYTES && !self.pending.contains(&b'\n') {
            self.pending.clear();
            return Err(RpcError::InvalidResponse(format!(
                "event stream line exceeds {} bytes",
                MAX_LINE_BYTES
            )));
        }
        Ok(())
    }

    /// Next complete line. `Some(None)` is a line that was not valid UTF-8.
    fn next_line(&mut self) -> Option<Option<String>> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=pos).collect();
        match String::from_utf8(line) {
            Ok(line) => Some(Some(line)),
            Err(e) => {
                tracing::warn!("Skipping event stream line that is not UTF-8: {}", e);
                Some(None)
            }
        }
    }
}

fn parse_sse_line(line: &str) -> Option<Result<AccountActivity, RpcError>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "\"hello\"" || data == "\"byebye\"" {
        return None;
    }

    let value: Value = serde_json::from_str(data).ok()?;
    let id = text(value.get("id"))?;
    Some(Ok(AccountActivity {
        paging_token: text(value.get("paging_token")).unwrap_or_else(|| id.clone()),
        transaction_hash: text(value.get("hash")).or_else(|| text(value.get("transaction_hash"))),
        created_at: text(value.get("created_at")),
        id,
        payload: value,
    }))
}

#[async_trait]
impl LedgerRpc for JsonRpcClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn get_account(&self, account_id: &str) -> Result<AccountInfo, RpcError> {
        let result = self.call("getAccount", json!({ "address": account_id })).await?;
        if result.is_null() {
            return Err(RpcError::NotFound(account_id.to_string()));
        }
        parse_account(account_id, &result)
    }

    async fn fee_stats(&self) -> Result<FeeStats, RpcError> {
        let result = self.call("getFeeStats", json!({})).await?;
        parse_fee_stats(&result)
    }

    async fn send_transaction(&self, signed_envelope: &str) -> Result<SubmitResponse, RpcError> {
        let result = self
            .call("sendTransaction", json!({ "transaction": signed_envelope }))
            .await?;
        parse_send(&self.url, &result)
    }

    async fn simulate_transaction(&self, envelope: &str) -> Result<SimulationResponse, RpcError> {
        let result = self
            .call("simulateTransaction", json!({ "transaction": envelope }))
            .await?;
        Ok(parse_simulation(&result))
    }

    async fn get_transaction(&self, hash: &str) -> Result<TransactionStatus, RpcError> {
        let result = self.call("getTransaction", json!({ "hash": hash })).await?;
        parse_transaction(hash, &result)
    }

    async fn subscribe_account(
        &self,
        account_id: &str,
        cursor: &str,
    ) -> Result<ActivityStream, RpcError> {
        let url = format!("{}/accounts/{}/transactions", self.url, account_id);
        let resp = self
            .http
            .get(&url)
            .query(&[("cursor", cursor)])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            // Streams are long-lived; only the connect timeout applies
            .timeout(Duration::from_secs(u32::MAX as u64))
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RpcError::Unavailable {
                status: status.as_u16(),
                message: format!("stream request to {} refused", url),
            });
        }

        let bytes = resp.bytes_stream().boxed();
        let lines = stream::unfold(
            (bytes, LineBuffer::default(), false),
            |(mut bytes, mut buffer, done)| async move {
                if done {
                    return None;
                }
                loop {
                    if let Some(line) = buffer.next_line() {
                        return Some((Ok(line), (bytes, buffer, false)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            if let Err(e) = buffer.extend(&chunk) {
                                return Some((Err(e), (bytes, buffer, true)));
                            }
                        }
                        Some(Err(e)) => {
                            return Some((Err(classify_reqwest_error(&e)), (bytes, buffer, true)))
                        }
                        None => return None,
                    }
                }
            },
        );

        let activities = lines.filter_map(|line| async move {
            match line {
                Ok(Some(line)) => parse_sse_line(line.trim_end()),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            }
        });

        Ok(activities.boxed())
    }
}
