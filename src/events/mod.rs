//! Contract event extraction
//!
//! Turns the post-execution metadata of a successful transaction into typed
//! [`ContractEvent`]s. Parsing is a pure function of its input: the same
//! metadata always yields the same events, ids included.

pub mod scval;
pub mod store;

pub use store::{EventStore, StoreError};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use scval::{as_i128, as_text, field, to_plain};

/// Post-execution metadata of one transaction, as returned by the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMeta {
    pub transaction_hash: String,
    pub ledger_sequence: u32,
    /// Ledger close time, unix seconds
    pub closed_at: i64,
    /// Opaque result metadata (JSON form)
    pub result_meta: Value,
    #[serde(default)]
    pub return_value: Option<Value>,
}

/// Stage of a campaign lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStage {
    Created,
    Updated,
    Funded,
    Ended,
    Other(String),
}

/// Typed event classification, derived from the leading topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Reward {
        recipient: Option<String>,
        amount: Option<i128>,
    },
    Campaign {
        stage: CampaignStage,
        campaign_id: Option<String>,
    },
    Milestone {
        campaign_id: Option<String>,
        milestone: Option<String>,
    },
    Referral {
        referrer: Option<String>,
        referee: Option<String>,
    },
    Engagement {
        actor: Option<String>,
        action: String,
    },
    /// Leading topic matched no known keyword; kept verbatim
    Unrecognized { topic: String },
}

impl EventKind {
    /// Index key used by the event store
    pub fn type_key(&self) -> &str {
        match self {
            EventKind::Reward { .. } => "reward",
            EventKind::Campaign { .. } => "campaign",
            EventKind::Milestone { .. } => "milestone",
            EventKind::Referral { .. } => "referral",
            EventKind::Engagement { .. } => "engagement",
            EventKind::Unrecognized { topic } => topic,
        }
    }
}

/// Structured on-chain event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractEvent {
    /// `<transaction hash>-<event index>`
    pub id: String,
    pub contract_id: String,
    pub kind: EventKind,
    /// Decoded topics
    pub topics: Vec<Value>,
    /// Decoded payload
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub transaction_hash: String,
    pub ledger_sequence: u32,
}

impl ContractEvent {
    pub fn type_key(&self) -> &str {
        self.kind.type_key()
    }
}

const ENGAGEMENT_KEYWORDS: &[&str] = &["engage", "like", "share", "follow", "comment", "view", "vote"];

/// Parse every contract event out of `meta`.
///
/// `contract_id` is used for events that do not name their emitting contract.
/// System and diagnostic events are skipped.
pub fn extract_events(meta: &TransactionMeta, contract_id: &str) -> Vec<ContractEvent> {
    let timestamp = Utc
        .timestamp_opt(meta.closed_at, 0)
        .single()
        .unwrap_or_default();

    locate_events(&meta.result_meta)
        .iter()
        .enumerate()
        .filter(|(_, raw)| is_contract_event(raw))
        .map(|(index, raw)| {
            let body = event_body(raw);
            let topics: Vec<Value> = body
                .and_then(|b| b.get("topics"))
                .and_then(Value::as_array)
                .map(|t| t.iter().map(to_plain).collect())
                .unwrap_or_default();
            let data = body
                .and_then(|b| b.get("data"))
                .map(to_plain)
                .unwrap_or(Value::Null);
            let emitter = raw
                .get("contract_id")
                .or_else(|| raw.get("contractId"))
                .and_then(as_text)
                .unwrap_or_else(|| contract_id.to_string());

            ContractEvent {
                id: format!("{}-{:04}", meta.transaction_hash, index),
                contract_id: emitter,
                kind: classify(&topics, &data),
                topics,
                data,
                timestamp,
                transaction_hash: meta.transaction_hash.clone(),
                ledger_sequence: meta.ledger_sequence,
            }
        })
        .collect()
}

/// Find the event list inside the metadata, whichever version it is
fn locate_events(result_meta: &Value) -> &[Value] {
    const PATHS: &[&[&str]] = &[
        &["v4", "events"],
        &["v3", "soroban_meta", "events"],
        &["soroban_meta", "events"],
        &["events"],
    ];

    for path in PATHS {
        let found = path.iter().try_fold(result_meta, |node, key| node.get(*key));
        if let Some(Value::Array(events)) = found {
            return events;
        }
    }
    &[]
}

fn is_contract_event(raw: &Value) -> bool {
    match raw.get("type_").or_else(|| raw.get("type")).and_then(Value::as_str) {
        Some(kind) => kind == "contract",
        None => true,
    }
}

fn event_body(raw: &Value) -> Option<&Value> {
    let body = raw.get("body")?;
    Some(body.get("v0").unwrap_or(body))
}

/// Classify an event by its leading topic.
fn classify(topics: &[Value], data: &Value) -> EventKind {
    let topic = topics.first().and_then(as_text).unwrap_or_default();
    let lower = topic.to_ascii_lowercase();
    let topic_at = |i: usize| topics.get(i).and_then(as_text);
    let data_text = |keys: &[&str]| field(data, keys).and_then(as_text);

    if lower.contains("reward") {
        let recipient = data_text(&["recipient", "to", "user"])
            .or_else(|| data.get(0).and_then(as_text))
            .or_else(|| topic_at(1));
        let amount = field(data, &["amount", "value"])
            .and_then(as_i128)
            .or_else(|| data.get(1).and_then(as_i128))
            .or_else(|| as_i128(data));
        EventKind::Reward { recipient, amount }
    } else if lower.contains("campaign") {
        EventKind::Campaign {
            stage: campaign_stage(&lower),
            campaign_id: topic_at(1).or_else(|| data_text(&["campaign_id", "id"])),
        }
    } else if lower.contains("milestone") {
        EventKind::Milestone {
            campaign_id: topic_at(1).or_else(|| data_text(&["campaign_id"])),
            milestone: data_text(&["milestone", "name", "index"]).or_else(|| as_text(data)),
        }
    } else if lower.contains("refer") {
        EventKind::Referral {
            referrer: data_text(&["referrer"]).or_else(|| topic_at(1)),
            referee: data_text(&["referee", "referred"]).or_else(|| topic_at(2)),
        }
    } else if ENGAGEMENT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        EventKind::Engagement {
            actor: topic_at(1).or_else(|| data_text(&["user", "actor", "account"])),
            action: topic,
        }
    } else {
        EventKind::Unrecognized { topic }
    }
}

fn campaign_stage(topic: &str) -> CampaignStage {
    if topic.contains("creat") || topic.contains("launch") {
        CampaignStage::Created
    } else if topic.contains("updat") {
        CampaignStage::Updated
    } else if topic.contains("fund") || topic.contains("deposit") {
        CampaignStage::Funded
    } else if topic.contains("end") || topic.contains("clos") || topic.contains("complet") {
        CampaignStage::Ended
    } else {
        CampaignStage::Other(topic.to_string())
    }
}
