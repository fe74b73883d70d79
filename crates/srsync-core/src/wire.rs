//! Payloads exchanged across the sync boundary.
//!
//! Incoming save records are loosely typed JSON; they are validated one by
//! one into [`SaveRecord`] so a malformed entry is skipped without failing
//! the rest of the batch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecordError;
use crate::model::{CardId, DeckId, Progress, ReviewEvent, Scope, UserId, MAX_STEP};

/// `deckId -> cardId -> progress`, as returned by `fetch`.
pub type ProgressMap = BTreeMap<DeckId, BTreeMap<CardId, Progress>>;

/// Count the records in a progress map.
pub fn progress_count(map: &ProgressMap) -> usize {
    map.values().map(BTreeMap::len).sum()
}

/// Body of a `save` request. Records stay untyped until validated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveRequest {
    pub records: Vec<Value>,
    /// Ratings made since the last push, oldest first. Statistics only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ReviewEvent>,
}

impl SaveRequest {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a SaveRecord>) -> Self {
        Self {
            records: records.into_iter().map(SaveRecord::to_wire).collect(),
            events: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: Vec<ReviewEvent>) -> Self {
        self.events = events;
        self
    }

    /// Validate every record, keeping submission order.
    pub fn parse(&self) -> Vec<Result<SaveRecord, RecordError>> {
        self.records.iter().map(SaveRecord::from_wire).collect()
    }
}

/// A validated progress snapshot submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRecord {
    pub deck_id: DeckId,
    pub card_id: CardId,
    #[serde(flatten)]
    pub progress: Progress,
}

impl SaveRecord {
    pub fn new(deck_id: DeckId, card_id: impl Into<CardId>, progress: Progress) -> Self {
        Self {
            deck_id,
            card_id: card_id.into(),
            progress,
        }
    }

    /// Validate one raw record.
    ///
    /// Missing numeric fields default to 0 and `hidden` to false; `deckId` and
    /// `cardId` are required. Numbers may arrive as JSON numbers or numeric
    /// strings.
    pub fn from_wire(value: &Value) -> Result<Self, RecordError> {
        let obj = value.as_object().ok_or(RecordError::NotAnObject)?;

        let deck_id = match obj.get("deckId") {
            None | Some(Value::Null) => return Err(RecordError::MissingDeckId),
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err(RecordError::MissingDeckId)
            }
            Some(v) => int_field(v, "deckId")?,
        };

        let card_id = match obj.get("cardId") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            None | Some(Value::Null) => String::new(),
            Some(other) => {
                return Err(RecordError::Malformed {
                    field: "cardId",
                    reason: format!("expected string, got {other}"),
                })
            }
        };
        if card_id.is_empty() {
            return Err(RecordError::MissingCardId);
        }

        let step = optional_int(obj.get("step"), "step")?;
        if !(0..=i64::from(MAX_STEP)).contains(&step) {
            return Err(RecordError::StepOutOfRange(step));
        }

        let due = timestamp(obj.get("due"), "due")?;
        let added_at = timestamp(obj.get("addedAt"), "addedAt")?;
        let last_at = timestamp(obj.get("lastAt"), "lastAt")?;
        let hidden = flag(obj.get("hidden"));

        Ok(Self {
            deck_id,
            card_id,
            progress: Progress {
                step: step as u8,
                due,
                added_at,
                last_at,
                hidden,
            },
        })
    }

    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "deckId": self.deck_id,
            "cardId": self.card_id,
            "step": self.progress.step,
            "due": self.progress.due,
            "addedAt": self.progress.added_at,
            "lastAt": self.progress.last_at,
            "hidden": u8::from(self.progress.hidden),
        })
    }
}

fn int_field(value: &Value, field: &'static str) -> Result<i64, RecordError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| RecordError::Malformed {
                field,
                reason: format!("not an integer: {n}"),
            }),
        Value::String(s) => s.trim().parse::<i64>().map_err(|e| RecordError::Malformed {
            field,
            reason: e.to_string(),
        }),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(RecordError::Malformed {
            field,
            reason: format!("expected integer, got {other}"),
        }),
    }
}

fn optional_int(value: Option<&Value>, field: &'static str) -> Result<i64, RecordError> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(v) => int_field(v, field),
    }
}

fn timestamp(value: Option<&Value>, field: &'static str) -> Result<i64, RecordError> {
    let ts = optional_int(value, field)?;
    if ts < 0 {
        return Err(RecordError::NegativeTimestamp(field));
    }
    Ok(ts)
}

fn flag(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !matches!(s.trim(), "" | "0" | "false"),
        Some(_) => true,
    }
}

/// Result of applying a `save` batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub inserted: usize,
    pub replaced: usize,
    pub kept: usize,
    pub skipped: usize,
    /// Review events counted in statistics.
    #[serde(default)]
    pub reviews: usize,
}

impl SaveReport {
    pub fn applied(&self) -> usize {
        self.inserted + self.replaced + self.kept
    }
}

/// A due card as returned by `get_due_cards`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueCard {
    pub deck_id: DeckId,
    pub card_id: CardId,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub owner_id: Option<UserId>,
    #[serde(default)]
    pub payload: Value,
    pub progress: Progress,
    /// Server-side insertion order of the card.
    #[serde(default)]
    pub seq: u64,
}

/// Query of `delete_card`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(rename = "deckid")]
    pub deck_id: DeckId,
    #[serde(rename = "cardid")]
    pub card_id: CardId,
}

/// What `delete_card` did for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The caller owned the card; it and every user's progress are gone.
    Deleted {
        #[serde(rename = "progressRemoved")]
        progress_removed: usize,
    },
    /// The card is not the caller's; it is now hidden for the caller only.
    Hidden,
}

/// Body of `upsert_card`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertRequest {
    #[serde(default)]
    pub deck_id: Option<DeckId>,
    #[serde(default)]
    pub card_id: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub payload: Value,
}

/// Identity the server assigned to an upserted card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertResponse {
    pub deck_id: DeckId,
    pub card_id: CardId,
    pub created: bool,
    /// Owner recorded for the card; `None` for shared cards.
    #[serde(default)]
    pub owner_id: Option<UserId>,
}

/// JSON envelope wrapping every server response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
