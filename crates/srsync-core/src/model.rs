//! Core data model types for srsync.
//!
//! Timestamps are whole seconds since the Unix epoch. A `last_at` of 0 means
//! the card has never been rated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Seconds since the Unix epoch.
pub type Timestamp = i64;
/// Identifier of a learner.
pub type UserId = i64;
/// Identifier of a deck.
pub type DeckId = i64;
/// Identifier of a card. Progress is keyed on it regardless of deck.
pub type CardId = String;

/// Highest stage a card can reach. Reviews at this stage keep it mastered.
pub const MAX_STEP: u8 = 11;
/// Last stage whose interval still depends on the stage number.
pub const LAST_ACTIVE_STEP: u8 = 10;

/// The learner's answer to a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Hard,
    Normal,
    Easy,
}

impl Rating {
    pub const ALL: [Rating; 3] = [Rating::Hard, Rating::Normal, Rating::Easy];

    /// Numeric code used on the wire: 1 = hard, 2 = normal, 3 = easy.
    pub fn code(self) -> u8 {
        match self {
            Rating::Hard => 1,
            Rating::Normal => 2,
            Rating::Easy => 3,
        }
    }

    /// Decode a wire rating. Codes at or below 1 are hard, 3 and above easy.
    pub fn from_code(code: i64) -> Self {
        match code {
            i64::MIN..=1 => Rating::Hard,
            2 => Rating::Normal,
            _ => Rating::Easy,
        }
    }

    /// Whether this rating moves the card to the next stage.
    pub fn advances(self) -> bool {
        !matches!(self, Rating::Hard)
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rating::Hard => write!(f, "hard"),
            Rating::Normal => write!(f, "normal"),
            Rating::Easy => write!(f, "easy"),
        }
    }
}

impl FromStr for Rating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hard" | "1" => Ok(Rating::Hard),
            "normal" | "good" | "2" => Ok(Rating::Normal),
            "easy" | "3" => Ok(Rating::Easy),
            other => Err(format!("unknown rating: {other}")),
        }
    }
}

/// Per-user review progress of one card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Stage in `0..=MAX_STEP`.
    pub step: u8,
    /// The card is eligible for review once `due <= now`.
    pub due: Timestamp,
    /// Creation time, never changed after the record exists.
    pub added_at: Timestamp,
    /// Time of the most recent rating, 0 if never rated.
    #[serde(default)]
    pub last_at: Timestamp,
    /// The user opted out of seeing this card.
    #[serde(default, with = "int_flag")]
    pub hidden: bool,
}

impl Progress {
    /// Initial state of a freshly added card: due immediately, never rated.
    pub fn new(now: Timestamp) -> Self {
        Self {
            step: 0,
            due: now,
            added_at: now,
            last_at: 0,
            hidden: false,
        }
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.due <= now
    }

    pub fn is_mastered(&self) -> bool {
        self.step >= MAX_STEP
    }

    pub fn never_rated(&self) -> bool {
        self.last_at == 0
    }
}

/// Visibility of a deck or card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Owned by a single user, or the installation-wide canonical deck.
    Private,
    /// Visible to every eligible user.
    Shared,
}

impl Default for Scope {
    fn default() -> Self {
        Self::Private
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Private => write!(f, "private"),
            Scope::Shared => write!(f, "shared"),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "private" => Ok(Scope::Private),
            "shared" => Ok(Scope::Shared),
            other => Err(format!("unknown scope: {other}")),
        }
    }
}

/// A named bucket of cards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub id: DeckId,
    pub title: String,
    pub scope: Scope,
    /// `None` for shared decks and for the canonical private deck.
    #[serde(default)]
    pub owner_id: Option<UserId>,
    pub created_by: UserId,
    pub created_at: Timestamp,
}

impl Deck {
    pub fn is_visible_to(&self, user_id: UserId) -> bool {
        match self.scope {
            Scope::Shared => true,
            Scope::Private => self.owner_id.map_or(true, |owner| owner == user_id),
        }
    }
}

/// Fields of a deck that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewDeck {
    pub title: String,
    pub scope: Scope,
    pub owner_id: Option<UserId>,
    pub created_by: UserId,
    pub created_at: Timestamp,
}

/// A card: stable identity plus an opaque content payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub deck_id: DeckId,
    pub card_id: CardId,
    pub scope: Scope,
    #[serde(default)]
    pub owner_id: Option<UserId>,
    /// Content owned by the editing subsystem; never interpreted here.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Insertion order, used as the queue tie-breaker.
    pub seq: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Card {
    pub fn is_visible_to(&self, user_id: UserId) -> bool {
        match self.scope {
            Scope::Shared => true,
            Scope::Private => self.owner_id == Some(user_id),
        }
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.scope == Scope::Private && self.owner_id == Some(user_id)
    }
}

/// Content of a card to be inserted or updated.
#[derive(Debug, Clone)]
pub struct CardDraft {
    pub deck_id: DeckId,
    pub card_id: CardId,
    pub scope: Scope,
    pub owner_id: Option<UserId>,
    pub payload: serde_json::Value,
    pub now: Timestamp,
}

/// Identity of a progress record. Deliberately excludes the deck.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressKey {
    pub user_id: UserId,
    pub card_id: CardId,
}

impl ProgressKey {
    pub fn new(user_id: UserId, card_id: impl Into<CardId>) -> Self {
        Self {
            user_id,
            card_id: card_id.into(),
        }
    }
}

/// A stored progress record together with the deck it was last reached through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRow {
    pub user_id: UserId,
    pub deck_id: DeckId,
    pub card_id: CardId,
    #[serde(flatten)]
    pub progress: Progress,
}

impl ProgressRow {
    pub fn key(&self) -> ProgressKey {
        ProgressKey::new(self.user_id, self.card_id.clone())
    }
}

/// A single rating action, reported alongside progress snapshots.
///
/// Progress travels as snapshots; events only feed review statistics, so
/// replaying one never advances a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEvent {
    pub deck_id: DeckId,
    pub card_id: CardId,
    pub rating: Rating,
    pub observed_at: Timestamp,
}

/// Longest card id accepted by the store.
pub const MAX_CARD_ID_LEN: usize = 64;

/// Normalize a client-supplied card id.
///
/// Surrounding whitespace is trimmed, characters outside `[A-Za-z0-9_-]`
/// become `-`, and the result is capped at [`MAX_CARD_ID_LEN`]. An empty id
/// gets a freshly generated one.
pub fn normalize_card_id(raw: &str) -> CardId {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return format!("card-{}", uuid::Uuid::new_v4().simple());
    }
    trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_CARD_ID_LEN)
        .collect()
}

/// Serde adapter writing booleans as `0|1` and reading integers, booleans or null.
pub(crate) mod int_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(match Option::<Flag>::deserialize(deserializer)? {
            None => false,
            Some(Flag::Bool(b)) => b,
            Some(Flag::Int(i)) => i != 0,
            Some(Flag::Text(s)) => !matches!(s.trim(), "" | "0" | "false"),
        })
    }
}
