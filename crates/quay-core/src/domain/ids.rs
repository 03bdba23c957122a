//! Domain identifiers - 型付き ULID
//!
//! Quay の ID はすべて ULID です（48-bit のミリ秒タイムスタンプ + 80-bit の乱数）。
//! 26 文字の文字列表現は数値と同じ順序で並ぶので、メッセージストアをそのまま
//! 時刻のインデックスとして使えます。
//!
//! `Id<T>` はサイズゼロのマーカーを持ち、`MessageId` を `PopReceipt` の場所に
//! 渡すことはできません（どちらも ULID で同じストアのキーになるとしても）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// ID の種類を表すマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// パースエラーとログに使う名前
    fn kind() -> &'static str;
}

/// ULID ベースの汎用 ID
///
/// Display と serde はプレフィックスなしの 26 文字 ULID なので、文字列でも
/// 値の順序が保たれる。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// 先頭 48 bit に入っているミリ秒タイムスタンプ
    pub fn timestamp_ms(&self) -> u64 {
        self.ulid.timestamp_ms()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.ulid, f)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(Self::from_ulid)
            .map_err(|_| IdParseError {
                kind: T::kind(),
                value: s.to_string(),
            })
    }
}

/// ULID として不正な文字列が ID として渡された
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct IdParseError {
    pub kind: &'static str,
    pub value: String,
}

// ========================================
// マーカー型
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Queue {}

impl IdMarker for Queue {
    fn kind() -> &'static str {
        "queue id"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Message {}

impl IdMarker for Message {
    fn kind() -> &'static str {
        "message id"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Receipt {}

impl IdMarker for Receipt {
    fn kind() -> &'static str {
        "pop receipt"
    }
}

// ========================================
// 型エイリアス
// ========================================

/// キューの ID（アクターとストアのルーティングキー）
pub type QueueId = Id<Queue>;

/// メッセージの ID。enqueue 時に決まる。
pub type MessageId = Id<Message>;

/// メッセージの lease 1 回を指す使い捨てのトークン
///
/// タイムスタンプはメッセージが再び見えるようになる時刻。
pub type PopReceipt = Id<Receipt>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_bare_ulid() {
        let ulid = Ulid::new();
        let id = MessageId::from_ulid(ulid);
        assert_eq!(id.to_string(), ulid.to_string());
        assert_eq!(id.to_string().len(), 26);
    }

    #[test]
    fn text_order_matches_value_order() {
        let early = PopReceipt::from_ulid(Ulid::from_parts(1_000, u128::MAX));
        let late = PopReceipt::from_ulid(Ulid::from_parts(1_001, 0));

        assert!(early < late);
        assert!(early.to_string() < late.to_string());
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "bogus".parse::<PopReceipt>().unwrap_err();
        assert_eq!(err.kind, "pop receipt");
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = QueueId::from_ulid(Ulid::new());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));

        let back: QueueId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ids_are_the_size_of_a_ulid() {
        use std::mem::size_of;
        assert_eq!(size_of::<MessageId>(), size_of::<Ulid>());
        assert_eq!(size_of::<PopReceipt>(), 16);
    }
}
