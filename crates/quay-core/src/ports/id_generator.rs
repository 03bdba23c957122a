//! SortableIdGenerator - ソート可能な ID の生成
//!
//! キューのストアのキーはすべて ULID です。
//! - enqueue されたメッセージ: 現在時刻の ID
//! - lease されたメッセージ: 再び見えるようになる時刻の ID
//!
//! ULID の文字列順は値の順序と一致するので、「now」で区切った昇順スキャンが
//! 準備済みのレコードだけを古い順に返します。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ulid::Ulid;

/// ULID の 48-bit タイムスタンプで表せる最大のミリ秒
pub const MAX_TIMESTAMP_MS: u64 = (1 << 48) - 1;

/// キュー 1 つ分の単調増加 ULID ジェネレータ
///
/// # 2 つのストリーム
/// - `next()`: 時計駆動。`floor_ms` より前には戻らない（時計が戻っても）
/// - `next_at()` / `next_after()`: 指定時刻（通常は未来）のスケジュール ID
///
/// # 単調性
/// ミリ秒ごとに発行済みの最大 ID を覚えておき、同じミリ秒の次の ID はその
/// +1 になる。どちらのストリームから発行しても、同じタイムスタンプを持つ ID は
/// 呼び出し順に厳密に増加する。`floor_ms` より前のエントリは二度と使われない
/// ので捨てる。
#[derive(Debug, Clone, Default)]
pub struct SortableIdGenerator {
    floor_ms: u64,
    high_water: BTreeMap<u64, Ulid>,
}

impl SortableIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `now`（または時計の床のほうが後ならそちら）のタイムスタンプを持つ次の ID
    pub fn next(&mut self, now: DateTime<Utc>) -> Ulid {
        let ms = to_ms(now).max(self.floor_ms);
        self.raise_floor(ms);
        self.issue(ms)
    }

    /// `at` のタイムスタンプを持つ次の ID。lease のキーに使う。
    pub fn next_at(&mut self, at: DateTime<Utc>) -> Ulid {
        self.schedule(to_ms(at))
    }

    /// `now` から `timeout_secs` 秒後のタイムスタンプを持つ次の ID
    ///
    /// ULID で表せない時刻は `MAX_TIMESTAMP_MS` に丸める。
    pub fn next_after(&mut self, now: DateTime<Utc>, timeout_secs: u64) -> Ulid {
        let ms = to_ms(now).saturating_add(timeout_secs.saturating_mul(1000));
        self.schedule(ms)
    }

    /// ストアに既にあるキーを取り込む（再起動時）
    ///
    /// 以降に同じミリ秒で発行する ID はこのキーより大きくなる。
    pub fn observe(&mut self, key: Ulid) {
        let ms = key.timestamp_ms();
        if ms < self.floor_ms {
            return;
        }
        self.high_water
            .entry(ms)
            .and_modify(|prev| *prev = (*prev).max(key))
            .or_insert(key);
    }

    /// 時計駆動で発行された ID（message id）を取り込む
    ///
    /// `observe` に加えて時計の床を引き上げるので、再起動をまたいで時計が
    /// 戻っても新しい message id は既存のものより後ろに並ぶ。
    pub fn observe_issued(&mut self, id: Ulid) {
        self.raise_floor(id.timestamp_ms());
        self.observe(id);
    }

    /// ID を生成せずに `at` の時刻プレフィックスを得る
    pub fn encode(at: DateTime<Utc>) -> TimePrefix {
        TimePrefix::from_ms(to_ms(at))
    }

    fn schedule(&mut self, ms: u64) -> Ulid {
        self.issue(ms.max(self.floor_ms))
    }

    fn raise_floor(&mut self, ms: u64) {
        if ms > self.floor_ms {
            self.floor_ms = ms;
            self.high_water = self.high_water.split_off(&ms);
        }
    }

    fn issue(&mut self, ms: u64) -> Ulid {
        let ms = ms.min(MAX_TIMESTAMP_MS);
        let id = match self.high_water.get(&ms).copied() {
            Some(prev) => match prev.increment() {
                Some(id) => id,
                // ランダム部が尽きたら次のミリ秒へ
                None if ms < MAX_TIMESTAMP_MS => return self.issue(ms + 1),
                None => prev,
            },
            None => Ulid::from_parts(ms, rand::random()),
        };
        self.high_water.insert(ms, id);
        id
    }
}

/// ULID の時刻部分。スキャンの境界に使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimePrefix(u64);

impl TimePrefix {
    pub fn from_ms(ms: u64) -> Self {
        Self(ms.min(MAX_TIMESTAMP_MS))
    }

    /// このプレフィックスを持つ最小の ULID
    ///
    /// これより前の時刻の ID はすべてこれより小さく、同時刻以降の ID は
    /// すべてこれ以上になる。
    pub fn lower_key(&self) -> Ulid {
        Ulid::from_parts(self.0, 0)
    }
}

fn to_ms(at: DateTime<Utc>) -> u64 {
    (at.timestamp_millis().max(0) as u64).min(MAX_TIMESTAMP_MS)
}
