//! MessageState - メッセージの状態
//!
//! 状態はフィールドとして保存しません。レコードがどのキーの下にあるかで決まります。
//! - message id の下: 一度も lease されていない（Visible）
//! - 時刻が過ぎた pop receipt の下: 再び見える（Visible）
//! - 時刻が未来の pop receipt の下: lease 中（Leased）
//!
//! acknowledge されたメッセージやキューごと消されたメッセージはレコード自体が
//! なくなるので、状態も持ちません。

use serde::{Deserialize, Serialize};

/// メッセージの状態
///
/// # 状態遷移
/// - Visible -> Leased (lease)
/// - Leased -> Visible (lease キーの時刻を過ぎた)
/// - Leased -> （レコード削除） (現在の pop receipt で acknowledge)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    /// 次の lease の対象
    Visible,

    /// pop receipt の時刻まで隠れている
    Leased,
}
