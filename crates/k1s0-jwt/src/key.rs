//! 検証鍵の解決戦略。

use std::collections::HashMap;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Header};

use crate::error::AuthError;

/// 鍵解決関数。トークンヘッダーを受け取り検証鍵を返す。
///
/// 組み込みのアルゴリズム・kid チェックは適用されず、解決は完全に委譲される。
pub type KeyFn = dyn Fn(&Header) -> Result<DecodingKey, AuthError> + Send + Sync;

/// KeyStrategy はトークンの検証鍵を決定する戦略を表す。
///
/// 設定時に一つだけが有効になる（優先順位の解決は設定ビルダーが行う）。
pub enum KeyStrategy {
    /// 単一の静的鍵。アルゴリズム一致の検査後、常にこの鍵を返す。
    Single(DecodingKey),

    /// kid で選択する鍵マップ。kid の欠落・未登録は `UnknownKeyId` になる。
    Keyed(HashMap<String, DecodingKey>),

    /// ユーザー定義の鍵解決関数。
    KeyFn(Arc<KeyFn>),
}

impl KeyStrategy {
    /// トークンヘッダーから検証鍵を解決する。
    ///
    /// `Single` と `Keyed` では、鍵の選択より前にトークンの alg と設定アルゴリズムの
    /// 一致を必ず検査する。`KeyFn` は検査を含めて委譲される。
    pub(crate) fn resolve(
        &self,
        header: &Header,
        expected: Algorithm,
    ) -> Result<DecodingKey, AuthError> {
        match self {
            Self::KeyFn(resolve) => resolve(header),
            Self::Single(key) => {
                check_algorithm(header, expected)?;
                Ok(key.clone())
            }
            Self::Keyed(keys) => {
                check_algorithm(header, expected)?;
                let kid = header
                    .kid
                    .as_deref()
                    .ok_or(AuthError::UnknownKeyId(None))?;
                keys.get(kid)
                    .cloned()
                    .ok_or_else(|| AuthError::UnknownKeyId(Some(kid.to_string())))
            }
        }
    }
}

/// トークンが宣言する alg と設定アルゴリズムの一致を検査する。
///
/// 署名検証の可否とは無関係に、不一致は即座に拒否する（アルゴリズム置換攻撃対策）。
fn check_algorithm(header: &Header, expected: Algorithm) -> Result<(), AuthError> {
    if header.alg == expected {
        Ok(())
    } else {
        Err(AuthError::UnsupportedAlgorithm {
            expected,
            found: header.alg,
        })
    }
}
