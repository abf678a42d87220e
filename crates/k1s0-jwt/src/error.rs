//! 認証・設定エラー定義。

use jsonwebtoken::Algorithm;
use thiserror::Error;

/// ConfigError はミドルウェア構築時の設定エラーを表す。
///
/// リクエスト処理中ではなく `build()` 時点で発生し、ルート登録を中断させる。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 鍵解決手段（単一鍵・鍵マップ・鍵解決関数・パース関数）が一つも設定されていない。
    #[error("no key source configured: set a signing key, signing keys, a key fn or a parse fn")]
    MissingKeySource,
}

/// AuthError はリクエスト単位の認証エラーを表す。
///
/// いずれのバリアントもリトライ対象ではなく、ミドルウェアが 401 応答へ変換する。
#[derive(Debug, Error)]
pub enum AuthError {
    /// どの抽出ルールもトークン文字列を取得できなかった。
    #[error("no token found in request")]
    MissingToken,

    /// トークンヘッダーの alg が設定アルゴリズムと一致しない。
    /// 署名の正否に関係なくアルゴリズム置換攻撃として拒否する。
    #[error("unsupported algorithm: token declares {found:?}, configured {expected:?}")]
    UnsupportedAlgorithm {
        expected: Algorithm,
        found: Algorithm,
    },

    /// 鍵マップ方式で kid が欠落している、または未登録の kid が指定された。
    #[error("unknown key id: {}", .0.as_deref().unwrap_or("<missing>"))]
    UnknownKeyId(Option<String>),

    /// トークンの構造が不正でデコードできない。
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// 署名検証に失敗した。
    #[error("signature verification failed")]
    SignatureInvalid,

    /// 標準クレーム検証に失敗した（期限切れ・有効化前など）。
    #[error("invalid claims: {0}")]
    ClaimsInvalid(String),
}

impl AuthError {
    /// エラー応答ボディの code 値を返す。
    ///
    /// トークン欠落は 40102、それ以外（不正・期限切れ等）はすべて 40103 に分類する。
    pub fn code(&self) -> u32 {
        match self {
            Self::MissingToken => 40102,
            _ => 40103,
        }
    }
}
