//! k1s0-jwt: 差し替え可能な JWT 認証ミドルウェアライブラリ
//!
//! ベアラー形式の署名付きトークンをリクエストの複数の位置（ヘッダー・クエリ・
//! パスパラメータ・Cookie・フォーム）から設定順に抽出し、署名と標準クレームを
//! 検証して、検証済みアイデンティティをリクエストエクステンションに格納する。
//!
//! 設定は起動時に一度だけ構築し、`Arc` で全リクエストに共有する。
//! 鍵解決手段が一つも無い設定は最初のリクエストではなく構築時に失敗する。
//!
//! # 使い方
//!
//! ```ignore
//! use std::sync::Arc;
//! use jsonwebtoken::DecodingKey;
//! use k1s0_jwt::JwtAuthConfig;
//!
//! let config = Arc::new(
//!     JwtAuthConfig::builder()
//!         .with_signing_key(DecodingKey::from_secret(b"secret"))
//!         .with_lookup("header:Authorization,query:token")
//!         .with_skipper(|parts| parts.uri.path() == "/health")
//!         .build()?,
//! );
//!
//! let app = k1s0_jwt::apply(router, config);
//! ```

pub mod claims;
pub mod config;
pub mod error;
pub mod extract;
pub mod key;
pub mod lookup;
pub mod middleware;

pub use claims::{sign_claims, MapClaims, StandardClaims};
pub use config::{JwtAuthConfig, JwtAuthConfigBuilder, ParseFn, SkipFn};
pub use error::{AuthError, ConfigError};
pub use extract::{
    CookieExtractor, FormExtractor, HeaderExtractor, ParamExtractor, QueryExtractor, RequestView,
    TokenExtractor,
};
pub use key::{KeyFn, KeyStrategy};
pub use lookup::{parse_lookup_spec, LookupRule, TokenSource};
pub use middleware::{apply, jwt_auth, AuthIdentity};
