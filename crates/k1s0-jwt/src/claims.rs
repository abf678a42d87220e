//! クレームの形と、トークンの発行・検証。
//!
//! クレームはデコードのたびに serde が新しい値として構築するため、
//! リクエスト間でインスタンスが共有・再利用されることはない。

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::key::KeyStrategy;

/// オープンマッピング形式のクレーム。任意のフィールドを保持する。
pub type MapClaims = serde_json::Map<String, serde_json::Value>;

/// StandardClaims は標準クレームのみを持つ最小のクレーム構造体。
///
/// 型付きクレームの既製形として、また発行ヘルパーのペイロードとして使う。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardClaims {
    /// サブジェクト（ユーザー識別子）
    pub sub: String,

    /// 有効期限（Unix タイムスタンプ）
    pub exp: i64,

    /// 発行時刻（Unix タイムスタンプ）
    pub iat: i64,

    /// 有効化時刻（Unix タイムスタンプ、省略可）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

impl StandardClaims {
    /// 現在時刻を発行時刻として、`ttl` 後に期限切れとなるクレームを生成する。
    pub fn new(sub: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: sub.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            nbf: None,
        }
    }

    /// 有効化時刻を設定する。
    pub fn with_not_before(mut self, nbf: DateTime<Utc>) -> Self {
        self.nbf = Some(nbf.timestamp());
        self
    }

    /// 有効期限が過ぎているかどうかを返す。
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

/// クレームに署名してトークン文字列を発行する。
///
/// 検証側との往復（発行→即検証）に必要な最小限の署名操作のみを提供する。
pub fn sign_claims<C: Serialize>(
    claims: &C,
    algorithm: Algorithm,
    key: &EncodingKey,
    kid: Option<&str>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let mut header = Header::new(algorithm);
    header.kid = kid.map(str::to_string);
    jsonwebtoken::encode(&header, claims, key)
}

/// leeway と nbf 検証を設定した標準クレーム検証設定を組み立てる。
pub(crate) fn build_validation(algorithm: Algorithm, leeway: u64) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.leeway = leeway;
    validation.validate_nbf = true;
    validation
}

/// トークン文字列を構造デコード → 鍵解決 → 署名・標準クレーム検証の順で処理する。
///
/// 返るクレームは呼び出しごとに新規構築される。
pub(crate) fn decode_token<C: DeserializeOwned>(
    token: &str,
    strategy: &KeyStrategy,
    algorithm: Algorithm,
    leeway: u64,
    validation: &Validation,
) -> Result<C, AuthError> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| AuthError::MalformedToken(e.to_string()))?;

    let key = strategy.resolve(&header, algorithm)?;

    // 鍵解決関数への委譲時はアルゴリズム検査も委譲されるため、
    // 標準クレーム検証はトークンが宣言する alg に対して行う
    let data = if matches!(strategy, KeyStrategy::KeyFn(_)) && header.alg != algorithm {
        let delegated = build_validation(header.alg, leeway);
        jsonwebtoken::decode::<C>(token, &key, &delegated)
    } else {
        jsonwebtoken::decode::<C>(token, &key, validation)
    }
    .map_err(classify_decode_error)?;
    Ok(data.claims)
}

/// jsonwebtoken のエラーを認証エラーの分類に写す。
fn classify_decode_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::ClaimsInvalid("token is expired".to_string()),
        ErrorKind::ImmatureSignature => {
            AuthError::ClaimsInvalid("token is not yet valid".to_string())
        }
        ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
        _ => AuthError::MalformedToken(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::DecodingKey;

    const SECRET: &[u8] = b"claims-test-secret";

    fn single_strategy() -> KeyStrategy {
        KeyStrategy::Single(DecodingKey::from_secret(SECRET))
    }

    fn hs256_validation() -> Validation {
        Validation::new(Algorithm::HS256)
    }

    #[test]
    fn test_standard_claims_new() {
        let claims = StandardClaims::new("user-1", Duration::minutes(15));
        assert_eq!(claims.sub, "user-1");
        assert!(claims.exp > claims.iat);
        assert!(claims.nbf.is_none());
        assert!(!claims.is_expired());
    }

    #[test]
    fn test_standard_claims_with_not_before() {
        let nbf = Utc::now() + Duration::minutes(5);
        let claims = StandardClaims::new("user-1", Duration::minutes(15)).with_not_before(nbf);
        assert_eq!(claims.nbf, Some(nbf.timestamp()));
    }

    #[test]
    fn test_sign_and_decode_roundtrip() {
        let claims = StandardClaims::new("subject-s", Duration::minutes(15));
        let token = sign_claims(
            &claims,
            Algorithm::HS256,
            &EncodingKey::from_secret(SECRET),
            None,
        )
        .unwrap();

        let decoded: StandardClaims =
            decode_token(&token, &single_strategy(), Algorithm::HS256, 60, &hs256_validation())
                .unwrap();
        assert_eq!(decoded.sub, "subject-s");
        assert_eq!(decoded.exp, claims.exp);
    }

    #[test]
    fn test_decode_open_mapping() {
        let token = sign_claims(
            &serde_json::json!({ "sub": "alice", "exp": Utc::now().timestamp() + 900, "role": "admin" }),
            Algorithm::HS256,
            &EncodingKey::from_secret(SECRET),
            None,
        )
        .unwrap();

        let decoded: MapClaims =
            decode_token(&token, &single_strategy(), Algorithm::HS256, 60, &hs256_validation())
                .unwrap();
        assert_eq!(decoded["sub"], "alice");
        assert_eq!(decoded["role"], "admin");
    }

    #[test]
    fn test_expired_token_is_claims_invalid() {
        // デフォルト leeway（60 秒）を大きく超えた過去に期限切れ
        let claims = StandardClaims::new("user-1", Duration::seconds(-3600));
        let token = sign_claims(
            &claims,
            Algorithm::HS256,
            &EncodingKey::from_secret(SECRET),
            None,
        )
        .unwrap();

        let result: Result<StandardClaims, _> =
            decode_token(&token, &single_strategy(), Algorithm::HS256, 60, &hs256_validation());
        assert!(matches!(result, Err(AuthError::ClaimsInvalid(_))));
    }

    #[test]
    fn test_wrong_secret_is_signature_invalid() {
        let claims = StandardClaims::new("user-1", Duration::minutes(15));
        let token = sign_claims(
            &claims,
            Algorithm::HS256,
            &EncodingKey::from_secret(b"other-secret"),
            None,
        )
        .unwrap();

        let result: Result<StandardClaims, _> =
            decode_token(&token, &single_strategy(), Algorithm::HS256, 60, &hs256_validation());
        assert!(matches!(result, Err(AuthError::SignatureInvalid)));
    }

    #[test]
    fn test_garbage_token_is_malformed() {
        let result: Result<StandardClaims, _> = decode_token(
            "not-a-jwt",
            &single_strategy(),
            Algorithm::HS256,
            60,
            &hs256_validation(),
        );
        assert!(matches!(result, Err(AuthError::MalformedToken(_))));
    }

    #[test]
    fn test_algorithm_mismatch_wins_over_signature() {
        // HS256 で正しく署名されていても、HS512 設定では UnsupportedAlgorithm になる
        let claims = StandardClaims::new("user-1", Duration::minutes(15));
        let token = sign_claims(
            &claims,
            Algorithm::HS256,
            &EncodingKey::from_secret(SECRET),
            None,
        )
        .unwrap();

        let result: Result<StandardClaims, _> = decode_token(
            &token,
            &single_strategy(),
            Algorithm::HS512,
            60,
            &Validation::new(Algorithm::HS512),
        );
        assert!(matches!(
            result,
            Err(AuthError::UnsupportedAlgorithm {
                expected: Algorithm::HS512,
                found: Algorithm::HS256,
            })
        ));
    }

    #[test]
    fn test_key_fn_decodes_differing_algorithm() {
        // 鍵解決関数への委譲では、宣言 alg が設定アルゴリズムと異なっても検証が通る
        let strategy = KeyStrategy::KeyFn(std::sync::Arc::new(|_header: &Header| {
            Ok(DecodingKey::from_secret(SECRET))
        }));

        let claims = StandardClaims::new("delegated", Duration::minutes(5));
        let token = sign_claims(
            &claims,
            Algorithm::HS512,
            &EncodingKey::from_secret(SECRET),
            None,
        )
        .unwrap();

        let decoded: StandardClaims =
            decode_token(&token, &strategy, Algorithm::HS256, 60, &hs256_validation()).unwrap();
        assert_eq!(decoded.sub, "delegated");
    }

    #[test]
    fn test_sign_with_kid_sets_header() {
        let claims = StandardClaims::new("user-1", Duration::minutes(15));
        let token = sign_claims(
            &claims,
            Algorithm::HS256,
            &EncodingKey::from_secret(SECRET),
            Some("k1"),
        )
        .unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("k1"));
    }
}
