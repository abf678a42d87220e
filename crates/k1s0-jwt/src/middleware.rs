//! axum 用の JWT 認証ミドルウェア。
//!
//! リクエストごとの流れ: スキップ判定 → トークン抽出 → 検証 →
//! アイデンティティのエクステンション格納 → 後続処理。失敗時は後続を
//! 実行せず、分類済みの 401 応答で即座に打ち切る。

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, RawPathParams, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json, Router,
};
use http::request::Parts;
use http::{header, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::config::JwtAuthConfig;
use crate::error::AuthError;
use crate::extract::RequestView;

/// AuthIdentity は検証済みアイデンティティを表す。
///
/// 認証成功時にリクエストエクステンションへちょうど一度だけ格納される。
/// `name` は設定されたコンテキストキー名を保持し、複数のアイデンティティを
/// 使い分ける下流コードの判別に使える。
pub struct AuthIdentity<C> {
    /// 設定されたコンテキストキー名（デフォルト: `user`）。
    pub name: Arc<str>,

    /// デコード済みクレーム。リクエストごとに新規構築される。
    pub claims: Arc<C>,
}

impl<C> Clone for AuthIdentity<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            claims: Arc::clone(&self.claims),
        }
    }
}

/// jwt_auth は JWT 認証ミドルウェア。
///
/// `axum::middleware::from_fn_with_state` に `Arc<JwtAuthConfig<C>>` とともに
/// 渡して使う。検証成功時は `AuthIdentity<C>` をリクエストエクステンションに
/// 格納してから後続を実行する。
pub async fn jwt_auth<C>(
    State(config): State<Arc<JwtAuthConfig<C>>>,
    req: Request,
    next: Next,
) -> Response
where
    C: DeserializeOwned + Send + Sync + 'static,
{
    let (mut parts, body) = req.into_parts();

    if config.should_skip(&parts) {
        return next.run(Request::from_parts(parts, body)).await;
    }

    // form ルールが有効な場合のみボディをバッファし、抽出後に復元する。
    // バッファに失敗したボディは復元できないため、後続には渡さず即座に拒否する
    let (body, form) = if config.needs_form() && is_urlencoded(&parts.headers) {
        let bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(error = %err, path = %parts.uri.path(), "failed to buffer request body for form lookup");
                return rejection(&AuthError::MissingToken, config.scheme());
            }
        };
        let form = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&bytes).ok();
        (Body::from(bytes), form)
    } else {
        (body, None)
    };

    let query = parts
        .uri
        .query()
        .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
        .unwrap_or_default();
    let params = raw_path_params(&mut parts).await;
    let cookies = parse_cookies(&parts.headers);

    let view = RequestView::new(
        &parts.headers,
        &query,
        &params,
        &cookies,
        form.as_deref(),
    );

    let Some(token) = config.extract_token(&view) else {
        tracing::debug!(path = %parts.uri.path(), "no token found in request");
        return rejection(&AuthError::MissingToken, config.scheme());
    };

    match config.verify_token(&token) {
        Ok(claims) => {
            let identity = AuthIdentity {
                name: config.context_key(),
                claims: Arc::new(claims),
            };

            let mut req = Request::from_parts(parts, body);
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(err) => {
            tracing::warn!(error = %err, path = %parts.uri.path(), "token verification failed");
            rejection(&err, config.scheme())
        }
    }
}

/// ルーターに JWT 認証ミドルウェアを適用する。
///
/// 例：
/// ```ignore
/// let config = Arc::new(JwtAuthConfig::builder().with_signing_key(key).build()?);
/// let app = k1s0_jwt::apply(router, config);
/// ```
pub fn apply<C>(router: Router, config: Arc<JwtAuthConfig<C>>) -> Router
where
    C: DeserializeOwned + Send + Sync + 'static,
{
    router.layer(axum::middleware::from_fn_with_state(config, jwt_auth::<C>))
}

/// 認証エラーを 401 応答に変換する。
///
/// ボディは `{"code": <int>, "message": <string>}`。トークン欠落は 40102、
/// それ以外は 40103 で、HTTP ステータスはどちらも 401 に統一している。
/// 詳細なエラー内容は応答には含めず、ログ側にのみ残す。
fn rejection(err: &AuthError, scheme: &str) -> Response {
    let message = match err {
        AuthError::MissingToken => "missing or malformed token",
        _ => "invalid or expired token",
    };

    let body = json!({
        "code": err.code(),
        "message": message,
    });

    let mut resp = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    if !scheme.is_empty() {
        if let Ok(value) = HeaderValue::from_str(scheme) {
            resp.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
    }
    resp
}

/// ルーティング済みパスパラメータを取り出す。未ルーティングの場合は空になる。
async fn raw_path_params(parts: &mut Parts) -> Vec<(String, String)> {
    match RawPathParams::from_request_parts(parts, &()).await {
        Ok(raw) => {
            let mut params = Vec::new();
            for (key, value) in &raw {
                params.push((key.to_string(), value.to_string()));
            }
            params
        }
        Err(_) => Vec::new(),
    }
}

/// Cookie ヘッダーを `(名前, 値)` の組に分解する。
fn parse_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut cookies = Vec::new();

    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                cookies.push((name.to_string(), value.to_string()));
            }
        }
    }

    cookies
}

/// Content-Type が `application/x-www-form-urlencoded` かどうかを判定する。
fn is_urlencoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|mime| mime.trim() == "application/x-www-form-urlencoded")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "a=1; jwt=abc.def; b=2".parse().unwrap());

        let cookies = parse_cookies(&headers);
        assert_eq!(
            cookies,
            vec![
                ("a".to_string(), "1".to_string()),
                ("jwt".to_string(), "abc.def".to_string()),
                ("b".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_cookies_multiple_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, "a=1".parse().unwrap());
        headers.append(header::COOKIE, "b=2".parse().unwrap());

        let cookies = parse_cookies(&headers);
        assert_eq!(cookies.len(), 2);
    }

    #[test]
    fn test_is_urlencoded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        assert!(is_urlencoded(&headers));

        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded; charset=utf-8"
                .parse()
                .unwrap(),
        );
        assert!(is_urlencoded(&headers));

        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert!(!is_urlencoded(&headers));
    }

    #[test]
    fn test_rejection_shape() {
        let resp = rejection(&AuthError::MissingToken, "Bearer");
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers().get(header::WWW_AUTHENTICATE),
            Some(&HeaderValue::from_static("Bearer"))
        );
    }

    #[test]
    fn test_rejection_empty_scheme_omits_header() {
        let resp = rejection(&AuthError::SignatureInvalid, "");
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().get(header::WWW_AUTHENTICATE).is_none());
    }
}
