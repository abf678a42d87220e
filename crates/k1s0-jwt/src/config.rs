//! ミドルウェア設定と設定ビルダー。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::de::DeserializeOwned;

use crate::claims::{self, MapClaims};
use crate::error::{AuthError, ConfigError};
use crate::extract::{compile_rules, RequestView, TokenExtractor};
use crate::key::{KeyFn, KeyStrategy};
use crate::lookup::{parse_lookup_spec, LookupRule, TokenSource};

/// 認証をスキップするかどうかを判定する述語。
pub type SkipFn = dyn Fn(&Parts) -> bool + Send + Sync;

/// トークン文字列の検証を完全に置き換えるパース関数。
///
/// 設定されている場合、組み込みの鍵解決・署名検証・標準クレーム検証は行われない。
pub type ParseFn<C> = dyn Fn(&str) -> Result<C, AuthError> + Send + Sync;

/// デフォルトのコンテキストキー。
const DEFAULT_CONTEXT_KEY: &str = "user";

/// デフォルトの認証スキーム。
const DEFAULT_SCHEME: &str = "Bearer";

/// デフォルトの leeway（秒）。
const DEFAULT_LEEWAY_SECS: u64 = 60;

/// トークンの検証方式。組み込み検証かユーザー定義パース関数のいずれか。
enum Decoder<C> {
    Verify {
        strategy: KeyStrategy,
        algorithm: Algorithm,
        leeway: u64,
        /// 初回リクエスト時に一度だけ構築される検証設定。
        /// 構築後は読み取り専用で、ホットパスにロックは無い。
        validation: OnceLock<Validation>,
    },
    Custom(Arc<ParseFn<C>>),
}

/// JwtAuthConfig は JWT 認証ミドルウェアの実効設定を表す。
///
/// `build()` で一度だけ構築され、以降は読み取り専用。`Arc` で全リクエストに
/// 共有される。リクエストごとの状態（抽出済みトークン・解決済み鍵・クレーム）は
/// この構造体には保持されない。
pub struct JwtAuthConfig<C = MapClaims> {
    skipper: Option<Arc<SkipFn>>,
    decoder: Decoder<C>,
    context_key: Arc<str>,
    extractors: Vec<Arc<dyn TokenExtractor>>,
    scheme: String,
    buffer_form: bool,
}

impl<C> JwtAuthConfig<C> {
    /// 設定ビルダーを返す。
    pub fn builder() -> JwtAuthConfigBuilder<C> {
        JwtAuthConfigBuilder::new()
    }

    /// スキップ述語が真を返すかどうかを判定する。
    pub(crate) fn should_skip(&self, parts: &Parts) -> bool {
        self.skipper.as_ref().is_some_and(|skipper| skipper(parts))
    }

    /// フォームボディのバッファリングが必要かどうかを返す。
    pub(crate) fn needs_form(&self) -> bool {
        self.buffer_form
    }

    /// 抽出チェーンを設定順に評価し、最初に見つかったトークンを返す。
    pub(crate) fn extract_token(&self, view: &RequestView<'_>) -> Option<String> {
        self.extractors
            .iter()
            .find_map(|extractor| extractor.extract(view))
    }

    /// 検証済みアイデンティティを格納するコンテキストキー名を返す。
    pub fn context_key(&self) -> Arc<str> {
        Arc::clone(&self.context_key)
    }

    /// 認証スキーム文字列を返す。
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// トークン文字列を検証し、デコード済みクレームを返す。
    ///
    /// クレームは呼び出しごとに新規構築される。
    pub fn verify_token(&self, token: &str) -> Result<C, AuthError>
    where
        C: DeserializeOwned,
    {
        match &self.decoder {
            Decoder::Verify {
                strategy,
                algorithm,
                leeway,
                validation,
            } => {
                let validation =
                    validation.get_or_init(|| claims::build_validation(*algorithm, *leeway));
                claims::decode_token(token, strategy, *algorithm, *leeway, validation)
            }
            Decoder::Custom(parse) => parse(token),
        }
    }
}

/// JwtAuthConfigBuilder は部分的な設定とデフォルトをマージして
/// `JwtAuthConfig` を構築する。
///
/// 鍵解決手段が一つも無い場合、最初のリクエストではなく `build()` の時点で
/// `ConfigError::MissingKeySource` を返す。
pub struct JwtAuthConfigBuilder<C = MapClaims> {
    skipper: Option<Arc<SkipFn>>,
    signing_key: Option<DecodingKey>,
    signing_keys: Option<HashMap<String, DecodingKey>>,
    key_fn: Option<Arc<KeyFn>>,
    parse_fn: Option<Arc<ParseFn<C>>>,
    algorithm: Algorithm,
    leeway: u64,
    context_key: String,
    lookup: Vec<LookupRule>,
    custom_extractors: Vec<Arc<dyn TokenExtractor>>,
    scheme: String,
    buffer_form: Option<bool>,
}

impl<C> JwtAuthConfigBuilder<C> {
    /// デフォルト値（HS256 / `user` / `Bearer` / `header:Authorization`）を持つ
    /// ビルダーを生成する。
    pub fn new() -> Self {
        Self {
            skipper: None,
            signing_key: None,
            signing_keys: None,
            key_fn: None,
            parse_fn: None,
            algorithm: Algorithm::HS256,
            leeway: DEFAULT_LEEWAY_SECS,
            context_key: DEFAULT_CONTEXT_KEY.to_string(),
            lookup: Vec::new(),
            custom_extractors: Vec::new(),
            scheme: DEFAULT_SCHEME.to_string(),
            buffer_form: None,
        }
    }

    /// 認証をスキップする述語を設定する。
    pub fn with_skipper(mut self, skipper: impl Fn(&Parts) -> bool + Send + Sync + 'static) -> Self {
        self.skipper = Some(Arc::new(skipper));
        self
    }

    /// 単一の静的検証鍵を設定する。
    pub fn with_signing_key(mut self, key: DecodingKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// kid で選択する検証鍵マップを設定する。
    pub fn with_signing_keys(mut self, keys: HashMap<String, DecodingKey>) -> Self {
        self.signing_keys = Some(keys);
        self
    }

    /// ユーザー定義の鍵解決関数を設定する。鍵マップ・単一鍵より優先される。
    pub fn with_key_fn(
        mut self,
        key_fn: impl Fn(&jsonwebtoken::Header) -> Result<DecodingKey, AuthError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// トークン検証を完全に置き換えるパース関数を設定する。すべての鍵解決手段より優先される。
    pub fn with_parse_fn(
        mut self,
        parse_fn: impl Fn(&str) -> Result<C, AuthError> + Send + Sync + 'static,
    ) -> Self {
        self.parse_fn = Some(Arc::new(parse_fn));
        self
    }

    /// 署名アルゴリズムを設定する（デフォルト: HS256）。
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// 標準クレーム検証の leeway 秒数を設定する（デフォルト: 60 秒）。
    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.leeway = secs;
        self
    }

    /// 検証済みアイデンティティを格納するコンテキストキー名を設定する（デフォルト: `user`）。
    pub fn with_context_key(mut self, key: &str) -> Self {
        self.context_key = key.to_string();
        self
    }

    /// `source:name[,source:name...]` 形式の指定文字列から抽出ルールを設定する。
    pub fn with_lookup(mut self, spec: &str) -> Self {
        self.lookup = parse_lookup_spec(spec);
        self
    }

    /// 抽出ルールを直接設定する。
    pub fn with_lookup_rules(mut self, rules: Vec<LookupRule>) -> Self {
        self.lookup = rules;
        self
    }

    /// ルールの代わりに使うカスタム抽出チェーンを設定する。
    pub fn with_extractors(mut self, extractors: Vec<Arc<dyn TokenExtractor>>) -> Self {
        self.custom_extractors = extractors;
        self
    }

    /// 認証スキーム文字列を設定する（デフォルト: `Bearer`）。
    /// 空文字列を設定するとヘッダー値全体をトークンとして扱う。
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    /// フォームボディのバッファリングを明示的に指定する。
    /// 未指定の場合は `form` ルールの有無から決まる。
    pub fn with_form_buffering(mut self, enabled: bool) -> Self {
        self.buffer_form = Some(enabled);
        self
    }

    /// 設定を検証し、実効設定を構築する。
    ///
    /// 実効的な検証方式は パース関数 > 鍵解決関数 > 鍵マップ > 単一鍵 の優先順位で
    /// 一つに確定する。いずれも無い場合は `ConfigError::MissingKeySource` を返す。
    /// 空の鍵マップは未設定として扱う。
    pub fn build(self) -> Result<JwtAuthConfig<C>, ConfigError> {
        let decoder = if let Some(parse_fn) = self.parse_fn {
            Decoder::Custom(parse_fn)
        } else if let Some(key_fn) = self.key_fn {
            verify_decoder(KeyStrategy::KeyFn(key_fn), self.algorithm, self.leeway)
        } else if let Some(keys) = self.signing_keys.filter(|keys| !keys.is_empty()) {
            verify_decoder(KeyStrategy::Keyed(keys), self.algorithm, self.leeway)
        } else if let Some(key) = self.signing_key {
            verify_decoder(KeyStrategy::Single(key), self.algorithm, self.leeway)
        } else {
            return Err(ConfigError::MissingKeySource);
        };

        let (extractors, rules_have_form) = if self.custom_extractors.is_empty() {
            let rules = if self.lookup.is_empty() {
                vec![LookupRule::new(TokenSource::Header, "Authorization")]
            } else {
                self.lookup
            };
            let has_form = rules.iter().any(|rule| rule.source == TokenSource::Form);
            (compile_rules(&rules, &self.scheme), has_form)
        } else {
            (self.custom_extractors, false)
        };

        Ok(JwtAuthConfig {
            skipper: self.skipper,
            decoder,
            context_key: Arc::from(self.context_key.as_str()),
            extractors,
            scheme: self.scheme,
            buffer_form: self.buffer_form.unwrap_or(rules_have_form),
        })
    }
}

impl<C> Default for JwtAuthConfigBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

fn verify_decoder<C>(strategy: KeyStrategy, algorithm: Algorithm, leeway: u64) -> Decoder<C> {
    Decoder::Verify {
        strategy,
        algorithm,
        leeway,
        validation: OnceLock::new(),
    }
}
