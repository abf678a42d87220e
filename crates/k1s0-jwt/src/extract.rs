//! リクエストからトークン文字列を取り出す抽出チェーン。

use std::sync::Arc;

use http::HeaderMap;

use crate::lookup::{LookupRule, TokenSource};

/// RequestView はリクエスト 1 件分の抽出対象を借用でまとめた読み取り専用ビュー。
///
/// ミドルウェアがリクエスト冒頭で一度だけ構築し、抽出チェーンに渡す。
/// 保持する値はすべてそのリクエストのコールスタック上にあり、共有されない。
pub struct RequestView<'a> {
    headers: &'a HeaderMap,
    query: &'a [(String, String)],
    params: &'a [(String, String)],
    cookies: &'a [(String, String)],
    form: Option<&'a [(String, String)]>,
}

impl<'a> RequestView<'a> {
    /// 新しい RequestView を生成する。
    pub fn new(
        headers: &'a HeaderMap,
        query: &'a [(String, String)],
        params: &'a [(String, String)],
        cookies: &'a [(String, String)],
        form: Option<&'a [(String, String)]>,
    ) -> Self {
        Self {
            headers,
            query,
            params,
            cookies,
            form,
        }
    }

    /// 指定ヘッダーの値を返す。非 UTF-8 の値は存在しないものとして扱う。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// 指定クエリパラメータの値を返す（同名が複数ある場合は最初のもの）。
    pub fn query_value(&self, name: &str) -> Option<&str> {
        lookup_pair(self.query, name)
    }

    /// 指定パスパラメータの値を返す。
    pub fn param_value(&self, name: &str) -> Option<&str> {
        lookup_pair(self.params, name)
    }

    /// 指定 Cookie の値を返す。
    pub fn cookie_value(&self, name: &str) -> Option<&str> {
        lookup_pair(self.cookies, name)
    }

    /// 指定フォームフィールドの値を返す。フォームが無いリクエストでは常に `None`。
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form.and_then(|form| lookup_pair(form, name))
    }
}

fn lookup_pair<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// TokenExtractor はリクエストからトークン候補文字列を 1 つ取り出す戦略を表す。
///
/// チェーンは設定順に評価され、最初に `Some` を返した戦略で確定する。
pub trait TokenExtractor: Send + Sync {
    /// トークン文字列を取り出す。見つからない場合は `None` を返す。
    fn extract(&self, req: &RequestView<'_>) -> Option<String>;
}

/// ヘッダーからスキームプレフィックス付きでトークンを取り出す。
///
/// 値が `<scheme> <token>`（スキームは ASCII 大文字小文字を無視、区切りは
/// 半角スペース 1 つ、残りが非空）の形式である場合のみ成功する。
/// スキームが空文字列の場合はヘッダー値全体をトークンとして扱う。
pub struct HeaderExtractor {
    pub header: String,
    pub scheme: String,
}

impl TokenExtractor for HeaderExtractor {
    fn extract(&self, req: &RequestView<'_>) -> Option<String> {
        let value = req.header(&self.header)?;

        if self.scheme.is_empty() {
            return if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
        }

        let (prefix, rest) = value.split_at_checked(self.scheme.len())?;
        if !prefix.eq_ignore_ascii_case(&self.scheme) {
            return None;
        }

        let token = rest.strip_prefix(' ')?;
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}

/// クエリパラメータからトークンを取り出す。値が非空の場合のみ成功する。
pub struct QueryExtractor {
    pub name: String,
}

impl TokenExtractor for QueryExtractor {
    fn extract(&self, req: &RequestView<'_>) -> Option<String> {
        non_empty(req.query_value(&self.name))
    }
}

/// パスパラメータからトークンを取り出す。値が非空の場合のみ成功する。
pub struct ParamExtractor {
    pub name: String,
}

impl TokenExtractor for ParamExtractor {
    fn extract(&self, req: &RequestView<'_>) -> Option<String> {
        non_empty(req.param_value(&self.name))
    }
}

/// Cookie からトークンを取り出す。値が非空の場合のみ成功する。
pub struct CookieExtractor {
    pub name: String,
}

impl TokenExtractor for CookieExtractor {
    fn extract(&self, req: &RequestView<'_>) -> Option<String> {
        non_empty(req.cookie_value(&self.name))
    }
}

/// フォームフィールドからトークンを取り出す。値が非空の場合のみ成功する。
pub struct FormExtractor {
    pub name: String,
}

impl TokenExtractor for FormExtractor {
    fn extract(&self, req: &RequestView<'_>) -> Option<String> {
        non_empty(req.form_value(&self.name))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    match value {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => None,
    }
}

/// LookupRule の一覧を抽出チェーンにコンパイルする。順序は保存される。
pub(crate) fn compile_rules(rules: &[LookupRule], scheme: &str) -> Vec<Arc<dyn TokenExtractor>> {
    rules
        .iter()
        .map(|rule| -> Arc<dyn TokenExtractor> {
            let name = rule.name.clone();
            match rule.source {
                TokenSource::Header => Arc::new(HeaderExtractor {
                    header: name,
                    scheme: scheme.to_string(),
                }),
                TokenSource::Query => Arc::new(QueryExtractor { name }),
                TokenSource::Param => Arc::new(ParamExtractor { name }),
                TokenSource::Cookie => Arc::new(CookieExtractor { name }),
                TokenSource::Form => Arc::new(FormExtractor { name }),
            }
        })
        .collect()
}
