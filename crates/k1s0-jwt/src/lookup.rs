//! トークン抽出位置の指定文字列（TokenLookup）パーサー。

/// TokenSource はトークンを探すリクエスト上の位置を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// HTTP ヘッダー。スキームプレフィックス（例: `Bearer `）を剥がして抽出する。
    Header,
    /// URL クエリパラメータ。
    Query,
    /// ルーティングのパスパラメータ。
    Param,
    /// Cookie。
    Cookie,
    /// `application/x-www-form-urlencoded` フォームフィールド。
    Form,
}

/// LookupRule は `(抽出位置, 名前)` の組を表す。
///
/// 設定された順序がそのまま抽出の優先順位になる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRule {
    pub source: TokenSource,
    pub name: String,
}

impl LookupRule {
    /// 新しい LookupRule を生成する。
    pub fn new(source: TokenSource, name: &str) -> Self {
        Self {
            source,
            name: name.to_string(),
        }
    }
}

/// `source:name[,source:name...]` 形式の指定文字列を順序付きルール一覧に変換する。
///
/// 位置は `header` / `query` / `param` / `cookie` / `form` のいずれか。
/// 未知の位置やコロンを含まないエントリはルールを追加せずスキップし、
/// 設定ミスに気付けるよう warn ログを出す。空白のトリムは行わない。
pub fn parse_lookup_spec(spec: &str) -> Vec<LookupRule> {
    let mut rules = Vec::new();

    for entry in spec.split(',') {
        let Some((source, name)) = entry.split_once(':') else {
            tracing::warn!(%entry, "token lookup entry without a colon is ignored");
            continue;
        };

        let source = match source {
            "header" => TokenSource::Header,
            "query" => TokenSource::Query,
            "param" => TokenSource::Param,
            "cookie" => TokenSource::Cookie,
            "form" => TokenSource::Form,
            _ => {
                tracing::warn!(%source, "unknown token lookup source is ignored");
                continue;
            }
        };

        rules.push(LookupRule {
            source,
            name: name.to_string(),
        });
    }

    rules
}
