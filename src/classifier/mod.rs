//! Statement Classification
//!
//! Decides from the raw SQL text alone whether a statement is guaranteed read-only. The text is
//! run through the `sqlparser` tokenizer for the target engine's dialect, so string literals,
//! quoted identifiers and comments are never mistaken for keywords, and `update_flag` is a single
//! identifier rather than `UPDATE` followed by something.
//!
//! # Rules
//! 1. The text must tokenize cleanly. Unterminated literals are rejected.
//! 2. Exactly one statement. Trailing semicolons are tolerated.
//! 3. The first token is an unquoted allow-listed keyword (`SELECT`, `WITH`, `SHOW`, `EXPLAIN`).
//! 4. No unquoted deny-listed keyword appears anywhere, at any nesting depth.
//! 5. No deny-listed function is called.
//! 6. A `WITH` prefix must end in a `SELECT`; an `EXPLAIN` must wrap a `SELECT` or `WITH` query.
//!
//! When in doubt the verdict is `Rejected`. Statements that are read-only but malformed may pass;
//! the database reports those through the executor.

use std::collections::BTreeSet;

use serde::Serialize;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use tracing::debug;

use crate::engine::DatabaseType;
use crate::error::{GatewayError, Result};

const DEFAULT_LEADING: &[&str] = &["SELECT", "WITH", "SHOW"];

const DEFAULT_DENIED: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "EXECUTE", "EXEC", "MERGE", "COPY", "VACUUM", "CALL", "INTO", "LOCK", "REINDEX", "REFRESH",
    "CLUSTER", "ATTACH", "DETACH", "UPSERT",
];

// Functions that change server state even inside a read-only transaction
const DEFAULT_DENIED_FUNCTIONS: &[&str] = &[
    "PG_TERMINATE_BACKEND",
    "PG_CANCEL_BACKEND",
    "PG_RELOAD_CONF",
    "PG_ROTATE_LOGFILE",
    "SET_CONFIG",
    "LO_IMPORT",
    "LO_EXPORT",
    "DBLINK",
    "DBLINK_EXEC",
    "DBLINK_SEND_QUERY",
    "DBLINK_CONNECT",
    "DBLINK_CONNECT_U",
    // session-level locks survive the rollback and stay with the pooled connection
    "PG_ADVISORY_LOCK",
    "PG_ADVISORY_LOCK_SHARED",
    "PG_TRY_ADVISORY_LOCK",
    "PG_TRY_ADVISORY_LOCK_SHARED",
    "GET_LOCK",
    "LOAD_FILE",
    "LOAD_EXTENSION",
];

/// Outcome of classifying one statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ClassificationVerdict {
    Allowed,
    Rejected { reason: String },
}

impl ClassificationVerdict {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// A statement the classifier has accepted
///
/// Only [`StatementClassifier::authorize`] can build one, so holding a `ReadOnlyStatement` is
/// proof the text passed classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOnlyStatement {
    sql: String,
}

impl ReadOnlyStatement {
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Keyword lists driving classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordPolicy {
    leading: BTreeSet<String>,
    denied: BTreeSet<String>,
    denied_functions: BTreeSet<String>,
}

impl Default for KeywordPolicy {
    fn default() -> Self {
        Self::strict().permit_explain(true)
    }
}

impl KeywordPolicy {
    /// Default lists without `EXPLAIN`
    #[must_use]
    pub fn strict() -> Self {
        Self {
            leading: upper_set(DEFAULT_LEADING),
            denied: upper_set(DEFAULT_DENIED),
            denied_functions: upper_set(DEFAULT_DENIED_FUNCTIONS),
        }
    }

    #[must_use]
    pub fn permit_explain(mut self, permit: bool) -> Self {
        if permit {
            self.leading.insert("EXPLAIN".to_string());
        } else {
            self.leading.remove("EXPLAIN");
        }
        self
    }

    /// Accept `keyword` as the first token of a statement
    #[must_use]
    pub fn allow_leading(mut self, keyword: &str) -> Self {
        self.leading.insert(keyword.to_ascii_uppercase());
        self
    }

    /// Stop accepting `keyword` as the first token
    #[must_use]
    pub fn remove_leading(mut self, keyword: &str) -> Self {
        self.leading.remove(&keyword.to_ascii_uppercase());
        self
    }

    /// Reject any statement containing `keyword`. Takes precedence over `allow_leading`.
    #[must_use]
    pub fn deny(mut self, keyword: &str) -> Self {
        self.denied.insert(keyword.to_ascii_uppercase());
        self
    }

    #[must_use]
    pub fn deny_function(mut self, name: &str) -> Self {
        self.denied_functions.insert(name.to_ascii_uppercase());
        self
    }

    #[must_use]
    pub fn allows_leading(&self, keyword: &str) -> bool {
        let keyword = keyword.to_ascii_uppercase();
        self.leading.contains(&keyword) && !self.denied.contains(&keyword)
    }
}

fn upper_set(words: &[&str]) -> BTreeSet<String> {
    words.iter().map(|w| w.to_ascii_uppercase()).collect()
}

/// Token-aware read-only classifier for one engine's SQL dialect
#[derive(Debug, Clone)]
pub struct StatementClassifier {
    engine: DatabaseType,
    policy: KeywordPolicy,
}

impl StatementClassifier {
    #[must_use]
    pub const fn new(engine: DatabaseType, policy: KeywordPolicy) -> Self {
        Self { engine, policy }
    }

    #[must_use]
    pub const fn engine(&self) -> DatabaseType {
        self.engine
    }

    /// Classify `sql` without executing anything
    #[must_use]
    pub fn classify(&self, sql: &str) -> ClassificationVerdict {
        match self.inspect(sql) {
            Ok(()) => ClassificationVerdict::Allowed,
            Err(reason) => {
                debug!(engine = %self.engine, %reason, "statement rejected");
                ClassificationVerdict::Rejected { reason }
            }
        }
    }

    /// Classify `sql` and wrap it in a [`ReadOnlyStatement`] when allowed
    pub fn authorize(&self, sql: &str) -> Result<ReadOnlyStatement> {
        match self.classify(sql) {
            ClassificationVerdict::Allowed => Ok(ReadOnlyStatement { sql: sql.to_string() }),
            ClassificationVerdict::Rejected { reason } => {
                Err(GatewayError::policy_violation(reason))
            }
        }
    }

    fn dialect(&self) -> Box<dyn Dialect> {
        match self.engine {
            DatabaseType::Postgres => Box::new(PostgreSqlDialect {}),
            DatabaseType::MySQL => Box::new(MySqlDialect {}),
            DatabaseType::SQLite => Box::new(SQLiteDialect {}),
        }
    }

    fn inspect(&self, sql: &str) -> std::result::Result<(), String> {
        let dialect = self.dialect();
        let tokens = Tokenizer::new(dialect.as_ref(), sql)
            .tokenize()
            .map_err(|e| format!("statement could not be tokenized: {e}"))?;

        // MySQL executes the body of /*! ... */ comments
        let executable_comment = tokens.iter().any(|t| {
            matches!(
                t,
                Token::Whitespace(Whitespace::MultiLineComment(body)) if body.starts_with('!')
            )
        });
        if executable_comment {
            return Err("executable comments (/*! ... */) are not allowed".to_string());
        }

        let mut significant: Vec<&Token> =
            tokens.iter().filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF)).collect();
        while matches!(significant.last(), Some(Token::SemiColon)) {
            significant.pop();
        }

        let body = significant.as_slice();
        let Some(first) = body.first() else {
            return Err("empty statement".to_string());
        };
        if body.iter().any(|t| matches!(t, Token::SemiColon)) {
            return Err("multiple statements are not allowed".to_string());
        }

        let leading = keyword(first)
            .ok_or_else(|| "statement must start with SELECT, WITH, SHOW or EXPLAIN".to_string())?;
        if !self.policy.leading.contains(&leading) {
            return Err(format!("{leading} statements are not allowed (read-only access)"));
        }

        for (idx, token) in body.iter().enumerate() {
            if let Some(word) = keyword(token) {
                if self.policy.denied.contains(&word) {
                    return Err(format!("keyword {word} is not allowed (read-only access)"));
                }
            }
            if let Some(name) = called_function(token, body.get(idx + 1)) {
                if self.policy.denied_functions.contains(&name) {
                    return Err(format!("function {} is not allowed", name.to_ascii_lowercase()));
                }
            }
        }

        match leading.as_str() {
            "WITH" => expect_select(body, skip_cte_list(body, 0)?, "WITH"),
            "EXPLAIN" => check_explain(body),
            _ => Ok(()),
        }
    }
}

/// Uppercased value of an unquoted word token
fn keyword(token: &Token) -> Option<String> {
    match token {
        Token::Word(word) if word.quote_style.is_none() => Some(word.value.to_ascii_uppercase()),
        _ => None,
    }
}

/// Uppercased name of a word token directly followed by `(`, quoted or not
///
/// `"pg_terminate_backend"(1)` resolves to the same function as the bare spelling, so quoting
/// does not exempt a call from the deny-list.
fn called_function(token: &Token, next: Option<&&Token>) -> Option<String> {
    match (token, next) {
        (Token::Word(word), Some(Token::LParen)) => Some(word.value.to_ascii_uppercase()),
        _ => None,
    }
}

fn is_keyword(token: Option<&&Token>, expected: &str) -> bool {
    token.and_then(|t| keyword(t)).is_some_and(|w| w == expected)
}

/// Index just past the parenthesized group opening at `open`
fn skip_parens(body: &[&Token], open: usize) -> std::result::Result<usize, String> {
    let mut depth = 0usize;
    for (idx, token) in body.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth.checked_sub(1).ok_or("unbalanced parentheses")?;
                if depth == 0 {
                    return Ok(idx + 1);
                }
            }
            _ => {}
        }
    }
    Err("unbalanced parentheses".to_string())
}

/// Walk `WITH [RECURSIVE] name [(cols)] AS [[NOT] MATERIALIZED] (...) [, ...]` starting at the
/// `WITH` token, returning the index of the statement that follows
fn skip_cte_list(body: &[&Token], with_at: usize) -> std::result::Result<usize, String> {
    let mut idx = with_at + 1;
    if is_keyword(body.get(idx), "RECURSIVE") {
        idx += 1;
    }

    loop {
        if !matches!(body.get(idx), Some(Token::Word(_))) {
            return Err("malformed WITH clause: expected a CTE name".to_string());
        }
        idx += 1;

        if matches!(body.get(idx), Some(Token::LParen)) {
            idx = skip_parens(body, idx)?;
        }
        if !is_keyword(body.get(idx), "AS") {
            return Err("malformed WITH clause: expected AS".to_string());
        }
        idx += 1;

        if is_keyword(body.get(idx), "NOT") {
            idx += 1;
        }
        if is_keyword(body.get(idx), "MATERIALIZED") {
            idx += 1;
        }

        if !matches!(body.get(idx), Some(Token::LParen)) {
            return Err("malformed WITH clause: expected a parenthesized query".to_string());
        }
        idx = skip_parens(body, idx)?;

        if matches!(body.get(idx), Some(Token::Comma)) {
            idx += 1;
            continue;
        }
        return Ok(idx);
    }
}

fn expect_select(body: &[&Token], idx: usize, context: &str) -> std::result::Result<(), String> {
    if is_keyword(body.get(idx), "SELECT") {
        Ok(())
    } else {
        Err(format!("{context} must be followed by a SELECT query"))
    }
}

/// `EXPLAIN [options] SELECT ...` or `EXPLAIN [options] WITH ... SELECT ...`
fn check_explain(body: &[&Token]) -> std::result::Result<(), String> {
    let mut idx = 1;
    if matches!(body.get(idx), Some(Token::LParen)) {
        idx = skip_parens(body, idx)?;
    }
    while let Some(token) = body.get(idx) {
        match keyword(token).as_deref() {
            Some("SELECT") => return Ok(()),
            Some("WITH") => return expect_select(body, skip_cte_list(body, idx)?, "WITH"),
            _ if matches!(token, Token::LParen) => break,
            _ => idx += 1,
        }
    }
    Err("EXPLAIN must wrap a SELECT query".to_string())
}
