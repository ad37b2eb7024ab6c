//! Variable Resolver
//!
//! Substitutes `${{ vault.key | fn args }}` tokens in string values.
//! Lookups go through the [`VaultStore`]; post-processing functions come
//! from a [`FunctionRegistry`]. Nested expansion is bounded at
//! [`MAX_DEPTH`] levels so cyclic vault values cannot loop forever.
//!
//! Resolution is a pure read over the store: the resolver never writes a
//! vault, which is why any number of resolvers may run concurrently.

use rand::distr::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::vault_store::VaultStore;

pub const TOKEN_OPENER: &str = "${{";
pub const TOKEN_CLOSER: &str = "}}";

/// Nested expansion gives up past this many levels.
pub const MAX_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("variable expansion exceeded {MAX_DEPTH} levels while resolving '{value}'")]
    DepthExceeded { value: String },

    #[error("unknown resolver function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' failed: {error}")]
    Function { name: String, error: String },
}

// ============================================================================
// Token extraction
// ============================================================================

/// One parsed `| name arg1 arg2` post-processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<String>,
}

/// A replacement token as written, delimiters included, plus its parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExpr {
    /// Original text from opener through closer, for pass-through.
    pub raw: String,
    pub vault: Option<String>,
    pub key: String,
    pub functions: Vec<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Literal(String),
    Token(TokenExpr),
}

/// Left-to-right scan into literal spans and token fragments. An opener
/// with no closer after it makes the remainder a literal; a stray closer
/// is plain text.
pub fn extract(input: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut rest = input;

    while let Some(open) = rest.find(TOKEN_OPENER) {
        let after_open = open + TOKEN_OPENER.len();
        let Some(close) = rest[after_open..].find(TOKEN_CLOSER) else {
            // Unterminated token: everything from the opener is literal.
            break;
        };
        let close_end = after_open + close + TOKEN_CLOSER.len();

        if open > 0 {
            spans.push(Span::Literal(rest[..open].to_string()));
        }
        let raw = &rest[open..close_end];
        let inner = &rest[after_open..after_open + close];
        spans.push(Span::Token(parse_token(raw, inner)));
        rest = &rest[close_end..];
    }

    if !rest.is_empty() {
        spans.push(Span::Literal(rest.to_string()));
    }
    spans
}

fn parse_token(raw: &str, inner: &str) -> TokenExpr {
    let inner = inner.trim();
    let (head, chain) = match inner.find('|') {
        Some(pipe) => (inner[..pipe].trim(), Some(&inner[pipe + 1..])),
        None => (inner, None),
    };

    // `vault.key`, where dots beyond the first stay part of the key.
    let (vault, key) = match head.find('.') {
        Some(dot) => (
            Some(head[..dot].to_lowercase()),
            head[dot + 1..].to_string(),
        ),
        None => (None, head.to_string()),
    };

    let functions = chain
        .map(|c| {
            c.split('|')
                .filter_map(|call| {
                    let mut words = call.split_whitespace().map(str::to_string);
                    words.next().map(|name| FunctionCall {
                        name: name.to_lowercase(),
                        args: words.collect(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    TokenExpr {
        raw: raw.to_string(),
        vault,
        key,
        functions,
    }
}

// ============================================================================
// Function registry
// ============================================================================

pub trait ResolverFunction: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, value: &str, args: &[String]) -> Result<String, String>;
}

/// Name to implementation, nothing more. Names compare case-insensitively.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn ResolverFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RandomString));
        registry.register(Arc::new(Lower));
        registry.register(Arc::new(Upper));
        registry.register(Arc::new(Base64Encode));
        registry
    }

    pub fn register(&mut self, function: Arc<dyn ResolverFunction>) {
        self.functions
            .insert(function.name().to_lowercase(), function);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ResolverFunction>> {
        self.functions.get(&name.to_lowercase())
    }
}

/// `random_string <length>`: alphanumeric, default length 16.
struct RandomString;

impl ResolverFunction for RandomString {
    fn name(&self) -> &str {
        "random_string"
    }

    fn apply(&self, _value: &str, args: &[String]) -> Result<String, String> {
        let length: usize = match args.first() {
            Some(arg) => arg
                .parse()
                .map_err(|_| format!("invalid length '{arg}'"))?,
            None => 16,
        };
        Ok(rand::rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect())
    }
}

struct Lower;

impl ResolverFunction for Lower {
    fn name(&self) -> &str {
        "lower"
    }

    fn apply(&self, value: &str, _args: &[String]) -> Result<String, String> {
        Ok(value.to_lowercase())
    }
}

struct Upper;

impl ResolverFunction for Upper {
    fn name(&self) -> &str {
        "upper"
    }

    fn apply(&self, value: &str, _args: &[String]) -> Result<String, String> {
        Ok(value.to_uppercase())
    }
}

struct Base64Encode;

impl ResolverFunction for Base64Encode {
    fn name(&self) -> &str {
        "base64"
    }

    fn apply(&self, value: &str, _args: &[String]) -> Result<String, String> {
        use base64::Engine;
        Ok(base64::engine::general_purpose::STANDARD.encode(value))
    }
}

// ============================================================================
// Resolver
// ============================================================================

pub struct VariableResolver {
    store: Arc<VaultStore>,
    functions: FunctionRegistry,
}

impl VariableResolver {
    pub fn new(store: Arc<VaultStore>) -> Self {
        Self {
            store,
            functions: FunctionRegistry::with_builtins(),
        }
    }

    pub fn with_registry(store: Arc<VaultStore>, functions: FunctionRegistry) -> Self {
        Self { store, functions }
    }

    /// Resolve every token in `input`. Unresolvable tokens pass through
    /// unchanged, so resolution is idempotent over a fixed store.
    pub fn resolve(&self, input: &str) -> Result<String, ResolveError> {
        self.resolve_at(input, 0)
    }

    /// Resolve every string leaf inside a structured value. Worker inputs
    /// are resolved through this before they are decoded into typed forms.
    pub fn resolve_value(&self, value: &serde_json::Value) -> Result<serde_json::Value, ResolveError> {
        use serde_json::Value;
        Ok(match value {
            Value::String(s) => Value::String(self.resolve(s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.resolve_value(v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.resolve_value(v)?)))
                    .collect::<Result<_, ResolveError>>()?,
            ),
            other => other.clone(),
        })
    }

    fn resolve_at(&self, input: &str, depth: usize) -> Result<String, ResolveError> {
        if depth > MAX_DEPTH {
            return Err(ResolveError::DepthExceeded {
                value: input.to_string(),
            });
        }

        let mut out = String::with_capacity(input.len());
        for span in extract(input) {
            match span {
                Span::Literal(text) => out.push_str(&text),
                Span::Token(token) => out.push_str(&self.resolve_token(&token, depth)?),
            }
        }
        Ok(out)
    }

    fn resolve_token(&self, token: &TokenExpr, depth: usize) -> Result<String, ResolveError> {
        let value = token
            .vault
            .as_deref()
            .and_then(|vault| self.lookup(vault, &token.key));

        match value {
            Some(value) => {
                // Nested tokens expand without the outer function chain.
                let expanded = if value.contains(TOKEN_OPENER) {
                    self.resolve_at(&value, depth + 1)?
                } else {
                    value
                };
                self.apply_chain(expanded, &token.functions)
            }
            None if token.vault.is_none() && !token.functions.is_empty() => {
                // Purely functional: the chain runs on the key itself.
                self.apply_chain(token.key.clone(), &token.functions)
            }
            None => Ok(token.raw.clone()),
        }
    }

    fn lookup(&self, vault: &str, key: &str) -> Option<String> {
        if let Some(value) = self.store.get(vault, key) {
            return Some(value);
        }
        if self.store.is_empty(vault) {
            return synthesized(key);
        }
        None
    }

    fn apply_chain(
        &self,
        mut value: String,
        chain: &[FunctionCall],
    ) -> Result<String, ResolveError> {
        for call in chain {
            let function = self
                .functions
                .get(&call.name)
                .ok_or_else(|| ResolveError::UnknownFunction(call.name.clone()))?;
            value = function
                .apply(&value, &call.args)
                .map_err(|error| ResolveError::Function {
                    name: call.name.clone(),
                    error,
                })?;
        }
        Ok(value)
    }
}

/// First-class keys served when the consulted vault holds no items.
fn synthesized(key: &str) -> Option<String> {
    match key.to_lowercase().as_str() {
        "uuid" => Some(uuid::Uuid::new_v4().to_string()),
        "timestamp" => Some(chrono::Utc::now().timestamp().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::vault_store::SnapshotVault;
    use tokio_util::sync::CancellationToken;

    async fn store_with(vault: &str, pairs: &[(&str, &str)]) -> Arc<VaultStore> {
        let store = Arc::new(VaultStore::new());
        store.register(Arc::new(SnapshotVault::new(
            vault,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )));
        store.sync_all(&CancellationToken::new()).await;
        store
    }

    #[tokio::test]
    async fn test_missing_key_passes_through_unchanged() {
        let store = store_with("config", &[]).await;
        let resolver = VariableResolver::new(store);

        let input = "/prefix/${{ config.test_not_found }}/suffix";
        assert_eq!(resolver.resolve(input).unwrap(), input);
    }

    #[tokio::test]
    async fn test_vault_hits_substitute() {
        let store = store_with("config", &[("test", "alpha"), ("bar", "beta")]).await;
        let resolver = VariableResolver::new(store);

        assert_eq!(
            resolver.resolve("/x/${{config.test}}/y/${{config.bar}}").unwrap(),
            "/x/alpha/y/beta"
        );
    }

    #[tokio::test]
    async fn test_unterminated_token_is_literal() {
        let store = store_with("config", &[("test", "alpha")]).await;
        let resolver = VariableResolver::new(store);

        assert_eq!(
            resolver.resolve("a/${{ config.test/b").unwrap(),
            "a/${{ config.test/b"
        );
    }

    #[tokio::test]
    async fn test_stray_closer_is_plain_text() {
        let store = store_with("config", &[("test", "alpha")]).await;
        let resolver = VariableResolver::new(store);

        assert_eq!(
            resolver.resolve("}}/${{config.test}}").unwrap(),
            "}}/alpha"
        );
    }

    #[tokio::test]
    async fn test_nested_expansion_drops_outer_functions() {
        // outer's upper applies after the inner token already resolved,
        // and only at the level it was written.
        let store = store_with(
            "config",
            &[("outer", "pre-${{ config.inner }}"), ("inner", "mid")],
        )
        .await;
        let resolver = VariableResolver::new(store);

        assert_eq!(
            resolver.resolve("${{ config.outer | upper }}").unwrap(),
            "PRE-MID"
        );
    }

    #[tokio::test]
    async fn test_cyclic_values_hit_depth_bound() {
        let store = store_with("config", &[("a", "${{ config.b }}"), ("b", "${{ config.a }}")])
            .await;
        let resolver = VariableResolver::new(store);

        assert!(matches!(
            resolver.resolve("${{ config.a }}"),
            Err(ResolveError::DepthExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_pure_functional_token_runs_on_key() {
        let store = store_with("config", &[]).await;
        let resolver = VariableResolver::new(store);

        assert_eq!(resolver.resolve("${{ hello | upper }}").unwrap(), "HELLO");
    }

    #[tokio::test]
    async fn test_random_string_honors_length() {
        let store = store_with("config", &[]).await;
        let resolver = VariableResolver::new(store);

        let value = resolver.resolve("${{ pw | random_string 24 }}").unwrap();
        assert_eq!(value.len(), 24);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_function_chain_applies_left_to_right() {
        let store = store_with("config", &[("name", "Widget")]).await;
        let resolver = VariableResolver::new(store);

        assert_eq!(
            resolver.resolve("${{ config.name | lower | upper }}").unwrap(),
            "WIDGET"
        );
    }

    #[tokio::test]
    async fn test_vault_and_function_names_are_case_insensitive() {
        let store = store_with("config", &[("key", "v")]).await;
        let resolver = VariableResolver::new(store);

        assert_eq!(resolver.resolve("${{ Config.KEY | UPPER }}").unwrap(), "V");
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let store = store_with("config", &[("test", "alpha")]).await;
        let resolver = VariableResolver::new(store);

        let once = resolver
            .resolve("/x/${{config.test}}/${{ config.gone }}")
            .unwrap();
        let twice = resolver.resolve(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_empty_vault_serves_synthesized_uuid() {
        let store = store_with("config", &[]).await;
        let resolver = VariableResolver::new(store);

        let value = resolver.resolve("${{ config.uuid }}").unwrap();
        assert!(uuid::Uuid::parse_str(&value).is_ok());
    }

    #[tokio::test]
    async fn test_resolve_value_walks_structures() {
        let store = store_with("config", &[("test", "alpha")]).await;
        let resolver = VariableResolver::new(store);

        let input = serde_json::json!({
            "path": "/x/${{config.test}}",
            "nested": {"items": ["${{config.test}}", 7]},
            "flag": true
        });
        let resolved = resolver.resolve_value(&input).unwrap();
        assert_eq!(resolved["path"], "/x/alpha");
        assert_eq!(resolved["nested"]["items"][0], "alpha");
        assert_eq!(resolved["nested"]["items"][1], 7);
    }
}
