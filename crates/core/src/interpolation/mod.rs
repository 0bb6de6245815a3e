//! Parsing of `@variable` references, `{{ }}` expression blocks and
//! `{{#if}}` conditionals in section text.

pub mod ast;
mod extract;
pub(crate) mod lexer;
mod parser;
mod serialize;

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::trace;

pub use ast::{
    Ast, Expr, Formatter, Node, Operator, ParseDiagnostic, ParseErrorKind, ParseResult,
    PathSegment, Span, VarRef,
};
pub use extract::extract_variable_dependencies;
pub use serialize::to_source;

use crate::hasher::content_hash;
use crate::sync::lock;

/// Parse interpolated text. Never fails: problems are reported in
/// [`ParseResult::errors`] and the affected source is kept as literal text.
pub fn parse(text: &str) -> ParseResult {
    parser::parse_template(text)
}

/// A parsed template together with the facts derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTemplate {
    pub source: String,
    pub hash: u64,
    pub ast: Ast,
    pub dependencies: BTreeSet<String>,
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl ParsedTemplate {
    pub fn new(source: &str) -> Self {
        let ParseResult { ast, errors } = parse(source);
        let dependencies = extract_variable_dependencies(&ast);
        Self {
            source: source.to_string(),
            hash: content_hash(source),
            ast,
            dependencies,
            diagnostics: errors,
        }
    }
}

/// Bounded cache of parsed templates keyed by content hash.
///
/// Identical text is parsed once; editing a section produces a new hash and
/// so a fresh parse.
pub struct ParseCache {
    entries: Mutex<LruCache<u64, Arc<ParsedTemplate>>>,
}

impl ParseCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(capacity)) }
    }

    pub fn get_or_parse(&self, source: &str) -> Arc<ParsedTemplate> {
        let hash = content_hash(source);
        let mut entries = lock(&self.entries);
        if let Some(hit) = entries.get(&hash)
            && hit.source == source
        {
            return Arc::clone(hit);
        }
        trace!(hash, len = source.len(), "parsing template");
        let parsed = Arc::new(ParsedTemplate::new(source));
        entries.put(hash, Arc::clone(&parsed));
        parsed
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

impl std::fmt::Debug for ParseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseCache").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_template_collects_dependencies() {
        let parsed = ParsedTemplate::new("Buy @qty at @price|currency");
        assert_eq!(parsed.dependencies.iter().collect::<Vec<_>>(), vec!["price", "qty"]);
        assert!(parsed.diagnostics.is_empty());
    }

    #[test]
    fn test_cache_returns_same_parse() {
        let cache = ParseCache::new(8);
        let a = cache.get_or_parse("Hi @name");
        let b = cache.get_or_parse("Hi @name");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_evicts_least_recent() {
        let cache = ParseCache::new(2);
        let first = cache.get_or_parse("@a");
        cache.get_or_parse("@b");
        cache.get_or_parse("@c");
        assert_eq!(cache.len(), 2);
        let again = cache.get_or_parse("@a");
        assert!(!Arc::ptr_eq(&first, &again));
    }
}
