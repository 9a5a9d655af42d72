//! Parsed-definition cache
//!
//! Definitions are parsed once and shared; the cache clears wholesale when it
//! overflows, which is cheap and keeps the common working set hot.

use crate::ast::ExpressionNode;
use crate::parser::{ParseError, parse_expression};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Cache of parsed COMPUTED definitions keyed by their source text
#[derive(Debug, Default)]
pub struct ExpressionCache {
    entries: FxHashMap<String, Arc<ExpressionNode>>,
    max_entries: usize,
}

impl ExpressionCache {
    /// Default capacity before the clear-on-overflow policy kicks in
    pub const DEFAULT_CAPACITY: usize = 1000;

    /// Create a cache with the default capacity
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            max_entries: Self::DEFAULT_CAPACITY,
        }
    }

    /// Parse `definition`, reusing the cached tree when available
    pub fn get_or_parse(&mut self, definition: &str) -> Result<Arc<ExpressionNode>, ParseError> {
        if let Some(expr) = self.entries.get(definition) {
            return Ok(Arc::clone(expr));
        }
        let expr = Arc::new(parse_expression(definition)?);
        if self.entries.len() >= self.max_entries {
            self.entries.clear();
        }
        self.entries
            .insert(definition.to_string(), Arc::clone(&expr));
        Ok(expr)
    }

    /// Number of cached definitions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_by_source_text() {
        let mut cache = ExpressionCache::new();
        let a = cache.get_or_parse("1+2").unwrap();
        let b = cache.get_or_parse("1+2").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn malformed_definitions_are_not_cached() {
        let mut cache = ExpressionCache::new();
        assert!(cache.get_or_parse("1+").is_err());
        assert!(cache.is_empty());
    }
}
