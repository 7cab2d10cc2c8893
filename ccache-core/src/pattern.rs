//! # Glob Pattern Matcher
//!
//! Purpose: Match keys and members against Redis-style glob patterns
//! (`*`, `?`, everything else literal) by compiling to anchored regexes,
//! with a bounded LRU cache so repeated KEYS/SCAN MATCH traffic does not
//! recompile.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;

pub struct PatternMatcher {
    cache: Mutex<LruCache<String, Arc<Regex>>>,
}

impl PatternMatcher {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        PatternMatcher {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// True when `text` matches `pattern` in full.
    pub fn matches(&self, pattern: &str, text: &str) -> bool {
        self.compiled(pattern).is_match(text)
    }

    fn compiled(&self, pattern: &str) -> Arc<Regex> {
        let mut cache = self.cache.lock();
        if let Some(regex) = cache.get(pattern) {
            return Arc::clone(regex);
        }
        drop(cache);

        let regex = Arc::new(compile(pattern));
        self.cache.lock().put(pattern.to_string(), Arc::clone(&regex));
        regex
    }
}

/// Translates a glob pattern into an anchored regex. `*` and `?` are the
/// only metacharacters; regex-significant bytes are escaped as literals.
fn compile(pattern: &str) -> Regex {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            '[' | ']' | '(' | ')' | '{' | '}' | '.' | '+' | '|' | '^' | '$' | '\\' => {
                translated.push('\\');
                translated.push(ch);
            }
            other => translated.push(other),
        }
    }
    translated.push('$');

    // Everything regex-significant is escaped above, so compilation can only
    // fail on pathological sizes; fall back to matching nothing.
    Regex::new(&translated).unwrap_or_else(|_| Regex::new("$^").expect("valid fallback"))
}
