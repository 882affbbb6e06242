use crate::{
    params::{unescape, ParamsMap},
    route::RoutePath,
};
use once_cell::sync::Lazy;
use or_poisoned::OrPoisoned;
use regex::Regex;
use std::{
    borrow::Cow,
    collections::HashMap,
    iter::Peekable,
    str::Chars,
    sync::{Arc, RwLock},
};
use thiserror::Error;

/// A pattern that failed to compile.
///
/// Matching itself never errors (a miss is a miss); only malformed path
/// expressions are reported, at compile time.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("dangling escape in pattern \"{pattern}\"")]
    DanglingEscape { pattern: String },
    #[error("missing parameter name in pattern \"{pattern}\"")]
    MissingName { pattern: String },
    #[error("unbalanced group in pattern \"{pattern}\"")]
    UnbalancedGroup { pattern: String },
    #[error("nested group in pattern \"{pattern}\" (groups cannot contain unescaped parentheses)")]
    NestedGroup { pattern: String },
    #[error("empty group in pattern \"{pattern}\"")]
    EmptyGroup { pattern: String },
    #[error("alternative paths cannot nest further alternatives")]
    NestedAlternatives,
    #[error("pattern \"{pattern}\" compiled to an invalid expression: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },
}

/// How often a parameter may occur in the matched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    /// Exactly once.
    None,
    /// Zero or one time (`:name?`).
    Optional,
    /// One or more `/`-separated segments (`:name+`).
    OneOrMore,
    /// Zero or more `/`-separated segments (`:name*`).
    ZeroOrMore,
}

impl Modifier {
    /// Whether captured text is split into one value per segment.
    pub fn is_repeatable(&self) -> bool {
        matches!(self, Modifier::OneOrMore | Modifier::ZeroOrMore)
    }
}

/// The name of a captured parameter: either `:named`, or positional for
/// bare `(group)` captures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyName {
    Named(Cow<'static, str>),
    Index(u16),
}

impl KeyName {
    pub(crate) fn to_param_key(&self) -> Cow<'static, str> {
        match self {
            KeyName::Named(name) => name.clone(),
            KeyName::Index(i) => Cow::Owned(i.to_string()),
        }
    }
}

/// One parameter declared by a path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternKey {
    pub name: KeyName,
    pub modifier: Modifier,
}

/// A successful pattern match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    /// The prefix of the candidate consumed by the pattern.
    pub path: String,
    /// Every parameter declared on the way down to this match, ancestors
    /// first.
    pub keys: Vec<PatternKey>,
    /// Ancestor parameters merged with this pattern's captures.
    pub params: ParamsMap,
}

#[derive(Debug)]
enum Token {
    Static(String),
    Key {
        key: PatternKey,
        pattern: String,
        prefixed: bool,
    },
}

const DEFAULT_SEGMENT: &str = "[^/]+";

fn read_group(
    chars: &mut Peekable<Chars>,
    pattern: &str,
) -> Result<String, PatternError> {
    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push('\\');
                match chars.next() {
                    Some(escaped) => out.push(escaped),
                    None => {
                        return Err(PatternError::DanglingEscape {
                            pattern: pattern.to_string(),
                        })
                    }
                }
            }
            '(' => {
                return Err(PatternError::NestedGroup {
                    pattern: pattern.to_string(),
                })
            }
            ')' => {
                if out.is_empty() {
                    return Err(PatternError::EmptyGroup {
                        pattern: pattern.to_string(),
                    });
                }
                return Ok(out);
            }
            c => out.push(c),
        }
    }
    Err(PatternError::UnbalancedGroup {
        pattern: pattern.to_string(),
    })
}

fn read_modifier(chars: &mut Peekable<Chars>) -> Modifier {
    let modifier = match chars.peek() {
        Some('?') => Modifier::Optional,
        Some('+') => Modifier::OneOrMore,
        Some('*') => Modifier::ZeroOrMore,
        _ => return Modifier::None,
    };
    chars.next();
    modifier
}

/// A `/` directly before a parameter belongs to the parameter: it is
/// repeated with `+`/`*` and omitted with `?`/`*` when the parameter is
/// absent.
fn take_prefix(text: &mut String) -> bool {
    if text.ends_with('/') {
        text.pop();
        true
    } else {
        false
    }
}

fn flush_static(tokens: &mut Vec<Token>, text: &mut String) {
    if !text.is_empty() {
        tokens.push(Token::Static(std::mem::take(text)));
    }
}

fn parse(pattern: &str) -> Result<Vec<Token>, PatternError> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut chars = pattern.chars().peekable();
    let mut next_index: u16 = 0;

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => text.push(escaped),
                None => {
                    return Err(PatternError::DanglingEscape {
                        pattern: pattern.to_string(),
                    })
                }
            },
            ':' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return Err(PatternError::MissingName {
                        pattern: pattern.to_string(),
                    });
                }
                let group = if chars.peek() == Some(&'(') {
                    chars.next();
                    read_group(&mut chars, pattern)?
                } else {
                    DEFAULT_SEGMENT.to_string()
                };
                let modifier = read_modifier(&mut chars);
                let prefixed = take_prefix(&mut text);
                flush_static(&mut tokens, &mut text);
                tokens.push(Token::Key {
                    key: PatternKey {
                        name: KeyName::Named(Cow::Owned(name)),
                        modifier,
                    },
                    pattern: group,
                    prefixed,
                });
            }
            '(' => {
                let group = read_group(&mut chars, pattern)?;
                let modifier = read_modifier(&mut chars);
                let prefixed = take_prefix(&mut text);
                flush_static(&mut tokens, &mut text);
                tokens.push(Token::Key {
                    key: PatternKey {
                        name: KeyName::Index(next_index),
                        modifier,
                    },
                    pattern: group,
                    prefixed,
                });
                next_index += 1;
            }
            c => text.push(c),
        }
    }
    flush_static(&mut tokens, &mut text);
    Ok(tokens)
}

/// One compiled alternative of a route path.
#[derive(Debug)]
struct CompiledPattern {
    re: Regex,
    keys: Vec<PatternKey>,
    exact: bool,
    /// Whether the pattern text itself ends on a `/` (or is empty), in
    /// which case a prefix match needs no further segment boundary.
    end_delimited: bool,
}

impl CompiledPattern {
    fn from_pattern(pattern: &str, exact: bool) -> Result<Self, PatternError> {
        let tokens = parse(pattern)?;
        // The empty pattern must match only the empty remainder; it never
        // tolerates a trailing slash the way other patterns do.
        let strict = pattern.is_empty();
        let end_delimited = match tokens.last() {
            None => true,
            Some(Token::Static(s)) => s.ends_with('/'),
            Some(Token::Key { .. }) => false,
        };

        let mut source = String::from("^");
        let mut keys = Vec::new();
        for token in &tokens {
            match token {
                Token::Static(s) => source.push_str(&regex::escape(s)),
                Token::Key {
                    key,
                    pattern: group,
                    prefixed,
                } => {
                    let capture = if key.modifier.is_repeatable() {
                        format!("((?:{group})(?:/(?:{group}))*)")
                    } else {
                        format!("({group})")
                    };
                    let optional = matches!(
                        key.modifier,
                        Modifier::Optional | Modifier::ZeroOrMore
                    );
                    match (prefixed, optional) {
                        (true, true) => {
                            source.push_str(&format!("(?:/{capture})?"))
                        }
                        (true, false) => {
                            source.push_str(&format!("(?:/{capture})"))
                        }
                        (false, true) => {
                            source.push_str(&format!("{capture}?"))
                        }
                        (false, false) => source.push_str(&capture),
                    }
                    keys.push(key.clone());
                }
            }
        }
        if exact {
            if !strict {
                source.push_str("(?:/)?");
            }
            source.push('$');
        } else if !strict {
            source.push_str("(?:/$)?");
        }

        let re = Regex::new(&source).map_err(|e| PatternError::Regex {
            pattern: pattern.to_string(),
            source: Box::new(e),
        })?;
        Ok(Self {
            re,
            keys,
            exact,
            end_delimited,
        })
    }

    /// A raw regular expression route path is used as given, anchored at
    /// the start; end handling is the expression's own business.
    fn from_regex(pattern: &str) -> Result<Self, PatternError> {
        let source = if pattern.starts_with('^') {
            pattern.to_string()
        } else {
            format!("^(?:{pattern})")
        };
        let re = Regex::new(&source).map_err(|e| PatternError::Regex {
            pattern: pattern.to_string(),
            source: Box::new(e),
        })?;
        let keys = re
            .capture_names()
            .skip(1)
            .enumerate()
            .map(|(i, name)| PatternKey {
                name: match name {
                    Some(name) => {
                        KeyName::Named(Cow::Owned(name.to_string()))
                    }
                    None => KeyName::Index(i as u16),
                },
                modifier: Modifier::None,
            })
            .collect();
        Ok(Self {
            re,
            keys,
            exact: false,
            end_delimited: true,
        })
    }

    fn exec(&self, path: &str) -> Option<(usize, Vec<Option<String>>)> {
        let caps = self.re.captures(path)?;
        let end = caps.get(0).map_or(0, |m| m.end());
        if !self.exact {
            let rest = &path[end..];
            if !(rest.is_empty()
                || rest.starts_with('/')
                || self.end_delimited)
            {
                return None;
            }
        }
        let values = (0..self.keys.len())
            .map(|i| caps.get(i + 1).map(|m| m.as_str().to_string()))
            .collect();
        Some((end, values))
    }
}

/// A compiled route path expression.
///
/// Compiling is deterministic for a given `(path, exact)` pair, so
/// matchers are shared through a [`MatcherCache`].
#[derive(Debug)]
pub struct Matcher {
    alternatives: Vec<CompiledPattern>,
    keys: Vec<PatternKey>,
}

impl Matcher {
    /// Compiles a route path. `exact` anchors the match to the whole
    /// candidate; otherwise a prefix ending on a segment boundary matches.
    pub fn compile(path: &RoutePath, exact: bool) -> Result<Self, PatternError> {
        let mut alternatives = Vec::new();
        match path {
            RoutePath::Pattern(p) => {
                alternatives.push(CompiledPattern::from_pattern(p, exact)?)
            }
            RoutePath::Regex(p) => {
                alternatives.push(CompiledPattern::from_regex(p)?)
            }
            RoutePath::Alternatives(paths) => {
                for path in paths {
                    match path {
                        RoutePath::Pattern(p) => alternatives
                            .push(CompiledPattern::from_pattern(p, exact)?),
                        RoutePath::Regex(p) => {
                            alternatives.push(CompiledPattern::from_regex(p)?)
                        }
                        RoutePath::Alternatives(_) => {
                            return Err(PatternError::NestedAlternatives)
                        }
                    }
                }
            }
        }
        let keys = alternatives
            .iter()
            .flat_map(|alt| alt.keys.iter().cloned())
            .collect();
        Ok(Self { alternatives, keys })
    }

    /// The parameters this path expression declares, in capture order
    /// across all alternatives.
    pub fn keys(&self) -> &[PatternKey] {
        &self.keys
    }

    /// Tests the candidate with no inherited context.
    pub fn test(&self, path: &str) -> Option<PathMatch> {
        self.match_path(path, &[], &ParamsMap::new())
    }

    /// Tests the candidate, merging inherited keys and parameters into the
    /// result. A capture overrides an inherited value of the same name;
    /// an optional parameter that did not capture leaves the inherited
    /// value in place.
    pub fn match_path(
        &self,
        path: &str,
        parent_keys: &[PatternKey],
        parent_params: &ParamsMap,
    ) -> Option<PathMatch> {
        for alt in &self.alternatives {
            let Some((consumed, values)) = alt.exec(path) else {
                continue;
            };
            let mut params = parent_params.clone();
            for (key, value) in alt.keys.iter().zip(values) {
                let Some(raw) = value else {
                    continue;
                };
                let name = key.name.to_param_key();
                if key.modifier.is_repeatable() {
                    let list = if raw.is_empty() {
                        Vec::new()
                    } else {
                        raw.split('/').map(unescape).collect()
                    };
                    params.replace_all(name, list);
                } else {
                    params.replace(name, unescape(&raw));
                }
            }
            let mut keys = parent_keys.to_vec();
            keys.extend(self.keys.iter().cloned());
            return Some(PathMatch {
                path: path[..consumed].to_string(),
                keys,
                params,
            });
        }
        None
    }
}

/// Shared store of compiled matchers, keyed by `(path, exact)`.
///
/// Each [`Resolver`](crate::Resolver) owns one; the
/// [`global`](Self::global) instance backs standalone tree matching.
/// Route sets are small and static for the life of a program, so entries
/// are never evicted.
#[derive(Debug, Clone, Default)]
pub struct MatcherCache {
    inner: Arc<RwLock<HashMap<(String, bool), Arc<Matcher>>>>,
}

impl MatcherCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default cache.
    pub fn global() -> &'static MatcherCache {
        static GLOBAL: Lazy<MatcherCache> = Lazy::new(MatcherCache::new);
        &GLOBAL
    }

    /// Returns the cached matcher for `(path, exact)`, compiling it on
    /// first use. Repeated calls hand out the identical `Arc`.
    pub fn get_or_compile(
        &self,
        path: &RoutePath,
        exact: bool,
    ) -> Result<Arc<Matcher>, PatternError> {
        let key = (path.cache_key(), exact);
        if let Some(matcher) = self.inner.read().or_poisoned().get(&key) {
            return Ok(Arc::clone(matcher));
        }
        let compiled = Arc::new(Matcher::compile(path, exact)?);
        Ok(Arc::clone(
            self.inner
                .write()
                .or_poisoned()
                .entry(key)
                .or_insert(compiled),
        ))
    }
}
