use crate::{
    matching::{MatcherCache, PathMatch, PatternError, PatternKey},
    params::ParamsMap,
    route::{Route, RoutePath},
};
use std::{borrow::Cow, sync::Arc};

/// One candidate yielded while matching a pathname against a route tree.
#[derive(Debug)]
pub struct RouteMatch<T> {
    /// The matched route.
    pub route: Arc<Route<T>>,
    /// The pathname substring consumed by this route's own pattern,
    /// ancestors excluded.
    pub path: String,
    /// Every parameter declared from the tree root down to this route.
    pub keys: Vec<PatternKey>,
    /// Parameter values accumulated from the root down to this route;
    /// never a sibling's or a descendant's.
    pub params: ParamsMap,
}

impl<T> Clone for RouteMatch<T> {
    fn clone(&self) -> Self {
        Self {
            route: Arc::clone(&self.route),
            path: self.path.clone(),
            keys: self.keys.clone(),
            params: self.params.clone(),
        }
    }
}

/// A leading `/` is significant only at the start of a branch. Once any
/// ancestor pattern began with a slash, descendants treat `/child` and
/// `child` as the same thing, so the slash is stripped before compiling.
fn apply_slash_regime(path: &RoutePath, ignore: bool) -> (RoutePath, bool) {
    match path {
        RoutePath::Pattern(p) => match p.strip_prefix('/') {
            Some(stripped) => {
                let adjusted = if ignore {
                    RoutePath::Pattern(Cow::Owned(stripped.to_string()))
                } else {
                    path.clone()
                };
                (adjusted, true)
            }
            None => (path.clone(), ignore),
        },
        RoutePath::Alternatives(list) => {
            let mut child_ignore = ignore;
            let adjusted = list
                .iter()
                .map(|alt| {
                    let (adjusted, slashed) = apply_slash_regime(alt, ignore);
                    child_ignore |= slashed;
                    adjusted
                })
                .collect();
            (RoutePath::Alternatives(adjusted), child_ignore)
        }
        RoutePath::Regex(_) => (path.clone(), ignore),
    }
}

enum OwnMatch {
    NotTried,
    Failed,
    Matched(PathMatch),
}

struct MatchFrame<T> {
    route: Arc<Route<T>>,
    pathname: String,
    pattern: RoutePath,
    child_ignore: bool,
    parent_keys: Vec<PatternKey>,
    parent_params: ParamsMap,
    own: OwnMatch,
    child_index: usize,
    child: Option<Box<MatchFrame<T>>>,
}

impl<T> MatchFrame<T> {
    fn new(
        route: Arc<Route<T>>,
        pathname: String,
        ignore_leading_slash: bool,
        parent_keys: Vec<PatternKey>,
        parent_params: ParamsMap,
    ) -> Self {
        let (pattern, child_ignore) =
            apply_slash_regime(route.path(), ignore_leading_slash);
        Self {
            route,
            pathname,
            pattern,
            child_ignore,
            parent_keys,
            parent_params,
            own: OwnMatch::NotTried,
            child_index: 0,
            child: None,
        }
    }

    fn next(
        &mut self,
        skip: Option<&Arc<Route<T>>>,
        cache: &MatcherCache,
    ) -> Result<Option<RouteMatch<T>>, PatternError> {
        if let Some(skip) = skip {
            if Arc::ptr_eq(&self.route, skip) {
                return Ok(None);
            }
        }

        if let OwnMatch::NotTried = self.own {
            // a childless route must consume the whole remainder
            let exact = !self.route.has_children();
            let matcher = cache.get_or_compile(&self.pattern, exact)?;
            return match matcher.match_path(
                &self.pathname,
                &self.parent_keys,
                &self.parent_params,
            ) {
                Some(own) => {
                    let value = RouteMatch {
                        route: Arc::clone(&self.route),
                        path: own.path.clone(),
                        keys: own.keys.clone(),
                        params: own.params.clone(),
                    };
                    self.own = OwnMatch::Matched(own);
                    Ok(Some(value))
                }
                None => {
                    self.own = OwnMatch::Failed;
                    Ok(None)
                }
            };
        }

        let OwnMatch::Matched(own) = &self.own else {
            return Ok(None);
        };
        let Some(children) = self.route.traversal_children() else {
            return Ok(None);
        };
        while self.child_index < children.len() {
            if self.child.is_none() {
                let child_route = Arc::clone(&children[self.child_index]);
                child_route.set_parent(&self.route);

                let mut consumed = own.path.len();
                if consumed > 0
                    && self.pathname.as_bytes().get(consumed) == Some(&b'/')
                {
                    consumed += 1;
                }
                self.child = Some(Box::new(MatchFrame::new(
                    child_route,
                    self.pathname[consumed..].to_string(),
                    self.child_ignore,
                    own.keys.clone(),
                    own.params.clone(),
                )));
            }
            if let Some(child) = self.child.as_mut() {
                if let Some(value) = child.next(skip, cache)? {
                    return Ok(Some(value));
                }
            }
            self.child = None;
            self.child_index += 1;
        }
        Ok(None)
    }
}

/// A lazy, depth-first, pre-order iterator over the matches a pathname
/// produces against a route tree.
///
/// Each pull may pass a route to skip: if the node about to be evaluated
/// is that route, its whole subtree is abandoned without being yielded.
/// This is how the resolution engine backtracks out of a subtree whose
/// action declined.
pub struct MatchTree<T> {
    frame: MatchFrame<T>,
    cache: MatcherCache,
}

impl<T> MatchTree<T> {
    /// Starts matching `pathname` against the tree rooted at `route`,
    /// using the process-wide matcher cache.
    pub fn new(
        route: Arc<Route<T>>,
        pathname: impl Into<String>,
        ignore_leading_slash: bool,
    ) -> Self {
        Self::with_cache(
            route,
            pathname,
            ignore_leading_slash,
            Vec::new(),
            ParamsMap::new(),
            MatcherCache::global().clone(),
        )
    }

    /// Starts matching with inherited keys/params and an explicit cache.
    pub fn with_cache(
        route: Arc<Route<T>>,
        pathname: impl Into<String>,
        ignore_leading_slash: bool,
        parent_keys: Vec<PatternKey>,
        parent_params: ParamsMap,
        cache: MatcherCache,
    ) -> Self {
        Self {
            frame: MatchFrame::new(
                route,
                pathname.into(),
                ignore_leading_slash,
                parent_keys,
                parent_params,
            ),
            cache,
        }
    }

    /// Pulls the next match, optionally skipping the subtree of `skip`.
    ///
    /// `Ok(None)` means the sequence is exhausted. A pattern that fails to
    /// compile surfaces as an error rather than a silent miss.
    pub fn next(
        &mut self,
        skip: Option<&Arc<Route<T>>>,
    ) -> Result<Option<RouteMatch<T>>, PatternError> {
        self.frame.next(skip, &self.cache)
    }
}

#[cfg(test)]
mod tests {
    use super::MatchTree;
    use crate::route::Route;
    use std::sync::Arc;

    fn paths_of<T>(mut tree: MatchTree<T>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(m) = tree.next(None).expect("patterns compile") {
            out.push(m.path.clone());
        }
        out
    }

    #[test]
    fn slash_reduces_to_empty_under_the_regime() {
        // '/a' consumed the branch slash, so the child '/' means ''
        let root: Arc<Route<()>> = Arc::new(
            Route::new("/a").child(Route::new("/")),
        );
        let tree = MatchTree::new(Arc::clone(&root), "/a", false);
        assert_eq!(paths_of(tree), vec!["/a".to_string(), String::new()]);
    }

    #[test]
    fn failed_root_yields_nothing() {
        let root: Arc<Route<()>> =
            Arc::new(Route::new("/a").child(Route::new("/b")));
        let mut tree = MatchTree::new(root, "/x", false);
        assert!(tree.next(None).expect("patterns compile").is_none());
        // exhausted iterators stay exhausted
        assert!(tree.next(None).expect("patterns compile").is_none());
    }

    #[test]
    fn compile_errors_propagate() {
        let root: Arc<Route<()>> = Arc::new(Route::new("/a(b"));
        let mut tree = MatchTree::new(root, "/a", false);
        assert!(tree.next(None).is_err());
    }
}
