use crate::{
    error::{ActionError, ErrorContext, InvalidRouteError, ResolveError},
    matching::{MatchTree, MatcherCache, PatternError, RouteMatch},
    params::ParamsMap,
    route::{arc_children, ensure_routes, ActionFuture, ChildrenState, Route},
};
use futures::{future::BoxFuture, FutureExt};
use or_poisoned::OrPoisoned;
use std::{
    any::Any,
    borrow::Cow,
    fmt,
    future::Future,
    sync::{Arc, Mutex},
};

/// What an action decided about its matched route.
#[derive(Debug)]
pub enum ActionResult<T> {
    /// Accept: resolution stops and this value becomes the result.
    Found(T),
    /// Decline, but keep going; deeper candidates, including this route's
    /// own children, stay eligible.
    Continue,
    /// Decline and exclude this route's entire subtree from further
    /// consideration, resuming at the next sibling.
    SkipSubtree,
    /// The scoped-exhaustion sentinel [`Next::run`] settles to when the
    /// current subtree has nothing left; an action may return it verbatim.
    NotFound,
}

/// One accepted route on the currently-winning branch, root first.
#[derive(Debug)]
pub struct ChainEntry<T> {
    /// The pathname substring this route's own pattern consumed.
    pub path: String,
    /// The accepted route.
    pub route: Arc<Route<T>>,
}

impl<T> Clone for ChainEntry<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            route: Arc::clone(&self.route),
        }
    }
}

/// The state of one `resolve()` call, as an action sees it while running,
/// and, with `result` filled in, as the value a successful resolution
/// settles to.
pub struct ResolveContext<T> {
    /// The pathname being resolved, exactly as passed in.
    pub pathname: String,
    /// The route currently under evaluation.
    pub route: Arc<Route<T>>,
    /// The pathname substring consumed by that route's own pattern.
    pub path: String,
    /// Parameters accumulated from the tree root down to the current
    /// route.
    pub params: ParamsMap,
    /// Accepted routes along the currently-winning branch.
    pub chain: Vec<ChainEntry<T>>,
    /// Opaque caller payload from [`ResolveRequest::with_state`].
    pub state: Option<Arc<dyn Any + Send + Sync>>,
    /// The accepted result. `None` while actions are still running.
    pub result: Option<T>,
}

impl<T: fmt::Debug> fmt::Debug for ResolveContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveContext")
            .field("pathname", &self.pathname)
            .field("route", &self.route)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("chain", &self.chain)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

impl<T: Clone> Clone for ResolveContext<T> {
    fn clone(&self) -> Self {
        Self {
            pathname: self.pathname.clone(),
            route: Arc::clone(&self.route),
            path: self.path.clone(),
            params: self.params.clone(),
            chain: self.chain.clone(),
            state: self.state.clone(),
            result: self.result.clone(),
        }
    }
}

/// The input to [`Resolver::resolve`]: a pathname, plus whatever extra
/// state the caller wants threaded through to actions.
#[derive(Clone)]
pub struct ResolveRequest {
    pathname: String,
    state: Option<Arc<dyn Any + Send + Sync>>,
}

impl ResolveRequest {
    /// A request for the given pathname.
    pub fn new(pathname: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            state: None,
        }
    }

    /// Attaches an opaque payload, retrievable from
    /// [`ResolveContext::state`] inside actions.
    pub fn with_state(mut self, state: impl Any + Send + Sync) -> Self {
        self.state = Some(Arc::new(state));
        self
    }
}

impl fmt::Debug for ResolveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveRequest")
            .field("pathname", &self.pathname)
            .finish_non_exhaustive()
    }
}

impl From<&str> for ResolveRequest {
    fn from(pathname: &str) -> Self {
        Self::new(pathname)
    }
}

impl From<String> for ResolveRequest {
    fn from(pathname: String) -> Self {
        Self::new(pathname)
    }
}

/// The per-route resolution seam: turns one matched route into a
/// resolution outcome. The default implementation invokes the route's
/// action when present and continues otherwise.
pub type ResolveRouteFn<T> =
    Arc<dyn Fn(ResolveContext<T>, Next<T>) -> ActionFuture<T> + Send + Sync>;

fn default_resolve_route<T: Send + 'static>(
    ctx: ResolveContext<T>,
    next: Next<T>,
) -> ActionFuture<T> {
    match ctx.route.action.clone() {
        Some(action) => action(ctx, next),
        None => futures::future::ready(Ok(ActionResult::Continue)).boxed(),
    }
}

struct CurrentAttempt<T> {
    route: Arc<Route<T>>,
    path: String,
    params: ParamsMap,
}

struct ResolveState<T> {
    tree: MatchTree<T>,
    /// One-ahead lookahead: a candidate pulled by an inner `next` call but
    /// found out of scope is parked here for the enclosing call.
    buffered: Option<Option<RouteMatch<T>>>,
    last_route: Option<Arc<Route<T>>>,
    chain: Vec<ChainEntry<T>>,
    pathname: String,
    state: Option<Arc<dyn Any + Send + Sync>>,
    resolve_route: ResolveRouteFn<T>,
    current: Option<CurrentAttempt<T>>,
}

impl<T> ResolveState<T> {
    /// Keeps `chain` a single coherent root-to-leaf path: before appending
    /// a match, entries below its route's parent are discarded.
    fn update_chain(&mut self, m: &RouteMatch<T>) {
        if m.route.synthetic {
            return;
        }
        if let Some(parent) = m.route.parent() {
            while let Some(last) = self.chain.last() {
                if Arc::ptr_eq(&last.route, &parent) {
                    break;
                }
                self.chain.pop();
            }
        }
        self.chain.push(ChainEntry {
            path: m.path.clone(),
            route: Arc::clone(&m.route),
        });
    }

    fn context_for(&self, m: &RouteMatch<T>) -> ResolveContext<T> {
        ResolveContext {
            pathname: self.pathname.clone(),
            route: Arc::clone(&m.route),
            path: m.path.clone(),
            params: m.params.clone(),
            chain: self.chain.clone(),
            state: self.state.clone(),
            result: None,
        }
    }

    fn error_context(&self) -> ErrorContext {
        ErrorContext {
            pathname: self.pathname.clone(),
            route_path: self
                .current
                .as_ref()
                .map(|c| c.route.path().to_string()),
        }
    }

    fn final_context(
        &mut self,
        result: T,
        root: &Arc<Route<T>>,
    ) -> ResolveContext<T> {
        let (route, path, params) = match self.current.take() {
            Some(c) => (c.route, c.path, c.params),
            None => (Arc::clone(root), String::new(), ParamsMap::new()),
        };
        ResolveContext {
            pathname: self.pathname.clone(),
            route,
            path,
            params,
            chain: std::mem::take(&mut self.chain),
            state: self.state.clone(),
            result: Some(result),
        }
    }
}

enum StepOutcome<T> {
    Resolved(T),
    NotFound,
}

enum Failure {
    NotFound,
    Action(ActionError),
    Pattern(PatternError),
}

/// The driver loop behind both [`Resolver::resolve`] (`resume == true`)
/// and [`Next::run`] (`resume == false`, scoped to `parent`'s subtree).
fn advance<T>(
    state: Arc<Mutex<ResolveState<T>>>,
    resume: bool,
    parent: Arc<Route<T>>,
) -> BoxFuture<'static, Result<StepOutcome<T>, Failure>>
where
    T: Send + 'static,
{
    Box::pin(async move {
        let mut prev: Option<ActionResult<T>> = None;
        loop {
            let (ctx, next, resolve_route) = {
                let mut s = state.lock().or_poisoned();
                let skip =
                    if matches!(prev, Some(ActionResult::SkipSubtree)) {
                        s.last_route.clone()
                    } else {
                        None
                    };
                let step = match s.buffered.take() {
                    Some(step) => step,
                    None => {
                        s.tree.next(skip.as_ref()).map_err(Failure::Pattern)?
                    }
                };
                if !resume {
                    let in_scope = step
                        .as_ref()
                        .is_some_and(|m| m.route.is_descendant_of(&parent));
                    if !in_scope {
                        // not ours: park the candidate (or the exhaustion)
                        // for the enclosing call
                        s.buffered = Some(step);
                        return Ok(StepOutcome::NotFound);
                    }
                }
                let Some(m) = step else {
                    return Err(Failure::NotFound);
                };
                s.last_route = Some(Arc::clone(&m.route));
                s.update_chain(&m);
                s.current = Some(CurrentAttempt {
                    route: Arc::clone(&m.route),
                    path: m.path.clone(),
                    params: m.params.clone(),
                });
                let ctx = s.context_for(&m);
                let next = Next {
                    state: Arc::clone(&state),
                    parent: Arc::clone(&m.route),
                };
                (ctx, next, Arc::clone(&s.resolve_route))
            };

            #[cfg(feature = "tracing")]
            tracing::trace!(
                route = %ctx.route.path(),
                path = %ctx.path,
                "invoking route action"
            );
            let resolution =
                resolve_route(ctx, next).await.map_err(Failure::Action)?;
            match resolution {
                ActionResult::Found(value) => {
                    return Ok(StepOutcome::Resolved(value))
                }
                other => prev = Some(other),
            }
        }
    })
}

/// The continuation an action can use to look past itself: it resolves
/// deeper candidates scoped to the action's own subtree.
pub struct Next<T> {
    state: Arc<Mutex<ResolveState<T>>>,
    parent: Arc<Route<T>>,
}

impl<T> Clone for Next<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            parent: Arc::clone(&self.parent),
        }
    }
}

impl<T: Send + 'static> Next<T> {
    /// Resolves the routes below the current one.
    ///
    /// Settles to [`ActionResult::Found`] when a descendant produced a
    /// result, or [`ActionResult::NotFound`] when the subtree is
    /// exhausted. Candidates outside the subtree are left untouched for
    /// the enclosing resolution step.
    pub async fn run(&self) -> Result<ActionResult<T>, ActionError> {
        match advance(
            Arc::clone(&self.state),
            false,
            Arc::clone(&self.parent),
        )
        .await
        {
            Ok(StepOutcome::Resolved(value)) => Ok(ActionResult::Found(value)),
            Ok(StepOutcome::NotFound) | Err(Failure::NotFound) => {
                Ok(ActionResult::NotFound)
            }
            Err(Failure::Action(e)) => Err(e),
            Err(Failure::Pattern(e)) => Err(ActionError::new(e)),
        }
    }
}

/// Resolves pathnames against a route tree: candidates come out of the
/// tree in depth-first order, each matched route's action runs in turn,
/// and the first accepted result wins.
///
/// ```rust
/// use futures::executor::block_on;
/// use waypoint_router::{ActionResult, Resolver, Route};
///
/// let resolver = Resolver::new([
///     Route::new("/users/:id").action(|ctx, _next| async move {
///         Ok(ActionResult::Found(format!(
///             "user {}",
///             ctx.params.get_str("id").unwrap_or_default()
///         )))
///     }),
/// ])
/// .unwrap();
///
/// let context = block_on(resolver.resolve("/users/42")).unwrap();
/// assert_eq!(context.result.as_deref(), Some("user 42"));
/// ```
pub struct Resolver<T> {
    root: Arc<Route<T>>,
    base: Option<Cow<'static, str>>,
    cache: MatcherCache,
    resolve_route: ResolveRouteFn<T>,
    error_handler: Option<Arc<dyn Fn(&ResolveError) -> T + Send + Sync>>,
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("root", &self.root)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Resolver<T> {
    /// Builds a resolver over a list of top-level routes. The list is
    /// wrapped in a synthetic empty-path root that never appears in
    /// user-visible chains.
    pub fn new(
        routes: impl IntoIterator<Item = Route<T>>,
    ) -> Result<Self, InvalidRouteError> {
        let root =
            Arc::new(Route::synthetic_root(routes.into_iter().collect()));
        ensure_routes(&root.traversal_children().unwrap_or_default())?;
        Ok(Self::from_root(root))
    }

    /// Builds a resolver whose tree root is the given route itself.
    pub fn with_root(root: Route<T>) -> Result<Self, InvalidRouteError> {
        let root = Arc::new(root);
        ensure_routes(std::slice::from_ref(&root))?;
        Ok(Self::from_root(root))
    }

    fn from_root(root: Arc<Route<T>>) -> Self {
        Self {
            root,
            base: None,
            cache: MatcherCache::new(),
            resolve_route: Arc::new(default_resolve_route),
            error_handler: None,
        }
    }

    /// Sets a base prefix stripped from pathnames before matching. A
    /// pathname outside the base resolves to a not-found error.
    pub fn base(mut self, base: impl Into<Cow<'static, str>>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Replaces the per-route resolution seam. The default invokes the
    /// route's action if present and continues otherwise.
    pub fn resolve_route<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ResolveContext<T>, Next<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionResult<T>, ActionError>>
            + Send
            + 'static,
    {
        self.resolve_route = Arc::new(move |ctx, next| f(ctx, next).boxed());
        self
    }

    /// Installs an error handler. When resolution fails, its return value
    /// becomes the resolution's result instead of an `Err`.
    pub fn error_handler(
        mut self,
        f: impl Fn(&ResolveError) -> T + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Some(Arc::new(f));
        self
    }

    /// A shallow snapshot of the top-level route list. The returned
    /// routes are live tree nodes, shared with the resolver.
    pub fn get_routes(&self) -> Vec<Arc<Route<T>>> {
        self.root
            .traversal_children()
            .map(|children| children.to_vec())
            .unwrap_or_default()
    }

    /// Replaces the whole top-level route list after validating it.
    pub fn set_routes(
        &self,
        routes: impl IntoIterator<Item = Route<T>>,
    ) -> Result<(), InvalidRouteError> {
        let routes = arc_children(routes.into_iter().collect());
        ensure_routes(&routes)?;
        *self.root.children.write().or_poisoned() =
            ChildrenState::Static(routes);
        Ok(())
    }

    /// Removes every top-level route.
    pub fn remove_routes(&self) {
        *self.root.children.write().or_poisoned() =
            ChildrenState::Static(arc_children(Vec::new()));
    }

    /// Resolves a pathname.
    ///
    /// Candidates are pulled in depth-first tree order; each matched
    /// route's action runs sequentially and may suspend. The first action
    /// answering [`ActionResult::Found`] settles the call; exhaustion
    /// settles it with a 404 [`ResolveError`]; an action failure settles
    /// it with that error, annotated (see [`ResolveError::code`]).
    ///
    /// Concurrent calls on one resolver are independent: each owns its
    /// context and match iterator.
    pub async fn resolve(
        &self,
        request: impl Into<ResolveRequest>,
    ) -> Result<ResolveContext<T>, ResolveError> {
        let ResolveRequest { pathname, state } = request.into();
        #[cfg(feature = "tracing")]
        tracing::debug!(pathname = %pathname, "resolving");

        let Some((to_match, ignore_leading_slash)) =
            self.strip_base(&pathname)
        else {
            let err = ResolveError::NotFound {
                context: ErrorContext {
                    pathname: pathname.clone(),
                    route_path: None,
                },
            };
            return match &self.error_handler {
                Some(handler) => {
                    let result = handler(&err);
                    Ok(ResolveContext {
                        pathname,
                        route: Arc::clone(&self.root),
                        path: String::new(),
                        params: ParamsMap::new(),
                        chain: Vec::new(),
                        state,
                        result: Some(result),
                    })
                }
                None => Err(err),
            };
        };

        let tree = MatchTree::with_cache(
            Arc::clone(&self.root),
            to_match,
            ignore_leading_slash,
            Vec::new(),
            ParamsMap::new(),
            self.cache.clone(),
        );
        let shared = Arc::new(Mutex::new(ResolveState {
            tree,
            buffered: None,
            last_route: None,
            chain: Vec::new(),
            pathname,
            state,
            resolve_route: Arc::clone(&self.resolve_route),
            current: None,
        }));

        match advance(Arc::clone(&shared), true, Arc::clone(&self.root)).await
        {
            Ok(StepOutcome::Resolved(value)) => {
                let mut s = shared.lock().or_poisoned();
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    route = %s.current.as_ref().map(|c| c.route.path().to_string()).unwrap_or_default(),
                    "resolved"
                );
                Ok(s.final_context(value, &self.root))
            }
            Ok(StepOutcome::NotFound) | Err(Failure::NotFound) => {
                let context = shared.lock().or_poisoned().error_context();
                self.settle(ResolveError::NotFound { context }, &shared)
            }
            Err(Failure::Action(source)) => {
                let context = shared.lock().or_poisoned().error_context();
                let code = source.code().unwrap_or(500);
                self.settle(
                    ResolveError::Action {
                        context,
                        code,
                        source,
                    },
                    &shared,
                )
            }
            Err(Failure::Pattern(source)) => {
                let context = shared.lock().or_poisoned().error_context();
                self.settle(ResolveError::Pattern { context, source }, &shared)
            }
        }
    }

    fn settle(
        &self,
        err: ResolveError,
        shared: &Arc<Mutex<ResolveState<T>>>,
    ) -> Result<ResolveContext<T>, ResolveError> {
        #[cfg(feature = "tracing")]
        tracing::debug!(code = err.code(), error = %err, "resolution failed");
        match &self.error_handler {
            Some(handler) => {
                let result = handler(&err);
                let mut s = shared.lock().or_poisoned();
                Ok(s.final_context(result, &self.root))
            }
            None => Err(err),
        }
    }

    /// Base-prefix stripping. The remainder drops the separating slash,
    /// and matching then runs in ignore-leading-slash mode, as if an
    /// ancestor had already consumed it.
    fn strip_base<'a>(&self, pathname: &'a str) -> Option<(&'a str, bool)> {
        match &self.base {
            None => Some((pathname, false)),
            Some(base) => {
                let (base, path) = if base.starts_with('/') {
                    (
                        base.trim_start_matches('/'),
                        pathname.trim_start_matches('/'),
                    )
                } else {
                    (base.as_ref(), pathname)
                };
                let stripped = path.strip_prefix(base)?;
                Some((stripped.strip_prefix('/').unwrap_or(stripped), true))
            }
        }
    }
}
