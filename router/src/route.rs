use crate::{
    error::{ActionError, InvalidRouteError},
    resolver::{ActionResult, Next, ResolveContext},
};
use futures::{future::BoxFuture, FutureExt};
use or_poisoned::OrPoisoned;
use std::{
    borrow::Cow,
    fmt,
    future::Future,
    sync::{Arc, RwLock, Weak},
};

/// The boxed future a route action evaluates to.
pub type ActionFuture<T> =
    BoxFuture<'static, Result<ActionResult<T>, ActionError>>;

pub(crate) type ActionFn<T> =
    Arc<dyn Fn(ResolveContext<T>, Next<T>) -> ActionFuture<T> + Send + Sync>;

pub(crate) type ChildrenFn<T> = Arc<dyn Fn() -> Vec<Route<T>> + Send + Sync>;

/// A route's path expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoutePath {
    /// A string pattern such as `"/users/:id"`.
    Pattern(Cow<'static, str>),
    /// Ordered alternative expressions; the first one stands in wherever a
    /// single representative path is needed.
    Alternatives(Vec<RoutePath>),
    /// A raw regular expression, matched as given.
    Regex(Cow<'static, str>),
}

impl RoutePath {
    /// The representative text of this path (the first alternative).
    pub fn as_str(&self) -> &str {
        match self {
            RoutePath::Pattern(p) | RoutePath::Regex(p) => p,
            RoutePath::Alternatives(list) => {
                list.first().map(RoutePath::as_str).unwrap_or("")
            }
        }
    }

    pub(crate) fn cache_key(&self) -> String {
        match self {
            RoutePath::Pattern(p) => format!("p:{p}"),
            RoutePath::Regex(p) => format!("r:{p}"),
            RoutePath::Alternatives(list) => {
                let mut out = String::from("a:");
                for path in list {
                    out.push_str(&path.cache_key());
                    out.push('\u{1}');
                }
                out
            }
        }
    }
}

impl fmt::Display for RoutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&'static str> for RoutePath {
    fn from(path: &'static str) -> Self {
        RoutePath::Pattern(Cow::Borrowed(path))
    }
}

impl From<String> for RoutePath {
    fn from(path: String) -> Self {
        RoutePath::Pattern(Cow::Owned(path))
    }
}

pub(crate) enum ChildrenState<T> {
    Leaf,
    Static(Arc<[Arc<Route<T>>]>),
    Deferred {
        load: ChildrenFn<T>,
        resolved: Option<Arc<[Arc<Route<T>>]>>,
    },
}

/// One node of the route tree.
///
/// A route carries a path expression, an optional action invoked when the
/// route matches during resolution, and optionally children, either as a
/// static list or as a deferred callback materialized on first traversal.
///
/// `T` is the resolution result type produced by actions.
///
/// ```rust
/// use waypoint_router::{ActionResult, Route};
///
/// let route: Route<&'static str> = Route::new("/users")
///     .action(|_ctx, _next| async { Ok(ActionResult::Continue) })
///     .child(
///         Route::new("/:id")
///             .action(|ctx, _next| async move {
///                 let _id = ctx.params.get("id");
///                 Ok(ActionResult::Found("user page"))
///             }),
///     );
/// ```
pub struct Route<T> {
    pub(crate) path: RoutePath,
    pub(crate) name: Option<Cow<'static, str>>,
    pub(crate) action: Option<ActionFn<T>>,
    pub(crate) children: RwLock<ChildrenState<T>>,
    pub(crate) parent: RwLock<Weak<Route<T>>>,
    pub(crate) synthetic: bool,
}

impl<T> fmt::Debug for Route<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("synthetic", &self.synthetic)
            .finish_non_exhaustive()
    }
}

impl<T> Route<T> {
    /// Creates a route for the given path expression.
    pub fn new(path: impl Into<RoutePath>) -> Self {
        Self {
            path: path.into(),
            name: None,
            action: None,
            children: RwLock::new(ChildrenState::Leaf),
            parent: RwLock::new(Weak::new()),
            synthetic: false,
        }
    }

    pub(crate) fn synthetic_root(children: Vec<Route<T>>) -> Self {
        let route = Self::new("");
        *route.children.write().or_poisoned() =
            ChildrenState::Static(arc_children(children));
        Self {
            synthetic: true,
            ..route
        }
    }

    /// Names the route. Names are carried through [`Resolver::get_routes`]
    /// consumers; the engine itself does not interpret them.
    ///
    /// [`Resolver::get_routes`]: crate::Resolver::get_routes
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches the action invoked when this route is matched.
    pub fn action<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn(ResolveContext<T>, Next<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionResult<T>, ActionError>>
            + Send
            + 'static,
    {
        self.action =
            Some(Arc::new(move |ctx, next| action(ctx, next).boxed()));
        self
    }

    /// Appends one child route.
    pub fn child(self, child: Route<T>) -> Self {
        let mut children = self.children.write().or_poisoned();
        *children = match std::mem::replace(&mut *children, ChildrenState::Leaf)
        {
            ChildrenState::Static(existing) => {
                let mut list = existing.to_vec();
                list.push(Arc::new(child));
                ChildrenState::Static(list.into())
            }
            _ => ChildrenState::Static(arc_children(vec![child])),
        };
        drop(children);
        self
    }

    /// Replaces this route's children with a static list.
    pub fn children(
        self,
        children: impl IntoIterator<Item = Route<T>>,
    ) -> Self {
        *self.children.write().or_poisoned() =
            ChildrenState::Static(arc_children(children.into_iter().collect()));
        self
    }

    /// Defers this route's children to a callback, invoked and cached the
    /// first time the subtree is traversed.
    pub fn deferred_children(
        self,
        load: impl Fn() -> Vec<Route<T>> + Send + Sync + 'static,
    ) -> Self {
        *self.children.write().or_poisoned() = ChildrenState::Deferred {
            load: Arc::new(load),
            resolved: None,
        };
        self
    }

    /// This route's path expression.
    pub fn path(&self) -> &RoutePath {
        &self.path
    }

    /// This route's name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the route declares children of any kind. A childless route
    /// must consume the entire remaining pathname to match.
    pub fn has_children(&self) -> bool {
        !matches!(&*self.children.read().or_poisoned(), ChildrenState::Leaf)
    }

    /// The parent recorded for this route during the last traversal that
    /// reached it.
    pub fn parent(&self) -> Option<Arc<Route<T>>> {
        self.parent.read().or_poisoned().upgrade()
    }

    /// Whether this route sits strictly below `ancestor`, according to the
    /// parent links recorded during traversal.
    pub fn is_descendant_of(&self, ancestor: &Arc<Route<T>>) -> bool {
        let mut current = self.parent();
        while let Some(route) = current {
            if Arc::ptr_eq(&route, ancestor) {
                return true;
            }
            current = route.parent();
        }
        false
    }

    pub(crate) fn set_parent(&self, parent: &Arc<Route<T>>) {
        *self.parent.write().or_poisoned() = Arc::downgrade(parent);
    }

    /// The materialized child list used for traversal. Deferred children
    /// are resolved here, once, and cached on the node; repeated matching
    /// reuses the cached list.
    pub(crate) fn traversal_children(
        &self,
    ) -> Option<Arc<[Arc<Route<T>>]>> {
        {
            let children = self.children.read().or_poisoned();
            match &*children {
                ChildrenState::Leaf => return None,
                ChildrenState::Static(list) => return Some(Arc::clone(list)),
                ChildrenState::Deferred {
                    resolved: Some(list),
                    ..
                } => return Some(Arc::clone(list)),
                ChildrenState::Deferred { resolved: None, .. } => {}
            }
        }
        let mut children = self.children.write().or_poisoned();
        match &mut *children {
            ChildrenState::Deferred { load, resolved } => {
                if let Some(list) = resolved {
                    return Some(Arc::clone(list));
                }
                let list = arc_children(load());
                *resolved = Some(Arc::clone(&list));
                Some(list)
            }
            ChildrenState::Leaf => None,
            ChildrenState::Static(list) => Some(Arc::clone(list)),
        }
    }
}

pub(crate) fn arc_children<T>(
    children: Vec<Route<T>>,
) -> Arc<[Arc<Route<T>>]> {
    children.into_iter().map(Arc::new).collect()
}

/// Checks that every route in the list can take part in resolution: a
/// route needs an action, or children it can delegate to.
pub(crate) fn ensure_routes<T>(
    routes: &[Arc<Route<T>>],
) -> Result<(), InvalidRouteError> {
    for route in routes {
        if route.action.is_none() && !route.has_children() {
            return Err(InvalidRouteError {
                path: route.path.to_string(),
                reason: "a route must define an action or children",
            });
        }
        let children = {
            let state = route.children.read().or_poisoned();
            match &*state {
                ChildrenState::Static(children) => Some(Arc::clone(children)),
                _ => None,
            }
        };
        if let Some(children) = children {
            ensure_routes(&children)?;
        }
    }
    Ok(())
}
