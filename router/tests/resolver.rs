use futures::executor::block_on;
use std::{
    fmt,
    sync::{Arc, Mutex},
};
use waypoint_router::{
    ActionError, ActionResult, ResolveError, ResolveRequest, Resolver, Route,
};

#[derive(Debug)]
struct Boom;

impl fmt::Display for Boom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("boom")
    }
}

impl std::error::Error for Boom {}

#[test]
fn actions_run_in_tree_order_until_one_accepts() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let splat_log = Arc::clone(&log);
    let child_log = Arc::clone(&log);

    let resolver = Resolver::new([
        Route::new("/:rest*").action(move |_, _| {
            let log = Arc::clone(&splat_log);
            async move {
                log.lock().unwrap().push("splat");
                Ok(ActionResult::Continue)
            }
        }),
        Route::new("/a").child(Route::new("/b").action(move |_, _| {
            let log = Arc::clone(&child_log);
            async move {
                log.lock().unwrap().push("b");
                Ok(ActionResult::Found("done"))
            }
        })),
    ])
    .unwrap();

    let context = block_on(resolver.resolve("/a/b")).unwrap();
    assert_eq!(context.result, Some("done"));
    assert_eq!(log.lock().unwrap().as_slice(), ["splat", "b"]);
    // the declined branch was pruned from the chain
    let chain: Vec<&str> = context
        .chain
        .iter()
        .map(|entry| entry.route.path().as_str())
        .collect();
    assert_eq!(chain, ["/a", "/b"]);
}

#[test]
fn backtracks_to_a_matching_sibling() {
    let resolver = Resolver::with_root(Route::new("/a").children([
        Route::new("/b").child(
            Route::new("/c")
                .action(|_, _| async { Ok(ActionResult::Continue) }),
        ),
        Route::new("/b/c")
            .action(|_, _| async { Ok(ActionResult::Found("sibling")) }),
    ]))
    .unwrap();

    let context = block_on(resolver.resolve("/a/b/c")).unwrap();
    assert_eq!(context.result, Some("sibling"));
    let chain: Vec<&str> = context
        .chain
        .iter()
        .map(|entry| entry.route.path().as_str())
        .collect();
    assert_eq!(chain, ["/a", "/b/c"]);
}

#[test]
fn skip_subtree_excludes_the_declining_routes_children() {
    let inner_ran = Arc::new(Mutex::new(false));
    let inner_flag = Arc::clone(&inner_ran);

    let resolver = Resolver::new([
        Route::new("/a")
            .action(|_, _| async { Ok(ActionResult::SkipSubtree) })
            .child(Route::new("/b").action(move |_, _| {
                let flag = Arc::clone(&inner_flag);
                async move {
                    *flag.lock().unwrap() = true;
                    Ok(ActionResult::Found("inner"))
                }
            })),
        Route::new("/a/b")
            .action(|_, _| async { Ok(ActionResult::Found("outer")) }),
    ])
    .unwrap();

    let context = block_on(resolver.resolve("/a/b")).unwrap();
    assert_eq!(context.result, Some("outer"));
    assert!(!*inner_ran.lock().unwrap());
}

#[test]
fn empty_tree_resolves_to_404() {
    let resolver = Resolver::<()>::new([]).unwrap();
    let err = block_on(resolver.resolve("/")).unwrap_err();
    assert!(matches!(err, ResolveError::NotFound { .. }));
    assert_eq!(err.code(), 404);
    assert_eq!(err.context().pathname, "/");
    assert!(err.to_string().contains('/'));
}

#[test]
fn action_errors_are_annotated_and_identity_preserved() {
    let resolver = Resolver::new([Route::new("/a").action(|_, _| async {
        Err::<ActionResult<()>, _>(ActionError::new(Boom))
    })])
    .unwrap();

    let err = block_on(resolver.resolve("/a")).unwrap_err();
    assert_eq!(err.code(), 500);
    assert_eq!(err.context().pathname, "/a");
    assert_eq!(err.context().route_path.as_deref(), Some("/a"));
    let ResolveError::Action { source, .. } = err else {
        panic!("expected an action error");
    };
    assert!(source.get_ref().downcast_ref::<Boom>().is_some());
}

#[test]
fn preexisting_error_codes_are_kept() {
    let resolver = Resolver::new([Route::new("/a").action(|_, _| async {
        Err::<ActionResult<()>, _>(ActionError::with_code(403, Boom))
    })])
    .unwrap();

    let err = block_on(resolver.resolve("/a")).unwrap_err();
    assert_eq!(err.code(), 403);
}

#[test]
fn error_handler_substitutes_the_result() {
    let resolver = Resolver::<&'static str>::new([])
        .unwrap()
        .error_handler(|err| {
            if err.code() == 404 {
                "missing"
            } else {
                "broken"
            }
        });
    let context = block_on(resolver.resolve("/nowhere")).unwrap();
    assert_eq!(context.result, Some("missing"));
}

#[test]
fn next_resolves_deeper_candidates_first() {
    let resolver = Resolver::new([Route::new("/a")
        .action(|_, next| async move {
            match next.run().await? {
                ActionResult::NotFound => {
                    Ok(ActionResult::Found("parent fallback"))
                }
                found => Ok(found),
            }
        })
        .child(
            Route::new("/b")
                .action(|_, _| async { Ok(ActionResult::Found("child")) }),
        )])
    .unwrap();

    let context = block_on(resolver.resolve("/a/b")).unwrap();
    assert_eq!(context.result, Some("child"));
    assert_eq!(context.route.path().as_str(), "/b");
}

#[test]
fn next_is_scoped_to_the_actions_subtree() {
    // the first `/a` looks past itself; its subtree has nothing for the
    // pathname, so `run` answers NotFound without consuming the sibling
    let resolver = Resolver::new([
        Route::new("/a")
            .action(|_, next| async move {
                match next.run().await? {
                    ActionResult::NotFound => Ok(ActionResult::Continue),
                    found => Ok(found),
                }
            })
            .child(
                Route::new("/nope").action(|_, _| async {
                    Ok(ActionResult::Found("never"))
                }),
            ),
        Route::new("/a")
            .action(|_, _| async { Ok(ActionResult::Found("second")) }),
    ])
    .unwrap();

    let context = block_on(resolver.resolve("/a")).unwrap();
    assert_eq!(context.result, Some("second"));
}

#[test]
fn custom_resolve_route_seam_bypasses_actions() {
    let resolver = Resolver::new([Route::new("/a")
        .named("target")
        .action(|_, _| async { Ok(ActionResult::Found("action")) })])
    .unwrap()
    .resolve_route(|ctx, _| async move {
        if ctx.route.name() == Some("target") {
            Ok(ActionResult::Found("seam"))
        } else {
            Ok(ActionResult::Continue)
        }
    });

    let context = block_on(resolver.resolve("/a")).unwrap();
    assert_eq!(context.result, Some("seam"));
}

#[test]
fn routes_can_be_replaced_wholesale() {
    let resolver = Resolver::new([Route::new("/old")
        .action(|_, _| async { Ok(ActionResult::Found("old")) })])
    .unwrap();
    assert_eq!(resolver.get_routes().len(), 1);

    resolver
        .set_routes([Route::new("/new")
            .action(|_, _| async { Ok(ActionResult::Found("new")) })])
        .unwrap();
    let context = block_on(resolver.resolve("/new")).unwrap();
    assert_eq!(context.result, Some("new"));
    assert_eq!(block_on(resolver.resolve("/old")).unwrap_err().code(), 404);

    resolver.remove_routes();
    assert!(resolver.get_routes().is_empty());
}

#[test]
fn set_routes_validates_shape() {
    let resolver = Resolver::<()>::new([]).unwrap();
    let err = resolver.set_routes([Route::new("/inert")]).unwrap_err();
    assert_eq!(err.path, "/inert");
}

#[test]
fn base_prefix_is_stripped_before_matching() {
    let resolver = Resolver::new([Route::new("/users/:id").action(
        |ctx, _| async move {
            Ok(ActionResult::Found(
                ctx.params.get("id").unwrap_or_default(),
            ))
        },
    )])
    .unwrap()
    .base("/app");

    let context = block_on(resolver.resolve("/app/users/7")).unwrap();
    assert_eq!(context.result.as_deref(), Some("7"));
    // the full pathname is preserved on the context
    assert_eq!(context.pathname, "/app/users/7");

    let err = block_on(resolver.resolve("/elsewhere")).unwrap_err();
    assert_eq!(err.code(), 404);
}

#[test]
fn request_state_reaches_actions() {
    let resolver = Resolver::new([Route::new("/a").action(
        |ctx, _| async move {
            let n = ctx
                .state
                .as_ref()
                .and_then(|state| state.downcast_ref::<u32>())
                .copied()
                .unwrap_or(0);
            Ok(ActionResult::Found(n))
        },
    )])
    .unwrap();

    let context = block_on(
        resolver.resolve(ResolveRequest::new("/a").with_state(42u32)),
    )
    .unwrap();
    assert_eq!(context.result, Some(42));
}

#[test]
fn malformed_patterns_fail_resolution_with_500() {
    let resolver = Resolver::new([Route::new("/a(")
        .action(|_, _| async { Ok(ActionResult::Found(())) })])
    .unwrap();
    let err = block_on(resolver.resolve("/a")).unwrap_err();
    assert_eq!(err.code(), 500);
    assert!(matches!(err, ResolveError::Pattern { .. }));
}

#[test]
fn a_resolver_can_serve_repeated_and_interleaved_calls() {
    let resolver = Resolver::new([Route::new("/n/:num").action(
        |ctx, _| async move {
            Ok(ActionResult::Found(ctx.params.get("num").unwrap_or_default()))
        },
    )])
    .unwrap();

    // each call owns its own context and iterator
    let first = resolver.resolve("/n/1");
    let second = resolver.resolve("/n/2");
    let second = block_on(second).unwrap();
    let first = block_on(first).unwrap();
    assert_eq!(first.result.as_deref(), Some("1"));
    assert_eq!(second.result.as_deref(), Some("2"));
}
