//! End-to-end controller chain tests.
//!
//! Exercises the executor against in-memory controllers and a
//! deterministic test renderer: cache short-circuits, layout hand-off,
//! parallel includes, conditional GETs, and the error state.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tessera::cache::{CacheStore, Lifespan, RouteCache};
use tessera::chain::{
    ActionOutcome, CachePolicy, ChainExecutor, ControllerAction, ControllerCacheDirective,
    ControllerRegistry, Directives, ErrorHook, Handoff, IncludeSpec, Route, ViewRenderer,
};
use tessera::compress::IdentityCompressor;
use tessera::config::FrameworkConfig;
use tessera::error::ChainError;

/// Renders `<view>greeting [name:fragment]... main</view>`; the `broken`
/// view always fails.
struct TestRenderer;

#[async_trait]
impl ViewRenderer for TestRenderer {
    async fn render(&self, view: &str, context: &Value) -> Result<Bytes, ChainError> {
        if view == "broken" {
            return Err(ChainError::render_failure(view, "template exploded"));
        }
        let mut out = format!("<{view}>");
        if let Some(greeting) = context.get("greeting").and_then(Value::as_str) {
            out.push_str(greeting);
        }
        if let Some(includes) = context.get("include").and_then(Value::as_object) {
            for (name, entry) in includes {
                if let Some(fragment) = entry.get("output").and_then(Value::as_str) {
                    out.push_str(&format!("[{name}:{fragment}]"));
                }
            }
        }
        if let Some(main) = context.get("main").and_then(Value::as_str) {
            out.push_str(main);
        }
        out.push_str(&format!("</{view}>"));
        Ok(Bytes::from(out))
    }
}

struct TestAction {
    fragment: Value,
    directives: Directives,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl TestAction {
    fn new(fragment: Value, directives: Directives) -> Arc<Self> {
        Arc::new(Self {
            fragment,
            directives,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
        })
    }

    fn slow(fragment: Value, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fragment,
            directives: Directives::default(),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Some(delay),
        })
    }
}

#[async_trait]
impl ControllerAction for TestAction {
    async fn call(&self, _route: &Route, _context: &Value) -> Result<ActionOutcome, ChainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ActionOutcome {
            context: self.fragment.clone(),
            directives: self.directives.clone(),
        })
    }
}

struct FailingAction;

#[async_trait]
impl ControllerAction for FailingAction {
    async fn call(&self, _route: &Route, _context: &Value) -> Result<ActionOutcome, ChainError> {
        Err(ChainError::action("home", "boom"))
    }
}

#[derive(Default)]
struct RecordingHook {
    events: Mutex<Vec<(u16, String)>>,
}

impl ErrorHook for RecordingHook {
    fn on_error(&self, status: u16, message: &str) {
        self.events
            .lock()
            .expect("hook mutex")
            .push((status, message.to_string()));
    }
}

fn executor(store: &CacheStore, registry: ControllerRegistry) -> ChainExecutor {
    ChainExecutor::new(
        store.clone(),
        FrameworkConfig::default(),
        Arc::new(registry),
        Arc::new(TestRenderer),
        Arc::new(IdentityCompressor),
    )
}

#[tokio::test]
async fn renders_the_primary_controller() {
    let mut registry = ControllerRegistry::new();
    registry.register(
        "home",
        "handler",
        TestAction::new(json!({"greeting": "hello"}), Directives::default()),
    );

    let executor = executor(&CacheStore::new(), registry);
    let response = executor
        .resolve(&Route::new("/", "home"), "text/html", json!({}))
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.content_type, "text/html");
    assert_eq!(response.variants.identity, "<home>hello</home>");
}

#[tokio::test]
async fn controller_cache_hit_skips_the_controller_body() {
    let mut registry = ControllerRegistry::new();
    let action = TestAction::new(
        json!({"greeting": "hello"}),
        Directives {
            controller_cache: ControllerCacheDirective::Global(CachePolicy::fixed(
                Lifespan::Application,
            )),
            ..Directives::default()
        },
    );
    let calls = action.calls.clone();
    registry.register("home", "handler", action);

    let executor = executor(&CacheStore::new(), registry);
    let route = Route::new("/", "home");

    let first = executor.resolve(&route, "text/html", json!({})).await;
    let second = executor.resolve(&route, "text/html", json!({})).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.variants.identity, second.variants.identity);
    assert_eq!(second.variants.identity, "<home>hello</home>");
}

#[tokio::test(start_paused = true)]
async fn includes_merge_in_declaration_order() {
    let mut registry = ControllerRegistry::new();
    registry.register(
        "home",
        "handler",
        TestAction::new(
            json!({}),
            Directives {
                includes: vec![
                    IncludeSpec {
                        name: "alpha".to_string(),
                        controller: "alpha".to_string(),
                        action: "handler".to_string(),
                        view: None,
                    },
                    IncludeSpec {
                        name: "beta".to_string(),
                        controller: "beta".to_string(),
                        action: "handler".to_string(),
                        view: None,
                    },
                ],
                route_cache: Some(CachePolicy::fixed(Lifespan::Application)),
                ..Directives::default()
            },
        ),
    );
    // Alpha is slow, beta resolves first; declaration order must win.
    registry.register(
        "alpha",
        "handler",
        TestAction::slow(json!({"greeting": "A"}), Duration::from_millis(50)),
    );
    registry.register(
        "beta",
        "handler",
        TestAction::new(json!({"greeting": "B"}), Directives::default()),
    );

    let store = CacheStore::new();
    let executor = executor(&store, registry);
    let response = executor
        .resolve(&Route::new("/", "home"), "text/html", json!({}))
        .await;

    assert_eq!(response.status, 200);
    assert!(
        String::from_utf8_lossy(&response.variants.identity)
            .contains("[alpha:<alpha>A</alpha>][beta:<beta>B</beta>]")
    );

    // The merged context promoted into the route cache keeps both include
    // entries intact; the fast include did not clobber the slow one.
    let cached = RouteCache::new(store)
        .get_route("/", "text/html")
        .unwrap()
        .expect("route cached");
    assert_eq!(
        cached.context["include"]["alpha"]["output"],
        json!("<alpha>A</alpha>")
    );
    assert_eq!(
        cached.context["include"]["beta"]["output"],
        json!("<beta>B</beta>")
    );
}

#[tokio::test]
async fn handoff_wraps_the_primary_output_without_leaking_includes() {
    let mut registry = ControllerRegistry::new();
    let nav = TestAction::new(json!({"greeting": "N"}), Directives::default());
    let nav_calls = nav.calls.clone();
    registry.register("nav", "handler", nav);
    registry.register(
        "home",
        "handler",
        TestAction::new(
            json!({"greeting": "hello"}),
            Directives {
                includes: vec![IncludeSpec {
                    name: "nav".to_string(),
                    controller: "nav".to_string(),
                    action: "handler".to_string(),
                    view: None,
                }],
                handoff: Some(Handoff {
                    controller: "layout".to_string(),
                    action: None,
                    view: None,
                }),
                ..Directives::default()
            },
        ),
    );
    registry.register("layout", "handler", TestAction::new(json!({}), Directives::default()));

    let executor = executor(&CacheStore::new(), registry);
    let response = executor
        .resolve(&Route::new("/", "home"), "text/html", json!({}))
        .await;

    let body = String::from_utf8_lossy(&response.variants.identity).into_owned();
    assert!(body.starts_with("<layout>"));
    assert!(body.ends_with("</layout>"));
    // The primary controller's rendered output reached the layout.
    assert!(body.contains("<home>hello[nav:<nav>N</nav>]</home>"));
    // The include ran once; the hand-off did not re-trigger it.
    assert_eq!(nav_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cached_controller_still_hands_off_to_its_layout() {
    let mut registry = ControllerRegistry::new();
    let home = TestAction::new(
        json!({"greeting": "hello"}),
        Directives {
            controller_cache: ControllerCacheDirective::Global(CachePolicy::fixed(
                Lifespan::Application,
            )),
            handoff: Some(Handoff {
                controller: "layout".to_string(),
                action: None,
                view: None,
            }),
            ..Directives::default()
        },
    );
    let calls = home.calls.clone();
    registry.register("home", "handler", home);
    registry.register("layout", "handler", TestAction::new(json!({}), Directives::default()));

    let executor = executor(&CacheStore::new(), registry);
    let route = Route::new("/", "home");

    let first = executor.resolve(&route, "text/html", json!({})).await;
    let second = executor.resolve(&route, "text/html", json!({})).await;

    // The hit skipped the controller body but still walked the hand-off,
    // so both responses are wrapped by the layout and byte-identical.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.variants.identity, second.variants.identity);
    let body = String::from_utf8_lossy(&second.variants.identity).into_owned();
    assert!(body.starts_with("<layout>"));
    assert!(body.contains("<home>hello</home>"));
}

#[tokio::test]
async fn view_override_keeps_the_fragment_cache_effective() {
    let mut registry = ControllerRegistry::new();
    let action = TestAction::new(
        json!({"greeting": "hello"}),
        Directives {
            controller_cache: ControllerCacheDirective::Global(CachePolicy::fixed(
                Lifespan::Application,
            )),
            view: Some("fancy".to_string()),
            ..Directives::default()
        },
    );
    let calls = action.calls.clone();
    registry.register("home", "handler", action);

    let executor = executor(&CacheStore::new(), registry);
    let route = Route::new("/", "home");

    let first = executor.resolve(&route, "text/html", json!({})).await;
    let second = executor.resolve(&route, "text/html", json!({})).await;

    // The write-back landed under the same key the probe uses, so the
    // second request is a hit despite the overridden view.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.variants.identity, "<fancy>hello</fancy>");
    assert_eq!(first.variants.identity, second.variants.identity);
}

#[tokio::test]
async fn failed_renders_are_not_written_back_to_the_caches() {
    let mut registry = ControllerRegistry::new();
    let action = TestAction::new(
        json!({"greeting": "hello"}),
        Directives {
            controller_cache: ControllerCacheDirective::Global(CachePolicy::fixed(
                Lifespan::Application,
            )),
            route_cache: Some(CachePolicy::fixed(Lifespan::Application)),
            view: Some("broken".to_string()),
            ..Directives::default()
        },
    );
    let calls = action.calls.clone();
    registry.register("home", "handler", action);

    let store = CacheStore::new();
    let executor = executor(&store, registry);
    let route = Route::new("/", "home");

    let first = executor.resolve(&route, "text/html", json!({})).await;
    assert_eq!(first.status, 200);
    assert!(
        String::from_utf8_lossy(&first.variants.identity)
            .contains("Render failure in view `broken`")
    );

    // Neither the fragment nor the route entry was written, so the retry
    // re-executes the controller instead of serving the error text.
    executor.resolve(&route, "text/html", json!({})).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(
        RouteCache::new(store)
            .get_route("/", "text/html")
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn conditional_get_serves_304_on_matching_token() {
    let mut registry = ControllerRegistry::new();
    registry.register(
        "home",
        "handler",
        TestAction::new(
            json!({"greeting": "hello"}),
            Directives {
                route_cache: Some(CachePolicy::fixed(Lifespan::Application)),
                ..Directives::default()
            },
        ),
    );

    let executor = executor(&CacheStore::new(), registry);
    let route = Route::new("/", "home");

    let first = executor.resolve(&route, "text/html", json!({})).await;
    assert_eq!(first.status, 200);
    let token = first
        .headers
        .iter()
        .find(|(name, _)| name == "ETag")
        .map(|(_, value)| value.clone())
        .expect("cached response carries a validator token");

    let mut conditional = route.clone();
    conditional.if_none_match = Some(token);
    let not_modified = executor.resolve(&conditional, "text/html", json!({})).await;
    assert_eq!(not_modified.status, 304);
    assert!(not_modified.variants.identity.is_empty());

    let mut stale = route.clone();
    stale.if_none_match = Some("different-token".to_string());
    let full = executor.resolve(&stale, "text/html", json!({})).await;
    assert_eq!(full.status, 200);
    assert_eq!(full.variants.identity, first.variants.identity);
}

#[tokio::test]
async fn unknown_controller_produces_a_404_error_response() {
    let executor = executor(&CacheStore::new(), ControllerRegistry::new());
    let response = executor
        .resolve(&Route::new("/", "ghost"), "text/html", json!({}))
        .await;

    assert_eq!(response.status, 404);
    assert!(String::from_utf8_lossy(&response.variants.identity).contains("ghost"));
}

#[tokio::test]
async fn render_failure_downgrades_to_inline_error_text() {
    let mut registry = ControllerRegistry::new();
    registry.register(
        "home",
        "handler",
        TestAction::new(
            json!({"greeting": "hello"}),
            Directives {
                view: Some("broken".to_string()),
                ..Directives::default()
            },
        ),
    );

    let hook = Arc::new(RecordingHook::default());
    let executor = ChainExecutor::new(
        CacheStore::new(),
        FrameworkConfig::default(),
        Arc::new(registry),
        Arc::new(TestRenderer),
        Arc::new(IdentityCompressor),
    )
    .with_error_hook(hook.clone());

    let response = executor
        .resolve(&Route::new("/", "home"), "text/html", json!({}))
        .await;

    // The pipeline still completes with a 200; the broken link carries an
    // inline error body and the hook heard about it.
    assert_eq!(response.status, 200);
    assert!(
        String::from_utf8_lossy(&response.variants.identity)
            .contains("Render failure in view `broken`")
    );
    let events = hook.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, 500);
}

#[tokio::test]
async fn action_failure_produces_500_and_notifies_the_hook() {
    let mut registry = ControllerRegistry::new();
    registry.register("home", "handler", Arc::new(FailingAction));

    let hook = Arc::new(RecordingHook::default());
    let executor = ChainExecutor::new(
        CacheStore::new(),
        FrameworkConfig::default(),
        Arc::new(registry),
        Arc::new(TestRenderer),
        Arc::new(IdentityCompressor),
    )
    .with_error_hook(hook.clone());

    let response = executor
        .resolve(&Route::new("/", "home"), "text/html", json!({}))
        .await;

    assert_eq!(response.status, 500);
    let events = hook.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].1.contains("boom"));
}

#[tokio::test]
async fn unlisted_url_parameter_aborts_the_chain() {
    let mut registry = ControllerRegistry::new();
    let action = TestAction::new(
        json!({"greeting": "hello"}),
        Directives {
            controller_cache: ControllerCacheDirective::Global(CachePolicy::fixed(
                Lifespan::Application,
            )),
            ..Directives::default()
        },
    );
    let calls = action.calls.clone();
    registry.register("home", "handler", action);

    let executor = executor(&CacheStore::new(), registry);
    let mut route = Route::new("/", "home");
    route
        .url_params
        .insert("page".to_string(), "2".to_string());

    let response = executor.resolve(&route, "text/html", json!({})).await;
    assert_eq!(response.status, 500);
    assert!(String::from_utf8_lossy(&response.variants.identity).contains("page"));

    // Nothing was cached, so a retry executes the controller again.
    executor.resolve(&route, "text/html", json!({})).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn negotiation_prefers_the_heaviest_acceptable_type() {
    let mut registry = ControllerRegistry::new();
    registry.register(
        "home",
        "handler",
        TestAction::new(json!({"greeting": "hello"}), Directives::default()),
    );

    let executor = executor(&CacheStore::new(), registry);
    let response = executor
        .resolve(
            &Route::new("/", "home"),
            "text/html;q=0.5, application/json",
            json!({}),
        )
        .await;
    assert_eq!(response.content_type, "application/json");

    let response = executor
        .resolve(&Route::new("/", "home"), "image/png", json!({}))
        .await;
    assert_eq!(response.content_type, "text/plain");
}
