//! End-to-end dispatch scenarios: route-descend publish fan-out,
//! single-handler fall-through, handler-panic isolation, and remote routing
//! across two endpoints joined by an in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use nexus::dispatch::{
    Config, DispatchResult, Dispatcher, Handler, HandlerConfig, HandlerContext, HandlerRegistration, HandlerRegistry,
};
use nexus::message::{DispatchData, Message, MessageType};
use nexus::scope::{EndpointId, Scope};

use nexus_memory::JsonMessageSerializer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Base;

impl Message for Base {
    fn message_type(&self) -> MessageType {
        MessageType::of::<Base>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Derived;

impl Message for Derived {
    fn message_type(&self) -> MessageType {
        MessageType::of::<Derived>()
    }

    fn route_hierarchy(&self) -> Vec<nexus::dispatch::Route> {
        vec![
            MessageType::of::<Derived>().into(),
            MessageType::of::<Base>().into(),
        ]
    }
}

struct Counting(Arc<AtomicUsize>);

#[async_trait]
impl Handler<Base> for Counting {
    async fn handle(&self, _msg: DispatchData<Base>, _ctx: &mut HandlerContext) -> DispatchResult {
        self.0.fetch_add(1, Ordering::SeqCst);
        DispatchResult::success()
    }
}

#[async_trait]
impl Handler<Derived> for Counting {
    async fn handle(&self, _msg: DispatchData<Derived>, _ctx: &mut HandlerContext) -> DispatchResult {
        self.0.fetch_add(1, Ordering::SeqCst);
        DispatchResult::success()
    }
}

/// Publish mode schedules every handler across the whole route hierarchy
/// concurrently -- a handler at `Derived`'s own route and one reached only
/// via its declared base route both run.
#[tokio::test]
async fn publish_descends_the_route_hierarchy_and_runs_every_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(HandlerRegistry::new());

    registry.register(HandlerRegistration::new::<Derived, Counting>(
        HandlerConfig::default(),
        {
            let calls = calls.clone();
            move |_scope| Counting(calls.clone())
        },
    ));
    registry.register(HandlerRegistration::new::<Base, Counting>(
        HandlerConfig::default(),
        {
            let calls = calls.clone();
            move |_scope| Counting(calls.clone())
        },
    ));

    let dispatcher = Dispatcher::new(Config::new(EndpointId::new("local"), registry));
    dispatcher.initialize().await.unwrap();

    let result = dispatcher
        .dispatch(DispatchData::new(Derived), true, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

struct AlwaysDeclines;

#[async_trait]
impl Handler<Derived> for AlwaysDeclines {
    async fn handle(&self, _msg: DispatchData<Derived>, _ctx: &mut HandlerContext) -> DispatchResult {
        DispatchResult::dispatch_failure(MessageType::of::<Derived>())
    }
}

struct AlwaysSucceeds;

#[async_trait]
impl Handler<Base> for AlwaysSucceeds {
    async fn handle(&self, _msg: DispatchData<Base>, _ctx: &mut HandlerContext) -> DispatchResult {
        DispatchResult::success_with("handled at base".to_owned())
    }
}

/// Single-handler dispatch stops at the first handler, most-derived route
/// first, that does not report `DispatchFailure` -- a handler at the
/// derived route declining falls through to one registered at the base
/// route.
#[tokio::test]
async fn single_handler_dispatch_falls_through_a_declining_handler() {
    let registry = Arc::new(HandlerRegistry::new());

    registry.register(HandlerRegistration::new::<Derived, AlwaysDeclines>(
        HandlerConfig::default(),
        |_scope| AlwaysDeclines,
    ));
    registry.register(HandlerRegistration::new::<Base, AlwaysSucceeds>(
        HandlerConfig::default(),
        |_scope| AlwaysSucceeds,
    ));

    let dispatcher = Dispatcher::new(Config::new(EndpointId::new("local"), registry));
    dispatcher.initialize().await.unwrap();

    let result = dispatcher
        .dispatch(DispatchData::new(Derived), false, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.success_value::<String>(), Some(&"handled at base".to_owned()));
}

struct Panics;

#[async_trait]
impl Handler<Base> for Panics {
    async fn handle(&self, _msg: DispatchData<Base>, _ctx: &mut HandlerContext) -> DispatchResult {
        panic!("boom");
    }
}

/// A handler panic never unwinds past the dispatcher; it is caught and
/// surfaced as a `Failure` result instead.
#[tokio::test]
async fn a_handler_panic_is_isolated_into_a_failure_result() {
    let registry = Arc::new(HandlerRegistry::new());
    registry.register(HandlerRegistration::new::<Base, Panics>(
        HandlerConfig::default(),
        |_scope| Panics,
    ));

    let dispatcher = Dispatcher::new(Config::new(EndpointId::new("local"), registry));
    dispatcher.initialize().await.unwrap();

    let result = dispatcher
        .dispatch(DispatchData::new(Base), false, CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.is_success());
    assert!(matches!(result, DispatchResult::Failure { .. }));
}

struct Remote;

#[async_trait]
impl Handler<Base> for Remote {
    async fn handle(&self, _msg: DispatchData<Base>, _ctx: &mut HandlerContext) -> DispatchResult {
        DispatchResult::concurrency_issue()
    }
}

/// A message with no locally registered handler is forwarded over the
/// configured transport to whichever endpoint announced the route, and the
/// remote endpoint's actual result (not a blanket success) makes the round
/// trip back. Only the wire-representable fields survive the trip -- see
/// `WireResult` -- so this checks the outcome kind, not a typed payload.
#[tokio::test]
async fn dispatch_with_no_local_handler_is_forwarded_to_the_owning_remote_endpoint() {
    let serializer = Arc::new(JsonMessageSerializer::new());
    serializer.register::<Base>();
    let transport = Arc::new(nexus_memory::LoopbackRouteTransport::new(
        serializer.clone(),
        serializer.clone(),
    ));

    let remote_registry = Arc::new(HandlerRegistry::new());
    remote_registry.register(HandlerRegistration::new::<Base, Remote>(
        HandlerConfig::default(),
        |_scope| Remote,
    ));
    let remote = Arc::new(Dispatcher::new(
        Config::new(EndpointId::new("remote"), remote_registry).with_remote_routing(
            transport.clone(),
            serializer.clone(),
            serializer.clone(),
        ),
    ));
    transport.register_endpoint(EndpointId::new("remote"), remote.clone());
    remote.initialize().await.unwrap();

    let local_registry = Arc::new(HandlerRegistry::new());
    let local = Dispatcher::new(
        Config::new(EndpointId::new("local"), local_registry).with_remote_routing(
            transport.clone(),
            serializer.clone(),
            serializer,
        ),
    );
    local.initialize().await.unwrap();

    let result = local
        .dispatch(DispatchData::new(Base), false, CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.is_success());
    assert!(result.is_concurrency_issue());
}

struct LocalAlwaysSucceeds;

#[async_trait]
impl Handler<Base> for LocalAlwaysSucceeds {
    async fn handle(&self, _msg: DispatchData<Base>, _ctx: &mut HandlerContext) -> DispatchResult {
        DispatchResult::success_with("handled locally".to_owned())
    }
}

/// `dispatch_to_scope` aimed at a remote endpoint is directed only to
/// handlers in that scope -- a matching local handler is never consulted,
/// even though it would otherwise win an ordinary `dispatch`.
#[tokio::test]
async fn dispatch_to_a_remote_scope_skips_local_handlers_entirely() {
    let serializer = Arc::new(JsonMessageSerializer::new());
    serializer.register::<Base>();
    let transport = Arc::new(nexus_memory::LoopbackRouteTransport::new(
        serializer.clone(),
        serializer.clone(),
    ));

    let remote_registry = Arc::new(HandlerRegistry::new());
    remote_registry.register(HandlerRegistration::new::<Base, Remote>(
        HandlerConfig::default(),
        |_scope| Remote,
    ));
    let remote = Arc::new(Dispatcher::new(
        Config::new(EndpointId::new("remote"), remote_registry).with_remote_routing(
            transport.clone(),
            serializer.clone(),
            serializer.clone(),
        ),
    ));
    transport.register_endpoint(EndpointId::new("remote"), remote.clone());
    remote.initialize().await.unwrap();

    let local_registry = Arc::new(HandlerRegistry::new());
    local_registry.register(HandlerRegistration::new::<Base, LocalAlwaysSucceeds>(
        HandlerConfig::default(),
        |_scope| LocalAlwaysSucceeds,
    ));
    let local = Dispatcher::new(
        Config::new(EndpointId::new("local"), local_registry).with_remote_routing(
            transport.clone(),
            serializer.clone(),
            serializer,
        ),
    );
    local.initialize().await.unwrap();

    // An ordinary dispatch would be won by the local handler.
    let local_result = local
        .dispatch(DispatchData::new(Base), false, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(local_result.success_value::<String>(), Some(&"handled locally".to_owned()));

    // Targeting the remote scope explicitly reaches `Remote` instead, even
    // though a local handler for `Base` exists and would have matched.
    let remote_result = local
        .dispatch_to_scope(
            DispatchData::new(Base),
            false,
            Scope::endpoint(EndpointId::new("remote")),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(remote_result.is_concurrency_issue());
}

/// Targeting this endpoint's own scope (or a cluster-mate's) short-circuits
/// into an ordinary local dispatch rather than forcing a transport
/// round-trip to reach ourselves.
#[tokio::test]
async fn dispatch_to_own_scope_short_circuits_to_local_dispatch() {
    let registry = Arc::new(HandlerRegistry::new());
    registry.register(HandlerRegistration::new::<Base, LocalAlwaysSucceeds>(
        HandlerConfig::default(),
        |_scope| LocalAlwaysSucceeds,
    ));

    let dispatcher = Dispatcher::new(Config::new(EndpointId::new("local"), registry));
    dispatcher.initialize().await.unwrap();

    let result = dispatcher
        .dispatch_to_scope(
            DispatchData::new(Base),
            false,
            Scope::endpoint(EndpointId::new("local")),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.success_value::<String>(), Some(&"handled locally".to_owned()));
}

struct ObservesCancellation(Arc<AtomicUsize>);

#[async_trait]
impl Handler<Base> for ObservesCancellation {
    async fn handle(&self, _msg: DispatchData<Base>, ctx: &mut HandlerContext) -> DispatchResult {
        if ctx.cancellation.is_cancelled() {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        DispatchResult::success()
    }
}

/// A token canceled before dispatch is observed as already canceled inside
/// every handler it reaches -- the dispatcher fabricates no token of its own,
/// it only clones the caller's into each `HandlerContext`.
#[tokio::test]
async fn a_canceled_token_is_visible_to_every_scheduled_handler() {
    let observed = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(HandlerRegistry::new());
    registry.register(HandlerRegistration::new::<Base, ObservesCancellation>(
        HandlerConfig::default(),
        {
            let observed = observed.clone();
            move |_scope| ObservesCancellation(observed.clone())
        },
    ));

    let dispatcher = Dispatcher::new(Config::new(EndpointId::new("local"), registry));
    dispatcher.initialize().await.unwrap();

    let token = CancellationToken::new();
    token.cancel();

    let result = dispatcher
        .dispatch(DispatchData::new(Base), false, token)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(observed.load(Ordering::SeqCst), 1);
}
