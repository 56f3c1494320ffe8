//! Mapping from message type to the ordered set of handlers registered to
//! receive it, plus the immutable [`Provider`] snapshot the dispatcher reads
//! from on the hot path.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::dispatch::result::DispatchResult;
use crate::dispatch::route::Route;
use crate::message::{DispatchData, Headers, Message, MessageType};
use crate::scope::ServiceScope;

/// Flags controlling when a registered handler is eligible for invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerConfig {
    /// Invoked only in publish (broadcast) mode; skipped in single-handler
    /// dispatch.
    pub publish_only: bool,
    /// Invoked only when the dispatch originated in the local endpoint.
    pub local_dispatch_only: bool,
    /// Not preserved when the registry's non-transient registrations are
    /// snapshotted for announcement to a [`crate::scope::RouteTransport`].
    pub transient: bool,
}

impl HandlerConfig {
    pub fn publish_only() -> Self {
        Self {
            publish_only: true,
            ..Default::default()
        }
    }

    pub fn local_dispatch_only() -> Self {
        Self {
            local_dispatch_only: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

/// Per-request context handed to a [`Handler`] invocation: carries the
/// entity storage scope, dispatch flags, and cancellation.
pub struct HandlerContext {
    pub publish: bool,
    pub local_dispatch: bool,
    pub cancellation: tokio_util::sync::CancellationToken,
}

/// Implemented by application code for a specific message type `T`. Adapted
/// internally into a type-erased [`ErasedHandler`] so the registry can hold
/// handlers for many different `T`s in one collection.
#[async_trait]
pub trait Handler<T>: Send + Sync
where
    T: Message,
{
    async fn handle(&self, message: DispatchData<T>, ctx: &mut HandlerContext) -> DispatchResult;
}

#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    /// Takes the payload by shared reference rather than by value: a publish
    /// fan-out hands the same in-flight message to every matching handler,
    /// so each invocation downcasts and clones its own owned copy instead of
    /// consuming a shared one.
    async fn handle_erased(
        &self,
        message: &dyn Message,
        headers: Headers,
        ctx: &mut HandlerContext,
    ) -> DispatchResult;
}

struct HandlerAdapter<T, H> {
    handler: H,
    _marker: std::marker::PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, H> ErasedHandler for HandlerAdapter<T, H>
where
    T: Message + Clone + 'static,
    H: Handler<T>,
{
    async fn handle_erased(
        &self,
        message: &dyn Message,
        headers: Headers,
        ctx: &mut HandlerContext,
    ) -> DispatchResult {
        match message.downcast_ref::<T>() {
            Some(payload) => {
                self.handler
                    .handle(
                        DispatchData {
                            message: payload.clone(),
                            headers,
                        },
                        ctx,
                    )
                    .await
            }
            // Programmer error: a handler was registered for `T` but the
            // registry dispatched a payload of a different concrete type.
            // Never propagated as a panic -- surfaced as a generic failure,
            // same as any other uncaught handler error (see spec §7).
            None => DispatchResult::failure(
                "handler registered for a message type that does not match the payload",
            ),
        }
    }
}

/// A registered handler: which message type it answers to, the factory used
/// to instantiate it per-scope, and its [`HandlerConfig`] flags.
#[derive(Clone)]
pub struct HandlerRegistration {
    pub(crate) message_type: MessageType,
    pub(crate) handler_type: TypeId,
    pub(crate) config: HandlerConfig,
    pub(crate) factory: Arc<dyn Fn(&dyn ServiceScope) -> Arc<dyn ErasedHandler> + Send + Sync>,
}

impl HandlerRegistration {
    /// Builds a registration for handler type `H`, answering message type
    /// `T`. `H`'s [`TypeId`] is used as the handler's identity: at most one
    /// registration with the same `(message_type, H)` pair can exist in a
    /// registry at a time.
    pub fn new<T, H>(config: HandlerConfig, factory: impl Fn(&dyn ServiceScope) -> H + Send + Sync + 'static) -> Self
    where
        T: Message + Clone + 'static,
        H: Handler<T> + 'static,
    {
        Self {
            message_type: MessageType::of::<T>(),
            handler_type: TypeId::of::<H>(),
            config,
            factory: Arc::new(move |scope| {
                Arc::new(HandlerAdapter {
                    handler: factory(scope),
                    _marker: std::marker::PhantomData,
                }) as Arc<dyn ErasedHandler>
            }),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The route this registration answers to, derived from its message
    /// type. Matched against a message's route hierarchy (see
    /// [`crate::dispatch::route`]) rather than its exact concrete type, so a
    /// handler registered for a base message type also answers for any
    /// message whose hierarchy descends through it.
    pub fn route(&self) -> Route {
        self.message_type.into()
    }

    pub fn config(&self) -> HandlerConfig {
        self.config
    }

    /// Identity used for the registry's `(messageType, handler identity)`
    /// uniqueness invariant.
    fn identity(&self) -> (MessageType, TypeId) {
        (self.message_type, self.handler_type)
    }
}

/// Synthesizes per-message-type registrations on demand at resolution time,
/// for generic/open handlers that aren't bound to one concrete message type
/// ahead of registration.
pub trait RegistrationFactory: Send + Sync {
    fn create_for(&self, route: &Route) -> Option<HandlerRegistration>;
}

#[derive(Default)]
struct RegistryState {
    registrations: Vec<HandlerRegistration>,
    factories: Vec<Arc<dyn RegistrationFactory>>,
}

/// Mutable mapping from message type to ordered handler registrations.
/// Guarded by a single lock; reads go through the immutable [`Provider`]
/// snapshot instead, which is rebuilt (and cached) lazily after a mutation.
pub struct HandlerRegistry {
    state: RwLock<RegistryState>,
    provider: RwLock<Option<Arc<Provider>>>,
    change: tokio::sync::watch::Sender<u64>,
    version: std::sync::atomic::AtomicU64,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let (change, _) = tokio::sync::watch::channel(0);
        Self {
            state: RwLock::default(),
            provider: RwLock::new(None),
            change,
            version: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to registry-change notifications; fires after every
    /// observable [`Self::register`], [`Self::unregister`],
    /// [`Self::register_factory`] or [`Self::unregister_factory`].
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<u64> {
        self.change.subscribe()
    }

    /// Registers a handler. Re-registering an equal `(messageType, handler)`
    /// pair replaces the existing entry in-place, preserving its position in
    /// the fan-out order, and returns `false`. A genuinely new registration
    /// is appended and returns `true`.
    pub fn register(&self, registration: HandlerRegistration) -> bool {
        let mut state = self.state.write().expect("registry lock poisoned");
        let identity = registration.identity();

        if let Some(existing) = state
            .registrations
            .iter_mut()
            .find(|r| r.identity() == identity)
        {
            *existing = registration;
            self.invalidate();
            return false;
        }

        state.registrations.push(registration);
        drop(state);
        self.invalidate();
        true
    }

    /// Unregisters the handler matching `registration`'s identity. Returns
    /// whether an entry was actually removed.
    pub fn unregister(&self, registration: &HandlerRegistration) -> bool {
        let mut state = self.state.write().expect("registry lock poisoned");
        let identity = registration.identity();
        let before = state.registrations.len();
        state.registrations.retain(|r| r.identity() != identity);
        let changed = state.registrations.len() != before;
        drop(state);
        if changed {
            self.invalidate();
        }
        changed
    }

    pub fn register_factory(&self, factory: Arc<dyn RegistrationFactory>) {
        self.state
            .write()
            .expect("registry lock poisoned")
            .factories
            .push(factory);
        self.invalidate();
    }

    pub fn unregister_factory(&self, factory: &Arc<dyn RegistrationFactory>) -> bool {
        let mut state = self.state.write().expect("registry lock poisoned");
        let before = state.factories.len();
        state.factories.retain(|f| !Arc::ptr_eq(f, factory));
        let changed = state.factories.len() != before;
        drop(state);
        if changed {
            self.invalidate();
        }
        changed
    }

    /// Non-transient registrations only, for announcing routes to a
    /// [`crate::scope::RouteTransport`] at dispatcher initialization.
    pub fn durable_registrations(&self) -> Vec<HandlerRegistration> {
        self.state
            .read()
            .expect("registry lock poisoned")
            .registrations
            .iter()
            .filter(|r| !r.config.transient)
            .cloned()
            .collect()
    }

    fn invalidate(&self) {
        *self.provider.write().expect("provider lock poisoned") = None;
        let next = self.version.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let _ = self.change.send(next);
    }

    /// Returns the current immutable [`Provider`] snapshot, rebuilding it if
    /// the registry changed since the last call.
    pub fn provider(&self) -> Arc<Provider> {
        if let Some(provider) = self.provider.read().expect("provider lock poisoned").clone() {
            return provider;
        }

        let state = self.state.read().expect("registry lock poisoned");
        let provider = Arc::new(Provider {
            registrations: state.registrations.clone(),
            factories: state.factories.clone(),
            cache: RwLock::new(HashMap::new()),
        });
        drop(state);

        *self.provider.write().expect("provider lock poisoned") = Some(provider.clone());
        provider
    }
}

/// Immutable snapshot of the registry's handler registrations, with a cached
/// lookup keyed by message type. Built once per registry mutation and shared
/// freely across concurrent dispatches.
pub struct Provider {
    registrations: Vec<HandlerRegistration>,
    factories: Vec<Arc<dyn RegistrationFactory>>,
    cache: RwLock<HashMap<Route, Arc<Vec<HandlerRegistration>>>>,
}

impl Provider {
    /// Ordered handler registrations for `route`: statically registered
    /// handlers first (in registration order), followed by any handler
    /// synthesized by a [`RegistrationFactory`].
    pub fn handler_registrations_for(&self, route: &Route) -> Arc<Vec<HandlerRegistration>> {
        if let Some(cached) = self.cache.read().expect("provider cache poisoned").get(route) {
            return cached.clone();
        }

        let mut handlers: Vec<HandlerRegistration> = self
            .registrations
            .iter()
            .filter(|r| r.route() == *route)
            .cloned()
            .collect();

        handlers.extend(self.factories.iter().filter_map(|f| f.create_for(route)));

        let handlers = Arc::new(handlers);
        self.cache
            .write()
            .expect("provider cache poisoned")
            .insert(route.clone(), handlers.clone());
        handlers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::NullServiceScope;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Ping;

    impl Message for Ping {
        fn message_type(&self) -> MessageType {
            MessageType::of::<Ping>()
        }
    }

    struct Echo;

    #[async_trait]
    impl Handler<Ping> for Echo {
        async fn handle(&self, _message: DispatchData<Ping>, _ctx: &mut HandlerContext) -> DispatchResult {
            DispatchResult::success()
        }
    }

    fn registration() -> HandlerRegistration {
        HandlerRegistration::new::<Ping, Echo>(HandlerConfig::default(), |_scope| Echo)
    }

    fn ping_route() -> Route {
        MessageType::of::<Ping>().into()
    }

    #[test]
    fn register_then_unregister_restores_prestate() {
        let registry = HandlerRegistry::new();
        let reg = registration();

        assert!(registry.register(reg.clone()));
        assert_eq!(
            registry.provider().handler_registrations_for(&ping_route()).len(),
            1
        );

        assert!(registry.unregister(&reg));
        assert_eq!(
            registry.provider().handler_registrations_for(&ping_route()).len(),
            0
        );
    }

    #[test]
    fn reregistering_equal_handler_preserves_position_and_returns_false() {
        let registry = HandlerRegistry::new();
        let reg = registration();

        assert!(registry.register(reg.clone()));
        assert!(!registry.register(reg));
    }

    #[tokio::test]
    async fn provider_snapshot_is_immutable_once_taken() {
        let registry = HandlerRegistry::new();
        registry.register(registration());

        let provider = registry.provider();
        let before = provider.handler_registrations_for(&ping_route()).len();

        registry.register(HandlerRegistration::new::<Ping, Echo>(
            HandlerConfig::default().transient(),
            |_scope| Echo,
        ));

        // The snapshot taken before the second registration is untouched.
        assert_eq!(provider.handler_registrations_for(&ping_route()).len(), before);
        // A freshly fetched provider sees the update.
        assert_eq!(
            registry.provider().handler_registrations_for(&ping_route()).len(),
            2
        );

        let _ = NullServiceScope;
    }
}
