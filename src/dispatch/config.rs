//! Dispatcher construction parameters.

use std::sync::Arc;

use crate::dispatch::registry::HandlerRegistry;
use crate::dispatch::route::RouteResolver;
use crate::entity::commit::CommitContext;
use crate::pipeline::Processor;
use crate::scope::{EndpointId, MessageSerializer, RouteTransport, TypeResolver};

use super::dispatcher::MessageContext;

/// Immutable configuration a [`super::Dispatcher`] is built from.
///
/// Constructed with [`Config::new`] and customized through the builder
/// methods, all of which consume and return `self` so construction reads as
/// a single expression.
pub struct Config {
    pub(crate) local_endpoint: EndpointId,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) message_processors: Vec<Arc<dyn Processor<MessageContext>>>,
    pub(crate) commit_processors: Vec<Arc<dyn Processor<CommitContext>>>,
    pub(crate) route_resolvers: Vec<Arc<dyn RouteResolver>>,
    pub(crate) transport: Option<Arc<dyn RouteTransport>>,
    pub(crate) serializer: Option<Arc<dyn MessageSerializer>>,
    pub(crate) type_resolver: Option<Arc<dyn TypeResolver>>,
    pub(crate) enable_verbose_failure_results: bool,
}

impl Config {
    pub fn new(local_endpoint: EndpointId, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            local_endpoint,
            registry,
            message_processors: Vec::new(),
            commit_processors: Vec::new(),
            route_resolvers: Vec::new(),
            transport: None,
            serializer: None,
            type_resolver: None,
            enable_verbose_failure_results: false,
        }
    }

    #[must_use]
    pub fn with_message_processor(mut self, processor: Arc<dyn Processor<MessageContext>>) -> Self {
        self.message_processors.push(processor);
        self
    }

    #[must_use]
    pub fn with_commit_processor(mut self, processor: Arc<dyn Processor<CommitContext>>) -> Self {
        self.commit_processors.push(processor);
        self
    }

    #[must_use]
    pub fn with_route_resolver(mut self, resolver: Arc<dyn RouteResolver>) -> Self {
        self.route_resolvers.push(resolver);
        self
    }

    /// Required for messages whose route isn't served by a locally
    /// registered handler to be forwarded across the cluster.
    #[must_use]
    pub fn with_remote_routing(
        mut self,
        transport: Arc<dyn RouteTransport>,
        serializer: Arc<dyn MessageSerializer>,
        type_resolver: Arc<dyn TypeResolver>,
    ) -> Self {
        self.transport = Some(transport);
        self.serializer = Some(serializer);
        self.type_resolver = Some(type_resolver);
        self
    }

    /// When set, an uncaught handler error's message is preserved verbatim
    /// in [`crate::dispatch::DispatchResult::Failure`]; when unset, it is
    /// replaced with a generic message to avoid leaking internal detail
    /// across a dispatch boundary a caller doesn't control.
    #[must_use]
    pub fn with_verbose_failure_results(mut self, enabled: bool) -> Self {
        self.enable_verbose_failure_results = enabled;
        self
    }
}
