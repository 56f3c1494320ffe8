//! A [`RouteTransport`] that simulates cross-endpoint delivery within a
//! single process: a stand-in for a real broker or service mesh, for tests
//! and local development.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use nexus::dispatch::{Dispatcher, Route};
use nexus::message::Headers;
use nexus::scope::{EndpointId, MessageSerializer, RouteTransport, Scope, TransportError, TypeResolver};

/// Routes a message to whichever locally-registered [`Dispatcher`] last
/// announced ownership of its route, decoding it with the shared
/// [`MessageSerializer`]/[`TypeResolver`] pair and re-entering that
/// dispatcher's handler pipeline directly.
pub struct LoopbackRouteTransport {
    serializer: Arc<dyn MessageSerializer>,
    type_resolver: Arc<dyn TypeResolver>,
    owners: RwLock<HashMap<Route, EndpointId>>,
    endpoints: RwLock<HashMap<EndpointId, Arc<Dispatcher>>>,
}

impl LoopbackRouteTransport {
    pub fn new(serializer: Arc<dyn MessageSerializer>, type_resolver: Arc<dyn TypeResolver>) -> Self {
        Self {
            serializer,
            type_resolver,
            owners: RwLock::new(HashMap::new()),
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Makes `dispatcher` reachable as `endpoint` for any route it
    /// subsequently announces.
    pub fn register_endpoint(&self, endpoint: EndpointId, dispatcher: Arc<Dispatcher>) {
        self.endpoints
            .write()
            .expect("transport registry lock poisoned")
            .insert(endpoint, dispatcher);
    }
}

#[async_trait]
impl RouteTransport for LoopbackRouteTransport {
    async fn announce(&self, scope: &Scope, routes: &[Route]) -> Result<(), TransportError> {
        let mut owners = self.owners.write().expect("transport registry lock poisoned");
        for route in routes {
            owners.insert(route.clone(), scope.endpoint.clone());
        }
        Ok(())
    }

    async fn send(&self, route: &Route, target: Option<&Scope>, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let endpoint = match target {
            // An explicit target scope is addressed directly -- it need not
            // have ever announced this route.
            Some(scope) => scope.endpoint.clone(),
            None => self
                .owners
                .read()
                .expect("transport registry lock poisoned")
                .get(route)
                .cloned()
                .ok_or_else(|| TransportError::NoRoute(route.clone()))?,
        };

        let dispatcher = self
            .endpoints
            .read()
            .expect("transport registry lock poisoned")
            .get(&endpoint)
            .cloned()
            .ok_or_else(|| TransportError::NoRoute(route.clone()))?;

        let message_type = self
            .type_resolver
            .resolve(route.as_str())
            .ok_or_else(|| TransportError::Send(format!("no type registered for route {route}")))?;

        let message = self
            .serializer
            .deserialize(message_type, &payload)
            .map_err(|err| TransportError::Send(err.to_string()))?;

        let result = dispatcher
            .dispatch_remote_payload(message, Headers::new(), false, CancellationToken::new())
            .await
            .map_err(|err| TransportError::Send(err.to_string()))?;

        self.serializer
            .serialize_result(&result)
            .map_err(|err| TransportError::Send(err.to_string()))
    }
}
