//! The dispatch side of the crate: turning a message into the ordered set
//! of handlers that should see it, running them, and combining what they
//! return into a single [`result::DispatchResult`].

pub mod config;
pub mod dispatcher;
pub mod registry;
pub mod result;
pub mod route;

pub use config::Config;
pub use dispatcher::{Dispatcher, DispatcherError};
pub use registry::{Handler, HandlerConfig, HandlerContext, HandlerRegistration, HandlerRegistry, Provider};
pub use result::{DispatchResult, ResultData, ResultValue, ValidationError, WireResult};
pub use route::{Route, RouteResolver, Routable};
