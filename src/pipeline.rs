//! Generic "around" middleware chain shared by the message-processor
//! pipeline (wraps a single dispatch) and the commit-processor pipeline
//! (wraps a single commit attempt). A processor observes or rewrites its
//! context, calls [`Next::call`] to continue the chain, and can then inspect
//! the result and context the inner stages produced before returning.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatch::result::DispatchResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One stage of a pipeline. `Ctx` is owned by whichever stage currently
/// holds it; a processor that wants to read it after `next.call` returns
/// gets it back as part of the `(DispatchResult, Ctx)` pair.
#[async_trait]
pub trait Processor<Ctx>: Send + Sync
where
    Ctx: Send + 'static,
{
    async fn process(&self, ctx: Ctx, next: Next<Ctx>) -> (DispatchResult, Ctx);
}

/// The remainder of the chain, plus the terminal action to run once every
/// processor has called through.
pub struct Next<Ctx> {
    remaining: Arc<[Arc<dyn Processor<Ctx>>]>,
    index: usize,
    terminal: Arc<dyn Fn(Ctx) -> BoxFuture<'static, (DispatchResult, Ctx)> + Send + Sync>,
}

impl<Ctx> Next<Ctx>
where
    Ctx: Send + 'static,
{
    pub fn call(mut self, ctx: Ctx) -> BoxFuture<'static, (DispatchResult, Ctx)> {
        match self.remaining.get(self.index).cloned() {
            Some(processor) => {
                self.index += 1;
                Box::pin(async move { processor.process(ctx, self).await })
            }
            None => (self.terminal)(ctx),
        }
    }
}

/// An ordered, reusable list of processors. Built once (e.g. at dispatcher
/// construction) and run once per message or commit attempt.
pub struct Chain<Ctx> {
    processors: Arc<[Arc<dyn Processor<Ctx>>]>,
}

impl<Ctx> Chain<Ctx>
where
    Ctx: Send + 'static,
{
    pub fn new(processors: Vec<Arc<dyn Processor<Ctx>>>) -> Self {
        Self {
            processors: processors.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub async fn run(
        &self,
        ctx: Ctx,
        terminal: impl Fn(Ctx) -> BoxFuture<'static, (DispatchResult, Ctx)> + Send + Sync + 'static,
    ) -> (DispatchResult, Ctx) {
        let next = Next {
            remaining: self.processors.clone(),
            index: 0,
            terminal: Arc::new(terminal),
        };
        next.call(ctx).await
    }
}
