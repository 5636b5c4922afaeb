//! Dispatch state machine.
//!
//! `ResolvingBefore → RunningBefore(i) → RunningHandler → RunningAfter(j) →
//! Completed`, with `Failed → RunningErrorChain(k) → Completed` reachable from
//! any state. Nothing escapes [`Router::dispatch`] as an `Err`.

use std::sync::Arc;

use {
    serde_json::Value,
    tracing::{Instrument, debug, debug_span, trace, warn},
};

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::{
    chain::{Next, Verdict},
    envelope::Envelope,
    error::{DispatchError, Stage},
    router::{ErrorContext, HandlerContext, MiddlewareEntry, RouteEntry, Router},
    slug::Slug,
};

/// Result of one dispatch.
#[derive(Debug, Clone)]
pub enum DispatchResult {
    /// Handler completed; `data` is its return value.
    Success { data: Value },
    /// A before-middleware withheld its continuation without raising. The
    /// handler and after-chain did not run and the envelope is not failed.
    Skipped { middleware: Slug },
    /// Something raised. The error is also the first new entry of
    /// `envelope.errors()`.
    Failure { error: DispatchError },
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success { data } => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&DispatchError> {
        match self {
            Self::Failure { error } => Some(error),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Skipped { .. } => "skipped",
            Self::Failure { .. } => "failure",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Before,
    After,
}

impl Phase {
    fn stage(self, slug: &Slug, index: usize) -> Stage {
        match self {
            Self::Before => Stage::Before {
                slug: slug.clone(),
                index,
            },
            Self::After => Stage::After {
                slug: slug.clone(),
                index,
            },
        }
    }
}

enum ChainOutcome {
    Completed,
    Stopped { slug: Slug },
}

enum RouteOutcome {
    Completed(Value),
    Skipped(Slug),
}

type Chain = Vec<(Slug, Arc<MiddlewareEntry>)>;

impl Router {
    /// Dispatch `envelope` to the route registered under `slug`.
    pub async fn dispatch(&self, slug: &str, envelope: &mut Envelope) -> DispatchResult {
        let span = debug_span!(
            "dispatch",
            route = slug,
            correlation_id = %envelope.correlation_id(),
            username = %envelope.username,
        );
        let result = self.dispatch_inner(slug, envelope).instrument(span).await;

        #[cfg(feature = "metrics")]
        counter!("switchboard_dispatch_total", "route" => slug.to_string(), "outcome" => result.label())
            .increment(1);

        debug!(route = slug, outcome = result.label(), "dispatch completed");
        result
    }

    async fn dispatch_inner(&self, slug: &str, envelope: &mut Envelope) -> DispatchResult {
        let Some(route) = self.routes.get(slug) else {
            let error = DispatchError::RouteNotFound {
                slug: slug.to_string(),
            };
            return self.fail(error, envelope, &Value::Null, slug).await;
        };

        match self.run_route(route, envelope).await {
            Ok(RouteOutcome::Completed(data)) => DispatchResult::Success { data },
            Ok(RouteOutcome::Skipped(middleware)) => {
                debug!(%middleware, "before-chain stopped without continuation");
                DispatchResult::Skipped { middleware }
            },
            Err(error) => self.fail(error, envelope, &route.meta, slug).await,
        }
    }

    async fn run_route(
        &self,
        route: &RouteEntry,
        envelope: &mut Envelope,
    ) -> Result<RouteOutcome, DispatchError> {
        trace!("resolving middleware chains");
        let before = self.collect_chain(route, &route.before)?;
        let after = self.collect_chain(route, &route.after)?;

        if let ChainOutcome::Stopped { slug } =
            self.run_chain(Phase::Before, &before, envelope).await?
        {
            return Ok(RouteOutcome::Skipped(slug));
        }

        trace!("running handler");
        let stage = Stage::Handler {
            route: route.slug.clone(),
        };
        let deps = self
            .deps
            .resolve_all(&route.deps)
            .map_err(|error| DispatchError::Resolution {
                stage: stage.clone(),
                error,
            })?;
        let data = route
            .handler
            .handle(HandlerContext {
                envelope: &mut *envelope,
                deps: &deps,
                meta: &route.meta,
            })
            .await
            .map_err(|cause| DispatchError::handler_failure(stage, cause))?;

        if let ChainOutcome::Stopped { slug } =
            self.run_chain(Phase::After, &after, envelope).await?
        {
            debug!(middleware = %slug, "after-chain stopped without continuation");
        }
        Ok(RouteOutcome::Completed(data))
    }

    /// Concatenate the stages registered under each slug, in slug order.
    fn collect_chain(&self, route: &RouteEntry, slugs: &[Slug]) -> Result<Chain, DispatchError> {
        let mut chain = Vec::new();
        for slug in slugs {
            let entries = self.middleware.get(slug).ok_or_else(|| {
                DispatchError::UnknownMiddlewareSlug {
                    route: route.slug.clone(),
                    slug: slug.clone(),
                }
            })?;
            chain.extend(entries.iter().map(|e| (slug.clone(), Arc::clone(e))));
        }
        Ok(chain)
    }

    async fn run_chain(
        &self,
        phase: Phase,
        chain: &Chain,
        envelope: &mut Envelope,
    ) -> Result<ChainOutcome, DispatchError> {
        for (index, (slug, entry)) in chain.iter().enumerate() {
            let stage = phase.stage(slug, index);
            trace!(%stage, "running middleware");
            let deps = self
                .deps
                .resolve_all(&entry.deps)
                .map_err(|error| DispatchError::Resolution {
                    stage: stage.clone(),
                    error,
                })?;

            let mut next = Next::default();
            entry
                .handler
                .handle(
                    HandlerContext {
                        envelope: &mut *envelope,
                        deps: &deps,
                        meta: &entry.meta,
                    },
                    &mut next,
                )
                .await
                .map_err(|cause| DispatchError::handler_failure(stage.clone(), cause))?;

            match next.verdict() {
                Verdict::Advance => {},
                Verdict::Stop => return Ok(ChainOutcome::Stopped { slug: slug.clone() }),
                Verdict::Repeated => return Err(DispatchError::DoubleContinuation { stage }),
            }
        }
        Ok(ChainOutcome::Completed)
    }

    async fn fail(
        &self,
        error: DispatchError,
        envelope: &mut Envelope,
        meta: &Value,
        route_slug: &str,
    ) -> DispatchResult {
        warn!(
            route = route_slug,
            correlation_id = %envelope.correlation_id(),
            kind = error.kind(),
            error = %error,
            "dispatch failed"
        );
        envelope.record_error(error.clone());
        self.run_error_chain(&error, envelope, meta, route_slug).await;
        DispatchResult::Failure { error }
    }

    /// Run error handlers in registration order until one stops the chain.
    ///
    /// Secondary failures are appended to the envelope and end the chain.
    async fn run_error_chain(
        &self,
        error: &DispatchError,
        envelope: &mut Envelope,
        meta: &Value,
        route_slug: &str,
    ) {
        for (index, handler) in self.error_handlers.iter().enumerate() {
            trace!(index, "running error handler");
            let mut next = Next::default();
            let result = handler
                .handle(
                    ErrorContext {
                        error,
                        envelope: &mut *envelope,
                        meta,
                        route_slug,
                    },
                    &mut next,
                )
                .await;

            if let Err(cause) = result {
                let secondary = DispatchError::ErrorHandlerFailure {
                    index,
                    cause: Arc::new(cause),
                };
                warn!(index, error = %secondary, "error handler failed");
                envelope.record_error(secondary);
                return;
            }

            match next.verdict() {
                Verdict::Advance => {},
                Verdict::Stop => {
                    debug!(index, "error claimed by handler");
                    return;
                },
                Verdict::Repeated => {
                    let stage = Stage::ErrorHandler { index };
                    warn!(%stage, "error handler continued more than once");
                    envelope.record_error(DispatchError::DoubleContinuation { stage });
                    return;
                },
            }
        }
    }
}
