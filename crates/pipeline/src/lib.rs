//! Per-message dispatch pipeline.
//!
//! An [`Envelope`] is dispatched to a route by slug. The route runs its
//! before-middleware chain, its handler, then its after-middleware chain.
//! Stages receive dependencies resolved from the [`DependencyRegistry`]
//! (singleton or scoped). Any failure is captured into the
//! [`DispatchResult`], recorded on the envelope and handed to the error chain.
//!
//! Chains advance through an explicit [`Next`] cursor: a stage calls
//! [`Next::proceed`] exactly once to continue, never to stop the chain, and
//! calling it twice fails the dispatch.

pub mod chain;
pub mod deps;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod router;
pub mod slug;

pub use {
    chain::Next,
    deps::{DependencyKey, DependencyRegistry, Deps, Lifetime, Token},
    dispatch::DispatchResult,
    envelope::{DEFAULT_COMMAND_PREFIX, Envelope},
    error::{DispatchError, Error, Result, Stage},
    router::{
        ErrorContext, ErrorHandler, HandlerContext, Middleware, Route, RouteHandler, Router,
        error_handler_fn, middleware_fn, route_fn,
    },
    slug::Slug,
};
