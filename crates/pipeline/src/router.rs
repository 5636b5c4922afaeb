use std::{collections::HashMap, sync::Arc};

use {async_trait::async_trait, serde_json::Value, tracing::debug};

use crate::{
    chain::Next,
    deps::{DependencyKey, DependencyRegistry, Deps, Lifetime, Token},
    envelope::Envelope,
    error::{DispatchError, Result},
    slug::Slug,
};

/// What a route handler or middleware sees.
pub struct HandlerContext<'a> {
    pub envelope: &'a mut Envelope,
    pub deps: &'a Deps,
    pub meta: &'a Value,
}

/// What an error handler sees.
pub struct ErrorContext<'a> {
    pub error: &'a DispatchError,
    pub envelope: &'a mut Envelope,
    /// Metadata of the failed route, `Null` when the route was not found.
    pub meta: &'a Value,
    pub route_slug: &'a str,
}

/// Terminal stage of a route.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, cx: HandlerContext<'_>) -> anyhow::Result<Value>;
}

/// A before or after stage. Call `next.proceed()` once to continue the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, cx: HandlerContext<'_>, next: &mut Next) -> anyhow::Result<()>;
}

/// A link of the error chain. Leaving `next` untouched claims the error.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, cx: ErrorContext<'_>, next: &mut Next) -> anyhow::Result<()>;
}

// ── Closure adapters ────────────────────────────────────────────────────────

pub struct RouteFn<F>(F);

/// Wrap a synchronous closure as a [`RouteHandler`].
pub fn route_fn<F>(f: F) -> RouteFn<F>
where
    F: Fn(&mut Envelope, &Deps, &Value) -> anyhow::Result<Value> + Send + Sync,
{
    RouteFn(f)
}

#[async_trait]
impl<F> RouteHandler for RouteFn<F>
where
    F: Fn(&mut Envelope, &Deps, &Value) -> anyhow::Result<Value> + Send + Sync,
{
    async fn handle(&self, cx: HandlerContext<'_>) -> anyhow::Result<Value> {
        (self.0)(cx.envelope, cx.deps, cx.meta)
    }
}

pub struct MiddlewareFn<F>(F);

/// Wrap a synchronous closure as a [`Middleware`].
pub fn middleware_fn<F>(f: F) -> MiddlewareFn<F>
where
    F: Fn(&mut Envelope, &Deps, &mut Next) -> anyhow::Result<()> + Send + Sync,
{
    MiddlewareFn(f)
}

#[async_trait]
impl<F> Middleware for MiddlewareFn<F>
where
    F: Fn(&mut Envelope, &Deps, &mut Next) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, cx: HandlerContext<'_>, next: &mut Next) -> anyhow::Result<()> {
        (self.0)(cx.envelope, cx.deps, next)
    }
}

pub struct ErrorHandlerFn<F>(F);

/// Wrap a synchronous closure as an [`ErrorHandler`].
pub fn error_handler_fn<F>(f: F) -> ErrorHandlerFn<F>
where
    F: Fn(&DispatchError, &mut Envelope, &mut Next) -> anyhow::Result<()> + Send + Sync,
{
    ErrorHandlerFn(f)
}

#[async_trait]
impl<F> ErrorHandler for ErrorHandlerFn<F>
where
    F: Fn(&DispatchError, &mut Envelope, &mut Next) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, cx: ErrorContext<'_>, next: &mut Next) -> anyhow::Result<()> {
        (self.0)(cx.error, cx.envelope, next)
    }
}

// ── Registration ────────────────────────────────────────────────────────────

/// Route definition, validated by [`Router::register_route`].
pub struct Route {
    slug: String,
    handler: Arc<dyn RouteHandler>,
    deps: Vec<DependencyKey>,
    before: Vec<String>,
    after: Vec<String>,
    meta: Value,
}

impl Route {
    pub fn new(slug: impl Into<String>, handler: impl RouteHandler + 'static) -> Self {
        Self {
            slug: slug.into(),
            handler: Arc::new(handler),
            deps: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
            meta: Value::Object(Default::default()),
        }
    }

    #[must_use]
    pub fn deps(mut self, deps: impl IntoIterator<Item = DependencyKey>) -> Self {
        self.deps = deps.into_iter().collect();
        self
    }

    #[must_use]
    pub fn before<S: Into<String>>(mut self, slugs: impl IntoIterator<Item = S>) -> Self {
        self.before = slugs.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn after<S: Into<String>>(mut self, slugs: impl IntoIterator<Item = S>) -> Self {
        self.after = slugs.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }
}

pub(crate) struct RouteEntry {
    pub(crate) slug: Slug,
    pub(crate) handler: Arc<dyn RouteHandler>,
    pub(crate) deps: Vec<DependencyKey>,
    pub(crate) before: Vec<Slug>,
    pub(crate) after: Vec<Slug>,
    pub(crate) meta: Value,
}

pub(crate) struct MiddlewareEntry {
    pub(crate) handler: Arc<dyn Middleware>,
    pub(crate) deps: Vec<DependencyKey>,
    pub(crate) meta: Value,
}

/// Route table, middleware registry, error chain and dependency registry.
///
/// Everything is registered through `&mut self` during setup; the router is
/// then shared (typically as `Arc<Router>`) and dispatched through `&self`.
#[derive(Default)]
pub struct Router {
    pub(crate) deps: DependencyRegistry,
    pub(crate) routes: HashMap<Slug, RouteEntry>,
    pub(crate) middleware: HashMap<Slug, Vec<Arc<MiddlewareEntry>>>,
    pub(crate) error_handlers: Vec<Arc<dyn ErrorHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_dependency<T, F>(
        &mut self,
        token: &Token<T>,
        lifetime: Lifetime,
        construct: F,
    ) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.deps.register(token, lifetime, construct)
    }

    pub fn register_default_dependency<T>(&mut self, token: &Token<T>, lifetime: Lifetime) -> Result<()>
    where
        T: Default + Send + Sync + 'static,
    {
        self.deps.register_default(token, lifetime)
    }

    pub fn resolve<T>(&self, token: &Token<T>) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.deps.resolve(token)
    }

    pub fn dependencies(&self) -> &DependencyRegistry {
        &self.deps
    }

    /// Add a route. Fails without side effects on a bad or duplicate slug or
    /// an unregistered dependency.
    pub fn register_route(&mut self, route: Route) -> Result<()> {
        let slug = Slug::parse(&route.slug)?;
        if self.routes.contains_key(&slug) {
            return Err(crate::Error::DuplicateRoute {
                slug: slug.to_string(),
            });
        }
        self.deps
            .ensure_registered(&format!("route {slug}"), &route.deps)?;
        let before = parse_all(&route.before)?;
        let after = parse_all(&route.after)?;

        debug!(
            route = %slug,
            deps = route.deps.len(),
            before = ?route.before,
            after = ?route.after,
            "registering route"
        );
        self.routes.insert(slug.clone(), RouteEntry {
            slug,
            handler: route.handler,
            deps: route.deps,
            before,
            after,
            meta: route.meta,
        });
        Ok(())
    }

    /// Append a stage to the middleware list named `slug`.
    pub fn register_middleware(
        &mut self,
        slug: &str,
        deps: impl IntoIterator<Item = DependencyKey>,
        handler: impl Middleware + 'static,
    ) -> Result<()> {
        self.register_middleware_with_meta(slug, deps, handler, Value::Object(Default::default()))
    }

    pub fn register_middleware_with_meta(
        &mut self,
        slug: &str,
        deps: impl IntoIterator<Item = DependencyKey>,
        handler: impl Middleware + 'static,
        meta: Value,
    ) -> Result<()> {
        let slug = Slug::parse(slug)?;
        let deps: Vec<_> = deps.into_iter().collect();
        self.deps
            .ensure_registered(&format!("middleware {slug}"), &deps)?;

        let list = self.middleware.entry(slug.clone()).or_default();
        list.push(Arc::new(MiddlewareEntry {
            handler: Arc::new(handler),
            deps,
            meta,
        }));
        debug!(middleware = %slug, position = list.len() - 1, "registering middleware");
        Ok(())
    }

    pub fn register_error_handler(&mut self, handler: impl ErrorHandler + 'static) {
        self.error_handlers.push(Arc::new(handler));
        debug!(count = self.error_handlers.len(), "registering error handler");
    }

    /// Registered route slugs, sorted.
    pub fn routes(&self) -> Vec<&Slug> {
        let mut slugs: Vec<_> = self.routes.keys().collect();
        slugs.sort();
        slugs
    }

    pub fn has_route(&self, slug: &str) -> bool {
        self.routes.contains_key(slug)
    }

    pub fn middleware_count(&self, slug: &str) -> usize {
        self.middleware.get(slug).map_or(0, Vec::len)
    }

    pub fn error_handler_count(&self) -> usize {
        self.error_handlers.len()
    }
}

fn parse_all(raw: &[String]) -> Result<Vec<Slug>> {
    raw.iter().map(|s| Slug::parse(s)).collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::Error, serde_json::json};

    #[derive(Default)]
    struct Logger;

    fn ok_route() -> impl RouteHandler {
        route_fn(|_, _, _| Ok(Value::Null))
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let mut router = Router::new();
        router.register_route(Route::new("v1.test", ok_route())).unwrap();
        let err = router
            .register_route(Route::new("v1.test", ok_route()))
            .unwrap_err();
        assert_eq!(err, Error::DuplicateRoute {
            slug: "v1.test".into()
        });
    }

    #[test]
    fn route_with_unregistered_dependency_is_not_added() {
        let mut router = Router::new();
        let err = router
            .register_route(
                Route::new("v1.test", ok_route()).deps([Token::<Logger>::of_type().into()]),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDependency { .. }));
        assert!(!router.has_route("v1.test"));

        router
            .register_default_dependency(&Token::<Logger>::of_type(), Lifetime::Singleton)
            .unwrap();
        router
            .register_route(
                Route::new("v1.test", ok_route()).deps([Token::<Logger>::of_type().into()]),
            )
            .unwrap();
        assert!(router.has_route("v1.test"));
    }

    #[test]
    fn invalid_slugs_are_rejected_at_registration() {
        let mut router = Router::new();
        assert!(matches!(
            router.register_route(Route::new("test", ok_route())),
            Err(Error::InvalidSlug { .. })
        ));
        assert!(matches!(
            router.register_route(Route::new("v1.test", ok_route()).before(["auth"])),
            Err(Error::InvalidSlug { .. })
        ));
        assert!(matches!(
            router.register_middleware("bad slug", [], middleware_fn(|_, _, _| Ok(()))),
            Err(Error::InvalidSlug { .. })
        ));
        assert!(router.routes().is_empty());
    }

    #[test]
    fn middleware_appends_under_one_slug() {
        let mut router = Router::new();
        for _ in 0..3 {
            router
                .register_middleware("v1.auth", [], middleware_fn(|_, _, next| {
                    next.proceed();
                    Ok(())
                }))
                .unwrap();
        }
        assert_eq!(router.middleware_count("v1.auth"), 3);
        assert_eq!(router.middleware_count("v1.other"), 0);
    }

    #[test]
    fn middleware_dependency_is_checked() {
        let mut router = Router::new();
        let err = router
            .register_middleware(
                "v1.auth",
                [Token::<Logger>::of_type().into()],
                middleware_fn(|_, _, _| Ok(())),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDependency { .. }));
        assert_eq!(router.middleware_count("v1.auth"), 0);
    }

    #[test]
    fn routes_are_listed_sorted() {
        let mut router = Router::new();
        router
            .register_route(Route::new("v2.b", ok_route()).meta(json!({"title": "b"})))
            .unwrap();
        router.register_route(Route::new("v1.a", ok_route())).unwrap();
        let listed: Vec<_> = router.routes().iter().map(|s| s.as_str()).collect();
        assert_eq!(listed, vec!["v1.a", "v2.b"]);
    }
}
