//! Default application wiring: dependencies, middleware, routes and the
//! error handler registered on the router the gateway dispatches to.

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, bail},
    async_trait::async_trait,
    serde_json::{Value, json},
    switchboard_common::ReplySink,
    switchboard_config::{MediaConfig, SwitchboardConfig},
    switchboard_gateway::{REPLY_KEY, reply_for},
    switchboard_media::Downloader,
    switchboard_pipeline::{
        DispatchError, Envelope, ErrorContext, ErrorHandler, HandlerContext, Lifetime, Next,
        Route, RouteHandler, Router, Token, middleware_fn,
    },
    tracing::{info, warn},
};

pub const DOWNLOAD_ROUTE: &str = "v1.download_stream_video";
pub const AUTH_MIDDLEWARE: &str = "v1.auth";
pub const RESPONSE_MIDDLEWARE: &str = "v1.response";

pub const LOGGER: Token<Logger> = Token::named("logger");
pub const AUTH: Token<AuthService> = Token::named("auth");
pub const MEDIA: Token<MediaDownloader> = Token::named("media");

/// Structured log sink shared by every stage.
#[derive(Debug, Default)]
pub struct Logger;

impl Logger {
    pub fn log(&self, envelope: &Envelope, message: &str) {
        info!(
            correlation_id = envelope.correlation_id(),
            username = %envelope.username,
            "{message}"
        );
    }
}

/// Decides whether a sender may use routed commands.
#[derive(Debug, Default)]
pub struct AuthService;

impl AuthService {
    /// Senders need a username; anonymous senders cannot be told apart for
    /// rate tracking.
    pub fn is_authenticated(&self, envelope: &Envelope) -> bool {
        !envelope.username.trim().is_empty()
    }
}

/// Fetches media with the configured `yt-dlp`.
#[derive(Debug, Clone)]
pub struct MediaDownloader {
    config: MediaConfig,
}

impl MediaDownloader {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    /// Download `url` to a file named after `stem` in the output directory.
    pub async fn fetch(&self, url: &str, stem: &str) -> switchboard_media::Result<PathBuf> {
        let template = self.config.output_dir.join(format!("{stem}.%(ext)s"));
        Downloader::locate(self.config.ytdlp_path.as_deref())?
            .download(url, &template, self.config.kind)
            .await
    }
}

struct DownloadStreamVideo;

#[async_trait]
impl RouteHandler for DownloadStreamVideo {
    async fn handle(&self, cx: HandlerContext<'_>) -> anyhow::Result<Value> {
        let logger = cx.deps.get(&LOGGER)?;
        let media = cx.deps.get(&MEDIA)?;

        let Some(url) = cx.envelope.arguments().next().map(str::to_string) else {
            bail!("usage: .dl <url>");
        };
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            bail!("not a link: {url}");
        }

        logger.log(cx.envelope, "downloading media");
        let stem = cx.envelope.correlation_id().to_string();
        let path = media
            .fetch(&url, &stem)
            .await
            .with_context(|| format!("download of {url} failed"))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        cx.envelope.insert("media_path", path.display().to_string());
        cx.envelope.insert(REPLY_KEY, format!("Downloaded {name}"));
        Ok(json!({ "path": path }))
    }
}

/// Logs every failure, tells the sender what went wrong and claims the error.
struct ReportError {
    replies: Option<Arc<dyn ReplySink>>,
}

#[async_trait]
impl ErrorHandler for ReportError {
    async fn handle(&self, cx: ErrorContext<'_>, _next: &mut Next) -> anyhow::Result<()> {
        warn!(
            route = cx.route_slug,
            correlation_id = cx.envelope.correlation_id(),
            kind = cx.error.kind(),
            error = %cx.error,
            "dispatch failed"
        );
        cx.envelope.insert(REPLY_KEY, user_message(cx.error));

        // Failed envelopes skip flow control, so the notice goes out here.
        if let (Some(replies), Some(reply)) = (&self.replies, reply_for(cx.envelope))
            && let Err(e) = replies.send_reply(reply).await
        {
            warn!(error = %e, "failed to send error reply");
        }
        Ok(())
    }
}

fn user_message(error: &DispatchError) -> String {
    match error.cause() {
        Some(cause) => format!("Sorry, that failed: {cause}"),
        None => "Sorry, something went wrong.".to_string(),
    }
}

/// Build the router with the default routes.
///
/// `replies` receives error notices; without it failures are only logged.
pub fn build_router(
    config: &SwitchboardConfig,
    replies: Option<Arc<dyn ReplySink>>,
) -> anyhow::Result<Router> {
    let mut router = Router::new();

    router.register_dependency(&LOGGER, Lifetime::Singleton, Logger::default)?;
    router.register_dependency(&AUTH, Lifetime::Singleton, AuthService::default)?;
    let media = config.media.clone();
    router.register_dependency(&MEDIA, Lifetime::Singleton, move || {
        MediaDownloader::new(media.clone())
    })?;

    router.register_middleware(
        AUTH_MIDDLEWARE,
        [AUTH.into()],
        middleware_fn(|env, deps, next| {
            if !deps.get(&AUTH)?.is_authenticated(env) {
                bail!("unauthorized: set a Telegram username to use commands");
            }
            env.insert("v1.auth.1", "authenticated");
            next.proceed();
            Ok(())
        }),
    )?;
    router.register_middleware(
        AUTH_MIDDLEWARE,
        [AUTH.into()],
        middleware_fn(|env, _deps, next| {
            env.insert("v1.auth.2", if env.is_admin { "admin" } else { "member" });
            next.proceed();
            Ok(())
        }),
    )?;
    router.register_middleware(
        RESPONSE_MIDDLEWARE,
        [LOGGER.into()],
        middleware_fn(|env, deps, next| {
            let logger = deps.get(&LOGGER)?;
            let keys: Vec<&str> = env.values().keys().map(String::as_str).collect();
            logger.log(env, &format!("response ready, values: {}", keys.join(", ")));
            next.proceed();
            Ok(())
        }),
    )?;

    router.register_route(
        Route::new(DOWNLOAD_ROUTE, DownloadStreamVideo)
            .deps([LOGGER.into(), MEDIA.into()])
            .before([AUTH_MIDDLEWARE])
            .after([RESPONSE_MIDDLEWARE])
            .meta(json!({ "description": "download a video or audio stream" })),
    )?;

    router.register_error_handler(ReportError { replies });

    Ok(router)
}
