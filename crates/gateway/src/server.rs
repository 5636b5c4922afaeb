use std::sync::Arc;

use {
    switchboard_common::InboundMessage,
    switchboard_config::SwitchboardConfig,
    switchboard_flow::{Admission, Downstream, ErrorRateTracker, FlowController},
    switchboard_pipeline::{DispatchResult, Envelope, Router, Slug},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{Instrument, debug, info, info_span, warn},
};

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::{
    access::AdminList,
    commands::CommandTable,
    error::{Error, Result},
};

/// What happened to one inbound message.
#[derive(Debug)]
pub struct Processed {
    pub correlation_id: String,
    /// Route the message was dispatched to, `None` when no command matched.
    pub route: Option<Slug>,
    /// `None` when the message was not dispatched.
    pub result: Option<DispatchResult>,
    /// `None` when the dispatch failed and flow control was bypassed.
    pub admission: Option<Admission>,
}

/// Pipeline host: inbound message → envelope → dispatch → error-rate
/// tracker → flow control → downstream.
///
/// Messages are handled one at a time, so the tracker folds outcomes in
/// arrival order.
pub struct Gateway {
    router: Arc<Router>,
    commands: CommandTable,
    admins: AdminList,
    command_prefix: String,
    tracker: ErrorRateTracker,
    flow: FlowController<Envelope>,
}

impl Gateway {
    /// Wire a gateway from config. Must be called inside a tokio runtime.
    ///
    /// `cancel` stops pending flow-control delays.
    pub fn from_config(
        config: &SwitchboardConfig,
        router: Arc<Router>,
        downstream: Arc<dyn Downstream<Envelope>>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let commands = CommandTable::from_config(&config.commands)?;
        for (word, slug) in commands.entries() {
            if !router.has_route(slug.as_str()) {
                warn!(command = word, route = %slug, "command points at an unregistered route");
            }
        }
        let (tracker, _fold) = ErrorRateTracker::spawn(config.flow.max_identities);
        let flow = FlowController::new(config.flow.policy()?, tracker.subscribe(), downstream, cancel);

        Ok(Self {
            router,
            commands,
            admins: AdminList::new(&config.admins),
            command_prefix: config.command_prefix.clone(),
            tracker,
            flow,
        })
    }

    pub fn tracker(&self) -> &ErrorRateTracker {
        &self.tracker
    }

    pub fn flow(&self) -> &FlowController<Envelope> {
        &self.flow
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Run one message through the pipeline.
    ///
    /// Returns once the dispatch has finished and the envelope has been
    /// dropped or queued for delivery; the delay runs in the background.
    pub async fn handle(&self, msg: InboundMessage) -> Result<Processed> {
        let mut envelope = Envelope::from_inbound(&msg, &self.command_prefix);
        envelope.is_admin = self.admins.is_admin(&envelope.username);
        let span = info_span!(
            "message",
            correlation_id = %envelope.correlation_id(),
            username = %envelope.username,
        );

        async move {
            #[cfg(feature = "metrics")]
            counter!("switchboard_gateway_messages_total").increment(1);

            let route = if envelope.is_command {
                self.commands.lookup(&envelope.message_text).cloned()
            } else {
                None
            };

            let result = match &route {
                Some(slug) => Some(self.router.dispatch(slug.as_str(), &mut envelope).await),
                None => {
                    if envelope.is_command {
                        warn!(text = %envelope.message_text, "no route for command");
                    } else {
                        debug!("not a command, forwarding unrouted");
                    }
                    None
                },
            };

            let failed = envelope.failed();
            self.tracker.record(envelope.username.clone(), failed)?;

            let correlation_id = envelope.correlation_id().to_string();
            let admission = if failed {
                debug!("dispatch failed, bypassing flow control");
                None
            } else {
                let identity = envelope.username.clone();
                Some(self.flow.submit(&identity, envelope)?)
            };

            Ok::<_, Error>(Processed {
                correlation_id,
                route,
                result,
                admission,
            })
        }
        .instrument(span)
        .await
    }

    /// Handle messages from `inbound` in order until it closes or `cancel`
    /// fires, then stop flow control.
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>, cancel: CancellationToken) {
        info!(
            commands = self.commands.len(),
            routes = self.router.routes().len(),
            admins = self.admins.len(),
            "gateway started"
        );
        loop {
            let msg = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                msg = inbound.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            if let Err(e) = self.handle(msg).await {
                warn!(error = %e, "gateway stopping");
                break;
            }
        }

        self.flow.shutdown();
        let stats = self.flow.stats();
        info!(
            forwarded = stats.forwarded(),
            dropped = stats.dropped(),
            delivery_failures = stats.delivery_failures(),
            discarded = stats.discarded(),
            "gateway stopped"
        );
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::Mutex,
        time::Duration,
    };

    use {
        super::*,
        async_trait::async_trait,
        serde_json::Value,
        switchboard_common::{ReplyPayload, ReplySink},
        switchboard_pipeline::{Route, error_handler_fn, route_fn},
    };

    use crate::downstream::{REPLY_KEY, ReplyDownstream};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<ReplyPayload>>,
    }

    #[async_trait]
    impl ReplySink for Recorder {
        async fn send_reply(&self, reply: ReplyPayload) -> switchboard_common::Result<()> {
            self.sent.lock().unwrap().push(reply);
            Ok(())
        }
    }

    impl Recorder {
        fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.text.clone())
                .collect()
        }
    }

    fn router() -> Arc<Router> {
        let mut router = Router::new();
        router
            .register_route(Route::new(
                "v1.echo",
                route_fn(|env, _, _| {
                    let reply = format!(
                        "{} admin={}",
                        env.arguments().collect::<Vec<_>>().join(" "),
                        env.is_admin
                    );
                    env.insert(REPLY_KEY, reply);
                    Ok(Value::Null)
                }),
            ))
            .unwrap();
        router
            .register_route(Route::new(
                "v1.fail",
                route_fn(|_, _, _| anyhow::bail!("boom")),
            ))
            .unwrap();
        router.register_error_handler(error_handler_fn(|error, env, _next| {
            env.insert(REPLY_KEY, format!("error: {error}"));
            Ok(())
        }));
        Arc::new(router)
    }

    fn config() -> SwitchboardConfig {
        SwitchboardConfig {
            admins: vec!["ops_*".into()],
            commands: BTreeMap::from([
                (".echo".into(), "v1.echo".into()),
                (".fail".into(), "v1.fail".into()),
            ]),
            ..Default::default()
        }
    }

    fn gateway() -> (Gateway, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let gateway = Gateway::from_config(
            &config(),
            router(),
            Arc::new(ReplyDownstream::new(recorder.clone())),
            CancellationToken::new(),
        )
        .unwrap();
        (gateway, recorder)
    }

    fn msg(username: &str, text: &str) -> InboundMessage {
        InboundMessage::new("telegram", username, text).with_chat(42, Some(1))
    }

    async fn wait_for_updates(gateway: &Gateway, updates: u64) {
        gateway
            .tracker()
            .subscribe()
            .wait_for(|s| s.updates() >= updates)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn routed_command_replies_after_delay() {
        let (gateway, recorder) = gateway();

        let processed = gateway.handle(msg("alice", ".echo hi there")).await.unwrap();
        assert_eq!(processed.route.as_ref().map(Slug::as_str), Some("v1.echo"));
        assert!(processed.result.as_ref().unwrap().is_success());
        assert_eq!(
            processed.admission,
            Some(Admission::Scheduled {
                rate: 0.0,
                delay: Duration::from_millis(200)
            })
        );
        assert!(recorder.texts().is_empty());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(recorder.texts(), vec!["hi there admin=false"]);
        assert_eq!(recorder.sent.lock().unwrap()[0].reply_to_id, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn admin_patterns_mark_envelope() {
        let (gateway, recorder) = gateway();
        gateway.handle(msg("OPS_carol", ".echo x")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.texts(), vec!["x admin=true"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unrouted_message_is_recorded_ok_and_forwarded() {
        let (gateway, recorder) = gateway();

        let plain = gateway.handle(msg("bob", "hello")).await.unwrap();
        assert!(plain.route.is_none());
        assert!(plain.result.is_none());
        assert!(matches!(plain.admission, Some(Admission::Scheduled { .. })));

        let unknown = gateway.handle(msg("bob", ".nope")).await.unwrap();
        assert!(unknown.route.is_none());
        assert!(unknown.admission.is_some());

        wait_for_updates(&gateway, 2).await;
        assert_eq!(gateway.tracker().rate("bob"), 0.0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gateway.flow().stats().forwarded(), 2);
        assert!(recorder.texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dispatch_bypasses_flow_control() {
        let (gateway, recorder) = gateway();

        let processed = gateway.handle(msg("mallory", ".fail")).await.unwrap();
        assert!(processed.result.as_ref().unwrap().is_failure());
        assert!(processed.admission.is_none());

        wait_for_updates(&gateway, 1).await;
        assert_eq!(gateway.tracker().rate("mallory"), 1.0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gateway.flow().stats().forwarded(), 0);
        assert!(recorder.texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn identity_with_high_error_rate_is_dropped() {
        let (gateway, recorder) = gateway();

        gateway.handle(msg("mallory", ".fail")).await.unwrap();
        wait_for_updates(&gateway, 1).await;

        let processed = gateway.handle(msg("mallory", ".echo again")).await.unwrap();
        assert!(processed.result.as_ref().unwrap().is_success());
        assert_eq!(processed.admission, Some(Admission::Dropped { rate: 1.0 }));

        // Other identities are unaffected.
        let other = gateway.handle(msg("alice", ".echo fine")).await.unwrap();
        assert!(matches!(other.admission, Some(Admission::Scheduled { .. })));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.texts(), vec!["fine admin=false"]);
        assert_eq!(gateway.flow().stats().dropped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_processes_in_order() {
        let (gateway, recorder) = gateway();
        let (tx, rx) = mpsc::channel(8);
        for text in [".echo one", ".echo two", ".echo three"] {
            tx.send(msg("alice", text)).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(gateway.run(rx, cancel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(recorder.texts(), vec![
            "one admin=false",
            "two admin=false",
            "three admin=false"
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_run_and_discards_pending() {
        let (gateway, recorder) = gateway();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(gateway.run(rx, cancel.clone()));

        tx.send(msg("alice", ".echo late")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(recorder.texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_inbound_stops_run() {
        let (gateway, _recorder) = gateway();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        gateway.run(rx, CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn bad_command_slug_fails_wiring() {
        let mut cfg = config();
        cfg.commands.insert(".bad".into(), "not-a-slug".into());
        let err = Gateway::from_config(
            &cfg,
            router(),
            Arc::new(ReplyDownstream::new(Arc::new(Recorder::default()))),
            CancellationToken::new(),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("invalid slug"));
    }
}
