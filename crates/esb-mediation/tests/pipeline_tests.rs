use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use esb_common::{properties, Envelope, MediationError};
use esb_mediation::{
    Dispatcher, MediationEngine, MediationEnvironment, MediationOutcome, Mediator, MessageContext,
    ProxyService, SequenceMediator, SequenceRef,
};

/// Records the order mediators run in
#[derive(Default)]
struct Trail(Mutex<Vec<String>>);

impl Trail {
    fn steps(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

struct Step {
    label: String,
    trail: Arc<Trail>,
    outcome: Outcome,
}

#[derive(Clone, Copy)]
enum Outcome {
    Continue,
    Stop,
    Fail,
}

#[async_trait]
impl Mediator for Step {
    async fn mediate(&self, _ctx: &mut MessageContext) -> Result<bool, MediationError> {
        self.trail.0.lock().push(self.label.clone());
        match self.outcome {
            Outcome::Continue => Ok(true),
            Outcome::Stop => Ok(false),
            Outcome::Fail => Err(MediationError::mediation(&self.label, "simulated failure")),
        }
    }

    fn name(&self) -> &str {
        &self.label
    }
}

fn step(label: &str, trail: &Arc<Trail>, outcome: Outcome) -> Arc<dyn Mediator> {
    Arc::new(Step {
        label: label.to_string(),
        trail: trail.clone(),
        outcome,
    })
}

fn sequence(name: &str, children: Vec<Arc<dyn Mediator>>) -> Arc<dyn Mediator> {
    Arc::new(SequenceMediator::new(name, children))
}

#[tokio::test]
async fn test_stop_short_circuits_main_sequence() {
    let trail = Arc::new(Trail::default());
    let env = MediationEnvironment::builder().build();
    env.add_sequence(
        "main",
        sequence(
            "main",
            vec![
                step("A", &trail, Outcome::Continue),
                step("B", &trail, Outcome::Stop),
                step("C", &trail, Outcome::Continue),
            ],
        ),
    );

    let engine = MediationEngine::new(env);
    let mut ctx = engine.new_context(Envelope::text("m"));

    assert!(matches!(engine.inject(&mut ctx).await, MediationOutcome::Stopped));
    assert_eq!(trail.steps(), vec!["A", "B"]);
}

#[tokio::test]
async fn test_failure_routed_to_global_fault_sequence() {
    let trail = Arc::new(Trail::default());
    let env = MediationEnvironment::builder().build();
    env.add_sequence(
        "main",
        sequence("main", vec![step("A", &trail, Outcome::Fail), step("B", &trail, Outcome::Continue)]),
    );
    env.add_sequence("fault", sequence("fault", vec![step("fault", &trail, Outcome::Continue)]));

    let engine = MediationEngine::new(env);
    let mut ctx = engine.new_context(Envelope::text("m"));
    let outcome = engine.inject(&mut ctx).await;

    assert!(matches!(outcome, MediationOutcome::FaultHandled { ref handler } if handler == "fault"));
    assert_eq!(trail.steps(), vec!["A", "fault"]);
    assert_eq!(ctx.property_str(properties::ERROR_KIND), Some("MEDIATION"));
    assert!(ctx
        .property_str(properties::ERROR_MESSAGE)
        .unwrap()
        .contains("simulated failure"));
    assert_eq!(ctx.fault_depth(), 0);
}

#[tokio::test]
async fn test_failure_without_handlers_drops_message() {
    let trail = Arc::new(Trail::default());
    let env = MediationEnvironment::builder().build();
    env.add_sequence("main", sequence("main", vec![step("A", &trail, Outcome::Fail)]));

    let engine = MediationEngine::new(env);
    let mut ctx = engine.new_context(Envelope::text("m"));

    let outcome = engine.inject(&mut ctx).await;
    assert!(outcome.is_dropped());
}

#[tokio::test]
async fn test_missing_main_sequence_is_configuration_error() {
    let engine = MediationEngine::new(MediationEnvironment::builder().build());
    let mut ctx = engine.new_context(Envelope::text("m"));

    match engine.inject(&mut ctx).await {
        MediationOutcome::Dropped { error } => assert_eq!(error.kind(), "CONFIGURATION"),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_failing_fault_handler_cascades_outward() {
    let trail = Arc::new(Trail::default());
    let env = MediationEnvironment::builder().build();
    env.add_sequence("fault", sequence("fault", vec![step("global-fault", &trail, Outcome::Continue)]));

    let inner = SequenceMediator::new("inner", vec![step("work", &trail, Outcome::Fail)])
        .with_error_handler(SequenceRef::Inline(sequence(
            "broken-handler",
            vec![step("broken-handler", &trail, Outcome::Fail)],
        )));
    env.add_sequence("main", Arc::new(inner));

    let engine = MediationEngine::new(env);
    let mut ctx = engine.new_context(Envelope::text("m"));
    let outcome = engine.inject(&mut ctx).await;

    assert!(matches!(outcome, MediationOutcome::FaultHandled { .. }));
    assert_eq!(trail.steps(), vec!["work", "broken-handler", "global-fault"]);
}

struct EchoBackend {
    sends: AtomicUsize,
}

#[async_trait]
impl Dispatcher for EchoBackend {
    async fn send(
        &self,
        endpoint: &str,
        ctx: &mut MessageContext,
    ) -> Result<Option<Envelope>, MediationError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if endpoint == "down" {
            return Err(MediationError::delivery(endpoint, "connection refused"));
        }
        Ok(Some(Envelope::text(format!("echo:{}", ctx.envelope.body_str()))))
    }
}

#[tokio::test]
async fn test_proxy_forwards_to_target_endpoint() {
    let trail = Arc::new(Trail::default());
    let backend = Arc::new(EchoBackend { sends: AtomicUsize::new(0) });
    let env = MediationEnvironment::builder().dispatcher(backend.clone()).build();
    env.add_sequence("stamp", sequence("stamp", vec![step("stamp", &trail, Outcome::Continue)]));
    env.add_proxy(
        ProxyService::new("StockQuote")
            .with_in_sequence(SequenceRef::named("stamp"))
            .with_target_endpoint("quotes"),
    );

    let engine = MediationEngine::new(env);
    let mut ctx = engine.new_context(Envelope::text("IBM"));
    let (tx, rx) = oneshot::channel();
    ctx.attach_reply(tx);

    let outcome = engine.receive("StockQuote", &mut ctx).await;

    assert!(matches!(outcome, MediationOutcome::Continued));
    assert_eq!(backend.sends.load(Ordering::SeqCst), 1);
    assert_eq!(rx.await.unwrap().body_str(), "echo:IBM");
    assert_eq!(ctx.property_str(properties::PROXY_NAME), Some("StockQuote"));
}

#[tokio::test]
async fn test_proxy_delivery_failure_uses_proxy_fault_sequence() {
    let trail = Arc::new(Trail::default());
    let backend = Arc::new(EchoBackend { sends: AtomicUsize::new(0) });
    let env = MediationEnvironment::builder().dispatcher(backend).build();
    env.add_sequence("proxy-fault", sequence("proxy-fault", vec![step("proxy-fault", &trail, Outcome::Continue)]));
    env.add_proxy(
        ProxyService::new("Orders")
            .with_fault_sequence(SequenceRef::named("proxy-fault"))
            .with_target_endpoint("down"),
    );

    let engine = MediationEngine::new(env);
    let mut ctx = engine.new_context(Envelope::text("order"));
    let outcome = engine.receive("Orders", &mut ctx).await;

    assert!(matches!(outcome, MediationOutcome::FaultHandled { .. }));
    assert_eq!(trail.steps(), vec!["proxy-fault"]);
    assert_eq!(ctx.property_str(properties::ERROR_KIND), Some("DELIVERY"));
}

#[tokio::test]
async fn test_proxy_with_missing_in_sequence_fails() {
    let env = MediationEnvironment::builder().build();
    env.add_proxy(ProxyService::new("Broken").with_in_sequence(SequenceRef::named("absent")));

    let engine = MediationEngine::new(env);
    let mut ctx = engine.new_context(Envelope::text("x"));

    match engine.receive("Broken", &mut ctx).await {
        MediationOutcome::Dropped { error } => assert_eq!(error.kind(), "CONFIGURATION"),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_proxy_is_dropped() {
    let engine = MediationEngine::new(MediationEnvironment::builder().build());
    let mut ctx = engine.new_context(Envelope::text("x"));
    assert!(engine.receive("Nobody", &mut ctx).await.is_dropped());
}
