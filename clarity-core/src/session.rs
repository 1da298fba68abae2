//! One user's working session: the dossier, the domain context, the selected
//! artifact type, and the background workers that talk to the model.
//!
//! The session is owned by the interaction loop. Generation and ambient
//! observation run on tokio tasks and report back through a single `mpsc`
//! channel of [`SessionEvent`]s, so the loop never blocks on the network.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::ambient::{AmbientHandle, AmbientLoop};
use crate::catalog::ArtifactType;
use crate::context::DomainContext;
use crate::error::{ClarityError, Result};
use crate::evidence::EvidenceStore;
use crate::generator::{Generated, GenerationParams, Generator};
use crate::observation::ObservationSource;
use crate::payload::{ArtifactRequest, PayloadAssembler};

/// Capacity of the session event channel
pub const EVENT_CAPACITY: usize = 32;

/// Completion notices posted by background workers
#[derive(Debug)]
pub enum SessionEvent {
    Generated {
        artifact_type: ArtifactType,
        generated: Generated,
    },
    GenerationFailed {
        artifact_type: ArtifactType,
        error: ClarityError,
    },
    /// Ambient refinement tip about the observation labeled `source`
    Tip { text: String, source: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Worker spawned with a snapshot of `items` evidence items
    Started { items: usize },
    /// A generation is already in flight
    Busy,
    /// Nothing in the dossier to analyze
    EmptyDossier,
    /// No usable credential; no request was attempted
    NotConfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientStart {
    Started,
    AlreadyRunning,
    NotConfigured,
}

/// Free-text instruction that turns an ambient tip into a generation request
pub fn tip_instruction(tip: &str) -> String {
    format!("Analyze based on the following tip/observation:\n\n\"{}\"", tip.trim())
}

pub struct Session {
    id: Uuid,
    store: EvidenceStore,
    context: watch::Sender<Option<DomainContext>>,
    artifact_type: ArtifactType,
    model: String,
    instruction: Option<String>,
    params: GenerationParams,
    assembler: Arc<PayloadAssembler>,
    generator: Option<Arc<dyn Generator>>,
    events: mpsc::Sender<SessionEvent>,
    in_flight: Arc<AtomicBool>,
    tips: Vec<String>,
    ambient: Option<AmbientHandle>,
}

impl Session {
    /// New empty session and the receiver its workers post to.
    pub fn new(
        assembler: PayloadAssembler,
        model: impl Into<String>,
        params: GenerationParams,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, rx) = mpsc::channel(EVENT_CAPACITY);
        let (context, _) = watch::channel(None);
        let session = Self {
            id: Uuid::new_v4(),
            store: EvidenceStore::new(),
            context,
            artifact_type: ArtifactType::default(),
            model: model.into(),
            instruction: None,
            params,
            assembler: Arc::new(assembler),
            generator: None,
            events,
            in_flight: Arc::new(AtomicBool::new(false)),
            tips: Vec::new(),
            ambient: None,
        };
        (session, rx)
    }

    /// Attach the generator. Without one, generation reports `NotConfigured`.
    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Random id attached to this session's log events
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn evidence(&self) -> &EvidenceStore {
        &self.store
    }

    pub fn evidence_mut(&mut self) -> &mut EvidenceStore {
        &mut self.store
    }

    pub fn load_context(&mut self, path: &Path) -> Result<()> {
        let context = DomainContext::load(path)?;
        self.context.send_replace(Some(context));
        Ok(())
    }

    pub fn set_context(&mut self, context: DomainContext) {
        self.context.send_replace(Some(context));
    }

    pub fn clear_context(&mut self) {
        if self.context.send_replace(None).is_some() {
            info!("domain context cleared");
        }
    }

    pub fn context(&self) -> Option<DomainContext> {
        self.context.borrow().clone()
    }

    pub fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }

    pub fn set_artifact_type(&mut self, artifact_type: ArtifactType) {
        self.artifact_type = artifact_type;
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn instruction(&self) -> Option<&str> {
        self.instruction.as_deref()
    }

    /// Blank input clears the instruction.
    pub fn set_instruction(&mut self, instruction: impl Into<String>) {
        let instruction = instruction.into();
        self.instruction = if instruction.trim().is_empty() {
            None
        } else {
            Some(instruction)
        };
    }

    pub fn is_configured(&self) -> bool {
        self.generator.is_some()
    }

    pub fn is_generating(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Snapshot the dossier and generate on a background task. The result
    /// arrives as a [`SessionEvent`].
    #[instrument(skip(self), fields(session = %self.id, artifact = %self.artifact_type, items = self.store.len()))]
    pub fn trigger_generation(&self) -> TriggerOutcome {
        let Some(generator) = self.generator.clone() else {
            warn!("generation requested without a configured credential");
            return TriggerOutcome::NotConfigured;
        };
        if self.store.is_empty() {
            warn!("generation requested with an empty dossier");
            return TriggerOutcome::EmptyDossier;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("generation already in flight");
            return TriggerOutcome::Busy;
        }

        let request = ArtifactRequest::new(self.artifact_type, self.model.clone(), self.store.snapshot())
            .with_domain_context(self.context().map(|c| c.content().to_string()))
            .with_instruction(self.instruction.clone());
        let items = request.evidence_snapshot.len();

        let assembler = Arc::clone(&self.assembler);
        let params = self.params;
        let events = self.events.clone();
        let in_flight = InFlight(Arc::clone(&self.in_flight));

        let artifact_type = request.artifact_type;
        let worker = tokio::spawn(async move {
            let result = match assembler.assemble_request(&request) {
                Ok(payload) => {
                    generator
                        .generate(payload, &request.model_identifier, &params)
                        .await
                }
                Err(e) => Err(e),
            };

            let event = match result {
                Ok(generated) => {
                    info!(artifact = %artifact_type, attempts = generated.attempts, "generation finished");
                    SessionEvent::Generated {
                        artifact_type,
                        generated,
                    }
                }
                Err(error) => {
                    warn!(artifact = %artifact_type, kind = %error.kind(), error = %error, "generation failed");
                    SessionEvent::GenerationFailed {
                        artifact_type,
                        error,
                    }
                }
            };

            drop(in_flight);
            if events.send(event).await.is_err() {
                debug!("session closed before generation result was delivered");
            }
        });

        // A panicking worker posts nothing; report it so the front-end stops waiting.
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                error!(artifact = %artifact_type, error = %e, "generation worker aborted");
                let error = ClarityError::internal(format!("generation worker aborted: {e}"));
                let _ = events
                    .send(SessionEvent::GenerationFailed {
                        artifact_type,
                        error,
                    })
                    .await;
            }
        });

        info!(items, "generation started");
        TriggerOutcome::Started { items }
    }

    /// Start the ambient tip loop on `source`.
    pub fn start_ambient(
        &mut self,
        source: Box<dyn ObservationSource>,
        interval: Duration,
    ) -> AmbientStart {
        let Some(generator) = self.generator.clone() else {
            return AmbientStart::NotConfigured;
        };
        if self.ambient.as_ref().is_some_and(|h| !h.is_finished()) {
            return AmbientStart::AlreadyRunning;
        }

        let ambient = AmbientLoop::new(source, generator, Arc::clone(&self.assembler), self.events.clone())
            .with_model(self.model.clone())
            .with_params(self.params)
            .with_interval(interval)
            .with_context(self.context.subscribe());
        self.ambient = Some(ambient.spawn());
        AmbientStart::Started
    }

    /// Stop the ambient loop, waiting for any in-flight observation. Returns
    /// whether a loop was running.
    pub async fn stop_ambient(&mut self) -> bool {
        match self.request_ambient_stop() {
            Some(handle) => {
                handle.join().await;
                true
            }
            None => false,
        }
    }

    /// Signal the ambient loop to stop and hand back its handle without
    /// waiting. The loop exits after any in-flight observation; the caller
    /// joins the handle when it can afford to wait.
    pub fn request_ambient_stop(&mut self) -> Option<AmbientHandle> {
        let handle = self.ambient.take()?;
        handle.signal_stop();
        info!(session = %self.id, "ambient loop stopping");
        Some(handle)
    }

    pub fn is_ambient_running(&self) -> bool {
        self.ambient.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Keep a tip received from the ambient loop; returns its 1-based number.
    pub fn record_tip(&mut self, tip: impl Into<String>) -> usize {
        self.tips.push(tip.into());
        self.tips.len()
    }

    pub fn tips(&self) -> &[String] {
        &self.tips
    }

    /// Make tip `number` (1-based) the free-text instruction.
    pub fn use_tip(&mut self, number: usize) -> Option<&str> {
        let tip = self.tips.get(number.checked_sub(1)?)?;
        self.instruction = Some(tip_instruction(tip));
        self.instruction.as_deref()
    }
}

/// Clears the in-flight flag when the worker finishes, even on panic.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::MockGenerator;

    fn session_with(mock: MockGenerator) -> (Session, Arc<MockGenerator>, mpsc::Receiver<SessionEvent>) {
        let mock = Arc::new(mock);
        let (session, rx) = Session::new(PayloadAssembler::default(), "mock-model", GenerationParams::default());
        (session.with_generator(mock.clone()), mock, rx)
    }

    #[tokio::test]
    async fn second_trigger_while_pending_is_busy() {
        let (mut session, _mock, mut rx) =
            session_with(MockGenerator::new().with_delay(Duration::from_millis(200)));
        session.evidence_mut().add_text("Login must lock after 3 failures");

        assert_eq!(session.trigger_generation(), TriggerOutcome::Started { items: 1 });
        assert!(session.is_generating());
        assert_eq!(session.trigger_generation(), TriggerOutcome::Busy);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Generated { .. }));
        assert!(!session.is_generating());
        assert_eq!(session.trigger_generation(), TriggerOutcome::Started { items: 1 });
    }

    #[tokio::test]
    async fn worker_uses_snapshot_taken_at_trigger() {
        let (mut session, mock, mut rx) =
            session_with(MockGenerator::new().with_delay(Duration::from_millis(50)));
        session.evidence_mut().add_text("first");
        session.evidence_mut().add_text("second");

        session.trigger_generation();
        session.evidence_mut().clear();
        rx.recv().await.unwrap();

        assert_eq!(mock.calls()[0].len(), 3);
    }

    #[tokio::test]
    async fn failures_are_posted_as_events() {
        let mock = MockGenerator::new();
        mock.push_error(ClarityError::client_rejected(400, "bad"));
        let (mut session, _mock, mut rx) = session_with(mock);
        session.set_artifact_type(ArtifactType::Bug);
        session.evidence_mut().add_text("crash");

        session.trigger_generation();
        match rx.recv().await.unwrap() {
            SessionEvent::GenerationFailed {
                artifact_type,
                error,
            } => {
                assert_eq!(artifact_type, ArtifactType::Bug);
                assert_eq!(error.kind(), crate::error::FailureKind::ClientRejected);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn unconfigured_or_empty_sessions_do_not_start() {
        let (mut session, _rx) =
            Session::new(PayloadAssembler::default(), "m", GenerationParams::default());
        session.evidence_mut().add_text("note");
        assert_eq!(session.trigger_generation(), TriggerOutcome::NotConfigured);

        let (session, _mock, _rx) = session_with(MockGenerator::new());
        assert_eq!(session.trigger_generation(), TriggerOutcome::EmptyDossier);
    }

    #[tokio::test]
    async fn context_and_instruction_reach_the_payload() {
        let (mut session, mock, mut rx) = session_with(MockGenerator::new());
        session.set_context(DomainContext::new("ctx.md", "Pharmacy stock control"));
        let number = session.record_tip("Expiry dates are not validated");
        assert!(session.use_tip(number).is_some());
        session.evidence_mut().add_text("stock screen");

        session.trigger_generation();
        rx.recv().await.unwrap();

        let instruction = mock.calls()[0][0].as_text().unwrap().to_string();
        assert!(instruction.contains("Pharmacy stock control"));
        assert!(instruction.contains("Expiry dates are not validated"));
    }

    struct PanickingGenerator;

    #[async_trait::async_trait]
    impl Generator for PanickingGenerator {
        async fn generate(
            &self,
            _payload: crate::payload::Payload,
            _model: &str,
            _params: &GenerationParams,
        ) -> crate::generator::GenerationResult {
            panic!("generator blew up");
        }
    }

    #[tokio::test]
    async fn worker_panic_is_reported_as_failure() {
        let (session, mut rx) =
            Session::new(PayloadAssembler::default(), "m", GenerationParams::default());
        let mut session = session.with_generator(Arc::new(PanickingGenerator));
        session.evidence_mut().add_text("note");

        session.trigger_generation();
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("a panicking worker must still post an event");
        match event.unwrap() {
            SessionEvent::GenerationFailed { error, .. } => {
                assert_eq!(error.kind(), crate::error::FailureKind::Internal);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!session.is_generating());
    }

    struct StillScreen;

    #[async_trait::async_trait]
    impl ObservationSource for StillScreen {
        async fn capture(&self) -> Result<Option<crate::observation::Observation>> {
            Ok(Some(crate::observation::Observation {
                image: image::DynamicImage::new_rgb8(2, 2),
                label: "screen".to_string(),
            }))
        }
    }

    #[tokio::test]
    async fn ambient_stop_request_does_not_wait_for_the_model() {
        let (mut session, _mock, mut rx) =
            session_with(MockGenerator::new().with_delay(Duration::from_millis(500)));
        assert_eq!(
            session.start_ambient(Box::new(StillScreen), Duration::from_secs(60)),
            AmbientStart::Started
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        let handle = session.request_ambient_stop().expect("loop was running");
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!session.is_ambient_running());
        assert!(session.request_ambient_stop().is_none());

        tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .expect("loop exits after the in-flight observation");
        assert!(matches!(rx.recv().await, Some(SessionEvent::Tip { .. })));
    }

    #[test]
    fn use_tip_rejects_bad_numbers() {
        let (mut session, _rx) =
            Session::new(PayloadAssembler::default(), "m", GenerationParams::default());
        session.record_tip("one");
        assert!(session.use_tip(0).is_none());
        assert!(session.use_tip(2).is_none());
        assert!(session.instruction().is_none());
    }

    #[test]
    fn blank_instruction_clears_it() {
        let (mut session, _rx) =
            Session::new(PayloadAssembler::default(), "m", GenerationParams::default());
        session.set_instruction("focus on errors");
        assert_eq!(session.instruction(), Some("focus on errors"));
        session.set_instruction("  ");
        assert!(session.instruction().is_none());
    }
}
