//! Ambient observation loop.
//!
//! Captures an observation, asks the model for one refinement tip, posts it as
//! [`SessionEvent::Tip`], then idles. Shutdown is only observed while idling:
//! a request that is already on the wire always completes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_MODEL;
use crate::context::DomainContext;
use crate::error::Result;
use crate::generator::{GenerationParams, Generator};
use crate::observation::ObservationSource;
use crate::payload::PayloadAssembler;
use crate::session::SessionEvent;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

pub struct AmbientLoop {
    source: Box<dyn ObservationSource>,
    generator: Arc<dyn Generator>,
    assembler: Arc<PayloadAssembler>,
    model: String,
    params: GenerationParams,
    interval: Duration,
    context: watch::Receiver<Option<DomainContext>>,
    events: mpsc::Sender<SessionEvent>,
}

impl AmbientLoop {
    pub fn new(
        source: Box<dyn ObservationSource>,
        generator: Arc<dyn Generator>,
        assembler: Arc<PayloadAssembler>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            source,
            generator,
            assembler,
            model: DEFAULT_MODEL.to_string(),
            params: GenerationParams::default(),
            interval: DEFAULT_INTERVAL,
            context: watch::channel(None).1,
            events,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Follow the session's domain context; each cycle reads the latest value.
    pub fn with_context(mut self, context: watch::Receiver<Option<DomainContext>>) -> Self {
        self.context = context;
        self
    }

    pub fn spawn(self) -> AmbientHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        AmbientHandle { shutdown, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs_f64(), "ambient loop started");
        loop {
            match self.observe_once().await {
                Ok(Some(event)) => {
                    if self.events.send(event).await.is_err() {
                        debug!("event receiver dropped, ambient loop exiting");
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(kind = %e.kind(), error = %e, "ambient observation failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("ambient loop stopped");
    }

    async fn observe_once(&self) -> Result<Option<SessionEvent>> {
        let Some(observation) = self.source.capture().await? else {
            return Ok(None);
        };

        let context = self.context.borrow().clone();
        let payload = self
            .assembler
            .assemble_observation(&observation.image, context.as_ref().map(|c| c.content()))?;

        let generated = self.generator.generate(payload, &self.model, &self.params).await?;
        let text = generated.markdown.trim();
        if text.is_empty() {
            debug!(source = %observation.label, "model returned an empty tip");
            return Ok(None);
        }

        debug!(source = %observation.label, "tip received");
        Ok(Some(SessionEvent::Tip {
            text: text.to_string(),
            source: observation.label,
        }))
    }
}

/// Running ambient loop
pub struct AmbientHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AmbientHandle {
    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(self) {
        self.signal_stop();
        self.join().await;
    }

    /// Ask the loop to exit once the current observation completes. Does not wait.
    pub fn signal_stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "ambient task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::MockGenerator;
    use crate::observation::Observation;
    use async_trait::async_trait;
    use image::DynamicImage;
    use std::time::Instant;

    struct FixedSource;

    #[async_trait]
    impl ObservationSource for FixedSource {
        async fn capture(&self) -> Result<Option<Observation>> {
            Ok(Some(Observation {
                image: DynamicImage::new_rgb8(2, 2),
                label: "screen".to_string(),
            }))
        }
    }

    fn ambient(mock: Arc<MockGenerator>, interval: Duration) -> (AmbientLoop, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let ambient = AmbientLoop::new(Box::new(FixedSource), mock, Arc::new(PayloadAssembler::default()), tx)
            .with_interval(interval);
        (ambient, rx)
    }

    #[tokio::test]
    async fn posts_tips_and_stops_during_idle() {
        let mock = Arc::new(MockGenerator::new());
        mock.push_markdown("  Add a test case for expired sessions.  ");
        let (ambient, mut rx) = ambient(mock, Duration::from_secs(60));

        let handle = ambient.spawn();
        match rx.recv().await.unwrap() {
            SessionEvent::Tip { text, source } => {
                assert_eq!(text, "Add a test case for expired sessions.");
                assert_eq!(source, "screen");
            }
            other => panic!("unexpected event {other:?}"),
        }

        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("loop should stop without waiting for the interval");
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_request() {
        let mock = Arc::new(MockGenerator::new().with_delay(Duration::from_millis(150)));
        let (ambient, mut rx) = ambient(mock.clone(), Duration::from_secs(60));

        let handle = ambient.spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        handle.stop().await;
        assert!(started.elapsed() >= Duration::from_millis(100));

        assert!(matches!(rx.recv().await, Some(SessionEvent::Tip { .. })));
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn signal_stop_returns_before_the_request_completes() {
        let mock = Arc::new(MockGenerator::new().with_delay(Duration::from_millis(300)));
        let (ambient, mut rx) = ambient(mock, Duration::from_secs(60));

        let handle = ambient.spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        handle.signal_stop();
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(!handle.is_finished());

        tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .expect("loop should exit after the in-flight request");
        assert!(matches!(rx.recv().await, Some(SessionEvent::Tip { .. })));
    }

    #[tokio::test]
    async fn context_changes_are_picked_up() {
        let mock = Arc::new(MockGenerator::new());
        let (tx_ctx, rx_ctx) = watch::channel(None);
        let (ambient, mut rx) = ambient(mock.clone(), Duration::from_millis(20));
        let ambient = ambient.with_context(rx_ctx);

        tx_ctx.send_replace(Some(DomainContext::new("ctx.md", "Fleet telematics")));
        let handle = ambient.spawn();
        rx.recv().await.unwrap();
        handle.stop().await;

        let instruction = mock.calls()[0][0].as_text().unwrap().to_string();
        assert!(instruction.contains("Fleet telematics"));
    }
}
