use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::builder::PayloadBuilder;
use crate::config::BridgeConfig;
use crate::controller::{DeliveryController, ListenerId, ShareListener};
use crate::error::{Result, ShareBridgeError};
use crate::event::{classify, InboundEvent, ShareRequest};
use crate::models::SharePayload;
use crate::poller::{InboxPoller, PollTrigger};
use crate::probe::MetadataProber;
use crate::resolver::{ContentRef, ContentRegistry, ReferenceResolver};

/// Classify, build and deliver. Shared by direct events and the inbox poller.
pub struct SharePipeline {
    builder: PayloadBuilder,
    controller: DeliveryController,
    inbox_dir: Option<PathBuf>,
}

impl SharePipeline {
    pub fn new(
        builder: PayloadBuilder,
        controller: DeliveryController,
        inbox_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            builder,
            controller,
            inbox_dir,
        }
    }

    pub fn controller(&self) -> &DeliveryController {
        &self.controller
    }

    /// Returns the delivered payload, or `None` when the event was not a
    /// share or was already delivered through the inbox.
    pub async fn handle_event(&self, event: InboundEvent) -> Option<SharePayload> {
        let Some(request) = classify(&event) else {
            debug!("Ignoring event that carries no share");
            return None;
        };

        if !self.claim_inbox_files(&request).await {
            info!("Share already delivered from the inbox, skipping direct event");
            return None;
        }

        let payload = self.builder.build(request).await?;
        self.controller.deliver(payload.clone()).await;
        Some(payload)
    }

    /// Mark inbox files named by a direct event as seen. Returns `false` if
    /// the event names inbox files and all of them were already delivered.
    async fn claim_inbox_files(&self, request: &ShareRequest) -> bool {
        let Some(inbox_dir) = &self.inbox_dir else {
            return true;
        };
        // Staged files are claimed by the poller before they get here.
        if matches!(request, ShareRequest::File { staged: true, .. }) {
            return true;
        }

        let mut named = 0;
        let mut fresh = 0;
        for reference in request.references() {
            let ContentRef::Path(path) = ContentRef::parse(reference) else {
                continue;
            };
            if !path.starts_with(inbox_dir) {
                continue;
            }
            named += 1;
            if self.controller.mark_seen(&path.to_string_lossy()).await {
                fresh += 1;
            }
        }
        named == 0 || fresh > 0
    }
}

/// Entry point for host code: feeds platform events in, hands payloads out,
/// and drives the inbox poll from app lifecycle hooks.
#[derive(Clone)]
pub struct ShareBridge {
    pipeline: Arc<SharePipeline>,
    poller: Option<InboxPoller>,
    initial_poll_started: Arc<AtomicBool>,
}

impl ShareBridge {
    pub fn new(config: BridgeConfig, registry: Arc<dyn ContentRegistry>) -> Result<Self> {
        Self::with_prober(config, registry, MetadataProber::default())
    }

    pub fn with_prober(
        config: BridgeConfig,
        registry: Arc<dyn ContentRegistry>,
        prober: MetadataProber,
    ) -> Result<Self> {
        config.validate()?;

        let resolver = ReferenceResolver::new(
            registry,
            config.cache_dir.clone(),
            config.external_storage_dir.clone(),
        );
        let pipeline = Arc::new(SharePipeline::new(
            PayloadBuilder::new(resolver, prober),
            DeliveryController::new(config.delivery),
            config.inbox_dir.clone(),
        ));
        let poller = config.inbox_dir.as_ref().map(|dir| {
            InboxPoller::new(
                dir.clone(),
                config.poll_schedule(),
                config.cleanup_delay(),
                Arc::clone(&pipeline),
            )
        });

        debug!(
            "Share bridge ready (cache {}, inbox {:?})",
            config.cache_dir.display(),
            config.inbox_dir
        );

        Ok(Self {
            pipeline,
            poller,
            initial_poll_started: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn controller(&self) -> &DeliveryController {
        self.pipeline.controller()
    }

    pub async fn handle_event(&self, event: InboundEvent) -> Option<SharePayload> {
        self.pipeline.handle_event(event).await
    }

    /// The most recent share, if any. The first call also starts an inbox
    /// poll session.
    pub async fn get_initial_share(&self) -> Option<SharePayload> {
        if !self.initial_poll_started.swap(true, Ordering::AcqRel) {
            if let Some(poller) = &self.poller {
                poller.start(PollTrigger::InitialQuery);
            }
        }

        self.controller()
            .get_initial_share()
            .await
            .filter(|payload| !payload.is_placeholder())
    }

    pub async fn on_intent_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(SharePayload) + Send + Sync + 'static,
    {
        self.register_listener(Arc::new(listener)).await
    }

    pub async fn register_listener(&self, listener: ShareListener) -> ListenerId {
        self.controller().register_listener(listener).await
    }

    pub async fn remove_listener(&self, id: ListenerId) -> Result<()> {
        self.controller().remove_listener(id).await
    }

    pub fn on_app_launch(&self) {
        self.start_poll(PollTrigger::Launch);
    }

    pub fn on_app_resume(&self) {
        self.start_poll(PollTrigger::Resume);
    }

    pub fn on_app_background(&self) {
        if let Some(poller) = &self.poller {
            poller.stop();
        }
    }

    pub fn shutdown(&self) {
        if let Some(poller) = &self.poller {
            poller.stop();
        }
        info!("Share bridge shut down");
    }

    /// Start a poll session by hand.
    pub fn poll_inbox(&self) {
        self.start_poll(PollTrigger::Manual);
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(InboxPoller::is_active)
    }

    fn start_poll(&self, trigger: PollTrigger) {
        if let Some(poller) = &self.poller {
            poller.start(trigger);
        }
    }

    /// Channel for hosts that receive platform events on their own threads.
    /// Events are processed in order on a spawned task.
    pub fn event_sender(&self, capacity: usize) -> EventSender {
        let (tx, mut rx) = mpsc::channel::<InboundEvent>(capacity);
        let bridge = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                bridge.handle_event(event).await;
            }
            debug!("Event channel closed");
        });
        EventSender { tx }
    }
}

#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<InboundEvent>,
}

impl EventSender {
    pub async fn send(&self, event: InboundEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| {
            error!("Failed to queue share event - bridge dropped");
            ShareBridgeError::ChannelSend
        })
    }

    /// For callers outside the runtime, such as JNI or FFI callbacks.
    pub fn blocking_send(&self, event: InboundEvent) -> Result<()> {
        self.tx
            .blocking_send(event)
            .map_err(|_| ShareBridgeError::ChannelSend)
    }
}
