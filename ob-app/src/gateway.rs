//! Event multiplexer: the HTTP bridge and channel adapters feed a single bounded queue.

use crate::observe::Observer;
use ob_channels::{ButtonClick, InboundMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Inbound(InboundMessage),
    Action(ButtonClick),
}

impl GatewayEvent {
    fn kind(&self) -> &'static str {
        match self {
            Self::Inbound(_) => "inbound",
            Self::Action(_) => "action",
        }
    }
}

pub struct Gateway {
    observer: Arc<Observer>,
    events: tokio::sync::Mutex<mpsc::Receiver<GatewayEvent>>,
    tasks: TaskTracker,
}

impl Gateway {
    pub fn new(observer: Arc<Observer>, events: mpsc::Receiver<GatewayEvent>) -> Self {
        Self {
            observer,
            events: tokio::sync::Mutex::new(events),
            tasks: TaskTracker::new(),
        }
    }

    /// Runs until `shutdown` fires or every sender is dropped, then drains
    /// in-flight events and background writes.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop(shutdown).await;
            self.tasks.close();
            self.tasks.wait().await;
            self.observer.flush_background().await;
            tracing::info!("gateway drained");
        })
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run_loop(&self, shutdown: CancellationToken) {
        let mut events = self.events.lock().await;
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                return;
            };

            // Events for different conversations must not wait on each other.
            let observer = self.observer.clone();
            self.tasks.spawn(async move {
                let kind = event.kind();
                tracing::debug!(kind, "dispatching gateway event");
                match event {
                    GatewayEvent::Inbound(inbound) => observer.handle_inbound(inbound).await,
                    GatewayEvent::Action(click) => observer.handle_action(click).await,
                }
            });
        }
    }
}
