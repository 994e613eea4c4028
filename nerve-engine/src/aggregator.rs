//! Aggregator actor
//!
//! A single task owns the [`AggregatorState`]. Every request travels over one
//! bounded mpsc inbox and is answered through a oneshot channel, so requests
//! are applied in arrival order and reads always see a consistent state. The
//! retention sweep is a timer branch of the same loop.

use crate::aggregate::{AggregateQuery, WindowAggregates};
use crate::config::AggregatorConfig;
use crate::correlation::CorrelationReport;
use crate::fusion::FusionType;
use crate::state::{AggregatorState, CleanupReport, HierarchicalEvent, IngestOutcome};
use crate::stats::StreamStats;
use nerve_core::config::ConfigError;
use nerve_core::{Clock, RandomSource, StdRandom};
use nerve_event::{Event, EventBuilder, Metadata};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Error talking to the aggregator
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("Aggregator is closed")]
    Closed,

    #[error("Aggregator inbox is full")]
    Full,

    #[error("Invalid aggregator configuration: {0}")]
    Config(#[from] ConfigError),
}

enum Command {
    Ingest(Event),
    IngestBuilt(EventBuilder),
    WindowAggregates {
        query: AggregateQuery,
        reply: oneshot::Sender<WindowAggregates>,
    },
    Correlate {
        event_types: Vec<String>,
        time_window_secs: u64,
        reply: oneshot::Sender<CorrelationReport>,
    },
    CreateHierarchical {
        parent_type: String,
        children: Vec<Event>,
        metadata: Metadata,
        reply: oneshot::Sender<Arc<Event>>,
    },
    Fuse {
        events: Vec<Event>,
        fusion_type: FusionType,
        reply: oneshot::Sender<Arc<Event>>,
    },
    Hierarchy {
        parent_id: String,
        reply: oneshot::Sender<Option<HierarchicalEvent>>,
    },
    Cleanup(oneshot::Sender<CleanupReport>),
    Stats(oneshot::Sender<StreamStats>),
    Shutdown,
}

/// Running aggregation engine
pub struct Aggregator {
    handle: AggregatorHandle,
    task: JoinHandle<()>,
}

impl Aggregator {
    /// Spawn on the system clock with entropy-seeded load shedding
    pub fn spawn(config: AggregatorConfig) -> Result<Self, AggregatorError> {
        Self::spawn_with(config, Clock::real(), Box::new(StdRandom::from_entropy()))
    }

    /// Spawn with explicit time and randomness
    pub fn spawn_with(
        config: AggregatorConfig,
        clock: Clock,
        random: Box<dyn RandomSource>,
    ) -> Result<Self, AggregatorError> {
        let inbox_capacity = config.inbox_capacity;
        let subscriber_capacity = config.subscriber_capacity;
        let state = AggregatorState::with_sources(config, clock, random)?;

        let (commands, inbox) = mpsc::channel(inbox_capacity);
        let (events, _) = broadcast::channel(subscriber_capacity);
        let (running, stopped) = watch::channel(());

        let task = tokio::spawn(run(state, inbox, events.clone(), running));
        info!(inbox_capacity, subscriber_capacity, "Aggregator started");

        Ok(Self {
            handle: AggregatorHandle {
                commands,
                events,
                stopped,
            },
            task,
        })
    }

    pub fn handle(&self) -> AggregatorHandle {
        self.handle.clone()
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.handle.shutdown().await;
        let _ = self.task.await;
    }
}

async fn run(
    mut state: AggregatorState,
    mut inbox: mpsc::Receiver<Command>,
    events: broadcast::Sender<Arc<Event>>,
    // Dropped on exit, which is what `AggregatorHandle::stopped` observes
    _running: watch::Sender<()>,
) {
    let mut cleanup = tokio::time::interval(state.config().cleanup_interval());
    cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    cleanup.tick().await;

    loop {
        tokio::select! {
            command = inbox.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => dispatch(&mut state, &events, command),
            },
            _ = cleanup.tick() => {
                state.cleanup();
            }
        }
    }

    info!("Aggregator stopped");
}

fn dispatch(state: &mut AggregatorState, events: &broadcast::Sender<Arc<Event>>, command: Command) {
    // A send error only means there are no subscribers
    let publish = |event: &Arc<Event>| {
        let _ = events.send(Arc::clone(event));
    };

    match command {
        Command::Ingest(event) => {
            if let IngestOutcome::Accepted(event) = state.add_event(event) {
                publish(&event);
            }
        }
        Command::IngestBuilt(builder) => {
            if let IngestOutcome::Accepted(event) = state.add_built(builder) {
                publish(&event);
            }
        }
        Command::WindowAggregates { query, reply } => {
            let _ = reply.send(state.window_aggregates(&query));
        }
        Command::Correlate {
            event_types,
            time_window_secs,
            reply,
        } => {
            let _ = reply.send(state.correlated_events(&event_types, time_window_secs));
        }
        Command::CreateHierarchical {
            parent_type,
            children,
            metadata,
            reply,
        } => {
            let parent = state.create_hierarchical_event(&parent_type, children, metadata);
            publish(&parent);
            let _ = reply.send(parent);
        }
        Command::Fuse {
            events,
            fusion_type,
            reply,
        } => {
            let fused = state.fuse_events(&events, fusion_type);
            publish(&fused);
            let _ = reply.send(fused);
        }
        Command::Hierarchy { parent_id, reply } => {
            let _ = reply.send(state.hierarchy(&parent_id).cloned());
        }
        Command::Cleanup(reply) => {
            let _ = reply.send(state.cleanup());
        }
        Command::Stats(reply) => {
            let _ = reply.send(state.stream_stats());
        }
        Command::Shutdown => {}
    }
}

/// Cloneable client of a running [`Aggregator`]
#[derive(Clone)]
pub struct AggregatorHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<Arc<Event>>,
    stopped: watch::Receiver<()>,
}

impl AggregatorHandle {
    /// Submit an event, waiting for inbox capacity
    pub async fn add_event(&self, event: Event) -> Result<(), AggregatorError> {
        self.commands
            .send(Command::Ingest(event))
            .await
            .map_err(|_| AggregatorError::Closed)
    }

    /// Submit an event without waiting
    pub fn try_add_event(&self, event: Event) -> Result<(), AggregatorError> {
        self.commands
            .try_send(Command::Ingest(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => AggregatorError::Full,
                mpsc::error::TrySendError::Closed(_) => AggregatorError::Closed,
            })
    }

    /// Submit an event built inside the loop, so a builder without a
    /// timestamp is stamped from the aggregator's clock
    pub async fn add_built(&self, builder: EventBuilder) -> Result<(), AggregatorError> {
        self.commands
            .send(Command::IngestBuilt(builder))
            .await
            .map_err(|_| AggregatorError::Closed)
    }

    pub async fn window_aggregates(
        &self,
        query: AggregateQuery,
    ) -> Result<WindowAggregates, AggregatorError> {
        self.request(|reply| Command::WindowAggregates { query, reply })
            .await
    }

    pub async fn correlated_events(
        &self,
        event_types: Vec<String>,
        time_window_secs: u64,
    ) -> Result<CorrelationReport, AggregatorError> {
        self.request(|reply| Command::Correlate {
            event_types,
            time_window_secs,
            reply,
        })
        .await
    }

    pub async fn create_hierarchical_event(
        &self,
        parent_type: impl Into<String>,
        children: Vec<Event>,
        metadata: Metadata,
    ) -> Result<Arc<Event>, AggregatorError> {
        let parent_type = parent_type.into();
        self.request(|reply| Command::CreateHierarchical {
            parent_type,
            children,
            metadata,
            reply,
        })
        .await
    }

    pub async fn fuse_events(
        &self,
        events: Vec<Event>,
        fusion_type: FusionType,
    ) -> Result<Arc<Event>, AggregatorError> {
        self.request(|reply| Command::Fuse {
            events,
            fusion_type,
            reply,
        })
        .await
    }

    pub async fn hierarchy(
        &self,
        parent_id: impl Into<String>,
    ) -> Result<Option<HierarchicalEvent>, AggregatorError> {
        let parent_id = parent_id.into();
        self.request(|reply| Command::Hierarchy { parent_id, reply })
            .await
    }

    /// Force a retention sweep
    pub async fn run_cleanup(&self) -> Result<CleanupReport, AggregatorError> {
        self.request(Command::Cleanup).await
    }

    pub async fn stream_stats(&self) -> Result<StreamStats, AggregatorError> {
        self.request(Command::Stats).await
    }

    /// Receive every event the aggregator accepts from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.events.subscribe()
    }

    /// Ask the loop to stop; requests queued behind it fail with `Closed`
    pub async fn shutdown(&self) -> Result<(), AggregatorError> {
        debug!("Aggregator shutdown requested");
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| AggregatorError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Exit signal that does not keep the aggregator alive, unlike a handle
    pub fn stopped(&self) -> watch::Receiver<()> {
        self.stopped.clone()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AggregatorError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| AggregatorError::Closed)?;
        response.await.map_err(|_| AggregatorError::Closed)
    }
}

impl std::fmt::Debug for AggregatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorHandle")
            .field("closed", &self.commands.is_closed())
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}
