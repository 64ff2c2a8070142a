//! In-process change feed.
//!
//! Every committed mutation on a trip publishes a [`ChangeEvent`]. Viewers
//! subscribe per trip and re-read the affected collection when an event
//! arrives, so their state converges shortly after each commit.

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    Stream, StreamExt,
};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    TripUpdated,
    TripDeleted,
    MembersChanged,
    FoldersChanged,
    TasksChanged,
    PackersChanged { task_id: String },
}

impl ChangeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChangeKind::TripUpdated => "trip_updated",
            ChangeKind::TripDeleted => "trip_deleted",
            ChangeKind::MembersChanged => "members_changed",
            ChangeKind::FoldersChanged => "folders_changed",
            ChangeKind::TasksChanged => "tasks_changed",
            ChangeKind::PackersChanged { .. } => "packers_changed",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChangeEvent {
    pub trip_id: String,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

/// What a subscriber sees: either one change, or a notice that it fell
/// behind and has to re-read everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Change(ChangeEvent),
    Resync,
}

#[derive(Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, trip_id: &str, kind: ChangeKind) {
        let event = ChangeEvent {
            trip_id: trip_id.to_string(),
            kind,
        };
        match self.tx.send(event) {
            Ok(receivers) => debug!(trip_id, receivers, "change published"),
            // Nobody is watching; nothing to deliver.
            Err(_) => debug!(trip_id, "change published without viewers"),
        }
    }

    pub fn subscribe(&self, trip_id: impl Into<String>) -> TripSubscription {
        TripSubscription {
            trip_id: trip_id.into(),
            rx: self.tx.subscribe(),
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct TripSubscription {
    trip_id: String,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl TripSubscription {
    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }

    /// Waits for the next update for this trip. `None` once the notifier is gone.
    pub async fn recv(&mut self) -> Option<Update> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.trip_id == self.trip_id => return Some(Update::Change(event)),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(trip_id = %self.trip_id, skipped, "viewer lagged behind change feed");
                    return Some(Update::Resync);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Update> + Send + 'static {
        let trip_id = self.trip_id;
        BroadcastStream::new(self.rx).filter_map(move |item| match item {
            Ok(event) if event.trip_id == trip_id => Some(Update::Change(event)),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(trip_id = %trip_id, skipped, "viewer lagged behind change feed");
                Some(Update::Resync)
            }
        })
    }
}
