//! Shared per-folder runtime state
//!
//! The [`SyncRegistry`] is the one place the daemon, the IPC server and the
//! folder loops meet. Each folder gets a [`FolderControl`] holding the
//! in-memory activity flags and the notifications used to poke its loops.
//!
//! Activity is derived, not set: a folder is `error` if halted, otherwise
//! `paused`, otherwise `syncing` while operations are in flight, otherwise
//! `scanning` while a scan runs, otherwise `idle`. Every change of the
//! derived value is broadcast as [`SyncEvent::ActivityChanged`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, Notify, RwLock};
use tracing::{debug, info};

use foldsync_core::domain::{FolderActivity, FolderId, SyncEvent};

/// Buffered events per subscriber before slow receivers start lagging
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct ControlState {
    scanning: bool,
    in_flight: usize,
    paused: bool,
    error: Option<String>,
    activity: FolderActivity,
}

impl ControlState {
    fn derive(&self) -> FolderActivity {
        if let Some(message) = &self.error {
            FolderActivity::Error(message.clone())
        } else if self.paused {
            FolderActivity::Paused
        } else if self.in_flight > 0 {
            FolderActivity::Syncing
        } else if self.scanning {
            FolderActivity::Scanning
        } else {
            FolderActivity::Idle
        }
    }
}

/// Runtime handle of one folder
pub struct FolderControl {
    folder_id: FolderId,
    state: Mutex<ControlState>,
    rescan: Notify,
    wake: Notify,
    events: broadcast::Sender<SyncEvent>,
}

impl FolderControl {
    fn new(folder_id: FolderId, paused: bool, events: broadcast::Sender<SyncEvent>) -> Self {
        let state = ControlState {
            paused,
            activity: if paused {
                FolderActivity::Paused
            } else {
                FolderActivity::Idle
            },
            ..ControlState::default()
        };
        Self {
            folder_id,
            state: Mutex::new(state),
            rescan: Notify::new(),
            wake: Notify::new(),
            events,
        }
    }

    pub fn folder_id(&self) -> FolderId {
        self.folder_id
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `change` and publishes the new activity if it differs
    fn update(&self, change: impl FnOnce(&mut ControlState)) {
        let changed = {
            let mut state = self.lock();
            change(&mut state);
            let next = state.derive();
            if next == state.activity {
                None
            } else {
                state.activity = next.clone();
                Some(next)
            }
        };

        if let Some(activity) = changed {
            debug!(folder_id = %self.folder_id, activity = %activity, "Folder activity changed");
            let _ = self.events.send(SyncEvent::ActivityChanged {
                folder_id: self.folder_id,
                activity,
            });
        }
    }

    pub fn activity(&self) -> FolderActivity {
        self.lock().activity.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn is_halted(&self) -> bool {
        self.lock().error.is_some()
    }

    pub fn set_scanning(&self, scanning: bool) {
        self.update(|s| s.scanning = scanning);
    }

    pub fn operation_started(&self) {
        self.update(|s| s.in_flight += 1);
    }

    pub fn operation_finished(&self) {
        self.update(|s| s.in_flight = s.in_flight.saturating_sub(1));
    }

    /// Returns true if the flag changed
    pub fn set_paused(&self, paused: bool) -> bool {
        let mut changed = false;
        self.update(|s| {
            changed = s.paused != paused;
            s.paused = paused;
        });
        changed
    }

    /// Marks the folder halted; it stays in `error` until re-registered
    pub fn halt(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| s.error = Some(message.clone()));
        let _ = self.events.send(SyncEvent::FolderHalted {
            folder_id: self.folder_id,
            message,
        });
    }

    /// Asks the remote scan loop to run now
    pub fn request_rescan(&self) {
        self.rescan.notify_one();
    }

    pub async fn rescan_requested(&self) {
        self.rescan.notified().await;
    }

    /// Asks the executor loop to look for ready operations now
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub async fn woken(&self) {
        self.wake.notified().await;
    }
}

/// Registry of running folders and the event bus they publish on
pub struct SyncRegistry {
    folders: RwLock<HashMap<FolderId, Arc<FolderControl>>>,
    events: broadcast::Sender<SyncEvent>,
}

impl Default for SyncRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            folders: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Registers a folder, replacing any previous (possibly halted) control
    pub async fn register(&self, folder_id: FolderId, paused: bool) -> Arc<FolderControl> {
        let control = Arc::new(FolderControl::new(folder_id, paused, self.events.clone()));
        self.folders
            .write()
            .await
            .insert(folder_id, Arc::clone(&control));
        info!(folder_id = %folder_id, paused, "Folder registered");
        control
    }

    pub async fn unregister(&self, folder_id: FolderId) -> bool {
        self.folders.write().await.remove(&folder_id).is_some()
    }

    pub async fn get(&self, folder_id: FolderId) -> Option<Arc<FolderControl>> {
        self.folders.read().await.get(&folder_id).cloned()
    }

    /// Current activity, `None` if the folder is not running
    pub async fn activity(&self, folder_id: FolderId) -> Option<FolderActivity> {
        self.get(folder_id).await.map(|c| c.activity())
    }

    /// Returns false if the folder is not running
    pub async fn set_paused(&self, folder_id: FolderId, paused: bool) -> bool {
        match self.get(folder_id).await {
            Some(control) => {
                control.set_paused(paused);
                if !paused {
                    control.request_rescan();
                    control.wake();
                }
                true
            }
            None => false,
        }
    }

    pub async fn request_rescan(&self, folder_id: FolderId) -> bool {
        match self.get(folder_id).await {
            Some(control) => {
                control.request_rescan();
                true
            }
            None => false,
        }
    }

    pub async fn wake(&self, folder_id: FolderId) -> bool {
        match self.get(folder_id).await {
            Some(control) => {
                control.wake();
                true
            }
            None => false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Publishes an event; dropped silently when nobody listens
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }
}
