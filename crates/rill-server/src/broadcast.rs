//! Observer fan-out.
//!
//! Maintains the set of live-channel observers per notebook. Each observer
//! has its own unbounded channel, so fan-out never blocks on a slow
//! consumer; observers whose channel has closed are pruned on the next
//! broadcast. There is no replay: observers attaching late see only what
//! comes after.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use rill_core::model::NotebookId;

use crate::protocol::ServerMessage;

type ObserverMap = HashMap<NotebookId, HashMap<u64, mpsc::UnboundedSender<ServerMessage>>>;

/// Routes server messages to every observer of a notebook.
#[derive(Default)]
pub struct Broadcaster {
    observers: Mutex<ObserverMap>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer; returns its id and the message stream.
    pub fn attach(&self, notebook_id: &NotebookId) -> (u64, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers
            .lock()
            .expect("observer table poisoned")
            .entry(notebook_id.clone())
            .or_default()
            .insert(id, tx);
        (id, rx)
    }

    /// Detach an observer.
    pub fn detach(&self, notebook_id: &NotebookId, observer_id: u64) {
        let mut observers = self.observers.lock().expect("observer table poisoned");
        if let Some(entry) = observers.get_mut(notebook_id) {
            entry.remove(&observer_id);
            if entry.is_empty() {
                observers.remove(notebook_id);
            }
        }
    }

    /// Send a message to every observer of the notebook, dropping the ones
    /// whose channel has closed.
    pub fn broadcast(&self, notebook_id: &NotebookId, message: ServerMessage) {
        let mut observers = self.observers.lock().expect("observer table poisoned");
        let Some(entry) = observers.get_mut(notebook_id) else {
            return;
        };
        entry.retain(|_, tx| tx.send(message.clone()).is_ok());
        if entry.is_empty() {
            observers.remove(notebook_id);
        }
    }

    /// Number of live observers for a notebook.
    pub fn observer_count(&self, notebook_id: &NotebookId) -> usize {
        self.observers
            .lock()
            .expect("observer table poisoned")
            .get(notebook_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}
