//! Notifier task
//!
//! Owns the listener registry and delivers events one at a time, in the order
//! the dispatch task produced them. Running listeners on their own task keeps
//! slow listeners from stalling callback intake, and means a listener can call
//! back into the system without deadlocking it.

use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::command::Reply;
use crate::events::{EventListener, ListenerRegistry, RegistryStats, SharedEvent};

pub(crate) enum Notification {
    Event(SharedEvent),
    Register {
        listener: Box<dyn EventListener>,
        reply: Reply<()>,
    },
    Remove {
        name: String,
        reply: Reply<()>,
    },
    Barrier(oneshot::Sender<()>),
    Shutdown(Option<oneshot::Sender<()>>),
}

pub(crate) struct Notifier {
    registry: ListenerRegistry,
    receiver: mpsc::UnboundedReceiver<Notification>,
    stats: Arc<Mutex<RegistryStats>>,
}

impl Notifier {
    pub(crate) fn new(
        registry: ListenerRegistry,
        receiver: mpsc::UnboundedReceiver<Notification>,
        stats: Arc<Mutex<RegistryStats>>,
    ) -> Self {
        Self {
            registry,
            receiver,
            stats,
        }
    }

    /// Register listeners supplied before the system started, then serve
    /// notifications until shutdown
    pub(crate) async fn run(mut self, initial_listeners: Vec<Box<dyn EventListener>>) {
        for listener in initial_listeners {
            let name = listener.name();
            if let Err(e) = self.registry.register(listener).await {
                warn!(listener = name, error = %e, "Failed to register startup listener");
            }
        }
        self.publish_stats();

        while let Some(notification) = self.receiver.recv().await {
            match notification {
                Notification::Event(event) => {
                    self.registry.dispatch(&event).await;
                }
                Notification::Register { listener, reply } => {
                    let _ = reply.send(self.registry.register(listener).await);
                }
                Notification::Remove { name, reply } => {
                    let _ = reply.send(self.registry.remove(&name).await);
                }
                Notification::Barrier(reply) => {
                    let _ = reply.send(());
                }
                Notification::Shutdown(reply) => {
                    self.registry.shutdown().await;
                    self.publish_stats();
                    debug!("Notifier stopped");
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                    return;
                }
            }
            self.publish_stats();
        }

        // Dispatcher went away without a shutdown notification
        self.registry.shutdown().await;
        self.publish_stats();
    }

    fn publish_stats(&self) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        *stats = self.registry.stats().clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{Backend, ManagerHandle};
    use crate::events::listeners::RecordingListener;
    use crate::events::{Event, EventMetadata, ManagerEvent};

    #[tokio::test]
    async fn test_delivers_in_order_and_answers_barrier() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stats = Arc::new(Mutex::new(RegistryStats::default()));
        let recorder = RecordingListener::new("recorder");
        let events = recorder.events();
        let task = tokio::spawn(
            Notifier::new(ListenerRegistry::new(), receiver, Arc::clone(&stats))
                .run(vec![Box::new(recorder)]),
        );

        let manager = ManagerHandle::new(Backend::Utxo, 1);
        for sequence in 1..=3 {
            sender
                .send(Notification::Event(Arc::new(Event::Manager {
                    metadata: EventMetadata::new(sequence, "test"),
                    manager,
                    event: ManagerEvent::SyncStarted,
                })))
                .ok();
        }
        let (barrier, reached) = oneshot::channel();
        sender.send(Notification::Barrier(barrier)).ok();
        reached.await.unwrap();

        assert_eq!(events.sequences(), vec![1, 2, 3]);

        let (reply, done) = oneshot::channel();
        sender.send(Notification::Shutdown(Some(reply))).ok();
        done.await.unwrap();
        task.await.unwrap();

        let stats = stats.lock().unwrap().clone();
        assert_eq!(stats.total_events_dispatched, 3);
        assert_eq!(stats.listeners_registered, 1);
    }
}
