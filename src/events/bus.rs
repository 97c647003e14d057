//! The event bus: listener registration and event dispatch
//!
//! # Registrations
//!
//! - **Key registrations** ([`EventBus::register`]) bind a listener to a
//!   [`RegistrationKey`]. Any number of listeners may share a key and a
//!   listener may hold several keys. They come and go with IMAP sessions.
//! - **Group registrations** ([`EventBus::register_group`],
//!   [`EventBus::initialize`]) bind exactly one listener to a [`Group`].
//!   A group listener receives every dispatched event whatever its keys.
//!
//! The bus starts [`BusState::Uninitialized`]. [`EventBus::initialize`]
//! binds the deployment's group topology in one step and may only be called
//! once. Key registration is allowed in both states.
//!
//! # Delivery
//!
//! Every registered listener owns a queue drained by a dedicated task, so a
//! listener sees events in the order they were dispatched and a retrying
//! listener delays only itself. Dispatch enqueues the event for each target:
//!
//! - [`ExecutionMode::Synchronous`] targets are awaited: `dispatch` returns
//!   once they succeeded or exhausted their retries.
//! - [`ExecutionMode::Asynchronous`] targets are not awaited.
//!
//! Listener failures never reach the caller of `dispatch`. Abandoned group
//! deliveries are stored in the bus's [`EventDeadLetters`].
//!
//! Registering listeners spawns tasks and therefore requires a tokio runtime.

use futures::channel::oneshot;
use futures::future::join_all;
use log::{debug, error, info};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::events::dead_letters::{EventDeadLetters, MemoryEventDeadLetters};
use crate::events::group::Group;
use crate::events::listener::{ExecutionMode, GroupMailboxListener, MailboxListener};
use crate::events::registration::{Registration, RegistrationKey};
use crate::events::retry::{DeliveryOutcome, RetryBackOffDeliver, RetryBackoffConfiguration};
use crate::events::Event;

/// Initialization state of the group topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusState {
    #[default]
    Uninitialized,
    Initialized,
}

/// Event handed to a listener task
enum Delivery {
    Async(Arc<Event>),
    Sync {
        event: Arc<Event>,
        ack: oneshot::Sender<()>,
    },
}

impl Delivery {
    fn into_parts(self) -> (Arc<Event>, Option<oneshot::Sender<()>>) {
        match self {
            Delivery::Async(event) => (event, None),
            Delivery::Sync { event, ack } => (event, Some(ack)),
        }
    }
}

/// Queue and task of one registered listener
struct Worker {
    listener: Arc<dyn MailboxListener>,
    sender: UnboundedSender<Delivery>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn(
        listener: Arc<dyn MailboxListener>,
        group: Option<Group>,
        deliver: RetryBackOffDeliver,
        dead_letters: Arc<dyn EventDeadLetters>,
    ) -> Self {
        let (sender, receiver) = unbounded_channel();
        let handle = tokio::spawn(listener_loop(receiver, listener.clone(), group, deliver, dead_letters));
        Self {
            listener,
            sender,
            handle,
        }
    }

    /// Queue the event unless the listener ignores it. Returns the
    /// acknowledgment to wait for when the listener is synchronous.
    fn enqueue(&self, event: &Arc<Event>) -> Option<oneshot::Receiver<()>> {
        if !self.listener.is_handling(event) {
            return None;
        }

        let (delivery, ack) = match self.listener.execution_mode() {
            ExecutionMode::Asynchronous => (Delivery::Async(event.clone()), None),
            ExecutionMode::Synchronous => {
                let (ack_tx, ack_rx) = oneshot::channel();
                (
                    Delivery::Sync {
                        event: event.clone(),
                        ack: ack_tx,
                    },
                    Some(ack_rx),
                )
            }
        };

        match self.sender.send(delivery) {
            Ok(()) => ack,
            Err(_) => {
                error!(
                    "Listener {} stopped, event {} not delivered",
                    self.listener.identity(),
                    event.id
                );
                None
            }
        }
    }
}

/// Drain a listener queue, one delivery at a time
async fn listener_loop(
    mut receiver: UnboundedReceiver<Delivery>,
    listener: Arc<dyn MailboxListener>,
    group: Option<Group>,
    deliver: RetryBackOffDeliver,
    dead_letters: Arc<dyn EventDeadLetters>,
) {
    while let Some(delivery) = receiver.recv().await {
        let (event, ack) = delivery.into_parts();
        let outcome = deliver.deliver(listener.as_ref(), &event).await;

        if let (DeliveryOutcome::Abandoned { .. }, Some(group)) = (&outcome, &group) {
            match dead_letters.store(group, &event).await {
                Ok(id) => info!("Stored event {} as dead letter {:?} of group {}", event.id, id.0, group),
                Err(e) => error!("Failed to store dead letter for event {} of group {}: {}", event.id, group, e),
            }
        }

        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
    debug!("Listener loop of {} stopped", listener.identity());
}

/// Address of the listener allocation, identifying it across registrations
type ListenerId = usize;

fn listener_id(listener: &Arc<dyn MailboxListener>) -> ListenerId {
    Arc::as_ptr(listener) as *const () as usize
}

struct KeyListener {
    worker: Worker,
    registrations: usize,
}

#[derive(Default)]
struct Registry {
    state: BusState,
    groups: HashMap<Group, Worker>,
    key_listeners: HashMap<ListenerId, KeyListener>,
    keys: HashMap<RegistrationKey, Vec<(u64, ListenerId)>>,
}

struct Shared {
    registry: RwLock<Registry>,
    deliver: RetryBackOffDeliver,
    dead_letters: Arc<dyn EventDeadLetters>,
    next_registration: AtomicU64,
}

impl Shared {
    fn unregister_key(&self, key: &RegistrationKey, registration_id: u64) {
        let mut registry = self.registry.write();

        let Some(bindings) = registry.keys.get_mut(key) else {
            return;
        };
        let Some(position) = bindings.iter().position(|(id, _)| *id == registration_id) else {
            return;
        };
        let (_, listener) = bindings.remove(position);
        if bindings.is_empty() {
            registry.keys.remove(key);
        }

        if let Some(key_listener) = registry.key_listeners.get_mut(&listener) {
            key_listener.registrations -= 1;
            if key_listener.registrations == 0 {
                // Dropping the sender lets the task finish its queue and stop
                registry.key_listeners.remove(&listener);
            }
        }
        debug!("Unregistered listener from key {}", key);
    }

    fn unregister_group(&self, group: &Group) {
        if self.registry.write().groups.remove(group).is_some() {
            info!("Unregistered group {}", group);
        }
    }
}

/// Registration and dispatch façade of mailbox events
pub struct EventBus {
    shared: Arc<Shared>,
}

impl EventBus {
    /// Create a bus logging delivery failures and keeping dead letters in memory
    pub fn new(configuration: RetryBackoffConfiguration) -> Self {
        Self::with_components(
            RetryBackOffDeliver::new(configuration),
            Arc::new(MemoryEventDeadLetters::new()),
        )
    }

    pub fn with_components(deliver: RetryBackOffDeliver, dead_letters: Arc<dyn EventDeadLetters>) -> Self {
        info!("EventBus created");
        Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry::default()),
                deliver,
                dead_letters,
                next_registration: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> BusState {
        self.shared.registry.read().state
    }

    pub fn dead_letters(&self) -> Arc<dyn EventDeadLetters> {
        self.shared.dead_letters.clone()
    }

    pub fn registered_groups(&self) -> Vec<Group> {
        let mut groups: Vec<Group> = self.shared.registry.read().groups.keys().cloned().collect();
        groups.sort();
        groups
    }

    fn spawn_worker(&self, listener: Arc<dyn MailboxListener>, group: Option<Group>) -> Worker {
        Worker::spawn(
            listener,
            group,
            self.shared.deliver.clone(),
            self.shared.dead_letters.clone(),
        )
    }

    /// Bind a listener to a key
    pub fn register(&self, listener: Arc<dyn MailboxListener>, key: RegistrationKey) -> Registration {
        let registration_id = self.shared.next_registration.fetch_add(1, Ordering::Relaxed);
        let id = listener_id(&listener);
        let identity = listener.identity();

        {
            let mut registry = self.shared.registry.write();
            match registry.key_listeners.get_mut(&id) {
                Some(key_listener) => key_listener.registrations += 1,
                None => {
                    let worker = self.spawn_worker(listener, None);
                    registry.key_listeners.insert(
                        id,
                        KeyListener {
                            worker,
                            registrations: 1,
                        },
                    );
                }
            }
            registry
                .keys
                .entry(key.clone())
                .or_default()
                .push((registration_id, id));
        }
        debug!("Registered {} on key {}", identity, key);

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        Registration::new(format!("{} on {}", identity, key), move || {
            if let Some(shared) = shared.upgrade() {
                shared.unregister_key(&key, registration_id);
            }
        })
    }

    /// Bind a listener to a group
    ///
    /// Fails with [`Error::GroupAlreadyRegistered`] while the group is bound,
    /// including to this same listener.
    pub fn register_group(&self, listener: Arc<dyn MailboxListener>, group: Group) -> Result<Registration> {
        let identity = listener.identity();
        {
            let mut registry = self.shared.registry.write();
            if registry.groups.contains_key(&group) {
                return Err(Error::GroupAlreadyRegistered(group));
            }
            let worker = self.spawn_worker(listener, Some(group.clone()));
            registry.groups.insert(group.clone(), worker);
        }
        info!("Registered {} under group {}", identity, group);

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let description = format!("{} under {}", identity, group);
        Ok(Registration::new(description, move || {
            if let Some(shared) = shared.upgrade() {
                shared.unregister_group(&group);
            }
        }))
    }

    /// Bind a listener under its default group
    pub fn register_group_listener<L>(&self, listener: Arc<L>) -> Result<Registration>
    where
        L: GroupMailboxListener + 'static,
    {
        let group = listener.default_group();
        self.register_group(listener, group)
    }

    /// Bind the durable group topology in one step
    ///
    /// Either every group gets bound or none is.
    pub fn initialize(&self, groups: HashMap<Group, Arc<dyn MailboxListener>>) -> Result<()> {
        let mut registry = self.shared.registry.write();
        if registry.state == BusState::Initialized {
            return Err(Error::GroupsAlreadyRegistered);
        }
        if let Some(group) = groups.keys().find(|group| registry.groups.contains_key(*group)) {
            return Err(Error::GroupAlreadyRegistered(group.clone()));
        }

        let count = groups.len();
        for (group, listener) in groups {
            let worker = self.spawn_worker(listener, Some(group.clone()));
            registry.groups.insert(group, worker);
        }
        registry.state = BusState::Initialized;
        info!("EventBus initialized with {} groups", count);
        Ok(())
    }

    /// Deliver an event to the listeners of the given keys and to all groups
    ///
    /// Completes once every synchronous target is done. Listener failures
    /// are retried and reported, never returned.
    pub async fn dispatch(&self, event: Event, keys: &HashSet<RegistrationKey>) -> Result<()> {
        if event.is_noop() {
            debug!("Skipping no-op {} event {}", event.kind(), event.id);
            return Ok(());
        }

        let event = Arc::new(event);
        let mut targets = 0;
        let mut acks = Vec::new();
        {
            let registry = self.shared.registry.read();

            for worker in registry.groups.values() {
                targets += 1;
                acks.extend(worker.enqueue(&event));
            }

            let mut seen = HashSet::new();
            let listeners = keys
                .iter()
                .filter_map(|key| registry.keys.get(key))
                .flatten()
                .filter(|(_, id)| seen.insert(*id))
                .filter_map(|(_, id)| registry.key_listeners.get(id));
            for key_listener in listeners {
                targets += 1;
                acks.extend(key_listener.worker.enqueue(&event));
            }
        }

        let sync_count = acks.len();
        join_all(acks).await;

        debug!(
            "Dispatched {} event {} to {} listeners ({} sync)",
            event.kind(),
            event.id,
            targets,
            sync_count
        );
        Ok(())
    }

    pub async fn dispatch_one(&self, event: Event, key: RegistrationKey) -> Result<()> {
        let keys = HashSet::from([key]);
        self.dispatch(event, &keys).await
    }

    /// Deliver an event again to the listener of one group, waiting for the
    /// outcome. A new failure lands in the dead letters again.
    pub async fn redeliver(&self, group: &Group, event: Event) -> Result<()> {
        let ack = {
            let registry = self.shared.registry.read();
            let worker = registry
                .groups
                .get(group)
                .ok_or_else(|| Error::NotFound(format!("No listener bound to group {}", group)))?;

            let (ack_tx, ack_rx) = oneshot::channel();
            worker
                .sender
                .send(Delivery::Sync {
                    event: Arc::new(event),
                    ack: ack_tx,
                })
                .map_err(|_| Error::Internal(format!("Listener of group {} stopped", group)))?;
            ack_rx
        };

        ack.await
            .map_err(|_| Error::Internal(format!("Listener of group {} dropped redelivery", group)))
    }

    /// Drop every registration and wait for queued deliveries to finish
    pub async fn shutdown(&self) -> Result<()> {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.shared.registry.write();
            let registry = &mut *guard;
            registry.keys.clear();
            let groups = registry.groups.drain().map(|(_, worker)| worker);
            let keyed = registry.key_listeners.drain().map(|(_, key_listener)| key_listener.worker);
            groups.chain(keyed).map(|worker| worker.handle).collect()
        };

        info!("Shutting down EventBus, draining {} listeners", handles.len());
        for handle in handles {
            handle
                .await
                .map_err(|e| Error::Internal(format!("Listener task failed: {}", e)))?;
        }
        Ok(())
    }
}
