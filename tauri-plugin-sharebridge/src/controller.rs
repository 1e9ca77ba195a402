use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Result, ShareBridgeError};
use crate::models::SharePayload;

/// Callback invoked with every delivered payload.
pub type ShareListener = Arc<dyn Fn(SharePayload) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListenerCardinality {
    /// A new registration replaces the previous listener.
    SingleSlot,
    /// Registrations accumulate until explicitly removed.
    Accumulate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InitialShareFallback {
    /// Answer with the neutral empty text payload.
    EmptyText,
    /// Answer with nothing.
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPolicy {
    pub listeners: ListenerCardinality,
    pub initial_share: InitialShareFallback,
    /// Hand the current payload to listeners that register after it arrived.
    pub replay_on_register: bool,
}

impl DeliveryPolicy {
    pub fn android() -> Self {
        Self {
            listeners: ListenerCardinality::SingleSlot,
            initial_share: InitialShareFallback::EmptyText,
            replay_on_register: false,
        }
    }

    pub fn ios() -> Self {
        Self {
            listeners: ListenerCardinality::Accumulate,
            initial_share: InitialShareFallback::Absent,
            replay_on_register: false,
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            listeners: ListenerCardinality::Accumulate,
            initial_share: InitialShareFallback::Absent,
            replay_on_register: true,
        }
    }
}

#[derive(Default)]
struct ControllerState {
    last_payload: Option<SharePayload>,
    listeners: Vec<(ListenerId, ShareListener)>,
    next_listener_id: u64,
    /// Bumped on every delivery; a replay only fires if nothing newer went out.
    delivery_seq: u64,
    /// File locations already delivered in this process lifetime.
    seen_file_keys: HashSet<String>,
}

/// Owns the most recent payload and the registered listeners.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct DeliveryController {
    policy: DeliveryPolicy,
    state: Arc<RwLock<ControllerState>>,
}

impl DeliveryController {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self {
            policy,
            state: Arc::new(RwLock::new(ControllerState::default())),
        }
    }

    pub async fn get_initial_share(&self) -> Option<SharePayload> {
        let state = self.state.read().await;
        match (&state.last_payload, self.policy.initial_share) {
            (Some(payload), _) => Some(payload.clone()),
            (None, InitialShareFallback::EmptyText) => Some(SharePayload::empty_text()),
            (None, InitialShareFallback::Absent) => None,
        }
    }

    pub async fn last_payload(&self) -> Option<SharePayload> {
        self.state.read().await.last_payload.clone()
    }

    pub async fn register_listener(&self, listener: ShareListener) -> ListenerId {
        let (id, replay) = {
            let mut state = self.state.write().await;
            state.next_listener_id += 1;
            let id = ListenerId(state.next_listener_id);

            if self.policy.listeners == ListenerCardinality::SingleSlot {
                state.listeners.clear();
            }
            state.listeners.push((id, Arc::clone(&listener)));

            let replay = if self.policy.replay_on_register {
                state
                    .last_payload
                    .clone()
                    .map(|payload| (payload, state.delivery_seq))
            } else {
                None
            };
            (id, replay)
        };

        info!("Registered share listener {}", id.get());

        if let Some((payload, seq)) = replay {
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let still_current = {
                    let state = state.read().await;
                    state.delivery_seq == seq && state.listeners.iter().any(|(l, _)| *l == id)
                };
                if still_current {
                    debug!("Replaying current share to listener {}", id.get());
                    listener(payload);
                } else {
                    debug!("Skipping stale replay for listener {}", id.get());
                }
            });
        }

        id
    }

    pub async fn remove_listener(&self, id: ListenerId) -> Result<()> {
        let mut state = self.state.write().await;
        let before = state.listeners.len();
        state.listeners.retain(|(l, _)| *l != id);
        if state.listeners.len() == before {
            return Err(ShareBridgeError::ListenerNotFound(id.get()));
        }
        debug!("Removed share listener {}", id.get());
        Ok(())
    }

    pub async fn listener_count(&self) -> usize {
        self.state.read().await.listeners.len()
    }

    /// Record `payload` as the most recent share and hand it to every
    /// listener, in registration order. Listeners run after the state lock
    /// is released.
    pub async fn deliver(&self, payload: SharePayload) {
        let listeners: Vec<ShareListener> = {
            let mut state = self.state.write().await;
            state.last_payload = Some(payload.clone());
            state.delivery_seq += 1;
            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        info!(
            "Delivering {:?} share to {} listener(s)",
            payload.share_type,
            listeners.len()
        );

        for listener in listeners {
            listener(payload.clone());
        }
    }

    /// Remember a file location. Returns `false` if it was already seen.
    pub async fn mark_seen(&self, key: &str) -> bool {
        let inserted = self.state.write().await.seen_file_keys.insert(key.to_string());
        if !inserted {
            debug!("Already delivered: {}", key);
        }
        inserted
    }

    pub async fn is_seen(&self, key: &str) -> bool {
        self.state.read().await.seen_file_keys.contains(key)
    }
}

impl Default for DeliveryController {
    fn default() -> Self {
        Self::new(DeliveryPolicy::default())
    }
}
