//! Stop-and-Wait ARQ over single hops.
//!
//! Each outstanding (message, destination) pair owns a retransmit task that
//! re-sends the frame until the matching ACK cancels it or the retry limit
//! is reached. Slots are keyed by the same 32-bit hash the ACK carries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use qmesh_wire::{Ack, MacAddr, Message};

use crate::hashing::msg_hash;
use crate::port::MeshLink;
use crate::state::SharedRouteState;

pub const ARQ_MAX_ATTEMPTS: u32 = 5;
pub const ARQ_RETRY_INTERVAL: Duration = Duration::from_millis(500);

struct ArqSlot {
    cancel: CancellationToken,
}

pub struct ArqHandler {
    link: Arc<dyn MeshLink>,
    state: SharedRouteState,
    slots: Arc<Mutex<HashMap<u32, ArqSlot>>>,
}

impl ArqHandler {
    pub fn new(link: Arc<dyn MeshLink>, state: SharedRouteState) -> Self {
        ArqHandler { link, state, slots: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Starts a reliable send of `message` to every destination in `dsts`.
    pub async fn arq_send(&self, message: &Message, dsts: &[MacAddr], payload: &[u8]) {
        for dst in dsts {
            self.start_slot(message.clone(), *dst, payload.to_vec()).await;
        }
    }

    /// Reliable send to every current neighbor.
    pub async fn arq_broadcast_send(&self, message: &Message, payload: &[u8]) {
        let macs = self.state.lock().await.neighbors.macs();
        self.arq_send(message, &macs, payload).await;
    }

    /// Cancels the retransmit loop the ACK's hash points at. An ACK with no
    /// matching slot is stale (already acknowledged or given up) and is
    /// dropped.
    pub async fn process_ack(&self, ack: &Ack) {
        match self.slots.lock().await.remove(&ack.msg_hash) {
            Some(slot) => slot.cancel.cancel(),
            None => log::debug!("ACK with unknown hash {:#010x}; dropping", ack.msg_hash),
        }
    }

    /// Acknowledges a received message back to its transmitter. The hash is
    /// computed over our own MAC, which is the `dst_mac` the sender keyed
    /// its slot with.
    pub async fn send_ack(&self, message: &Message, dst: MacAddr) {
        let ack = Ack {
            id: message.id(),
            tx_count: 0,
            msg_hash: msg_hash(message.id(), self.link.own_mac()),
        };
        if let Err(err) = self.link.send(dst, &Message::Ack(ack), &[]).await {
            log::error!("failed to send ACK to {dst}: {err}");
        }
    }

    /// Number of live retransmit slots (observability and tests).
    pub async fn active_slots(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Cancels every outstanding retransmit loop.
    pub async fn shutdown(&self) {
        let mut slots = self.slots.lock().await;
        for (_, slot) in slots.drain() {
            slot.cancel.cancel();
        }
    }

    async fn start_slot(&self, message: Message, dst: MacAddr, payload: Vec<u8>) {
        let hash = msg_hash(message.id(), dst);
        let cancel = CancellationToken::new();

        // A re-send of the same (id, dst) supersedes the old loop.
        if let Some(old) = self
            .slots
            .lock()
            .await
            .insert(hash, ArqSlot { cancel: cancel.clone() })
        {
            old.cancel.cancel();
        }

        let link = self.link.clone();
        let slots = self.slots.clone();
        tokio::spawn(async move {
            for attempt in 1..=ARQ_MAX_ATTEMPTS {
                if let Err(err) = link.send(dst, &message, &payload).await {
                    log::error!("ARQ send attempt {attempt} to {dst} failed: {err}");
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(ARQ_RETRY_INTERVAL) => {}
                }
            }
            if slots.lock().await.remove(&hash).is_some() {
                log::info!(
                    "ARQ gave up on message {} to {dst} after {ARQ_MAX_ATTEMPTS} attempts",
                    message.id()
                );
            }
        });
    }
}
