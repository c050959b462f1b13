//! Reward distribution: waiting for feedback on packets we forwarded, and
//! generating feedback for packets forwarded to us.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use qmesh_wire::{random_id, MacAddr, Message, Reward};

use crate::hashing::pair_hash;
use crate::port::MeshLink;
use crate::state::SharedRouteState;

/// How long a forwarder waits for a reward before treating the packet as
/// lost and feeding a zero reward.
pub const REWARD_WAIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Minimum spacing between rewards generated for the same (destination,
/// sender) pair.
pub const REWARD_HOLD_OFF: Duration = Duration::from_secs(2);

struct WaitSlot {
    cancel: CancellationToken,
    dst_ip: IpAddr,
    mac: MacAddr,
}

/// Waits for rewards from the neighbors packets were handed to. Every slot
/// resolves exactly once: either with the received reward or with the
/// timeout penalty.
pub struct RewardWaitHandler {
    state: SharedRouteState,
    slots: Arc<Mutex<HashMap<u32, WaitSlot>>>,
}

impl RewardWaitHandler {
    pub fn new(state: SharedRouteState) -> Self {
        RewardWaitHandler { state, slots: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Arms the wait slot for (dst_ip, next-hop). A slot that is already
    /// armed is left alone.
    pub async fn wait_for_reward(&self, dst_ip: IpAddr, mac: MacAddr) {
        let hash = pair_hash(dst_ip, mac);
        {
            let mut slots = self.slots.lock().await;
            if slots.contains_key(&hash) {
                return;
            }
            let cancel = CancellationToken::new();
            slots.insert(hash, WaitSlot { cancel: cancel.clone(), dst_ip, mac });

            let state = self.state.clone();
            let slots = self.slots.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(REWARD_WAIT_TIMEOUT) => {
                        if slots.lock().await.remove(&hash).is_some() {
                            log::debug!("no reward for {dst_ip} via {mac}; penalizing");
                            state.lock().await.table.update_entry(dst_ip, mac, 0.0);
                        }
                    }
                }
            });
        }
    }

    /// Feeds a received reward into the matching slot. A reward with no
    /// matching hash never updates the table on its own.
    pub async fn set_reward(&self, reward: &Reward) {
        match self.slots.lock().await.remove(&reward.msg_hash) {
            Some(slot) => {
                slot.cancel.cancel();
                self.state
                    .lock()
                    .await
                    .table
                    .update_entry(slot.dst_ip, slot.mac, f64::from(reward.value));
            }
            None => {
                log::debug!("reward with unknown hash {:#010x}; dropping", reward.msg_hash);
            }
        }
    }

    pub async fn active_slots(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn shutdown(&self) {
        let mut slots = self.slots.lock().await;
        for (_, slot) in slots.drain() {
            slot.cancel.cancel();
        }
    }
}

/// Generates rewards for data arriving from upstream senders, rate-limited
/// per (destination, sender) pair.
pub struct RewardSendHandler {
    link: Arc<dyn MeshLink>,
    state: SharedRouteState,
    sent: Mutex<HashMap<u32, Instant>>,
}

impl RewardSendHandler {
    pub fn new(link: Arc<dyn MeshLink>, state: SharedRouteState) -> Self {
        RewardSendHandler { link, state, sent: Mutex::new(HashMap::new()) }
    }

    /// Sends our average estimate for `dst_ip` back to `mac`, unless a
    /// reward for the same pair went out within the hold-off window.
    pub async fn send_reward(&self, dst_ip: IpAddr, mac: MacAddr) {
        let hash = pair_hash(dst_ip, mac);
        {
            let mut sent = self.sent.lock().await;
            if let Some(last) = sent.get(&hash) {
                if last.elapsed() <= REWARD_HOLD_OFF {
                    return;
                }
            }
            sent.insert(hash, Instant::now());
        }

        let avg = self.state.lock().await.table.avg_value(dst_ip);
        let own_mac = self.link.own_mac();
        let message =
            Message::Reward(Reward::from_value(random_id(), avg, pair_hash(dst_ip, own_mac)));
        if let Err(err) = self.link.send(mac, &message, &[]).await {
            log::error!("failed to send reward to {mac}: {err}");
        }
    }
}
