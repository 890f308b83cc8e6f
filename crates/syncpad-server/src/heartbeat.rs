//! The heartbeat monitor.
//!
//! One periodic task probes every open connection. A connection whose
//! liveness flag is still clear when the next cycle arrives is routed
//! through the same cleanup path as an explicit close and its transport
//! is forcibly closed. This is the only mechanism that reclaims
//! connections which died without a close frame.

use std::sync::Arc;
use std::time::Duration;

use syncpad_core::Outbound;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::handlers::AppState;
use crate::metrics;

/// Spawn the monitor task with the configured probe interval.
pub fn spawn(state: Arc<AppState>) -> JoinHandle<()> {
    let period = Duration::from_millis(state.config.heartbeat.interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it so connections
        // get a full period before their first probe.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep(&state);
        }
    })
}

/// Run one probe cycle over a snapshot of every connection.
///
/// Per connection: no pong since the previous probe means eviction
/// (leave the room, which broadcasts `user_leave` and deletes the room
/// if empty, then close the transport); otherwise clear the flag and
/// send a fresh probe.
pub(crate) fn sweep(state: &AppState) {
    for (room_id, member) in state.registry.probes() {
        if !member.is_alive() {
            info!(room = %room_id, user = %member.user(), "Terminating unresponsive connection");
            state.registry.leave(&room_id, member.conn_id());
            member.send(Outbound::Close);
            metrics::record_heartbeat_timeout();
            metrics::set_active_rooms(state.registry.room_count());
            continue;
        }

        member.set_alive(false);
        if !member.send(Outbound::Ping) {
            // Writer already gone; same cleanup as a transport failure.
            debug!(room = %room_id, user = %member.user(), "Probe target already closed");
            state.registry.leave(&room_id, member.conn_id());
            metrics::set_active_rooms(state.registry.room_count());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use syncpad_core::MemberHandle;
    use syncpad_protocol::ServerMessage;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn state() -> AppState {
        AppState::new(Config::default())
    }

    fn member(user: &str) -> (MemberHandle, UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemberHandle::new(format!("hb_{user}_{}", rand_suffix()), user, tx),
            rx,
        )
    }

    fn rand_suffix() -> u128 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    #[test]
    fn test_responsive_connection_is_probed_not_evicted() {
        let state = state();
        let (alice, mut rx) = member("alice");
        state.registry.join("r1", alice.clone());
        drain(&mut rx); // initial_state

        sweep(&state);
        assert!(!alice.is_alive());
        assert!(matches!(drain(&mut rx).as_slice(), [Outbound::Ping]));
        assert_eq!(state.registry.member_count("r1"), 1);

        // Pong arrives before the next cycle.
        alice.set_alive(true);
        sweep(&state);
        assert_eq!(state.registry.member_count("r1"), 1);
    }

    #[test]
    fn test_silent_connection_evicted_on_second_sweep() {
        let state = state();
        let (alice, mut alice_rx) = member("alice");
        let (bob, mut bob_rx) = member("bob");
        state.registry.join("r1", alice.clone());
        state.registry.join("r1", bob.clone());
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        sweep(&state);
        alice.set_alive(true); // only alice replies
        sweep(&state);

        // Bob was evicted and his transport told to close.
        assert_eq!(state.registry.member_count("r1"), 1);
        assert!(drain(&mut bob_rx)
            .iter()
            .any(|item| matches!(item, Outbound::Close)));

        // Alice saw an ordinary leave notification.
        let leave = drain(&mut alice_rx).into_iter().find_map(|item| match item {
            Outbound::Frame(text) => serde_json::from_str::<ServerMessage>(&text).ok(),
            _ => None,
        });
        assert_eq!(leave, Some(ServerMessage::user_leave("bob")));
    }

    #[test]
    fn test_last_member_eviction_deletes_room() {
        let state = state();
        let (alice, _rx) = member("alice");
        state.registry.join("r1", alice.clone());

        alice.set_alive(false);
        sweep(&state);

        assert!(!state.registry.contains("r1"));
        assert_eq!(state.registry.room_count(), 0);
    }

    #[test]
    fn test_dropped_writer_cleaned_up_without_probe() {
        let state = state();
        let (alice, rx) = member("alice");
        state.registry.join("r1", alice.clone());
        drop(rx);

        // Still flagged alive, but the ping cannot be queued.
        sweep(&state);
        assert!(!state.registry.contains("r1"));
    }
}
