//! # Fan-out driver: the single task between the bus and local queues.
//!
//! One driver runs per connected [`Broadcaster`](crate::Broadcaster). It is the
//! only task that talks to the bus for subscribe/unsubscribe and the only
//! consumer of [`BusAdapter::next_event`].
//!
//! ## Architecture
//! ```text
//!               ┌────────────── select! ──────────────┐
//! cancel ──────►│ cancelled           → Ok(())        │
//! commands ────►│ Subscribe/Confirm/Unsubscribe/Barrier│──► adapter.(un)subscribe
//! adapter ─────►│ next_event()        → fan_out(ev)   │──► subscriber queues
//!               │ next_event() error  → close, Err(e) │
//!               └─────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - Commands are applied one at a time, in enqueue order.
//! - An unsubscribe failure is logged and skipped; the channel is forgotten.
//! - A delivery failure is fatal: the registry is closed (every subscriber
//!   observes end of stream) and the driver returns the error. No restart.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::bus::BusAdapter;
use crate::core::registry::{Command, Registry};
use crate::error::BusError;

/// Driver task body.
pub(crate) async fn run_driver(
    adapter: Arc<BusAdapter>,
    registry: Arc<Registry>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
) -> Result<(), BusError> {
    // Channels currently subscribed on the bus by this driver.
    let mut live: HashSet<String> = HashSet::new();

    let res = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            cmd = commands.recv() => match cmd {
                Some(cmd) => apply(&adapter, &mut live, cmd).await,
                None => break Ok(()),
            },
            ev = adapter.next_event() => match ev {
                Ok(ev) => {
                    let reached = registry.fan_out(&ev);
                    if reached == 0 {
                        debug!(channel = ev.channel(), "no local subscribers; event dropped");
                    } else {
                        trace!(channel = ev.channel(), reached, "event delivered");
                    }
                }
                Err(e) => break Err(e),
            },
        }
    };

    if let Err(e) = &res {
        let orphaned = registry.close();
        error!(error = %e, label = e.as_label(), ?orphaned, "fan-out driver stopped");
    }
    res
}

async fn apply(adapter: &BusAdapter, live: &mut HashSet<String>, cmd: Command) {
    match cmd {
        Command::Subscribe { channel, ack } => {
            let res = adapter.subscribe(&channel).await;
            match &res {
                Ok(()) => {
                    live.insert(channel);
                }
                Err(e) => warn!(channel = %channel, error = %e, "bus subscribe failed"),
            }
            let _ = ack.send(res);
        }
        Command::Confirm { channel, ack } => {
            let res = if live.contains(&channel) {
                Ok(())
            } else {
                Err(BusError::NotSubscribed { channel })
            };
            let _ = ack.send(res);
        }
        Command::Unsubscribe { channel } => {
            if !live.remove(&channel) {
                return;
            }
            if let Err(e) = adapter.unsubscribe(&channel).await {
                warn!(channel = %channel, error = %e, "bus unsubscribe failed; continuing");
            }
        }
        Command::Barrier { ack } => {
            let _ = ack.send(());
        }
    }
}
