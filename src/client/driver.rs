//! The single task owning all link and correlation state.
//!
//! Every mutation of the connection manager and the correlator happens
//! here, in the order events are pulled from the driver's queues. Client
//! handles talk to the driver through [`Command`]s; helper tasks report
//! through [`LinkEvent`]s.

use std::time::Duration;

use tokio::{
    select,
    sync::{broadcast, mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{LinkStatus, subscription::UpdateSink};
use crate::{
    connection::{ConnectionManager, Link, LinkEvent, LinkSignal, ReconnectStatus},
    protocol::{CallOutcome, Correlator, Object, Timer},
};

/// Request from a [`KlipperClient`](super::KlipperClient) handle.
pub(crate) enum Command {
    Start,
    Call {
        method: String,
        params: Object,
        timeout: Duration,
        reply: oneshot::Sender<CallOutcome>,
    },
    Subscribe {
        method: String,
        params: Object,
        sink: UpdateSink,
    },
    ForceReconnect {
        reply: oneshot::Sender<ReconnectStatus>,
    },
}

pub(crate) struct Driver {
    pub(crate) link: ConnectionManager,
    pub(crate) correlator: Correlator,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
    pub(crate) events: mpsc::UnboundedReceiver<LinkEvent>,
    pub(crate) status: broadcast::Sender<LinkStatus>,
    pub(crate) shutdown: CancellationToken,
}

impl Driver {
    /// Run until the client stops or every handle is dropped.
    pub(crate) async fn run(mut self) {
        loop {
            select! {
                biased;

                () = self.shutdown.cancelled() => break,

                Some(event) = self.events.recv() => {
                    self.link.handle_event(event);
                    self.pump_signals();
                }

                // Timers ahead of commands: a command backlog must not hold
                // back timeouts.
                timer = self.correlator.next_timer() => self.handle_timer(timer),

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        self.stop();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => {
                if self.link.start() {
                    self.correlator.arm_watchdog();
                }
            }
            Command::Call {
                method,
                params,
                timeout,
                reply,
            } => self
                .correlator
                .call(&mut self.link, &method, params, timeout, reply),
            Command::Subscribe {
                method,
                params,
                sink,
            } => self
                .correlator
                .subscribe_with(&mut self.link, &method, params, sink),
            Command::ForceReconnect { reply } => {
                let status = self.link.force_reconnect();
                self.pump_signals();
                let _ = reply.send(status);
            }
        }
    }

    fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Expired(id) => self.correlator.expire(&id),
            Timer::Stall => {
                self.correlator.on_stall(&mut self.link);
                self.pump_signals();
            }
        }
    }

    /// Hand every queued link signal to the correlator, then announce link
    /// transitions to status subscribers.
    fn pump_signals(&mut self) {
        while let Some(signal) = self.link.next_signal() {
            let status = match &signal {
                LinkSignal::Connected => Some(LinkStatus::Connected),
                LinkSignal::Disconnected { .. } => Some(LinkStatus::Disconnected),
                LinkSignal::Frame(_) => None,
            };
            self.correlator.on_signal(signal);
            if let Some(status) = status {
                let _ = self.status.send(status);
            }
        }
    }

    fn stop(&mut self) {
        self.link.stop();
        self.pump_signals();
        self.correlator.shutdown();

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Call { reply, .. } => {
                    let _ = reply.send(CallOutcome::Disconnected);
                }
                Command::ForceReconnect { reply } => {
                    let _ = reply.send(ReconnectStatus::AlreadyDisconnected);
                }
                Command::Start | Command::Subscribe { .. } => {}
            }
        }
        debug!(address = %self.link.address(), "klipper link driver stopped");
    }
}
