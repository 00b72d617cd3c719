use anyhow::{Context, anyhow};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::machine::{AlertMachine, QueueSettings, QueueSnapshot, TimerRequest};
use super::{AlertConfig, AlertId, AlertView};

enum Command {
    Show(AlertId, AlertConfig),
    Dismiss,
    Press(usize),
    Snapshot(oneshot::Sender<QueueSnapshot>),
}

/// Cheap cloneable entry point into a running [`AlertQueue`].
#[derive(Clone)]
pub struct AlertHandle {
    tx: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<Option<AlertView>>,
}

impl AlertHandle {
    /// Queues an alert and returns its id. Never blocks; the alert is
    /// shown immediately when nothing else holds the slot.
    pub fn show_alert(&self, config: AlertConfig) -> anyhow::Result<AlertId> {
        let id = AlertId::new();
        self.send(Command::Show(id, config))?;
        Ok(id)
    }

    pub fn dismiss(&self) -> anyhow::Result<()> {
        self.send(Command::Dismiss)
    }

    /// Presses the button at `index` in display order.
    pub fn press(&self, index: usize) -> anyhow::Result<()> {
        self.send(Command::Press(index))
    }

    pub async fn snapshot(&self) -> anyhow::Result<QueueSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.context("alert queue stopped before answering")
    }

    pub fn current(&self) -> Option<AlertView> {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<AlertView>> {
        self.view.clone()
    }

    fn send(&self, cmd: Command) -> anyhow::Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| anyhow!("alert queue is not running"))
    }
}

pub struct AlertQueue {
    handle: AlertHandle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl AlertQueue {
    /// Starts the queue worker on the current tokio runtime.
    pub fn spawn(settings: QueueSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(None);
        let handle = AlertHandle { tx, view: view_rx };
        let cancel = CancellationToken::new();

        info!(
            settle_ms = settings.settle.as_millis() as u64,
            press_delay_ms = settings.press_delay.as_millis() as u64,
            backlog_cap = settings.backlog_cap,
            "starting alert queue"
        );
        let worker = Worker {
            machine: AlertMachine::new(settings),
            timers: Vec::new(),
            rx,
            handle: handle.clone(),
            view_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            handle,
            cancel,
            task: Some(task),
        }
    }

    pub fn handle(&self) -> AlertHandle {
        self.handle.clone()
    }

    /// Stops the worker. Pending timers are discarded, so nothing fires
    /// after this returns.
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await.context("alert queue worker panicked")?;
        }
        Ok(())
    }
}

impl Drop for AlertQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Scheduled {
    at: Instant,
    request: TimerRequest,
}

struct Worker {
    machine: AlertMachine,
    timers: Vec<Scheduled>,
    rx: mpsc::UnboundedReceiver<Command>,
    handle: AlertHandle,
    view_tx: watch::Sender<Option<AlertView>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let deadline = self.timers.iter().map(|timer| timer.at).min();
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                cmd = self.rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.fire_due(Instant::now());
                    self.handle_command(cmd);
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.fire_due(Instant::now());
                }
            }
            self.publish();
        }

        let pending = self.timers.len();
        self.timers.clear();
        debug!(pending, "alert queue stopped; pending timers cancelled");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Show(id, config) => {
                self.machine.show(id, config);
            }
            Command::Dismiss => {
                if let Some(timer) = self.machine.dismiss() {
                    self.schedule(Instant::now(), timer);
                }
            }
            Command::Press(index) => {
                if let Some(outcome) = self.machine.press(index) {
                    if let Some(handler) = outcome.handler {
                        handler(&self.handle);
                    }
                    self.schedule(Instant::now(), outcome.timer);
                }
            }
            Command::Snapshot(reply) => {
                if reply.send(self.machine.snapshot(self.timers.len())).is_err() {
                    warn!("snapshot requester went away");
                }
            }
        }
    }

    /// Fires every timer due at `now` in deadline order. Follow-up timers
    /// are measured from the deadline that produced them.
    fn fire_due(&mut self, now: Instant) {
        while let Some(index) = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.at <= now)
            .min_by_key(|(_, timer)| timer.at)
            .map(|(index, _)| index)
        {
            let due = self.timers.swap_remove(index);
            if let Some(next) = self.machine.fire(due.request.kind, due.request.alert) {
                self.schedule(due.at, next);
            }
        }
    }

    fn schedule(&mut self, from: Instant, request: TimerRequest) {
        self.timers.push(Scheduled {
            at: from + request.after,
            request,
        });
    }

    fn publish(&self) {
        let next = self.machine.view();
        self.view_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
