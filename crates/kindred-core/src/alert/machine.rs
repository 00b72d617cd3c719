use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::{AlertConfig, AlertId, AlertView, ButtonView, PressHandler};
use crate::config::Config;

pub const DEFAULT_SETTLE: Duration = Duration::from_millis(400);
pub const DEFAULT_PRESS_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_BACKLOG_CAP: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Exit animation allowance, applied before clearing and again before
    /// promoting the next alert.
    pub settle: Duration,
    pub press_delay: Duration,
    pub backlog_cap: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
            press_delay: DEFAULT_PRESS_DELAY,
            backlog_cap: DEFAULT_BACKLOG_CAP,
        }
    }
}

impl QueueSettings {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let mut settings = Self::default();
        if let Some(settle) = cfg.get_millis("alert.settle_ms")? {
            settings.settle = settle;
        }
        if let Some(delay) = cfg.get_millis("alert.press_delay_ms")? {
            settings.press_delay = delay;
        }
        if let Some(cap) = cfg.get_u64("alert.backlog_cap")? {
            settings.backlog_cap = usize::try_from(cap)?;
        }
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Showing,
    Dismissing,
    /// The next alert has left the backlog and owns the slot, but is not
    /// visible until the settle delay passes.
    Promoting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    PressDismiss,
    Clear,
    Promote,
}

/// A delayed event the driver must feed back through [`AlertMachine::fire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    pub kind: TimerKind,
    pub alert: AlertId,
    pub after: Duration,
}

pub struct PressOutcome {
    pub handler: Option<PressHandler>,
    pub timer: TimerRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub phase: Phase,
    pub current: Option<AlertView>,
    pub backlog: Vec<String>,
    pub dropped_total: u64,
    pub pending_timers: usize,
}

#[derive(Debug)]
struct Entry {
    id: AlertId,
    config: AlertConfig,
}

#[derive(Debug)]
pub struct AlertMachine {
    settings: QueueSettings,
    phase: Phase,
    current: Option<Entry>,
    promoting: Option<Entry>,
    visible: bool,
    backlog: VecDeque<Entry>,
    dropped_total: u64,
}

impl AlertMachine {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            phase: Phase::Idle,
            current: None,
            promoting: None,
            visible: false,
            backlog: VecDeque::new(),
            dropped_total: 0,
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Displays `config` when the slot is free, otherwise queues it. Returns
    /// how many of the oldest queued alerts were dropped to stay in bounds.
    pub fn show(&mut self, id: AlertId, config: AlertConfig) -> usize {
        let entry = Entry { id, config };
        if self.phase == Phase::Idle {
            debug!(alert = %id, title = %entry.config.title, "showing alert");
            self.current = Some(entry);
            self.visible = true;
            self.phase = Phase::Showing;
            return 0;
        }

        trace!(alert = %id, phase = ?self.phase, "queueing alert");
        self.backlog.push_back(entry);
        let mut dropped = 0;
        while self.backlog.len() > self.settings.backlog_cap {
            self.backlog.pop_front();
            dropped += 1;
        }
        if dropped > 0 {
            self.dropped_total += dropped as u64;
            warn!(
                dropped,
                cap = self.settings.backlog_cap,
                "alert backlog full; dropped oldest queued alerts"
            );
        }
        dropped
    }

    /// Hides the visible alert and asks for the clear timer. A no-op unless
    /// an alert is showing.
    pub fn dismiss(&mut self) -> Option<TimerRequest> {
        if self.phase != Phase::Showing {
            trace!(phase = ?self.phase, "dismiss ignored");
            return None;
        }
        let id = self.current.as_ref()?.id;
        self.visible = false;
        self.phase = Phase::Dismissing;
        debug!(alert = %id, "dismissing alert");
        Some(TimerRequest {
            kind: TimerKind::Clear,
            alert: id,
            after: self.settings.settle,
        })
    }

    /// Resolves a press on the button at `index` in display order. The
    /// caller runs the handler, then schedules the returned timer.
    pub fn press(&mut self, index: usize) -> Option<PressOutcome> {
        if self.phase != Phase::Showing {
            trace!(phase = ?self.phase, index, "press ignored");
            return None;
        }
        let current = self.current.as_ref()?;
        let buttons = current.config.display_buttons();
        let Some(button) = buttons.get(index) else {
            warn!(alert = %current.id, index, "press on missing button");
            return None;
        };
        debug!(alert = %current.id, button = %button.text, "alert button pressed");
        Some(PressOutcome {
            handler: button.on_press.clone(),
            timer: TimerRequest {
                kind: TimerKind::PressDismiss,
                alert: current.id,
                after: self.settings.press_delay,
            },
        })
    }

    /// Applies an expired timer. Timers for an alert that is no longer in
    /// the matching phase are ignored.
    pub fn fire(&mut self, kind: TimerKind, alert: AlertId) -> Option<TimerRequest> {
        let current_id = self.current.as_ref().map(|entry| entry.id);
        let promoting_id = self.promoting.as_ref().map(|entry| entry.id);

        match (kind, self.phase) {
            (TimerKind::PressDismiss, Phase::Showing) if current_id == Some(alert) => self.dismiss(),
            (TimerKind::Clear, Phase::Dismissing) if current_id == Some(alert) => {
                self.current = None;
                let Some(next) = self.backlog.pop_front() else {
                    debug!(alert = %alert, "alert cleared; queue idle");
                    self.phase = Phase::Idle;
                    return None;
                };
                let next_id = next.id;
                debug!(alert = %alert, next = %next_id, "alert cleared; promoting next");
                self.promoting = Some(next);
                self.phase = Phase::Promoting;
                Some(TimerRequest {
                    kind: TimerKind::Promote,
                    alert: next_id,
                    after: self.settings.settle,
                })
            }
            (TimerKind::Promote, Phase::Promoting) if promoting_id == Some(alert) => {
                self.current = self.promoting.take();
                self.visible = true;
                self.phase = Phase::Showing;
                debug!(alert = %alert, "showing promoted alert");
                None
            }
            _ => {
                trace!(?kind, alert = %alert, phase = ?self.phase, "stale timer ignored");
                None
            }
        }
    }

    pub fn view(&self) -> Option<AlertView> {
        if !matches!(self.phase, Phase::Showing | Phase::Dismissing) {
            return None;
        }
        let entry = self.current.as_ref()?;
        Some(AlertView {
            id: entry.id,
            title: entry.config.title.clone(),
            message: entry.config.message.clone(),
            buttons: entry
                .config
                .display_buttons()
                .into_iter()
                .map(|button| ButtonView {
                    text: button.text,
                    style: button.style,
                })
                .collect(),
            visible: self.visible,
        })
    }

    pub fn snapshot(&self, pending_timers: usize) -> QueueSnapshot {
        QueueSnapshot {
            phase: self.phase,
            current: self.view(),
            backlog: self
                .backlog
                .iter()
                .map(|entry| entry.config.title.clone())
                .collect(),
            dropped_total: self.dropped_total,
            pending_timers,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{AlertMachine, Phase, QueueSettings, TimerKind};
    use crate::alert::{AlertConfig, AlertId};

    fn machine() -> AlertMachine {
        AlertMachine::new(QueueSettings::default())
    }

    fn show(machine: &mut AlertMachine, title: &str) -> (AlertId, usize) {
        let id = AlertId::new();
        let dropped = machine.show(id, AlertConfig::new(title));
        (id, dropped)
    }

    fn current_title(machine: &AlertMachine) -> Option<String> {
        machine.view().map(|view| view.title)
    }

    #[test]
    fn fifo_through_dismiss_clear_promote() {
        let mut m = machine();
        let (first, _) = show(&mut m, "one");
        let (second, _) = show(&mut m, "two");
        show(&mut m, "three");

        assert_eq!(m.phase(), Phase::Showing);
        assert_eq!(current_title(&m).as_deref(), Some("one"));
        assert_eq!(m.snapshot(0).backlog, ["two", "three"]);

        let clear = m.dismiss().expect("clear timer");
        assert_eq!(clear.kind, TimerKind::Clear);
        assert_eq!(clear.alert, first);
        assert_eq!(clear.after, Duration::from_millis(400));
        let view = m.view().expect("still mounted while exiting");
        assert!(!view.visible);

        let promote = m.fire(TimerKind::Clear, first).expect("promote timer");
        assert_eq!(promote.kind, TimerKind::Promote);
        assert_eq!(promote.alert, second);
        assert_eq!(m.phase(), Phase::Promoting);
        assert!(m.view().is_none());

        assert!(m.fire(TimerKind::Promote, second).is_none());
        assert_eq!(current_title(&m).as_deref(), Some("two"));
        assert_eq!(m.snapshot(0).backlog, ["three"]);
    }

    #[test]
    fn overflow_drops_oldest_queued() {
        let mut m = machine();
        let mut dropped = 0;
        for n in 1..=15 {
            dropped += show(&mut m, &format!("#{n}")).1;
        }
        assert_eq!(dropped, 4);
        assert_eq!(m.backlog_len(), m.settings().backlog_cap);
        assert_eq!(current_title(&m).as_deref(), Some("#1"));
        let expected: Vec<String> = (6..=15).map(|n| format!("#{n}")).collect();
        let snapshot = m.snapshot(0);
        assert_eq!(snapshot.backlog, expected);
        assert_eq!(snapshot.dropped_total, 4);
    }

    #[test]
    fn show_during_promotion_waits_behind_it() {
        let mut m = machine();
        let (first, _) = show(&mut m, "first");
        let (second, _) = show(&mut m, "second");
        m.dismiss();
        m.fire(TimerKind::Clear, first);

        show(&mut m, "late");
        assert_eq!(m.phase(), Phase::Promoting);
        assert_eq!(m.snapshot(0).backlog, ["late"]);

        m.fire(TimerKind::Promote, second);
        assert_eq!(current_title(&m).as_deref(), Some("second"));
    }

    #[test]
    fn stale_and_repeated_events_are_ignored() {
        let mut m = machine();
        let (first, _) = show(&mut m, "first");
        assert!(m.fire(TimerKind::Clear, first).is_none(), "clear before dismiss");

        m.dismiss().expect("first dismiss");
        assert!(m.dismiss().is_none(), "second dismiss");
        assert!(m.press(0).is_none(), "press while exiting");
        assert!(m.fire(TimerKind::PressDismiss, first).is_none());

        assert!(m.fire(TimerKind::Clear, first).is_none());
        assert_eq!(m.phase(), Phase::Idle);
        assert!(m.fire(TimerKind::Clear, first).is_none());
        assert_eq!(m.phase(), Phase::Idle);
        assert!(m.view().is_none());
    }

    #[test]
    fn press_dismiss_targets_its_own_alert() {
        let mut m = machine();
        let (first, _) = show(&mut m, "first");
        let outcome = m.press(0).expect("default OK button");
        assert!(outcome.handler.is_none());
        assert_eq!(outcome.timer.kind, TimerKind::PressDismiss);
        assert_eq!(outcome.timer.after, Duration::from_millis(50));
        assert!(m.press(3).is_none(), "no such button");

        assert!(m.fire(TimerKind::PressDismiss, AlertId::new()).is_none());
        assert_eq!(m.phase(), Phase::Showing);

        let clear = m.fire(TimerKind::PressDismiss, first).expect("clear timer");
        assert_eq!(clear.kind, TimerKind::Clear);
        assert_eq!(m.phase(), Phase::Dismissing);
    }

    #[test]
    fn settings_come_from_config() {
        let mut cfg = crate::config::Config::default();
        cfg.apply_overrides([
            ("alert.settle_ms".to_string(), "120".to_string()),
            ("alert.backlog_cap".to_string(), "3".to_string()),
        ]);
        let settings = QueueSettings::from_config(&cfg).expect("settings");
        assert_eq!(settings.settle, Duration::from_millis(120));
        assert_eq!(settings.press_delay, Duration::from_millis(50));
        assert_eq!(settings.backlog_cap, 3);
    }
}
