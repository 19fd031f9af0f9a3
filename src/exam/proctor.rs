// src/exam/proctor.rs

//! Proctoring policy.
//!
//! Signals come from whatever captures the browser environment; this module
//! only decides what each one means. The mapping lives in [`rule_for`] so the
//! policy can be exercised without a live page.

use std::{collections::VecDeque, fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{Violation, ViolationKind};

pub const DEFAULT_MAX_VIOLATIONS: u32 = 3;
pub const DEFAULT_BLUR_CONFIRM: Duration = Duration::from_millis(100);

/// Proctoring settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProctorConfig {
    /// When false every signal is ignored. Only ever set from explicit configuration.
    pub enabled: bool,
    pub max_violations: u32,
    /// How long focus must stay lost before a blur counts.
    pub blur_confirm_delay: Duration,
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_violations: DEFAULT_MAX_VIOLATIONS,
            blur_confirm_delay: DEFAULT_BLUR_CONFIRM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardAction {
    Copy,
    Cut,
    Paste,
}

/// A key press with its modifier state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyCombo {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
}

impl KeyCombo {
    pub fn key(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Self::default()
        }
    }

    pub fn ctrl(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ctrl: true,
            ..Self::default()
        }
    }

    pub fn ctrl_shift(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ctrl: true,
            shift: true,
            ..Self::default()
        }
    }
}

/// Keyboard shortcuts the exam blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenCombo {
    Copy,
    Cut,
    Paste,
    SelectAll,
    Save,
    Print,
    DevTools,
    PrintScreen,
}

/// Classifies a key press, `None` for ordinary typing.
pub fn classify_combo(combo: &KeyCombo) -> Option<ForbiddenCombo> {
    let key = combo.key.to_ascii_lowercase();
    match key.as_str() {
        "printscreen" => return Some(ForbiddenCombo::PrintScreen),
        "f12" => return Some(ForbiddenCombo::DevTools),
        _ => {}
    }

    let command = combo.ctrl || combo.meta;
    if !command {
        return None;
    }

    // Ctrl+Shift+I/J/C and Cmd+Opt+I/J/C open the inspector.
    let inspector = combo.shift || (combo.meta && combo.alt);
    if inspector && matches!(key.as_str(), "i" | "j" | "c") {
        return Some(ForbiddenCombo::DevTools);
    }

    match key.as_str() {
        "c" => Some(ForbiddenCombo::Copy),
        "x" => Some(ForbiddenCombo::Cut),
        "v" => Some(ForbiddenCombo::Paste),
        "a" => Some(ForbiddenCombo::SelectAll),
        "s" => Some(ForbiddenCombo::Save),
        "p" => Some(ForbiddenCombo::Print),
        "u" => Some(ForbiddenCombo::DevTools),
        _ => None,
    }
}

/// Environment signals observed during an active module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    /// The page became hidden (tab switch, minimize).
    VisibilityHidden,
    /// The window lost focus; counts only once confirmed.
    WindowBlur,
    /// Result of the delayed focus check scheduled by a blur.
    BlurConfirmed { has_focus: bool },
    FullscreenExit,
    ContextMenu,
    Clipboard { action: ClipboardAction },
    Key { combo: KeyCombo },
    /// The browser is about to print.
    PrintRequested,
}

/// What the policy does with a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Ignore,
    /// Warn without counting.
    Warn(ViolationKind),
    /// Count a violation and warn.
    Count(ViolationKind),
    /// Count only if [`fullscreen_exit_counts`] allows it.
    CountAfterPriorViolation(ViolationKind),
    /// Wait for the blur confirmation before deciding.
    ConfirmBlur,
}

/// A row of the proctoring table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub effect: Effect,
    /// Whether the browser default action must be suppressed.
    pub prevent_default: bool,
}

/// The proctoring table: signal to effect.
pub fn rule_for(signal: &Signal) -> Rule {
    let (effect, prevent_default) = match signal {
        Signal::VisibilityHidden => (Effect::Count(ViolationKind::TabSwitch), false),
        Signal::WindowBlur => (Effect::ConfirmBlur, false),
        Signal::BlurConfirmed { has_focus: true } => (Effect::Ignore, false),
        Signal::BlurConfirmed { has_focus: false } => {
            (Effect::Count(ViolationKind::WindowBlur), false)
        }
        Signal::FullscreenExit => (
            Effect::CountAfterPriorViolation(ViolationKind::FullscreenExit),
            false,
        ),
        Signal::ContextMenu => (Effect::Warn(ViolationKind::RightClick), true),
        Signal::Clipboard { .. } => (Effect::Warn(ViolationKind::CopyPaste), true),
        Signal::Key { combo } => match classify_combo(combo) {
            Some(ForbiddenCombo::DevTools) => (Effect::Count(ViolationKind::DevTools), true),
            Some(ForbiddenCombo::PrintScreen) => (Effect::Count(ViolationKind::Screenshot), true),
            Some(_) => (Effect::Warn(ViolationKind::KeyboardShortcut), true),
            None => (Effect::Ignore, false),
        },
        Signal::PrintRequested => (Effect::Count(ViolationKind::Print), true),
    };
    Rule {
        effect,
        prevent_default,
    }
}

/// Whether leaving fullscreen counts as a violation.
///
/// Browsers report a fullscreen change while the initial fullscreen grant
/// settles, so an exit only counts once another violation has been seen.
/// This treats "no violations yet" as "fullscreen may never have been
/// entered properly", which is a heuristic worth revisiting.
pub fn fullscreen_exit_counts(prior_violations: u32) -> bool {
    prior_violations > 0
}

/// A modal warning that must be acknowledged before the candidate continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: ViolationKind,
    /// Whether this warning came with a counted violation.
    pub counted: bool,
    pub violations: u32,
    pub remaining: u32,
    pub message: String,
}

/// Result of handling one signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub violation: Option<Violation>,
    pub warning: Option<Warning>,
    pub prevent_default: bool,
    /// Deliver `Signal::BlurConfirmed` after this delay.
    pub schedule_blur_check: Option<Duration>,
    /// True exactly once, for the violation that reaches the limit.
    pub limit_reached: bool,
}

type LimitCallback = Box<dyn FnMut(u32) + Send>;

/// How many recent violations a monitor keeps for display.
pub const RECENT_VIOLATIONS: usize = 20;

/// Counts violations for one session and enforces the limit.
pub struct ProctorMonitor {
    config: ProctorConfig,
    armed: bool,
    count: u32,
    recent: VecDeque<Violation>,
    limit_fired: bool,
    pending_warning: Option<Warning>,
    on_limit_reached: Option<LimitCallback>,
}

impl fmt::Debug for ProctorMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProctorMonitor")
            .field("config", &self.config)
            .field("armed", &self.armed)
            .field("count", &self.count)
            .field("limit_fired", &self.limit_fired)
            .field("pending_warning", &self.pending_warning)
            .finish_non_exhaustive()
    }
}

impl ProctorMonitor {
    pub fn new(config: ProctorConfig) -> Self {
        if !config.enabled {
            tracing::warn!("Proctoring disabled by configuration");
        }
        Self {
            config,
            armed: false,
            count: 0,
            recent: VecDeque::with_capacity(RECENT_VIOLATIONS),
            limit_fired: false,
            pending_warning: None,
            on_limit_reached: None,
        }
    }

    /// Registers the callback run once when the violation limit is reached.
    pub fn on_limit_reached(mut self, callback: impl FnMut(u32) + Send + 'static) -> Self {
        self.on_limit_reached = Some(Box::new(callback));
        self
    }

    /// Carries over the count of a resumed session.
    ///
    /// A count already at the limit marks the limit as handled; the session
    /// was terminated when it got there.
    pub fn restore(&mut self, count: u32) {
        self.count = self.count.max(count);
        if self.count >= self.config.max_violations {
            self.limit_fired = true;
        }
    }

    /// Starts monitoring for an active module.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Stops monitoring between modules and after the exam.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_active(&self) -> bool {
        self.config.enabled && self.armed
    }

    pub fn violation_count(&self) -> u32 {
        self.count
    }

    /// The latest violations, oldest first. The count keeps going past
    /// [`RECENT_VIOLATIONS`]; older entries are dropped.
    pub fn violations(&self) -> impl ExactSizeIterator<Item = &Violation> {
        self.recent.iter()
    }

    pub fn limit_reached(&self) -> bool {
        self.limit_fired
    }

    pub fn pending_warning(&self) -> Option<&Warning> {
        self.pending_warning.as_ref()
    }

    /// Clears the modal warning; returns it if there was one.
    pub fn acknowledge_warning(&mut self) -> Option<Warning> {
        self.pending_warning.take()
    }

    pub fn config(&self) -> &ProctorConfig {
        &self.config
    }

    /// Applies the proctoring table to one signal.
    pub fn handle(&mut self, signal: &Signal, at: DateTime<Utc>) -> Outcome {
        if !self.is_active() {
            return Outcome::default();
        }

        let rule = rule_for(signal);
        let mut outcome = Outcome {
            prevent_default: rule.prevent_default,
            ..Outcome::default()
        };

        match rule.effect {
            Effect::Ignore => {}
            Effect::ConfirmBlur => {
                outcome.schedule_blur_check = Some(self.config.blur_confirm_delay);
            }
            Effect::Warn(kind) => {
                outcome.warning = Some(self.warn(kind, false));
            }
            Effect::CountAfterPriorViolation(kind) => {
                if fullscreen_exit_counts(self.count) {
                    self.count_violation(kind, at, &mut outcome);
                } else {
                    tracing::debug!("Ignoring {} before any other violation", kind);
                }
            }
            Effect::Count(kind) => self.count_violation(kind, at, &mut outcome),
        }

        outcome
    }

    fn count_violation(&mut self, kind: ViolationKind, at: DateTime<Utc>, outcome: &mut Outcome) {
        self.count += 1;
        let violation = Violation {
            kind,
            timestamp: at,
        };
        if self.recent.len() == RECENT_VIOLATIONS {
            self.recent.pop_front();
        }
        self.recent.push_back(violation.clone());
        outcome.violation = Some(violation);
        outcome.warning = Some(self.warn(kind, true));

        tracing::warn!(
            kind = %kind,
            count = self.count,
            max = self.config.max_violations,
            "Proctoring violation"
        );

        if self.count >= self.config.max_violations && !self.limit_fired {
            self.limit_fired = true;
            outcome.limit_reached = true;
            tracing::error!(count = self.count, "Violation limit reached");
            if let Some(callback) = self.on_limit_reached.as_mut() {
                callback(self.count);
            }
        }
    }

    fn warn(&mut self, kind: ViolationKind, counted: bool) -> Warning {
        let remaining = self.config.max_violations.saturating_sub(self.count);
        let message = warning_message(kind, counted, remaining);
        let warning = Warning {
            kind,
            counted,
            violations: self.count,
            remaining,
            message,
        };
        self.pending_warning = Some(warning.clone());
        warning
    }
}

fn warning_message(kind: ViolationKind, counted: bool, remaining: u32) -> String {
    let what = match kind {
        ViolationKind::TabSwitch => "Leaving the exam tab is not allowed.",
        ViolationKind::WindowBlur => "The exam window lost focus.",
        ViolationKind::FullscreenExit => "The exam must stay in fullscreen.",
        ViolationKind::RightClick => "Right-click is disabled during the exam.",
        ViolationKind::CopyPaste => "Copy and paste are disabled during the exam.",
        ViolationKind::KeyboardShortcut => "This keyboard shortcut is disabled during the exam.",
        ViolationKind::DevTools => "Developer tools are not allowed.",
        ViolationKind::Screenshot => "Screenshots are not allowed.",
        ViolationKind::Print => "Printing is not allowed.",
    };
    if !counted {
        return what.to_string();
    }
    if remaining == 0 {
        format!("{} The violation limit was reached and the exam is ending.", what)
    } else {
        format!("{} {} more violation(s) will end the exam.", what, remaining)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn armed(config: ProctorConfig) -> ProctorMonitor {
        let mut monitor = ProctorMonitor::new(config);
        monitor.arm();
        monitor
    }

    fn blur(monitor: &mut ProctorMonitor) -> Outcome {
        let first = monitor.handle(&Signal::WindowBlur, Utc::now());
        assert_eq!(first.schedule_blur_check, Some(DEFAULT_BLUR_CONFIRM));
        assert!(first.violation.is_none());
        monitor.handle(&Signal::BlurConfirmed { has_focus: false }, Utc::now())
    }

    #[test]
    fn limit_fires_exactly_once_on_third_violation() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut monitor = armed(ProctorConfig::default()).on_limit_reached(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let first = monitor.handle(&Signal::VisibilityHidden, Utc::now());
        assert!(!first.limit_reached);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let second = blur(&mut monitor);
        assert!(!second.limit_reached);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let third = monitor.handle(&Signal::VisibilityHidden, Utc::now());
        assert!(third.limit_reached);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let fourth = monitor.handle(&Signal::VisibilityHidden, Utc::now());
        assert!(!fourth.limit_reached);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.violation_count(), 4);
    }

    #[test]
    fn blur_with_focus_back_does_not_count() {
        let mut monitor = armed(ProctorConfig::default());
        monitor.handle(&Signal::WindowBlur, Utc::now());
        let outcome = monitor.handle(&Signal::BlurConfirmed { has_focus: true }, Utc::now());
        assert!(outcome.violation.is_none());
        assert_eq!(monitor.violation_count(), 0);
    }

    #[test]
    fn fullscreen_exit_needs_a_prior_violation() {
        let mut monitor = armed(ProctorConfig::default());
        let first = monitor.handle(&Signal::FullscreenExit, Utc::now());
        assert!(first.violation.is_none());
        assert_eq!(monitor.violation_count(), 0);

        monitor.handle(&Signal::VisibilityHidden, Utc::now());
        let second = monitor.handle(&Signal::FullscreenExit, Utc::now());
        assert_eq!(
            second.violation.map(|v| v.kind),
            Some(ViolationKind::FullscreenExit)
        );
        assert_eq!(monitor.violation_count(), 2);
    }

    #[test]
    fn right_click_and_clipboard_only_warn() {
        let mut monitor = armed(ProctorConfig::default());
        let outcome = monitor.handle(&Signal::ContextMenu, Utc::now());
        assert!(outcome.prevent_default);
        assert!(outcome.violation.is_none());
        assert_eq!(outcome.warning.map(|w| w.counted), Some(false));

        let outcome = monitor.handle(
            &Signal::Clipboard {
                action: ClipboardAction::Paste,
            },
            Utc::now(),
        );
        assert_eq!(
            outcome.warning.map(|w| w.kind),
            Some(ViolationKind::CopyPaste)
        );
        assert_eq!(monitor.violation_count(), 0);
    }

    #[test]
    fn only_devtools_and_print_screen_combos_count() {
        let mut monitor = armed(ProctorConfig {
            max_violations: 10,
            ..ProctorConfig::default()
        });
        for combo in [KeyCombo::ctrl("c"), KeyCombo::ctrl("v"), KeyCombo::ctrl("s")] {
            let outcome = monitor.handle(&Signal::Key { combo }, Utc::now());
            assert!(outcome.prevent_default);
            assert!(outcome.violation.is_none());
        }
        assert_eq!(monitor.violation_count(), 0);

        monitor.handle(&Signal::Key { combo: KeyCombo::key("F12") }, Utc::now());
        monitor.handle(&Signal::Key { combo: KeyCombo::ctrl_shift("I") }, Utc::now());
        monitor.handle(&Signal::Key { combo: KeyCombo::key("PrintScreen") }, Utc::now());
        let kinds: Vec<ViolationKind> = monitor.violations().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ViolationKind::DevTools,
                ViolationKind::DevTools,
                ViolationKind::Screenshot
            ]
        );
    }

    #[test]
    fn plain_typing_is_ignored() {
        let mut monitor = armed(ProctorConfig::default());
        let outcome = monitor.handle(&Signal::Key { combo: KeyCombo::key("a") }, Utc::now());
        assert_eq!(outcome, Outcome::default());
    }

    #[test]
    fn ctrl_shift_c_is_devtools_not_copy() {
        assert_eq!(
            classify_combo(&KeyCombo::ctrl_shift("C")),
            Some(ForbiddenCombo::DevTools)
        );
        assert_eq!(classify_combo(&KeyCombo::ctrl("C")), Some(ForbiddenCombo::Copy));
        let mac = KeyCombo {
            key: "i".to_string(),
            meta: true,
            alt: true,
            ..KeyCombo::default()
        };
        assert_eq!(classify_combo(&mac), Some(ForbiddenCombo::DevTools));
    }

    #[test]
    fn disabled_mode_ignores_everything() {
        let mut monitor = armed(ProctorConfig {
            enabled: false,
            ..ProctorConfig::default()
        });
        for _ in 0..5 {
            assert_eq!(
                monitor.handle(&Signal::VisibilityHidden, Utc::now()),
                Outcome::default()
            );
        }
        assert_eq!(monitor.violation_count(), 0);
    }

    #[test]
    fn unarmed_monitor_ignores_signals() {
        let mut monitor = ProctorMonitor::new(ProctorConfig::default());
        monitor.handle(&Signal::VisibilityHidden, Utc::now());
        assert_eq!(monitor.violation_count(), 0);
    }

    #[test]
    fn warnings_wait_for_acknowledgement() {
        let mut monitor = armed(ProctorConfig::default());
        monitor.handle(&Signal::VisibilityHidden, Utc::now());
        let warning = monitor.pending_warning().cloned().unwrap();
        assert_eq!(warning.remaining, 2);
        assert!(warning.counted);
        assert_eq!(monitor.acknowledge_warning(), Some(warning));
        assert!(monitor.pending_warning().is_none());
    }

    #[test]
    fn violation_history_is_bounded() {
        let mut monitor = armed(ProctorConfig {
            max_violations: 1_000,
            ..ProctorConfig::default()
        });
        for _ in 0..RECENT_VIOLATIONS {
            monitor.handle(&Signal::VisibilityHidden, Utc::now());
        }
        let last = monitor.handle(&Signal::Key { combo: KeyCombo::key("F12") }, Utc::now());

        assert_eq!(monitor.violation_count(), RECENT_VIOLATIONS as u32 + 1);
        assert_eq!(monitor.violations().len(), RECENT_VIOLATIONS);
        assert_eq!(monitor.violations().last(), last.violation.as_ref());
    }

    #[test]
    fn restored_count_at_limit_never_refires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut monitor = armed(ProctorConfig::default()).on_limit_reached(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        monitor.restore(3);
        monitor.handle(&Signal::VisibilityHidden, Utc::now());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(monitor.limit_reached());
    }
}
