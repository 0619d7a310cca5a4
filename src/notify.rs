//! Output channels for balance-change alerts.
//!
//! Each channel is independent: a failure in one is logged and the others
//! still fire.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;

use crate::config::PermissionSetting;
use crate::state::{AppState, ToastKind};

/// Notification permission, mirroring the browser model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Default,
    Granted,
    Denied,
}

impl From<PermissionSetting> for Permission {
    fn from(setting: PermissionSetting) -> Self {
        match setting {
            PermissionSetting::Ask => Permission::Default,
            PermissionSetting::Granted => Permission::Granted,
            PermissionSetting::Denied => Permission::Denied,
        }
    }
}

/// Decides whether OS-level notifications may be shown
pub trait PermissionGate: Send + Sync {
    fn current(&self) -> Permission;
    /// Resolve a `Default` permission. Already-decided values are returned as is.
    fn request(&self) -> Permission;
}

/// Permission configured up front. `ask` is granted on first request since a
/// terminal has no prompt to show.
pub struct ConfiguredPermission {
    state: RwLock<Permission>,
}

impl ConfiguredPermission {
    pub fn new(initial: Permission) -> Self {
        Self {
            state: RwLock::new(initial),
        }
    }
}

impl PermissionGate for ConfiguredPermission {
    fn current(&self) -> Permission {
        *self.state.read()
    }

    fn request(&self) -> Permission {
        let mut state = self.state.write();
        if *state == Permission::Default {
            *state = Permission::Granted;
        }
        *state
    }
}

/// One balance-change alert, already formatted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub body: String,
    pub incoming: bool,
}

pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// In-app toast
pub struct ToastSink {
    state: Arc<AppState>,
}

impl ToastSink {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl AlertSink for ToastSink {
    fn name(&self) -> &'static str {
        "toast"
    }

    fn deliver(&self, alert: &Alert) -> Result<()> {
        let kind = if alert.incoming {
            ToastKind::Incoming
        } else {
            ToastKind::Outgoing
        };
        self.state.push_toast(kind, &alert.title, &alert.body);
        Ok(())
    }
}

/// Desktop notification through the terminal's OSC 9 escape.
/// Requests permission lazily and stays silent once denied.
pub struct TerminalNotification {
    permission: Arc<dyn PermissionGate>,
}

impl TerminalNotification {
    pub fn new(permission: Arc<dyn PermissionGate>) -> Self {
        Self { permission }
    }
}

impl AlertSink for TerminalNotification {
    fn name(&self) -> &'static str {
        "notification"
    }

    fn deliver(&self, alert: &Alert) -> Result<()> {
        let permission = match self.permission.current() {
            Permission::Default => self.permission.request(),
            decided => decided,
        };
        if permission != Permission::Granted {
            return Ok(());
        }

        let text = format!("{}: {}", alert.title, alert.body).replace(['\x07', '\x1b'], "");
        let mut out = std::io::stdout().lock();
        write!(out, "\x1b]9;{}\x07", text)?;
        out.flush()?;
        Ok(())
    }
}

/// Audible cue (terminal bell)
pub struct Bell;

impl AlertSink for Bell {
    fn name(&self) -> &'static str {
        "bell"
    }

    fn deliver(&self, _alert: &Alert) -> Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(b"\x07")?;
        out.flush()?;
        Ok(())
    }
}

/// Delivers to every sink; returns how many succeeded.
pub fn fan_out(sinks: &[Arc<dyn AlertSink>], alert: &Alert) -> usize {
    sinks
        .iter()
        .filter(|sink| match sink.deliver(alert) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("{} delivery failed: {}", sink.name(), e);
                false
            }
        })
        .count()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Failing;

    impl AlertSink for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn deliver(&self, _alert: &Alert) -> Result<()> {
            anyhow::bail!("playback blocked")
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl AlertSink for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn deliver(&self, _alert: &Alert) -> Result<()> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn alert() -> Alert {
        Alert {
            title: "Incoming".into(),
            body: "+5 QU".into(),
            incoming: true,
        }
    }

    #[test]
    fn failing_sink_does_not_block_others() {
        let first = Arc::new(Counting::default());
        let last = Arc::new(Counting::default());
        let sinks: Vec<Arc<dyn AlertSink>> = vec![first.clone(), Arc::new(Failing), last.clone()];

        assert_eq!(fan_out(&sinks, &alert()), 2);
        assert_eq!(first.0.load(Ordering::Relaxed), 1);
        assert_eq!(last.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn toast_sink_records_toast() {
        let state = Arc::new(AppState::new("http://node".into(), 5));
        ToastSink::new(state.clone()).deliver(&alert()).unwrap();
        let toasts = state.toasts.read();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].kind, ToastKind::Incoming);
    }

    #[test]
    fn ask_permission_resolves_on_request() {
        let gate = ConfiguredPermission::new(Permission::Default);
        assert_eq!(gate.current(), Permission::Default);
        assert_eq!(gate.request(), Permission::Granted);

        let denied = ConfiguredPermission::new(Permission::Denied);
        assert_eq!(denied.request(), Permission::Denied);
    }
}
