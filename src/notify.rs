//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Mutex;

use tracing::info;

use crate::error::Error;

// Service-manager readiness capability.
//
// Readiness is delivered at most once per process lifetime; every call
// after the latch is set is a no-op.
pub trait ReadinessNotifier: Send + Sync + std::fmt::Debug {
    fn notify_ready(&self);
}

// Readiness notifier speaking the systemd notification protocol.
#[derive(Debug)]
pub struct SdNotifier {
    // Whether readiness notification was requested at all.
    enabled: bool,
    // Latch, set on the first delivery (or on the first call when
    // notification is disabled).
    sent: Mutex<bool>,
}

// ===== impl SdNotifier =====

impl SdNotifier {
    pub fn new(enabled: bool) -> SdNotifier {
        SdNotifier {
            enabled,
            sent: Mutex::new(false),
        }
    }

    #[cfg(test)]
    fn sent(&self) -> bool {
        *self.sent.lock().unwrap()
    }
}

impl ReadinessNotifier for SdNotifier {
    fn notify_ready(&self) {
        let mut sent = self.sent.lock().unwrap();
        if *sent {
            return;
        }
        if !self.enabled {
            *sent = true;
            return;
        }

        if std::env::var_os("NOTIFY_SOCKET").is_none() {
            Error::NotifyUnsupported.log();
            return;
        }
        match sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
            Ok(()) => {
                info!("routes have initialized, sent readiness notification");
                *sent = true;
            }
            Err(error) => {
                Error::NotifyError(error).log();
            }
        }
    }
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_latches_on_first_call() {
        let notifier = SdNotifier::new(false);
        assert!(!notifier.sent());
        notifier.notify_ready();
        assert!(notifier.sent());
        notifier.notify_ready();
        assert!(notifier.sent());
    }

    #[test]
    fn test_unsupported_leaves_latch_clear() {
        std::env::remove_var("NOTIFY_SOCKET");
        let notifier = SdNotifier::new(true);
        notifier.notify_ready();
        assert!(!notifier.sent());
    }
}
