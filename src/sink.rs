//! Alert listeners.
//!
//! Delivery is fire-and-forget from the engine's point of view: an error or
//! a panic inside a listener is logged and swallowed so it can never abort
//! batch processing.

use crossbeam_channel::{Sender, TrySendError};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{info, warn};

use crate::alert::{Alert, AlertCode};
use crate::error::NotifyError;

/// Receives alerts from one engine.
pub trait AlertSink: Send {
    fn notify(&mut self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Plain callbacks taking `(code, message)`.
impl<F> AlertSink for F
where
    F: FnMut(AlertCode, &str) + Send,
{
    fn notify(&mut self, alert: &Alert) -> Result<(), NotifyError> {
        self(alert.code, &alert.message);
        Ok(())
    }
}

/// Discards every alert.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AlertSink for NullSink {
    fn notify(&mut self, _alert: &Alert) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Writes alerts to the `tracing` pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn notify(&mut self, alert: &Alert) -> Result<(), NotifyError> {
        info!(
            stream = %alert.stream,
            batch = alert.batch,
            code = alert.code.as_u8(),
            score = alert.score,
            cutoff = alert.cutoff,
            "{}",
            alert.message
        );
        Ok(())
    }
}

/// Forwards alerts over a crossbeam channel without blocking.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<Alert>,
}

impl ChannelSink {
    pub fn new(tx: Sender<Alert>) -> Self {
        Self { tx }
    }
}

impl AlertSink for ChannelSink {
    fn notify(&mut self, alert: &Alert) -> Result<(), NotifyError> {
        match self.tx.try_send(alert.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(NotifyError::Disconnected),
            Err(TrySendError::Full(_)) => Err(NotifyError::Failed("alert channel full".into())),
        }
    }
}

/// Hand `alert` to `sink`, containing any failure. Returns whether the
/// listener accepted it.
pub(crate) fn deliver(sink: &mut dyn AlertSink, alert: &Alert) -> bool {
    let outcome = catch_unwind(AssertUnwindSafe(|| sink.notify(alert)))
        .unwrap_or_else(|payload| Err(NotifyError::Panicked(panic_message(payload.as_ref()))));

    match outcome {
        Ok(()) => true,
        Err(e) => {
            warn!(
                stream = %alert.stream,
                batch = alert.batch,
                code = alert.code.as_u8(),
                error = %e,
                "Alert notification failed"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crossbeam_channel::bounded;
    use uuid::Uuid;

    fn alert(code: AlertCode) -> Alert {
        Alert {
            stream: Uuid::nil(),
            batch: 3,
            code,
            message: code.name().to_string(),
            score: 1.0,
            cutoff: 0.5,
            raised_at: Utc::now(),
        }
    }

    #[test]
    fn test_closure_sink_receives_code_and_message() {
        let mut seen = Vec::new();
        {
            let mut sink = |code: AlertCode, msg: &str| seen.push((code, msg.to_string()));
            assert!(deliver(&mut sink, &alert(AlertCode::Warning)));
        }
        assert_eq!(seen, vec![(AlertCode::Warning, "warning".to_string())]);
    }

    struct Exploding;

    impl AlertSink for Exploding {
        fn notify(&mut self, _alert: &Alert) -> Result<(), NotifyError> {
            panic!("listener exploded")
        }
    }

    #[test]
    fn test_panicking_sink_is_contained() {
        assert!(!deliver(&mut Exploding, &alert(AlertCode::Drift)));
    }

    #[test]
    fn test_channel_sink() {
        let (tx, rx) = bounded(1);
        let mut sink = ChannelSink::new(tx);
        assert!(deliver(&mut sink, &alert(AlertCode::Drift)));
        assert_eq!(rx.try_recv().unwrap().code, AlertCode::Drift);

        drop(rx);
        assert_eq!(
            sink.notify(&alert(AlertCode::Drift)),
            Err(NotifyError::Disconnected)
        );
        assert!(!deliver(&mut sink, &alert(AlertCode::Drift)));
    }

    #[test]
    fn test_null_and_log_sinks_accept() {
        assert!(deliver(&mut NullSink, &alert(AlertCode::Warning)));
        assert!(deliver(&mut LogSink, &alert(AlertCode::Warning)));
    }
}
