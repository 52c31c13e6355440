//! Observable steps of a recovery.
//!
//! [`Recovery`](crate::Recovery) reports each step it takes to a
//! [`RecoveryObserver`]. The default observer logs through `tracing`; tests
//! and applications can install their own to assert on or react to the
//! sequence.

use std::sync::{Arc, Mutex};

/// One step of a recovery, in the order they can occur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryEvent {
    /// A 402 challenge was decoded.
    PaymentRequired {
        resource: String,
        amount: Option<String>,
    },
    /// The rescue oracle is being asked to approve the payment.
    RescueRequested { resource: String, amount: String },
    /// The rescue oracle answered.
    RescueDecided { decision: String, approved: bool },
    /// An authorization was signed.
    PaymentSigned {
        from: String,
        to: String,
        value: String,
        nonce: String,
    },
    /// The original request is being replayed with payment attached.
    RetryAttempted { url: String },
    /// The replayed request returned.
    RetryCompleted { status: u16 },
}

impl RecoveryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RecoveryEvent::PaymentRequired { .. } => "PaymentRequired",
            RecoveryEvent::RescueRequested { .. } => "RescueRequested",
            RecoveryEvent::RescueDecided { .. } => "RescueDecided",
            RecoveryEvent::PaymentSigned { .. } => "PaymentSigned",
            RecoveryEvent::RetryAttempted { .. } => "RetryAttempted",
            RecoveryEvent::RetryCompleted { .. } => "RetryCompleted",
        }
    }
}

pub trait RecoveryObserver: Send + Sync {
    fn on_event(&self, event: &RecoveryEvent);
}

impl<T: RecoveryObserver + ?Sized> RecoveryObserver for Arc<T> {
    fn on_event(&self, event: &RecoveryEvent) {
        (**self).on_event(event)
    }
}

/// Logs every event with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RecoveryObserver for TracingObserver {
    fn on_event(&self, event: &RecoveryEvent) {
        match event {
            RecoveryEvent::PaymentRequired { resource, amount } => {
                tracing::info!(%resource, ?amount, "Received 402 Payment Required")
            }
            RecoveryEvent::RescueRequested { resource, amount } => {
                tracing::info!(%resource, %amount, "Requesting rescue decision")
            }
            RecoveryEvent::RescueDecided { decision, approved } => {
                tracing::info!(%decision, approved, "Rescue decision received")
            }
            RecoveryEvent::PaymentSigned {
                from,
                to,
                value,
                nonce,
            } => tracing::info!(%from, %to, %value, %nonce, "Payment authorization signed"),
            RecoveryEvent::RetryAttempted { url } => {
                tracing::info!(%url, "Retrying request with payment")
            }
            RecoveryEvent::RetryCompleted { status } => {
                tracing::debug!(status, "Paid retry completed")
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<RecoveryEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecoveryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(RecoveryEvent::name).collect()
    }
}

impl RecoveryObserver for RecordingObserver {
    fn on_event(&self, event: &RecoveryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
