//! Delivery confirmation handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use uuid::Uuid;

use super::{BusError, BusInner, Result};
use crate::event::ConfirmSource;

/// Handed to a destination with each delivery. Calling [`confirm`] records
/// that the record reached the destination's target.
///
/// The handle does not keep the bus alive; confirming after the bus was
/// dropped fails with [`BusError::Closed`].
///
/// [`confirm`]: ConfirmCallback::confirm
#[derive(Clone)]
pub struct ConfirmCallback {
    message_id: Uuid,
    target: ConfirmTarget,
}

#[derive(Clone)]
enum ConfirmTarget {
    Bus(Weak<BusInner>),
    Probe(Arc<AtomicBool>),
}

impl ConfirmCallback {
    pub(crate) fn for_bus(bus: Weak<BusInner>, message_id: Uuid) -> Self {
        Self {
            message_id,
            target: ConfirmTarget::Bus(bus),
        }
    }

    /// A callback that only flips a flag. Nothing is written to the log, so
    /// it is used for destination tests and in unit tests of destinations.
    pub fn probe(message_id: Uuid) -> (Self, ConfirmProbe) {
        let flag = Arc::new(AtomicBool::new(false));
        (
            Self {
                message_id,
                target: ConfirmTarget::Probe(flag.clone()),
            },
            ConfirmProbe(flag),
        )
    }

    /// Id of the record this callback confirms.
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub async fn confirm(&self, source: ConfirmSource) -> Result<()> {
        match &self.target {
            ConfirmTarget::Bus(bus) => {
                let bus = bus.upgrade().ok_or(BusError::Closed)?;
                bus.confirm(self.message_id, &source).await
            }
            ConfirmTarget::Probe(flag) => {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ConfirmCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match self.target {
            ConfirmTarget::Bus(_) => "bus",
            ConfirmTarget::Probe(_) => "probe",
        };
        f.debug_struct("ConfirmCallback")
            .field("message_id", &self.message_id)
            .field("target", &target)
            .finish()
    }
}

/// Observes whether a probe callback was confirmed.
#[derive(Debug, Clone)]
pub struct ConfirmProbe(Arc<AtomicBool>);

impl ConfirmProbe {
    pub fn is_confirmed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
