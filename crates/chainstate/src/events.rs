//! Typed notifications emitted after state transitions commit.

use crossbeam_channel::{unbounded, Receiver, Sender};
use primitive_types::U256;
use smartd_consensus::Hash256;

#[derive(Clone, Debug)]
pub enum ChainEvent {
    HeaderAccepted {
        hash: Hash256,
        height: i32,
    },
    BlockConnected {
        hash: Hash256,
        height: i32,
    },
    BlockDisconnected {
        hash: Hash256,
        height: i32,
    },
    TipUpdated {
        hash: Hash256,
        height: i32,
        work: U256,
    },
    /// A competing branch near the tip has accumulated dangerous work.
    ForkWarning {
        message: String,
    },
    Warning {
        message: String,
    },
}

/// Fan-out sender; dropped receivers are pruned on the next emit.
#[derive(Default)]
pub struct EventHub {
    sinks: Vec<Sender<ChainEvent>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<ChainEvent> {
        let (sender, receiver) = unbounded();
        self.sinks.push(sender);
        receiver
    }

    pub fn emit(&mut self, event: ChainEvent) {
        self.sinks.retain(|sink| sink.send(event.clone()).is_ok());
    }

    pub fn has_subscribers(&self) -> bool {
        !self.sinks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_fan_out_in_order() {
        let mut hub = EventHub::new();
        let first = hub.subscribe();
        let second = hub.subscribe();
        hub.emit(ChainEvent::HeaderAccepted {
            hash: [1u8; 32],
            height: 1,
        });
        hub.emit(ChainEvent::BlockConnected {
            hash: [2u8; 32],
            height: 1,
        });
        for receiver in [first, second] {
            assert!(matches!(
                receiver.try_recv(),
                Ok(ChainEvent::HeaderAccepted { height: 1, .. })
            ));
            assert!(matches!(
                receiver.try_recv(),
                Ok(ChainEvent::BlockConnected { height: 1, .. })
            ));
        }
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut hub = EventHub::new();
        let receiver = hub.subscribe();
        drop(receiver);
        hub.emit(ChainEvent::Warning {
            message: "gone".to_string(),
        });
        assert!(!hub.has_subscribers());
    }
}
