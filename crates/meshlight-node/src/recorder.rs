//! Observability hooks for light nodes
//!
//! Nodes never log directly. They report [`NodeEvent`]s to an injected
//! [`Recorder`]; [`TracingRecorder`] turns them into structured `tracing`
//! events and [`MemoryRecorder`] keeps them for inspection.

use meshlight_core::{Availability, Capability, CapabilitySet, ModelId, Property, UnicastAddress};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Something noteworthy that happened on a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    CompositionFetched { unicast: UnicastAddress, elements: usize },
    /// Composition data could not be obtained; binding falls back to permissive mode
    CompositionMissing { unicast: UnicastAddress, reason: String },
    /// Binding without composition data to verify against
    ModelForceBound { unicast: UnicastAddress, model: ModelId },
    /// Primary element does not implement the model
    ModelUnsupported { unicast: UnicastAddress, model: ModelId },
    /// No composition data and permissive binding is disabled
    ModelSkipped { unicast: UnicastAddress, model: ModelId },
    ModelBound { unicast: UnicastAddress, model: ModelId },
    BindFailed { unicast: UnicastAddress, model: ModelId, error: String },
    /// Bind sequence finished
    Bound { unicast: UnicastAddress, capabilities: CapabilitySet },
    /// Command ignored because the backing model is not bound
    CapabilityMismatch { unicast: UnicastAddress, capability: Capability },
    RequestFailed { unicast: UnicastAddress, operation: &'static str, error: String },
    RangeReported { unicast: UnicastAddress, property: Property, min: u16, max: u16 },
    ProbeFailed { unicast: UnicastAddress, failures: u32, error: String },
    AvailabilityChanged { unicast: UnicastAddress, availability: Availability },
}

/// Sink for node events
pub trait Recorder: Send + Sync {
    fn record(&self, event: &NodeEvent);
}

/// Emits node events as `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl Recorder for TracingRecorder {
    fn record(&self, event: &NodeEvent) {
        match event {
            NodeEvent::CompositionFetched { unicast, elements } => {
                debug!(unicast = %unicast, elements = elements, "Fetched composition data");
            }
            NodeEvent::CompositionMissing { unicast, reason } => {
                warn!(unicast = %unicast, reason = %reason, "Composition data unavailable");
            }
            NodeEvent::ModelForceBound { unicast, model } => {
                warn!(unicast = %unicast, model = %model, "No composition, force-binding model");
            }
            NodeEvent::ModelUnsupported { unicast, model } => {
                info!(unicast = %unicast, model = %model, "Model not supported by node");
            }
            NodeEvent::ModelSkipped { unicast, model } => {
                warn!(unicast = %unicast, model = %model, "No composition, skipping model");
            }
            NodeEvent::ModelBound { unicast, model } => {
                info!(unicast = %unicast, model = %model, "Bound model");
            }
            NodeEvent::BindFailed { unicast, model, error } => {
                warn!(unicast = %unicast, model = %model, error = %error, "Failed to bind model");
            }
            NodeEvent::Bound { unicast, capabilities } => {
                info!(unicast = %unicast, capabilities = %capabilities, "Node bound");
            }
            NodeEvent::CapabilityMismatch { unicast, capability } => {
                info!(unicast = %unicast, capability = %capability, "Capability not bound, ignoring command");
            }
            NodeEvent::RequestFailed { unicast, operation, error } => {
                warn!(unicast = %unicast, operation = operation, error = %error, "Request failed");
            }
            NodeEvent::RangeReported { unicast, property, min, max } => {
                debug!(unicast = %unicast, property = %property, min = min, max = max, "Range reported");
            }
            NodeEvent::ProbeFailed { unicast, failures, error } => {
                warn!(unicast = %unicast, failures = failures, error = %error, "Availability poll failed");
            }
            NodeEvent::AvailabilityChanged { unicast, availability } => {
                info!(unicast = %unicast, availability = %availability, "Availability changed");
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<NodeEvent>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NodeEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Count events matching a predicate
    pub fn count(&self, predicate: impl Fn(&NodeEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| predicate(event))
            .count()
    }
}

impl Recorder for MemoryRecorder {
    fn record(&self, event: &NodeEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_recorder() {
        let recorder = MemoryRecorder::new();
        recorder.record(&NodeEvent::ModelBound {
            unicast: UnicastAddress(1),
            model: ModelId::GENERIC_ONOFF_SERVER,
        });
        recorder.record(&NodeEvent::ProbeFailed {
            unicast: UnicastAddress(1),
            failures: 1,
            error: "timeout".to_string(),
        });

        assert_eq!(recorder.events().len(), 2);
        assert_eq!(recorder.count(|e| matches!(e, NodeEvent::ProbeFailed { .. })), 1);
    }

    #[test]
    fn test_tracing_recorder_accepts_all_events() {
        let recorder = TracingRecorder;
        recorder.record(&NodeEvent::AvailabilityChanged {
            unicast: UnicastAddress(1),
            availability: Availability::Online,
        });
        recorder.record(&NodeEvent::CapabilityMismatch {
            unicast: UnicastAddress(1),
            capability: Capability::Temperature,
        });
    }
}
