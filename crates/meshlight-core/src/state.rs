//! Retained property cache with change notification
//!
//! Every node owns one [`StateCache`]. It is written from two places:
//! - outbound commands, optimistically, before the request is sent
//! - inbound status messages and query replies
//!
//! and read by commands that only change part of a composite state (a CTL
//! write that only carries a temperature reuses the retained brightness).
//! Every write is fanned out to subscribers, even if the value did not change.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

use crate::availability::Availability;
use crate::model::UnicastAddress;

/// Capacity of the change notification channel
const CHANNEL_CAPACITY: usize = 100;

/// Properties tracked for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Property {
    OnOff,
    Brightness,
    Temperature,
    Availability,
}

impl std::fmt::Display for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OnOff => "onoff",
            Self::Brightness => "brightness",
            Self::Temperature => "temperature",
            Self::Availability => "availability",
        };
        f.write_str(name)
    }
}

/// A property together with its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "property", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    OnOff(bool),
    /// Lightness level, 0..=65535
    Brightness(u16),
    /// Color temperature in Kelvin
    Temperature(u16),
    Availability(Availability),
}

impl PropertyValue {
    pub fn property(&self) -> Property {
        match self {
            Self::OnOff(_) => Property::OnOff,
            Self::Brightness(_) => Property::Brightness,
            Self::Temperature(_) => Property::Temperature,
            Self::Availability(_) => Property::Availability,
        }
    }
}

/// Change notification emitted by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub address: UnicastAddress,
    #[serde(flatten)]
    pub value: PropertyValue,
}

/// Last known property values of one node
#[derive(Debug)]
pub struct StateCache {
    address: UnicastAddress,
    retained: HashMap<Property, PropertyValue>,
    event_tx: broadcast::Sender<StateChange>,
}

impl StateCache {
    pub fn new(address: UnicastAddress) -> Self {
        let (event_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self::with_sender(address, event_tx)
    }

    /// Create a cache that publishes on an existing channel, so several nodes
    /// can share one stream
    pub fn with_sender(address: UnicastAddress, event_tx: broadcast::Sender<StateChange>) -> Self {
        Self {
            address,
            retained: HashMap::new(),
            event_tx,
        }
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.event_tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<StateChange> {
        self.event_tx.clone()
    }

    /// Overwrite the retained value and notify subscribers
    pub fn notify(&mut self, value: PropertyValue) {
        self.retained.insert(value.property(), value);
        // No subscribers is fine
        let _ = self.event_tx.send(StateChange {
            address: self.address,
            value,
        });
    }

    /// Last known value of a property
    pub fn retained(&self, property: Property) -> Option<PropertyValue> {
        self.retained.get(&property).copied()
    }

    /// Retained brightness, or `default` if none was seen yet
    pub fn retained_brightness(&self, default: u16) -> u16 {
        match self.retained(Property::Brightness) {
            Some(PropertyValue::Brightness(level)) => level,
            _ => default,
        }
    }

    /// Retained color temperature in Kelvin, or `default` if none was seen yet
    pub fn retained_temperature(&self, default: u16) -> u16 {
        match self.retained(Property::Temperature) {
            Some(PropertyValue::Temperature(kelvin)) => kelvin,
            _ => default,
        }
    }

    pub fn retained_availability(&self) -> Availability {
        match self.retained(Property::Availability) {
            Some(PropertyValue::Availability(availability)) => availability,
            _ => Availability::Unknown,
        }
    }

    /// Snapshot of all retained values
    pub fn snapshot(&self) -> Vec<PropertyValue> {
        self.retained.values().copied().collect()
    }
}
