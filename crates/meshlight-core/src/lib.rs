//! Meshlight Core - Core types for mesh light nodes
//!
//! This crate provides the building blocks shared by the rest of meshlight:
//! - Model identifiers, unicast addresses and logical capabilities
//! - Node composition data (elements and the models they implement)
//! - Retained property cache with change notification
//! - Availability tracking with failure-threshold hysteresis
//! - Color temperature conversion between mireds, Kelvin and vendor levels

pub mod availability;
pub mod color;
pub mod composition;
pub mod config;
pub mod model;
pub mod state;

pub use availability::{Availability, AvailabilityTracker};
pub use color::{clamp_lightness, ColorLimits, TemperatureEncoding, MAX_KELVIN, MAX_LIGHTNESS, MIN_KELVIN};
pub use composition::{Composition, Element};
pub use config::NodeConfig;
pub use model::{Capability, CapabilitySet, ModelId, UnicastAddress};
pub use state::{Property, PropertyValue, StateCache, StateChange};
