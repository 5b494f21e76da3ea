//! Meshlight Node - mesh light node layer
//!
//! A light node discovers which models its device implements, binds the
//! supported ones to the application key and then keeps a retained view of
//! on/off, brightness, color temperature and availability:
//! - [`node::LightNode`] holds the state and implements every operation
//! - [`actor::LightHandle`] runs a node in its own task with a poll loop
//! - [`recorder::Recorder`] receives the node's observable events

pub mod actor;
pub mod node;
pub mod recorder;

pub use actor::{LightHandle, NodeError};
pub use node::{LightNode, NodeSnapshot};
pub use recorder::{MemoryRecorder, NodeEvent, Recorder, TracingRecorder};
