//! Meshlight Access - contract with the mesh access-layer client
//!
//! Light nodes never talk to the mesh directly. They issue logical get/set
//! requests through [`MeshClient`] and receive unsolicited status messages
//! through its subscription channels. [`sim::SimulatedMesh`] is an in-memory
//! implementation used by tests and by the daemon.

pub mod client;
pub mod messages;
pub mod sim;

pub use client::{reply_for, AccessError, MeshClient, NodeReplies, NodeReply, Result, NET_INDEX};
pub use messages::{
    CtlRequest, CtlStatus, InboundMessage, LightnessStatus, OnOffStatus, Opcode, RangeStatus,
    StatusMessage,
};
pub use sim::{MeshCall, SimulatedDevice, SimulatedMesh};
