//! Mesh access-layer client contract

use async_trait::async_trait;
use meshlight_core::{Composition, ModelId, UnicastAddress};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::messages::{CtlRequest, CtlStatus, InboundMessage, LightnessStatus, OnOffStatus, Opcode, RangeStatus};

/// Network key index used for all configuration requests
pub const NET_INDEX: u16 = 0;

/// Result type alias for access-layer requests
pub type Result<T> = std::result::Result<T, AccessError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Node {0} returned an empty result")]
    EmptyReply(UnicastAddress),
    #[error("Node {0} is not known to the access layer")]
    UnknownNode(UnicastAddress),
    #[error("Node {address} rejected the request with status {status}")]
    Rejected { address: UnicastAddress, status: u8 },
}

/// Per-node entry of a multi-address reply
#[derive(Debug, Clone, PartialEq)]
pub enum NodeReply<T> {
    /// Node answered with a status
    Status(T),
    /// Node did not answer (null entry)
    Empty,
    /// Request to this node failed
    Failed(AccessError),
}

impl<T> NodeReply<T> {
    /// Convert into a result; an empty entry becomes [`AccessError::EmptyReply`]
    pub fn into_result(self, address: UnicastAddress) -> Result<T> {
        match self {
            Self::Status(status) => Ok(status),
            Self::Empty => Err(AccessError::EmptyReply(address)),
            Self::Failed(err) => Err(err),
        }
    }
}

/// Replies to a request addressed to several nodes, keyed by node address
pub type NodeReplies<T> = HashMap<UnicastAddress, NodeReply<T>>;

/// Take the reply for one node out of a multi-address reply.
/// A missing entry is treated like an empty one.
pub fn reply_for<T>(mut replies: NodeReplies<T>, address: UnicastAddress) -> Result<T> {
    replies
        .remove(&address)
        .unwrap_or(NodeReply::Empty)
        .into_result(address)
}

/// Request/response client of the mesh access layer.
///
/// Implementations handle segmentation, encryption and retransmission; a
/// light node only sees decoded requests and replies. Acknowledged requests
/// suspend until the reply or the implementation's own timeout.
#[async_trait]
pub trait MeshClient: Send + Sync {
    /// Index of the application's first application key
    fn app_key_index(&self) -> u16;

    /// Wait until the access layer is attached and able to send
    async fn wait_ready(&self);

    /// Subscribe to unsolicited status messages with the given opcode
    fn subscribe(&self, opcode: Opcode) -> broadcast::Receiver<InboundMessage>;

    /// Fetch composition data page zero
    async fn composition_data(
        &self,
        addresses: &[UnicastAddress],
        net_index: u16,
        timeout: Duration,
    ) -> Result<NodeReplies<Composition>>;

    /// Bind an application key to a model of an element
    async fn bind_app_key(
        &self,
        address: UnicastAddress,
        net_index: u16,
        element_address: UnicastAddress,
        app_key_index: u16,
        model: ModelId,
    ) -> Result<()>;

    async fn get_onoff(
        &self,
        addresses: &[UnicastAddress],
        app_index: u16,
    ) -> Result<NodeReplies<OnOffStatus>>;

    async fn set_onoff(
        &self,
        destination: UnicastAddress,
        app_index: u16,
        onoff: bool,
    ) -> Result<NodeReplies<OnOffStatus>>;

    async fn set_onoff_unack(&self, destination: UnicastAddress, app_index: u16, onoff: bool) -> Result<()>;

    async fn get_lightness(
        &self,
        addresses: &[UnicastAddress],
        app_index: u16,
    ) -> Result<NodeReplies<LightnessStatus>>;

    async fn set_lightness(
        &self,
        destination: UnicastAddress,
        app_index: u16,
        lightness: u16,
    ) -> Result<NodeReplies<LightnessStatus>>;

    async fn set_lightness_unack(
        &self,
        destination: UnicastAddress,
        app_index: u16,
        lightness: u16,
    ) -> Result<()>;

    async fn get_lightness_range(
        &self,
        addresses: &[UnicastAddress],
        app_index: u16,
    ) -> Result<NodeReplies<RangeStatus>>;

    async fn get_ctl(&self, addresses: &[UnicastAddress], app_index: u16) -> Result<NodeReplies<CtlStatus>>;

    async fn set_ctl(
        &self,
        destination: UnicastAddress,
        app_index: u16,
        request: CtlRequest,
    ) -> Result<NodeReplies<CtlStatus>>;

    async fn set_ctl_unack(&self, destination: UnicastAddress, app_index: u16, request: CtlRequest) -> Result<()>;

    async fn get_ctl_temperature_range(
        &self,
        addresses: &[UnicastAddress],
        app_index: u16,
    ) -> Result<NodeReplies<RangeStatus>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_for_status() {
        let mut replies = NodeReplies::new();
        replies.insert(UnicastAddress(1), NodeReply::Status(7u16));
        assert_eq!(reply_for(replies, UnicastAddress(1)), Ok(7));
    }

    #[test]
    fn test_reply_for_missing_entry() {
        let mut replies = NodeReplies::new();
        replies.insert(UnicastAddress(2), NodeReply::Status(7u16));
        assert_eq!(
            reply_for(replies, UnicastAddress(1)),
            Err(AccessError::EmptyReply(UnicastAddress(1)))
        );
    }

    #[test]
    fn test_reply_for_failed_entry() {
        let mut replies: NodeReplies<u16> = NodeReplies::new();
        replies.insert(
            UnicastAddress(1),
            NodeReply::Failed(AccessError::Timeout(Duration::from_secs(1))),
        );
        assert!(matches!(reply_for(replies, UnicastAddress(1)), Err(AccessError::Timeout(_))));
    }
}
