//! In-memory simulated mesh
//!
//! Implements [`MeshClient`] on top of a set of virtual light devices. Every
//! request is recorded so callers can assert on the exact traffic, and
//! failures (unreachable devices, missing composition data, transport
//! errors) can be injected.

use async_trait::async_trait;
use meshlight_core::{Composition, ModelId, UnicastAddress, MAX_KELVIN, MAX_LIGHTNESS, MIN_KELVIN};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, trace};

use crate::client::{AccessError, MeshClient, NodeReplies, NodeReply, Result};
use crate::messages::{
    CtlRequest, CtlStatus, InboundMessage, LightnessStatus, OnOffStatus, Opcode, RangeStatus, StatusMessage,
};

/// Address the simulated application sits on
pub const CLIENT_ADDRESS: u16 = 0x0001;

const CHANNEL_CAPACITY: usize = 100;

/// A virtual light device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDevice {
    pub unicast: UnicastAddress,
    /// Models implemented by the primary element
    #[serde(default)]
    pub models: Vec<ModelId>,
    /// Whether the device answers composition data requests
    #[serde(default = "default_true")]
    pub has_composition: bool,
    /// Whether the device answers at all
    #[serde(default = "default_true")]
    pub reachable: bool,
    #[serde(default)]
    pub onoff: bool,
    #[serde(default = "default_lightness")]
    pub lightness: u16,
    /// Raw CTL temperature field
    #[serde(default = "default_temperature")]
    pub temperature: u16,
}

fn default_true() -> bool {
    true
}

fn default_lightness() -> u16 {
    MAX_LIGHTNESS
}

fn default_temperature() -> u16 {
    4000
}

impl SimulatedDevice {
    pub fn new(unicast: UnicastAddress, models: Vec<ModelId>) -> Self {
        Self {
            unicast,
            models,
            has_composition: true,
            reachable: true,
            onoff: false,
            lightness: default_lightness(),
            temperature: default_temperature(),
        }
    }

    /// A dimmable color-temperature light implementing all three light models
    pub fn ctl_light(unicast: UnicastAddress) -> Self {
        Self::new(
            unicast,
            vec![
                ModelId::CONFIG_SERVER,
                ModelId::GENERIC_ONOFF_SERVER,
                ModelId::LIGHT_LIGHTNESS_SERVER,
                ModelId::LIGHT_CTL_SERVER,
            ],
        )
    }

    pub fn without_composition(mut self) -> Self {
        self.has_composition = false;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    fn composition(&self) -> Composition {
        Composition::single_element(self.models.clone())
    }

    fn onoff_status(&self) -> OnOffStatus {
        OnOffStatus {
            present_onoff: self.onoff,
            target_onoff: None,
        }
    }

    fn lightness_status(&self) -> LightnessStatus {
        LightnessStatus {
            present_lightness: if self.onoff { self.lightness } else { 0 },
            target_lightness: None,
        }
    }

    fn ctl_status(&self) -> CtlStatus {
        CtlStatus {
            present_ctl_lightness: if self.onoff { self.lightness } else { 0 },
            present_ctl_temperature: self.temperature,
            target_ctl_lightness: None,
            target_ctl_temperature: None,
        }
    }
}

/// A request seen by the simulated mesh
#[derive(Debug, Clone, PartialEq)]
pub enum MeshCall {
    CompositionData { address: UnicastAddress, timeout: Duration },
    BindAppKey {
        address: UnicastAddress,
        net_index: u16,
        element_address: UnicastAddress,
        app_key_index: u16,
        model: ModelId,
    },
    GetOnOff { address: UnicastAddress },
    SetOnOff { address: UnicastAddress, onoff: bool, ack: bool },
    GetLightness { address: UnicastAddress },
    SetLightness { address: UnicastAddress, lightness: u16, ack: bool },
    GetLightnessRange { address: UnicastAddress },
    GetCtl { address: UnicastAddress },
    SetCtl { address: UnicastAddress, request: CtlRequest, ack: bool },
    GetCtlTemperatureRange { address: UnicastAddress },
}

/// In-memory [`MeshClient`]
pub struct SimulatedMesh {
    app_key_index: u16,
    devices: Mutex<HashMap<UnicastAddress, SimulatedDevice>>,
    calls: Mutex<Vec<MeshCall>>,
    /// Number of upcoming requests that fail with a transport error
    pending_failures: Mutex<u32>,
    ready: watch::Sender<bool>,
    channels: HashMap<Opcode, broadcast::Sender<InboundMessage>>,
}

impl SimulatedMesh {
    pub fn new(app_key_index: u16) -> Self {
        let (ready, _) = watch::channel(false);
        let channels = Opcode::ALL
            .iter()
            .map(|opcode| (*opcode, broadcast::channel(CHANNEL_CAPACITY).0))
            .collect();

        Self {
            app_key_index,
            devices: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            pending_failures: Mutex::new(0),
            ready,
            channels,
        }
    }

    /// Add or replace a device
    pub async fn add_device(&self, device: SimulatedDevice) {
        debug!(unicast = %device.unicast, models = device.models.len(), "Adding simulated device");
        self.devices.lock().await.insert(device.unicast, device);
    }

    /// Current state of a device
    pub async fn device(&self, address: UnicastAddress) -> Option<SimulatedDevice> {
        self.devices.lock().await.get(&address).cloned()
    }

    pub async fn set_reachable(&self, address: UnicastAddress, reachable: bool) {
        if let Some(device) = self.devices.lock().await.get_mut(&address) {
            device.reachable = reachable;
        }
    }

    /// Make the next `count` requests fail with a transport error
    pub async fn fail_next(&self, count: u32) {
        *self.pending_failures.lock().await = count;
    }

    /// Mark the access layer as attached
    pub fn set_ready(&self) {
        self.ready.send_replace(true);
    }

    /// All requests seen so far
    pub async fn calls(&self) -> Vec<MeshCall> {
        self.calls.lock().await.clone()
    }

    /// Number of app key bind requests for a model
    pub async fn bind_count(&self, model: ModelId) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| matches!(call, MeshCall::BindAppKey { model: m, .. } if *m == model))
            .count()
    }

    /// Most recent CTL set request
    pub async fn last_ctl_request(&self) -> Option<CtlRequest> {
        self.calls.lock().await.iter().rev().find_map(|call| match call {
            MeshCall::SetCtl { request, .. } => Some(*request),
            _ => None,
        })
    }

    /// Deliver a status message as if `source` had published it
    pub fn publish(&self, source: UnicastAddress, message: StatusMessage) {
        if let Some(tx) = self.channels.get(&message.opcode()) {
            let _ = tx.send(InboundMessage {
                source,
                net_index: crate::client::NET_INDEX,
                destination: CLIENT_ADDRESS,
                message,
            });
        }
    }

    async fn record(&self, call: MeshCall) -> Result<()> {
        trace!(?call, "Simulated mesh request");
        self.calls.lock().await.push(call);

        let mut pending = self.pending_failures.lock().await;
        if *pending > 0 {
            *pending -= 1;
            return Err(AccessError::Transport("injected failure".to_string()));
        }
        Ok(())
    }

    async fn collect<T>(
        &self,
        addresses: &[UnicastAddress],
        status: impl Fn(&SimulatedDevice) -> T,
    ) -> NodeReplies<T> {
        let devices = self.devices.lock().await;
        addresses
            .iter()
            .map(|address| {
                let reply = match devices.get(address) {
                    Some(device) if device.reachable => NodeReply::Status(status(device)),
                    _ => NodeReply::Empty,
                };
                (*address, reply)
            })
            .collect()
    }

    /// Apply a change to a reachable device, publish the resulting status and
    /// return it. Unknown or unreachable devices yield `None`.
    async fn update<T>(
        &self,
        address: UnicastAddress,
        apply: impl FnOnce(&mut SimulatedDevice),
        status: impl Fn(&SimulatedDevice) -> T,
        message: impl Fn(&SimulatedDevice) -> StatusMessage,
    ) -> Option<T> {
        let mut devices = self.devices.lock().await;
        let device = devices.get_mut(&address).filter(|d| d.reachable)?;
        apply(device);
        let reply = status(device);
        let published = message(device);
        drop(devices);

        self.publish(address, published);
        Some(reply)
    }

    fn single<T>(address: UnicastAddress, reply: Option<T>) -> NodeReplies<T> {
        let mut replies = NodeReplies::new();
        replies.insert(address, reply.map(NodeReply::Status).unwrap_or(NodeReply::Empty));
        replies
    }
}

fn apply_lightness(device: &mut SimulatedDevice, lightness: u16) {
    device.onoff = lightness > 0;
    if lightness > 0 {
        device.lightness = lightness;
    }
}

#[async_trait]
impl MeshClient for SimulatedMesh {
    fn app_key_index(&self) -> u16 {
        self.app_key_index
    }

    async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    fn subscribe(&self, opcode: Opcode) -> broadcast::Receiver<InboundMessage> {
        match self.channels.get(&opcode) {
            Some(tx) => tx.subscribe(),
            // Every opcode gets a channel in new()
            None => broadcast::channel(1).1,
        }
    }

    async fn composition_data(
        &self,
        addresses: &[UnicastAddress],
        _net_index: u16,
        timeout: Duration,
    ) -> Result<NodeReplies<Composition>> {
        for address in addresses {
            self.record(MeshCall::CompositionData {
                address: *address,
                timeout,
            })
            .await?;
        }

        let devices = self.devices.lock().await;
        Ok(addresses
            .iter()
            .map(|address| {
                let reply = match devices.get(address) {
                    Some(device) if device.reachable && device.has_composition => {
                        NodeReply::Status(device.composition())
                    }
                    Some(device) if device.reachable => NodeReply::Failed(AccessError::Rejected {
                        address: *address,
                        status: 0x02,
                    }),
                    _ => NodeReply::Empty,
                };
                (*address, reply)
            })
            .collect())
    }

    async fn bind_app_key(
        &self,
        address: UnicastAddress,
        net_index: u16,
        element_address: UnicastAddress,
        app_key_index: u16,
        model: ModelId,
    ) -> Result<()> {
        self.record(MeshCall::BindAppKey {
            address,
            net_index,
            element_address,
            app_key_index,
            model,
        })
        .await?;

        let devices = self.devices.lock().await;
        match devices.get(&address) {
            Some(device) if !device.reachable => Err(AccessError::Timeout(Duration::from_secs(10))),
            // Invalid Model
            Some(device) if !device.models.contains(&model) => Err(AccessError::Rejected { address, status: 0x02 }),
            Some(_) => Ok(()),
            None => Err(AccessError::UnknownNode(address)),
        }
    }

    async fn get_onoff(&self, addresses: &[UnicastAddress], _app_index: u16) -> Result<NodeReplies<OnOffStatus>> {
        for address in addresses {
            self.record(MeshCall::GetOnOff { address: *address }).await?;
        }
        Ok(self.collect(addresses, SimulatedDevice::onoff_status).await)
    }

    async fn set_onoff(
        &self,
        destination: UnicastAddress,
        _app_index: u16,
        onoff: bool,
    ) -> Result<NodeReplies<OnOffStatus>> {
        self.record(MeshCall::SetOnOff {
            address: destination,
            onoff,
            ack: true,
        })
        .await?;
        let reply = self
            .update(
                destination,
                |d| d.onoff = onoff,
                SimulatedDevice::onoff_status,
                |d| StatusMessage::OnOff(d.onoff_status()),
            )
            .await;
        Ok(Self::single(destination, reply))
    }

    async fn set_onoff_unack(&self, destination: UnicastAddress, _app_index: u16, onoff: bool) -> Result<()> {
        self.record(MeshCall::SetOnOff {
            address: destination,
            onoff,
            ack: false,
        })
        .await?;
        self.update(
            destination,
            |d| d.onoff = onoff,
            SimulatedDevice::onoff_status,
            |d| StatusMessage::OnOff(d.onoff_status()),
        )
        .await;
        Ok(())
    }

    async fn get_lightness(
        &self,
        addresses: &[UnicastAddress],
        _app_index: u16,
    ) -> Result<NodeReplies<LightnessStatus>> {
        for address in addresses {
            self.record(MeshCall::GetLightness { address: *address }).await?;
        }
        Ok(self.collect(addresses, SimulatedDevice::lightness_status).await)
    }

    async fn set_lightness(
        &self,
        destination: UnicastAddress,
        _app_index: u16,
        lightness: u16,
    ) -> Result<NodeReplies<LightnessStatus>> {
        self.record(MeshCall::SetLightness {
            address: destination,
            lightness,
            ack: true,
        })
        .await?;
        let reply = self
            .update(
                destination,
                |d| apply_lightness(d, lightness),
                SimulatedDevice::lightness_status,
                |d| StatusMessage::Lightness(d.lightness_status()),
            )
            .await;
        Ok(Self::single(destination, reply))
    }

    async fn set_lightness_unack(&self, destination: UnicastAddress, _app_index: u16, lightness: u16) -> Result<()> {
        self.record(MeshCall::SetLightness {
            address: destination,
            lightness,
            ack: false,
        })
        .await?;
        self.update(
            destination,
            |d| apply_lightness(d, lightness),
            SimulatedDevice::lightness_status,
            |d| StatusMessage::Lightness(d.lightness_status()),
        )
        .await;
        Ok(())
    }

    async fn get_lightness_range(
        &self,
        addresses: &[UnicastAddress],
        _app_index: u16,
    ) -> Result<NodeReplies<RangeStatus>> {
        for address in addresses {
            self.record(MeshCall::GetLightnessRange { address: *address }).await?;
        }
        Ok(self
            .collect(addresses, |_| RangeStatus {
                status_code: 0,
                range_min: 1,
                range_max: MAX_LIGHTNESS,
            })
            .await)
    }

    async fn get_ctl(&self, addresses: &[UnicastAddress], _app_index: u16) -> Result<NodeReplies<CtlStatus>> {
        for address in addresses {
            self.record(MeshCall::GetCtl { address: *address }).await?;
        }
        Ok(self.collect(addresses, SimulatedDevice::ctl_status).await)
    }

    async fn set_ctl(
        &self,
        destination: UnicastAddress,
        _app_index: u16,
        request: CtlRequest,
    ) -> Result<NodeReplies<CtlStatus>> {
        self.record(MeshCall::SetCtl {
            address: destination,
            request,
            ack: true,
        })
        .await?;
        let reply = self
            .update(
                destination,
                |d| {
                    apply_lightness(d, request.ctl_lightness);
                    d.temperature = request.ctl_temperature;
                },
                SimulatedDevice::ctl_status,
                |d| StatusMessage::Ctl(d.ctl_status()),
            )
            .await;
        Ok(Self::single(destination, reply))
    }

    async fn set_ctl_unack(&self, destination: UnicastAddress, _app_index: u16, request: CtlRequest) -> Result<()> {
        self.record(MeshCall::SetCtl {
            address: destination,
            request,
            ack: false,
        })
        .await?;
        self.update(
            destination,
            |d| {
                apply_lightness(d, request.ctl_lightness);
                d.temperature = request.ctl_temperature;
            },
            SimulatedDevice::ctl_status,
            |d| StatusMessage::Ctl(d.ctl_status()),
        )
        .await;
        Ok(())
    }

    async fn get_ctl_temperature_range(
        &self,
        addresses: &[UnicastAddress],
        _app_index: u16,
    ) -> Result<NodeReplies<RangeStatus>> {
        for address in addresses {
            self.record(MeshCall::GetCtlTemperatureRange { address: *address }).await?;
        }
        Ok(self
            .collect(addresses, |_| RangeStatus {
                status_code: 0,
                range_min: MIN_KELVIN as u16,
                range_max: MAX_KELVIN as u16,
            })
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::reply_for;

    const LIGHT: UnicastAddress = UnicastAddress(0x0010);

    #[tokio::test]
    async fn test_composition_reply() {
        let mesh = SimulatedMesh::new(0);
        mesh.add_device(SimulatedDevice::ctl_light(LIGHT)).await;
        mesh.add_device(SimulatedDevice::new(UnicastAddress(0x0020), vec![]).without_composition())
            .await;

        let replies = mesh
            .composition_data(&[LIGHT, UnicastAddress(0x0020), UnicastAddress(0x0030)], 0, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(matches!(replies.get(&LIGHT), Some(NodeReply::Status(c)) if c.supports(ModelId::LIGHT_CTL_SERVER)));
        assert!(matches!(replies.get(&UnicastAddress(0x0020)), Some(NodeReply::Failed(_))));
        assert_eq!(replies.get(&UnicastAddress(0x0030)), Some(&NodeReply::Empty));
    }

    #[tokio::test]
    async fn test_bind_rejects_unsupported_model() {
        let mesh = SimulatedMesh::new(0);
        mesh.add_device(SimulatedDevice::new(LIGHT, vec![ModelId::GENERIC_ONOFF_SERVER])).await;

        assert!(mesh
            .bind_app_key(LIGHT, 0, LIGHT, 0, ModelId::GENERIC_ONOFF_SERVER)
            .await
            .is_ok());
        assert!(matches!(
            mesh.bind_app_key(LIGHT, 0, LIGHT, 0, ModelId::LIGHT_CTL_SERVER).await,
            Err(AccessError::Rejected { .. })
        ));
        assert_eq!(mesh.bind_count(ModelId::LIGHT_CTL_SERVER).await, 1);
    }

    #[tokio::test]
    async fn test_unreachable_device_returns_empty() {
        let mesh = SimulatedMesh::new(0);
        mesh.add_device(SimulatedDevice::ctl_light(LIGHT).unreachable()).await;

        let replies = mesh.get_onoff(&[LIGHT], 0).await.unwrap();
        assert_eq!(reply_for(replies, LIGHT), Err(AccessError::EmptyReply(LIGHT)));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let mesh = SimulatedMesh::new(0);
        mesh.add_device(SimulatedDevice::ctl_light(LIGHT)).await;
        mesh.fail_next(1).await;

        assert!(matches!(mesh.get_onoff(&[LIGHT], 0).await, Err(AccessError::Transport(_))));
        assert!(mesh.get_onoff(&[LIGHT], 0).await.is_ok());
        assert_eq!(mesh.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_set_publishes_status() {
        let mesh = SimulatedMesh::new(0);
        mesh.add_device(SimulatedDevice::ctl_light(LIGHT)).await;
        let mut rx = mesh.subscribe(Opcode::LightLightnessStatus);

        mesh.set_lightness_unack(LIGHT, 0, 1200).await.unwrap();

        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.source, LIGHT);
        assert_eq!(
            inbound.message,
            StatusMessage::Lightness(LightnessStatus {
                present_lightness: 1200,
                target_lightness: None,
            })
        );
        assert!(mesh.device(LIGHT).await.unwrap().onoff);
    }

    #[tokio::test]
    async fn test_set_ctl_records_request() {
        let mesh = SimulatedMesh::new(0);
        mesh.add_device(SimulatedDevice::ctl_light(LIGHT)).await;
        let request = CtlRequest {
            ctl_lightness: 500,
            ctl_temperature: 2700,
            ctl_delta_uv: 0,
        };

        let replies = mesh.set_ctl(LIGHT, 0, request).await.unwrap();
        let status = reply_for(replies, LIGHT).unwrap();
        assert_eq!(status.present_ctl_temperature, 2700);
        assert_eq!(mesh.last_ctl_request().await, Some(request));
    }

    #[tokio::test]
    async fn test_wait_ready() {
        let mesh = std::sync::Arc::new(SimulatedMesh::new(0));
        let waiter = {
            let mesh = mesh.clone();
            tokio::spawn(async move { mesh.wait_ready().await })
        };
        mesh.set_ready();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
