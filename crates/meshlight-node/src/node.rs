//! Light node state and operations
//!
//! A [`LightNode`] owns everything known about one mesh light: its
//! composition data, the models bound to the application key, the
//! capabilities those grant, the retained property cache and the
//! availability tracker. Operations never fail towards the caller; failures
//! are reported to the [`Recorder`] and reflected in the cache and
//! availability state.
//!
//! The node itself is not synchronized. [`crate::actor`] runs it inside a
//! single task so commands, inbound status messages and polls are applied
//! one at a time.

use meshlight_access::{
    reply_for, CtlRequest, CtlStatus, InboundMessage, LightnessStatus, MeshClient, NodeReplies, OnOffStatus,
    Opcode, RangeStatus, StatusMessage, NET_INDEX,
};
use meshlight_core::{
    clamp_lightness, Availability, AvailabilityTracker, Capability, CapabilitySet, ColorLimits, Composition,
    ModelId, NodeConfig, Property, PropertyValue, StateCache, StateChange, TemperatureEncoding, UnicastAddress,
    MAX_KELVIN, MAX_LIGHTNESS,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::recorder::{NodeEvent, Recorder, TracingRecorder};

/// Point-in-time view of a node
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub unicast: UnicastAddress,
    pub name: String,
    pub availability: Availability,
    pub failures: u32,
    pub has_composition: bool,
    pub bound_models: Vec<ModelId>,
    pub capabilities: CapabilitySet,
    pub lightness_range: Option<(u16, u16)>,
    pub temperature_range: Option<(u16, u16)>,
    pub retained: Vec<PropertyValue>,
}

/// State and operations of one mesh light
pub struct LightNode {
    config: NodeConfig,
    client: Arc<dyn MeshClient>,
    recorder: Arc<dyn Recorder>,
    limits: ColorLimits,
    composition: Option<Composition>,
    bound_models: BTreeSet<ModelId>,
    capabilities: CapabilitySet,
    cache: StateCache,
    availability: AvailabilityTracker,
    /// Encoding of the last CTL write, used to decode CTL status reports
    temperature_encoding: TemperatureEncoding,
    lightness_range: Option<(u16, u16)>,
    temperature_range: Option<(u16, u16)>,
}

impl LightNode {
    /// Create a node reporting to a [`TracingRecorder`]
    pub fn new(config: NodeConfig, client: Arc<dyn MeshClient>) -> Self {
        Self::with_recorder(config, client, Arc::new(TracingRecorder))
    }

    pub fn with_recorder(config: NodeConfig, client: Arc<dyn MeshClient>, recorder: Arc<dyn Recorder>) -> Self {
        Self {
            limits: config.color_limits(),
            availability: AvailabilityTracker::new(config.availability_threshold()),
            cache: StateCache::new(config.unicast),
            temperature_encoding: config.temperature_encoding,
            config,
            client,
            recorder,
            composition: None,
            bound_models: BTreeSet::new(),
            capabilities: CapabilitySet::new(),
            lightness_range: None,
            temperature_range: None,
        }
    }

    /// Publish change notifications on a shared channel instead of a private one
    pub fn with_events(mut self, event_tx: broadcast::Sender<StateChange>) -> Self {
        self.cache = StateCache::with_sender(self.config.unicast, event_tx);
        self
    }

    pub fn unicast(&self) -> UnicastAddress {
        self.config.unicast
    }

    pub fn name(&self) -> String {
        self.config.display_name()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn client(&self) -> Arc<dyn MeshClient> {
        self.client.clone()
    }

    pub fn limits(&self) -> &ColorLimits {
        &self.limits
    }

    pub fn composition(&self) -> Option<&Composition> {
        self.composition.as_ref()
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn is_model_bound(&self, model: ModelId) -> bool {
        self.bound_models.contains(&model)
    }

    pub fn availability(&self) -> Availability {
        self.availability.state()
    }

    pub fn retained(&self, property: Property) -> Option<PropertyValue> {
        self.cache.retained(property)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.cache.subscribe()
    }

    pub fn events(&self) -> broadcast::Sender<StateChange> {
        self.cache.sender()
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            unicast: self.unicast(),
            name: self.name(),
            availability: self.availability.state(),
            failures: self.availability.failures(),
            has_composition: self.composition.is_some(),
            bound_models: self.bound_models.iter().copied().collect(),
            capabilities: self.capabilities.clone(),
            lightness_range: self.lightness_range,
            temperature_range: self.temperature_range,
            retained: self.cache.snapshot(),
        }
    }

    /// Status opcodes worth subscribing to for the bound capabilities
    pub fn status_opcodes(&self) -> Vec<Opcode> {
        let mut opcodes = Vec::new();
        if self.supports(Capability::OnOff) {
            opcodes.push(Opcode::GenericOnOffStatus);
        }
        if self.supports(Capability::Brightness) {
            opcodes.push(Opcode::LightLightnessStatus);
        }
        if self.supports(Capability::Temperature) {
            opcodes.push(Opcode::LightCtlStatus);
        }
        opcodes
    }

    fn app_index(&self) -> u16 {
        self.client.app_key_index()
    }

    fn record(&self, event: NodeEvent) {
        self.recorder.record(&event);
    }

    fn request_failed(&self, operation: &'static str, error: impl ToString) {
        self.record(NodeEvent::RequestFailed {
            unicast: self.unicast(),
            operation,
            error: error.to_string(),
        });
    }

    /// Extract this node's entry from a reply, reporting failures
    fn settle<T>(&self, operation: &'static str, result: meshlight_access::Result<NodeReplies<T>>) -> Option<T> {
        match result.and_then(|replies| reply_for(replies, self.unicast())) {
            Ok(status) => Some(status),
            Err(err) => {
                self.request_failed(operation, err);
                None
            }
        }
    }

    // ---- Composition & binding ----

    /// Fetch composition data page zero. Failure leaves the composition absent.
    pub async fn fetch_composition(&mut self) {
        let unicast = self.unicast();
        let timeout = Duration::from_secs(self.config.composition_timeout_secs);
        let result = self
            .client
            .composition_data(&[unicast], NET_INDEX, timeout)
            .await
            .and_then(|replies| reply_for(replies, unicast));

        self.composition = match result {
            Ok(composition) if composition.elements.is_empty() => {
                self.record(NodeEvent::CompositionMissing {
                    unicast,
                    reason: "page zero lists no elements".to_string(),
                });
                None
            }
            Ok(composition) => {
                self.record(NodeEvent::CompositionFetched {
                    unicast,
                    elements: composition.elements.len(),
                });
                Some(composition)
            }
            Err(err) => {
                self.record(NodeEvent::CompositionMissing {
                    unicast,
                    reason: err.to_string(),
                });
                None
            }
        };
    }

    /// Bind a model to the application key.
    ///
    /// Returns false without contacting the client when the primary element
    /// does not implement the model.
    pub async fn bind_model(&mut self, model: ModelId) -> bool {
        let unicast = self.unicast();
        match &self.composition {
            None if !self.config.permissive_binding => {
                self.record(NodeEvent::ModelSkipped { unicast, model });
                return false;
            }
            None => self.record(NodeEvent::ModelForceBound { unicast, model }),
            Some(composition) if !composition.supports(model) => {
                self.record(NodeEvent::ModelUnsupported { unicast, model });
                return false;
            }
            Some(_) => {}
        }

        let app_key_index = self.app_index();
        match self
            .client
            .bind_app_key(unicast, NET_INDEX, unicast, app_key_index, model)
            .await
        {
            Ok(()) => {
                self.bound_models.insert(model);
                self.record(NodeEvent::ModelBound { unicast, model });
                true
            }
            Err(err) => {
                self.record(NodeEvent::BindFailed {
                    unicast,
                    model,
                    error: err.to_string(),
                });
                false
            }
        }
    }

    /// Discover composition, bind the light models and read initial state
    pub async fn bind(&mut self) {
        self.fetch_composition().await;

        if self.bind_model(ModelId::GENERIC_ONOFF_SERVER).await {
            self.capabilities.grant(Capability::OnOff);
            self.get_onoff().await;
        }

        if self.bind_model(ModelId::LIGHT_LIGHTNESS_SERVER).await {
            self.capabilities.grant(Capability::OnOff);
            self.capabilities.grant(Capability::Brightness);
            self.get_lightness().await;
            self.get_lightness_range().await;
        }

        if self.bind_model(ModelId::LIGHT_CTL_SERVER).await {
            self.capabilities.grant(Capability::Temperature);
            self.capabilities.grant(Capability::Brightness);
            self.get_ctl().await;
            self.get_ctl_temperature_range().await;
        }

        self.record(NodeEvent::Bound {
            unicast: self.unicast(),
            capabilities: self.capabilities.clone(),
        });
    }

    // ---- Commands ----

    pub async fn turn_on(&mut self, ack: bool) {
        self.set_onoff(true, ack).await;
    }

    pub async fn turn_off(&mut self, ack: bool) {
        self.set_onoff(false, ack).await;
    }

    pub async fn set_onoff(&mut self, onoff: bool, ack: bool) {
        self.cache.notify(PropertyValue::OnOff(onoff));

        let (unicast, app_index) = (self.unicast(), self.app_index());
        if ack {
            let result = self.client.set_onoff(unicast, app_index, onoff).await;
            if let Some(status) = self.settle("set_onoff", result) {
                self.apply_status(StatusMessage::OnOff(status));
            }
        } else if let Err(err) = self.client.set_onoff_unack(unicast, app_index, onoff).await {
            self.request_failed("set_onoff_unack", err);
        }
    }

    /// Set lightness; ignored unless the lightness server is bound
    pub async fn set_brightness(&mut self, level: u32, ack: bool) {
        if !self.is_model_bound(ModelId::LIGHT_LIGHTNESS_SERVER) {
            self.record(NodeEvent::CapabilityMismatch {
                unicast: self.unicast(),
                capability: Capability::Brightness,
            });
            return;
        }

        let lightness = clamp_lightness(level);
        self.cache.notify(PropertyValue::Brightness(lightness));

        let (unicast, app_index) = (self.unicast(), self.app_index());
        if ack {
            let result = self.client.set_lightness(unicast, app_index, lightness).await;
            if let Some(status) = self.settle("set_lightness", result) {
                self.apply_status(StatusMessage::Lightness(status));
            }
        } else if let Err(err) = self.client.set_lightness_unack(unicast, app_index, lightness).await {
            self.request_failed("set_lightness_unack", err);
        }
    }

    /// Set color temperature in Kelvin, keeping the retained brightness
    pub async fn set_temperature(&mut self, kelvin: u32, ack: bool) {
        self.set_ctl(Some(kelvin), None, TemperatureEncoding::Kelvin, ack).await;
    }

    /// Set color temperature given in mireds
    pub async fn set_temperature_from_mired(&mut self, mired: u32, ack: bool, encoding: TemperatureEncoding) {
        let kelvin = self.limits.mireds_to_kelvin(mired);
        tracing::debug!(unicast = %self.unicast(), mired, kelvin, ?encoding, "Converted mireds");
        self.set_ctl(Some(kelvin), None, encoding, ack).await;
    }

    /// Write CTL state. Omitted fields are filled from the retained cache so
    /// a temperature change does not reset brightness and vice versa.
    pub async fn set_ctl(
        &mut self,
        temperature: Option<u32>,
        brightness: Option<u32>,
        encoding: TemperatureEncoding,
        ack: bool,
    ) {
        if !self.is_model_bound(ModelId::LIGHT_CTL_SERVER) {
            self.record(NodeEvent::CapabilityMismatch {
                unicast: self.unicast(),
                capability: Capability::Temperature,
            });
            return;
        }

        let kelvin = match temperature {
            Some(kelvin) => {
                let kelvin = self.limits.clamp_kelvin(kelvin);
                self.cache.notify(PropertyValue::Temperature(kelvin_field(kelvin)));
                kelvin
            }
            None => self.cache.retained_temperature(MAX_KELVIN as u16) as u32,
        };

        let lightness = match brightness {
            Some(level) => {
                let lightness = clamp_lightness(level);
                self.cache.notify(PropertyValue::Brightness(lightness));
                lightness
            }
            None => self.cache.retained_brightness(MAX_LIGHTNESS),
        };

        let request = CtlRequest {
            ctl_lightness: lightness,
            ctl_temperature: encoding.encode(&self.limits, kelvin),
            ctl_delta_uv: 0,
        };
        if encoding == TemperatureEncoding::VendorLevel {
            tracing::debug!(
                unicast = %self.unicast(),
                kelvin,
                level = request.ctl_temperature,
                "Encoded vendor CTL temperature"
            );
        }
        self.temperature_encoding = encoding;

        let (unicast, app_index) = (self.unicast(), self.app_index());
        if ack {
            let result = self.client.set_ctl(unicast, app_index, request).await;
            if let Some(status) = self.settle("set_ctl", result) {
                self.apply_status(StatusMessage::Ctl(status));
            }
        } else if let Err(err) = self.client.set_ctl_unack(unicast, app_index, request).await {
            self.request_failed("set_ctl_unack", err);
        }
    }

    // ---- Queries ----

    /// Query every supported capability
    pub async fn refresh_state(&mut self) {
        if self.supports(Capability::OnOff) {
            self.get_onoff().await;
        }
        if self.supports(Capability::Brightness) {
            self.get_lightness().await;
        }
        if self.supports(Capability::Temperature) {
            self.get_ctl().await;
        }
    }

    pub async fn get_onoff(&mut self) -> Option<OnOffStatus> {
        let result = self.client.get_onoff(&[self.unicast()], self.app_index()).await;
        let status = self.settle("get_onoff", result)?;
        self.apply_status(StatusMessage::OnOff(status));
        Some(status)
    }

    pub async fn get_lightness(&mut self) -> Option<LightnessStatus> {
        let result = self.client.get_lightness(&[self.unicast()], self.app_index()).await;
        let status = self.settle("get_lightness", result)?;
        self.apply_status(StatusMessage::Lightness(status));
        Some(status)
    }

    pub async fn get_lightness_range(&mut self) -> Option<RangeStatus> {
        let result = self
            .client
            .get_lightness_range(&[self.unicast()], self.app_index())
            .await;
        let status = self.settle("get_lightness_range", result)?;
        self.apply_status(StatusMessage::LightnessRange(status));
        Some(status)
    }

    pub async fn get_ctl(&mut self) -> Option<CtlStatus> {
        let result = self.client.get_ctl(&[self.unicast()], self.app_index()).await;
        let status = self.settle("get_ctl", result)?;
        self.apply_status(StatusMessage::Ctl(status));
        Some(status)
    }

    pub async fn get_ctl_temperature_range(&mut self) -> Option<RangeStatus> {
        let result = self
            .client
            .get_ctl_temperature_range(&[self.unicast()], self.app_index())
            .await;
        let status = self.settle("get_ctl_temperature_range", result)?;
        self.apply_status(StatusMessage::CtlTemperatureRange(status));
        Some(status)
    }

    // ---- Availability ----

    /// Lightweight on/off query; any error or invalid entry counts as a failure
    pub async fn probe_availability(&mut self) -> Availability {
        let unicast = self.unicast();
        let result = self
            .client
            .get_onoff(&[unicast], self.app_index())
            .await
            .and_then(|replies| reply_for(replies, unicast));

        match result {
            Ok(_) => self.availability_success(),
            Err(err) => {
                self.record(NodeEvent::ProbeFailed {
                    unicast,
                    failures: self.availability.failures().saturating_add(1),
                    error: err.to_string(),
                });
                self.availability_failure();
            }
        }
        self.availability.state()
    }

    fn availability_success(&mut self) {
        if let Some(state) = self.availability.record_success() {
            self.availability_changed(state);
        }
    }

    fn availability_failure(&mut self) {
        if let Some(state) = self.availability.record_failure() {
            self.availability_changed(state);
        }
    }

    fn availability_changed(&mut self, availability: Availability) {
        self.cache.notify(PropertyValue::Availability(availability));
        self.record(NodeEvent::AvailabilityChanged {
            unicast: self.unicast(),
            availability,
        });
    }

    // ---- Inbound ----

    /// Apply an unsolicited status message. Messages from other nodes are
    /// ignored; returns whether the message was applied.
    pub fn handle_inbound(&mut self, inbound: &InboundMessage) -> bool {
        if inbound.source != self.unicast() {
            return false;
        }
        self.availability_success();
        self.apply_status(inbound.message);
        true
    }

    fn apply_status(&mut self, message: StatusMessage) {
        match message {
            StatusMessage::OnOff(status) => {
                self.cache.notify(PropertyValue::OnOff(status.present_onoff));
            }
            StatusMessage::Lightness(status) => {
                self.cache.notify(PropertyValue::Brightness(status.present_lightness));
            }
            StatusMessage::Ctl(status) => {
                let kelvin = self
                    .temperature_encoding
                    .decode(&self.limits, status.present_ctl_temperature);
                self.cache.notify(PropertyValue::Temperature(kelvin_field(kelvin)));
                self.cache.notify(PropertyValue::Brightness(status.present_ctl_lightness));
            }
            StatusMessage::LightnessRange(range) => {
                self.lightness_range = Some((range.range_min, range.range_max));
                self.record_range(Property::Brightness, range);
            }
            StatusMessage::CtlTemperatureRange(range) => {
                self.temperature_range = Some((range.range_min, range.range_max));
                self.record_range(Property::Temperature, range);
            }
        }
    }

    fn record_range(&self, property: Property, range: RangeStatus) {
        self.record(NodeEvent::RangeReported {
            unicast: self.unicast(),
            property,
            min: range.range_min,
            max: range.range_max,
        });
    }
}

/// Kelvin value as carried in the 16-bit temperature property
fn kelvin_field(kelvin: u32) -> u16 {
    kelvin.min(u16::MAX as u32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::MemoryRecorder;
    use meshlight_access::{MeshCall, SimulatedDevice, SimulatedMesh};

    const LIGHT: UnicastAddress = UnicastAddress(0x0010);

    async fn setup(device: SimulatedDevice, config: NodeConfig) -> (Arc<SimulatedMesh>, Arc<MemoryRecorder>, LightNode) {
        let mesh = Arc::new(SimulatedMesh::new(3));
        mesh.add_device(device).await;
        let recorder = Arc::new(MemoryRecorder::new());
        let node = LightNode::with_recorder(config, mesh.clone(), recorder.clone());
        (mesh, recorder, node)
    }

    async fn bound_ctl_light() -> (Arc<SimulatedMesh>, Arc<MemoryRecorder>, LightNode) {
        let (mesh, recorder, mut node) = setup(SimulatedDevice::ctl_light(LIGHT), NodeConfig::new(LIGHT)).await;
        node.bind().await;
        (mesh, recorder, node)
    }

    fn drain(rx: &mut broadcast::Receiver<StateChange>) -> Vec<PropertyValue> {
        let mut values = Vec::new();
        while let Ok(change) = rx.try_recv() {
            values.push(change.value);
        }
        values
    }

    #[tokio::test]
    async fn test_fetch_composition() {
        let (mesh, _, mut node) = setup(SimulatedDevice::ctl_light(LIGHT), NodeConfig::new(LIGHT)).await;
        node.fetch_composition().await;

        assert!(node.composition().unwrap().supports(ModelId::LIGHT_CTL_SERVER));
        assert_eq!(
            mesh.calls().await,
            vec![MeshCall::CompositionData {
                address: LIGHT,
                timeout: Duration::from_secs(30),
            }]
        );
    }

    #[tokio::test]
    async fn test_fetch_composition_missing_is_not_fatal() {
        let device = SimulatedDevice::ctl_light(LIGHT).without_composition();
        let (_, recorder, mut node) = setup(device, NodeConfig::new(LIGHT)).await;
        node.fetch_composition().await;

        assert!(node.composition().is_none());
        assert_eq!(recorder.count(|e| matches!(e, NodeEvent::CompositionMissing { .. })), 1);
    }

    #[tokio::test]
    async fn test_fetch_composition_transport_error() {
        let (mesh, recorder, mut node) = setup(SimulatedDevice::ctl_light(LIGHT), NodeConfig::new(LIGHT)).await;
        mesh.fail_next(1).await;
        node.fetch_composition().await;

        assert!(node.composition().is_none());
        assert_eq!(recorder.count(|e| matches!(e, NodeEvent::CompositionMissing { .. })), 1);
    }

    #[tokio::test]
    async fn test_bind_unsupported_model_skips_client() {
        let device = SimulatedDevice::new(LIGHT, vec![ModelId::GENERIC_ONOFF_SERVER]);
        let (mesh, _, mut node) = setup(device, NodeConfig::new(LIGHT)).await;
        node.fetch_composition().await;

        assert!(!node.bind_model(ModelId::LIGHT_CTL_SERVER).await);
        assert_eq!(mesh.bind_count(ModelId::LIGHT_CTL_SERVER).await, 0);
        assert!(!node.is_model_bound(ModelId::LIGHT_CTL_SERVER));
    }

    #[tokio::test]
    async fn test_bind_supported_model_calls_once() {
        let (mesh, _, mut node) = setup(SimulatedDevice::ctl_light(LIGHT), NodeConfig::new(LIGHT)).await;
        node.fetch_composition().await;

        assert!(node.bind_model(ModelId::GENERIC_ONOFF_SERVER).await);
        assert_eq!(mesh.bind_count(ModelId::GENERIC_ONOFF_SERVER).await, 1);
        assert!(node.is_model_bound(ModelId::GENERIC_ONOFF_SERVER));

        // Rebinding is allowed and re-issues the request
        assert!(node.bind_model(ModelId::GENERIC_ONOFF_SERVER).await);
        assert_eq!(mesh.bind_count(ModelId::GENERIC_ONOFF_SERVER).await, 2);

        let call = mesh
            .calls()
            .await
            .into_iter()
            .find(|c| matches!(c, MeshCall::BindAppKey { .. }))
            .unwrap();
        assert_eq!(
            call,
            MeshCall::BindAppKey {
                address: LIGHT,
                net_index: 0,
                element_address: LIGHT,
                app_key_index: 3,
                model: ModelId::GENERIC_ONOFF_SERVER,
            }
        );
    }

    #[tokio::test]
    async fn test_bind_permissive_without_composition() {
        let device = SimulatedDevice::new(LIGHT, vec![ModelId::GENERIC_ONOFF_SERVER]).without_composition();
        let (mesh, recorder, mut node) = setup(device, NodeConfig::new(LIGHT)).await;
        node.fetch_composition().await;

        assert!(node.bind_model(ModelId::GENERIC_ONOFF_SERVER).await);
        assert_eq!(recorder.count(|e| matches!(e, NodeEvent::ModelForceBound { .. })), 1);

        // The client is contacted even for models the device lacks; its rejection is not fatal
        assert!(!node.bind_model(ModelId::LIGHT_CTL_SERVER).await);
        assert_eq!(mesh.bind_count(ModelId::LIGHT_CTL_SERVER).await, 1);
        assert_eq!(recorder.count(|e| matches!(e, NodeEvent::BindFailed { .. })), 1);
    }

    #[tokio::test]
    async fn test_bind_strict_without_composition() {
        let device = SimulatedDevice::ctl_light(LIGHT).without_composition();
        let mut config = NodeConfig::new(LIGHT);
        config.permissive_binding = false;
        let (mesh, _, mut node) = setup(device, config).await;
        node.bind().await;

        assert!(node.capabilities().is_empty());
        assert_eq!(mesh.bind_count(ModelId::GENERIC_ONOFF_SERVER).await, 0);
    }

    #[tokio::test]
    async fn test_bind_sequence_grants_capabilities() {
        let (mesh, _, node) = bound_ctl_light().await;

        assert!(node.supports(Capability::OnOff));
        assert!(node.supports(Capability::Brightness));
        assert!(node.supports(Capability::Temperature));
        assert_eq!(
            node.status_opcodes(),
            vec![Opcode::GenericOnOffStatus, Opcode::LightLightnessStatus, Opcode::LightCtlStatus]
        );

        let binds: Vec<ModelId> = mesh
            .calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                MeshCall::BindAppKey { model, .. } => Some(model),
                _ => None,
            })
            .collect();
        assert_eq!(
            binds,
            vec![
                ModelId::GENERIC_ONOFF_SERVER,
                ModelId::LIGHT_LIGHTNESS_SERVER,
                ModelId::LIGHT_CTL_SERVER
            ]
        );

        let snapshot = node.snapshot();
        assert_eq!(snapshot.lightness_range, Some((1, 65535)));
        assert_eq!(snapshot.temperature_range, Some((800, 20000)));
        assert_eq!(node.retained(Property::Temperature), Some(PropertyValue::Temperature(4000)));
    }

    #[tokio::test]
    async fn test_ctl_only_light_grants_brightness() {
        let device = SimulatedDevice::new(LIGHT, vec![ModelId::LIGHT_CTL_SERVER]);
        let (_, _, mut node) = setup(device, NodeConfig::new(LIGHT)).await;
        node.bind().await;

        assert!(!node.supports(Capability::OnOff));
        assert!(node.supports(Capability::Brightness));
        assert!(node.supports(Capability::Temperature));
    }

    #[tokio::test]
    async fn test_onoff_only_light_ignores_brightness_and_temperature() {
        let device = SimulatedDevice::new(LIGHT, vec![ModelId::GENERIC_ONOFF_SERVER]);
        let (mesh, recorder, mut node) = setup(device, NodeConfig::new(LIGHT)).await;
        node.bind().await;
        let before = mesh.calls().await.len();

        node.set_brightness(1000, false).await;
        node.set_temperature(3000, false).await;
        node.set_temperature_from_mired(250, true, TemperatureEncoding::Kelvin).await;

        assert_eq!(mesh.calls().await.len(), before);
        assert_eq!(node.retained(Property::Brightness), None);
        assert_eq!(recorder.count(|e| matches!(e, NodeEvent::CapabilityMismatch { .. })), 3);
    }

    #[tokio::test]
    async fn test_turn_on_notifies_before_request() {
        let (mesh, _, mut node) = bound_ctl_light().await;
        let mut rx = node.subscribe();
        mesh.fail_next(1).await;

        node.turn_on(false).await;

        // Request failed but the optimistic value stays
        assert_eq!(drain(&mut rx), vec![PropertyValue::OnOff(true)]);
        assert_eq!(node.retained(Property::OnOff), Some(PropertyValue::OnOff(true)));
    }

    #[tokio::test]
    async fn test_turn_off_ack_applies_reply() {
        let (mesh, _, mut node) = bound_ctl_light().await;
        node.turn_on(true).await;
        let mut rx = node.subscribe();

        node.turn_off(true).await;

        assert_eq!(drain(&mut rx), vec![PropertyValue::OnOff(false), PropertyValue::OnOff(false)]);
        assert!(!mesh.device(LIGHT).await.unwrap().onoff);
        assert!(mesh
            .calls()
            .await
            .contains(&MeshCall::SetOnOff { address: LIGHT, onoff: false, ack: true }));
    }

    #[tokio::test]
    async fn test_set_brightness_clamps() {
        let (mesh, _, mut node) = bound_ctl_light().await;
        node.set_brightness(100_000, false).await;

        assert_eq!(node.retained(Property::Brightness), Some(PropertyValue::Brightness(65535)));
        assert!(mesh.calls().await.contains(&MeshCall::SetLightness {
            address: LIGHT,
            lightness: 65535,
            ack: false,
        }));
    }

    #[tokio::test]
    async fn test_set_temperature_preserves_brightness() {
        let (mesh, _, mut node) = bound_ctl_light().await;
        node.set_brightness(1234, false).await;

        node.set_temperature(3000, false).await;

        let request = mesh.last_ctl_request().await.unwrap();
        assert_eq!(request.ctl_lightness, 1234);
        assert_eq!(request.ctl_temperature, 3000);
        assert_eq!(node.retained(Property::Brightness), Some(PropertyValue::Brightness(1234)));
    }

    #[tokio::test]
    async fn test_set_ctl_defaults_without_retained_values() {
        let device = SimulatedDevice::new(LIGHT, vec![ModelId::LIGHT_CTL_SERVER]).unreachable();
        let (mesh, _, mut node) = setup(device, NodeConfig::new(LIGHT)).await;
        node.bind_model(ModelId::LIGHT_CTL_SERVER).await;
        // Unreachable device: bind fails
        assert!(!node.is_model_bound(ModelId::LIGHT_CTL_SERVER));

        mesh.set_reachable(LIGHT, true).await;
        assert!(node.bind_model(ModelId::LIGHT_CTL_SERVER).await);

        node.set_ctl(None, None, TemperatureEncoding::Kelvin, false).await;
        let request = mesh.last_ctl_request().await.unwrap();
        assert_eq!(request.ctl_lightness, 65535);
        assert_eq!(request.ctl_temperature, 20000);
    }

    #[tokio::test]
    async fn test_set_ctl_zero_brightness_turns_off() {
        let (mesh, _, mut node) = bound_ctl_light().await;
        node.set_brightness(1234, false).await;

        node.set_ctl(Some(3000), Some(0), TemperatureEncoding::Kelvin, false).await;

        let request = mesh.last_ctl_request().await.unwrap();
        assert_eq!(request.ctl_lightness, 0);
        assert_eq!(node.retained(Property::Brightness), Some(PropertyValue::Brightness(0)));
        assert!(!mesh.device(LIGHT).await.unwrap().onoff);
    }

    #[tokio::test]
    async fn test_set_temperature_clamps_to_limits() {
        let mut config = NodeConfig::new(LIGHT);
        config.mireds_min = 500;
        config.mireds_max = 100;
        let (mesh, _, mut node) = setup(SimulatedDevice::ctl_light(LIGHT), config).await;
        node.bind().await;

        node.set_temperature(15000, false).await;
        assert_eq!(mesh.last_ctl_request().await.unwrap().ctl_temperature, 10000);
        assert_eq!(node.retained(Property::Temperature), Some(PropertyValue::Temperature(10000)));
    }

    #[tokio::test]
    async fn test_set_temperature_from_mired() {
        let (mesh, _, mut node) = bound_ctl_light().await;
        node.set_temperature_from_mired(370, false, TemperatureEncoding::Kelvin).await;

        assert_eq!(mesh.last_ctl_request().await.unwrap().ctl_temperature, 2702);
        assert_eq!(node.retained(Property::Temperature), Some(PropertyValue::Temperature(2702)));
    }

    #[tokio::test]
    async fn test_set_temperature_from_mired_vendor_level() {
        let mut config = NodeConfig::new(LIGHT);
        config.mireds_min = 100;
        config.mireds_max = 500;
        let (mesh, _, mut node) = setup(SimulatedDevice::ctl_light(LIGHT), config).await;
        node.bind().await;

        // 1e6 / 500 = 2000 K, the warm end of the node's range
        node.set_temperature_from_mired(500, true, TemperatureEncoding::VendorLevel).await;
        assert_eq!(mesh.last_ctl_request().await.unwrap().ctl_temperature, 800);
        // Reply is decoded back to Kelvin
        assert_eq!(node.retained(Property::Temperature), Some(PropertyValue::Temperature(2000)));
    }

    #[tokio::test]
    async fn test_query_failure_is_not_counted() {
        let (mesh, recorder, mut node) = bound_ctl_light().await;
        mesh.set_reachable(LIGHT, false).await;

        assert!(node.get_onoff().await.is_none());
        assert!(node.get_ctl().await.is_none());

        assert_eq!(node.availability(), Availability::Unknown);
        assert_eq!(recorder.count(|e| matches!(e, NodeEvent::RequestFailed { .. })), 2);
    }

    #[tokio::test]
    async fn test_refresh_state_queries_supported() {
        let device = SimulatedDevice::new(LIGHT, vec![ModelId::GENERIC_ONOFF_SERVER]);
        let (mesh, _, mut node) = setup(device, NodeConfig::new(LIGHT)).await;
        node.bind().await;
        let before = mesh.calls().await.len();

        node.refresh_state().await;

        let calls = mesh.calls().await;
        assert_eq!(&calls[before..], &[MeshCall::GetOnOff { address: LIGHT }]);
    }

    #[tokio::test]
    async fn test_probe_failures_reach_threshold() {
        let (mesh, _, mut node) = bound_ctl_light().await;
        let mut rx = node.subscribe();
        mesh.set_reachable(LIGHT, false).await;

        assert_eq!(node.probe_availability().await, Availability::Unknown);
        assert_eq!(node.probe_availability().await, Availability::Unknown);
        assert_eq!(node.probe_availability().await, Availability::Offline);
        assert_eq!(node.probe_availability().await, Availability::Offline);

        assert_eq!(
            drain(&mut rx),
            vec![PropertyValue::Availability(Availability::Offline)]
        );
    }

    #[tokio::test]
    async fn test_probe_transport_errors_count() {
        let mut config = NodeConfig::new(LIGHT);
        config.availability_failures = 2;
        let (mesh, _, mut node) = setup(SimulatedDevice::ctl_light(LIGHT), config).await;

        mesh.fail_next(1).await;
        assert_eq!(node.probe_availability().await, Availability::Unknown);
        assert_eq!(node.probe_availability().await, Availability::Online);

        mesh.fail_next(2).await;
        node.probe_availability().await;
        assert_eq!(node.probe_availability().await, Availability::Offline);
    }

    #[tokio::test]
    async fn test_probe_success_interleaved_prevents_offline() {
        let (mesh, _, mut node) = bound_ctl_light().await;

        mesh.set_reachable(LIGHT, false).await;
        node.probe_availability().await;
        node.probe_availability().await;
        mesh.set_reachable(LIGHT, true).await;
        assert_eq!(node.probe_availability().await, Availability::Online);
        mesh.set_reachable(LIGHT, false).await;
        node.probe_availability().await;
        node.probe_availability().await;

        assert_eq!(node.availability(), Availability::Online);
    }

    #[tokio::test]
    async fn test_inbound_status_from_self() {
        let (_, _, mut node) = bound_ctl_light().await;
        let mut rx = node.subscribe();

        let applied = node.handle_inbound(&InboundMessage {
            source: LIGHT,
            net_index: 0,
            destination: 1,
            message: StatusMessage::Lightness(LightnessStatus {
                present_lightness: 4242,
                target_lightness: None,
            }),
        });

        assert!(applied);
        assert_eq!(
            drain(&mut rx),
            vec![
                PropertyValue::Availability(Availability::Online),
                PropertyValue::Brightness(4242)
            ]
        );
    }

    #[tokio::test]
    async fn test_inbound_status_from_other_node_ignored() {
        let (_, _, mut node) = bound_ctl_light().await;
        let applied = node.handle_inbound(&InboundMessage {
            source: UnicastAddress(0x0099),
            net_index: 0,
            destination: 1,
            message: StatusMessage::OnOff(OnOffStatus {
                present_onoff: true,
                target_onoff: None,
            }),
        });

        assert!(!applied);
        assert_eq!(node.availability(), Availability::Unknown);
    }
}
