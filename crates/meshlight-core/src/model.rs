//! Mesh addressing, model identifiers and logical capabilities

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unicast address of a mesh element (the primary element doubles as the node address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnicastAddress(pub u16);

impl UnicastAddress {
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl From<u16> for UnicastAddress {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for UnicastAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// Identifier of a mesh model.
///
/// SIG models use the low 16 bits; vendor models carry the company id in the
/// upper 16 bits. The set of known ids is open: any value can be represented,
/// the associated constants only name the ones this crate works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(pub u32);

impl ModelId {
    pub const CONFIG_SERVER: ModelId = ModelId(0x0000);
    pub const CONFIG_CLIENT: ModelId = ModelId(0x0001);
    pub const GENERIC_ONOFF_SERVER: ModelId = ModelId(0x1000);
    pub const GENERIC_ONOFF_CLIENT: ModelId = ModelId(0x1001);
    pub const LIGHT_LIGHTNESS_SERVER: ModelId = ModelId(0x1300);
    pub const LIGHT_LIGHTNESS_CLIENT: ModelId = ModelId(0x1302);
    pub const LIGHT_CTL_SERVER: ModelId = ModelId(0x1303);
    pub const LIGHT_CTL_CLIENT: ModelId = ModelId(0x1305);

    pub fn is_vendor(&self) -> bool {
        self.0 > 0xffff
    }

    /// Human-readable name for the models this crate knows about
    pub fn name(&self) -> Option<&'static str> {
        match *self {
            Self::CONFIG_SERVER => Some("ConfigServer"),
            Self::CONFIG_CLIENT => Some("ConfigClient"),
            Self::GENERIC_ONOFF_SERVER => Some("GenericOnOffServer"),
            Self::GENERIC_ONOFF_CLIENT => Some("GenericOnOffClient"),
            Self::LIGHT_LIGHTNESS_SERVER => Some("LightLightnessServer"),
            Self::LIGHT_LIGHTNESS_CLIENT => Some("LightLightnessClient"),
            Self::LIGHT_CTL_SERVER => Some("LightCTLServer"),
            Self::LIGHT_CTL_CLIENT => Some("LightCTLClient"),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None if self.is_vendor() => write!(f, "vendor:{:08x}", self.0),
            None => write!(f, "model:{:04x}", self.0),
        }
    }
}

/// Logical feature a light node exposes once the backing model is bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Turn on and off
    OnOff,
    /// Set lightness
    Brightness,
    /// Set color temperature
    Temperature,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnOff => "onoff",
            Self::Brightness => "brightness",
            Self::Temperature => "temperature",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities granted by bound models. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capability, returns true if it was not present yet
    pub fn grant(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl std::fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|c| c.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_display() {
        assert_eq!(ModelId::LIGHT_CTL_SERVER.to_string(), "LightCTLServer");
        assert_eq!(ModelId(0x1203).to_string(), "model:1203");
        assert_eq!(ModelId(0x07d0_0001).to_string(), "vendor:07d00001");
    }

    #[test]
    fn test_vendor_model() {
        let model = ModelId(0x0211_0004);
        assert!(model.is_vendor());
        assert!(!ModelId::GENERIC_ONOFF_SERVER.is_vendor());
    }

    #[test]
    fn test_unicast_display() {
        assert_eq!(UnicastAddress(0x00a1).to_string(), "00a1");
    }

    #[test]
    fn test_capability_set_grows() {
        let mut caps = CapabilitySet::new();
        assert!(caps.grant(Capability::OnOff));
        assert!(caps.grant(Capability::Brightness));
        assert!(!caps.grant(Capability::OnOff));
        assert_eq!(caps.len(), 2);
        assert!(caps.contains(Capability::Brightness));
        assert!(!caps.contains(Capability::Temperature));
        assert_eq!(caps.to_string(), "[onoff, brightness]");
    }
}
