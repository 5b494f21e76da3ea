//! Decoded status messages exchanged with light nodes

use meshlight_core::UnicastAddress;
use serde::{Deserialize, Serialize};

/// Opcodes of the status messages a light node can receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    GenericOnOffStatus,
    LightLightnessStatus,
    LightLightnessRangeStatus,
    LightCtlStatus,
    LightCtlTemperatureRangeStatus,
}

impl Opcode {
    pub const ALL: [Opcode; 5] = [
        Opcode::GenericOnOffStatus,
        Opcode::LightLightnessStatus,
        Opcode::LightLightnessRangeStatus,
        Opcode::LightCtlStatus,
        Opcode::LightCtlTemperatureRangeStatus,
    ];

    /// Access-layer opcode value
    pub fn value(&self) -> u16 {
        match self {
            Self::GenericOnOffStatus => 0x8204,
            Self::LightLightnessStatus => 0x824e,
            Self::LightLightnessRangeStatus => 0x8258,
            Self::LightCtlStatus => 0x8260,
            Self::LightCtlTemperatureRangeStatus => 0x8263,
        }
    }
}

/// Generic OnOff Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnOffStatus {
    pub present_onoff: bool,
    #[serde(default)]
    pub target_onoff: Option<bool>,
}

/// Light Lightness Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightnessStatus {
    pub present_lightness: u16,
    #[serde(default)]
    pub target_lightness: Option<u16>,
}

/// Light CTL Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtlStatus {
    pub present_ctl_lightness: u16,
    /// Temperature field as sent by the node (Kelvin or vendor level)
    pub present_ctl_temperature: u16,
    #[serde(default)]
    pub target_ctl_lightness: Option<u16>,
    #[serde(default)]
    pub target_ctl_temperature: Option<u16>,
}

/// Lightness Range Status / CTL Temperature Range Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeStatus {
    pub status_code: u8,
    pub range_min: u16,
    pub range_max: u16,
}

/// Light CTL Set parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtlRequest {
    pub ctl_lightness: u16,
    pub ctl_temperature: u16,
    #[serde(default)]
    pub ctl_delta_uv: i16,
}

/// Any status message a light node reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusMessage {
    OnOff(OnOffStatus),
    Lightness(LightnessStatus),
    LightnessRange(RangeStatus),
    Ctl(CtlStatus),
    CtlTemperatureRange(RangeStatus),
}

impl StatusMessage {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::OnOff(_) => Opcode::GenericOnOffStatus,
            Self::Lightness(_) => Opcode::LightLightnessStatus,
            Self::LightnessRange(_) => Opcode::LightLightnessRangeStatus,
            Self::Ctl(_) => Opcode::LightCtlStatus,
            Self::CtlTemperatureRange(_) => Opcode::LightCtlTemperatureRangeStatus,
        }
    }
}

/// Unsolicited message delivered by the access layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub source: UnicastAddress,
    pub net_index: u16,
    pub destination: u16,
    pub message: StatusMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_opcode_values_are_distinct() {
        let values: HashSet<u16> = Opcode::ALL.iter().map(Opcode::value).collect();
        assert_eq!(values.len(), Opcode::ALL.len());
    }

    #[test]
    fn test_status_message_opcode() {
        let message = StatusMessage::Lightness(LightnessStatus {
            present_lightness: 10,
            target_lightness: None,
        });
        assert_eq!(message.opcode(), Opcode::LightLightnessStatus);
        assert_eq!(message.opcode().value(), 0x824e);
    }
}
