//! Composition data for a mesh node
//!
//! Page zero of the composition data lists the node's elements and the models
//! each element implements. It is fetched once during binding and treated as
//! read-only afterwards.

use serde::{Deserialize, Serialize};

use crate::model::ModelId;

/// A single element of a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// GATT namespace location descriptor
    #[serde(default)]
    pub location: u16,
    /// SIG and vendor models implemented by this element
    #[serde(default)]
    pub models: Vec<ModelId>,
}

impl Element {
    pub fn new(models: Vec<ModelId>) -> Self {
        Self { location: 0, models }
    }

    /// Check whether this element implements the given model
    pub fn supports(&self, model: ModelId) -> bool {
        self.models.contains(&model)
    }
}

/// Composition data page zero
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composition {
    /// Company identifier
    #[serde(default)]
    pub company_id: u16,
    /// Vendor-assigned product identifier
    #[serde(default)]
    pub product_id: u16,
    /// Vendor-assigned product version
    #[serde(default)]
    pub version_id: u16,
    /// Minimum number of replay protection list entries
    #[serde(default)]
    pub replay_protection: u16,
    /// Feature bits: relay, proxy, friend, low power from bit 0 up
    #[serde(default)]
    pub features: u16,
    /// Elements in address order; element zero is the primary element
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl Composition {
    /// Composition with a single primary element implementing `models`
    pub fn single_element(models: Vec<ModelId>) -> Self {
        Self {
            elements: vec![Element::new(models)],
            ..Default::default()
        }
    }

    pub fn element(&self, index: usize) -> Option<&Element> {
        self.elements.get(index)
    }

    /// Check whether the primary element implements the given model
    pub fn supports(&self, model: ModelId) -> bool {
        self.element(0).map(|e| e.supports(model)).unwrap_or(false)
    }
}

impl std::fmt::Display for Composition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "cid={:04x} pid={:04x} vid={:04x} crpl={} features={:04x}",
            self.company_id, self.product_id, self.version_id, self.replay_protection, self.features
        )?;
        for (index, element) in self.elements.iter().enumerate() {
            let models: Vec<String> = element.models.iter().map(|m| m.to_string()).collect();
            writeln!(f, "  element {} (loc {:04x}): {}", index, element.location, models.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_primary_element_only() {
        let composition = Composition {
            elements: vec![
                Element::new(vec![ModelId::CONFIG_SERVER, ModelId::GENERIC_ONOFF_SERVER]),
                Element::new(vec![ModelId::LIGHT_CTL_SERVER]),
            ],
            ..Default::default()
        };

        assert!(composition.supports(ModelId::GENERIC_ONOFF_SERVER));
        assert!(!composition.supports(ModelId::LIGHT_CTL_SERVER));
        assert!(composition.element(1).unwrap().supports(ModelId::LIGHT_CTL_SERVER));
    }

    #[test]
    fn test_empty_composition_supports_nothing() {
        let composition = Composition::default();
        assert!(!composition.supports(ModelId::GENERIC_ONOFF_SERVER));
        assert!(composition.element(0).is_none());
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{"company_id": 2, "elements": [{"models": [4096, 4864]}]}"#;
        let composition: Composition = serde_json::from_str(json).unwrap();
        assert_eq!(composition.company_id, 2);
        assert!(composition.supports(ModelId::LIGHT_LIGHTNESS_SERVER));
    }
}
