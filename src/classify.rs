//! Helmet and vest presence from detection labels.
//!
//! The classifier works on label text only. A label counts as a helmet when its
//! lowercase form contains one of [`HELMET_TERMS`], and as a vest when it
//! contains one of [`VEST_TERMS`]. One detection may count as both.
//!
//! Confidence is not consulted unless a floor is configured with
//! [`Classifier::with_min_confidence`]; by default every detection counts.

use serde::{Deserialize, Serialize};

use crate::detect::Detection;

pub const HELMET_TERMS: [&str; 3] = ["helmet", "hard hat", "hardhat"];
pub const VEST_TERMS: [&str; 3] = ["vest", "jacket", "safety"];

/// Derived helmet/vest presence for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EquipmentState {
    pub helmet_present: bool,
    pub vest_present: bool,
}

impl EquipmentState {
    pub fn new(helmet_present: bool, vest_present: bool) -> Self {
        Self {
            helmet_present,
            vest_present,
        }
    }

    /// Both items present.
    pub fn is_compliant(&self) -> bool {
        self.helmet_present && self.vest_present
    }

    pub fn summary(&self) -> String {
        format!(
            "helmet {} | vest {}",
            mark(self.helmet_present),
            mark(self.vest_present)
        )
    }
}

fn mark(present: bool) -> &'static str {
    if present {
        "yes"
    } else {
        "no"
    }
}

/// Which equipment class a single label belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EquipmentCategory {
    Helmet,
    Vest,
    /// Label matches both term sets (e.g. "safety helmet").
    Both,
    Other,
}

impl EquipmentCategory {
    pub fn counts_as_helmet(&self) -> bool {
        matches!(self, EquipmentCategory::Helmet | EquipmentCategory::Both)
    }

    pub fn counts_as_vest(&self) -> bool {
        matches!(self, EquipmentCategory::Vest | EquipmentCategory::Both)
    }
}

pub fn categorize(label: &str) -> EquipmentCategory {
    let folded = label.to_lowercase();
    let helmet = HELMET_TERMS.iter().any(|term| folded.contains(term));
    let vest = VEST_TERMS.iter().any(|term| folded.contains(term));
    match (helmet, vest) {
        (true, true) => EquipmentCategory::Both,
        (true, false) => EquipmentCategory::Helmet,
        (false, true) => EquipmentCategory::Vest,
        (false, false) => EquipmentCategory::Other,
    }
}

/// Classify with no confidence floor.
pub fn classify(detections: &[Detection]) -> EquipmentState {
    Classifier::default().classify(detections)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Classifier {
    min_confidence: Option<f32>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore detections scoring below `min_confidence`.
    pub fn with_min_confidence(mut self, min_confidence: Option<f32>) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn min_confidence(&self) -> Option<f32> {
        self.min_confidence
    }

    pub fn classify(&self, detections: &[Detection]) -> EquipmentState {
        detections
            .iter()
            .filter(|d| self.min_confidence.map_or(true, |floor| d.confidence() >= floor))
            .map(|d| categorize(d.label()))
            .fold(EquipmentState::default(), |state, category| EquipmentState {
                helmet_present: state.helmet_present || category.counts_as_helmet(),
                vest_present: state.vest_present || category.counts_as_vest(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(label: &str, confidence: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::new(0, 0, 10, 10))
    }

    #[test]
    fn hardhat_in_any_case_is_a_helmet() {
        for label in ["hardhat", "HARDHAT", "HardHat-blue", "worker_Hardhat"] {
            let state = classify(&[det(label, 0.5)]);
            assert!(state.helmet_present, "{label} should count as helmet");
        }
    }

    #[test]
    fn unrelated_labels_yield_nothing() {
        let state = classify(&[det("person", 0.99), det("boat", 0.9), det("head", 0.7)]);
        assert_eq!(state, EquipmentState::new(false, false));
    }

    #[test]
    fn safety_vest_is_vest_only() {
        let state = classify(&[det("Safety Vest", 0.9)]);
        assert_eq!(state, EquipmentState::new(false, true));
    }

    #[test]
    fn hard_hat_and_vest_are_compliant() {
        let state = classify(&[det("Hard Hat", 0.99), det("Vest", 0.8)]);
        assert_eq!(state, EquipmentState::new(true, true));
        assert!(state.is_compliant());
    }

    #[test]
    fn one_label_can_count_twice() {
        assert_eq!(categorize("safety helmet"), EquipmentCategory::Both);
        let state = classify(&[det("safety helmet", 0.4)]);
        assert_eq!(state, EquipmentState::new(true, true));
    }

    #[test]
    fn confidence_is_ignored_by_default() {
        let state = classify(&[det("helmet", 0.01)]);
        assert!(state.helmet_present);
    }

    #[test]
    fn optional_floor_filters_weak_detections() {
        let classifier = Classifier::new().with_min_confidence(Some(0.5));
        let state = classifier.classify(&[det("helmet", 0.2), det("vest", 0.6)]);
        assert_eq!(state, EquipmentState::new(false, true));
    }

    #[test]
    fn empty_input_is_default() {
        assert_eq!(classify(&[]), EquipmentState::default());
    }
}
