use serde::{Deserialize, Serialize};

/// Letter grade derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_composite(composite: f32) -> Self {
        if composite >= 0.9 {
            Self::A
        } else if composite >= 0.8 {
            Self::B
        } else if composite >= 0.7 {
            Self::C
        } else if composite >= 0.55 {
            Self::D
        } else {
            Self::F
        }
    }
}

/// Individual quality signals, each in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityComponents {
    pub confidence: f32,
    pub length_consistency: f32,
    pub structure_integrity: f32,
    pub entity_preservation: f32,
    pub boundary_coherence: f32,
    /// Absent when no embedder is available; the composite weights rebalance.
    pub semantic_coherence: Option<f32>,
}

/// Composite scoring of a (source, translation, chunks) triple.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityReport {
    pub composite: f32,
    pub grade: Grade,
    pub components: QualityComponents,
}

impl QualityReport {
    /// Report used when no assessment ran (cached results carry their stored
    /// report instead).
    pub fn neutral() -> Self {
        let components = QualityComponents {
            confidence: 0.5,
            length_consistency: 1.0,
            structure_integrity: 1.0,
            entity_preservation: 1.0,
            boundary_coherence: 1.0,
            semantic_coherence: None,
        };
        Self {
            composite: 0.75,
            grade: Grade::from_composite(0.75),
            components,
        }
    }
}
