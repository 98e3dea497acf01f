use common::{
    error::{AppError, ErrorKind},
    types::result::TranslationResult,
};
use serde::Serialize;

/// Events of the progressive translation protocol, in their guaranteed
/// order: `start` first, then `chunk`* (completion order, indices allow
/// reordering), `partial`, optionally `improved`, and a terminal `final` or
/// `error`. Each serializes to one JSON object.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Start {
        request_id: String,
        planned_chunks: usize,
    },
    Chunk {
        index: usize,
        text: String,
        cumulative_progress: f32,
    },
    Partial {
        text: String,
        preliminary_quality: f32,
    },
    Improved {
        text: String,
        quality: f32,
    },
    Final {
        result: TranslationResult,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl StreamEvent {
    pub fn from_error(err: &AppError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Whether this event ends the stream.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. } | Self::Error { .. })
    }
}
