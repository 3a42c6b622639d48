//! Structured progress and failure events emitted by the pipeline.
//!
//! Stages report through a [`DiagnosticSink`] passed by reference. [`LogSink`]
//! forwards events to the `log` facade (and from there to the diagnostic log
//! file); [`RecordingSink`] keeps them in memory for inspection.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    Detection,
    Intrinsics,
    Reprojection,
    Extrinsics,
    HandEye,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Input => "input",
            Stage::Detection => "detection",
            Stage::Intrinsics => "intrinsics",
            Stage::Reprojection => "reprojection",
            Stage::Extrinsics => "extrinsics",
            Stage::HandEye => "hand-eye",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineEvent {
    pub stage: Stage,
    pub severity: Severity,
    /// Image the event refers to, if any.
    pub image_index: Option<usize>,
    pub message: String,
}

impl PipelineEvent {
    pub fn info(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, Severity::Info, None, message)
    }

    pub fn warning(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, Severity::Warning, None, message)
    }

    pub fn error(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, Severity::Error, None, message)
    }

    pub fn new(
        stage: Stage,
        severity: Severity,
        image_index: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            severity,
            image_index,
            message: message.into(),
        }
    }

    pub fn for_image(mut self, index: usize) -> Self {
        self.image_index = Some(index);
        self
    }
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.image_index {
            // 1-based in human-facing text.
            Some(idx) => write!(f, "[{}] image {}: {}", self.stage, idx + 1, self.message),
            None => write!(f, "[{}] {}", self.stage, self.message),
        }
    }
}

pub trait DiagnosticSink: Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Forwards events to the `log` facade at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&self, event: PipelineEvent) {
        match event.severity {
            Severity::Info => log::info!(target: "handeye", "{event}"),
            Severity::Warning => log::warn!(target: "handeye", "{event}"),
            Severity::Error => log::error!(target: "handeye", "{event}"),
        }
    }
}

/// Keeps every event in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn of_stage(&self, stage: Stage) -> Vec<PipelineEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.stage == stage)
            .collect()
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, event: PipelineEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_order_and_filters_by_stage() {
        let sink = RecordingSink::new();
        sink.emit(PipelineEvent::info(Stage::Detection, "a").for_image(0));
        sink.emit(PipelineEvent::error(Stage::HandEye, "b"));
        sink.emit(PipelineEvent::warning(Stage::Detection, "c"));

        let all = sink.events();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].severity, Severity::Error);
        let det = sink.of_stage(Stage::Detection);
        assert_eq!(det.len(), 2);
        assert_eq!(det[0].image_index, Some(0));
    }

    #[test]
    fn display_uses_one_based_image_numbers() {
        let e = PipelineEvent::error(Stage::Detection, "chessboard not found").for_image(4);
        assert_eq!(e.to_string(), "[detection] image 5: chessboard not found");
    }
}
