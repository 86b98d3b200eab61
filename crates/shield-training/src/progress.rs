use crate::job::TrainingJobId;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { job_id: TrainingJobId },
    Message { job_id: TrainingJobId, message: String },
    Epoch {
        job_id: TrainingJobId,
        epoch: u32,
        total: u32,
        train_loss: f64,
        validation_accuracy: Option<f64>,
    },
    /// Held-out test results, reported once after training.
    Evaluated { job_id: TrainingJobId, accuracy: f64, samples: usize },
    Finished { job_id: TrainingJobId },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Prints one line per event, prefixed with the short job id.
#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job_id } => println!("[{}] training started", short(&job_id)),
            ProgressEvent::Message { job_id, message } => println!("[{}] {message}", short(&job_id)),
            ProgressEvent::Epoch { job_id, epoch, total, train_loss, validation_accuracy } => match validation_accuracy {
                Some(acc) => {
                    println!("[{}] epoch {epoch}/{total} loss={train_loss:.4} val_acc={acc:.3}", short(&job_id));
                }
                None => println!("[{}] epoch {epoch}/{total} loss={train_loss:.4}", short(&job_id)),
            },
            ProgressEvent::Evaluated { job_id, accuracy, samples } => {
                println!("[{}] test accuracy {accuracy:.3} on {samples} images", short(&job_id));
            }
            ProgressEvent::Finished { job_id } => println!("[{}] training finished", short(&job_id)),
        }
    }
}

fn short(job_id: &TrainingJobId) -> &str {
    job_id.0.get(..8).unwrap_or(&job_id.0)
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_event(&self, _event: ProgressEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
