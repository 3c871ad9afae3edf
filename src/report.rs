use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::gpu::CapabilityReport;
use crate::types::VersionSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Skipped,
    Applied,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub id: String,
    pub status: StepStatus,
    pub detail: String,
}

/// Outcome of one provisioning run, emitted once at the end
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
    pub driver_version: Option<VersionSpec>,
    pub capability: Option<CapabilityReport>,
    pub follow_ups: Vec<String>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            steps: Vec::new(),
            driver_version: None,
            capability: None,
            follow_ups: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn record(&mut self, id: &str, status: StepStatus, detail: impl Into<String>) {
        self.steps.push(StepRecord {
            id: id.to_string(),
            status,
            detail: detail.into(),
        });
    }

    pub fn status_of(&self, id: &str) -> Option<StepStatus> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.id == id)
            .map(|s| s.status)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| s.status == StepStatus::Failed)
    }

    pub fn add_follow_ups(&mut self, actions: impl IntoIterator<Item = String>) {
        for action in actions {
            if !self.follow_ups.contains(&action) {
                self.follow_ups.push(action);
            }
        }
    }

    pub fn print_summary(&self) {
        println!();
        println!("{:<20} {:<9} {}", "STEP", "STATUS", "DETAIL");
        println!("{}", "─".repeat(72));
        for step in &self.steps {
            let status = match step.status {
                StepStatus::Skipped => "⏭️  skip",
                StepStatus::Applied => "✅ done",
                StepStatus::Failed => "⚠️  fail",
            };
            println!("{:<20} {:<9} {}", step.id, status, step.detail);
        }
        println!();

        if let Some(version) = &self.driver_version {
            println!("Driver version: {}", version);
        }
        if let Some(capability) = &self.capability {
            println!("GPU: {} ({})", capability.device_name, capability.tier);
        }

        if !self.follow_ups.is_empty() {
            println!();
            println!("Next steps:");
            for (i, action) in self.follow_ups.iter().enumerate() {
                println!("  {}. {}", i + 1, action);
            }
        }

        println!();
        println!("Finished in {:.0}s", self.elapsed.as_secs_f64());
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
