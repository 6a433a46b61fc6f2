use itertools::Itertools;
use log::{debug, error, info};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::logic::Registry;
use crate::model::{Component, Readiness, Stage};

/// Hard cap on convergence passes per stage
pub const MAX_PASSES: u32 = 100;

/// Components still pending after the last allowed pass.
/// A true dependency cycle and a component that never becomes ready look the same here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "bootstrap deadlock in {stage} stage after {passes} passes; pending: {}; reasons: {}",
    .pending.join(", "),
    .reasons.join("; ")
)]
pub struct DeadlockError {
    pub stage: Stage,
    pub passes: u32,
    /// Names of every component still pending, in registration order
    pub pending: Vec<String>,
    /// Every reason reported on the final pass
    pub reasons: Vec<String>,
}

/// Outcome of one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootReport {
    pub stage: Stage,
    /// Passes it took to converge; zero when nothing had to boot
    pub passes: u32,
    /// Component names in the order they became ready
    pub booted: Vec<String>,
}

/// Drives components through the boot stages to a fixpoint
#[derive(Debug)]
pub struct StageResolver {
    max_passes: u32,
    /// Ids that finished post-link; never booted in post-link again until forgotten
    satisfied: Mutex<HashSet<String>>,
}

impl Default for StageResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl StageResolver {
    pub fn new() -> Self {
        Self::with_max_passes(MAX_PASSES)
    }

    pub fn with_max_passes(max_passes: u32) -> Self {
        Self {
            max_passes,
            satisfied: Mutex::new(HashSet::new()),
        }
    }

    /// Boot every pending component once per pass, in registration order,
    /// until all are ready or the pass cap is reached
    pub async fn bootstrap(
        &self,
        registry: &Registry,
        stage: Stage,
    ) -> Result<BootReport, DeadlockError> {
        let mut pending: Vec<Arc<dyn Component>> = {
            let satisfied = self.satisfied.lock();
            registry
                .components()
                .into_iter()
                .filter(|c| c.boots(stage))
                .filter(|c| stage != Stage::PostLink || !satisfied.contains(c.id()))
                .collect()
        };

        let mut booted = Vec::new();
        let mut reasons = Vec::new();
        let mut passes = 0;

        while !pending.is_empty() && passes < self.max_passes {
            passes += 1;
            reasons.clear();

            let mut still_pending = Vec::with_capacity(pending.len());
            for component in pending {
                match component.boot(stage, passes, registry).await {
                    Readiness::Ready => {
                        if stage == Stage::PostLink {
                            self.satisfied.lock().insert(component.id().to_string());
                        }
                        debug!("{} ready in {} (pass {})", component.name(), stage, passes);
                        booted.push(component.name().to_string());
                    }
                    Readiness::Pending(mut why) => {
                        reasons.append(&mut why);
                        still_pending.push(component);
                    }
                }
            }
            pending = still_pending;
        }

        if !pending.is_empty() {
            let err = DeadlockError {
                stage,
                passes,
                pending: pending.iter().map(|c| c.name().to_string()).collect(),
                reasons,
            };
            error!("{}", err);
            return Err(err);
        }

        info!(
            "{} stage converged in {} passes: {}",
            stage,
            passes,
            booted.iter().join(", ")
        );

        Ok(BootReport {
            stage,
            passes,
            booted,
        })
    }

    /// Run compile, rebuild the link index from compiled collections, then link and post-link
    pub async fn boot_all(&self, registry: &Registry) -> Result<Vec<BootReport>, DeadlockError> {
        let mut reports = Vec::with_capacity(Stage::ALL.len());

        reports.push(self.bootstrap(registry, Stage::Compile).await?);
        let linkable = registry.refresh_index();
        debug!("{} collections available for linking", linkable);

        reports.push(self.bootstrap(registry, Stage::Link).await?);
        reports.push(self.bootstrap(registry, Stage::PostLink).await?);

        Ok(reports)
    }

    pub fn is_satisfied(&self, id: &str) -> bool {
        self.satisfied.lock().contains(id)
    }

    /// Let `id` run post-link again on the next bootstrap.
    /// Must not be called while a bootstrap is in flight.
    pub fn forget(&self, id: &str) -> bool {
        self.satisfied.lock().remove(id)
    }

    pub fn reset(&self) {
        self.satisfied.lock().clear();
    }
}
