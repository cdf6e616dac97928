//! Deployment plans - the ordered rollback-then-apply steps between versions

use serde::{Deserialize, Serialize};

/// What a plan step does to its change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanActionKind {
    Rollback,
    Run,
}

/// One step of a deployment plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanAction {
    pub action: PlanActionKind,
    pub change_id: String,
    /// 1-based position in the plan
    pub order: usize,
}

/// Changes to apply and roll back to move between two versions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationDelta {
    /// Forward order
    pub apply: Vec<String>,
    /// Execution order, i.e. reverse of the source version's order
    pub rollback: Vec<String>,
}

impl MigrationDelta {
    pub fn is_empty(&self) -> bool {
        self.apply.is_empty() && self.rollback.is_empty()
    }
}

/// Advisory plan; executing it is up to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub from: Option<String>,
    pub to: String,
    pub actions: Vec<PlanAction>,
    pub summary: String,
}

impl DeploymentPlan {
    /// Build a plan from a delta: all rollbacks first, then all applies
    pub fn from_delta(from: Option<String>, to: String, delta: &MigrationDelta) -> Self {
        let actions: Vec<PlanAction> = delta
            .rollback
            .iter()
            .map(|id| (PlanActionKind::Rollback, id))
            .chain(delta.apply.iter().map(|id| (PlanActionKind::Run, id)))
            .enumerate()
            .map(|(i, (action, id))| PlanAction {
                action,
                change_id: id.clone(),
                order: i + 1,
            })
            .collect();

        let summary = if actions.is_empty() {
            format!(
                "{} -> {}: nothing to do",
                from.as_deref().unwrap_or("(empty)"),
                to
            )
        } else {
            format!(
                "{} -> {}: {} to roll back, {} to run",
                from.as_deref().unwrap_or("(empty)"),
                to,
                delta.rollback.len(),
                delta.apply.len()
            )
        };

        Self {
            from,
            to,
            actions,
            summary,
        }
    }

    pub fn rollbacks(&self) -> impl Iterator<Item = &PlanAction> {
        self.actions
            .iter()
            .filter(|a| a.action == PlanActionKind::Rollback)
    }

    pub fn runs(&self) -> impl Iterator<Item = &PlanAction> {
        self.actions.iter().filter(|a| a.action == PlanActionKind::Run)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
