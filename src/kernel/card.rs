//! Action cards: the human-readable approval view of a stored plan.
//!
//! Derivation is a pure function over the plan. The card names every
//! observable target (paths, files, commands, urls), carries one warning per
//! side-effectful step, and embeds a prefilled token request so a UI can
//! issue the approval with a single click.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Plan, SideEffects, StepInputs};

/// Observable targets a plan will touch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionCardTargets {
    /// Individual files read.
    pub files: Vec<String>,
    /// Directory roots walked.
    pub paths: Vec<String>,
    /// Shell commands executed.
    pub commands: Vec<String>,
    /// URLs opened.
    pub urls: Vec<String>,
}

/// Payload of the prefilled token request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveTokenPayload {
    /// Plan the token should be issued for.
    pub plan_id: Uuid,
}

/// Prefilled request shape for issuing the approval token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveTokenRequest {
    /// Endpoint to call.
    pub endpoint: String,
    /// HTTP method.
    pub method: String,
    /// Request body.
    pub payload: ApproveTokenPayload,
}

/// Human-readable summary of a plan, suitable for an approval dialog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCard {
    /// Card identifier.
    pub card_id: Uuid,
    /// Plan the card describes.
    pub plan_id: Uuid,
    /// Dialog title.
    pub title: String,
    /// Per-step previews, in order.
    pub what_will_happen: Vec<String>,
    /// Exact targets the plan will touch.
    pub exact_targets: ActionCardTargets,
    /// Scope cautions and per-step side-effect warnings.
    pub warnings: Vec<String>,
    /// One-click token request.
    pub approve_token_request: ApproveTokenRequest,
}

/// Derive the approval card for a plan.
pub fn action_card_from_plan(plan: &Plan) -> ActionCard {
    let what_will_happen = plan.steps.iter().map(|step| step.preview.clone()).collect();
    let mut targets = ActionCardTargets::default();
    let mut warnings = vec![String::from("Review scope before approval.")];

    for step in &plan.steps {
        match &step.inputs {
            StepInputs::Search(inputs) => {
                if let Some(root) = &inputs.root {
                    targets.paths.push(root.clone());
                }
                if let Some(folder) = &inputs.folder {
                    targets.paths.push(folder.clone());
                }
                if let Some(query) = &inputs.query {
                    warnings.push(format!("Reads files to search for '{query}'."));
                }
            }
            StepInputs::ReadText(inputs) => {
                if let Some(path) = &inputs.path {
                    targets.files.push(path.clone());
                }
            }
            StepInputs::Exec(inputs) => {
                if let Some(command) = &inputs.command {
                    targets.commands.push(match command {
                        crate::types::CommandInput::Line(line) => line.clone(),
                        crate::types::CommandInput::Argv(argv) => argv.join(" "),
                    });
                }
            }
            StepInputs::Other(raw) => {
                if step.action.starts_with("browser.") {
                    if let Some(url) = raw.get("url").and_then(|v| v.as_str()) {
                        targets.urls.push(url.to_owned());
                    }
                }
            }
            StepInputs::Respond(_) => {}
        }
        if step.side_effects != SideEffects::None {
            warnings.push(format!(
                "Step {} has side effects: {}.",
                step.step_id, step.side_effects
            ));
        }
    }

    ActionCard {
        card_id: Uuid::new_v4(),
        plan_id: plan.plan_id,
        title: String::from("Approval Required"),
        what_will_happen,
        exact_targets: targets,
        warnings,
        approve_token_request: ApproveTokenRequest {
            endpoint: String::from("/v1/approvals/issue-token"),
            method: String::from("POST"),
            payload: ApproveTokenPayload {
                plan_id: plan.plan_id,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::router::{build_plan, PlanRequest};

    fn search_plan() -> Plan {
        build_plan(&PlanRequest {
            prompt: String::from("search my project folder for 'TODO'"),
            allowed_folders: vec![String::from("/workspace")],
            dry_run: true,
        })
    }

    #[test]
    fn test_card_lists_previews_and_targets() {
        let plan = search_plan();
        let card = action_card_from_plan(&plan);

        assert_eq!(card.plan_id, plan.plan_id);
        assert_eq!(card.title, "Approval Required");
        assert_eq!(card.what_will_happen.len(), 1);
        assert_eq!(card.exact_targets.paths, vec![String::from("/workspace")]);
        assert!(card.exact_targets.commands.is_empty());
    }

    #[test]
    fn test_card_warns_about_search_query() {
        let card = action_card_from_plan(&search_plan());
        assert!(card
            .warnings
            .iter()
            .any(|w| w.contains("search for 'TODO'")));
        assert_eq!(card.warnings[0], "Review scope before approval.");
    }

    #[test]
    fn test_card_warns_per_side_effect_step() {
        let raw = serde_json::json!({
            "plan_id": Uuid::new_v4(),
            "created_at": "2026-02-20T00:00:00Z",
            "user_intent_summary": "Run pwd",
            "requires_approval": true,
            "required_permissions": [],
            "steps": [{
                "step_id": "s1",
                "agent": "shell",
                "action": "shell.exec",
                "inputs": {"command": "pwd", "cwd": "/workspace"},
                "side_effects": "exec",
                "preview": "Run pwd"
            }],
            "estimated_risk": "medium",
            "dry_run": false,
            "router_confidence": 0.9,
            "router_fallback_used": false,
            "explain": "test"
        });
        let plan: Plan = serde_json::from_value(raw).expect("plan");
        let card = action_card_from_plan(&plan);

        assert_eq!(card.exact_targets.commands, vec![String::from("pwd")]);
        assert!(card
            .warnings
            .iter()
            .any(|w| w.contains("Step s1 has side effects: exec.")));
    }

    #[test]
    fn test_card_embeds_token_request() {
        let plan = search_plan();
        let card = action_card_from_plan(&plan);
        assert_eq!(card.approve_token_request.endpoint, "/v1/approvals/issue-token");
        assert_eq!(card.approve_token_request.method, "POST");
        assert_eq!(card.approve_token_request.payload.plan_id, plan.plan_id);
    }
}
