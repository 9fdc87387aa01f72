use serde::{Deserialize, Serialize};

use super::PlanError;

/// A screen position normalized to `0.0..=1.0` on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    fn from_pair(step_id: u32, [x, y]: [f64; 2]) -> Result<Self, PlanError> {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !(in_range(x) && in_range(y)) {
            return Err(PlanError::CoordinatesOutOfRange { step_id, x, y });
        }
        Ok(Self { x, y })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click { at: Option<Point>, enter_keys: u32 },
    Type { text: String, enter_keys: u32 },
    /// Only the start of the drag is known.
    Drag { from: Point, enter_keys: u32 },
    Wait,
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::Type { .. } => "type",
            Action::Drag { .. } => "drag",
            Action::Wait => "wait",
        }
    }

    pub fn enter_keys(&self) -> u32 {
        match self {
            Action::Click { enter_keys, .. }
            | Action::Type { enter_keys, .. }
            | Action::Drag { enter_keys, .. } => *enter_keys,
            Action::Wait => 0,
        }
    }
}

/// One validated step of a workflow plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "StepRecord")]
pub struct ActionStep {
    pub step_id: u32,
    pub description: String,
    pub visual_target: Option<String>,
    pub action: Action,
}

/// Wire shape of a step as the planning service writes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StepRecord {
    #[serde(default)]
    step_id: Option<u32>,
    #[serde(default)]
    description: String,
    action_type: String,
    #[serde(default)]
    coordinates: Option<[f64; 2]>,
    #[serde(default)]
    text_content: Option<String>,
    #[serde(default)]
    enter_keys: Option<u32>,
    #[serde(default)]
    visual_target: Option<String>,
}

impl StepRecord {
    /// `position` is the 1-based place of the record in the reply, used when it has no id.
    fn validate(self, position: u32) -> Result<ActionStep, PlanError> {
        let step_id = self.step_id.unwrap_or(position);
        let enter_keys = self.enter_keys.unwrap_or(0);
        let coordinates = self
            .coordinates
            .map(|pair| Point::from_pair(step_id, pair))
            .transpose()?;

        let action = match self.action_type.trim().to_ascii_lowercase().as_str() {
            "click" => Action::Click {
                at: coordinates,
                enter_keys,
            },
            "type" => Action::Type {
                text: self
                    .text_content
                    .filter(|text| !text.is_empty())
                    .ok_or(PlanError::MissingField {
                        step_id,
                        field: "text_content",
                    })?,
                enter_keys,
            },
            "drag" => Action::Drag {
                from: coordinates.ok_or(PlanError::MissingField {
                    step_id,
                    field: "coordinates",
                })?,
                enter_keys,
            },
            "wait" => Action::Wait,
            _ => {
                return Err(PlanError::UnknownAction {
                    step_id,
                    action: self.action_type,
                })
            }
        };

        Ok(ActionStep {
            step_id,
            description: self.description,
            visual_target: self.visual_target,
            action,
        })
    }
}

impl From<ActionStep> for StepRecord {
    fn from(step: ActionStep) -> Self {
        let action_type = step.action.kind().to_string();
        let enter_keys = Some(step.action.enter_keys());
        let (coordinates, text_content) = match step.action {
            Action::Click { at, .. } => (at.map(|p| [p.x, p.y]), None),
            Action::Type { text, .. } => (None, Some(text)),
            Action::Drag { from, .. } => (Some([from.x, from.y]), None),
            Action::Wait => (None, None),
        };
        Self {
            step_id: Some(step.step_id),
            description: step.description,
            action_type,
            coordinates,
            text_content,
            enter_keys,
            visual_target: step.visual_target,
        }
    }
}

/// Removes a surrounding markdown code fence, with or without a language tag.
pub fn strip_code_fence(reply: &str) -> &str {
    let text = reply.trim();
    let Some(body) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line, e.g. "json".
    let body = match body.find('\n') {
        Some(newline) => &body[newline + 1..],
        None => body,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parses a service reply into validated steps, in reply order.
pub fn parse_plan(reply: &str) -> Result<Vec<ActionStep>, PlanError> {
    let records: Vec<StepRecord> = serde_json::from_str(strip_code_fence(reply))?;
    records
        .into_iter()
        .zip(1u32..)
        .map(|(record, position)| record.validate(position))
        .collect()
}
