use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use super::step::{Action, ActionStep, Point};

const WAIT_STEP: Duration = Duration::from_secs(2);

/// Pixel size of the screen a plan is replayed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Screen {
    pub width: u32,
    pub height: u32,
}

impl Screen {
    pub fn to_absolute(&self, point: Point) -> (u32, u32) {
        let scale = |v: f64, extent: u32| ((v * extent as f64) as u32).min(extent.saturating_sub(1));
        (scale(point.x, self.width), scale(point.y, self.height))
    }
}

impl FromStr for Screen {
    type Err = String;

    /// Parses `WIDTHxHEIGHT`, e.g. `1920x1080`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| format!("invalid screen dimension {v:?}"))
        };
        Ok(Self {
            width: parse(w)?,
            height: parse(h)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    MoveTo { x: u32, y: u32 },
    Click,
    SelectAll,
    Backspace,
    Paste(String),
    PressEnter,
    Pause(Duration),
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputEvent::MoveTo { x, y } => write!(f, "move to ({x}, {y})"),
            InputEvent::Click => f.write_str("click"),
            InputEvent::SelectAll => f.write_str("select all"),
            InputEvent::Backspace => f.write_str("backspace"),
            InputEvent::Paste(text) => write!(f, "paste {text:?}"),
            InputEvent::PressEnter => f.write_str("enter"),
            InputEvent::Pause(d) => write!(f, "pause {:.1}s", d.as_secs_f64()),
        }
    }
}

/// Lowers one step to the input events that replay it.
pub fn compile_step(step: &ActionStep, screen: &Screen) -> Vec<InputEvent> {
    let mut events = Vec::new();
    let move_to = |point: Point| {
        let (x, y) = screen.to_absolute(point);
        InputEvent::MoveTo { x, y }
    };

    match &step.action {
        Action::Click { at, .. } => {
            events.extend(at.map(move_to));
            events.push(InputEvent::Click);
        }
        Action::Type { text, .. } => {
            // Pasting sidesteps input methods that would mangle typed characters.
            events.push(InputEvent::SelectAll);
            events.push(InputEvent::Backspace);
            events.push(InputEvent::Paste(text.clone()));
        }
        Action::Drag { from, .. } => events.push(move_to(*from)),
        Action::Wait => events.push(InputEvent::Pause(WAIT_STEP)),
    }

    let enter_keys = step.action.enter_keys() as usize;
    events.extend(std::iter::repeat(InputEvent::PressEnter).take(enter_keys));
    events
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("input backend failed: {0}")]
    Backend(String),
}

/// Something that can synthesize input events on a real or pretend screen.
pub trait InputDriver {
    fn send(&mut self, event: &InputEvent) -> Result<(), DriverError>;
}

/// Logs and records events instead of performing them.
#[derive(Debug, Default)]
pub struct DryRunDriver {
    pub events: Vec<InputEvent>,
}

impl InputDriver for DryRunDriver {
    fn send(&mut self, event: &InputEvent) -> Result<(), DriverError> {
        info!(%event, "dry run");
        self.events.push(event.clone());
        Ok(())
    }
}

#[derive(Debug, Error)]
#[error("step {step_id} failed")]
pub struct ExecuteError {
    pub step_id: u32,
    /// Steps fully replayed before the failure.
    pub completed: usize,
    #[source]
    pub source: DriverError,
}

/// Replays steps in order; the first driver error stops the run.
pub fn execute_plan<D: InputDriver + ?Sized>(
    steps: &[ActionStep],
    screen: &Screen,
    driver: &mut D,
) -> Result<usize, ExecuteError> {
    for (completed, step) in steps.iter().enumerate() {
        info!(
            step = step.step_id,
            action = step.action.kind(),
            description = %step.description,
            "executing step"
        );
        for event in compile_step(step, screen) {
            driver.send(&event).map_err(|source| ExecuteError {
                step_id: step.step_id,
                completed,
                source,
            })?;
        }
    }
    Ok(steps.len())
}
