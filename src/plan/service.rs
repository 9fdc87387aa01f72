use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::keyframe::KeyframeRecord;

use super::step::{parse_plan, ActionStep};
use super::PlanError;

pub const PLANNING_PROMPT: &str = "\
The attached images are keyframes from a screen recording of one workflow, in \
the order they occurred. Work out what the user was trying to achieve and break \
it into discrete steps that can be replayed with a mouse and keyboard.

Reply with a JSON array only, without markdown fences. Each element has:
- \"step_id\": integer, starting at 1
- \"description\": what happens in this step
- \"action_type\": one of \"click\", \"type\", \"wait\", \"drag\"
- \"coordinates\": [x, y] normalized to 0.0-1.0 from the top-left corner, or null when the step has no position
- \"text_content\": the exact text entered, or null. Read the final committed text \
from the screen, not intermediate input-method candidates, and do not correct it
- \"enter_keys\": how many times Enter is pressed after the step, 0 by default
- \"visual_target\": a short name for the element acted on, or null
";

/// Handle for an image the service has accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedArtifact {
    pub path: PathBuf,
    pub handle: String,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("cannot read {}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("service rejected the request: {0}")]
    Rejected(String),
}

/// External multimodal planner.
pub trait CognitiveService {
    fn upload(&self, path: &Path) -> Result<UploadedArtifact, ServiceError>;

    fn generate(&self, prompt: &str, artifacts: &[UploadedArtifact]) -> Result<String, ServiceError>;
}

/// What happened to one keyframe during upload.
#[derive(Debug)]
pub struct UploadOutcome {
    pub path: PathBuf,
    pub result: Result<UploadedArtifact, ServiceError>,
}

#[derive(Debug)]
pub struct Analysis {
    /// One entry per keyframe, in keyframe order.
    pub uploads: Vec<UploadOutcome>,
    pub steps: Vec<ActionStep>,
}

impl Analysis {
    pub fn failed_uploads(&self) -> impl Iterator<Item = &UploadOutcome> {
        self.uploads.iter().filter(|u| u.result.is_err())
    }
}

/// Uploads the keyframes in order and asks the service for a plan over those that made it.
///
/// A failed upload does not stop the others; it is reported in the returned outcomes.
pub fn analyze_workflow<S: CognitiveService + ?Sized>(
    service: &S,
    keyframes: &[KeyframeRecord],
) -> Result<Analysis, PlanError> {
    let total = keyframes.len();
    let uploads: Vec<UploadOutcome> = keyframes
        .iter()
        .enumerate()
        .map(|(i, keyframe)| {
            info!(n = i + 1, total, path = %keyframe.path.display(), "uploading keyframe");
            let result = service.upload(&keyframe.path);
            if let Err(e) = &result {
                warn!(path = %keyframe.path.display(), error = %e, "upload failed");
            }
            UploadOutcome {
                path: keyframe.path.clone(),
                result,
            }
        })
        .collect();

    let artifacts: Vec<UploadedArtifact> = uploads
        .iter()
        .filter_map(|u| u.result.as_ref().ok().cloned())
        .collect();
    if artifacts.is_empty() {
        return Err(PlanError::NoArtifacts);
    }

    info!(artifacts = artifacts.len(), "requesting plan");
    let reply = service.generate(PLANNING_PROMPT, &artifacts)?;
    let steps = parse_plan(&reply)?;
    info!(steps = steps.len(), "plan parsed");

    Ok(Analysis { uploads, steps })
}

/// Offline service that answers with a previously recorded reply.
pub struct ReplayService {
    response: PathBuf,
}

impl ReplayService {
    pub fn new(response: &Path) -> Self {
        Self {
            response: response.to_path_buf(),
        }
    }
}

impl CognitiveService for ReplayService {
    fn upload(&self, path: &Path) -> Result<UploadedArtifact, ServiceError> {
        let unreadable = |source| ServiceError::Unreadable {
            path: path.to_path_buf(),
            source,
        };
        let metadata = fs::metadata(path).map_err(unreadable)?;
        if !metadata.is_file() {
            return Err(unreadable(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        Ok(UploadedArtifact {
            path: path.to_path_buf(),
            handle: format!("replay://{}", path.display()),
        })
    }

    fn generate(&self, _prompt: &str, _artifacts: &[UploadedArtifact]) -> Result<String, ServiceError> {
        let reply = fs::read_to_string(&self.response).map_err(|source| ServiceError::Unreadable {
            path: self.response.clone(),
            source,
        })?;
        if reply.trim().is_empty() {
            return Err(ServiceError::Rejected(format!(
                "recorded reply {} is empty",
                self.response.display()
            )));
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::step::Action;
    use crate::test_support::scratch_dir;
    use std::cell::RefCell;

    /// Accepts every path except those listed, and records what it was asked.
    struct ScriptedService {
        reject: Vec<PathBuf>,
        reply: String,
        seen: RefCell<Vec<String>>,
    }

    impl ScriptedService {
        fn new(reply: &str) -> Self {
            Self {
                reject: Vec::new(),
                reply: reply.to_string(),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl CognitiveService for ScriptedService {
        fn upload(&self, path: &Path) -> Result<UploadedArtifact, ServiceError> {
            if self.reject.iter().any(|p| p == path) {
                return Err(ServiceError::Rejected("quota exceeded".into()));
            }
            Ok(UploadedArtifact {
                path: path.to_path_buf(),
                handle: format!("files/{}", path.display()),
            })
        }

        fn generate(&self, prompt: &str, artifacts: &[UploadedArtifact]) -> Result<String, ServiceError> {
            assert_eq!(prompt, PLANNING_PROMPT);
            self.seen
                .borrow_mut()
                .extend(artifacts.iter().map(|a| a.handle.clone()));
            Ok(self.reply.clone())
        }
    }

    fn keyframes(names: &[&str]) -> Vec<KeyframeRecord> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| KeyframeRecord {
                timestamp: i as f64 * 0.5,
                frame_index: i as u64 * 15,
                path: PathBuf::from(name),
                sha256: String::new(),
            })
            .collect()
    }

    #[test]
    fn test_failed_upload_is_reported_not_fatal() {
        let mut service = ScriptedService::new(
            "```json\n[{\"step_id\": 1, \"action_type\": \"click\", \"coordinates\": [0.5, 0.5]}]\n```",
        );
        service.reject.push(PathBuf::from("b.jpg"));

        let analysis =
            analyze_workflow(&service, &keyframes(&["a.jpg", "b.jpg", "c.jpg"])).unwrap();

        assert_eq!(analysis.uploads.len(), 3);
        let failed: Vec<_> = analysis.failed_uploads().map(|u| u.path.clone()).collect();
        assert_eq!(failed, vec![PathBuf::from("b.jpg")]);
        assert_eq!(*service.seen.borrow(), vec!["files/a.jpg", "files/c.jpg"]);
        assert!(matches!(analysis.steps[0].action, Action::Click { .. }));
    }

    #[test]
    fn test_no_uploaded_artifacts_is_an_error() {
        let mut service = ScriptedService::new("[]");
        service.reject.push(PathBuf::from("a.jpg"));
        assert!(matches!(
            analyze_workflow(&service, &keyframes(&["a.jpg"])),
            Err(PlanError::NoArtifacts)
        ));
        assert!(matches!(
            analyze_workflow(&service, &[]),
            Err(PlanError::NoArtifacts)
        ));
    }

    #[test]
    fn test_invalid_reply_surfaces_validation_error() {
        let service = ScriptedService::new(r#"[{"action_type": "hover"}]"#);
        assert!(matches!(
            analyze_workflow(&service, &keyframes(&["a.jpg"])),
            Err(PlanError::UnknownAction { .. })
        ));
    }

    #[test]
    fn test_replay_service() {
        let dir = scratch_dir("replay-service");
        let frame = dir.join("frame_0.00.jpg");
        fs::write(&frame, b"jpeg").unwrap();
        let response = dir.join("reply.json");
        fs::write(&response, r#"[{"step_id": 1, "action_type": "wait"}]"#).unwrap();

        let service = ReplayService::new(&response);
        let mut records = keyframes(&["missing.jpg"]);
        records[0].path = frame.clone();
        records.push(KeyframeRecord {
            path: dir.join("missing.jpg"),
            ..records[0].clone()
        });

        let analysis = analyze_workflow(&service, &records).unwrap();
        assert!(analysis.uploads[0].result.is_ok());
        assert!(matches!(
            analysis.uploads[1].result,
            Err(ServiceError::Unreadable { .. })
        ));
        assert_eq!(analysis.steps[0].action, Action::Wait);

        fs::remove_dir_all(dir).unwrap();
    }
}
