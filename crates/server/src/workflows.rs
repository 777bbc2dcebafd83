//! Workflow definitions read from a directory.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use stepflow_engine::{ValidationError, WorkflowDefinition, WorkflowSource};

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Looks up `<workflow_id>.yaml`, `.yml` or `.json` in a directory.
///
/// Files are read on every lookup, so edits take effect for the next
/// execution without a restart.
#[derive(Debug, Clone)]
pub struct FileWorkflowSource {
    dir: PathBuf,
}

impl FileWorkflowSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

/// Ids map straight to file names, so only a conservative character set is
/// accepted.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[async_trait]
impl WorkflowSource for FileWorkflowSource {
    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>, ValidationError> {
        if !is_valid_id(workflow_id) {
            return Ok(None);
        }

        for ext in EXTENSIONS {
            let path = self.dir.join(format!("{workflow_id}.{ext}"));
            let source = match tokio::fs::read_to_string(&path).await {
                Ok(source) => source,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(ValidationError::Workflow(format!(
                        "cannot read {}: {e}",
                        path.display()
                    )))
                }
            };

            let mut definition = if ext == "json" {
                WorkflowDefinition::from_json(&source)?
            } else {
                WorkflowDefinition::from_yaml(&source)?
            };
            if definition.id.is_empty() {
                definition.id = workflow_id.to_string();
            } else if definition.id != workflow_id {
                return Err(ValidationError::Workflow(format!(
                    "{} declares id '{}'",
                    path.display(),
                    definition.id
                )));
            }
            tracing::debug!(workflow_id, path = %path.display(), "Loaded workflow definition");
            return Ok(Some(definition));
        }
        Ok(None)
    }
}
