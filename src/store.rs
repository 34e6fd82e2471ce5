//! File-backed store of projects and their refinement runs.
//!
//! ```text
//! <root>/projects/<project-id>/project.json
//! <root>/projects/<project-id>/iterations/<iteration-id>.json
//! ```
//!
//! The refinement loop never touches the store; callers persist a
//! [`RunOutcome`] after a run completes. Runs of one project are expected
//! to be serialised by the caller.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AutoscadError, Result};
use crate::refine::{RunOutcome, Termination};

/// A named collection of runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One stored run of the refinement loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub id: String,
    pub project_id: String,
    pub specification: String,
    pub model_source: String,
    pub source_digest: String,
    pub fulfilled: bool,
    pub termination: Termination,
    pub iterations_run: u32,
    pub created_at: DateTime<Utc>,
}

impl IterationRecord {
    /// Record the outcome of a run.
    #[must_use]
    pub fn from_outcome(project_id: &str, specification: &str, outcome: &RunOutcome) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            specification: specification.to_string(),
            model_source: outcome.final_source.clone(),
            source_digest: outcome.source_digest(),
            fulfilled: outcome.fulfilled,
            termination: outcome.termination.clone(),
            iterations_run: outcome.iterations_run,
            created_at: Utc::now(),
        }
    }
}

/// Default project name, e.g. `project-20250101-120000`.
#[must_use]
pub fn generate_project_name() -> String {
    format!("project-{}", Utc::now().format("%Y%m%d-%H%M%S"))
}

/// Projects and iterations stored as JSON files under a root directory.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    /// Open a store. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.projects_dir().join(project_id)
    }

    fn iterations_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("iterations")
    }

    // ========================================================================
    // Projects
    // ========================================================================

    /// Create a project, generating a name when none is given.
    ///
    /// # Errors
    ///
    /// Returns [`AutoscadError::EmptyProjectName`] for a blank name.
    pub fn create_project(&self, name: Option<&str>) -> Result<Project> {
        let name = match name {
            Some(name) => validated_name(name)?,
            None => generate_project_name(),
        };
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name,
            created_at: Utc::now(),
        };
        write_json(&self.project_dir(&project.id).join("project.json"), &project)?;
        debug!(id = %project.id, name = %project.name, "project created");
        Ok(project)
    }

    /// All projects, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be read.
    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let dir = self.projects_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut projects = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path().join("project.json");
            if !path.exists() {
                continue;
            }
            match read_json::<Project>(&path) {
                Ok(project) => projects.push(project),
                Err(e) => warn!("skipping unreadable project {}: {}", path.display(), e),
            }
        }
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(projects)
    }

    /// Load a project by id.
    ///
    /// # Errors
    ///
    /// Returns [`AutoscadError::ProjectNotFound`] if it does not exist.
    pub fn get_project(&self, id: &str) -> Result<Project> {
        let path = self.project_dir(id).join("project.json");
        if !is_safe_id(id) || !path.exists() {
            return Err(AutoscadError::ProjectNotFound { id: id.to_string() });
        }
        read_json(&path)
    }

    /// Find a project by id or exact name.
    ///
    /// # Errors
    ///
    /// Returns [`AutoscadError::ProjectNotFound`] if nothing matches.
    pub fn find_project(&self, id_or_name: &str) -> Result<Project> {
        if let Ok(project) = self.get_project(id_or_name) {
            return Ok(project);
        }
        self.list_projects()?
            .into_iter()
            .find(|p| p.name == id_or_name)
            .ok_or_else(|| AutoscadError::ProjectNotFound {
                id: id_or_name.to_string(),
            })
    }

    /// Rename a project.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank name or an unknown project.
    pub fn rename_project(&self, id: &str, name: &str) -> Result<Project> {
        let name = validated_name(name)?;
        let mut project = self.get_project(id)?;
        project.name = name;
        write_json(&self.project_dir(id).join("project.json"), &project)?;
        Ok(project)
    }

    // ========================================================================
    // Iterations
    // ========================================================================

    /// Persist a run record under its project.
    ///
    /// # Errors
    ///
    /// Returns [`AutoscadError::ProjectNotFound`] if the project does not exist.
    pub fn save_iteration(&self, record: &IterationRecord) -> Result<()> {
        self.get_project(&record.project_id)?;
        let path = self
            .iterations_dir(&record.project_id)
            .join(format!("{}.json", record.id));
        write_json(&path, record)
    }

    /// Runs of a project, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AutoscadError::ProjectNotFound`] if the project does not exist.
    pub fn list_iterations(&self, project_id: &str) -> Result<Vec<IterationRecord>> {
        self.get_project(project_id)?;
        let dir = self.iterations_dir(project_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<IterationRecord>(&path) {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping unreadable iteration {}: {}", path.display(), e),
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    /// The most recent run of a project, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AutoscadError::ProjectNotFound`] if the project does not exist.
    pub fn latest_iteration(&self, project_id: &str) -> Result<Option<IterationRecord>> {
        Ok(self.list_iterations(project_id)?.into_iter().next())
    }

    /// Load a run by id from any project.
    ///
    /// # Errors
    ///
    /// Returns [`AutoscadError::IterationNotFound`] if no project has it.
    pub fn get_iteration(&self, id: &str) -> Result<IterationRecord> {
        if is_safe_id(id) {
            for project in self.list_projects()? {
                let path = self.iterations_dir(&project.id).join(format!("{}.json", id));
                if path.exists() {
                    return read_json(&path);
                }
            }
        }
        Err(AutoscadError::IterationNotFound { id: id.to_string() })
    }
}

fn validated_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AutoscadError::EmptyProjectName);
    }
    Ok(name.to_string())
}

/// Ids become path components, so they must not escape the store.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write JSON through a temporary file so readers never see a partial file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| AutoscadError::Other(anyhow::anyhow!("invalid store path")))?;
    std::fs::create_dir_all(dir)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(serde_json::to_string_pretty(value)?.as_bytes())?;
    file.persist(path).map_err(|e| AutoscadError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refine::AbortReason;
    use chrono::Duration;
    use tempfile::TempDir;

    fn outcome(source: &str, termination: Termination) -> RunOutcome {
        RunOutcome {
            final_source: source.to_string(),
            fulfilled: termination == Termination::Fulfilled,
            iterations_run: 2,
            termination,
            final_verdict: None,
        }
    }

    #[test]
    fn test_create_and_get_project() {
        let temp = TempDir::new().unwrap();
        let store = ProjectStore::new(temp.path());

        let project = store.create_project(Some("  Bracket  ")).unwrap();
        assert_eq!(project.name, "Bracket");
        assert_eq!(store.get_project(&project.id).unwrap(), project);
        assert_eq!(store.find_project("Bracket").unwrap().id, project.id);
    }

    #[test]
    fn test_generated_name() {
        let temp = TempDir::new().unwrap();
        let store = ProjectStore::new(temp.path());
        let project = store.create_project(None).unwrap();
        assert!(project.name.starts_with("project-"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let temp = TempDir::new().unwrap();
        let store = ProjectStore::new(temp.path());
        assert!(matches!(
            store.create_project(Some("   ")),
            Err(AutoscadError::EmptyProjectName)
        ));

        let project = store.create_project(Some("ok")).unwrap();
        assert!(matches!(
            store.rename_project(&project.id, ""),
            Err(AutoscadError::EmptyProjectName)
        ));
    }

    #[test]
    fn test_list_projects_newest_first() {
        let temp = TempDir::new().unwrap();
        let store = ProjectStore::new(temp.path());
        assert!(store.list_projects().unwrap().is_empty());

        let first = store.create_project(Some("first")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store.create_project(Some("second")).unwrap();

        let names: Vec<String> = store
            .list_projects()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec![second.name, first.name]);
    }

    #[test]
    fn test_rename_project() {
        let temp = TempDir::new().unwrap();
        let store = ProjectStore::new(temp.path());
        let project = store.create_project(Some("old")).unwrap();

        let renamed = store.rename_project(&project.id, "new").unwrap();
        assert_eq!(renamed.name, "new");
        assert_eq!(store.get_project(&project.id).unwrap().name, "new");
        assert!(matches!(
            store.rename_project("missing", "x"),
            Err(AutoscadError::ProjectNotFound { .. })
        ));
    }

    #[test]
    fn test_save_and_list_iterations() {
        let temp = TempDir::new().unwrap();
        let store = ProjectStore::new(temp.path());
        let project = store.create_project(Some("cube")).unwrap();

        let mut older = IterationRecord::from_outcome(
            &project.id,
            "A 10mm cube",
            &outcome("cube(5);", Termination::MaxIterationsReached),
        );
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = IterationRecord::from_outcome(
            &project.id,
            "A 10mm cube",
            &outcome("cube(10);", Termination::Fulfilled),
        );
        store.save_iteration(&older).unwrap();
        store.save_iteration(&newer).unwrap();

        let records = store.list_iterations(&project.id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], newer);
        assert_eq!(records[1], older);
        assert_eq!(store.latest_iteration(&project.id).unwrap(), Some(newer.clone()));
        assert_eq!(store.get_iteration(&older.id).unwrap(), older);
    }

    #[test]
    fn test_iteration_record_round_trip_keeps_abort_reason() {
        let temp = TempDir::new().unwrap();
        let store = ProjectStore::new(temp.path());
        let project = store.create_project(Some("broken")).unwrap();
        let record = IterationRecord::from_outcome(
            &project.id,
            "spec",
            &outcome(
                "cube(",
                Termination::Aborted {
                    reason: AbortReason::RenderUnrecoverable,
                    detail: "ERROR".to_string(),
                },
            ),
        );
        store.save_iteration(&record).unwrap();
        let loaded = store.get_iteration(&record.id).unwrap();
        assert_eq!(
            loaded.termination.abort_reason(),
            Some(AbortReason::RenderUnrecoverable)
        );
        assert!(!loaded.fulfilled);
    }

    #[test]
    fn test_missing_records() {
        let temp = TempDir::new().unwrap();
        let store = ProjectStore::new(temp.path());
        assert!(matches!(
            store.list_iterations("nope"),
            Err(AutoscadError::ProjectNotFound { .. })
        ));
        assert!(matches!(
            store.get_iteration("nope"),
            Err(AutoscadError::IterationNotFound { .. })
        ));
        assert!(matches!(
            store.get_project("../escape"),
            Err(AutoscadError::ProjectNotFound { .. })
        ));

        let record = IterationRecord::from_outcome("ghost", "spec", &outcome("", Termination::Fulfilled));
        assert!(store.save_iteration(&record).is_err());
    }
}
