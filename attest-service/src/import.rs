//! Framework import documents
//!
//! A framework document describes a whole compliance framework: its
//! controls and, under each control, the tasks that implement it.
//!
//! ```json
//! {
//!   "framework": {
//!     "name": "SOC 2",
//!     "content-ref": "soc2",
//!     "description": "Trust services criteria",
//!     "version": "2017",
//!     "controls": [{
//!       "content-ref": "cc6.1",
//!       "category": "Logical Access",
//!       "importance": "MANDATORY",
//!       "standards": ["SOC2-CC6.1"],
//!       "name": "Access Review",
//!       "description": "Review access quarterly",
//!       "tasks": [{ "name": "Export user list", "description": "", "time-estimate": 1800 }]
//!     }]
//!   }
//! }
//! ```

use crate::validation;
use attest_core::{
    timestamp_now, Control, ControlImportance, ControlState, CoreError, CoreResult, EntityType,
    Framework, Gid, ImportBundle, ImportedControl, ImportedTask, NewTransition, Scope, Task,
    TaskState,
};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FrameworkDocument {
    pub framework: DocumentFramework,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DocumentFramework {
    pub name: String,
    #[serde(default)]
    pub content_ref: String,
    #[serde(default)]
    pub description: String,
    /// Revision of the published framework; informational only
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub controls: Vec<DocumentControl>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DocumentControl {
    #[serde(default)]
    pub content_ref: String,
    #[serde(default)]
    pub category: String,
    pub importance: ControlImportance,
    #[serde(default)]
    pub standards: Vec<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tasks: Vec<DocumentTask>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DocumentTask {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Seconds; zero or negative means no estimate
    #[serde(default)]
    pub time_estimate: i64,
}

impl FrameworkDocument {
    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::invalid_argument("document", e.to_string()))
    }

    /// Every framework, control and task needs a name.
    pub fn validate(&self) -> CoreResult<()> {
        let framework = &self.framework;
        validation::require_name("framework.name", &framework.name)?;
        for (c, control) in framework.controls.iter().enumerate() {
            validation::require_name(&format!("framework.controls[{}].name", c), &control.name)?;
            for (t, task) in control.tasks.iter().enumerate() {
                validation::require_name(
                    &format!("framework.controls[{}].tasks[{}].name", c, t),
                    &task.name,
                )?;
            }
        }
        Ok(())
    }

    /// Mint every id up front and build the rows to write. Controls start
    /// `NOT_STARTED`, tasks `TODO`, all stamped with the same time.
    pub fn into_bundle(self, scope: &Scope, organization_id: Gid) -> ImportBundle {
        let now = timestamp_now();
        let document = self.framework;
        let framework = Framework {
            id: scope.mint(EntityType::Framework),
            organization_id,
            name: document.name.trim().to_string(),
            description: document.description,
            content_ref: document.content_ref,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        let controls = document
            .controls
            .into_iter()
            .map(|control| {
                let control_id = scope.mint(EntityType::Control);
                let tasks = control
                    .tasks
                    .into_iter()
                    .map(|task| ImportedTask {
                        task: Task {
                            id: scope.mint(EntityType::Task),
                            name: task.name.trim().to_string(),
                            description: task.description,
                            content_ref: String::new(),
                            time_estimate_secs: (task.time_estimate > 0)
                                .then_some(task.time_estimate),
                            assigned_to: None,
                            state: None,
                            version: 1,
                            created_at: now,
                            updated_at: now,
                        },
                        initial: NewTransition {
                            created_at: now,
                            ..NewTransition::initial::<TaskState>(scope)
                        },
                    })
                    .collect();

                ImportedControl {
                    control: Control {
                        id: control_id,
                        framework_id: framework.id,
                        category: control.category,
                        importance: control.importance,
                        name: control.name.trim().to_string(),
                        description: control.description,
                        content_ref: control.content_ref,
                        standards: control.standards,
                        state: None,
                        version: 1,
                        created_at: now,
                        updated_at: now,
                    },
                    initial: NewTransition {
                        created_at: now,
                        ..NewTransition::initial::<ControlState>(scope)
                    },
                    tasks,
                }
            })
            .collect();

        ImportBundle {
            framework,
            controls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{ErrorKind, TenantId};

    const DOCUMENT: &str = r#"{
        "framework": {
            "name": "SOC 2",
            "content-ref": "soc2",
            "description": "Trust services criteria",
            "version": "2017",
            "controls": [
                {
                    "content-ref": "cc6.1",
                    "category": "Logical Access",
                    "importance": "MANDATORY",
                    "standards": ["SOC2-CC6.1", "ISO27001-A.9"],
                    "name": "Access Review",
                    "description": "Review access quarterly",
                    "tasks": [
                        { "name": "Export user list", "description": "", "time-estimate": 1800 },
                        { "name": "Sign off", "description": "Manager approval", "time-estimate": 0 }
                    ]
                },
                {
                    "category": "Operations",
                    "importance": "PREFERRED",
                    "name": "Backups"
                }
            ]
        }
    }"#;

    #[test]
    fn test_parse_document() -> CoreResult<()> {
        let document = FrameworkDocument::from_json(DOCUMENT)?;
        let framework = &document.framework;
        assert_eq!(framework.name, "SOC 2");
        assert_eq!(framework.version.as_deref(), Some("2017"));
        assert_eq!(framework.controls.len(), 2);
        assert_eq!(framework.controls[0].importance, ControlImportance::Mandatory);
        assert_eq!(framework.controls[0].tasks[0].time_estimate, 1800);
        assert!(framework.controls[1].tasks.is_empty());
        assert!(framework.controls[1].standards.is_empty());
        document.validate()
    }

    #[test]
    fn test_malformed_document_is_invalid_argument() {
        let err = FrameworkDocument::from_json(r#"{"framework": {"controls": 3}}"#).err();
        assert!(matches!(err, Some(CoreError::InvalidArgument { ref field, .. }) if field == "document"));

        let err = FrameworkDocument::from_json(
            r#"{"framework": {"name": "x", "controls": [{"name": "c", "importance": "OPTIONAL"}]}}"#,
        )
        .err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidArgument));
    }

    #[test]
    fn test_blank_task_name_is_rejected() -> CoreResult<()> {
        let mut document = FrameworkDocument::from_json(DOCUMENT)?;
        document.framework.controls[0].tasks[1].name = "  ".to_string();
        let err = document.validate().err();
        assert!(matches!(
            err,
            Some(CoreError::InvalidArgument { ref field, .. })
                if field == "framework.controls[0].tasks[1].name"
        ));
        Ok(())
    }

    #[test]
    fn test_bundle_mints_ids_and_initial_states() -> CoreResult<()> {
        let scope = Scope::new(TenantId::generate());
        let organization_id = scope.mint(EntityType::Organization);
        let bundle = FrameworkDocument::from_json(DOCUMENT)?.into_bundle(&scope, organization_id);

        assert_eq!(bundle.framework.organization_id, organization_id);
        assert!(scope.owns(&bundle.framework.id));
        assert_eq!(bundle.controls.len(), 2);
        assert_eq!(bundle.task_count(), 2);

        let access = &bundle.controls[0];
        assert_eq!(access.control.framework_id, bundle.framework.id);
        assert_eq!(access.control.standards.len(), 2);
        assert_eq!(access.initial.to_state, "NOT_STARTED");
        assert_eq!(access.initial.id.entity_type(), EntityType::ControlStateTransition);

        let tasks: Vec<&Task> = access.tasks.iter().map(|t| &t.task).collect();
        assert_eq!(tasks[0].time_estimate_secs, Some(1800));
        assert_eq!(tasks[1].time_estimate_secs, None);
        assert_eq!(tasks[0].content_ref, "");
        assert!(access.tasks.iter().all(|t| t.initial.to_state == "TODO"));
        assert!(access
            .tasks
            .iter()
            .all(|t| t.task.created_at == bundle.framework.created_at));
        Ok(())
    }
}
