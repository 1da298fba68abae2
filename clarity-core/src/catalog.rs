//! Instruction templates per artifact type.
//!
//! Templates are resource text under `templates/`. Each one carries two
//! placeholders, `{{DOMAIN_CONTEXT}}` and `{{ANALYST_NOTES}}`, filled in at
//! assembly time.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ClarityError, Result};

pub const DOMAIN_CONTEXT_PLACEHOLDER: &str = "{{DOMAIN_CONTEXT}}";
pub const ANALYST_NOTES_PLACEHOLDER: &str = "{{ANALYST_NOTES}}";

/// Text interpolated when a placeholder has nothing to show
pub const NONE_PROVIDED: &str = "None provided.";

static PBI_TEMPLATE: &str = include_str!("../templates/pbi.md");
static TECHNICAL_TASK_TEMPLATE: &str = include_str!("../templates/technical_task.md");
static BUG_TEMPLATE: &str = include_str!("../templates/bug.md");
static GENERIC_TEMPLATE: &str = include_str!("../templates/generic.md");
static AMBIENT_TIP_TEMPLATE: &str = include_str!("../templates/ambient_tip.md");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// Product Backlog Item
    #[default]
    Pbi,
    /// Technical sub-task of a PBI
    TechnicalTask,
    /// Bug / defect report
    Bug,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 3] = [
        ArtifactType::Pbi,
        ArtifactType::TechnicalTask,
        ArtifactType::Bug,
    ];

    /// Label used in the artifact's first heading (`# PBI: ...`)
    pub fn heading_label(self) -> &'static str {
        match self {
            ArtifactType::Pbi => "PBI",
            ArtifactType::TechnicalTask => "TECHNICAL TASK",
            ArtifactType::Bug => "BUG",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ArtifactType::Pbi => "PBI (Product Backlog Item)",
            ArtifactType::TechnicalTask => "Technical Task (PBI sub-task)",
            ArtifactType::Bug => "Bug / Defect",
        }
    }

    /// Base file name of an override template in a catalog directory
    pub fn template_file_name(self) -> &'static str {
        match self {
            ArtifactType::Pbi => "pbi.md",
            ArtifactType::TechnicalTask => "technical_task.md",
            ArtifactType::Bug => "bug.md",
        }
    }

    /// Used when a generated artifact carries no parsable title
    pub fn fallback_title(self) -> &'static str {
        match self {
            ArtifactType::Pbi => "PBI_Specification",
            ArtifactType::TechnicalTask => "Technical_Task_Specification",
            ArtifactType::Bug => "Bug_Report",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.heading_label())
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '_' || c == ' ' { '-' } else { c })
            .collect();

        match normalized.as_str() {
            "pbi" | "story" | "backlog-item" | "product-backlog-item" => Ok(ArtifactType::Pbi),
            "task" | "technical-task" | "tech-task" => Ok(ArtifactType::TechnicalTask),
            "bug" | "defect" | "bug-report" => Ok(ArtifactType::Bug),
            _ => Err(format!(
                "unknown artifact type '{s}' (expected one of: pbi, task, bug)"
            )),
        }
    }
}

/// Maps artifact types to instruction templates
#[derive(Debug, Clone, Default)]
pub struct InstructionCatalog {
    overrides: HashMap<ArtifactType, String>,
}

impl InstructionCatalog {
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Load `pbi.md`, `technical_task.md` and `bug.md` from `dir` where present.
    /// Missing files keep the built-in template.
    pub fn with_overrides_from(dir: &Path) -> Result<Self> {
        let mut catalog = Self::builtin();
        for artifact_type in ArtifactType::ALL {
            let path = dir.join(artifact_type.template_file_name());
            if !path.exists() {
                continue;
            }
            let text = fs::read_to_string(&path).map_err(|e| ClarityError::local_io(&path, e))?;
            info!(artifact = %artifact_type, path = %path.display(), "using template override");
            catalog.set_override(artifact_type, text);
        }
        Ok(catalog)
    }

    pub fn set_override(&mut self, artifact_type: ArtifactType, template: impl Into<String>) {
        self.overrides.insert(artifact_type, template.into());
    }

    /// Raw template for a known artifact type.
    pub fn instruction_for(&self, artifact_type: ArtifactType) -> &str {
        if let Some(custom) = self.overrides.get(&artifact_type) {
            return custom;
        }
        builtin_template(artifact_type)
    }

    /// Template for an arbitrary selector string; unrecognized input gets the
    /// generic instruction instead of an error.
    pub fn instruction_for_label(&self, selector: &str) -> &str {
        match selector.parse::<ArtifactType>() {
            Ok(artifact_type) => self.instruction_for(artifact_type),
            Err(reason) => {
                debug!(%reason, "falling back to generic instruction");
                GENERIC_TEMPLATE
            }
        }
    }

    pub fn generic_instruction(&self) -> &'static str {
        GENERIC_TEMPLATE
    }

    /// Template with domain context and analyst notes filled in.
    pub fn render(
        &self,
        artifact_type: ArtifactType,
        domain_context: Option<&str>,
        analyst_notes: Option<&str>,
    ) -> String {
        fill_placeholders(
            self.instruction_for(artifact_type),
            domain_context,
            analyst_notes,
        )
    }

    /// Short "one refinement tip" instruction used by ambient observation.
    pub fn ambient_tip_instruction(&self, domain_context: Option<&str>) -> String {
        fill_placeholders(AMBIENT_TIP_TEMPLATE, domain_context, None)
    }
}

fn builtin_template(artifact_type: ArtifactType) -> &'static str {
    match artifact_type {
        ArtifactType::Pbi => PBI_TEMPLATE,
        ArtifactType::TechnicalTask => TECHNICAL_TASK_TEMPLATE,
        ArtifactType::Bug => BUG_TEMPLATE,
    }
}

fn fill_placeholders(template: &str, domain_context: Option<&str>, notes: Option<&str>) -> String {
    let or_none = |value: Option<&str>| -> String {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => NONE_PROVIDED.to_string(),
        }
    };

    template
        .replace(DOMAIN_CONTEXT_PLACEHOLDER, &or_none(domain_context))
        .replace(ANALYST_NOTES_PLACEHOLDER, &or_none(notes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(haystack: &str, needles: &[&str]) -> Vec<usize> {
        needles
            .iter()
            .map(|needle| {
                haystack
                    .find(needle)
                    .unwrap_or_else(|| panic!("missing section {needle:?}"))
            })
            .collect()
    }

    #[test]
    fn pbi_template_sections_are_in_order() {
        let catalog = InstructionCatalog::builtin();
        let text = catalog.instruction_for(ArtifactType::Pbi);
        let found = positions(
            text,
            &[
                "# PBI:",
                "**ID:**",
                "## 1. User Story",
                "## 2. Acceptance Criteria",
                "Given",
                "When",
                "Then",
                "## 3. Business & Validation Rules",
                "## 4. Error Handling",
                "## 5. Definition of Done",
            ],
        );
        assert!(found.windows(2).all(|pair| pair[0] < pair[1]), "{found:?}");
    }

    #[test]
    fn every_template_carries_its_heading_and_placeholders() {
        let catalog = InstructionCatalog::builtin();
        for artifact_type in ArtifactType::ALL {
            let text = catalog.instruction_for(artifact_type);
            let heading = format!("# {}:", artifact_type.heading_label());
            assert!(text.contains(&heading), "{artifact_type} lacks {heading}");
            assert!(text.contains(DOMAIN_CONTEXT_PLACEHOLDER));
            assert!(text.contains(ANALYST_NOTES_PLACEHOLDER));
        }
    }

    #[test]
    fn parse_accepts_common_spellings() {
        assert_eq!("PBI".parse::<ArtifactType>(), Ok(ArtifactType::Pbi));
        assert_eq!("technical_task".parse::<ArtifactType>(), Ok(ArtifactType::TechnicalTask));
        assert_eq!("Technical Task".parse::<ArtifactType>(), Ok(ArtifactType::TechnicalTask));
        assert_eq!(" defect ".parse::<ArtifactType>(), Ok(ArtifactType::Bug));
        assert!("epic".parse::<ArtifactType>().is_err());
    }

    #[test]
    fn unknown_selector_gets_generic_instruction() {
        let catalog = InstructionCatalog::builtin();
        assert_eq!(catalog.instruction_for_label("epic"), GENERIC_TEMPLATE);
        assert_eq!(catalog.instruction_for_label(""), GENERIC_TEMPLATE);
        assert_eq!(catalog.instruction_for_label("bug"), BUG_TEMPLATE);
    }

    #[test]
    fn render_fills_placeholders() {
        let catalog = InstructionCatalog::builtin();
        let text = catalog.render(ArtifactType::Bug, Some("Banking app"), None);

        assert!(text.contains("Banking app"));
        assert!(text.contains(NONE_PROVIDED));
        assert!(!text.contains(DOMAIN_CONTEXT_PLACEHOLDER));
        assert!(!text.contains(ANALYST_NOTES_PLACEHOLDER));
    }

    #[test]
    fn blank_context_renders_as_none_provided() {
        let catalog = InstructionCatalog::builtin();
        let tip = catalog.ambient_tip_instruction(Some("   "));
        assert!(tip.contains(NONE_PROVIDED));
    }

    #[test]
    fn overrides_replace_builtin_templates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bug.md"), "# BUG: custom {{ANALYST_NOTES}}").unwrap();

        let catalog = InstructionCatalog::with_overrides_from(dir.path()).unwrap();
        assert_eq!(
            catalog.render(ArtifactType::Bug, None, Some("crash on save")),
            "# BUG: custom crash on save"
        );
        assert_eq!(catalog.instruction_for(ArtifactType::Pbi), PBI_TEMPLATE);
    }
}
