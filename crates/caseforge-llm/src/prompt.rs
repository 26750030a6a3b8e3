//! Prompt template loading and rendering via `minijinja`.
//!
//! Each generative stage has one template, plus a shared `system`
//! template and a `repair` template rendered when the previous attempt
//! failed validation. Templates ship compiled into the binary
//! ([`PromptEngine::embedded`]) and can be overridden from a directory
//! on disk ([`PromptEngine::from_dir`]) so operators can tune prompts
//! without recompiling.

use caseforge_types::Stage;
use minijinja::Environment;

use crate::error::LlmError;

/// Shared system template name.
const SYSTEM_TEMPLATE: &str = "system";

/// Repair-section template name.
const REPAIR_TEMPLATE: &str = "repair";

/// (template name, filename, compiled-in source) for every template.
const TEMPLATE_SOURCES: [(&str, &str, &str); 11] = [
    (SYSTEM_TEMPLATE, "system.j2", include_str!("../templates/system.j2")),
    (REPAIR_TEMPLATE, "repair.j2", include_str!("../templates/repair.j2")),
    ("template", "template.j2", include_str!("../templates/template.j2")),
    ("events", "events.j2", include_str!("../templates/events.j2")),
    ("characters", "characters.j2", include_str!("../templates/characters.j2")),
    ("locations", "locations.j2", include_str!("../templates/locations.j2")),
    ("facts", "facts.j2", include_str!("../templates/facts.j2")),
    ("introduction", "introduction.j2", include_str!("../templates/introduction.j2")),
    ("casebook", "casebook.j2", include_str!("../templates/casebook.j2")),
    ("prose", "prose.j2", include_str!("../templates/prose.j2")),
    ("questions", "questions.j2", include_str!("../templates/questions.j2")),
];

/// The template name for a generative stage, `None` for deterministic
/// stages.
const fn stage_template(stage: Stage) -> Option<&'static str> {
    match stage {
        Stage::GenerateTemplate => Some("template"),
        Stage::GenerateEvents => Some("events"),
        Stage::GenerateCharacters => Some("characters"),
        Stage::GenerateLocations => Some("locations"),
        Stage::DescribeFacts => Some("facts"),
        Stage::GenerateIntroduction => Some("introduction"),
        Stage::BuildCasebook => Some("casebook"),
        Stage::GenerateProse => Some("prose"),
        Stage::GenerateQuestions => Some("questions"),
        Stage::DeriveKnowledge
        | Stage::BuildFactGraph
        | Stage::ComputeOptimalPath
        | Stage::StoreCase => None,
    }
}

/// Manages prompt template loading and rendering.
///
/// Wraps a `minijinja` [`Environment`] with all stage templates
/// pre-loaded.
pub struct PromptEngine {
    env: Environment<'static>,
}

/// The complete rendered prompt ready to send to a model backend.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    /// System message establishing the generator's task.
    pub system: String,
    /// User message containing the stage instructions and context.
    pub user: String,
}

impl PromptEngine {
    /// Create a prompt engine using the compiled-in templates.
    pub fn embedded() -> Result<Self, LlmError> {
        let mut env = Environment::new();
        for (name, _, source) in TEMPLATE_SOURCES {
            env.add_template(name, source)
                .map_err(|e| LlmError::Template(format!("failed to add template {name}: {e}")))?;
        }
        Ok(Self { env })
    }

    /// Create a prompt engine loading templates from the given
    /// directory.
    ///
    /// Every template file must be present; edits on disk are picked up
    /// on the next call to this constructor.
    pub fn from_dir(templates_dir: &str) -> Result<Self, LlmError> {
        let mut env = Environment::new();
        for (name, filename, _) in TEMPLATE_SOURCES {
            let path = format!("{templates_dir}/{filename}");
            let source = std::fs::read_to_string(&path)
                .map_err(|e| LlmError::Template(format!("failed to read {path}: {e}")))?;
            env.add_template_owned(name.to_owned(), source)
                .map_err(|e| LlmError::Template(format!("failed to add template {name}: {e}")))?;
        }
        Ok(Self { env })
    }

    /// Render the full prompt for a generative stage.
    ///
    /// The context is stage-specific JSON. When it carries a non-empty
    /// `previous_errors` array, the repair section is appended to the
    /// user prompt so the generator can fix the prior attempt's
    /// validation failures.
    pub fn render(
        &self,
        stage: Stage,
        context: &serde_json::Value,
    ) -> Result<RenderedPrompt, LlmError> {
        let Some(template_name) = stage_template(stage) else {
            return Err(LlmError::Template(format!(
                "stage {stage} has no prompt template"
            )));
        };

        let system = self.render_template(SYSTEM_TEMPLATE, context)?;
        let mut user = self.render_template(template_name, context)?;

        let has_previous_errors = context
            .get("previous_errors")
            .and_then(serde_json::Value::as_array)
            .is_some_and(|errors| !errors.is_empty());
        if has_previous_errors {
            let repair = self.render_template(REPAIR_TEMPLATE, context)?;
            user.push_str("\n\n");
            user.push_str(&repair);
        }

        Ok(RenderedPrompt { system, user })
    }

    /// Render one named template against the context.
    fn render_template(
        &self,
        name: &str,
        context: &serde_json::Value,
    ) -> Result<String, LlmError> {
        self.env
            .get_template(name)
            .map_err(|e| LlmError::Template(format!("missing template {name}: {e}")))?
            .render(context)
            .map_err(|e| LlmError::Template(format!("{name} render failed: {e}")))
    }
}
