//! The pipeline orchestrator: stage order, retry budgets, checkpoints,
//! and resume.
//!
//! The orchestrator is the only component that knows the stage order.
//! Stages are functions over the accumulator; generative stages run
//! under the retry protocol:
//!
//! 1. Invoke the generator (with any prior validation errors rendered
//!    into the prompt as repair context).
//! 2. Invoke the stage's validator.
//! 3. On success, advance. Otherwise spend one attempt from the stage's
//!    retry budget and go to 1; once the budget is exhausted the run
//!    fails with the last validator output attached.
//!
//! The accumulator is checkpointed to the draft store after every
//! successful stage, which is what makes resume-from-stage (anything
//! from `generateEvents` onwards) work: earlier stages are skipped
//! entirely and the checkpointed fields stand in for them.

use caseforge_llm::{ModelClient, PromptEngine};
use caseforge_store::{CaseStore, DraftStore};
use caseforge_types::{
    Case, GenerationInput, GenerationState, ResumeRequest, Stage, ValidationResult,
};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::context::StageContext;
use crate::error::PipelineError;
use crate::stages::{
    characters, events, facts, introduction, locations, prose, questions, store, template,
};
use crate::{casebook, factgraph, knowledge, optimal_path};

/// Default retries per generative stage (1 retry = up to 2 attempts).
const DEFAULT_RETRY_BUDGET: u32 = 1;

/// Drives a generation run through all stages.
pub struct Orchestrator {
    model: ModelClient,
    prompts: PromptEngine,
    drafts: DraftStore,
    cases: CaseStore,
    retry_budget: u32,
}

impl Orchestrator {
    /// Create an orchestrator with the default retry budget.
    pub const fn new(
        model: ModelClient,
        prompts: PromptEngine,
        drafts: DraftStore,
        cases: CaseStore,
    ) -> Self {
        Self {
            model,
            prompts,
            drafts,
            cases,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    /// Override the per-stage retry budget.
    #[must_use]
    pub const fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    /// Snapshot of model token usage and estimated cost so far.
    pub fn cost_summary(&self) -> caseforge_llm::CostSummary {
        self.model.cost_summary()
    }

    /// Execute a full run from a fresh input.
    ///
    /// The input is schema-validated before any stage executes.
    pub async fn run(&self, input: GenerationInput) -> Result<Case, PipelineError> {
        input
            .validate()
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        let mut state = GenerationState::new(input);
        info!(
            draft_id = %state.draft_id,
            case_date = %state.input.case_date,
            "generation run starting"
        );
        self.run_stages(&mut state, Stage::GenerateTemplate).await
    }

    /// Resume a run from a checkpointed accumulator.
    ///
    /// `generateTemplate` is rejected: the template seeds the whole
    /// run, so there is nothing earlier to resume on top of.
    pub async fn resume(&self, request: ResumeRequest) -> Result<Case, PipelineError> {
        if !request.start_from_step.is_resumable() {
            return Err(PipelineError::InvalidResume(request.start_from_step));
        }
        let mut state = request.state;
        info!(
            draft_id = %state.draft_id,
            start_from = %request.start_from_step,
            "resuming generation run"
        );
        self.run_stages(&mut state, request.start_from_step).await
    }

    /// Run every stage from `start` onwards, checkpointing after each.
    async fn run_stages(
        &self,
        state: &mut GenerationState,
        start: Stage,
    ) -> Result<Case, PipelineError> {
        let mut finalized = None;
        let mut started = false;

        for stage in Stage::all() {
            if !started {
                if stage == start {
                    started = true;
                } else {
                    continue;
                }
            }

            finalized = self.execute_stage(stage, state).await?;
            if stage == Stage::StoreCase {
                // The draft was deleted on finalisation; nothing left to
                // checkpoint.
                debug!(stage = %stage, "stage complete");
                continue;
            }
            self.drafts.put_draft(state).await?;
            debug!(stage = %stage, "stage complete, draft checkpointed");
        }

        finalized.ok_or_else(|| PipelineError::Fatal {
            stage: Stage::StoreCase,
            message: String::from("pipeline ended without a finalized case"),
        })
    }

    /// Execute one stage. Returns the finalized case for the store
    /// stage, `None` otherwise.
    async fn execute_stage(
        &self,
        stage: Stage,
        state: &mut GenerationState,
    ) -> Result<Option<Case>, PipelineError> {
        match stage {
            Stage::DeriveKnowledge => {
                knowledge::derive(state)?;
                Ok(None)
            }
            Stage::BuildFactGraph => {
                factgraph::build(state)?;
                Ok(None)
            }
            Stage::ComputeOptimalPath => {
                optimal_path::compute(state)?;
                Ok(None)
            }
            Stage::StoreCase => {
                let case = store::assemble(state)?;
                self.cases.insert(&case).await?;
                self.drafts.delete_draft(state.draft_id).await?;
                info!(case_date = %case.case_date, title = case.title, "case stored");
                Ok(Some(case))
            }
            _ => {
                self.run_generative(stage, state).await?;
                Ok(None)
            }
        }
    }

    /// Run one generative stage under the retry protocol.
    async fn run_generative(
        &self,
        stage: Stage,
        state: &mut GenerationState,
    ) -> Result<(), PipelineError> {
        let ctx = StageContext {
            model: &self.model,
            prompts: &self.prompts,
        };

        loop {
            let generated = dispatch_generate(stage, &ctx, state).await;
            let validation = match generated {
                Ok(()) => dispatch_validate(stage, state),
                Err(error) if error.is_retryable() => {
                    ValidationResult::from_findings(vec![error.to_string()], Vec::new())
                }
                Err(error) => return Err(error),
            };

            for warning in &validation.warnings {
                warn!(stage = %stage, warning = warning, "validator warning");
            }

            if validation.valid {
                finalize_stage(stage, state)?;
                state.clear_stage_transients(stage);
                return Ok(());
            }

            let attempts = state.attempts(stage);
            if attempts < self.retry_budget {
                warn!(
                    stage = %stage,
                    attempt = attempts.saturating_add(1),
                    errors = validation.errors.join("; "),
                    "stage rejected; retrying with repair context"
                );
                state.record_failed_attempt(stage, validation);
            } else {
                return Err(PipelineError::StageFailed {
                    stage,
                    reason: format!(
                        "retry budget exhausted after {} attempts",
                        attempts.saturating_add(1)
                    ),
                    last_errors: validation.errors,
                });
            }
        }
    }
}

/// Invoke a generative stage's generator.
async fn dispatch_generate(
    stage: Stage,
    ctx: &StageContext<'_>,
    state: &mut GenerationState,
) -> Result<(), PipelineError> {
    match stage {
        Stage::GenerateTemplate => template::generate(ctx, state).await,
        Stage::GenerateEvents => events::generate(ctx, state).await,
        Stage::GenerateCharacters => characters::generate(ctx, state).await,
        Stage::GenerateLocations => locations::generate(ctx, state).await,
        Stage::DescribeFacts => facts::generate(ctx, state).await,
        Stage::GenerateIntroduction => introduction::generate(ctx, state).await,
        Stage::BuildCasebook => casebook::generate(ctx, state).await,
        Stage::GenerateProse => prose::generate(ctx, state).await,
        Stage::GenerateQuestions => questions::generate(ctx, state).await,
        Stage::DeriveKnowledge
        | Stage::BuildFactGraph
        | Stage::ComputeOptimalPath
        | Stage::StoreCase => Err(PipelineError::Fatal {
            stage,
            message: String::from("deterministic stage dispatched as generative"),
        }),
    }
}

/// Invoke a generative stage's validator. Stages without one (prose)
/// always pass.
fn dispatch_validate(stage: Stage, state: &mut GenerationState) -> ValidationResult {
    match stage {
        Stage::GenerateTemplate => template::validate(state),
        Stage::GenerateEvents => events::validate(state),
        Stage::GenerateCharacters => characters::validate(state),
        Stage::GenerateLocations => locations::validate(state),
        Stage::DescribeFacts => facts::validate(state),
        Stage::GenerateIntroduction => introduction::validate(state),
        Stage::BuildCasebook => casebook::validate(state),
        Stage::GenerateQuestions => questions::validate(state),
        _ => ValidationResult::ok(),
    }
}

/// Stage-specific post-validation step.
///
/// Characters: the role-to-character rewrite of the event chain runs
/// only once the mapping has validated, so a rejected attempt never
/// leaves the events half-rewritten.
fn finalize_stage(stage: Stage, state: &mut GenerationState) -> Result<(), PipelineError> {
    match stage {
        Stage::GenerateCharacters => characters::apply_role_rewrite(state),
        _ => Ok(()),
    }
}
