//! Enumeration types for the Caseforge mystery generator.
//!
//! Closed vocabularies used across the pipeline: difficulty tiers,
//! template style and tone, perception-derived involvement, knowledge
//! statuses, fact categories, and the pipeline stage identifiers.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Difficulty
// ---------------------------------------------------------------------------

/// Requested difficulty tier for a generated case.
///
/// The tier drives template sizing: easy cases get 5-6 events and
/// characters, medium adds a red-herring thread, hard gets 8-10 events,
/// 8-12 characters, and multiple misleading threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Small cast, linear chain, no deliberate misdirection.
    Easy,
    /// Mid-size cast with one red-herring thread.
    #[default]
    Medium,
    /// Large cast with multiple misleading threads.
    Hard,
}

// ---------------------------------------------------------------------------
// Mystery style & narrative tone
// ---------------------------------------------------------------------------

/// Structural flavor of the mystery chosen by the template stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MysteryStyle {
    /// A closed circle of suspects in a confined setting.
    Isolated,
    /// Many threads across a wide setting.
    Sprawling,
    /// A countdown structure where timing dominates.
    TimeLimited,
    /// Nested revelations, each unlocking the next.
    Layered,
    /// Two seemingly unrelated strands that converge.
    Parallel,
}

/// Narrative voice the prose stages write in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeTone {
    /// Cynical, shadow-heavy urban register.
    Noir,
    /// Decaying grandeur and dread.
    Gothic,
    /// Warm, low-stakes village register.
    Cozy,
    /// Terse, worldly investigator register.
    Hardboiled,
    /// Wistful and elegiac.
    Melancholic,
    /// Social comedy with an edge.
    Satirical,
    /// Methodical, report-like register.
    Procedural,
    /// Sentiment and entanglement foregrounded.
    Romantic,
    /// The grotesque dwelt upon.
    Macabre,
}

// ---------------------------------------------------------------------------
// Involvement
// ---------------------------------------------------------------------------

/// How a role participates in an event.
///
/// Involvement drives the knowledge-derivation stage: it selects which
/// perception channels (audible, visible, physical) of the event's
/// reveals reach the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Involvement {
    /// The actor who performed the event. Learns every reveal.
    Agent,
    /// Physically present at the event. Learns every reveal.
    Present,
    /// Saw the event from elsewhere. Learns visible reveals only.
    WitnessVisual,
    /// Heard the event from elsewhere. Learns audible reveals only.
    WitnessAuditory,
    /// Found traces afterwards. Learns physical reveals only.
    DiscoveredEvidence,
}

impl Involvement {
    /// All permitted involvement values, for validation messages.
    pub const ALL: [Self; 5] = [
        Self::Agent,
        Self::Present,
        Self::WitnessVisual,
        Self::WitnessAuditory,
        Self::DiscoveredEvidence,
    ];
}

// ---------------------------------------------------------------------------
// Knowledge status
// ---------------------------------------------------------------------------

/// A character's epistemic stance toward a fact.
///
/// The event-knowledge baseline establishes `knows`; the character
/// generator may downgrade to `suspects`, `hides`, or `denies`, and may
/// hold `believes` toward false facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeStatus {
    /// Truthfully knows the fact and will reveal it.
    Knows,
    /// Has an inkling, will speak of it with hedges.
    Suspects,
    /// Knows but conceals unless pressed.
    Hides,
    /// Knows and actively denies; produces a false counterpart fact.
    Denies,
    /// Holds a false fact to be true.
    Believes,
}

impl KnowledgeStatus {
    /// Statuses under which a character will reveal the fact to the
    /// player, making it traversable in the fact graph.
    pub const fn is_revealable(self) -> bool {
        matches!(self, Self::Knows | Self::Suspects | Self::Believes)
    }
}

// ---------------------------------------------------------------------------
// Fact category
// ---------------------------------------------------------------------------

/// Investigative category assigned to a fact by the description stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    /// Why someone would have done it.
    Motive,
    /// How it could have been done.
    Means,
    /// Who had the chance to do it.
    Opportunity,
    /// Where someone claims to have been.
    Alibi,
    /// A connection between people.
    Relationship,
    /// When something happened.
    Timeline,
    /// A tangible trace left behind.
    PhysicalEvidence,
    /// Context that frames the case.
    Background,
    /// A fact about who someone is.
    Person,
    /// A fact about a place.
    Place,
}

// ---------------------------------------------------------------------------
// Necessity
// ---------------------------------------------------------------------------

/// Marks an event (or event slot) as required for the solution.
///
/// The template must produce at least three required events; unset means
/// the event is texture the solver may skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Necessity {
    /// The event is load-bearing for the solution path.
    Required,
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Identifier for one pipeline stage.
///
/// Serialized names (camelCase) are the wire format used in resume
/// requests (`startFromStep`) and per-stage model routing. The array
/// returned by [`Stage::all`] is the canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    /// S1: generate the structural template.
    GenerateTemplate,
    /// S2: fill event slots with concrete events (validated by S2v).
    GenerateEvents,
    /// S2k: derive baseline knowledge and location reveals.
    DeriveKnowledge,
    /// S3: generate characters, enforce the knowledge baseline, rewrite
    /// roles to characters (validated by S3v).
    GenerateCharacters,
    /// S4: generate the location graph (validated by S4v).
    GenerateLocations,
    /// S5: build fact skeletons and the reachable bipartite fact graph.
    BuildFactGraph,
    /// S6: generate fact descriptions and categories (validated by S6v).
    DescribeFacts,
    /// S7: pick introduction facts, write the opening, finalize the title.
    GenerateIntroduction,
    /// S8: build and polish the casebook (validated by S8v reachability).
    BuildCasebook,
    /// S9: write per-entry prose scenes.
    GenerateProse,
    /// S10: generate the quiz (validated by S10v).
    GenerateQuestions,
    /// S11: compute the gate-aware optimal path.
    ComputeOptimalPath,
    /// S12: assemble and store the final case.
    StoreCase,
}

impl Stage {
    /// Every stage in canonical execution order.
    pub const fn all() -> [Self; 13] {
        [
            Self::GenerateTemplate,
            Self::GenerateEvents,
            Self::DeriveKnowledge,
            Self::GenerateCharacters,
            Self::GenerateLocations,
            Self::BuildFactGraph,
            Self::DescribeFacts,
            Self::GenerateIntroduction,
            Self::BuildCasebook,
            Self::GenerateProse,
            Self::GenerateQuestions,
            Self::ComputeOptimalPath,
            Self::StoreCase,
        ]
    }

    /// Whether this stage invokes the generative model.
    ///
    /// `BuildCasebook` is hybrid: a deterministic skeleton phase followed
    /// by a generative polish pass, so it counts as generative for retry
    /// accounting.
    pub const fn is_generative(self) -> bool {
        matches!(
            self,
            Self::GenerateTemplate
                | Self::GenerateEvents
                | Self::GenerateCharacters
                | Self::GenerateLocations
                | Self::DescribeFacts
                | Self::GenerateIntroduction
                | Self::BuildCasebook
                | Self::GenerateProse
                | Self::GenerateQuestions
        )
    }

    /// Whether a run may be resumed starting at this stage.
    ///
    /// The template seeds the whole run, so `generateTemplate` is not a
    /// valid resume point.
    pub const fn is_resumable(self) -> bool {
        !matches!(self, Self::GenerateTemplate)
    }

    /// The serialized (camelCase) name of this stage.
    pub const fn name(self) -> &'static str {
        match self {
            Self::GenerateTemplate => "generateTemplate",
            Self::GenerateEvents => "generateEvents",
            Self::DeriveKnowledge => "deriveKnowledge",
            Self::GenerateCharacters => "generateCharacters",
            Self::GenerateLocations => "generateLocations",
            Self::BuildFactGraph => "buildFactGraph",
            Self::DescribeFacts => "describeFacts",
            Self::GenerateIntroduction => "generateIntroduction",
            Self::BuildCasebook => "buildCasebook",
            Self::GenerateProse => "generateProse",
            Self::GenerateQuestions => "generateQuestions",
            Self::ComputeOptimalPath => "computeOptimalPath",
            Self::StoreCase => "storeCase",
        }
    }
}

impl core::fmt::Display for Stage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
