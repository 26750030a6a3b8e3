//! Core entity structs for generated mystery cases.
//!
//! Covers the template skeleton, the causal event chain, characters with
//! knowledge states, the location graph, facts and fact skeletons, the
//! bipartite fact graph, casebook entries, quiz questions, and the final
//! assembled [`Case`].
//!
//! All externally visible JSON uses camelCase field names: the structs
//! here are the wire format for persisted drafts, resume requests, and
//! finalized cases. Containers are `BTreeMap`/`BTreeSet` so serialized
//! output never depends on hash iteration order.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{
    Difficulty, FactCategory, Involvement, KnowledgeStatus, MysteryStyle, NarrativeTone, Necessity,
};
use crate::ids::{
    CharacterId, EntryId, EventId, FactId, LocationId, QuestionId, RoleId, SubjectId,
};

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// Root structural skeleton produced by the template stage.
///
/// Everything downstream hangs off this blueprint: event slots become
/// events, roles become characters, and the style/tone pair steers every
/// prose pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// The crime at the heart of the case (e.g. "theft", "murder").
    pub crime_type: String,
    /// Working title; the introduction stage finalizes it.
    pub title: String,
    /// Historical era the case is set in.
    pub era: String,
    /// In-world date of the case.
    pub date: String,
    /// Atmospheric framing for prose stages.
    pub atmosphere: String,
    /// Structural flavor of the mystery.
    pub style: MysteryStyle,
    /// Narrative voice for all prose.
    pub tone: NarrativeTone,
    /// Causal skeleton: slots the event stage fills in, forming a DAG.
    pub event_slots: Vec<EventSlot>,
    /// Cast skeleton: roles the character stage fills in.
    pub roles: Vec<RoleSpec>,
    /// Difficulty tier the template was sized for.
    pub difficulty: Difficulty,
}

impl Template {
    /// Slots with no causal parents (roots of the event DAG).
    pub fn root_slots(&self) -> impl Iterator<Item = &EventSlot> {
        self.event_slots.iter().filter(|s| s.caused_by.is_empty())
    }

    /// Number of slots marked as required for the solution.
    pub fn required_slot_count(&self) -> usize {
        self.event_slots
            .iter()
            .filter(|s| s.necessity == Some(Necessity::Required))
            .count()
    }
}

/// One slot in the template's causal skeleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSlot {
    /// Slot id, reused as the event id when the slot is filled (`E*`).
    pub id: EventId,
    /// What is supposed to happen in this slot.
    pub description: String,
    /// `required` when the slot is load-bearing, unset otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub necessity: Option<Necessity>,
    /// Slot ids that causally precede this one.
    #[serde(default)]
    pub caused_by: Vec<EventId>,
}

/// One character role in the template's cast skeleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    /// Role id (`role_*`), remapped to a character id by the character stage.
    pub id: RoleId,
    /// Short label for the role (e.g. "the estranged heir").
    pub label: String,
    /// What this role is for in the mystery's machinery.
    pub description: String,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A node in the causal event DAG.
///
/// Before the character stage, `agent` and the involvement keys are role
/// ids; afterwards they are character ids. `location` starts as a
/// placeholder id that the location stage must realize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseEvent {
    /// Event id (`E*`), matching the template slot it fills.
    pub id: EventId,
    /// What happened.
    pub description: String,
    /// Monotonic ordering index; gaps are allowed.
    pub timestamp: u64,
    /// The role (later character) who performed the event. Must appear
    /// in `involvement` with type `agent`.
    pub agent: SubjectId,
    /// Where the event happened.
    pub location: LocationId,
    /// Who was involved and how.
    pub involvement: BTreeMap<SubjectId, Involvement>,
    /// `required` when the event is load-bearing, unset otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub necessity: Option<Necessity>,
    /// Forward causal edges to later events.
    #[serde(default)]
    pub causes: Vec<EventId>,
    /// Knowledge the event produces.
    pub reveals: Vec<EventReveal>,
}

/// An atomic piece of knowledge produced by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReveal {
    /// The fact this reveal establishes.
    pub fact_id: FactId,
    /// Whether the reveal can be heard.
    pub audible: bool,
    /// Whether the reveal can be seen.
    pub visible: bool,
    /// Whether the reveal leaves a physical trace at the location.
    pub physical: bool,
    /// Non-empty list of role and/or location ids the fact is about.
    pub subjects: Vec<SubjectId>,
}

/// Sort events by (timestamp, id) so iteration order is total even when
/// the generator reuses a timestamp.
pub fn sort_events_chronologically(events: &mut [CaseEvent]) {
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ---------------------------------------------------------------------------
// Characters
// ---------------------------------------------------------------------------

/// A member of the cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    /// Character id (`char_*`).
    pub id: CharacterId,
    /// Full name.
    pub name: String,
    /// Function in the mystery's machinery (internal, never shown to
    /// players).
    pub mystery_role: String,
    /// The role shown to players (occupation, station).
    pub societal_role: String,
    /// Physical and social description.
    pub description: String,
    /// What drives this character.
    pub motivations: Vec<String>,
    /// Epistemic stance toward each fact the character has an opinion on.
    pub knowledge: BTreeMap<FactId, KnowledgeStatus>,
    /// How this character speaks.
    pub tone_profile: ToneProfile,
    /// Optional current status (e.g. "deceased", "missing").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
}

impl Character {
    /// Fact ids this character will reveal to the player
    /// (status `knows`, `suspects`, or `believes`).
    pub fn revealable_facts(&self) -> impl Iterator<Item = &FactId> {
        self.knowledge
            .iter()
            .filter(|(_, status)| status.is_revealable())
            .map(|(id, _)| id)
    }
}

/// Voice profile controlling how a character's dialogue reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToneProfile {
    /// Speech register (e.g. "clipped and formal").
    pub register: String,
    /// Characteristic words and phrases.
    #[serde(default)]
    pub vocabulary: Vec<String>,
    /// Optional verbal tic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quirk: Option<String>,
}

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

/// A place in the case world, with perception edges to other places.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Location id (`loc_*`).
    pub id: LocationId,
    /// Display name.
    pub name: String,
    /// Free-form type (building, room, street, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Description used by prose stages.
    pub description: String,
    /// Locations one can walk here from. Should be symmetric.
    #[serde(default)]
    pub accessible_from: Vec<LocationId>,
    /// Locations from which this place can be seen.
    #[serde(default)]
    pub visible_from: Vec<LocationId>,
    /// Locations from which sounds here can be heard.
    #[serde(default)]
    pub audible_from: Vec<LocationId>,
}

// ---------------------------------------------------------------------------
// Facts
// ---------------------------------------------------------------------------

/// A finalized fact: a skeleton merged with its generated description
/// and category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    /// Fact id (`fact_*`).
    pub id: FactId,
    /// Player-facing statement of the fact.
    pub description: String,
    /// Investigative category.
    pub category: FactCategory,
    /// Character and/or location ids the fact is about.
    pub subjects: Vec<SubjectId>,
    /// Whether the fact is true in the world. False facts come from
    /// denials and are never accepted quiz answers.
    pub veracity: bool,
}

/// An intermediate fact before its description and category exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactSkeleton {
    /// Fact id (`fact_*`).
    pub id: FactId,
    /// Character and/or location ids the fact is about.
    pub subjects: Vec<SubjectId>,
    /// Whether the fact is true in the world.
    pub veracity: bool,
    /// Where the skeleton came from.
    pub source: FactSource,
}

/// Provenance of a fact skeleton.
///
/// Tagged sum with an explicit `type` discriminator; validation switches
/// on the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum FactSource {
    /// Revealed by an event (first occurrence wins when deduplicating).
    EventReveal {
        /// The revealing event.
        event_id: EventId,
    },
    /// False counterpart emitted because a character denies a true fact.
    Denial {
        /// The denying character.
        character_id: CharacterId,
        /// The fact being denied.
        denied_fact_id: FactId,
    },
    /// Synthesized to connect an unreachable subject to the graph.
    Bridge {
        /// The reachable character who carries the bridge fact.
        from_character_id: CharacterId,
        /// The previously unreachable subject.
        to_subject: SubjectId,
    },
    /// True but irrelevant noise inserted for misdirection.
    RedHerring,
}

// ---------------------------------------------------------------------------
// Fact graph
// ---------------------------------------------------------------------------

/// The bipartite fact/subject graph.
///
/// Directed traversal `fact -> its subjects -> those subjects'
/// revealable facts -> ...` must reach every subject; the fact-graph
/// stage synthesizes bridge facts until it does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactGraph {
    /// Fact id to the subjects it is about.
    pub fact_to_subjects: BTreeMap<FactId, Vec<SubjectId>>,
    /// Subject id (character or location) to the facts it can reveal.
    pub subject_to_facts: BTreeMap<SubjectId, Vec<FactId>>,
}

impl FactGraph {
    /// Every subject that appears anywhere in the graph: as a key of
    /// `subjectToFacts` or as a subject of any fact.
    pub fn all_subjects(&self) -> BTreeSet<SubjectId> {
        let mut subjects: BTreeSet<SubjectId> = self.subject_to_facts.keys().cloned().collect();
        for fact_subjects in self.fact_to_subjects.values() {
            subjects.extend(fact_subjects.iter().cloned());
        }
        subjects
    }
}

// ---------------------------------------------------------------------------
// Computed knowledge
// ---------------------------------------------------------------------------

/// Deterministic knowledge products derived from the event chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedKnowledge {
    /// Per-role baseline: the facts each role truthfully learned through
    /// its event involvements (always status `knows`).
    pub role_knowledge: BTreeMap<RoleId, BTreeSet<FactId>>,
    /// Physical-evidence facts still present at each location after
    /// cleanup detection. Locations with nothing left are omitted.
    pub location_reveals: BTreeMap<LocationId, Vec<FactId>>,
}

// ---------------------------------------------------------------------------
// Casebook
// ---------------------------------------------------------------------------

/// A visitable node in the player-facing casebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CasebookEntry {
    /// Entry id (`entry_*`).
    pub id: EntryId,
    /// Player-facing label.
    pub label: String,
    /// Player-facing address line.
    pub address: String,
    /// Where visiting this entry takes the player.
    pub location: LocationId,
    /// Characters present at this entry.
    pub characters: Vec<CharacterId>,
    /// Facts the player learns by visiting.
    pub reveals: Vec<FactId>,
    /// OR-gate: knowing any one of these facts unlocks the entry.
    /// Never empty; only the introduction facts bootstrap a session.
    pub requires_any_fact: Vec<FactId>,
}

// ---------------------------------------------------------------------------
// Questions
// ---------------------------------------------------------------------------

/// A quiz question with a typed answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Question id (`q_*`).
    pub id: QuestionId,
    /// The question as posed to the player.
    pub text: String,
    /// The accepted answers.
    pub answer: Answer,
    /// Points awarded for a correct answer.
    pub points: u32,
    /// How hard the question is meant to be.
    pub difficulty: Difficulty,
}

/// Typed answer variants for quiz questions.
///
/// Tagged sum with an explicit `type` discriminator. A fact answer may
/// only accept true, reachable facts of the stated category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Answer {
    /// The answer is one of a set of characters.
    Person {
        /// Accepted character ids.
        accepted_ids: Vec<CharacterId>,
    },
    /// The answer is one of a set of locations.
    Location {
        /// Accepted location ids.
        accepted_ids: Vec<LocationId>,
    },
    /// The answer is one of a set of facts of a single category.
    Fact {
        /// The category every accepted fact must carry.
        fact_category: FactCategory,
        /// Accepted fact ids.
        accepted_ids: Vec<FactId>,
    },
}

impl Answer {
    /// The discriminator string for error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Person { .. } => "person",
            Self::Location { .. } => "location",
            Self::Fact { .. } => "fact",
        }
    }

    /// Whether the accepted id list is empty.
    pub const fn is_empty(&self) -> bool {
        match self {
            Self::Person { accepted_ids } => accepted_ids.is_empty(),
            Self::Location { accepted_ids } => accepted_ids.is_empty(),
            Self::Fact { accepted_ids, .. } => accepted_ids.is_empty(),
        }
    }
}

// ---------------------------------------------------------------------------
// Final case
// ---------------------------------------------------------------------------

/// A finalized, playable case: everything the pipeline produced,
/// assembled by the store stage and persisted append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    /// Calendar date keying the case in the cold store.
    pub case_date: NaiveDate,
    /// Final title.
    pub title: String,
    /// Difficulty the case was generated at.
    pub difficulty: Difficulty,
    /// Opening prose shown before the first casebook visit.
    pub introduction: String,
    /// The 2-4 seed facts the player starts with.
    pub introduction_fact_ids: Vec<FactId>,
    /// The causal event chain (post role-rewrite).
    pub events: Vec<CaseEvent>,
    /// The cast.
    pub characters: Vec<Character>,
    /// The world.
    pub locations: Vec<Location>,
    /// Every fact, true and false.
    pub facts: Vec<Fact>,
    /// The gated casebook.
    pub casebook: Vec<CasebookEntry>,
    /// Per-entry prose scenes.
    pub prose: BTreeMap<EntryId, String>,
    /// The quiz.
    pub questions: Vec<Question>,
    /// Precomputed optimal entry sequence.
    pub optimal_path: Vec<EntryId>,
    /// When generation finished.
    pub generated_at: DateTime<Utc>,
}
