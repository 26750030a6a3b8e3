//! S5: fact skeletons and the reachable bipartite fact/subject graph.
//!
//! Collects fact skeletons from event reveals (deduplicated by fact id,
//! unioning subjects), emits false counterpart skeletons for every
//! denial, builds the bipartite graph, and then guarantees **directed
//! reachability** -- from the seed fact, the traversal
//! `fact -> subjects -> subjectToFacts -> fact` must reach every
//! subject and fact.
//!
//! Reveal sources: a character reveals the facts they know, suspect, or
//! believe, and a denier additionally reveals the false counterpart
//! their denial produced (the lie surfaces when the player presses
//! them). A location reveals its surviving physical evidence plus every
//! fact that references it.
//!
//! Where reachability falls short, true bridge facts are synthesized
//! from reachable characters to unreachable subjects, round-robin over
//! the sorted reachable character list, and appended to the carrying
//! character's knowledge. An unreachable fact whose subjects are all
//! already reachable (every holder hides it) instead gets one of its
//! character subjects granted a revealable stance. Finally, red-herring
//! facts are attached to the least-revealing characters, paired with
//! the location whose reveal set overlaps theirs least.
//!
//! Re-running the stage first strips every synthetic (`fact_bridge_`,
//! `fact_red_herring_`) knowledge entry, so repeated runs never
//! accumulate bridges from previous attempts.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use caseforge_types::{
    CaseEvent, Character, CharacterId, FactGraph, FactId, FactSkeleton, FactSource,
    GenerationState, KnowledgeStatus, Location, LocationId, RoleId, Stage, SubjectId,
    sort_events_chronologically,
};
use tracing::{debug, info};

use crate::error::{PipelineError, require};

/// Safety cap on bridge-synthesis iterations.
const MAX_BRIDGE_ITERATIONS: usize = 100;

/// Red-herring count: `min(3, max(1, totalSkeletons / 5))`.
const MAX_RED_HERRINGS: usize = 3;

/// Build the fact skeletons and the reachable graph, mutating character
/// knowledge with synthesized bridge and red-herring facts.
pub fn build(state: &mut GenerationState) -> Result<(), PipelineError> {
    // Clean-on-rerun: strip synthetic knowledge from previous attempts.
    if let Some(characters) = state.characters.as_mut() {
        for character in characters.iter_mut() {
            character.knowledge.retain(|fact, _| !fact.is_synthetic());
        }
    }

    let events = require(&state.events, Stage::BuildFactGraph, "events")?;
    let role_mapping = require(&state.role_mapping, Stage::BuildFactGraph, "roleMapping")?;
    let computed = require(
        &state.computed_knowledge,
        Stage::BuildFactGraph,
        "computedKnowledge",
    )?;
    let mut characters: Vec<Character> =
        require(&state.characters, Stage::BuildFactGraph, "characters")?.clone();
    characters.sort_by(|a, b| a.id.cmp(&b.id));
    let locations: Vec<Location> =
        require(&state.locations, Stage::BuildFactGraph, "locations")?.clone();
    let location_reveals = computed.location_reveals.clone();

    let mut sorted_events = events.clone();
    sort_events_chronologically(&mut sorted_events);

    // Step 1: event-reveal skeletons, deduplicated with subject union.
    let mut skeletons: Vec<FactSkeleton> = Vec::new();
    let mut index_by_id: BTreeMap<FactId, usize> = BTreeMap::new();
    collect_event_skeletons(
        &sorted_events,
        role_mapping,
        &mut skeletons,
        &mut index_by_id,
    );

    // Step 2: denial skeletons, first denier wins.
    collect_denial_skeletons(&characters, &mut skeletons, &mut index_by_id);

    // Steps 3-5: build the graph, then bridge until everything is
    // reachable from the seed.
    let mut graph;
    let mut iterations = 0usize;
    loop {
        graph = build_graph(&skeletons, &characters, &locations, &location_reveals);

        let Some(seed) = skeletons.first().map(|s| s.id.clone()) else {
            return Err(PipelineError::Fatal {
                stage: Stage::BuildFactGraph,
                message: String::from("no fact skeletons were collected from the events"),
            });
        };
        let (reachable_facts, reachable_subjects) = reachable_from(&graph, &seed);

        let all_subjects = graph.all_subjects();
        let all_facts: BTreeSet<FactId> = index_by_id.keys().cloned().collect();
        let unreachable_subjects: Vec<SubjectId> = all_subjects
            .difference(&reachable_subjects)
            .cloned()
            .collect();
        let unreachable_facts: Vec<FactId> =
            all_facts.difference(&reachable_facts).cloned().collect();

        if unreachable_subjects.is_empty() && unreachable_facts.is_empty() {
            break;
        }

        iterations = iterations.saturating_add(1);
        if iterations > MAX_BRIDGE_ITERATIONS {
            return Err(unreachable_error(
                "bridge synthesis did not converge",
                &unreachable_subjects,
                &unreachable_facts,
            ));
        }

        let reachable_characters: Vec<CharacterId> = characters
            .iter()
            .map(|c| c.id.clone())
            .filter(|id| reachable_subjects.contains(&SubjectId::from(id)))
            .collect();
        if reachable_characters.is_empty() {
            return Err(unreachable_error(
                "no reachable character can serve as a bridge source",
                &unreachable_subjects,
                &unreachable_facts,
            ));
        }

        debug!(
            iteration = iterations,
            unreachable_subjects = unreachable_subjects.len(),
            unreachable_facts = unreachable_facts.len(),
            "synthesizing bridges"
        );

        let unreachable_subject_set: BTreeSet<&SubjectId> =
            unreachable_subjects.iter().collect();

        let mut progress = 0usize;
        for (index, subject) in unreachable_subjects.iter().enumerate() {
            let source = index
                .checked_rem(reachable_characters.len())
                .and_then(|i| reachable_characters.get(i));
            let Some(source) = source else { continue };
            if emit_bridge(
                source,
                subject,
                &mut skeletons,
                &mut index_by_id,
                &mut characters,
            ) {
                progress = progress.saturating_add(1);
            }
        }

        // Unreachable facts whose subjects are all already reachable:
        // nothing above will expose them (every holder hides or denies
        // them), so grant one of their character subjects a revealable
        // stance instead. Facts with a freshly bridged subject are left
        // for the next rebuild, which may expose them through it.
        for fact in &unreachable_facts {
            let subjects = graph
                .fact_to_subjects
                .get(fact)
                .map(Vec::as_slice)
                .unwrap_or_default();
            if subjects
                .iter()
                .any(|s| unreachable_subject_set.contains(s))
            {
                continue;
            }
            if grant_revealer(fact, subjects, &skeletons, &index_by_id, &mut characters) {
                progress = progress.saturating_add(1);
            }
        }

        if progress == 0 {
            // Nothing left to bridge or grant, yet parts of the graph
            // stay dark: some fact can be revealed by no subject at all.
            return Err(unreachable_error(
                "no further bridges can connect the remaining nodes",
                &unreachable_subjects,
                &unreachable_facts,
            ));
        }
    }

    // Step 6: red herrings on the least-revealing characters.
    let herrings = plan_red_herrings(&skeletons, &characters, &locations, &graph);
    for (character_id, location) in herrings {
        emit_red_herring(
            &character_id,
            location.as_ref(),
            &mut skeletons,
            &mut index_by_id,
            &mut characters,
        );
    }
    graph = build_graph(&skeletons, &characters, &locations, &location_reveals);

    info!(
        skeletons = skeletons.len(),
        subjects = graph.all_subjects().len(),
        "fact graph built"
    );

    state.characters = Some(characters);
    state.fact_skeletons = Some(skeletons);
    state.fact_graph = Some(graph);
    Ok(())
}

/// Collect deduplicated event-reveal skeletons in chronological order.
fn collect_event_skeletons(
    sorted_events: &[CaseEvent],
    role_mapping: &BTreeMap<RoleId, CharacterId>,
    skeletons: &mut Vec<FactSkeleton>,
    index_by_id: &mut BTreeMap<FactId, usize>,
) {
    for event in sorted_events {
        for reveal in &event.reveals {
            let subjects: BTreeSet<SubjectId> = reveal
                .subjects
                .iter()
                .map(|s| {
                    role_mapping
                        .get(&RoleId::new(s.as_str()))
                        .map_or_else(|| s.clone(), SubjectId::from)
                })
                .collect();

            if let Some(&index) = index_by_id.get(&reveal.fact_id) {
                if let Some(existing) = skeletons.get_mut(index) {
                    let mut union: BTreeSet<SubjectId> =
                        existing.subjects.iter().cloned().collect();
                    union.extend(subjects);
                    existing.subjects = union.into_iter().collect();
                }
            } else {
                index_by_id.insert(reveal.fact_id.clone(), skeletons.len());
                skeletons.push(FactSkeleton {
                    id: reveal.fact_id.clone(),
                    subjects: subjects.into_iter().collect(),
                    veracity: true,
                    source: FactSource::EventReveal {
                        event_id: event.id.clone(),
                    },
                });
            }
        }
    }
}

/// Emit a `{factId}_false` skeleton for every denied fact that exists.
fn collect_denial_skeletons(
    characters: &[Character],
    skeletons: &mut Vec<FactSkeleton>,
    index_by_id: &mut BTreeMap<FactId, usize>,
) {
    let mut denials = Vec::new();
    for character in characters {
        for (fact, status) in &character.knowledge {
            if *status == KnowledgeStatus::Denies && index_by_id.contains_key(fact) {
                denials.push((character.id.clone(), fact.clone()));
            }
        }
    }

    for (character_id, denied) in denials {
        let denial_id = denied.denial();
        if index_by_id.contains_key(&denial_id) {
            continue;
        }
        let subjects = index_by_id
            .get(&denied)
            .and_then(|&i| skeletons.get(i))
            .map(|s| s.subjects.clone())
            .unwrap_or_default();
        index_by_id.insert(denial_id.clone(), skeletons.len());
        skeletons.push(FactSkeleton {
            id: denial_id,
            subjects,
            veracity: false,
            source: FactSource::Denial {
                character_id,
                denied_fact_id: denied,
            },
        });
    }
}

/// Build the bipartite graph from the current skeletons and knowledge.
fn build_graph(
    skeletons: &[FactSkeleton],
    characters: &[Character],
    locations: &[Location],
    location_reveals: &BTreeMap<LocationId, Vec<FactId>>,
) -> FactGraph {
    let skeleton_ids: BTreeSet<&FactId> = skeletons.iter().map(|s| &s.id).collect();

    let fact_to_subjects: BTreeMap<FactId, Vec<SubjectId>> = skeletons
        .iter()
        .map(|s| (s.id.clone(), s.subjects.clone()))
        .collect();

    let mut subject_to_facts: BTreeMap<SubjectId, Vec<FactId>> = BTreeMap::new();

    // Characters reveal what they know, suspect, or believe -- as long
    // as the fact actually exists. A denier additionally reveals the
    // false counterpart their denial produced.
    for character in characters {
        let mut facts: BTreeSet<FactId> = character
            .revealable_facts()
            .filter(|f| skeleton_ids.contains(f))
            .cloned()
            .collect();
        for (fact, status) in &character.knowledge {
            if *status == KnowledgeStatus::Denies {
                let denial = fact.denial();
                if skeleton_ids.contains(&denial) {
                    facts.insert(denial);
                }
            }
        }
        subject_to_facts.insert(
            SubjectId::from(&character.id),
            facts.into_iter().collect(),
        );
    }

    // Locations reveal their surviving physical evidence plus every
    // fact that references them.
    for location in locations {
        let mut facts: BTreeSet<FactId> = location_reveals
            .get(&location.id)
            .into_iter()
            .flatten()
            .filter(|f| skeleton_ids.contains(f))
            .cloned()
            .collect();
        let as_subject = SubjectId::from(&location.id);
        for skeleton in skeletons {
            if skeleton.subjects.contains(&as_subject) {
                facts.insert(skeleton.id.clone());
            }
        }
        if !facts.is_empty() {
            subject_to_facts.insert(as_subject, facts.into_iter().collect());
        }
    }

    FactGraph {
        fact_to_subjects,
        subject_to_facts,
    }
}

/// BFS over the bipartite graph from a seed fact.
pub fn reachable_from(
    graph: &FactGraph,
    seed: &FactId,
) -> (BTreeSet<FactId>, BTreeSet<SubjectId>) {
    let mut facts = BTreeSet::new();
    let mut subjects = BTreeSet::new();
    let mut queue = VecDeque::new();

    facts.insert(seed.clone());
    queue.push_back(seed.clone());

    while let Some(fact) = queue.pop_front() {
        for subject in graph.fact_to_subjects.get(&fact).into_iter().flatten() {
            if subjects.insert(subject.clone()) {
                for next in graph.subject_to_facts.get(subject).into_iter().flatten() {
                    if facts.insert(next.clone()) {
                        queue.push_back(next.clone());
                    }
                }
            }
        }
    }

    (facts, subjects)
}

/// Synthesize one bridge fact and append it to the source character's
/// knowledge. Returns false when the bridge already exists.
fn emit_bridge(
    source: &CharacterId,
    target: &SubjectId,
    skeletons: &mut Vec<FactSkeleton>,
    index_by_id: &mut BTreeMap<FactId, usize>,
    characters: &mut [Character],
) -> bool {
    let bridge_id = FactId::new(format!("fact_bridge_{source}_to_{target}"));
    if index_by_id.contains_key(&bridge_id) {
        return false;
    }

    index_by_id.insert(bridge_id.clone(), skeletons.len());
    skeletons.push(FactSkeleton {
        id: bridge_id.clone(),
        subjects: vec![SubjectId::from(source), target.clone()],
        veracity: true,
        source: FactSource::Bridge {
            from_character_id: source.clone(),
            to_subject: target.clone(),
        },
    });

    if let Some(character) = characters.iter_mut().find(|c| &c.id == source) {
        character
            .knowledge
            .insert(bridge_id, KnowledgeStatus::Knows);
    }
    true
}

/// Grant a revealable stance on `fact` to its first character subject
/// without an existing entry (an existing entry here is a hider or
/// denier, whose silence stands). True facts are held as `suspects`,
/// false ones as `believes`, so the `knows` baseline stays untouched.
///
/// Returns false when no subject can take the fact.
fn grant_revealer(
    fact: &FactId,
    subjects: &[SubjectId],
    skeletons: &[FactSkeleton],
    index_by_id: &BTreeMap<FactId, usize>,
    characters: &mut [Character],
) -> bool {
    let veracity = index_by_id
        .get(fact)
        .and_then(|&i| skeletons.get(i))
        .is_none_or(|s| s.veracity);
    let stance = if veracity {
        KnowledgeStatus::Suspects
    } else {
        KnowledgeStatus::Believes
    };

    for subject in subjects {
        let Some(character) = characters
            .iter_mut()
            .find(|c| c.id.as_str() == subject.as_str())
        else {
            continue;
        };
        if character.knowledge.contains_key(fact) {
            continue;
        }
        debug!(fact = %fact, character = %character.id, stance = ?stance, "granted revealer");
        character.knowledge.insert(fact.clone(), stance);
        return true;
    }
    false
}

/// Choose red-herring carriers and their paired locations.
///
/// Carriers are the characters with the fewest revealable facts
/// (ascending count, then id). Each is paired with the location whose
/// revealable-fact set overlaps theirs least.
fn plan_red_herrings(
    skeletons: &[FactSkeleton],
    characters: &[Character],
    locations: &[Location],
    graph: &FactGraph,
) -> Vec<(CharacterId, Option<LocationId>)> {
    let target = skeletons
        .len()
        .checked_div(5)
        .unwrap_or(0)
        .clamp(1, MAX_RED_HERRINGS);

    let reveal_set = |subject: &SubjectId| -> BTreeSet<&FactId> {
        graph
            .subject_to_facts
            .get(subject)
            .into_iter()
            .flatten()
            .collect()
    };

    let mut carriers: Vec<&Character> = characters.iter().collect();
    carriers.sort_by_key(|c| (reveal_set(&SubjectId::from(&c.id)).len(), c.id.clone()));

    carriers
        .into_iter()
        .take(target)
        .map(|character| {
            let own = reveal_set(&SubjectId::from(&character.id));
            let best = locations
                .iter()
                .map(|l| {
                    let overlap = reveal_set(&SubjectId::from(&l.id))
                        .intersection(&own)
                        .count();
                    (overlap, l.id.clone())
                })
                .min();
            (character.id.clone(), best.map(|(_, id)| id))
        })
        .collect()
}

/// Synthesize one red-herring fact for a carrier character.
fn emit_red_herring(
    character_id: &CharacterId,
    location: Option<&LocationId>,
    skeletons: &mut Vec<FactSkeleton>,
    index_by_id: &mut BTreeMap<FactId, usize>,
    characters: &mut [Character],
) {
    let herring_id = FactId::new(format!("fact_red_herring_{character_id}"));
    if index_by_id.contains_key(&herring_id) {
        return;
    }

    let mut subjects = vec![SubjectId::from(character_id)];
    if let Some(location) = location {
        subjects.push(SubjectId::from(location));
    }

    index_by_id.insert(herring_id.clone(), skeletons.len());
    skeletons.push(FactSkeleton {
        id: herring_id.clone(),
        subjects,
        veracity: true,
        source: FactSource::RedHerring,
    });

    if let Some(character) = characters.iter_mut().find(|c| &c.id == character_id) {
        character
            .knowledge
            .insert(herring_id, KnowledgeStatus::Knows);
    }
}

/// Build the fatal reachability error with offending id lists.
fn unreachable_error(
    reason: &str,
    unreachable_subjects: &[SubjectId],
    unreachable_facts: &[FactId],
) -> PipelineError {
    let subjects: Vec<String> = unreachable_subjects.iter().map(ToString::to_string).collect();
    let facts: Vec<String> = unreachable_facts.iter().map(ToString::to_string).collect();
    PipelineError::Fatal {
        stage: Stage::BuildFactGraph,
        message: format!(
            "{reason}; unreachable subjects: [{}]; unreachable facts: [{}]",
            subjects.join(", "),
            facts.join(", ")
        ),
    }
}
