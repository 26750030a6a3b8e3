//! S11: compute the gate-aware optimal path through the casebook.
//!
//! Greedy set cover under gate constraints. Starting from the
//! introduction facts, each iteration visits the eligible entry that
//! newly satisfies the most unsatisfied questions (ties broken by the
//! larger reveal set, then entry id). When no eligible entry satisfies
//! anything new, a **bridge step** visits the entry that newly unlocks
//! the most currently-ineligible entries (ties by newly revealed
//! facts, then id). If even the bridge step unlocks nothing, the case
//! is unsolvable and the stage raises a fatal coherence error.
//!
//! A question is satisfied once any of its accepted answers is
//! discoverable: a fact answer needs an accepted fact discovered; a
//! person or location answer needs any discovered fact whose subjects
//! include an accepted id.
//!
//! The computed path is replayed as a post-condition: every gate must
//! hold at visit time and every question must end satisfied.

use std::collections::{BTreeMap, BTreeSet};

use caseforge_types::{
    Answer, CasebookEntry, EntryId, FactId, GenerationState, Question, Stage, SubjectId,
};
use tracing::{debug, info};

use crate::error::{PipelineError, require};

/// Compute the optimal path and store it.
pub fn compute(state: &mut GenerationState) -> Result<(), PipelineError> {
    let casebook = require(&state.casebook, Stage::ComputeOptimalPath, "casebook")?;
    let questions = require(&state.questions, Stage::ComputeOptimalPath, "questions")?;
    let facts = require(&state.facts, Stage::ComputeOptimalPath, "facts")?;
    let intro = require(
        &state.introduction_fact_ids,
        Stage::ComputeOptimalPath,
        "introductionFactIds",
    )?;

    let subjects_of: BTreeMap<&FactId, &[SubjectId]> = facts
        .iter()
        .map(|f| (&f.id, f.subjects.as_slice()))
        .collect();

    let mut discovered: BTreeSet<FactId> = intro.iter().cloned().collect();
    let mut satisfied: BTreeSet<usize> = questions
        .iter()
        .enumerate()
        .filter(|(_, q)| is_satisfied(q, &discovered, &subjects_of))
        .map(|(i, _)| i)
        .collect();
    let mut visited: BTreeSet<EntryId> = BTreeSet::new();
    let mut path: Vec<EntryId> = Vec::new();

    while satisfied.len() < questions.len() {
        let eligible: Vec<&CasebookEntry> = casebook
            .iter()
            .filter(|e| !visited.contains(&e.id) && gate_open(e, &discovered))
            .collect();
        if eligible.is_empty() {
            return Err(unsolvable(questions, &satisfied));
        }

        // Score by newly satisfied questions.
        let best = eligible
            .iter()
            .map(|entry| {
                let mut trial = discovered.clone();
                trial.extend(entry.reveals.iter().cloned());
                let newly = questions
                    .iter()
                    .enumerate()
                    .filter(|(i, q)| {
                        !satisfied.contains(i) && is_satisfied(q, &trial, &subjects_of)
                    })
                    .count();
                (newly, entry.reveals.len(), entry)
            })
            .max_by(|a, b| {
                a.0.cmp(&b.0)
                    .then(a.1.cmp(&b.1))
                    .then(b.2.id.cmp(&a.2.id))
            });

        let chosen = match best {
            Some((newly, _, entry)) if newly > 0 => {
                debug!(entry = %entry.id, newly_satisfied = newly, "greedy step");
                entry
            }
            _ => {
                // Bridge step: unlock the most new entries.
                let bridge = eligible
                    .iter()
                    .map(|entry| {
                        let mut trial = discovered.clone();
                        trial.extend(entry.reveals.iter().cloned());
                        let unlocked = casebook
                            .iter()
                            .filter(|other| {
                                !visited.contains(&other.id)
                                    && other.id != entry.id
                                    && !gate_open(other, &discovered)
                                    && gate_open(other, &trial)
                            })
                            .count();
                        let new_facts = entry
                            .reveals
                            .iter()
                            .filter(|f| !discovered.contains(*f))
                            .count();
                        (unlocked, new_facts, entry)
                    })
                    .max_by(|a, b| {
                        a.0.cmp(&b.0)
                            .then(a.1.cmp(&b.1))
                            .then(b.2.id.cmp(&a.2.id))
                    });
                match bridge {
                    Some((unlocked, _, entry)) if unlocked > 0 => {
                        debug!(entry = %entry.id, newly_unlocked = unlocked, "bridge step");
                        entry
                    }
                    _ => return Err(unsolvable(questions, &satisfied)),
                }
            }
        };

        visited.insert(chosen.id.clone());
        path.push(chosen.id.clone());
        discovered.extend(chosen.reveals.iter().cloned());
        for (i, question) in questions.iter().enumerate() {
            if !satisfied.contains(&i) && is_satisfied(question, &discovered, &subjects_of) {
                satisfied.insert(i);
            }
        }
    }

    replay_check(casebook, questions, intro, &subjects_of, &path)?;

    info!(steps = path.len(), "optimal path computed");
    state.optimal_path = Some(path);
    Ok(())
}

/// Whether any gate fact has been discovered.
fn gate_open(entry: &CasebookEntry, discovered: &BTreeSet<FactId>) -> bool {
    entry
        .requires_any_fact
        .iter()
        .any(|gate| discovered.contains(gate))
        || entry.requires_any_fact.is_empty()
}

/// Whether a question's answer is discoverable from the given facts.
fn is_satisfied(
    question: &Question,
    discovered: &BTreeSet<FactId>,
    subjects_of: &BTreeMap<&FactId, &[SubjectId]>,
) -> bool {
    match &question.answer {
        Answer::Fact { accepted_ids, .. } => {
            accepted_ids.iter().any(|id| discovered.contains(id))
        }
        Answer::Person { accepted_ids } => {
            let accepted: BTreeSet<&str> =
                accepted_ids.iter().map(caseforge_types::CharacterId::as_str).collect();
            discovered_mentions(discovered, subjects_of, &accepted)
        }
        Answer::Location { accepted_ids } => {
            let accepted: BTreeSet<&str> =
                accepted_ids.iter().map(caseforge_types::LocationId::as_str).collect();
            discovered_mentions(discovered, subjects_of, &accepted)
        }
    }
}

/// Whether any discovered fact has a subject among the accepted ids.
fn discovered_mentions(
    discovered: &BTreeSet<FactId>,
    subjects_of: &BTreeMap<&FactId, &[SubjectId]>,
    accepted: &BTreeSet<&str>,
) -> bool {
    discovered.iter().any(|fact| {
        subjects_of
            .get(fact)
            .is_some_and(|subjects| subjects.iter().any(|s| accepted.contains(s.as_str())))
    })
}

/// Build the fatal unsolvable error, naming the unsatisfied questions.
fn unsolvable(questions: &[Question], satisfied: &BTreeSet<usize>) -> PipelineError {
    let unsatisfied: Vec<String> = questions
        .iter()
        .enumerate()
        .filter(|(i, _)| !satisfied.contains(i))
        .map(|(_, q)| q.id.to_string())
        .collect();
    PipelineError::Fatal {
        stage: Stage::ComputeOptimalPath,
        message: format!(
            "no entry makes progress; unsatisfied questions: [{}]",
            unsatisfied.join(", ")
        ),
    }
}

/// Replay the path, confirming gate feasibility at every step and full
/// question coverage at the end.
fn replay_check(
    casebook: &[CasebookEntry],
    questions: &[Question],
    intro: &[FactId],
    subjects_of: &BTreeMap<&FactId, &[SubjectId]>,
    path: &[EntryId],
) -> Result<(), PipelineError> {
    let mut discovered: BTreeSet<FactId> = intro.iter().cloned().collect();
    for entry_id in path {
        let Some(entry) = casebook.iter().find(|e| &e.id == entry_id) else {
            return Err(PipelineError::Fatal {
                stage: Stage::ComputeOptimalPath,
                message: format!("path references unknown entry {entry_id}"),
            });
        };
        if !gate_open(entry, &discovered) {
            return Err(PipelineError::Fatal {
                stage: Stage::ComputeOptimalPath,
                message: format!("path visits {entry_id} before its gate is satisfied"),
            });
        }
        discovered.extend(entry.reveals.iter().cloned());
    }

    let unsatisfied: Vec<&Question> = questions
        .iter()
        .filter(|q| !is_satisfied(q, &discovered, subjects_of))
        .collect();
    if !unsatisfied.is_empty() {
        let ids: Vec<String> = unsatisfied.iter().map(|q| q.id.to_string()).collect();
        return Err(PipelineError::Fatal {
            stage: Stage::ComputeOptimalPath,
            message: format!(
                "replay leaves questions unsatisfied: [{}]",
                ids.join(", ")
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseforge_types::{
        Difficulty, Fact, FactCategory, GenerationInput, QuestionId,
    };
    use chrono::NaiveDate;

    fn entry(id: &str, gates: &[&str], reveals: &[&str]) -> CasebookEntry {
        CasebookEntry {
            id: EntryId::new(id),
            label: String::from(id),
            address: String::new(),
            location: caseforge_types::LocationId::new("loc_study"),
            characters: Vec::new(),
            reveals: reveals.iter().map(|r| FactId::new(*r)).collect(),
            requires_any_fact: gates.iter().map(|g| FactId::new(*g)).collect(),
        }
    }

    fn fact_question(id: &str, accepted: &[&str]) -> Question {
        Question {
            id: QuestionId::new(id),
            text: String::new(),
            answer: Answer::Fact {
                fact_category: FactCategory::Background,
                accepted_ids: accepted.iter().map(|a| FactId::new(*a)).collect(),
            },
            points: 10,
            difficulty: Difficulty::Easy,
        }
    }

    fn plain_fact(id: &str, subjects: &[&str]) -> Fact {
        Fact {
            id: FactId::new(id),
            description: String::new(),
            category: FactCategory::Background,
            subjects: subjects.iter().map(|s| SubjectId::new(*s)).collect(),
            veracity: true,
        }
    }

    fn state_with(
        entries: Vec<CasebookEntry>,
        questions: Vec<Question>,
        facts: Vec<Fact>,
        intro: &[&str],
    ) -> GenerationState {
        let mut state = GenerationState::new(GenerationInput {
            case_date: NaiveDate::from_ymd_opt(1893, 10, 14).unwrap_or_default(),
            difficulty: Some(Difficulty::Easy),
            crime_type: None,
            model_config: None,
        });
        state.casebook = Some(entries);
        state.questions = Some(questions);
        state.facts = Some(facts);
        state.introduction_fact_ids = Some(intro.iter().map(|i| FactId::new(*i)).collect());
        state
    }

    #[test]
    fn gate_feasible_chain_is_walked_in_order() {
        // Intro {f1}; E1 gated on f1 reveals f2; E2 gated on f2 reveals
        // f3 and f4; questions need f3 and f4.
        let mut state = state_with(
            vec![
                entry("entry_e1", &["fact_f1"], &["fact_f2"]),
                entry("entry_e2", &["fact_f2"], &["fact_f3", "fact_f4"]),
            ],
            vec![
                fact_question("q_1", &["fact_f3"]),
                fact_question("q_2", &["fact_f4"]),
            ],
            vec![
                plain_fact("fact_f1", &[]),
                plain_fact("fact_f2", &[]),
                plain_fact("fact_f3", &[]),
                plain_fact("fact_f4", &[]),
            ],
            &["fact_f1"],
        );
        assert!(compute(&mut state).is_ok());
        let path: Vec<&str> = state
            .optimal_path
            .iter()
            .flatten()
            .map(EntryId::as_str)
            .collect();
        assert_eq!(path, vec!["entry_e1", "entry_e2"]);
    }

    #[test]
    fn bridge_step_visits_an_unproductive_entry_first() {
        // f7 is needed, revealed only by E5 gated on f6; f6 comes only
        // from E4 gated on the intro fact. E4 satisfies nothing by
        // itself: it must be chosen as a bridge step.
        let mut state = state_with(
            vec![
                entry("entry_e4", &["fact_intro"], &["fact_f6"]),
                entry("entry_e5", &["fact_f6"], &["fact_f7"]),
            ],
            vec![fact_question("q_1", &["fact_f7"])],
            vec![
                plain_fact("fact_intro", &[]),
                plain_fact("fact_f6", &[]),
                plain_fact("fact_f7", &[]),
            ],
            &["fact_intro"],
        );
        assert!(compute(&mut state).is_ok());
        let path: Vec<&str> = state
            .optimal_path
            .iter()
            .flatten()
            .map(EntryId::as_str)
            .collect();
        assert_eq!(path, vec!["entry_e4", "entry_e5"]);
    }

    #[test]
    fn person_question_satisfied_by_subject_mention() {
        let mut state = state_with(
            vec![entry("entry_e1", &["fact_f1"], &["fact_f2"])],
            vec![Question {
                id: QuestionId::new("q_1"),
                text: String::new(),
                answer: Answer::Person {
                    accepted_ids: vec![caseforge_types::CharacterId::new("char_thief")],
                },
                points: 10,
                difficulty: Difficulty::Easy,
            }],
            vec![
                plain_fact("fact_f1", &[]),
                plain_fact("fact_f2", &["char_thief"]),
            ],
            &["fact_f1"],
        );
        assert!(compute(&mut state).is_ok());
        let path: Vec<&str> = state
            .optimal_path
            .iter()
            .flatten()
            .map(EntryId::as_str)
            .collect();
        assert_eq!(path, vec!["entry_e1"]);
    }

    #[test]
    fn already_satisfied_questions_need_no_path() {
        let mut state = state_with(
            vec![entry("entry_e1", &["fact_f1"], &[])],
            vec![fact_question("q_1", &["fact_f1"])],
            vec![plain_fact("fact_f1", &[])],
            &["fact_f1"],
        );
        assert!(compute(&mut state).is_ok());
        assert_eq!(state.optimal_path, Some(Vec::new()));
    }

    #[test]
    fn greedy_prefers_the_entry_satisfying_more_questions() {
        let mut state = state_with(
            vec![
                entry("entry_one", &["fact_f1"], &["fact_a"]),
                entry("entry_both", &["fact_f1"], &["fact_a", "fact_b"]),
            ],
            vec![
                fact_question("q_1", &["fact_a"]),
                fact_question("q_2", &["fact_b"]),
            ],
            vec![
                plain_fact("fact_f1", &[]),
                plain_fact("fact_a", &[]),
                plain_fact("fact_b", &[]),
            ],
            &["fact_f1"],
        );
        assert!(compute(&mut state).is_ok());
        let path: Vec<&str> = state
            .optimal_path
            .iter()
            .flatten()
            .map(EntryId::as_str)
            .collect();
        assert_eq!(path, vec!["entry_both"]);
    }

    #[test]
    fn unsolvable_case_is_fatal() {
        // The needed fact is behind a gate nothing reveals.
        let mut state = state_with(
            vec![entry("entry_locked", &["fact_never"], &["fact_goal"])],
            vec![fact_question("q_1", &["fact_goal"])],
            vec![plain_fact("fact_never", &[]), plain_fact("fact_goal", &[])],
            &["fact_intro"],
        );
        let result = compute(&mut state);
        assert!(matches!(
            result,
            Err(PipelineError::Fatal {
                stage: Stage::ComputeOptimalPath,
                ..
            })
        ));
    }

    #[test]
    fn bridge_step_with_no_unlock_is_fatal() {
        // An eligible entry exists but unlocks nothing and satisfies
        // nothing.
        let mut state = state_with(
            vec![
                entry("entry_idle", &["fact_intro"], &["fact_noise"]),
                entry("entry_locked", &["fact_never"], &["fact_goal"]),
            ],
            vec![fact_question("q_1", &["fact_goal"])],
            vec![
                plain_fact("fact_intro", &[]),
                plain_fact("fact_noise", &[]),
                plain_fact("fact_never", &[]),
                plain_fact("fact_goal", &[]),
            ],
            &["fact_intro"],
        );
        let result = compute(&mut state);
        assert!(matches!(result, Err(PipelineError::Fatal { .. })));
    }
}
