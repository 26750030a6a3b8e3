//! S2k: derive baseline knowledge and location reveals from the events.
//!
//! Two products, both deterministic functions of the event list sorted
//! by timestamp:
//!
//! - **Role knowledge**: which facts each role truthfully learned, by
//!   filtering every event's reveals through the role's involvement and
//!   the reveal's perception channels. Agents and those present learn
//!   everything; visual witnesses learn visible reveals, auditory
//!   witnesses audible ones, evidence discoverers physical ones.
//! - **Location reveals**: which physical-evidence facts remain at each
//!   location after cleanup detection. A later reveal of the same fact
//!   at the same location with `physical=false` marks the trace as
//!   cleaned up.

use std::collections::{BTreeMap, BTreeSet};

use caseforge_types::{
    ComputedKnowledge, EventReveal, FactId, GenerationState, Involvement, RoleId, Stage,
    sort_events_chronologically,
};
use tracing::debug;

use crate::error::{PipelineError, require};

/// Derive [`ComputedKnowledge`] from the event chain and store it.
pub fn derive(state: &mut GenerationState) -> Result<(), PipelineError> {
    let events = require(&state.events, Stage::DeriveKnowledge, "events")?;
    let mut sorted = events.clone();
    sort_events_chronologically(&mut sorted);

    let mut role_knowledge: BTreeMap<RoleId, BTreeSet<FactId>> = BTreeMap::new();
    for event in &sorted {
        for (subject, involvement) in &event.involvement {
            for reveal in &event.reveals {
                if channel_reaches(*involvement, reveal) {
                    role_knowledge
                        .entry(RoleId::new(subject.as_str()))
                        .or_default()
                        .insert(reveal.fact_id.clone());
                }
            }
        }
    }

    // Cleanup detection: physical traces can be removed by later events
    // at the same location referencing the same fact non-physically.
    let mut present: BTreeMap<_, BTreeMap<_, bool>> = BTreeMap::new();
    for event in &sorted {
        let at_location = present.entry(event.location.clone()).or_default();
        for reveal in &event.reveals {
            if reveal.physical {
                at_location.insert(reveal.fact_id.clone(), true);
            } else if let Some(trace) = at_location.get_mut(&reveal.fact_id) {
                *trace = false;
            }
        }
    }
    let location_reveals: BTreeMap<_, Vec<_>> = present
        .into_iter()
        .filter_map(|(location, facts)| {
            let remaining: Vec<_> = facts
                .into_iter()
                .filter(|&(_, still_present)| still_present)
                .map(|(fact, _)| fact)
                .collect();
            if remaining.is_empty() {
                None
            } else {
                Some((location, remaining))
            }
        })
        .collect();

    debug!(
        roles = role_knowledge.len(),
        locations_with_evidence = location_reveals.len(),
        "derived event knowledge"
    );

    state.computed_knowledge = Some(ComputedKnowledge {
        role_knowledge,
        location_reveals,
    });
    Ok(())
}

/// Whether a reveal reaches a participant through their involvement's
/// perception channel.
const fn channel_reaches(involvement: Involvement, reveal: &EventReveal) -> bool {
    match involvement {
        Involvement::Agent | Involvement::Present => true,
        Involvement::WitnessVisual => reveal.visible,
        Involvement::WitnessAuditory => reveal.audible,
        Involvement::DiscoveredEvidence => reveal.physical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseforge_types::{
        CaseEvent, Difficulty, EventId, FactId, GenerationInput, LocationId, SubjectId,
    };
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    struct RevealSpec {
        fact: &'static str,
        audible: bool,
        visible: bool,
        physical: bool,
    }

    fn event(
        id: &str,
        timestamp: u64,
        location: &str,
        agent: &str,
        witnesses: &[(&str, Involvement)],
        reveals: &[RevealSpec],
    ) -> CaseEvent {
        let mut involvement = BTreeMap::new();
        involvement.insert(SubjectId::new(agent), Involvement::Agent);
        for (who, how) in witnesses {
            involvement.insert(SubjectId::new(*who), *how);
        }
        CaseEvent {
            id: EventId::new(id),
            description: String::new(),
            timestamp,
            agent: SubjectId::new(agent),
            location: LocationId::new(location),
            involvement,
            necessity: None,
            causes: Vec::new(),
            reveals: reveals
                .iter()
                .map(|r| EventReveal {
                    fact_id: FactId::new(r.fact),
                    audible: r.audible,
                    visible: r.visible,
                    physical: r.physical,
                    subjects: vec![SubjectId::new(agent)],
                })
                .collect(),
        }
    }

    fn state_with(events: Vec<CaseEvent>) -> GenerationState {
        let mut state = GenerationState::new(GenerationInput {
            case_date: NaiveDate::from_ymd_opt(1893, 10, 14).unwrap_or_default(),
            difficulty: Some(Difficulty::Easy),
            crime_type: None,
            model_config: None,
        });
        state.events = Some(events);
        state
    }

    fn knowledge_of(state: &GenerationState, role: &str) -> Vec<String> {
        state
            .computed_knowledge
            .as_ref()
            .and_then(|k| k.role_knowledge.get(&RoleId::new(role)))
            .map(|facts| facts.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    #[test]
    fn perception_filtering_by_channel() {
        // An audible-only quarrel: the auditory witness learns it, the
        // visual witness does not.
        let events = vec![event(
            "E1",
            1,
            "loc_parlor",
            "role_victim",
            &[
                ("role_maid", Involvement::WitnessAuditory),
                ("role_butler", Involvement::WitnessVisual),
            ],
            &[RevealSpec {
                fact: "fact_quarrel",
                audible: true,
                visible: false,
                physical: false,
            }],
        )];
        let mut state = state_with(events);
        assert!(derive(&mut state).is_ok());

        assert_eq!(knowledge_of(&state, "role_maid"), vec!["fact_quarrel"]);
        assert!(knowledge_of(&state, "role_butler").is_empty());
        assert_eq!(knowledge_of(&state, "role_victim"), vec!["fact_quarrel"]);
    }

    #[test]
    fn discovered_evidence_needs_physical_channel() {
        let events = vec![event(
            "E1",
            1,
            "loc_study",
            "role_thief",
            &[("role_constable", Involvement::DiscoveredEvidence)],
            &[
                RevealSpec {
                    fact: "fact_pry_marks",
                    audible: false,
                    visible: false,
                    physical: true,
                },
                RevealSpec {
                    fact: "fact_whisper",
                    audible: true,
                    visible: false,
                    physical: false,
                },
            ],
        )];
        let mut state = state_with(events);
        assert!(derive(&mut state).is_ok());
        assert_eq!(
            knowledge_of(&state, "role_constable"),
            vec!["fact_pry_marks"]
        );
    }

    #[test]
    fn cleanup_detection_removes_cleaned_traces() {
        // A bloodstain left at tick 1 is scrubbed by a later event at
        // the same location referencing it non-physically.
        let events = vec![
            event(
                "E1",
                1,
                "loc_study",
                "role_thief",
                &[],
                &[RevealSpec {
                    fact: "fact_bloodstain",
                    audible: false,
                    visible: true,
                    physical: true,
                }],
            ),
            event(
                "E2",
                3,
                "loc_study",
                "role_thief",
                &[],
                &[RevealSpec {
                    fact: "fact_bloodstain",
                    audible: false,
                    visible: false,
                    physical: false,
                }],
            ),
        ];
        let mut state = state_with(events);
        assert!(derive(&mut state).is_ok());

        let reveals = state
            .computed_knowledge
            .as_ref()
            .map(|k| k.location_reveals.clone())
            .unwrap_or_default();
        // The cleaned location is omitted entirely (no facts remain).
        assert!(!reveals.contains_key(&LocationId::new("loc_study")));
    }

    #[test]
    fn cleanup_is_per_location() {
        // The same fact cleaned elsewhere does not clear the original
        // trace.
        let events = vec![
            event(
                "E1",
                1,
                "loc_study",
                "role_thief",
                &[],
                &[RevealSpec {
                    fact: "fact_mud",
                    audible: false,
                    visible: false,
                    physical: true,
                }],
            ),
            event(
                "E2",
                2,
                "loc_garden",
                "role_thief",
                &[],
                &[RevealSpec {
                    fact: "fact_mud",
                    audible: false,
                    visible: true,
                    physical: false,
                }],
            ),
        ];
        let mut state = state_with(events);
        assert!(derive(&mut state).is_ok());

        let reveals = state
            .computed_knowledge
            .as_ref()
            .map(|k| k.location_reveals.clone())
            .unwrap_or_default();
        assert_eq!(
            reveals
                .get(&LocationId::new("loc_study"))
                .map(Vec::as_slice),
            Some([FactId::new("fact_mud")].as_slice())
        );
    }

    #[test]
    fn chronology_uses_timestamps_not_list_order() {
        // Listed out of order: the cleanup still applies because the
        // physical reveal has the earlier timestamp.
        let events = vec![
            event(
                "E2",
                5,
                "loc_study",
                "role_thief",
                &[],
                &[RevealSpec {
                    fact: "fact_ash",
                    audible: false,
                    visible: false,
                    physical: false,
                }],
            ),
            event(
                "E1",
                1,
                "loc_study",
                "role_thief",
                &[],
                &[RevealSpec {
                    fact: "fact_ash",
                    audible: false,
                    visible: false,
                    physical: true,
                }],
            ),
        ];
        let mut state = state_with(events);
        assert!(derive(&mut state).is_ok());
        let reveals = state
            .computed_knowledge
            .as_ref()
            .map(|k| k.location_reveals.clone())
            .unwrap_or_default();
        assert!(!reveals.contains_key(&LocationId::new("loc_study")));
    }

    #[test]
    fn derive_without_events_is_a_missing_field() {
        let mut state = state_with(Vec::new());
        state.events = None;
        assert!(matches!(
            derive(&mut state),
            Err(PipelineError::MissingField { field: "events", .. })
        ));
    }
}
