//! End-to-end pipeline runs against a scripted model backend.
//!
//! The fixture is a small but fully consistent case: five events over
//! three locations, five roles, one perception-filtered witness chain,
//! disconnected subjects that force bridge synthesis, one red herring,
//! and a quiz whose optimal path requires two casebook visits.

use caseforge_llm::{ModelClient, PromptEngine, ScriptedBackend};
use caseforge_pipeline::{Orchestrator, PipelineError};
use caseforge_store::{CaseStore, DraftStore, MemoryCaseStore, MemoryDraftStore};
use caseforge_types::{
    Answer, Case, Difficulty, FactId, GenerationInput, KnowledgeStatus, ResumeRequest, Stage,
};
use chrono::NaiveDate;
use std::collections::BTreeSet;

fn template_response() -> String {
    serde_json::json!({
        "crimeType": "theft",
        "title": "The Gallery Working Title",
        "era": "1890s London",
        "date": "14 October 1893",
        "atmosphere": "River fog pools in the gas-lit lanes.",
        "style": "isolated",
        "tone": "noir",
        "eventSlots": [
            {"id": "E1", "description": "A quarrel over money", "necessity": "required", "causedBy": []},
            {"id": "E2", "description": "The theft itself", "necessity": "required", "causedBy": ["E1"]},
            {"id": "E3", "description": "The loss is discovered", "necessity": "required", "causedBy": ["E2"]},
            {"id": "E4", "description": "The constable inspects the study", "causedBy": ["E3"]},
            {"id": "E5", "description": "The spoils are buried", "causedBy": ["E2"]}
        ],
        "roles": [
            {"id": "role_thief", "label": "the desperate clerk", "description": "steals to cover a debt"},
            {"id": "role_victim", "label": "the collector", "description": "owns the coveted piece"},
            {"id": "role_maid", "label": "the housemaid", "description": "sees and hears much"},
            {"id": "role_butler", "label": "the butler", "description": "keeps the household's secrets"},
            {"id": "role_constable", "label": "the constable", "description": "investigates the loss"}
        ],
        "difficulty": "easy"
    })
    .to_string()
}

fn events_response() -> String {
    serde_json::json!({
        "events": [
            {
                "id": "E1",
                "description": "Silas quarrels with Ambrose over a debt",
                "timestamp": 1,
                "agent": "role_thief",
                "location": "loc_study",
                "involvement": {
                    "role_thief": "agent",
                    "role_victim": "present",
                    "role_maid": "witness_auditory"
                },
                "necessity": "required",
                "causes": ["E2"],
                "reveals": [
                    {"factId": "fact_quarrel", "audible": true, "visible": false, "physical": false,
                     "subjects": ["role_thief", "role_victim", "role_maid"]}
                ]
            },
            {
                "id": "E2",
                "description": "Silas pockets the jade seal",
                "timestamp": 2,
                "agent": "role_thief",
                "location": "loc_study",
                "involvement": {"role_thief": "agent", "role_butler": "discovered_evidence"},
                "necessity": "required",
                "causes": ["E3", "E5"],
                "reveals": [
                    {"factId": "fact_theft", "audible": false, "visible": false, "physical": true,
                     "subjects": ["role_thief", "loc_study"]}
                ]
            },
            {
                "id": "E3",
                "description": "Ambrose finds the display case empty",
                "timestamp": 3,
                "agent": "role_victim",
                "location": "loc_parlor",
                "involvement": {"role_victim": "agent", "role_maid": "present"},
                "necessity": "required",
                "causes": ["E4"],
                "reveals": [
                    {"factId": "fact_discovery", "audible": false, "visible": true, "physical": false,
                     "subjects": ["loc_parlor"]},
                    {"factId": "fact_seen", "audible": false, "visible": true, "physical": false,
                     "subjects": ["role_thief"]}
                ]
            },
            {
                "id": "E4",
                "description": "Constable Brigg inspects the study",
                "timestamp": 4,
                "agent": "role_constable",
                "location": "loc_study",
                "involvement": {
                    "role_constable": "agent",
                    "role_maid": "witness_visual",
                    "role_victim": "present"
                },
                "causes": [],
                "reveals": [
                    {"factId": "fact_investigation", "audible": false, "visible": true, "physical": false,
                     "subjects": ["role_constable", "loc_study"]}
                ]
            },
            {
                "id": "E5",
                "description": "The seal is buried under the rose bed",
                "timestamp": 5,
                "agent": "role_butler",
                "location": "loc_garden",
                "involvement": {"role_butler": "agent"},
                "causes": [],
                "reveals": [
                    {"factId": "fact_burial", "audible": false, "visible": false, "physical": true,
                     "subjects": ["role_butler", "loc_garden"]}
                ]
            }
        ]
    })
    .to_string()
}

fn characters_response() -> String {
    let tone = serde_json::json!({"register": "plain", "vocabulary": [], "quirk": null});
    serde_json::json!({
        "roleMapping": {
            "role_thief": "char_thief",
            "role_victim": "char_victim",
            "role_maid": "char_maid",
            "role_butler": "char_butler",
            "role_constable": "char_constable"
        },
        "characters": [
            {
                "id": "char_thief", "name": "Silas Crane",
                "mysteryRole": "culprit", "societalRole": "gallery clerk",
                "description": "A neat man with ink-stained cuffs.",
                "motivations": ["clear a gambling debt"],
                "knowledge": {"fact_quarrel": "knows", "fact_theft": "knows"},
                "toneProfile": tone
            },
            {
                "id": "char_victim", "name": "Ambrose Veale",
                "mysteryRole": "victim", "societalRole": "collector",
                "description": "Proud of his cabinet of curiosities.",
                "motivations": ["recover the seal"],
                "knowledge": {"fact_quarrel": "knows", "fact_discovery": "knows", "fact_seen": "knows"},
                "toneProfile": tone
            },
            {
                "id": "char_maid", "name": "Ada Hale",
                "mysteryRole": "witness", "societalRole": "housemaid",
                "description": "Quiet, quick, and observant.",
                "motivations": ["keep her place"],
                "knowledge": {"fact_quarrel": "knows", "fact_discovery": "knows",
                               "fact_seen": "knows", "fact_investigation": "knows"},
                "toneProfile": tone
            },
            {
                "id": "char_butler", "name": "Mr. Pruitt",
                "mysteryRole": "accomplice", "societalRole": "butler",
                "description": "Unreadable behind long service.",
                "motivations": ["protect the household's name"],
                "knowledge": {"fact_theft": "knows", "fact_burial": "knows"},
                "toneProfile": tone
            },
            {
                "id": "char_constable", "name": "Constable Brigg",
                "mysteryRole": "investigator", "societalRole": "constable",
                "description": "Methodical to a fault.",
                "motivations": ["close the case"],
                "knowledge": {"fact_investigation": "knows"},
                "toneProfile": tone
            }
        ]
    })
    .to_string()
}

fn locations_response() -> String {
    serde_json::json!({
        "locations": [
            {
                "id": "loc_study", "name": "The Study", "type": "room",
                "description": "Bookshelves and a rifled display case.",
                "accessibleFrom": ["loc_parlor"], "visibleFrom": [], "audibleFrom": ["loc_parlor"]
            },
            {
                "id": "loc_parlor", "name": "The Parlor", "type": "room",
                "description": "Heavy drapes and a cold hearth.",
                "accessibleFrom": ["loc_study", "loc_garden"], "visibleFrom": [], "audibleFrom": ["loc_study"]
            },
            {
                "id": "loc_garden", "name": "The Walled Garden", "type": "garden",
                "description": "Rose beds behind high brick.",
                "accessibleFrom": ["loc_parlor"], "visibleFrom": ["loc_parlor"], "audibleFrom": []
            }
        ]
    })
    .to_string()
}

fn facts_response() -> String {
    serde_json::json!({
        "fact_quarrel": {"description": "Silas Crane and Ambrose Veale quarrelled over a debt within Ada Hale's hearing.", "category": "relationship"},
        "fact_theft": {"description": "The jade seal was taken from the study's display case.", "category": "physical_evidence"},
        "fact_discovery": {"description": "The empty case was discovered in the parlor.", "category": "timeline"},
        "fact_seen": {"description": "Silas Crane was seen slipping away from the house.", "category": "person"},
        "fact_investigation": {"description": "Constable Brigg examined the study inch by inch.", "category": "background"},
        "fact_burial": {"description": "Fresh digging under the rose bed hides the seal.", "category": "physical_evidence"},
        "fact_bridge_char_constable_to_char_butler": {"description": "Constable Brigg has long known Mr. Pruitt from the corner beat.", "category": "relationship"},
        "fact_bridge_char_maid_to_loc_garden": {"description": "Ada Hale tends the walled garden on Sundays.", "category": "background"},
        "fact_red_herring_char_butler": {"description": "Mr. Pruitt keeps a locked drawer in the parlor nobody has opened.", "category": "background"}
    })
    .to_string()
}

fn introduction_response() -> String {
    serde_json::json!({
        "introductionFactIds": ["fact_quarrel", "fact_theft"],
        "introduction": "The jade seal is gone from the study, and the house is full of held breath. Only yesterday the clerk and the collector were heard quarrelling over money.",
        "title": "The Jade Seal"
    })
    .to_string()
}

fn casebook_response() -> String {
    serde_json::json!({
        "entries": [
            {"id": "entry_char_butler", "label": "Mr. Pruitt, butler", "address": "The servants' hall", "characterIds": ["char_butler"]},
            {"id": "entry_char_constable", "label": "Constable Brigg", "address": "The corner beat", "characterIds": ["char_constable"]},
            {"id": "entry_char_maid", "label": "Ada Hale, housemaid", "address": "The walled garden", "characterIds": ["char_maid"]},
            {"id": "entry_char_thief", "label": "Silas Crane, clerk", "address": "The study", "characterIds": ["char_thief"]},
            {"id": "entry_char_victim", "label": "Ambrose Veale", "address": "The walled garden", "characterIds": ["char_victim"]},
            {"id": "entry_loc_garden", "label": "The Walled Garden", "address": "Behind the house", "characterIds": []},
            {"id": "entry_loc_parlor", "label": "The Parlor", "address": "Ground floor", "characterIds": ["char_victim"]},
            {"id": "entry_loc_study", "label": "The Study", "address": "Ground floor", "characterIds": []}
        ]
    })
    .to_string()
}

fn prose_response() -> String {
    serde_json::json!({
        "scenes": {
            "entry_char_butler": "Mr. Pruitt polishes silver that needs no polishing.",
            "entry_char_constable": "Brigg consults his notebook before he speaks.",
            "entry_char_maid": "Ada Hale folds linen and lowers her voice.",
            "entry_char_thief": "Silas Crane's smile does not reach his eyes.",
            "entry_char_victim": "Ambrose Veale stares at the empty case.",
            "entry_loc_garden": "The rose bed has been disturbed, the soil fresh.",
            "entry_loc_parlor": "The parlor keeps its drapes drawn.",
            "entry_loc_study": "The display case stands open and empty."
        }
    })
    .to_string()
}

fn questions_response() -> String {
    serde_json::json!({
        "questions": [
            {"id": "q_1", "text": "Who took the jade seal?",
             "answer": {"type": "person", "acceptedIds": ["char_thief"]},
             "points": 30, "difficulty": "easy"},
            {"id": "q_2", "text": "What physical evidence reveals where the seal went?",
             "answer": {"type": "fact", "factCategory": "physical_evidence", "acceptedIds": ["fact_burial"]},
             "points": 40, "difficulty": "medium"},
            {"id": "q_3", "text": "Where is the seal hidden?",
             "answer": {"type": "location", "acceptedIds": ["loc_garden"]},
             "points": 30, "difficulty": "easy"}
        ]
    })
    .to_string()
}

fn full_script() -> Vec<String> {
    vec![
        template_response(),
        events_response(),
        characters_response(),
        locations_response(),
        facts_response(),
        introduction_response(),
        casebook_response(),
        prose_response(),
        questions_response(),
    ]
}

fn test_input() -> GenerationInput {
    GenerationInput {
        case_date: NaiveDate::from_ymd_opt(1893, 10, 14).unwrap_or_default(),
        difficulty: Some(Difficulty::Easy),
        crime_type: Some(String::from("theft")),
        model_config: None,
    }
}

fn orchestrator_with(
    responses: Vec<String>,
) -> (Orchestrator, MemoryDraftStore, MemoryCaseStore) {
    let drafts = MemoryDraftStore::new();
    let cases = MemoryCaseStore::new();
    let prompts = match PromptEngine::embedded() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("failed to load embedded templates: {e}");
            std::process::exit(1);
        }
    };
    let orchestrator = Orchestrator::new(
        ModelClient::scripted(ScriptedBackend::with_responses(responses)),
        prompts,
        DraftStore::Memory(drafts.clone()),
        CaseStore::Memory(cases.clone()),
    );
    (orchestrator, drafts, cases)
}

async fn run_full() -> Case {
    let (orchestrator, _, _) = orchestrator_with(full_script());
    match orchestrator.run(test_input()).await {
        Ok(case) => case,
        Err(e) => {
            tracing::error!("full run failed: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::test]
async fn full_run_produces_a_stored_playable_case() {
    let (orchestrator, drafts, cases) = orchestrator_with(full_script());
    let case = match orchestrator.run(test_input()).await {
        Ok(case) => case,
        Err(e) => {
            tracing::error!("pipeline failed: {e}");
            std::process::exit(1);
        }
    };

    assert_eq!(case.title, "The Jade Seal");
    assert_eq!(case.casebook.len(), 8);
    assert_eq!(case.facts.len(), 9);

    // The draft is deleted after finalisation; the case is stored.
    assert!(drafts.is_empty());
    let stored = cases.get(case.case_date).unwrap_or_default();
    assert_eq!(stored.map(|c| c.title), Some(case.title.clone()));
}

#[tokio::test]
async fn bridges_and_red_herrings_are_synthesized() {
    let case = run_full().await;

    let ids: BTreeSet<&str> = case.facts.iter().map(|f| f.id.as_str()).collect();
    assert!(ids.contains("fact_bridge_char_constable_to_char_butler"));
    assert!(ids.contains("fact_bridge_char_maid_to_loc_garden"));
    assert!(ids.contains("fact_red_herring_char_butler"));

    // Bridge carriers hold their bridge facts as `knows`.
    let maid = case.characters.iter().find(|c| c.id.as_str() == "char_maid");
    assert_eq!(
        maid.and_then(|c| c
            .knowledge
            .get(&FactId::new("fact_bridge_char_maid_to_loc_garden"))
            .copied()),
        Some(KnowledgeStatus::Knows)
    );
}

#[tokio::test]
async fn baseline_faithfulness_holds() {
    let case = run_full().await;

    // Every `knows` entry is either derivable from event involvement or
    // synthetic. The constable only performed the inspection: one
    // derived fact plus the bridge appended by the fact-graph stage.
    let constable = case
        .characters
        .iter()
        .find(|c| c.id.as_str() == "char_constable");
    let knows: Vec<&str> = constable
        .map(|c| {
            c.knowledge
                .iter()
                .filter(|(_, s)| **s == KnowledgeStatus::Knows)
                .map(|(f, _)| f.as_str())
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(
        knows,
        vec![
            "fact_bridge_char_constable_to_char_butler",
            "fact_investigation"
        ]
    );

    // The collector's generated knowledge omitted the inspection he
    // stood through; baseline enforcement must have inserted it.
    let victim = case
        .characters
        .iter()
        .find(|c| c.id.as_str() == "char_victim");
    assert_eq!(
        victim.and_then(|c| c.knowledge.get(&FactId::new("fact_investigation")).copied()),
        Some(KnowledgeStatus::Knows)
    );
}

#[tokio::test]
async fn casebook_gates_are_never_empty_and_all_reachable() {
    let case = run_full().await;

    for entry in &case.casebook {
        assert!(
            !entry.requires_any_fact.is_empty(),
            "entry {} has an empty gate",
            entry.id
        );
    }

    // Replay the bipartite BFS from the introduction facts.
    let mut reachable: BTreeSet<FactId> = case.introduction_fact_ids.iter().cloned().collect();
    let mut reached_entries = BTreeSet::new();
    loop {
        let mut changed = false;
        for entry in &case.casebook {
            if reached_entries.contains(&entry.id) {
                continue;
            }
            if entry.requires_any_fact.iter().any(|g| reachable.contains(g)) {
                reached_entries.insert(entry.id.clone());
                reachable.extend(entry.reveals.iter().cloned());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    assert_eq!(reached_entries.len(), case.casebook.len());
    for fact in &case.facts {
        assert!(reachable.contains(&fact.id), "fact {} unreachable", fact.id);
    }
}

#[tokio::test]
async fn optimal_path_is_walkable_and_answers_everything() {
    let case = run_full().await;

    // The first step is a bridge step: visiting the collector satisfies
    // no question by itself but unlocks the rest of the casebook.
    let path: Vec<&str> = case.optimal_path.iter().map(|e| e.as_str()).collect();
    assert_eq!(
        path,
        vec![
            "entry_char_victim",
            "entry_char_constable",
            "entry_char_butler"
        ]
    );

    // Walk the path, honoring gates.
    let mut discovered: BTreeSet<FactId> = case.introduction_fact_ids.iter().cloned().collect();
    for entry_id in &case.optimal_path {
        let entry = case.casebook.iter().find(|e| &e.id == entry_id);
        assert!(
            entry.is_some_and(|e| e
                .requires_any_fact
                .iter()
                .any(|g| discovered.contains(g))),
            "gate violated at {entry_id}"
        );
        if let Some(entry) = entry {
            discovered.extend(entry.reveals.iter().cloned());
        }
    }

    // Every question is satisfied at the end.
    for question in &case.questions {
        let satisfied = match &question.answer {
            Answer::Fact { accepted_ids, .. } => {
                accepted_ids.iter().any(|id| discovered.contains(id))
            }
            Answer::Person { accepted_ids } => discovered.iter().any(|f| {
                case.facts.iter().any(|fact| {
                    &fact.id == f
                        && fact
                            .subjects
                            .iter()
                            .any(|s| accepted_ids.iter().any(|a| a.as_str() == s.as_str()))
                })
            }),
            Answer::Location { accepted_ids } => discovered.iter().any(|f| {
                case.facts.iter().any(|fact| {
                    &fact.id == f
                        && fact
                            .subjects
                            .iter()
                            .any(|s| accepted_ids.iter().any(|a| a.as_str() == s.as_str()))
                })
            }),
        };
        assert!(satisfied, "question {} unsatisfied after the path", question.id);
    }
}

#[tokio::test]
async fn no_question_accepts_a_false_or_red_herring_fact() {
    let case = run_full().await;

    for question in &case.questions {
        if let Answer::Fact { accepted_ids, .. } = &question.answer {
            for id in accepted_ids {
                let fact = case.facts.iter().find(|f| &f.id == id);
                assert_eq!(fact.map(|f| f.veracity), Some(true));
                assert!(!id.is_red_herring());
            }
        }
    }
}

#[tokio::test]
async fn failed_run_checkpoints_and_resumes_to_the_same_case() {
    // Fail at the fact-description stage: the two garbage responses
    // burn the client's parse budget on the first attempt, and the
    // exhausted script fails the retry.
    let script: Vec<String> = vec![
        template_response(),
        events_response(),
        characters_response(),
        locations_response(),
        String::from("not json at all"),
        String::from("still not json"),
    ];
    let (orchestrator, drafts, _) = orchestrator_with(script);
    let result = orchestrator.run(test_input()).await;
    let failed_stage = match &result {
        Err(PipelineError::StageFailed { stage, .. }) => Some(*stage),
        _ => None,
    };
    assert_eq!(failed_stage, Some(Stage::DescribeFacts));

    // The accumulator was checkpointed at the last successful stage.
    assert_eq!(drafts.len(), 1);
    let state = drafts.first_draft();
    assert!(state.is_some(), "no checkpoint found");
    let Some(state) = state else { return };
    assert!(state.facts.is_none());
    assert!(state.fact_graph.is_some(), "S5 output should be checkpointed");

    let resume_script = vec![
        facts_response(),
        introduction_response(),
        casebook_response(),
        prose_response(),
        questions_response(),
    ];
    let (resumer, resume_drafts, resume_cases) = orchestrator_with(resume_script);
    let resumed = resumer
        .resume(ResumeRequest {
            start_from_step: Stage::DescribeFacts,
            state,
        })
        .await;
    let resumed = match resumed {
        Ok(case) => case,
        Err(e) => {
            tracing::error!("resume failed: {e}");
            std::process::exit(1);
        }
    };

    // Resume equals the tail of a full end-to-end run.
    let full = run_full().await;
    assert_eq!(resumed.title, full.title);
    assert_eq!(resumed.facts, full.facts);
    assert_eq!(resumed.casebook, full.casebook);
    assert_eq!(resumed.questions, full.questions);
    assert_eq!(resumed.optimal_path, full.optimal_path);

    assert!(resume_drafts.is_empty());
    let stored = resume_cases.get(resumed.case_date).unwrap_or_default();
    assert!(stored.is_some());
}
