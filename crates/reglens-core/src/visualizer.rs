//! Mermaid rendering of a pipeline run.
//!
//! Produces a left-to-right flowchart of the six agents with edges in
//! execution order, each node annotated with that stage's key outputs.

use crate::state::SharedState;

/// Renders the run as a Mermaid `graph LR` diagram.
#[must_use]
pub fn render_mermaid(state: &SharedState) -> String {
    let sentinel = sentinel_annotation(state);
    let translator = translator_annotation(state);
    let code_reader = format!("{} Files Found", state.impacted_files.len());
    let impact = format!("{} Impacts Identified", state.impact_analysis.len());
    let spec_gen = if state.technical_spec.is_some() {
        "Spec Created"
    } else {
        "No Spec"
    };
    let prompt = if state.kiro_prompt.is_some() {
        "Prompt Generated"
    } else {
        "No Prompt"
    };

    format!(
        "graph LR\n\
         \x20   Start([Input Text]) --> Sentinel[Sentinel<br/>{sentinel}]\n\
         \x20   Sentinel --> Translator[Translator<br/>{translator}]\n\
         \x20   Translator --> CodeReader[CodeReader<br/>{code_reader}]\n\
         \x20   CodeReader --> Impact[Impact<br/>{impact}]\n\
         \x20   Impact --> SpecGenerator[SpecGenerator<br/>{spec_gen}]\n\
         \x20   SpecGenerator --> PromptBuilder[PromptBuilder<br/>{prompt}]\n\
         \x20   PromptBuilder --> End([Complete])"
    )
}

fn sentinel_annotation(state: &SharedState) -> String {
    let change = match state.change_detected {
        Some(true) => "Yes",
        Some(false) => "No",
        None => "Unknown",
    };
    let risk = state
        .risk_level
        .map_or_else(|| "Unknown".to_string(), |r| r.to_string());
    format!("Change: {change}<br/>Risk: {risk}")
}

fn translator_annotation(state: &SharedState) -> String {
    match &state.regulatory_model {
        Some(model) => {
            let mut title = model.title.clone();
            if title.chars().count() > 30 {
                title = format!("{}...", crate::agents::excerpt(&title, 27));
            }
            format!("Model: {title}")
        }
        None => "No Model".to_string(),
    }
}
