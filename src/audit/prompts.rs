//! Fixed assistant messages and LLM extraction prompts for the audit.

use super::state::{AuditState, Phase};

/// First message of every fresh session.
pub const GREETING: &str = "Hi! I'm here to conduct a quick 3-step AI opportunity assessment for your business. Let's start with understanding your business. What industry are you in, and how many employees do you have?";

/// Sent when a returning prospect resumes an unfinished audit.
pub const WELCOME_BACK_RESUME: &str =
    "Welcome back! Let's continue where we left off with your AI opportunity assessment.";

/// Sent when a returning prospect's latest audit is already finished.
pub const WELCOME_BACK_COMPLETED: &str = "Welcome back! You've already completed your AI opportunity assessment. Would you like to start a fresh audit or view your report?";

/// The question that opens a phase.
///
/// `Finish` has no question; the summary takes its place.
pub fn phase_opening(phase: Phase) -> &'static str {
    match phase {
        Phase::Discovery => GREETING,
        Phase::PainPoints => {
            "Thanks for sharing! Now, let's talk about your challenges. What are the main pain points in your business? (e.g., manual tasks, bottlenecks, data silos)"
        }
        Phase::Qualification => {
            "Got it. Finally, let's talk about your budget and timeline for this project."
        }
        Phase::Finish => {
            "Thanks! I have all the information I need. Let me prepare your assessment report."
        }
    }
}

/// Human wording for an extracted field.
pub fn field_label(field: &str) -> &'static str {
    match field {
        "industry" => "what industry you're in",
        "companySize" => "how many employees you have",
        "manualTasks" => "which manual, repetitive tasks take up your team's time",
        "bottlenecks" => "where work gets stuck waiting on approvals or hand-offs",
        "dataSilos" => "where information is trapped between systems or teams",
        "budget" => "your budget for this project",
        "timeline" => "your timeline for getting started",
        _ => "a few more details",
    }
}

/// Follow-up asking for the fields the last answer did not cover.
pub fn clarifying_question(phase: Phase, missing: &[&str]) -> String {
    let labels: Vec<&str> = missing.iter().map(|f| field_label(f)).collect();
    let wanted = match labels.as_slice() {
        [] => return phase_opening(phase).to_string(),
        [only] => (*only).to_string(),
        [head @ .., last] => format!("{} and {}", head.join(", "), last),
    };
    format!("Thanks, that helps. Could you also tell me {wanted}?")
}

/// Final report listing every collected value verbatim.
pub fn summary(state: &AuditState) -> String {
    let discovery = state.discovery_data.as_ref();
    let pain = state.pain_points_data.as_ref();
    let qualification = state.qualification_data.as_ref();
    let or_blank = |v: Option<&String>| v.map(String::as_str).unwrap_or("not provided").to_string();

    format!(
        "Here is a summary of your AI opportunity assessment:\n\
         - Industry: {}\n\
         - Company Size: {}\n\
         - Manual Tasks: {}\n\
         - Bottlenecks: {}\n\
         - Data Silos: {}\n\
         - Budget: {}\n\
         - Timeline: {}",
        or_blank(discovery.map(|d| &d.industry)),
        or_blank(discovery.map(|d| &d.company_size)),
        or_blank(pain.map(|p| &p.manual_tasks)),
        or_blank(pain.map(|p| &p.bottlenecks)),
        or_blank(pain.map(|p| &p.data_silos)),
        or_blank(qualification.map(|q| &q.budget)),
        or_blank(qualification.map(|q| &q.timeline)),
    )
}

pub const EXTRACTION_SYSTEM: &str = "You are a data extraction assistant. Output only valid JSON.";

/// JSON shape each phase's extractor asks the model to fill.
pub fn extraction_schema(phase: Phase) -> &'static str {
    match phase {
        Phase::Discovery => {
            r#"Extract the following from the conversation. Use null for anything not mentioned.
{
  "industry": "the prospect's industry, or null",
  "companySize": "number of employees or a range such as 11-50, or null"
}"#
        }
        Phase::PainPoints => {
            r#"Extract the following from the conversation. Use null for anything not mentioned.
{
  "manualTasks": "manual or repetitive work the team does, or null",
  "bottlenecks": "where processes slow down or wait, or null",
  "dataSilos": "information that is disconnected between systems or teams, or null"
}"#
        }
        Phase::Qualification => {
            r#"Extract the following from the conversation. Use null for anything not mentioned.
{
  "budget": "budget for the project exactly as stated, or null",
  "timeline": "timeline for implementation exactly as stated, or null"
}"#
        }
        Phase::Finish => "",
    }
}

/// Build the extraction prompt for a phase. Empty for `Finish`.
pub fn extraction_prompt(phase: Phase, transcript: &str) -> String {
    let schema = extraction_schema(phase);
    if schema.is_empty() {
        return String::new();
    }
    format!(
        "Given this AI opportunity assessment conversation:\n\n\
         {transcript}\n\n\
         {schema}\n\n\
         Respond with ONLY valid JSON, no explanation or markdown formatting."
    )
}
