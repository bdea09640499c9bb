//! Plan decomposition for multi-part requests.

use crate::engine::error::Result;
use yb_llm::{ChatMessage, ChatModel};

pub const MAX_PLAN_STEPS: usize = 8;
const MIN_COMPLEX_WORDS: usize = 24;
const CONNECTIVES: [&str; 7] = [
    " and ", " then ", " also ", " plus ", " after ", " before ", " while ",
];
const PLANNER_PROMPT: &str = "You are a planner. Return a concise todo list for the task.\n\
Use 3-7 bullets, each starting with '- '. No extra text.";

/// Cheap gate deciding whether a request is worth planning.
pub fn is_complex(text: &str) -> bool {
    if text.split_whitespace().count() >= MIN_COMPLEX_WORDS {
        return true;
    }
    if text.matches('\n').count() >= 2 || text.matches('.').count() >= 2 {
        return true;
    }
    let padded = format!(" {} ", text.to_lowercase());
    CONNECTIVES.iter().any(|k| padded.contains(k))
}

pub fn parse_plan(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if let Some(rest) = line.strip_prefix("- ") {
                return rest.trim().to_string();
            }
            if line.starts_with(|c: char| c.is_ascii_digit()) {
                if let Some((_, rest)) = line.split_once('.') {
                    let rest = rest.trim();
                    if !rest.is_empty() {
                        return rest.to_string();
                    }
                }
            }
            line.to_string()
        })
        .take(MAX_PLAN_STEPS)
        .collect()
}

#[tracing::instrument(level = "info", skip_all, fields(model = %model))]
pub async fn make_plan(llm: &dyn ChatModel, model: &str, text: &str) -> Result<Vec<String>> {
    let messages = [ChatMessage::system(PLANNER_PROMPT), ChatMessage::user(text)];
    let response = llm.complete(model, &messages, &[]).await?;
    let content = response.message.content.trim();
    let steps = if content.is_empty() {
        Vec::new()
    } else {
        parse_plan(content)
    };
    tracing::info!(event = "plan_created", steps = steps.len(), "plan created");
    Ok(steps)
}

fn bullets(steps: &[String]) -> String {
    steps
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn plan_listing(steps: &[String]) -> String {
    format!("Plan:\n{}", bullets(steps))
}

pub fn plan_history_message(steps: &[String]) -> ChatMessage {
    ChatMessage::system(format!("Planned steps:\n{}", bullets(steps)))
}

pub fn step_header(index: usize, total: usize, step: &str) -> String {
    format!("[system] Step {}/{total}: {step}", index + 1)
}

pub fn step_message(index: usize, total: usize, step: &str) -> ChatMessage {
    ChatMessage::user(format!("Execute step {}/{total}: {step}", index + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_heuristic() {
        assert!(!is_complex("fix the typo"));
        assert!(!is_complex("Android build"));
        assert!(is_complex("build it and ship it"));
        assert!(is_complex("Then deploy"));
        assert!(is_complex("one.\ntwo.\n"));
        assert!(is_complex("a b c\nd\ne"));
        assert!(is_complex(&"word ".repeat(24)));
    }

    #[test]
    fn plan_lines_are_normalized() {
        let raw = "- inspect repo\n\n2. run tests\n3.\nSummarize results\n- a\n- b\n- c\n- d\n- e";
        let steps = parse_plan(raw);
        assert_eq!(
            steps,
            vec!["inspect repo", "run tests", "3.", "Summarize results", "a", "b", "c", "d"]
        );
    }

    #[test]
    fn rendered_strings() {
        let steps = vec!["read".to_string(), "write".to_string()];
        assert_eq!(plan_listing(&steps), "Plan:\n- read\n- write");
        assert_eq!(
            plan_history_message(&steps).content,
            "Planned steps:\n- read\n- write"
        );
        assert_eq!(step_header(0, 2, "read"), "[system] Step 1/2: read");
        assert_eq!(step_message(1, 2, "write").content, "Execute step 2/2: write");
    }
}
