//! Prompt builder (spec §4.10 `PromptBuilder.build`).
//!
//! A thin templating contract, not a prompt-engineering framework (spec §1
//! Non-goals: "it does not invent prompts beyond a thin templating
//! contract"). Renders the goal, the tool schema projections, a windowed
//! slice of step history, and — on the autonomous loop's first step only —
//! knowledge-base hits, into one string handed to the LLM adapter.

use serde_json::Value;
use wukong_foundation::{AgentKind, KnowledgeHit, Step};

/// One entry of rendered history handed to the prompt (a completed or
/// failed non-discarded step, spec GLOSSARY "Discardable step").
pub struct HistoryEntry<'a> {
    pub step_number: u64,
    pub action_kind: &'a str,
    pub result_summary: Option<String>,
}

/// Input bundle for one prompt render (spec §4.10 pseudocode's `prompt =
/// PromptBuilder.build({goal, tools, history, knowledge, agent_kind, autoRun})`).
pub struct PromptInput<'a> {
    pub goal: &'a str,
    pub tool_schemas: &'a [Value],
    pub history: &'a [HistoryEntry<'a>],
    pub knowledge: &'a [KnowledgeHit],
    pub agent_kind: AgentKind,
    pub auto_run: bool,
}

pub struct PromptBuilder;

impl PromptBuilder {
    pub fn build(input: &PromptInput<'_>) -> String {
        let mut out = String::new();

        out.push_str("You are an autonomous software agent. Given a goal, decide the single\n");
        out.push_str("next action to take. Respond with exactly one JSON object wrapped in\n");
        out.push_str("<final_output></final_output>, whose \"action\" field is one of: CallTool,\n");
        out.push_str("CallToolsParallel, ForkAutoAgent, AskUser, Plan, Finish.\n\n");

        out.push_str(&format!("## Goal\n{}\n\n", input.goal));

        out.push_str(&format!(
            "## Mode\n{} (autoRun={})\n\n",
            match input.agent_kind {
                AgentKind::Interactive => "interactive — the user confirms tool calls",
                AgentKind::Autonomous => "autonomous — no user confirmation between steps",
            },
            input.auto_run
        ));

        if !input.knowledge.is_empty() {
            out.push_str("## Relevant knowledge\n");
            for hit in input.knowledge {
                out.push_str(&format!("- ({:.2}) {}: {}\n", hit.score, hit.title, hit.snippet));
            }
            out.push('\n');
        }

        out.push_str("## Available tools\n");
        for schema in input.tool_schemas {
            out.push_str(&format!("{}\n", schema));
        }
        out.push('\n');

        if !input.history.is_empty() {
            out.push_str("## History\n");
            for entry in input.history {
                out.push_str(&format!(
                    "step {}: {} -> {}\n",
                    entry.step_number,
                    entry.action_kind,
                    entry.result_summary.as_deref().unwrap_or("(no result)")
                ));
            }
            out.push('\n');
        }

        out.push_str("Respond now with exactly one <final_output>{...}</final_output> block.\n");
        out
    }

    /// Project a non-discarded [`Step`] into a [`HistoryEntry`] for the next
    /// prompt render (spec §4.8 step 6: discarded steps are "hidden from
    /// future history windows").
    pub fn history_entry(step: &Step) -> HistoryEntry<'_> {
        HistoryEntry {
            step_number: step.step_number,
            action_kind: step.action.kind_name(),
            result_summary: step
                .result
                .as_ref()
                .map(|v| v.to_string())
                .or_else(|| step.error.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_includes_goal_and_mode() {
        let input = PromptInput {
            goal: "refactor the parser",
            tool_schemas: &[],
            history: &[],
            knowledge: &[],
            agent_kind: AgentKind::Autonomous,
            auto_run: true,
        };
        let prompt = PromptBuilder::build(&input);
        assert!(prompt.contains("refactor the parser"));
        assert!(prompt.contains("autonomous"));
    }

    #[test]
    fn build_renders_knowledge_only_when_present() {
        let hit = KnowledgeHit { title: "doc".into(), snippet: "snippet".into(), score: 0.9 };
        let input = PromptInput {
            goal: "g",
            tool_schemas: &[],
            history: &[],
            knowledge: std::slice::from_ref(&hit),
            agent_kind: AgentKind::Autonomous,
            auto_run: true,
        };
        let prompt = PromptBuilder::build(&input);
        assert!(prompt.contains("Relevant knowledge"));
        assert!(prompt.contains("snippet"));
    }
}
