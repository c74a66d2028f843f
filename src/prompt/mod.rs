//! Grounded prompt construction
//!
//! The prompt has three parts in a fixed order: the case verbatim, a numbered
//! evidence block, and the instruction template. When the whole thing does
//! not fit the character budget, evidence is dropped lowest score first. The
//! case text is never cut.

use crate::config::PromptConfig;
use crate::passage::preview;
use crate::retrieval::RetrievalResult;
use tracing::warn;

const PREAMBLE: &str = "You are an expert Clinical Decision Support System specializing in rare diseases.\n\
Analyze the following patient symptoms and history.\n\
Use the provided context from medical literature to suggest a differential diagnosis.\n";

const INSTRUCTIONS: &str = "Instructions:\n\
1. Provide top 3-5 potential differential diagnoses, ranked by likelihood.\n\
2. Explain the reasoning for each, citing specific symptoms.\n\
3. Reference the provided medical literature context where relevant, by its [number].\n\
4. Suggest specific next steps (labs, imaging, genetic tests).\n\
5. Be concise, professional, and purely objective.\n";

const NO_EVIDENCE: &str = "(no relevant literature was retrieved)\n";

/// Output of [`PromptAssembler::assemble`]
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub text: String,
    /// Evidence items that made it into the prompt
    pub included: usize,
    /// Ids of evidence items cut to fit the budget, lowest score first
    pub dropped: Vec<String>,
}

pub struct PromptAssembler {
    max_prompt_chars: usize,
    passage_chars: usize,
}

impl PromptAssembler {
    pub fn new(config: &PromptConfig) -> Self {
        Self {
            max_prompt_chars: config.max_prompt_chars,
            passage_chars: config.passage_chars,
        }
    }

    /// Build the prompt for `case` grounded on `evidence`
    ///
    /// Deterministic: the same case and evidence always produce the same text.
    pub fn assemble(&self, case: &str, evidence: &[RetrievalResult]) -> AssembledPrompt {
        let mut ranked: Vec<&RetrievalResult> = evidence.iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.passage.id.cmp(&b.passage.id))
        });

        let items: Vec<String> = ranked
            .iter()
            .enumerate()
            .map(|(i, r)| self.render_item(i + 1, r))
            .collect();

        let fixed_chars = self.render(case, &[]).chars().count() - NO_EVIDENCE.chars().count();
        let mut kept = items.len();
        let mut total = fixed_chars + items.iter().map(|s| s.chars().count()).sum::<usize>();
        while kept > 0 && total > self.max_prompt_chars {
            kept -= 1;
            total -= items[kept].chars().count();
        }

        let dropped: Vec<String> = ranked[kept..].iter().map(|r| r.passage.id.clone()).collect();
        if !dropped.is_empty() {
            warn!(
                "Prompt budget of {} chars exceeded, dropped {} evidence item(s): {}",
                self.max_prompt_chars,
                dropped.len(),
                dropped.join(", ")
            );
        }

        AssembledPrompt {
            text: self.render(case, &items[..kept]),
            included: kept,
            dropped,
        }
    }

    fn render_item(&self, rank: usize, result: &RetrievalResult) -> String {
        format!(
            "[{}] ({}, relevance {:.2}) {}\n",
            rank,
            result.passage.source_tag.label(),
            result.score,
            preview(&result.passage.text, self.passage_chars)
        )
    }

    fn render(&self, case: &str, items: &[String]) -> String {
        let mut out = String::new();
        out.push_str(PREAMBLE);
        out.push_str("\nPatient Case:\n");
        out.push_str(case);
        out.push_str("\n\nMedical Literature Context:\n");
        if items.is_empty() {
            out.push_str(NO_EVIDENCE);
        } else {
            for item in items {
                out.push_str(item);
            }
        }
        out.push('\n');
        out.push_str(INSTRUCTIONS);
        out
    }
}
