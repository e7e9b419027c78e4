//! Mapping decisions and review corrections from the language model.

use crate::embeddings::RetryPolicy;
use crate::llm::client::TextGenerator;
use crate::llm::extract::{extract_array, extract_object};
use crate::types::{Candidate, Correction, FbdiField, MappingDecision, TableDescriptions};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// File the last decision prompt is written to.
pub const DEBUG_PROMPT_FILE: &str = "debug_prompt.txt";

/// A target field with its retrieved options.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub field: FbdiField,
    pub candidates: Vec<Candidate>,
}

/// A mapped row as shown to the review pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRow {
    pub row_index: usize,
    pub target: String,
    pub legacy_table: String,
    pub legacy_column: String,
    pub confidence: String,
    /// Mapping logic, truncated
    pub logic: String,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    #[serde(default)]
    corrections: Vec<serde_json::Value>,
}

/// Asks the model to pick candidates and to review finished mappings.
///
/// Failures never abort the run: they are logged and yield no decisions or
/// no corrections.
pub struct LlmMapper {
    generator: Arc<dyn TextGenerator>,
    descriptions: TableDescriptions,
    retry: RetryPolicy,
    debug_dir: Option<PathBuf>,
    tokens_used: AtomicU64,
}

impl LlmMapper {
    pub fn new(generator: Arc<dyn TextGenerator>, descriptions: TableDescriptions, retry: RetryPolicy) -> Self {
        Self {
            generator,
            descriptions,
            retry,
            debug_dir: None,
            tokens_used: AtomicU64::new(0),
        }
    }

    /// Write each decision prompt to `dir/debug_prompt.txt` before sending it.
    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }

    /// Total tokens reported by the model so far.
    pub fn tokens_used(&self) -> u64 {
        self.tokens_used.load(Ordering::Relaxed)
    }

    async fn generate(&self, label: &str, prompt: &str) -> Option<String> {
        let generator = &self.generator;
        match self
            .retry
            .run(label, move || async move { generator.generate(prompt).await })
            .await
        {
            Ok(generation) => {
                self.tokens_used.fetch_add(generation.tokens, Ordering::Relaxed);
                Some(generation.text)
            }
            Err(e) => {
                tracing::error!(operation = label, error = %e, "LLM call failed");
                None
            }
        }
    }

    /// Prompt asking for one decision per item.
    pub fn decision_prompt(&self, items: &[BatchItem]) -> String {
        let tables: BTreeSet<&str> = items
            .iter()
            .flat_map(|item| item.candidates.iter().map(|c| c.table.as_str()))
            .collect();

        let mut prompt = String::from(
            "You map target fields of an Oracle FBDI import template onto columns of the legacy BPCS system.\n\
             For every field below, decide which candidate (if any) holds the same business data.\n\n\
             Rules:\n\
             - MAPPED: a candidate carries exactly the same business meaning. Give its option number.\n\
             - HARDCODED: Oracle expects a fixed value BPCS does not store (for example a default UOM of EA).\n\
             - MANUAL_CONFIG: a Y/N configuration flag with no legacy equivalent; the functional team must decide.\n\
             - NONE: the best candidate is weak or ambiguous. Do not force a match.\n\n",
        );

        prompt.push_str("Legacy tables referenced by the candidates:\n");
        for table in &tables {
            let _ = writeln!(prompt, "- {}: {}", table, self.descriptions.describe(table));
        }

        prompt.push_str(
            "\nAnswer with a JSON list only, one object per field:\n\
             [{\"field_index\": <index>, \"selected_option_index\": <option number or null>, \
             \"mapping_action\": \"MAPPED|HARDCODED|MANUAL_CONFIG|NONE\", \
             \"confidence_score\": <0-100>, \"reasoning\": \"<why>\"}]\n\nFIELDS:\n",
        );

        for item in items {
            let field = &item.field;
            let _ = write!(
                prompt,
                "\n=== FIELD {} ===\nTarget: {}\nDescription: {}\nData type: {}\nContext: {}\nCandidates:\n",
                field.row, field.name, field.description, field.data_type, field.context
            );
            if item.candidates.is_empty() {
                prompt.push_str("  (no candidates found)\n");
            }
            for (i, c) in item.candidates.iter().enumerate() {
                let sample = if c.sample_entry.is_empty() { "N/A" } else { c.sample_entry.as_str() };
                let _ = writeln!(
                    prompt,
                    "  Option {}: {}.{} | {} | sample: {} | similarity {:.2}\n    {}",
                    i + 1,
                    c.table,
                    c.column,
                    c.description,
                    sample,
                    c.score,
                    c.full_text
                );
            }
        }

        prompt
    }

    /// Decisions for one batch; empty on any failure.
    pub async fn decide_batch(&self, items: &[BatchItem]) -> Vec<MappingDecision> {
        if items.is_empty() {
            return Vec::new();
        }

        let prompt = self.decision_prompt(items);
        if let Some(dir) = &self.debug_dir {
            if let Err(e) = std::fs::write(dir.join(DEBUG_PROMPT_FILE), &prompt) {
                tracing::debug!(error = %e, "Could not write debug prompt");
            }
        }

        let Some(text) = self.generate("decide_mapping_batch", &prompt).await else {
            return Vec::new();
        };

        match extract_array::<MappingDecision>(&text) {
            Ok(decisions) => decisions,
            Err(e) => {
                tracing::error!(error = %e, "Invalid decision batch from LLM");
                Vec::new()
            }
        }
    }

    /// Prompt asking for corrections over all mapped rows.
    pub fn review_prompt(rows: &[ReviewRow]) -> String {
        let mut prompt = String::from(
            "You review column mappings from an Oracle FBDI template to legacy BPCS fields.\n\
             Each row shows the chosen legacy column and the mapper's reasoning, which lists the \
             alternatives it considered.\n\n\
             Check every row:\n\
             - consistency: similar targets should map the same way\n\
             - accuracy: if a listed alternative is clearly better, rewrite the row to use it\n\
             - duplicates: several targets wrongly sharing one source column\n\n\
             Answer with a JSON object only:\n\
             {\"corrections\": [\n\
             {\"row_index\": <n>, \"action\": \"REWRITE\", \"new_table\": \"<table>\", \"new_column\": \"<column>\", \"reason\": \"<why>\"},\n\
             {\"row_index\": <n>, \"action\": \"FLAG\", \"issue\": \"<problem>\", \"suggestion\": \"<fix>\"}\n\
             ]}\n\nMAPPINGS:\n",
        );

        for row in rows {
            let _ = write!(
                prompt,
                "Row {}: {} -> {}.{} (confidence {})\n{}\n---\n",
                row.row_index, row.target, row.legacy_table, row.legacy_column, row.confidence, row.logic
            );
        }
        prompt
    }

    /// Corrections for the given rows; entries that do not parse are dropped.
    pub async fn review(&self, rows: &[ReviewRow]) -> Vec<Correction> {
        if rows.is_empty() {
            return Vec::new();
        }

        let prompt = Self::review_prompt(rows);
        let Some(text) = self.generate("refine_mappings", &prompt).await else {
            return Vec::new();
        };

        let response: ReviewResponse = match extract_object(&text) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "Invalid refinement response from LLM");
                return Vec::new();
            }
        };

        response
            .corrections
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<Correction>(value) {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed correction");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::Generation;
    use crate::types::{MappingAction, Result, SchemaField};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, prompt: &str) -> Result<Generation> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let text = self.replies.lock().unwrap().remove(0);
            Ok(Generation { text, tokens: 7 })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn scripted_mapper(replies: &[&str]) -> (Arc<Scripted>, LlmMapper) {
        let generator = Arc::new(Scripted {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        });
        let mut map = BTreeMap::new();
        map.insert("AVM".to_string(), "Vendor master".to_string());
        let mapper = LlmMapper::new(generator.clone(), TableDescriptions::from_map(map), RetryPolicy::default());
        (generator, mapper)
    }

    fn item() -> BatchItem {
        let field = SchemaField::new("AVM", "VNDNAM", "Vendor Name", "A", "ACME", "vendor name");
        BatchItem {
            field: FbdiField {
                row: 4,
                name: "VENDOR_NAME".to_string(),
                description: "Supplier name".to_string(),
                data_type: "VARCHAR2(360)".to_string(),
                context: "Tech Comments: ".to_string(),
                query_text: "VENDOR_NAME".to_string(),
            },
            candidates: vec![Candidate::from_field(&field, 0.91)],
        }
    }

    #[test]
    fn test_prompt_mentions_tables_and_options() {
        let (_, mapper) = scripted_mapper(&[]);
        let prompt = mapper.decision_prompt(&[item()]);
        assert!(prompt.contains("- AVM: Vendor master"));
        assert!(prompt.contains("=== FIELD 4 ==="));
        assert!(prompt.contains("Option 1: AVM.VNDNAM"));
        assert!(prompt.contains("similarity 0.91"));
    }

    #[tokio::test]
    async fn test_decide_batch_parses_and_counts_tokens() {
        let (_, mapper) = scripted_mapper(&[
            "Sure:\n```json\n[{\"field_index\": 4, \"selected_option_index\": 1, \"mapping_action\": \"MAPPED\", \"confidence_score\": 92, \"reasoning\": \"same\"}]\n```",
        ]);
        let decisions = mapper.decide_batch(&[item()]).await;
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].mapping_action, MappingAction::Mapped);
        assert_eq!(decisions[0].selected_option_index, Some(1));
        assert_eq!(mapper.tokens_used(), 7);
    }

    #[tokio::test]
    async fn test_invalid_json_yields_nothing() {
        let (_, mapper) = scripted_mapper(&["I cannot help with that."]);
        assert!(mapper.decide_batch(&[item()]).await.is_empty());
    }

    #[tokio::test]
    async fn test_debug_prompt_written() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mapper) = scripted_mapper(&["[]"]);
        let mapper = mapper.with_debug_dir(dir.path());
        mapper.decide_batch(&[item()]).await;
        let written = std::fs::read_to_string(dir.path().join(DEBUG_PROMPT_FILE)).unwrap();
        assert!(written.contains("VENDOR_NAME"));
    }

    #[tokio::test]
    async fn test_review_skips_malformed_corrections() {
        let (generator, mapper) = scripted_mapper(&[r#"{"corrections": [
            {"row_index": 1, "action": "REWRITE", "new_table": "AVM", "new_column": "VNDAD1", "reason": "address"},
            {"row_index": 2, "action": "FLAG", "issue": "dup", "suggestion": "check"},
            {"action": "DELETE"}
        ]}"#]);
        let rows = vec![ReviewRow {
            row_index: 1,
            target: "ADDRESS_LINE1".to_string(),
            legacy_table: "AVM".to_string(),
            legacy_column: "VNDNAM".to_string(),
            confidence: "80".to_string(),
            logic: "weak".to_string(),
        }];

        let corrections = mapper.review(&rows).await;
        assert_eq!(corrections.len(), 2);
        assert_eq!(corrections[0].row_index(), 1);
        assert!(matches!(corrections[1], Correction::Flag { .. }));
        assert!(generator.prompts.lock().unwrap()[0].contains("Row 1: ADDRESS_LINE1 -> AVM.VNDNAM"));
    }
}
