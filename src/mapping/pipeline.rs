//! Batch mapping: retrieve candidates, ask for decisions, write them into
//! the sheet, checkpoint, review and export.

use crate::config::Settings;
use crate::knowledge::CandidateSource;
use crate::llm::{BatchItem, LlmMapper, ReviewRow};
use crate::mapping::template::{MappingSheet, CONFIDENCE, FBDI_COLUMN, LEGACY_COLUMN, LEGACY_DESCRIPTION, LEGACY_TABLE, MAPPING_LOGIC};
use crate::telemetry::{background_span, record_background_metrics, BackgroundJobType};
use crate::types::{Candidate, Correction, MappingAction, MappingDecision, Result};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::Instrument;

/// Checkpoint rewritten after every batch.
pub const PROGRESS_FILE: &str = "mapping_in_progress.csv";

/// Reasoning recorded when the model returned nothing for a row.
pub const NO_RESPONSE: &str = "Batch processing error or no response.";

/// Pipeline tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub batch_size: usize,
    pub candidates_per_field: usize,
    pub alternatives_recorded: usize,
    pub logic_snippet_chars: usize,
    /// Run the review pass after mapping
    pub refine: bool,
}

impl From<&Settings> for PipelineOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            batch_size: settings.mapping_batch_size.max(1),
            candidates_per_field: settings.candidates_per_field,
            alternatives_recorded: settings.alternatives_recorded,
            logic_snippet_chars: settings.logic_snippet_chars,
            refine: true,
        }
    }
}

/// Counts for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingSummary {
    pub fields: usize,
    pub mapped: usize,
    pub hardcoded: usize,
    pub manual_config: usize,
    pub unmapped: usize,
    pub corrections: usize,
    pub tokens: u64,
    pub output: PathBuf,
}

impl MappingSummary {
    fn count(&mut self, outcome: MappingAction) {
        match outcome {
            MappingAction::Mapped => self.mapped += 1,
            MappingAction::Hardcoded => self.hardcoded += 1,
            MappingAction::ManualConfig => self.manual_config += 1,
            MappingAction::None => self.unmapped += 1,
        }
    }
}

/// Drives one template through candidate search, decisions and review.
pub struct MappingPipeline<'a> {
    source: &'a dyn CandidateSource,
    mapper: &'a LlmMapper,
    options: PipelineOptions,
    output_dir: PathBuf,
}

impl<'a> MappingPipeline<'a> {
    pub fn new(
        source: &'a dyn CandidateSource,
        mapper: &'a LlmMapper,
        options: PipelineOptions,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            mapper,
            options,
            output_dir: output_dir.into(),
        }
    }

    pub fn progress_path(&self) -> PathBuf {
        self.output_dir.join(PROGRESS_FILE)
    }

    /// Map every target row of `sheet` and export the result.
    ///
    /// Search and LLM failures degrade to unmapped rows; only file writes
    /// abort the run.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::IoError` / `MapperError::CsvError` if the
    /// checkpoint or final file cannot be written
    pub async fn run(&self, sheet: &mut MappingSheet) -> Result<MappingSummary> {
        let fields = sheet.target_fields();
        let mut summary = MappingSummary {
            fields: fields.len(),
            ..MappingSummary::default()
        };
        let mut candidates_by_row: HashMap<usize, Vec<Candidate>> = HashMap::new();
        let batch_count = fields.len().div_ceil(self.options.batch_size);
        let progress_path = self.progress_path();

        tracing::info!(fields = fields.len(), batches = batch_count, "Starting mapping loop");

        for (batch_no, chunk) in fields.chunks(self.options.batch_size).enumerate() {
            let span = background_span(BackgroundJobType::MappingBatch, &format!("batch {}/{}", batch_no + 1, batch_count));
            let outcomes = async {
                let start = Instant::now();
                tracing::info!(
                    first_row = chunk[0].row,
                    last_row = chunk[chunk.len() - 1].row,
                    "Processing batch"
                );

                let mut items = Vec::with_capacity(chunk.len());
                for field in chunk {
                    let candidates = match self
                        .source
                        .candidates(&field.query_text, self.options.candidates_per_field)
                        .await
                    {
                        Ok(c) => c,
                        Err(e) => {
                            tracing::warn!(row = field.row, error = %e, "Candidate search failed");
                            Vec::new()
                        }
                    };
                    items.push(BatchItem {
                        field: field.clone(),
                        candidates,
                    });
                }

                let decisions = self.mapper.decide_batch(&items).await;
                let status = if decisions.is_empty() { "failed" } else { "success" };
                record_background_metrics(Some(items.len()), Some(start.elapsed().as_millis() as u64), status);
                (items, decisions)
            }
            .instrument(span)
            .await;

            let (items, decisions) = outcomes;
            for outcome in apply_decisions(sheet, &items, &decisions, self.options.alternatives_recorded) {
                summary.count(outcome);
            }
            for item in items {
                candidates_by_row.insert(item.field.row, item.candidates);
            }

            sheet.write(&progress_path)?;
        }

        if self.options.refine {
            summary.corrections = self.refine(sheet, &candidates_by_row).await;
        }

        let output = export_path(&self.output_dir, &sheet.stem());
        sheet.write(&output)?;
        summary.tokens = self.mapper.tokens_used();
        summary.output = output;

        tracing::info!(
            output = %summary.output.display(),
            mapped = summary.mapped,
            hardcoded = summary.hardcoded,
            manual_config = summary.manual_config,
            unmapped = summary.unmapped,
            corrections = summary.corrections,
            tokens = summary.tokens,
            "Mapping complete"
        );
        Ok(summary)
    }

    /// Review pass over every mapped row. Returns the number of corrections applied.
    pub async fn refine(&self, sheet: &mut MappingSheet, candidates_by_row: &HashMap<usize, Vec<Candidate>>) -> usize {
        let span = background_span(BackgroundJobType::Refinement, &sheet.stem());
        async {
            let rows = review_rows(sheet, self.options.logic_snippet_chars);
            if rows.is_empty() {
                tracing::info!("No mapped rows to review");
                return 0;
            }
            tracing::info!(rows = rows.len(), "Starting refinement pass");
            let corrections = self.mapper.review(&rows).await;
            let applied = apply_corrections(sheet, &corrections, candidates_by_row);
            record_background_metrics(Some(rows.len()), None, "success");
            applied
        }
        .instrument(span)
        .await
    }
}

/// `{stem}_{YYYYMMDD_HHMMSS}.csv` in `dir`.
pub fn export_path(dir: &Path, stem: &str) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("{}_{}.csv", stem, timestamp))
}

/// Numbered list of the best candidates, appended to the mapping logic.
pub fn alternatives_text(candidates: &[Candidate], limit: usize) -> String {
    let mut text = format!("\n[Top {} Alternatives Considered:]", limit);
    for (i, c) in candidates.iter().take(limit).enumerate() {
        let _ = write!(
            text,
            "\n{}. {}.{} - {} (Score: {:.2})",
            i + 1,
            c.table,
            c.column,
            c.description,
            c.score
        );
    }
    text
}

fn format_confidence(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{:.0}", score)
    } else {
        format!("{}", score)
    }
}

/// Write decisions into the sheet, one outcome per item.
///
/// Decisions are matched to items by `field_index`; items without a
/// decision keep their legacy columns and only get reasoning and a zero
/// confidence. Existing mapping logic is kept and extended.
pub fn apply_decisions(
    sheet: &mut MappingSheet,
    items: &[BatchItem],
    decisions: &[MappingDecision],
    alternatives: usize,
) -> Vec<MappingAction> {
    let by_row: HashMap<usize, &MappingDecision> = decisions
        .iter()
        .filter_map(|d| d.field_index.map(|idx| (idx, d)))
        .collect();

    items
        .iter()
        .map(|item| apply_decision(sheet, item, by_row.get(&item.field.row).copied(), alternatives))
        .collect()
}

/// Write one decision. Returns what actually happened to the row.
pub fn apply_decision(
    sheet: &mut MappingSheet,
    item: &BatchItem,
    decision: Option<&MappingDecision>,
    alternatives: usize,
) -> MappingAction {
    let row = item.field.row;
    let action = decision.map(|d| d.mapping_action).unwrap_or_default();
    let confidence = decision.map(|d| d.confidence_score).unwrap_or(0.0);
    let reasoning = decision
        .and_then(|d| d.reasoning.as_deref())
        .filter(|r| !r.trim().is_empty())
        .unwrap_or(NO_RESPONSE);

    let alternatives = alternatives_text(&item.candidates, alternatives);
    let existing = sheet.get(row, MAPPING_LOGIC).trim();
    let logic = if existing.is_empty() {
        format!("{}\n{}", reasoning, alternatives)
    } else {
        format!("{} | {}\n{}", existing, reasoning, alternatives)
    };

    let selected = decision
        .and_then(|d| d.selected_option_index)
        .filter(|&i| i >= 1 && i <= item.candidates.len())
        .map(|i| &item.candidates[i - 1]);

    let outcome = match (action, selected) {
        (MappingAction::Mapped, Some(choice)) => {
            sheet.set(row, LEGACY_TABLE, choice.table.as_str());
            sheet.set(row, LEGACY_COLUMN, choice.column.as_str());
            sheet.set(row, LEGACY_DESCRIPTION, choice.description.as_str());
            tracing::info!(row, table = %choice.table, column = %choice.column, confidence, "Mapped");
            MappingAction::Mapped
        }
        (MappingAction::Hardcoded | MappingAction::ManualConfig, _) => {
            sheet.set(row, LEGACY_TABLE, action.as_str());
            sheet.set(row, LEGACY_COLUMN, action.as_str());
            tracing::info!(row, action = action.as_str(), "Action recorded");
            action
        }
        _ => {
            tracing::info!(row, action = action.as_str(), "No match found");
            MappingAction::None
        }
    };

    sheet.set(row, MAPPING_LOGIC, logic);
    sheet.set(row, CONFIDENCE, format_confidence(confidence));
    outcome
}

/// Mapped rows as the review pass sees them, logic cut to `snippet_chars`.
pub fn review_rows(sheet: &MappingSheet, snippet_chars: usize) -> Vec<ReviewRow> {
    (0..sheet.len())
        .filter(|&row| !sheet.get(row, LEGACY_COLUMN).trim().is_empty())
        .map(|row| ReviewRow {
            row_index: row,
            target: sheet.get(row, FBDI_COLUMN).to_string(),
            legacy_table: sheet.get(row, LEGACY_TABLE).to_string(),
            legacy_column: sheet.get(row, LEGACY_COLUMN).to_string(),
            confidence: sheet.get(row, CONFIDENCE).to_string(),
            logic: sheet.get(row, MAPPING_LOGIC).chars().take(snippet_chars).collect(),
        })
        .collect()
}

/// Apply review corrections. Unknown rows are skipped.
///
/// A rewrite to a column that was among the row's candidates also refreshes
/// the legacy description.
pub fn apply_corrections(
    sheet: &mut MappingSheet,
    corrections: &[Correction],
    candidates_by_row: &HashMap<usize, Vec<Candidate>>,
) -> usize {
    let mut applied = 0;
    for correction in corrections {
        let row = correction.row_index();
        if !sheet.contains_row(row) {
            tracing::debug!(row, "Correction for unknown row ignored");
            continue;
        }
        let current = sheet.get(row, MAPPING_LOGIC).to_string();

        match correction {
            Correction::Rewrite {
                new_table,
                new_column,
                reason,
                ..
            } => {
                tracing::info!(row, table = %new_table, column = %new_column, reason = %reason, "Refinement rewrite");
                let description = candidates_by_row
                    .get(&row)
                    .and_then(|cands| cands.iter().find(|c| c.table == *new_table && c.column == *new_column))
                    .map(|c| c.description.clone());

                sheet.set(row, LEGACY_TABLE, new_table.as_str());
                sheet.set(row, LEGACY_COLUMN, new_column.as_str());
                if let Some(description) = description {
                    sheet.set(row, LEGACY_DESCRIPTION, description);
                }
                sheet.set(row, MAPPING_LOGIC, format!("[REFINEMENT REWRITE: {}]\n{}", reason, current));
            }
            Correction::Flag { issue, suggestion, .. } => {
                tracing::info!(row, issue = %issue, "Refinement flag");
                sheet.set(
                    row,
                    MAPPING_LOGIC,
                    format!("[REFINEMENT FLAG: {} - {}]\n{}", issue, suggestion, current),
                );
            }
        }
        applied += 1;
    }
    applied
}
