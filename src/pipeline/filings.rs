//! The balance-sheet stages: locate the table, read its units, convert it to
//! JSON, find the reporting-date column, then sum the key rows.

use std::borrow::Cow;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::prompts;
use super::artifacts::JsonDocument;
use super::stage::{Pipeline, Prepared, Stage, StageContext};
use crate::consensus::{OracleOutput, OutputShape};
use crate::error::FatalError;
use crate::escalation::{StagePlan, StageResult, SupervisorSpec, TermRules};
use crate::oracle::{OracleRequest, ResponseFormat};
use crate::validation::checks::{Conforms, IndexRange, MinContentLength, OneOf, PathsExist, Present, key_paths};
use crate::validation::{Problem, ValidationGate};

pub const TABLE_INDEX: &str = "table_index";
pub const SUM_UNITS: &str = "sum_units";
pub const TABLE_BODY: &str = "table_body";
pub const TABLE_JSON: &str = "table_json";
pub const VALUE_COLUMN: &str = "value_column";
pub const CASH_POSITION: &str = "cash_position";
pub const LONG_TERM_DEBT: &str = "long_term_debt";

const NO_TEXT: &str = "balance sheet: no text in file";
const NO_TABLE: &str = "balance sheet: no table found in text block list";
const INDEX_OUT_OF_RANGE: &str = "balance sheet: table index out of range";
const TABLE_TOO_SHORT: &str = "balance sheet: table text block too short";

const NO_COMMENTS: &str = "pre-table comments: no comments found";
const COMMENTS_TOO_SHORT: &str = "pre-table comments: extracted str too short";

const UNITS_NOT_FOUND: &str = "units: sum reporting units not found";
const UNITS_NOT_INT: &str = "units: sum reporting units not convertible to int";
const UNITS_OUT_OF_RANGE: &str = "units: sum reporting units out of range";

const POST_TEXT_NOT_FOUND: &str = "post-table text: content not found";
const POST_TEXT_NOT_STR: &str = "post-table text: content not str";
const POST_TEXT_NO_MATCH: &str = "post-table text: no match to text block";

const JSON_MISSING: &str = "json output: model failed to produce table JSON";
const JSON_INVALID: &str = "json output: table not in valid JSON format";
const JSON_NOT_DICT: &str = "json output: table not in dict form";
const JSON_FEW_KEYS: &str = "json output: not enough keys in balance sheet JSON";

const DATES_NOT_LIST: &str = "value column: dates not returned as list";

/// Segments are cut around the table with this much context; a segment that
/// holds a whole balance sheet is close to full length.
const SEGMENT_CHARS: usize = 3000;
const MIN_TABLE_CHARS: usize = SEGMENT_CHARS * 9 / 10;
const MIN_COMMENT_CHARS: usize = 50;
const UNIT_SCALES: [i64; 3] = [1, 1_000, 1_000_000];
const UNITS_TRIAL_CAP: usize = 3;
/// Cheap-tier tries for the stages whose answers never repeat verbatim.
const CONVERSION_ATTEMPTS: usize = 3;
const MIN_TABLE_KEYS: usize = 20;

/// Every problem description the filing stages can log.
pub const VOCABULARY: &[&str] = &[
    NO_TEXT,
    NO_TABLE,
    INDEX_OUT_OF_RANGE,
    TABLE_TOO_SHORT,
    NO_COMMENTS,
    COMMENTS_TOO_SHORT,
    UNITS_NOT_FOUND,
    UNITS_NOT_INT,
    UNITS_OUT_OF_RANGE,
    POST_TEXT_NOT_FOUND,
    POST_TEXT_NOT_STR,
    POST_TEXT_NO_MATCH,
    JSON_MISSING,
    JSON_INVALID,
    JSON_NOT_DICT,
    JSON_FEW_KEYS,
    DATES_NOT_LIST,
    CCP.missing_section,
    CCP.no_paths,
    CCP.not_object,
    CCP.bad_path,
    CCP.suspect,
    CCP.missing_sum,
    LTD.missing_section,
    LTD.no_paths,
    LTD.not_object,
    LTD.bad_path,
    LTD.suspect,
    LTD.missing_sum,
];

pub fn filing_pipeline() -> Pipeline {
    Pipeline::new(vec![
        Box::new(TableIndex),
        Box::new(SumUnits),
        Box::new(TableBody),
        Box::new(TableJson),
        Box::new(ValueColumn),
        Box::new(KeyPathStage::cash_position()),
        Box::new(KeyPathStage::long_term_debt()),
    ])
}

/// Which candidate segment holds the balance sheet.
pub struct TableIndex;

impl Stage for TableIndex {
    fn name(&self) -> &'static str {
        TABLE_INDEX
    }

    fn prerequisites(&self) -> &'static [&'static str] {
        &[]
    }

    fn prepare(&self, ctx: &StageContext<'_>) -> Result<Prepared, FatalError> {
        let segments = ctx.artifacts.candidate_segments(ctx.item)?;
        match segments.len() {
            0 => Ok(Prepared::Done(StageResult::failed(
                ctx.item.id,
                TABLE_INDEX,
                vec![Problem::new(NO_TEXT)],
            ))),
            1 => Ok(Prepared::Done(StageResult::resolved(
                ctx.item.id,
                TABLE_INDEX,
                OracleOutput::Scalar(json!(0)),
            ))),
            n => {
                let lengths = segments.iter().map(|s| s.chars().count()).collect();
                let gate = ValidationGate::new()
                    .with(Present::new(NO_TABLE))
                    .with(Conforms::new(OutputShape::Integer, NO_TABLE))
                    .with(IndexRange::new(n, INDEX_OUT_OF_RANGE))
                    .with(MinContentLength::new(lengths, MIN_TABLE_CHARS, TABLE_TOO_SHORT));
                Ok(Prepared::Ask(StagePlan {
                    stage: TABLE_INDEX.into(),
                    shape: OutputShape::Integer,
                    request: OracleRequest::new(prompts::TABLE_INDEX, prompts::table_index_input(&segments)),
                    gate,
                    supervisor: None,
                    trial_cap: None,
                    attempts: None,
                }))
            }
        }
    }

    fn summarize(&self, _ctx: &StageContext<'_>, result: &mut StageResult) -> Result<Option<Value>, FatalError> {
        Ok(result.output.as_ref().and_then(OracleOutput::as_i64).map(Value::from))
    }
}

/// The segment holding the balance sheet, split where the table starts.
#[derive(Debug, Clone)]
struct TableText {
    segment: String,
    /// Byte offset of the first "assets".
    start: usize,
}

impl TableText {
    /// `None` when nothing but whitespace precedes the first "assets".
    fn new(segment: String) -> Option<Self> {
        let start = segment.to_ascii_lowercase().find("assets")?;
        let text = Self { segment, start };
        (!text.comments().is_empty()).then_some(text)
    }

    /// Heading text before the table, where units and dates are stated.
    fn comments(&self) -> &str {
        self.segment[..self.start].trim()
    }

    fn body(&self) -> &str {
        &self.segment[self.start..]
    }

    /// Table text up to `post_text`, which is searched for from 30% into the
    /// segment onwards.
    fn crop(&self, post_text: &str) -> Option<&str> {
        let len = self.segment.len();
        let from = (len * 3 / 10..=len).find(|&i| self.segment.is_char_boundary(i))?;
        let end = from + self.segment[from..].find(post_text)?;
        let body = self.segment.get(self.start..end)?;
        (!body.trim().is_empty()).then_some(body)
    }

    /// The segment chosen by the table index, or the failed result to record.
    fn load(ctx: &StageContext<'_>, stage: &str) -> Result<Result<Self, StageResult>, FatalError> {
        let Some(index) = ctx.prior_i64(TABLE_INDEX) else {
            warn!(item_id = ctx.item.id, stage, "no table index for item");
            return Ok(Err(StageResult::failed(ctx.item.id, stage, Vec::new())));
        };
        let segments = ctx.artifacts.candidate_segments(ctx.item)?;
        let segment = usize::try_from(index).ok().and_then(|i| segments.into_iter().nth(i));

        let Some(text) = segment.and_then(TableText::new) else {
            return Ok(Err(fail(ctx, stage, NO_COMMENTS)));
        };
        if text.comments().chars().count() < MIN_COMMENT_CHARS {
            debug!(item_id = ctx.item.id, comments = text.comments(), "pre-table comments too short");
            return Ok(Err(fail(ctx, stage, COMMENTS_TOO_SHORT)));
        }
        Ok(Ok(text))
    }
}

fn fail(ctx: &StageContext<'_>, stage: &str, problem: &str) -> StageResult {
    StageResult::failed(ctx.item.id, stage, vec![Problem::new(problem)])
}

/// Scale of the dollar amounts in the table: 1, 1000 or 1000000.
pub struct SumUnits;

impl Stage for SumUnits {
    fn name(&self) -> &'static str {
        SUM_UNITS
    }

    fn prerequisites(&self) -> &'static [&'static str] {
        &[TABLE_INDEX]
    }

    fn prepare(&self, ctx: &StageContext<'_>) -> Result<Prepared, FatalError> {
        let text = match TableText::load(ctx, SUM_UNITS)? {
            Ok(text) => text,
            Err(result) => return Ok(Prepared::Done(result)),
        };

        let gate = ValidationGate::new()
            .with(Present::new(UNITS_NOT_FOUND))
            .with(Conforms::new(OutputShape::Integer, UNITS_NOT_INT))
            .with(OneOf::new(UNIT_SCALES.to_vec(), UNITS_OUT_OF_RANGE));
        Ok(Prepared::Ask(StagePlan {
            stage: SUM_UNITS.into(),
            shape: OutputShape::Integer,
            request: OracleRequest::new(prompts::SUM_UNITS, prompts::sum_units_input(text.comments())),
            gate,
            supervisor: None,
            trial_cap: Some(UNITS_TRIAL_CAP),
            attempts: None,
        }))
    }

    fn summarize(&self, _ctx: &StageContext<'_>, result: &mut StageResult) -> Result<Option<Value>, FatalError> {
        Ok(result.output.as_ref().and_then(OracleOutput::as_i64).map(Value::from))
    }
}

/// Text the oracle says follows the table, unquoted.
fn post_table_text(output: &OracleOutput) -> Result<String, &'static str> {
    let raw = match output {
        OracleOutput::Empty => return Err(POST_TEXT_NOT_FOUND),
        OracleOutput::Scalar(Value::String(s)) | OracleOutput::Invalid(s) => s.as_str(),
        _ => return Err(POST_TEXT_NOT_STR),
    };
    let text = match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(s)) => s,
        Ok(_) => return Err(POST_TEXT_NOT_STR),
        Err(_) => match raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
            Some(inner) => inner.replace("\\t", "\t").replace("\\n", "\n"),
            None => raw.to_string(),
        },
    };
    if text.is_empty() {
        return Err(POST_TEXT_NOT_FOUND);
    }
    Ok(text)
}

/// Where the table ends: the text right after its last row. Its ledger value
/// is that text, or null when no tier found it and the whole segment stands
/// in for the table.
pub struct TableBody;

impl Stage for TableBody {
    fn name(&self) -> &'static str {
        TABLE_BODY
    }

    fn prerequisites(&self) -> &'static [&'static str] {
        &[TABLE_INDEX]
    }

    fn prepare(&self, ctx: &StageContext<'_>) -> Result<Prepared, FatalError> {
        let text = match TableText::load(ctx, TABLE_BODY)? {
            Ok(text) => text,
            Err(result) => return Ok(Prepared::Done(result)),
        };

        let request = OracleRequest::new(prompts::TABLE_BODY, prompts::table_body_input(text.body()));
        let gate = ValidationGate::new()
            .with(Present::new(POST_TEXT_NOT_FOUND))
            .with(move |output: &OracleOutput| {
                let post = post_table_text(output).map_err(|p| vec![Problem::new(p)])?;
                match text.crop(&post) {
                    Some(_) => Ok(()),
                    None => Err(vec![Problem::new(POST_TEXT_NO_MATCH)]),
                }
            });

        Ok(Prepared::Ask(StagePlan {
            stage: TABLE_BODY.into(),
            shape: OutputShape::Text,
            request,
            gate,
            supervisor: None,
            trial_cap: None,
            attempts: Some(CONVERSION_ATTEMPTS),
        }))
    }

    fn summarize(&self, _ctx: &StageContext<'_>, result: &mut StageResult) -> Result<Option<Value>, FatalError> {
        Ok(result
            .output
            .as_ref()
            .and_then(|output| post_table_text(output).ok())
            .map(Value::String))
    }

    fn fallback(&self, _ctx: &StageContext<'_>, result: &StageResult) -> Option<Value> {
        // Only once the oracle was asked; a missing heading blocks conversion.
        (!result.record.tiers.is_empty()).then_some(Value::Null)
    }
}

/// Keys at every level of nested objects.
fn key_count(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.len() + map.values().map(key_count).sum::<usize>(),
        Value::Array(items) => items.iter().map(key_count).sum(),
        _ => 0,
    }
}

/// Answers often lose the final closing brace.
fn close_brace(text: &str) -> Cow<'_, str> {
    if text.matches('{').count() > text.matches('}').count() {
        Cow::Owned(format!("{text}}}"))
    } else {
        Cow::Borrowed(text)
    }
}

/// The converted table, or the problem that makes the answer unusable.
fn parse_table(output: &OracleOutput) -> Result<Value, &'static str> {
    let raw = match output {
        OracleOutput::Scalar(Value::String(s)) | OracleOutput::Invalid(s) => s.as_str(),
        _ => return Err(JSON_MISSING),
    };
    let table: Value = serde_json::from_str(&close_brace(raw)).map_err(|_| JSON_INVALID)?;
    if !table.is_object() {
        return Err(JSON_NOT_DICT);
    }
    if key_count(&table) < MIN_TABLE_KEYS {
        return Err(JSON_FEW_KEYS);
    }
    Ok(table)
}

/// Converts the table text to nested JSON and saves it as the item's table.
/// Its ledger value is the number of keys in the saved table.
pub struct TableJson;

impl Stage for TableJson {
    fn name(&self) -> &'static str {
        TABLE_JSON
    }

    fn prerequisites(&self) -> &'static [&'static str] {
        &[TABLE_BODY]
    }

    fn prepare(&self, ctx: &StageContext<'_>) -> Result<Prepared, FatalError> {
        let text = match TableText::load(ctx, TABLE_JSON)? {
            Ok(text) => text,
            Err(result) => return Ok(Prepared::Done(result)),
        };
        let body = match ctx.prior.get(TABLE_BODY) {
            Some(Value::String(post)) => text.crop(post).unwrap_or(text.segment.as_str()),
            _ => text.segment.as_str(),
        };

        let gate = ValidationGate::new().with(|output: &OracleOutput| {
            parse_table(output)
                .map(drop)
                .map_err(|p| vec![Problem::new(p)])
        });
        Ok(Prepared::Ask(StagePlan {
            stage: TABLE_JSON.into(),
            shape: OutputShape::Text,
            request: OracleRequest::new(prompts::TABLE_JSON, prompts::table_json_input(body)),
            gate,
            supervisor: None,
            trial_cap: None,
            attempts: Some(CONVERSION_ATTEMPTS),
        }))
    }

    fn summarize(&self, ctx: &StageContext<'_>, result: &mut StageResult) -> Result<Option<Value>, FatalError> {
        let Some(table) = result.output.as_ref().and_then(|output| parse_table(output).ok()) else {
            return Ok(None);
        };
        let keys = key_count(&table);
        ctx.artifacts.save_table(ctx.item, &table)?;
        info!(item_id = ctx.item.id, keys, "balance sheet table converted");
        Ok(Some(json!(keys)))
    }
}

/// Median length of the row lists, rounded half to even. `None` for a table
/// without rows.
fn column_count(table: &Value) -> Option<usize> {
    fn collect(value: &Value, lengths: &mut Vec<usize>) {
        if let Value::Object(map) = value {
            for child in map.values() {
                match child {
                    Value::Array(row) => lengths.push(row.len()),
                    Value::Object(_) => collect(child, lengths),
                    _ => {}
                }
            }
        }
    }

    let mut lengths = Vec::new();
    collect(table, &mut lengths);
    if lengths.is_empty() {
        return None;
    }
    lengths.sort_unstable();
    let mid = lengths.len() / 2;
    let median = if lengths.len() % 2 == 0 {
        (lengths[mid - 1] + lengths[mid]) as f64 / 2.0
    } else {
        lengths[mid] as f64
    };
    Some(median.round_ties_even() as usize)
}

/// Index of the latest of the first `columns` dates; the first column when
/// there are none. Dates are `YYYY-MM-DD`, so text order is date order.
fn latest_column(dates: &[Value], columns: usize) -> usize {
    let mut latest: Option<(usize, String)> = None;
    for (i, date) in dates.iter().take(columns).enumerate() {
        let date = date.as_str().map_or_else(|| date.to_string(), str::to_string);
        if latest.as_ref().is_none_or(|(_, best)| date > *best) {
            latest = Some((i, date));
        }
    }
    latest.map_or(0, |(i, _)| i)
}

/// Which value column of the table holds the reporting date's amounts.
pub struct ValueColumn;

impl Stage for ValueColumn {
    fn name(&self) -> &'static str {
        VALUE_COLUMN
    }

    fn prerequisites(&self) -> &'static [&'static str] {
        &[TABLE_JSON]
    }

    fn prepare(&self, ctx: &StageContext<'_>) -> Result<Prepared, FatalError> {
        let text = match TableText::load(ctx, VALUE_COLUMN)? {
            Ok(text) => text,
            Err(result) => return Ok(Prepared::Done(result)),
        };

        Ok(Prepared::Ask(StagePlan {
            stage: VALUE_COLUMN.into(),
            shape: OutputShape::List,
            request: OracleRequest::new(prompts::VALUE_COLUMN, prompts::value_column_input(text.comments())),
            gate: ValidationGate::new().with(Conforms::new(OutputShape::List, DATES_NOT_LIST)),
            supervisor: None,
            trial_cap: None,
            attempts: None,
        }))
    }

    fn summarize(&self, ctx: &StageContext<'_>, result: &mut StageResult) -> Result<Option<Value>, FatalError> {
        let Some(dates) = result.output.as_ref().and_then(OracleOutput::as_array) else {
            return Ok(None);
        };
        let Some(table) = ctx.artifacts.table(ctx.item)? else {
            warn!(item_id = ctx.item.id, "no converted table for item");
            return Ok(None);
        };
        let columns = column_count(table.root()).unwrap_or(dates.len());
        let column = latest_column(dates, columns);
        debug!(item_id = ctx.item.id, columns, column, "value date column");
        Ok(Some(json!(column)))
    }
}

/// Problem names of one key-path stage.
struct KeyPathProblems {
    missing_section: &'static str,
    no_paths: &'static str,
    not_object: &'static str,
    bad_path: &'static str,
    suspect: &'static str,
    missing_sum: &'static str,
}

const CCP: KeyPathProblems = KeyPathProblems {
    missing_section: "CCP: assets not found in json table",
    no_paths: "CCP: key paths not found",
    not_object: "CCP: dict paths not in dict format",
    bad_path: "CCP: problematic dict path",
    suspect: "CCP: suspicious key path(s) detected",
    missing_sum: "CCP: missing sum(s) detected",
};

const LTD: KeyPathProblems = KeyPathProblems {
    missing_section: "LTD: liabilities not found in json table",
    no_paths: "LTD: key paths not found",
    not_object: "LTD: dict paths not in dict format",
    bad_path: "LTD: problematic dict path",
    suspect: "LTD: suspicious key path(s) detected",
    missing_sum: "LTD: missing sum(s) detected",
};

/// Picks the rows of one balance-sheet section that make up a total, then
/// sums them in millions of dollars.
pub struct KeyPathStage {
    name: &'static str,
    section_term: &'static str,
    section_label: &'static str,
    instructions: &'static str,
    review_instructions: &'static str,
    review_preamble: &'static str,
    rules: fn() -> TermRules,
    problems: KeyPathProblems,
}

impl KeyPathStage {
    pub fn cash_position() -> Self {
        Self {
            name: CASH_POSITION,
            section_term: "asset",
            section_label: "Assets",
            instructions: prompts::CASH_POSITION,
            review_instructions: prompts::CASH_POSITION_REVIEW,
            review_preamble: prompts::CASH_POSITION_REVIEW_INPUT,
            rules: TermRules::cash_position,
            problems: CCP,
        }
    }

    pub fn long_term_debt() -> Self {
        Self {
            name: LONG_TERM_DEBT,
            section_term: "liabilit",
            section_label: "Liabilities",
            instructions: prompts::LONG_TERM_DEBT,
            review_instructions: prompts::LONG_TERM_DEBT_REVIEW,
            review_preamble: prompts::LONG_TERM_DEBT_REVIEW_INPUT,
            rules: TermRules::long_term_debt,
            problems: LTD,
        }
    }

    fn section(&self, ctx: &StageContext<'_>) -> Result<Option<JsonDocument>, FatalError> {
        Ok(ctx
            .artifacts
            .table(ctx.item)?
            .and_then(|table| table.section(self.section_term)))
    }
}

fn value_column(ctx: &StageContext<'_>) -> Option<usize> {
    ctx.prior_i64(VALUE_COLUMN).and_then(|c| usize::try_from(c).ok())
}

impl Stage for KeyPathStage {
    fn name(&self) -> &'static str {
        self.name
    }

    fn prerequisites(&self) -> &'static [&'static str] {
        &[SUM_UNITS, TABLE_JSON, VALUE_COLUMN]
    }

    fn prepare(&self, ctx: &StageContext<'_>) -> Result<Prepared, FatalError> {
        if ctx.prior_i64(SUM_UNITS).is_none() || value_column(ctx).is_none() {
            warn!(item_id = ctx.item.id, stage = self.name, "no reporting units or value column for item");
            return Ok(Prepared::Done(StageResult::failed(ctx.item.id, self.name, Vec::new())));
        }
        let Some(section) = self.section(ctx)? else {
            return Ok(Prepared::Done(fail(ctx, self.name, self.problems.missing_section)));
        };

        let request = OracleRequest::new(
            self.instructions,
            prompts::key_paths_input(self.section_label, section.root()),
        )
        .with_format(ResponseFormat::JsonObject);

        let no_paths = self.problems.no_paths;
        let gate = ValidationGate::new()
            .with(Present::new(no_paths))
            .with(move |output: &OracleOutput| match output.as_object() {
                Some(paths) if paths.is_empty() => Err(vec![Problem::new(no_paths)]),
                _ => Ok(()),
            })
            .with(Conforms::new(OutputShape::Object, self.problems.not_object))
            .with(PathsExist::new(section, self.problems.bad_path));

        Ok(Prepared::Ask(StagePlan {
            stage: self.name.into(),
            shape: OutputShape::Object,
            request,
            gate,
            supervisor: Some(SupervisorSpec {
                tier: ctx.supervisor.clone(),
                rules: (self.rules)(),
                instructions: self.review_instructions.into(),
                preamble: self.review_preamble.into(),
                warning: Problem::new(self.problems.suspect),
            }),
            trial_cap: None,
            attempts: None,
        }))
    }

    fn summarize(&self, ctx: &StageContext<'_>, result: &mut StageResult) -> Result<Option<Value>, FatalError> {
        let (Some(units), Some(column), Some(section)) =
            (ctx.prior_i64(SUM_UNITS), value_column(ctx), self.section(ctx)?)
        else {
            return Ok(None);
        };
        let Some(paths) = result.output.as_ref().and_then(OracleOutput::as_object).map(key_paths) else {
            return Ok(None);
        };

        // A row that is missing or would overflow the total counts as missing.
        let mut total = 0i64;
        for (id, path) in &paths {
            let value = path.as_deref().and_then(|p| section.row_value(p, column));
            match value.and_then(|v| total.checked_add(v)) {
                Some(sum) => total = sum,
                None => result.note(Problem::detailed(self.problems.missing_sum, format!("index = {id}"))),
            }
        }
        Ok(Some(json!(to_millions(total, units))))
    }
}

/// Table amount scaled to millions, three decimals.
pub fn to_millions(total: i64, units: i64) -> f64 {
    let millions = total as f64 * units as f64 / 1e6;
    (millions * 1000.0).round() / 1000.0
}
