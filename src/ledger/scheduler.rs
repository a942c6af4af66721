use std::fmt;

use serde::Deserialize;
use tracing::info;

use super::store::{Checkpoint, CheckpointStore, WorkItem};
use crate::error::FatalError;

/// Which items a run processes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// `None` means every eligible item.
    pub batch_size: Option<usize>,
    pub skip_existing: bool,
    /// 1-based row (in id order) where an overwrite run starts.
    pub overwrite_from: Option<usize>,
    /// Explicit ids to reprocess; overrides everything else when non-empty.
    pub retry_ids: Vec<i64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            skip_existing: true,
            overwrite_from: None,
            retry_ids: Vec::new(),
        }
    }
}

impl BatchConfig {
    pub fn mode(&self) -> SelectionMode {
        if !self.retry_ids.is_empty() {
            SelectionMode::Retry
        } else if !self.skip_existing {
            SelectionMode::Overwrite {
                from: self.overwrite_from.unwrap_or(1),
            }
        } else {
            SelectionMode::SkipExisting
        }
    }

    pub fn validate(&self) -> Result<(), FatalError> {
        if self.batch_size == Some(0) {
            return Err(FatalError::Config("batch_size must be positive".into()));
        }
        if self.overwrite_from == Some(0) {
            return Err(FatalError::Config("overwrite_from is a 1-based row".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Retry,
    Overwrite { from: usize },
    SkipExisting,
}

impl SelectionMode {
    /// Modes that rewrite earlier results.
    pub fn is_destructive(&self) -> bool {
        !matches!(self, SelectionMode::SkipExisting)
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionMode::Retry => write!(f, "retry"),
            SelectionMode::Overwrite { from } => write!(f, "overwrite from row {from}"),
            SelectionMode::SkipExisting => write!(f, "skip existing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub mode: SelectionMode,
    pub items: Vec<WorkItem>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// An item left out because an earlier stage is missing or failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub item: WorkItem,
    pub stage: String,
    pub checkpoint: Checkpoint,
}

/// Pick the batch for this run.
///
/// `checkpoint_stage` is the column skip-existing mode looks at: items whose
/// value there is still NULL are due.
pub fn select_batch(
    store: &CheckpointStore,
    config: &BatchConfig,
    checkpoint_stage: &str,
) -> Result<Selection, FatalError> {
    config.validate()?;
    let mode = config.mode();

    let ids = match mode {
        SelectionMode::Retry => {
            let known = store.item_ids()?;
            let mut ids = config.retry_ids.clone();
            ids.sort_unstable();
            ids.dedup();
            if let Some(unknown) = ids.iter().find(|id| !known.contains(id)) {
                return Err(FatalError::Config(format!("retry id {unknown} is not a known work item")));
            }
            ids
        }
        SelectionMode::Overwrite { from } => {
            let all = store.item_ids()?;
            if from == 0 || from > all.len() {
                return Err(FatalError::Config(format!(
                    "overwrite start row {from} is outside 1..={}",
                    all.len()
                )));
            }
            take(all[from - 1..].to_vec(), config.batch_size)
        }
        SelectionMode::SkipExisting => take(store.pending_ids(checkpoint_stage)?, config.batch_size),
    };

    let mut items = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(item) = store.item(id)? {
            items.push(item);
        }
    }
    info!(%mode, selected = items.len(), "batch selected");
    Ok(Selection { mode, items })
}

fn take(mut ids: Vec<i64>, batch_size: Option<usize>) -> Vec<i64> {
    if let Some(n) = batch_size {
        ids.truncate(n);
    }
    ids
}

/// Split a batch into items whose earlier stages are all done and items that
/// must be skipped.
pub fn check_prerequisites(
    store: &CheckpointStore,
    items: Vec<WorkItem>,
    previous_stages: &[&str],
) -> Result<(Vec<WorkItem>, Vec<Skipped>), FatalError> {
    let mut ready = Vec::with_capacity(items.len());
    let mut skipped = Vec::new();

    'items: for item in items {
        for stage in previous_stages {
            let checkpoint = store.checkpoint(item.id, stage)?;
            if !checkpoint.is_done() {
                skipped.push(Skipped {
                    item,
                    stage: stage.to_string(),
                    checkpoint,
                });
                continue 'items;
            }
        }
        ready.push(item);
    }
    Ok((ready, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::StageCommit;
    use serde_json::json;

    fn store(n: i64) -> CheckpointStore {
        let mut store = CheckpointStore::open_in_memory().unwrap();
        store.ensure_stage_columns(&["table_index", "sum_units"]).unwrap();
        let items: Vec<WorkItem> = (1..=n)
            .map(|id| WorkItem {
                id,
                name: format!("filing-{id}"),
                locator: String::new(),
            })
            .collect();
        store.insert_items(&items).unwrap();
        store
    }

    fn mark(store: &mut CheckpointStore, id: i64, stage: &str, checkpoint: Checkpoint) {
        store
            .commit_item(
                id,
                &[StageCommit {
                    stage: stage.into(),
                    checkpoint,
                    record: None,
                    problem_ids: Vec::new(),
                }],
            )
            .unwrap();
    }

    fn ids(selection: &Selection) -> Vec<i64> {
        selection.items.iter().map(|i| i.id).collect()
    }

    #[test]
    fn skip_existing_is_idempotent() {
        let mut store = store(5);
        mark(&mut store, 2, "sum_units", Checkpoint::Done(json!(1000)));
        mark(&mut store, 4, "sum_units", Checkpoint::Failed);

        let config = BatchConfig {
            batch_size: Some(2),
            ..BatchConfig::default()
        };
        let first = select_batch(&store, &config, "sum_units").unwrap();
        let second = select_batch(&store, &config, "sum_units").unwrap();
        assert_eq!(ids(&first), vec![1, 3]);
        assert_eq!(first, second);
        assert!(!first.mode.is_destructive());
    }

    #[test]
    fn skip_existing_clamps_batch_size() {
        let store = store(3);
        let config = BatchConfig {
            batch_size: Some(50),
            ..BatchConfig::default()
        };
        assert_eq!(ids(&select_batch(&store, &config, "sum_units").unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn overwrite_clamps_to_available_rows() {
        let store = store(10);
        let config = BatchConfig {
            batch_size: Some(100),
            skip_existing: false,
            overwrite_from: Some(1),
            retry_ids: Vec::new(),
        };
        let selection = select_batch(&store, &config, "sum_units").unwrap();
        assert_eq!(selection.items.len(), 10);
        assert!(selection.mode.is_destructive());
    }

    #[test]
    fn overwrite_from_row_offset() {
        let store = store(6);
        let config = BatchConfig {
            batch_size: Some(2),
            skip_existing: false,
            overwrite_from: Some(4),
            retry_ids: Vec::new(),
        };
        assert_eq!(ids(&select_batch(&store, &config, "sum_units").unwrap()), vec![4, 5]);
    }

    #[test]
    fn overwrite_out_of_range_is_config_error() {
        let store = store(3);
        let config = BatchConfig {
            skip_existing: false,
            overwrite_from: Some(4),
            ..BatchConfig::default()
        };
        assert!(matches!(
            select_batch(&store, &config, "sum_units"),
            Err(FatalError::Config(_))
        ));
    }

    #[test]
    fn retry_list_overrides_everything() {
        let store = store(10);
        let config = BatchConfig {
            batch_size: Some(1),
            skip_existing: true,
            overwrite_from: Some(9),
            retry_ids: vec![7, 3, 7],
        };
        let selection = select_batch(&store, &config, "sum_units").unwrap();
        assert_eq!(selection.mode, SelectionMode::Retry);
        assert_eq!(ids(&selection), vec![3, 7]);
    }

    #[test]
    fn unknown_retry_id_is_config_error() {
        let store = store(3);
        let config = BatchConfig {
            retry_ids: vec![2, 99],
            ..BatchConfig::default()
        };
        assert!(matches!(
            select_batch(&store, &config, "sum_units"),
            Err(FatalError::Config(msg)) if msg.contains("99")
        ));
    }

    #[test]
    fn empty_batch_when_everything_done() {
        let mut store = store(2);
        mark(&mut store, 1, "sum_units", Checkpoint::Done(json!(1)));
        mark(&mut store, 2, "sum_units", Checkpoint::Done(json!(1)));
        assert!(select_batch(&store, &BatchConfig::default(), "sum_units")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn zero_batch_size_rejected() {
        let store = store(2);
        let config = BatchConfig {
            batch_size: Some(0),
            ..BatchConfig::default()
        };
        assert!(select_batch(&store, &config, "sum_units").is_err());
    }

    #[test]
    fn prerequisites_split_ready_and_skipped() {
        let mut store = store(3);
        mark(&mut store, 1, "table_index", Checkpoint::Done(json!(0)));
        mark(&mut store, 2, "table_index", Checkpoint::Failed);

        let items: Vec<WorkItem> = (1..=3).filter_map(|id| store.item(id).unwrap()).collect();
        let (ready, skipped) = check_prerequisites(&store, items, &["table_index"]).unwrap();

        assert_eq!(ready.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0].item.id, 2);
        assert_eq!(skipped[0].checkpoint, Checkpoint::Failed);
        assert_eq!(skipped[1].checkpoint, Checkpoint::Pending);
    }
}
