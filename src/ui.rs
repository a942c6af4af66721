//! Interface de terminal do filing-reader: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`BatchProgress`] acompanha visualmente
//! o processamento de um lote no terminal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::ledger::{Checkpoint, Skipped, StageCounts, WorkItem};
use crate::orchestrator::{ItemReport, RunObserver, RunSummary, StageStatus, Termination};

/// Indicador visual de progresso para um lote no terminal.
///
/// Exibe um spinner com o item atual e imprime os problemas de cada item
/// assim que ele é gravado no ledger.
pub struct BatchProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Ledger citado junto aos problemas.
    database: PathBuf,
    green: Style,
    red: Style,
    yellow: Style,
}

impl BatchProgress {
    pub fn start(database: &Path) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message("selecting batch");
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            database: database.to_path_buf(),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

fn label(item: &WorkItem) -> String {
    format!("item {} ({})", item.id, item.name)
}

impl RunObserver for BatchProgress {
    fn skipped(&mut self, skipped: &Skipped) {
        let state = match skipped.checkpoint {
            Checkpoint::Failed => "failed",
            Checkpoint::Blocked => "blocked",
            _ => "not done",
        };
        self.pb.println(format!(
            "  {} {} skipped: {} {state}",
            self.yellow.apply_to("⤼"),
            label(&skipped.item),
            skipped.stage
        ));
    }

    fn item_started(&mut self, item: &WorkItem, position: usize, total: usize) {
        self.pb.set_message(format!("[{position}/{total}] {}", label(item)));
    }

    /// Problemas são impressos imediatamente, com o caminho do ledger.
    fn item_finished(&mut self, report: &ItemReport) {
        if !report.has_problems() {
            self.pb
                .println(format!("  {} {}", self.green.apply_to("✓"), label(&report.item)));
            return;
        }
        for stage in &report.stages {
            let mark = match stage.status {
                StageStatus::Done(_) | StageStatus::Degraded => self.yellow.apply_to("!"),
                StageStatus::Failed | StageStatus::Blocked => self.red.apply_to("✗"),
            };
            for problem in &stage.problems {
                self.pb.println(format!(
                    "  {mark} {} [{}] {problem} (ledger: {})",
                    label(&report.item),
                    stage.stage,
                    self.database.display()
                ));
            }
        }
    }
}

/// Resumo do lote, impresso em todo caminho de término.
pub fn print_summary(summary: &RunSummary) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let yellow = Style::new().yellow();

    println!();
    let headline = match &summary.termination {
        Termination::Completed => green.apply_to("Run completed".to_string()),
        Termination::NothingToDo => green.apply_to("Nothing to do".to_string()),
        Termination::Declined => yellow.apply_to("Run declined, nothing written".to_string()),
        Termination::Interrupted => yellow.apply_to("Run interrupted".to_string()),
        Termination::Fatal(err) => red.apply_to(format!("Run aborted: {err}")),
    };
    println!("{headline}");
    if let Some(mode) = summary.mode {
        println!("  mode:          {mode}");
    }
    println!("  stages:        {}", summary.stages.join(", "));
    println!("  selected:      {}", summary.selected);
    println!("  processed:     {}", summary.processed);
    println!("  with problems: {}", summary.with_problems);
    println!("  skipped:       {}", summary.skipped.len());
    println!("  oracle calls:  {}", summary.oracle_calls);
    println!("  elapsed:       {:.1}s", summary.elapsed.as_secs_f64());
}

/// Tabela do subcomando `status`.
pub fn print_status(items: usize, stages: &[(&str, StageCounts)], with_problems: i64) {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to(format!("{items} work item(s)")));
    println!(
        "  {:<16} {:>8} {:>8} {:>8} {:>8}",
        "stage", "done", "failed", "blocked", "pending"
    );
    for (stage, counts) in stages {
        println!(
            "  {:<16} {:>8} {:>8} {:>8} {:>8}",
            stage, counts.done, counts.failed, counts.blocked, counts.pending
        );
    }
    println!("  items with problems: {with_problems}");
}
