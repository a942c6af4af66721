//! Interface de linha de comando do filing-reader baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (init, run, status)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::ledger::BatchConfig;

/// filing-reader: extração por consenso de dados de balanços patrimoniais.
#[derive(Debug, Parser)]
#[command(name = "filing-reader", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./filing-reader.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Cria o ledger, registra o vocabulário de problemas e importa itens.
    Init {
        /// Arquivo JSON com uma lista de itens `{id, name, locator}`.
        #[arg(long)]
        items: Option<PathBuf>,
    },

    /// Processa um lote de itens pelos estágios configurados.
    Run(RunArgs),

    /// Mostra contagens por estágio e itens com problemas.
    Status,
}

/// Flags do subcomando `run`; sobrescrevem a tabela `[batch]` e `stages`.
#[derive(Debug, Default, clap::Args)]
pub struct RunArgs {
    /// Estágios a executar, contíguos e na ordem do pipeline.
    #[arg(long, value_delimiter = ',')]
    pub stages: Vec<String>,

    /// Número máximo de itens neste lote.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Reprocessa a partir desta linha (base 1), sobrescrevendo resultados.
    #[arg(long)]
    pub overwrite_from: Option<usize>,

    /// Reprocessa exatamente estes ids.
    #[arg(long, value_delimiter = ',')]
    pub retry: Vec<i64>,

    /// Confirma modos destrutivos sem perguntar.
    #[arg(long, short, default_value_t = false)]
    pub yes: bool,
}

impl RunArgs {
    /// Aplica as flags sobre a configuração de lote do arquivo.
    pub fn apply(&self, batch: &mut BatchConfig, stages: &mut Vec<String>) {
        if !self.stages.is_empty() {
            *stages = self.stages.clone();
        }
        if self.batch_size.is_some() {
            batch.batch_size = self.batch_size;
        }
        if self.overwrite_from.is_some() {
            batch.skip_existing = false;
            batch.overwrite_from = self.overwrite_from;
        }
        if !self.retry.is_empty() {
            batch.retry_ids = self.retry.clone();
        }
    }
}
