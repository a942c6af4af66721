//! Configuração do filing-reader carregada a partir de `filing-reader.toml`.
//!
//! A struct [`ReaderConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `OPENAI_API_KEY` tem precedência sobre o arquivo.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FatalError;
use crate::escalation::{STRONG_MODEL, SupervisorPolicy, Tier, default_tiers};
use crate::ledger::BatchConfig;
use crate::oracle::RetryPolicy;
use crate::oracle::client::API_URL;
use crate::pipeline::filing_pipeline;

/// Arquivo procurado no diretório atual quando `--config` não é passado.
pub const CONFIG_FILE: &str = "filing-reader.toml";

/// Configuração de nível superior carregada de `filing-reader.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    /// Chave da API do oráculo.
    #[serde(default)]
    pub api_key: String,

    /// Endpoint de chat completions.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Arquivo SQLite do ledger.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Diretório com `segments/` e `tables/`.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Intervalo mínimo entre duas chamadas ao oráculo, em milissegundos.
    #[serde(default = "default_pace_ms")]
    pub pace_ms: u64,

    /// Tentativas por chamada antes de abortar a execução.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Atraso base em milissegundos para backoff exponencial.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// O que fazer quando a revisão do supervisor é inconclusiva.
    #[serde(default)]
    pub supervisor_policy: SupervisorPolicy,

    /// Subconjunto de estágios a executar; vazio executa todos.
    #[serde(default)]
    pub stages: Vec<String>,

    /// Níveis de escalonamento, do mais barato ao mais forte.
    #[serde(default = "default_tiers")]
    pub tiers: Vec<Tier>,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

/// Modelo que revisa respostas suspeitas.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_supervisor_model")]
    pub model: String,
    #[serde(default = "default_supervisor_trials")]
    pub trials: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            model: default_supervisor_model(),
            trials: default_supervisor_trials(),
        }
    }
}

impl SupervisorConfig {
    pub fn tier(&self) -> Tier {
        Tier::new("supervisor", self.model.clone(), self.trials, false)
    }
}

fn default_base_url() -> String {
    API_URL.to_string()
}

fn default_database() -> PathBuf {
    PathBuf::from("filings.db")
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

// Valor padrão do intervalo entre chamadas: 1000ms.
fn default_pace_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_supervisor_model() -> String {
    STRONG_MODEL.to_string()
}

fn default_supervisor_trials() -> usize {
    1
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            database: default_database(),
            artifacts_dir: default_artifacts_dir(),
            pace_ms: default_pace_ms(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            supervisor_policy: SupervisorPolicy::default(),
            stages: Vec::new(),
            tiers: default_tiers(),
            supervisor: SupervisorConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl ReaderConfig {
    /// Carrega a configuração de `path`, ou de `filing-reader.toml` no
    /// diretório atual. Sem arquivo, usa os valores padrão.
    pub fn load(path: Option<&Path>) -> Result<Self, FatalError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE).exists() => Self::from_file(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração para a chave API.
        if let Ok(key) = std::env::var("OPENAI_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, FatalError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| FatalError::Config(format!("cannot read {}: {e}", path.display())))?;
        Ok(toml::from_str(&contents)?)
    }

    /// Rejeita configurações que fariam a execução falhar depois de gastar
    /// chamadas ao oráculo.
    pub fn validate(&self) -> Result<(), FatalError> {
        if self.tiers.is_empty() {
            return Err(FatalError::Config("at least one tier is required".into()));
        }
        if let Some(tier) = self.tiers.iter().find(|t| t.trials == 0) {
            return Err(FatalError::Config(format!("tier {} has zero trials", tier.name)));
        }
        if self.supervisor.trials == 0 {
            return Err(FatalError::Config("supervisor has zero trials".into()));
        }
        self.batch.validate()?;
        filing_pipeline().select(&self.stages)?;
        Ok(())
    }

    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_ms: self.retry_base_delay_ms,
        }
    }
}
