//! Tipos de dados para requisições e respostas do endpoint de chat completions.
//!
//! [`OracleRequest`] é a forma usada pelo núcleo (instruções de papel + entrada
//! da tarefa); [`ChatRequest`] e [`ChatResponse`] são o formato JSON trafegado.

use serde::{Deserialize, Serialize};

/// Formato de resposta pedido ao modelo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Texto livre.
    Text,
    /// Um único objeto JSON.
    JsonObject,
}

/// Uma consulta ao oráculo, independente do modelo que vai respondê-la.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    /// Instruções de papel (mensagem de sistema).
    pub instructions: String,
    /// Entrada da tarefa (mensagem do usuário).
    pub input: String,
    /// Formato de resposta esperado.
    pub format: ResponseFormat,
    /// Semente explícita; `None` deixa o servidor escolher.
    pub seed: Option<u64>,
}

impl OracleRequest {
    pub fn new(instructions: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            input: input.into(),
            format: ResponseFormat::Text,
            seed: None,
        }
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_seed(&self, seed: Option<u64>) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }
}

/// Corpo da requisição para o endpoint `/v1/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Identificador do modelo (ex.: "gpt-4o-mini-2024-07-18").
    pub model: String,
    /// Mensagens de sistema e de usuário.
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormatSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl ChatRequest {
    /// Monta o corpo do chat a partir de uma consulta do núcleo.
    pub fn from_request(model: &str, request: &OracleRequest) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                Message {
                    role: "system".into(),
                    content: request.instructions.clone(),
                },
                Message {
                    role: "user".into(),
                    content: request.input.clone(),
                },
            ],
            response_format: Some(ResponseFormatSpec {
                format_type: request.format,
            }),
            seed: request.seed,
        }
    }
}

/// `{"type": "text"}` ou `{"type": "json_object"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormatSpec {
    #[serde(rename = "type")]
    pub format_type: ResponseFormat,
}

/// Uma única mensagem da conversa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Papel do remetente: "system", "user" ou "assistant".
    pub role: String,
    /// Conteúdo textual da mensagem.
    pub content: String,
}

/// Resposta retornada pelo endpoint de chat completions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Texto da primeira escolha, se houver.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Estatísticas de consumo de tokens para uma chamada.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}
