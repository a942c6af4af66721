//! Tipos de erro para o cliente do oráculo (API de chat completions).
//!
//! Define [`OracleError`] com variantes para rate limiting, cota esgotada,
//! credenciais rejeitadas, erros da API e erros de rede. Usa `thiserror`
//! para derivar `Display` e `Error` a partir dos atributos `#[error(...)]`.

use thiserror::Error;

/// Erros que podem ocorrer ao consultar o oráculo.
///
/// Apenas [`QuotaExhausted`](OracleError::QuotaExhausted) e
/// [`Unauthorized`](OracleError::Unauthorized) são fatais: retentar não ajuda.
/// Todas as outras variantes são transitórias e consomem o orçamento de tentativas.
#[derive(Debug, Error)]
pub enum OracleError {
    /// O servidor retornou HTTP 429 sem indicar cota esgotada.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// HTTP 429 com `insufficient_quota` no corpo da resposta.
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    /// HTTP 401/403: a chave foi rejeitada.
    #[error("unauthorized (status {status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// Qualquer outro erro HTTP (4xx/5xx).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// A resposta chegou mas não tem o formato esperado.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl OracleError {
    /// Retorna true quando retentar não ajuda e a execução inteira deve parar.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OracleError::QuotaExhausted(_) | OracleError::Unauthorized { .. }
        )
    }

    /// Espera sugerida pelo servidor antes da próxima tentativa, se houver.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            OracleError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let err = OracleError::RateLimited {
            retry_after_ms: 5000,
        };
        assert_eq!(err.to_string(), "rate limited, retry after 5000ms");
        assert_eq!(err.retry_after_ms(), Some(5000));
    }

    #[test]
    fn only_quota_and_auth_are_fatal() {
        assert!(OracleError::QuotaExhausted("billing".into()).is_fatal());
        assert!(
            OracleError::Unauthorized {
                status: 401,
                message: "bad key".into()
            }
            .is_fatal()
        );
        assert!(
            !OracleError::ApiError {
                status: 503,
                message: "overloaded".into()
            }
            .is_fatal()
        );
        assert!(!OracleError::RateLimited { retry_after_ms: 1 }.is_fatal());
        assert!(!OracleError::MalformedResponse("no choices".into()).is_fatal());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OracleError>();
    }
}
