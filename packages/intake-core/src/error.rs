//! Definições de erro para a biblioteca intake-core
//!
//! `StoreError` cobre falhas da fonte de tomadas (banco de dados);
//! `IntakeError` é o erro exposto pelo motor aos chamadores.

use thiserror::Error;

/// Erros específicos para operações da fonte de tomadas
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Erro de conexão com banco de dados: {0}")]
    ConnectionError(String),

    #[error("Erro de consulta: {0}")]
    QueryError(String),

    #[error("Entidade não encontrada: {0}")]
    NotFound(String),

    #[error("Tomada já resolvida: {0}")]
    AlreadyResolved(String),

    #[error("Violação de restrição: {0}")]
    ConstraintViolation(String),

    #[error("Erro interno: {0}")]
    InternalError(String),
}

/// Conversão de erros específicos do SQLx para nossos tipos de erro
impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => StoreError::NotFound("Registro não encontrado".to_string()),
            sqlx::Error::Database(dbe) => {
                if let Some(code) = dbe.code() {
                    // Códigos estendidos do SQLite: CHECK, FOREIGN KEY, NOT NULL, PRIMARY KEY, UNIQUE
                    if matches!(code.as_ref(), "275" | "787" | "1299" | "1555" | "2067") {
                        return StoreError::ConstraintViolation(dbe.message().to_string());
                    }
                }
                StoreError::QueryError(dbe.message().to_string())
            }
            sqlx::Error::ColumnNotFound(col) => {
                StoreError::QueryError(format!("Coluna não encontrada: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                StoreError::QueryError(format!("Erro ao decodificar coluna {}: {}", index, source))
            }
            sqlx::Error::Io(io_err) => StoreError::ConnectionError(io_err.to_string()),
            sqlx::Error::Configuration(conf_err) => StoreError::ConnectionError(conf_err.to_string()),
            sqlx::Error::PoolClosed => {
                StoreError::ConnectionError("Pool de conexões fechado".to_string())
            }
            sqlx::Error::PoolTimedOut => {
                StoreError::ConnectionError("Timeout no pool de conexões".to_string())
            }
            sqlx::Error::WorkerCrashed => {
                StoreError::InternalError("Worker do banco de dados falhou".to_string())
            }
            _ => StoreError::InternalError(format!("Erro inesperado: {:?}", error)),
        }
    }
}

/// Erros do motor de tomadas e adesão
#[derive(Error, Debug)]
pub enum IntakeError {
    /// Leitura da fonte falhou: o resultado é desconhecido, não vazio.
    #[error("Fonte de tomadas indisponível: {0}")]
    SourceUnavailable(#[source] StoreError),

    #[error("Falha ao gravar tomada: {0}")]
    Write(#[source] StoreError),

    #[error("Atualização inválida: {0}")]
    InvalidUpdate(String),

    #[error("Regras de tolerância inválidas: {0}")]
    InvalidToleranceRules(String),

    #[error("Nenhuma ação para salvar")]
    NothingToSave,
}

impl IntakeError {
    /// Indica se o erro corresponde ao estado "não foi possível atualizar"
    pub fn is_source_unavailable(&self) -> bool {
        matches!(self, IntakeError::SourceUnavailable(_))
    }
}
