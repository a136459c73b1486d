//! Taxonomía de errores del servicio.
//!
//! Todos los fallos que cruzan la interfaz externa se reducen a una de estas
//! categorías más un mensaje legible; nunca se expone un stack trace al
//! cliente.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Falta una credencial o un endpoint externo requerido.
    #[error("Configuración incompleta: {0}")]
    Configuration(String),

    /// El índice persistido no existe donde se esperaba.
    #[error("No encontrado: {0}")]
    NotFound(String),

    /// Extensión de fichero fuera del conjunto soportado.
    #[error("Formato no soportado: {0}")]
    UnsupportedFormat(String),

    /// Se consultó un agente que todavía no tiene índice.
    #[error("Agente no inicializado: {0}")]
    NotInitialized(String),

    /// Fallo de embeddings o de chat tras agotar los reintentos.
    #[error("Fallo del servicio externo: {0}")]
    Upstream(String),

    /// Cualquier otro fallo interno (E/S, serialización...).
    #[error("Error interno: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Categoría estable que acompaña al mensaje en las respuestas JSON.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::NotFound(_) => "not_found",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::NotInitialized(_) => "not_initialized",
            Self::Upstream(_) => "upstream",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration(_) | Self::UnsupportedFormat(_) | Self::NotInitialized(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
