//! Modelos de dominio (documentos, chunks y citas de fuentes).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Valor que presentamos al cliente cuando un metadato opcional no existe.
pub const UNKNOWN: &str = "Unknown";

/// Metadatos tipados de un documento.
///
/// Los campos opcionales se extraen por patrón del propio texto; su ausencia
/// significa "el documento no lo declara" y nunca se rellena con cadena vacía.
/// `extra` queda como bolsa de claves libres para compatibilidad futura.
/// Se serializa con bincode dentro del índice persistido, así que todos los
/// campos se escriben siempre.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    pub source: String,
    pub filename: String,
    pub document_id: Option<String>,
    pub title: Option<String>,
    pub version: Option<String>,
    /// Categoría derivada del identificador ("Document" si no se reconoce).
    pub doc_type: String,
    pub extra: HashMap<String, String>,
}

/// Documento completo en memoria. Sólo vive durante la ingesta: tras el
/// troceado únicamente persisten sus chunks.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub metadata: DocMetadata,
}

/// Fragmento acotado de un documento, la unidad de embedding y recuperación.
///
/// `chunk_id` es el número de secuencia (base cero) dentro del lote de
/// ingesta completo, no por documento. Los metadatos del padre viajan con
/// cada chunk para poder citar la fuente sin el documento original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: DocMetadata,
    pub chunk_id: usize,
}

/// Cita de fuente: proyección de los metadatos de un chunk, de-duplicada por
/// `document_id` conservando el orden de primera aparición.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: String,
    pub title: String,
    pub doc_type: String,
    pub filename: String,
}

impl SourceRef {
    /// Proyecta los metadatos de un chunk; los campos ausentes se presentan
    /// como "Unknown" de cara al cliente.
    pub fn from_metadata(meta: &DocMetadata) -> Self {
        Self {
            document_id: meta.document_id.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            title: meta.title.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            doc_type: meta.doc_type.clone(),
            filename: meta.filename.clone(),
        }
    }
}
