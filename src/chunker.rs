//! Troceado de documentos en fragmentos acotados y solapados.
//!
//! Generaliza el troceado por párrafos de la primera versión a una división
//! recursiva por lista priorizada de separadores: se corta por el primer
//! separador presente en el texto y las piezas que sigan excediendo el tamaño
//! se re-trocean con los separadores restantes, con la cadena vacía (corte por
//! caracteres) como último recurso. Función pura, sin E/S.

use std::collections::VecDeque;

use crate::error::ServiceError;
use crate::models::{Chunk, Document};

/// Regla de sección pesada de los documentos SOP (línea de 80 '=').
pub const SECTION_RULE: &str =
    "\n================================================================================\n";

/// Perfil para documentos con estructura explícita de secciones (SOP/WI).
pub fn structured_separators() -> Vec<String> {
    vec![
        SECTION_RULE.to_string(),
        "\n## ".to_string(),
        "\n### ".to_string(),
        "\n\n".to_string(),
        "\n".to_string(),
        " ".to_string(),
        String::new(),
    ]
}

/// Perfil para prosa sin estructura (manuales y políticas de RRHH).
pub fn prose_separators() -> Vec<String> {
    vec![
        "\n\n".to_string(),
        "\n".to_string(),
        ". ".to_string(),
        " ".to_string(),
        String::new(),
    ]
}

/// Configuración del troceador. Los tamaños se miden en caracteres.
#[derive(Debug, Clone)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separators: Vec<String>,
}

impl SplitterConfig {
    pub fn structured(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size, chunk_overlap, separators: structured_separators() }
    }

    pub fn prose(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size, chunk_overlap, separators: prose_separators() }
    }

    fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size debe ser mayor que 0".to_string());
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(format!(
                "chunk_overlap ({}) debe ser menor que chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }
        if self.separators.is_empty() {
            return Err("la lista de separadores no puede estar vacía".to_string());
        }
        Ok(())
    }
}

pub struct TextSplitter {
    config: SplitterConfig,
}

impl TextSplitter {
    pub fn new(config: SplitterConfig) -> Result<Self, ServiceError> {
        config.validate().map_err(ServiceError::Configuration)?;
        Ok(Self { config })
    }

    /// Trocea un texto en fragmentos de longitud ≤ `chunk_size` (salvo piezas
    /// que ningún separador pueda partir) con solape ≤ `chunk_overlap`.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_recursive(text, &self.config.separators)
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        // Primer separador presente en el texto; los posteriores quedan para
        // re-trocear piezas que sigan siendo demasiado grandes.
        let mut separator: &str = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                remaining = &[];
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let pieces = split_keeping_separator(text, separator);

        let mut chunks = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        for piece in pieces {
            if char_len(&piece) <= self.config.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge_pieces(&pending));
                pending.clear();
            }
            if remaining.is_empty() {
                // Ningún separador restante puede partir esta pieza: se emite
                // entera aunque exceda el presupuesto.
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, remaining));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge_pieces(&pending));
        }
        chunks
    }

    /// Acumula piezas consecutivas hasta llenar `chunk_size`; al emitir un
    /// fragmento retiene del final piezas por un total ≤ `chunk_overlap`
    /// caracteres como arranque del siguiente.
    fn merge_pieces(&self, pieces: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.config.chunk_size && !window.is_empty() {
                if let Some(doc) = join_window(&window) {
                    docs.push(doc);
                }
                while total > self.config.chunk_overlap
                    || (total + len > self.config.chunk_size && total > 0)
                {
                    match window.pop_front() {
                        Some(first) => total -= char_len(first),
                        None => break,
                    }
                }
            }
            window.push_back(piece.as_str());
            total += len;
        }
        if let Some(doc) = join_window(&window) {
            docs.push(doc);
        }
        docs
    }
}

/// Trocea un lote de documentos. Cada chunk hereda los metadatos completos de
/// su documento padre y recibe su número de secuencia dentro del lote.
pub fn split_documents(splitter: &TextSplitter, documents: &[Document]) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    for doc in documents {
        for text in splitter.split_text(&doc.text) {
            let chunk_id = chunks.len();
            chunks.push(Chunk { text, metadata: doc.metadata.clone(), chunk_id });
        }
    }
    chunks
}

/// Divide `text` por `separator` dejando el separador como prefijo de la pieza
/// siguiente (así un "## " sigue pegado a su sección). Con separador vacío se
/// divide carácter a carácter.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut pieces = Vec::new();
    for (i, part) in text.split(separator).enumerate() {
        if i == 0 {
            if !part.is_empty() {
                pieces.push(part.to_string());
            }
        } else {
            pieces.push(format!("{separator}{part}"));
        }
    }
    pieces
}

fn join_window(window: &VecDeque<&str>) -> Option<String> {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
