//! Índice vectorial local persistido en disco.
//!
//! API pública:
//!   - `VectorIndex::build(chunks, embeddings, model)`
//!   - `VectorIndex::search(&query_vec, k)`
//!   - `VectorIndex::save(dir)` / `VectorIndex::load(dir)` / `delete_persisted(dir)`
//!
//! La búsqueda es un barrido por similitud coseno sobre todas las entradas:
//! suficiente para corpora de este tamaño y sin dependencias de servicio.
//! La deserialización confía en el origen del fichero; sólo se deben cargar
//! índices producidos por este mismo servicio.

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ServiceError;
use crate::models::{Chunk, DocMetadata};

/// Nombre del fichero dentro del directorio del índice.
const INDEX_FILE: &str = "index.bin";

/// Entrada del índice: un chunk con su vector de embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub text: String,
    pub metadata: DocMetadata,
    pub chunk_id: usize,
    pub embedding: Vec<f64>,
}

/// Índice de vecinos más próximos de un dominio.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VectorIndex {
    pub created_at: String,
    pub embedding_model: String,
    entries: Vec<IndexedChunk>,
}

impl VectorIndex {
    /// Construye el índice emparejando cada chunk con su embedding.
    /// Los dos vectores deben llegar en el mismo orden y con la misma longitud.
    pub fn build(
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f64>>,
        embedding_model: &str,
    ) -> Result<Self, ServiceError> {
        if chunks.len() != embeddings.len() {
            return Err(ServiceError::Upstream(format!(
                "Número de embeddings ({}) distinto al número de chunks ({})",
                embeddings.len(),
                chunks.len()
            )));
        }

        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexedChunk {
                text: chunk.text,
                metadata: chunk.metadata,
                chunk_id: chunk.chunk_id,
                embedding,
            })
            .collect();

        Ok(Self {
            created_at: Utc::now().to_rfc3339(),
            embedding_model: embedding_model.to_string(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Devuelve los `k` chunks más similares a `query_vec`, ordenados por
    /// similitud coseno descendente. Operación de sólo lectura: búsquedas
    /// concurrentes sobre la misma instantánea no se bloquean entre sí.
    pub fn search(&self, query_vec: &[f64], k: usize) -> Vec<(&IndexedChunk, f64)> {
        let mut scored: Vec<(&IndexedChunk, f64)> = self
            .entries
            .iter()
            .map(|entry| (entry, cosine_similarity(query_vec, &entry.embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Escribe el índice en `dir`, creando los directorios que falten.
    pub fn save(&self, dir: &Path) -> Result<(), ServiceError> {
        fs::create_dir_all(dir)?;
        let file = fs::File::create(dir.join(INDEX_FILE))?;
        bincode::serialize_into(BufWriter::new(file), self).map_err(|err| {
            ServiceError::Internal(format!(
                "No se pudo serializar el índice en {}: {err}",
                dir.display()
            ))
        })
    }

    /// Reconstruye un índice persistido. Falla con `NotFound` si nunca se ha
    /// construido uno en esa ruta.
    pub fn load(dir: &Path) -> Result<Self, ServiceError> {
        let index_file = dir.join(INDEX_FILE);
        if !index_file.exists() {
            return Err(ServiceError::NotFound(format!(
                "No existe un índice persistido en {}",
                dir.display()
            )));
        }
        let file = fs::File::open(&index_file)?;
        bincode::deserialize_from(BufReader::new(file)).map_err(|err| {
            ServiceError::Internal(format!(
                "No se pudo deserializar el índice de {}: {err}",
                index_file.display()
            ))
        })
    }

    pub fn persisted_exists(dir: &Path) -> bool {
        dir.join(INDEX_FILE).exists()
    }

    /// Elimina por completo el directorio del índice persistido (la política
    /// de rebuild es sustitución íntegra, nunca actualización parcial).
    pub fn delete_persisted(dir: &Path) -> Result<(), ServiceError> {
        if dir.exists() {
            fs::remove_dir_all(dir)?;
            info!("Índice persistido anterior eliminado: {}", dir.display());
        }
        Ok(())
    }
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(id: usize, text: &str, doc_id: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: DocMetadata {
                source: format!("{doc_id}.md"),
                filename: format!("{doc_id}.md"),
                document_id: Some(doc_id.to_string()),
                title: Some(format!("Título {doc_id}")),
                doc_type: "Document".to_string(),
                ..Default::default()
            },
            chunk_id: id,
        }
    }

    fn indice_de_prueba() -> VectorIndex {
        let chunks = vec![
            chunk(0, "texto sobre torque", "SOP-001"),
            chunk(1, "texto sobre limpieza", "SOP-002"),
            chunk(2, "texto sobre vacaciones", "HR-001"),
        ];
        let embeddings = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        VectorIndex::build(chunks, embeddings, "modelo-test").expect("índice válido")
    }

    #[test]
    fn busqueda_ordena_por_similitud_descendente() {
        let index = indice_de_prueba();
        let results = index.search(&[0.9, 0.4, 0.1], 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0.chunk_id, 0);
        assert_eq!(results[1].0.chunk_id, 1);
        assert_eq!(results[2].0.chunk_id, 2);
        assert!(results[0].1 >= results[1].1 && results[1].1 >= results[2].1);
    }

    #[test]
    fn busqueda_limita_a_k_y_tolera_k_mayor_que_el_indice() {
        let index = indice_de_prueba();
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 2).len(), 2);
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 10).len(), 3);
    }

    #[test]
    fn indice_vacio_devuelve_busqueda_vacia() {
        let index = VectorIndex::build(Vec::new(), Vec::new(), "modelo-test").expect("vacío");
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0, 0.0], 4).is_empty());
    }

    #[test]
    fn longitudes_distintas_son_error() {
        let chunks = vec![chunk(0, "a", "SOP-001")];
        let result = VectorIndex::build(chunks, Vec::new(), "modelo-test");
        assert!(matches!(result, Err(ServiceError::Upstream(_))));
    }

    #[test]
    fn round_trip_persistir_y_cargar() {
        let dir = TempDir::new().expect("tempdir");
        let index_dir = dir.path().join("indice");
        let index = indice_de_prueba();
        index.save(&index_dir).expect("guardado");

        let loaded = VectorIndex::load(&index_dir).expect("carga");
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.embedding_model, "modelo-test");

        // El top-K del índice recargado coincide en orden y metadatos.
        let query = [0.9, 0.4, 0.1];
        let before: Vec<(usize, String)> = index
            .search(&query, 3)
            .into_iter()
            .map(|(c, _)| (c.chunk_id, c.metadata.document_id.clone().unwrap_or_default()))
            .collect();
        let after: Vec<(usize, String)> = loaded
            .search(&query, 3)
            .into_iter()
            .map(|(c, _)| (c.chunk_id, c.metadata.document_id.clone().unwrap_or_default()))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn cargar_ruta_inexistente_es_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let result = VectorIndex::load(&dir.path().join("no-existe"));
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn borrar_el_persistido_elimina_el_directorio() {
        let dir = TempDir::new().expect("tempdir");
        let index_dir = dir.path().join("indice");
        indice_de_prueba().save(&index_dir).expect("guardado");
        assert!(VectorIndex::persisted_exists(&index_dir));

        VectorIndex::delete_persisted(&index_dir).expect("borrado");
        assert!(!VectorIndex::persisted_exists(&index_dir));
        // Borrar dos veces no es un error.
        VectorIndex::delete_persisted(&index_dir).expect("borrado idempotente");
    }
}
