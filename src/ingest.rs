//! Ingesta de documentos: carga por extensión, extracción de metadatos,
//! troceado, embeddings y reconstrucción del índice vectorial del dominio.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use regex::Regex;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::app_state::Status;
use crate::chunker::{self, SplitterConfig, TextSplitter};
use crate::config::DomainSettings;
use crate::error::ServiceError;
use crate::llm::LanguageBackend;
use crate::models::{Chunk, DocMetadata, Document};
use crate::vector_store::VectorIndex;

/// Extensiones aceptadas por el endpoint de subida de RRHH.
pub const HC_UPLOAD_EXTENSIONS: &[&str] = &["pdf", "docx", "doc"];

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub files_scanned: u32,
    pub files_ingested: u32,
    pub files_skipped: u32,
    pub chunks_created: usize,
}

impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros escaneados, {} ingeridos, {} omitidos. {} chunks creados.",
            self.files_scanned, self.files_ingested, self.files_skipped, self.chunks_created
        )
    }
}

// ---------------------------------------------------------------------
// METADATOS
// ---------------------------------------------------------------------

/// Extrae los metadatos estructurados de un documento a partir de su texto.
/// Gana la primera coincidencia de cada patrón; un campo sin coincidencia
/// queda ausente (nunca cadena vacía).
pub fn extract_metadata(content: &str, path: &Path) -> DocMetadata {
    let filename = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    let document_id = first_capture(r"Document ID:\s*([\w-]+)", content);
    let title =
        first_capture(r"Title:\s*(.+)", content).map(|t| t.trim().to_string());
    let version = first_capture(r"Version:\s*([\d.]+)", content);
    let doc_type = derive_doc_type(document_id.as_deref());

    DocMetadata {
        source: path.to_string_lossy().to_string(),
        filename,
        document_id,
        title,
        version,
        doc_type,
        extra: HashMap::new(),
    }
}

/// Categoría del documento según su identificador.
fn derive_doc_type(document_id: Option<&str>) -> String {
    match document_id {
        Some(id) if id.contains("SOP") => "Standard Operating Procedure",
        Some(id) if id.contains("WI") => "Work Instruction",
        Some(id) if id.contains("QA") => "Quality Assurance Document",
        _ => "Document",
    }
    .to_string()
}

fn first_capture(pattern: &str, text: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

// ---------------------------------------------------------------------
// CARGA DE DOCUMENTOS
// ---------------------------------------------------------------------

/// Carga un documento según su extensión. Los formatos de ofimática se
/// delegan en extractores externos; markdown y texto se leen directamente.
pub fn load_document(path: &Path) -> Result<Document, ServiceError> {
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("")
        .to_lowercase();

    let text = match extension.as_str() {
        "md" | "txt" => fs::read_to_string(path).map_err(|err| {
            ServiceError::Internal(format!("No se pudo leer {}: {err}", path.display()))
        })?,
        "pdf" => pdf_extract::extract_text(path).map_err(|err| {
            ServiceError::Internal(format!(
                "No se pudo extraer texto del PDF {}: {err}",
                path.display()
            ))
        })?,
        "docx" | "doc" => extract_docx_text(path).map_err(|err| {
            ServiceError::Internal(format!(
                "No se pudo extraer texto del DOCX {}: {err}",
                path.display()
            ))
        })?,
        other => {
            return Err(ServiceError::UnsupportedFormat(format!(
                "Extensión '.{other}' no soportada: {}",
                path.display()
            )))
        }
    };

    let metadata = extract_metadata(&text, path);
    Ok(Document { text, metadata })
}

/// Extrae el texto de un DOCX leyendo word/document.xml del ZIP y
/// recogiendo los elementos <w:t>, un párrafo por <w:p>.
fn extract_docx_text(path: &Path) -> anyhow::Result<String> {
    use quick_xml::events::Event;

    let file = fs::File::open(path).with_context(|| format!("abriendo {}", path.display()))?;
    let mut archive =
        zip::ZipArchive::new(file).context("el fichero no es un contenedor ZIP válido")?;

    let mut doc_xml = String::new();
    {
        let mut entry = archive
            .by_name("word/document.xml")
            .map_err(|_| anyhow!("DOCX inválido: falta word/document.xml"))?;
        std::io::Read::read_to_string(&mut entry, &mut doc_xml)?;
    }

    let mut reader = quick_xml::Reader::from_str(&doc_xml);
    let mut paragraphs: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = e.local_name();
                if local.as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::End(ref e)) => {
                let local = e.local_name();
                if local.as_ref() == b"t" {
                    in_text = false;
                } else if local.as_ref() == b"p" {
                    if !paragraph.trim().is_empty() {
                        paragraphs.push(paragraph.trim().to_string());
                    }
                    paragraph.clear();
                }
            }
            Ok(Event::Text(e)) => {
                if in_text {
                    paragraph.push_str(&e.unescape().unwrap_or(std::borrow::Cow::Borrowed("")));
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(anyhow!("XML malformado en {}: {err}", path.display())),
            _ => {}
        }
        buf.clear();
    }
    if !paragraph.trim().is_empty() {
        paragraphs.push(paragraph.trim().to_string());
    }

    Ok(paragraphs.join("\n\n"))
}

// ---------------------------------------------------------------------
// INGESTOR POR DOMINIO
// ---------------------------------------------------------------------

/// Corpus que procesa el ingestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusKind {
    Sop,
    Hc,
}

/// Procesa los documentos de un dominio: carga, troceado, embeddings y
/// sustitución íntegra del índice persistido.
pub struct DocumentIngestor {
    kind: CorpusKind,
    settings: DomainSettings,
    splitter: TextSplitter,
}

impl DocumentIngestor {
    pub fn new(kind: CorpusKind, settings: DomainSettings) -> Result<Self, ServiceError> {
        let config = match kind {
            CorpusKind::Sop => {
                SplitterConfig::structured(settings.chunk_size, settings.chunk_overlap)
            }
            CorpusKind::Hc => SplitterConfig::prose(settings.chunk_size, settings.chunk_overlap),
        };
        let splitter = TextSplitter::new(config)?;
        Ok(Self { kind, settings, splitter })
    }

    fn accepts(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or("")
            .to_lowercase();
        match self.kind {
            CorpusKind::Sop => ext == "md",
            CorpusKind::Hc => HC_UPLOAD_EXTENSIONS.contains(&ext.as_str()),
        }
    }

    /// Carga en modo mejor-esfuerzo los documentos del directorio del corpus:
    /// un fallo individual se registra y omite ese fichero, nunca aborta el
    /// lote completo.
    pub fn load_folder(&self, status_arc: &Arc<Mutex<Status>>) -> (Vec<Document>, IngestionSummary) {
        let mut summary = IngestionSummary::default();
        let mut documents = Vec::new();

        let entries: Vec<_> = WalkDir::new(&self.settings.documents_path)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| self.accepts(e.path()))
            .collect();

        let total_files = entries.len();
        for (index, entry) in entries.iter().enumerate() {
            summary.files_scanned += 1;
            let path = entry.path();
            let filename = path.file_name().unwrap_or_default().to_string_lossy();

            {
                let mut status = status_arc.lock().unwrap();
                status.message =
                    format!("[{}/{}] Procesando: {}...", index + 1, total_files, filename);
                status.progress = (index + 1) as f32 / total_files.max(1) as f32;
            }

            match load_document(path) {
                Ok(doc) if doc.text.trim().is_empty() => {
                    warn!("Fichero vacío o sin texto útil: {}", path.display());
                    summary.files_skipped += 1;
                }
                Ok(doc) => {
                    summary.files_ingested += 1;
                    documents.push(doc);
                }
                Err(err) => {
                    error!("Error cargando {}: {err}", path.display());
                    summary.files_skipped += 1;
                }
            }
        }

        (documents, summary)
    }

    pub fn chunk_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        chunker::split_documents(&self.splitter, documents)
    }

    /// Embebe los chunks y construye el índice nuevo por completo en memoria;
    /// sólo entonces borra el persistido anterior y lo reescribe. Si cualquier
    /// paso falla, ni el índice previo en disco ni el del agente cambian.
    pub async fn rebuild_index(
        &self,
        backend: &dyn LanguageBackend,
        documents: &[Document],
        embedding_model: &str,
    ) -> Result<VectorIndex, ServiceError> {
        let chunks = self.chunk_documents(documents);
        if chunks.is_empty() {
            return Err(ServiceError::Internal(
                "La ingesta no produjo ningún chunk".to_string(),
            ));
        }
        info!(
            "Troceado completado: {} chunks (tamaño {}, solape {}).",
            chunks.len(),
            self.settings.chunk_size,
            self.settings.chunk_overlap
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = backend.embed_many(texts).await?;
        let index = VectorIndex::build(chunks, embeddings, embedding_model)?;

        VectorIndex::delete_persisted(&self.settings.index_path)?;
        index.save(&self.settings.index_path)?;
        info!(
            "Índice persistido en {} ({} chunks).",
            self.settings.index_path.display(),
            index.len()
        );
        Ok(index)
    }

    /// Procesa un único documento subido (RRHH): carga, trocea, embebe y
    /// reconstruye el índice completo del dominio.
    pub async fn process_document(
        &self,
        backend: &dyn LanguageBackend,
        file_path: &Path,
        embedding_model: &str,
    ) -> Result<(VectorIndex, usize), ServiceError> {
        info!("📄 Procesando documento: {}", file_path.display());
        let document = load_document(file_path)?;
        if document.text.trim().is_empty() {
            return Err(ServiceError::Internal(format!(
                "El documento {} no contiene texto",
                file_path.display()
            )));
        }

        let index = self
            .rebuild_index(backend, &[document], embedding_model)
            .await?;
        let chunks_created = index.len();
        Ok((index, chunks_created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn extrae_identificador_titulo_y_version() {
        let texto = "Document ID: SOP-042\nTitle: Vial Capping\nVersion: 2.1\n\nBody text.";
        let meta = extract_metadata(texto, Path::new("sop_042.md"));
        assert_eq!(meta.document_id.as_deref(), Some("SOP-042"));
        assert_eq!(meta.title.as_deref(), Some("Vial Capping"));
        assert_eq!(meta.version.as_deref(), Some("2.1"));
        assert_eq!(meta.doc_type, "Standard Operating Procedure");
        assert_eq!(meta.filename, "sop_042.md");
    }

    #[test]
    fn sin_etiquetas_los_campos_quedan_ausentes() {
        let meta = extract_metadata("Texto sin ninguna etiqueta.", Path::new("nota.md"));
        assert!(meta.document_id.is_none());
        assert!(meta.title.is_none());
        assert!(meta.version.is_none());
        assert_eq!(meta.doc_type, "Document");
    }

    #[test]
    fn categoria_derivada_del_identificador() {
        assert_eq!(derive_doc_type(Some("WI-007")), "Work Instruction");
        assert_eq!(derive_doc_type(Some("QA-101")), "Quality Assurance Document");
        assert_eq!(derive_doc_type(Some("POL-3")), "Document");
        assert_eq!(derive_doc_type(None), "Document");
    }

    #[test]
    fn extension_no_soportada_es_error_tipado() {
        let result = load_document(Path::new("informe.xlsx"));
        assert!(matches!(result, Err(ServiceError::UnsupportedFormat(_))));
    }

    fn settings_sop(dir: &Path) -> DomainSettings {
        DomainSettings {
            documents_path: dir.to_path_buf(),
            index_path: PathBuf::from("sin-uso"),
            chunk_size: 200,
            chunk_overlap: 20,
            top_k: 4,
        }
    }

    #[test]
    fn la_carga_de_carpeta_es_mejor_esfuerzo() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(
            dir.path().join("bueno.md"),
            "Document ID: SOP-001\nTitle: Limpieza\n\nContenido del procedimiento.",
        )
        .expect("escritura");
        // No es UTF-8: la lectura falla y el fichero se omite sin abortar.
        fs::write(dir.path().join("roto.md"), [0xff_u8, 0xfe, 0x00, 0x01]).expect("escritura");
        // Extensión fuera del corpus SOP: ni siquiera se escanea.
        fs::write(dir.path().join("ignorado.pdf"), b"%PDF-1.4").expect("escritura");

        let ingestor =
            DocumentIngestor::new(CorpusKind::Sop, settings_sop(dir.path())).expect("ingestor");
        let status = Arc::new(Mutex::new(Status::default()));
        let (documents, summary) = ingestor.load_folder(&status);

        assert_eq!(documents.len(), 1);
        assert_eq!(summary.files_scanned, 2);
        assert_eq!(summary.files_ingested, 1);
        assert_eq!(summary.files_skipped, 1);
        assert_eq!(documents[0].metadata.document_id.as_deref(), Some("SOP-001"));
    }
}
