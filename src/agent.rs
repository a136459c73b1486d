//! Agentes de dominio (SOP y Capital Humano).
//!
//! Cada agente compone recuperación + ensamblado de contexto + respuesta
//! detrás de una única operación `query`, y es dueño del ciclo de vida de su
//! índice: carga única al arrancar para el corpus estático, reconstrucción
//! bajo demanda para el dinámico. El índice vigente se comparte como
//! instantánea (`Arc`) y se sustituye de forma atómica tras cada rebuild:
//! las búsquedas en vuelo terminan sobre la instantánea anterior.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::ServiceError;
use crate::llm::LanguageBackend;
use crate::models::{SourceRef, UNKNOWN};
use crate::prompts;
use crate::vector_store::{IndexedChunk, VectorIndex};

/// Dominio que atiende el agente.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Sop,
    Hc,
}

impl AgentKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Sop => "SOP Assistant",
            Self::Hc => "Human Capital Assistant",
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            Self::Sop => prompts::SOP_SYSTEM_PROMPT,
            Self::Hc => prompts::HC_SYSTEM_PROMPT,
        }
    }

    fn render_user_prompt(&self, context: &str, question: &str) -> String {
        match self {
            Self::Sop => prompts::render_sop_prompt(context, question),
            Self::Hc => prompts::render_hc_prompt(context, question),
        }
    }

    /// Respuesta fija y determinista cuando la recuperación no devuelve nada.
    fn no_information_answer(&self, question: &str) -> String {
        match self {
            Self::Sop => format!("No relevant SOP information found for: {question}"),
            Self::Hc => {
                format!("No relevant information found in the Employee Manual for: {question}")
            }
        }
    }

    fn not_ready_hint(&self) -> &'static str {
        match self {
            Self::Sop => {
                "El agente SOP no tiene índice. Lanza primero la ingesta del corpus (POST /sop/ingest)."
            }
            Self::Hc => {
                "El agente de Capital Humano no tiene índice. Sube primero un documento (POST /hc/upload)."
            }
        }
    }
}

/// Resultado de una consulta: respuesta + citas + chunks usados.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub chunks: usize,
}

/// Renderiza los chunks recuperados como bloque de contexto numerado desde 1,
/// en orden de recuperación, con marcador de fuente y delimitador visible.
pub fn format_context(chunks: &[&IndexedChunk]) -> String {
    let mut parts = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let doc_id = chunk.metadata.document_id.as_deref().unwrap_or(UNKNOWN);
        let title = chunk.metadata.title.as_deref().unwrap_or(UNKNOWN);
        parts.push(format!(
            "\n[Source {}: {}]\n{}\n\n{}\n\n---",
            i + 1,
            doc_id,
            title,
            chunk.text
        ));
    }
    parts.join("\n")
}

/// Extrae las citas de-duplicadas por identificador de documento; gana la
/// primera aparición y se conserva ese orden.
pub fn extract_sources(chunks: &[&IndexedChunk]) -> Vec<SourceRef> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for chunk in chunks {
        let source = SourceRef::from_metadata(&chunk.metadata);
        if seen.insert(source.document_id.clone()) {
            sources.push(source);
        }
    }
    sources
}

/// Agente de un dominio: índice (anulable hasta construirse) + configuración.
pub struct DomainAgent {
    kind: AgentKind,
    top_k: usize,
    index_path: PathBuf,
    backend: Arc<dyn LanguageBackend>,
    index: RwLock<Option<Arc<VectorIndex>>>,
}

impl DomainAgent {
    pub fn new(
        kind: AgentKind,
        top_k: usize,
        index_path: PathBuf,
        backend: Arc<dyn LanguageBackend>,
    ) -> Self {
        Self { kind, top_k, index_path, backend, index: RwLock::new(None) }
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    /// Intenta cargar el índice persistido del dominio.
    /// Devuelve Ok(false) si todavía no existe (el agente queda NotReady).
    pub async fn try_load_index(&self) -> Result<bool, ServiceError> {
        match VectorIndex::load(&self.index_path) {
            Ok(index) => {
                info!(
                    "[{}] Índice cargado con {} chunks.",
                    self.kind.display_name(),
                    index.len()
                );
                *self.index.write().await = Some(Arc::new(index));
                Ok(true)
            }
            Err(ServiceError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Instala un índice recién construido (intercambio en caliente).
    pub async fn install_index(&self, index: VectorIndex) {
        *self.index.write().await = Some(Arc::new(index));
    }

    pub async fn is_ready(&self) -> bool {
        self.index.read().await.is_some()
    }

    async fn snapshot(&self) -> Option<Arc<VectorIndex>> {
        self.index.read().await.clone()
    }

    /// Responde una pregunta: recupera los top-K chunks, ensambla el contexto,
    /// extrae las citas y pide la respuesta al modelo.
    pub async fn query(&self, question: &str) -> Result<QueryOutcome, ServiceError> {
        let index = self.snapshot().await.ok_or_else(|| {
            ServiceError::NotInitialized(self.kind.not_ready_hint().to_string())
        })?;

        let query_vec = self.backend.embed_one(question).await?;
        let results = index.search(&query_vec, self.top_k);

        if results.is_empty() {
            // Corpus sin nada relevante: respuesta fija sin gastar una
            // llamada al modelo.
            return Ok(QueryOutcome {
                answer: self.kind.no_information_answer(question),
                sources: Vec::new(),
                chunks: 0,
            });
        }

        let retrieved: Vec<&IndexedChunk> = results.iter().map(|(chunk, _)| *chunk).collect();
        let context = format_context(&retrieved);
        let sources = extract_sources(&retrieved);

        let user_prompt = self.kind.render_user_prompt(&context, question);
        let answer = self
            .backend
            .complete(self.kind.system_prompt(), &user_prompt)
            .await?;

        Ok(QueryOutcome { answer, sources, chunks: retrieved.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::Status;
    use crate::config::DomainSettings;
    use crate::ingest::{CorpusKind, DocumentIngestor};
    use crate::models::DocMetadata;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Doble de prueba: embeddings deterministas por vocabulario y contadores
    /// de llamadas para poder afirmar sobre el corto-circuito.
    struct FakeBackend {
        embed_calls: AtomicUsize,
        complete_calls: AtomicUsize,
        fail_embeddings: bool,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                embed_calls: AtomicUsize::new(0),
                complete_calls: AtomicUsize::new(0),
                fail_embeddings: false,
            }
        }

        fn failing() -> Self {
            Self { fail_embeddings: true, ..Self::new() }
        }
    }

    fn keyword_embedding(text: &str) -> Vec<f64> {
        const VOCAB: &[&str] = &["capping", "torque", "vial", "leave", "cafeteria", "menu"];
        let lower = text.to_lowercase();
        let mut vector: Vec<f64> =
            VOCAB.iter().map(|w| lower.matches(w).count() as f64).collect();
        vector.push(1.0); // dimensión constante: ningún vector es nulo
        vector
    }

    #[async_trait]
    impl LanguageBackend for FakeBackend {
        async fn embed_many(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>, ServiceError> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_embeddings {
                return Err(ServiceError::Upstream("fallo simulado de embeddings".to_string()));
            }
            Ok(texts.iter().map(|t| keyword_embedding(t)).collect())
        }

        async fn complete(
            &self,
            _system_prompt: &str,
            _user_message: &str,
        ) -> Result<String, ServiceError> {
            self.complete_calls.fetch_add(1, Ordering::SeqCst);
            Ok("The capping torque is 5 Nm. (SOP-001)".to_string())
        }
    }

    fn indexed_chunk(doc_id: Option<&str>, title: &str, text: &str) -> IndexedChunk {
        IndexedChunk {
            text: text.to_string(),
            metadata: DocMetadata {
                source: "test.md".to_string(),
                filename: "test.md".to_string(),
                document_id: doc_id.map(str::to_string),
                title: Some(title.to_string()),
                doc_type: "Document".to_string(),
                ..Default::default()
            },
            chunk_id: 0,
            embedding: Vec::new(),
        }
    }

    #[test]
    fn extract_sources_deduplica_conservando_el_orden() {
        let a1 = indexed_chunk(Some("SOP-001"), "Capping", "uno");
        let b = indexed_chunk(Some("SOP-002"), "Cleaning", "dos");
        let a2 = indexed_chunk(Some("SOP-001"), "Capping", "tres");
        let chunks = vec![&a1, &b, &a2];

        let sources = extract_sources(&chunks);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].document_id, "SOP-001");
        assert_eq!(sources[1].document_id, "SOP-002");

        // Idempotente sobre la misma secuencia.
        assert_eq!(extract_sources(&chunks), sources);
    }

    #[test]
    fn format_context_numera_desde_uno_en_orden_de_recuperacion() {
        let a = indexed_chunk(Some("SOP-001"), "Capping", "Texto A");
        let b = indexed_chunk(None, "Sin identificador", "Texto B");
        let context = format_context(&[&a, &b]);

        assert!(context.contains("[Source 1: SOP-001]"));
        assert!(context.contains("[Source 2: Unknown]"));
        assert!(context.contains("Texto A"));
        assert!(context.contains("---"));
        assert!(context.find("Texto A").unwrap() < context.find("Texto B").unwrap());
    }

    fn agent_with(backend: Arc<dyn LanguageBackend>, top_k: usize, dir: &Path) -> DomainAgent {
        DomainAgent::new(AgentKind::Sop, top_k, dir.join("indice"), backend)
    }

    #[tokio::test]
    async fn consultar_sin_indice_es_not_initialized() {
        let dir = TempDir::new().expect("tempdir");
        let agent = agent_with(Arc::new(FakeBackend::new()), 4, dir.path());
        let result = agent.query("¿Cuál es el par de apriete?").await;
        assert!(matches!(result, Err(ServiceError::NotInitialized(_))));
    }

    #[tokio::test]
    async fn corpus_vacio_responde_sin_llamar_al_modelo() {
        let dir = TempDir::new().expect("tempdir");
        let backend = Arc::new(FakeBackend::new());
        let agent = agent_with(backend.clone(), 4, dir.path());
        let empty = VectorIndex::build(Vec::new(), Vec::new(), "modelo-test").expect("vacío");
        agent.install_index(empty).await;

        let outcome = agent.query("What is the capping torque?").await.expect("respuesta");
        assert_eq!(outcome.answer, "No relevant SOP information found for: What is the capping torque?");
        assert!(outcome.sources.is_empty());
        assert_eq!(outcome.chunks, 0);
        assert_eq!(backend.complete_calls.load(Ordering::SeqCst), 0);
    }

    fn write_corpus(dir: &Path) {
        fs::write(
            dir.join("sop_001.md"),
            "Document ID: SOP-001\nTitle: Vial Capping\n\nThe capping torque is 5 Nm for all vial formats.",
        )
        .expect("escritura");
        fs::write(
            dir.join("qa_menu.md"),
            "Document ID: QA-002\nTitle: Cafeteria Menu\n\nThe cafeteria menu changes every Monday.",
        )
        .expect("escritura");
    }

    fn settings(docs: &Path, index: &Path) -> DomainSettings {
        DomainSettings {
            documents_path: docs.to_path_buf(),
            index_path: index.to_path_buf(),
            chunk_size: 200,
            chunk_overlap: 20,
            top_k: 1,
        }
    }

    #[tokio::test]
    async fn extremo_a_extremo_cita_solo_el_documento_relevante() {
        let dir = TempDir::new().expect("tempdir");
        let docs_dir = dir.path().join("docs");
        let index_dir = dir.path().join("indice");
        fs::create_dir_all(&docs_dir).expect("mkdir");
        write_corpus(&docs_dir);

        let backend = Arc::new(FakeBackend::new());
        let ingestor = DocumentIngestor::new(CorpusKind::Sop, settings(&docs_dir, &index_dir))
            .expect("ingestor");
        let status = Arc::new(Mutex::new(Status::default()));

        let (documents, summary) = ingestor.load_folder(&status);
        assert_eq!(summary.files_ingested, 2);

        let index = ingestor
            .rebuild_index(backend.as_ref(), &documents, "modelo-test")
            .await
            .expect("rebuild");
        assert!(VectorIndex::persisted_exists(&index_dir));

        let agent = DomainAgent::new(AgentKind::Sop, 1, index_dir.clone(), backend.clone());
        agent.install_index(index).await;

        let outcome = agent.query("What is the capping torque?").await.expect("respuesta");
        assert_eq!(outcome.chunks, 1);
        assert_eq!(outcome.sources.len(), 1);
        assert_eq!(outcome.sources[0].document_id, "SOP-001");
        assert_eq!(outcome.sources[0].title, "Vial Capping");
        assert_eq!(backend.complete_calls.load(Ordering::SeqCst), 1);
        assert!(outcome.answer.contains("5 Nm"));
    }

    #[tokio::test]
    async fn un_rebuild_fallido_conserva_el_indice_anterior() {
        let dir = TempDir::new().expect("tempdir");
        let docs_dir = dir.path().join("docs");
        let index_dir = dir.path().join("indice");
        fs::create_dir_all(&docs_dir).expect("mkdir");
        write_corpus(&docs_dir);

        let good_backend = Arc::new(FakeBackend::new());
        let ingestor = DocumentIngestor::new(CorpusKind::Sop, settings(&docs_dir, &index_dir))
            .expect("ingestor");
        let status = Arc::new(Mutex::new(Status::default()));
        let (documents, _) = ingestor.load_folder(&status);

        let index = ingestor
            .rebuild_index(good_backend.as_ref(), &documents, "modelo-test")
            .await
            .expect("rebuild inicial");
        let agent = DomainAgent::new(AgentKind::Sop, 1, index_dir.clone(), good_backend.clone());
        agent.install_index(index).await;
        assert!(agent.is_ready().await);

        // Fallo de embeddings a mitad del rebuild: el error se propaga y no
        // toca ni el agente ni el índice en disco.
        let failing = FakeBackend::failing();
        let result = ingestor
            .rebuild_index(&failing, &documents, "modelo-test")
            .await;
        assert!(matches!(result, Err(ServiceError::Upstream(_))));

        assert!(agent.is_ready().await);
        assert!(VectorIndex::persisted_exists(&index_dir));
        let outcome = agent.query("What is the capping torque?").await.expect("respuesta");
        assert_eq!(outcome.sources[0].document_id, "SOP-001");
    }
}
