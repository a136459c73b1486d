use std::fs;
use std::path::Path;

use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::spawn;
use tracing::{error, info};

use crate::{
    agent::DomainAgent,
    app_state::{AppState, Status},
    error::ServiceError,
    ingest::{self, CorpusKind, DocumentIngestor, IngestionSummary},
    llm::LlmManager,
    models::SourceRef,
    vector_store::VectorIndex,
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct QuestionPayload {
    question: String,
}

#[derive(Serialize)]
pub struct AnswerResponse {
    answer: String,
    sources: Vec<SourceRef>,
    chunks: usize,
    agent: &'static str,
}

#[derive(Serialize)]
pub struct UploadResponse {
    status: &'static str,
    message: String,
    chunks_created: usize,
}

#[derive(Serialize)]
pub struct SystemStatus {
    sop_agent_ready: bool,
    hc_agent_ready: bool,
    sop_index_exists: bool,
    hc_index_exists: bool,
    env_loaded: bool,
    embedding_model: String,
    chat_model: String,
    ingestion: Status,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/sop/ask", post(ask_sop_handler))
        .route("/sop/ingest", post(ingest_sop_handler))
        .route("/hc/ask", post(ask_hc_handler))
        .route("/hc/upload", post(upload_hc_handler))
        .route("/status", get(status_handler))
        .route("/", get(root_handler))
        .route("/shutdown", post(shutdown_handler))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .with_state(app_state)
}

/// Respuesta de error uniforme: categoría + mensaje, nunca un stack trace.
fn error_response(err: &ServiceError) -> (StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(json!({ "error": err.to_string(), "category": err.category() })),
    )
}

// --- Handlers de consulta ---

#[axum::debug_handler]
async fn ask_sop_handler(
    State(state): State<AppState>,
    Json(payload): Json<QuestionPayload>,
) -> Result<Json<AnswerResponse>, (StatusCode, Json<serde_json::Value>)> {
    ask(&state.sop_agent, &payload.question).await
}

#[axum::debug_handler]
async fn ask_hc_handler(
    State(state): State<AppState>,
    Json(payload): Json<QuestionPayload>,
) -> Result<Json<AnswerResponse>, (StatusCode, Json<serde_json::Value>)> {
    ask(&state.hc_agent, &payload.question).await
}

async fn ask(
    agent: &DomainAgent,
    question: &str,
) -> Result<Json<AnswerResponse>, (StatusCode, Json<serde_json::Value>)> {
    info!("[{}] ❓ Pregunta: {}", agent.kind().display_name(), question);
    match agent.query(question).await {
        Ok(outcome) => {
            info!("[{}] ✅ Respuesta generada.", agent.kind().display_name());
            Ok(Json(AnswerResponse {
                answer: outcome.answer,
                sources: outcome.sources,
                chunks: outcome.chunks,
                agent: agent.kind().display_name(),
            }))
        }
        Err(err) => {
            error!("[{}] ❌ Error: {err}", agent.kind().display_name());
            Err(error_response(&err))
        }
    }
}

// --- Subida de documentos de RRHH ---

#[axum::debug_handler]
async fn upload_hc_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, Json<serde_json::Value>)> {
    // 1) Recoger el primer campo que traiga un fichero
    let mut upload: Option<(String, axum::body::Bytes)> = None;
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error_response(&ServiceError::Internal(format!("Subida malformada: {err}")))
    })? {
        if let Some(name) = field.file_name() {
            let name = name.to_string();
            let data = field.bytes().await.map_err(|err| {
                error_response(&ServiceError::Internal(format!(
                    "No se pudo leer el fichero subido: {err}"
                )))
            })?;
            upload = Some((name, data));
            break;
        }
    }
    let (filename, data) = upload.ok_or_else(|| {
        error_response(&ServiceError::Internal(
            "La petición no contiene ningún fichero".to_string(),
        ))
    })?;

    // 2) Validar la extensión antes de procesar nada
    let safe_name = Path::new(&filename)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.clone());
    let extension = Path::new(&safe_name)
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("")
        .to_lowercase();
    if !ingest::HC_UPLOAD_EXTENSIONS.contains(&extension.as_str()) {
        return Err(error_response(&ServiceError::UnsupportedFormat(format!(
            "Sólo se aceptan ficheros PDF y DOCX (recibido: {safe_name})"
        ))));
    }

    // 3) Sin credenciales no tiene sentido arrancar el proceso
    if !LlmManager::credentials_configured() {
        return Err(error_response(&ServiceError::Configuration(
            "Falta OPENAI_API_KEY en el entorno (revisa tu fichero .env)".to_string(),
        )));
    }

    // 4) Persistir el fichero en el directorio de subidas
    let result = async {
        fs::create_dir_all(&state.config.hc_upload_dir)?;
        let file_path = state.config.hc_upload_dir.join(&safe_name);
        fs::write(&file_path, &data)?;
        info!("[HC] 📄 Procesando documento: {safe_name}");

        // 5) Ingesta + rebuild íntegro + intercambio en caliente
        let ingestor = DocumentIngestor::new(CorpusKind::Hc, state.config.hc.clone())?;
        let (index, chunks_created) = ingestor
            .process_document(
                state.backend.as_ref(),
                &file_path,
                &state.config.llm_embedding_model,
            )
            .await?;
        state.hc_agent.install_index(index).await;
        Ok::<usize, ServiceError>(chunks_created)
    }
    .await;

    match result {
        Ok(chunks_created) => {
            info!("[HC] ✅ Índice reconstruido con {chunks_created} chunks.");
            Ok(Json(UploadResponse {
                status: "success",
                message: format!(
                    "Documento procesado correctamente. Se han creado {chunks_created} chunks."
                ),
                chunks_created,
            }))
        }
        Err(err) => {
            error!("[HC] ❌ Error procesando {safe_name}: {err}");
            Err(error_response(&err))
        }
    }
}

// --- Ingesta del corpus SOP en segundo plano ---

#[axum::debug_handler]
async fn ingest_sop_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    {
        let status = state.status.lock().unwrap();
        if status.is_busy {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({"error": "Ya hay una ingesta en curso."})),
            ));
        }
    }

    let ingestor = DocumentIngestor::new(CorpusKind::Sop, state.config.sop.clone())
        .map_err(|err| error_response(&err))?;

    spawn(async move {
        {
            let mut status = state.status.lock().unwrap();
            status.is_busy = true;
            status.message = "Iniciando indexación del corpus SOP...".to_string();
            status.progress = 0.0;
        }

        let result = run_sop_ingestion(&state, &ingestor).await;

        let mut status = state.status.lock().unwrap();
        status.is_busy = false;
        status.progress = 0.0;
        match result {
            Ok(summary) => {
                status.message = format!("¡Indexación completada! {}", summary);
            }
            Err(err) => {
                status.message = format!("Error en la indexación: {err}");
                error!("Error de ingesta SOP: {err}");
            }
        }
    });

    Ok(StatusCode::ACCEPTED)
}

async fn run_sop_ingestion(
    state: &AppState,
    ingestor: &DocumentIngestor,
) -> Result<IngestionSummary, ServiceError> {
    let (documents, mut summary) = ingestor.load_folder(&state.status);
    if documents.is_empty() {
        return Err(ServiceError::Internal(format!(
            "No se encontró ningún documento en {}",
            state.config.sop.documents_path.display()
        )));
    }

    let index = ingestor
        .rebuild_index(
            state.backend.as_ref(),
            &documents,
            &state.config.llm_embedding_model,
        )
        .await?;
    summary.chunks_created = index.len();
    state.sop_agent.install_index(index).await;
    Ok(summary)
}

// --- Estado del sistema ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        sop_agent_ready: state.sop_agent.is_ready().await,
        hc_agent_ready: state.hc_agent.is_ready().await,
        sop_index_exists: VectorIndex::persisted_exists(&state.config.sop.index_path),
        hc_index_exists: VectorIndex::persisted_exists(&state.config.hc.index_path),
        env_loaded: LlmManager::credentials_configured(),
        embedding_model: state.config.llm_embedding_model.clone(),
        chat_model: state.config.llm_chat_model.clone(),
        ingestion: state.status.lock().unwrap().clone(),
    })
}

#[axum::debug_handler]
async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Asistente documental dual (SOP + Capital Humano)",
        "version": env!("CARGO_PKG_VERSION"),
        "agents": [
            {
                "name": "SOP Assistant",
                "description": "Responde preguntas sobre SOPs e instrucciones de trabajo",
                "endpoints": {
                    "POST /sop/ask": "Preguntar sobre el corpus SOP",
                    "POST /sop/ingest": "Reindexar el corpus SOP"
                }
            },
            {
                "name": "Human Capital Assistant",
                "description": "Responde preguntas sobre políticas de RRHH",
                "endpoints": {
                    "POST /hc/upload": "Subir un documento de RRHH (PDF/DOCX)",
                    "POST /hc/ask": "Preguntar sobre las políticas subidas"
                }
            }
        ],
        "system_endpoints": {
            "GET /status": "Estado de agentes, índices y credenciales",
            "POST /shutdown": "Apagado ordenado del servidor"
        }
    }))
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
