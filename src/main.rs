// Módulos de la aplicación
mod agent;
mod api;
mod app_state;
mod chunker;
mod config;
mod error;
mod ingest;
mod llm;
mod models;
mod prompts;
mod vector_store;

use crate::app_state::{AppState, Status};
use axum::Router;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración y preparar los directorios de trabajo
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");
    cfg.create_directories()
        .expect("Error creando los directorios de datos");

    // 3. Comprobar credenciales. No es fatal: los agentes arrancan NotReady
    //    y las peticiones devolverán un error de configuración.
    if !llm::LlmManager::credentials_configured() {
        warn!("⚠️ Falta OPENAI_API_KEY en el entorno; los agentes no podrán responder hasta configurarla.");
    }

    // 4. Inicializar el backend LLM y los dos agentes de dominio
    let manager = llm::LlmManager::from_config(&cfg).expect("Error inicializando LLM Manager");
    let backend: Arc<dyn llm::LanguageBackend> = Arc::new(manager);

    let sop_agent = Arc::new(agent::DomainAgent::new(
        agent::AgentKind::Sop,
        cfg.sop.top_k,
        cfg.sop.index_path.clone(),
        backend.clone(),
    ));
    let hc_agent = Arc::new(agent::DomainAgent::new(
        agent::AgentKind::Hc,
        cfg.hc.top_k,
        cfg.hc.index_path.clone(),
        backend.clone(),
    ));

    // El corpus SOP se carga una vez al arrancar si ya hay índice en disco;
    // el de Capital Humano se inicializa tras la primera subida.
    match sop_agent.try_load_index().await {
        Ok(true) => info!("✅ Agente SOP: listo."),
        Ok(false) => warn!("⚠️ Agente SOP: sin índice en disco (lanza POST /sop/ingest)."),
        Err(err) => warn!("❌ Agente SOP: fallo cargando el índice: {err}"),
    }
    match hc_agent.try_load_index().await {
        Ok(true) => info!("✅ Agente de Capital Humano: listo."),
        Ok(false) => {
            warn!("⚠️ Agente de Capital Humano: sin índice (se inicializará tras la primera subida).")
        }
        Err(err) => warn!("❌ Agente de Capital Humano: fallo cargando el índice: {err}"),
    }

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        backend,
        sop_agent,
        hc_agent,
        status: Arc::new(Mutex::new(Status {
            is_busy: false,
            message: "Servidor listo.".to_string(),
            progress: 0.0,
        })),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .expect("No se pudo abrir el puerto del servidor");
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .expect("El servidor terminó con error");

    info!("✅ Servidor cerrado correctamente.");
}
