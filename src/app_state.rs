use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{agent::DomainAgent, config::AppConfig, llm::LanguageBackend};

/// Estado compartido inyectado en los handlers; no hay singletons globales.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub backend: Arc<dyn LanguageBackend>,
    pub sop_agent: Arc<DomainAgent>,
    pub hc_agent: Arc<DomainAgent>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

/// Estado de la ingesta en segundo plano, consultable vía /status.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}
