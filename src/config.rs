//! Carga y gestión de configuración de la aplicación (servidor + LLM + corpora).

use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ServiceError;

/// Configuración de un dominio (agente) concreto.
#[derive(Clone, Debug)]
pub struct DomainSettings {
    pub documents_path: PathBuf,
    pub index_path: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub embed_batch_size: usize,

    pub sop: DomainSettings,
    pub hc: DomainSettings,
    pub hc_upload_dir: PathBuf,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self, ServiceError> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string());

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let sop = DomainSettings {
            documents_path: env_path("SOP_DOCUMENTS_PATH", "data/documents/sop"),
            index_path: env_path("SOP_INDEX_PATH", "data/vectorstore/sop_index"),
            chunk_size: env_parse("SOP_CHUNK_SIZE", 800)?,
            chunk_overlap: env_parse("SOP_CHUNK_OVERLAP", 120)?,
            top_k: env_parse("SOP_TOP_K", 4)?,
        };

        let hc = DomainSettings {
            documents_path: env_path("HC_DOCUMENTS_PATH", "data/documents/hc"),
            index_path: env_path("HC_INDEX_PATH", "data/vectorstore/hc_index"),
            chunk_size: env_parse("HC_CHUNK_SIZE", 800)?,
            chunk_overlap: env_parse("HC_CHUNK_OVERLAP", 120)?,
            top_k: env_parse("HC_TOP_K", 4)?,
        };

        Ok(Self {
            server_addr,
            llm_embedding_model,
            llm_chat_model,
            temperature: env_parse("TEMPERATURE", 0.0)?,
            max_tokens: env_parse("MAX_TOKENS", 1000)?,
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", 60)?,
            max_retries: env_parse("LLM_MAX_RETRIES", 2)?,
            embed_batch_size: env_parse("EMBED_BATCH_SIZE", 16)?,
            sop,
            hc,
            hc_upload_dir: env_path("HC_UPLOAD_DIR", "uploads/hc"),
        })
    }

    /// Crea los directorios de trabajo que el servicio espera encontrar.
    pub fn create_directories(&self) -> Result<(), ServiceError> {
        fs::create_dir_all(&self.sop.documents_path)?;
        fs::create_dir_all(&self.hc.documents_path)?;
        fs::create_dir_all(&self.hc_upload_dir)?;
        for index_path in [&self.sop.index_path, &self.hc.index_path] {
            if let Some(parent) = index_path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ServiceError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            ServiceError::Configuration(format!("Valor inválido para {key}: {raw}"))
        }),
        Err(_) => Ok(default),
    }
}
