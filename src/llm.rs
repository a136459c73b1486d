//! Abstracción sobre Rig para embeddings y chat (proveedor OpenAI).
//!
//! El trait `LanguageBackend` es la costura del servicio con el modelo: el
//! resto del código sólo conoce dos capacidades, embeber textos y completar
//! un chat, lo que permite sustituir el proveedor real por dobles en tests.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::warn;

use crate::config::AppConfig;
use crate::error::ServiceError;

/// Capacidades del colaborador externo de las que depende el núcleo.
#[async_trait]
pub trait LanguageBackend: Send + Sync {
    /// Embeddings por lotes, preservando el orden de los textos de entrada.
    async fn embed_many(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>, ServiceError>;

    /// Embedding de un único texto (consultas).
    async fn embed_one(&self, text: &str) -> Result<Vec<f64>, ServiceError> {
        let mut vectors = self.embed_many(vec![text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            ServiceError::Upstream("El proveedor no devolvió ningún embedding".to_string())
        })
    }

    /// Completado de chat: instrucción de sistema + mensaje de usuario.
    /// Devuelve el texto generado tal cual, sin post-procesado.
    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, ServiceError>;
}

/// Gestor de LLM y embeddings sobre OpenAI vía Rig.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub embedding_model: String,
    pub chat_model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub embed_batch_size: usize,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
            max_retries: cfg.max_retries,
            embed_batch_size: cfg.embed_batch_size,
        })
    }

    /// Comprueba si la credencial del proveedor está presente en el entorno.
    pub fn credentials_configured() -> bool {
        env::var("OPENAI_API_KEY").map(|v| !v.trim().is_empty()).unwrap_or(false)
    }

    fn ensure_credentials(&self) -> Result<(), ServiceError> {
        if Self::credentials_configured() {
            Ok(())
        } else {
            Err(ServiceError::Configuration(
                "Falta OPENAI_API_KEY en el entorno (revisa tu fichero .env)".to_string(),
            ))
        }
    }

    /// Embeddings de un lote, con timeout y reintentos acotados.
    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f64>>, ServiceError> {
        use rig::client::EmbeddingsClient as _;
        use rig::embeddings::EmbeddingModel as _;
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};

        let client = openai::Client::from_env();

        // Modelo de embeddings: config o default
        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(
                    "Reintentando embeddings ({}/{}): {last_error}",
                    attempt, self.max_retries
                );
            }
            match timeout(self.request_timeout, embedding_model.embed_texts(batch.to_vec())).await
            {
                Ok(Ok(embeddings)) => {
                    if embeddings.len() != batch.len() {
                        return Err(ServiceError::Upstream(format!(
                            "Número de embeddings ({}) distinto al número de textos ({})",
                            embeddings.len(),
                            batch.len()
                        )));
                    }
                    return Ok(embeddings.iter().map(|e| e.vec.clone()).collect());
                }
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = format!("timeout tras {:?}", self.request_timeout),
            }
        }
        Err(ServiceError::Upstream(format!(
            "Embeddings agotaron los reintentos: {last_error}"
        )))
    }
}

#[async_trait]
impl LanguageBackend for LlmManager {
    async fn embed_many(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>, ServiceError> {
        self.ensure_credentials()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Por lotes: menos peticiones a costa de payloads mayores.
        let batch_size = self.embed_batch_size.max(1);
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, ServiceError> {
        use rig::client::CompletionClient as _;
        use rig::completion::Prompt;
        use rig::providers::openai;

        self.ensure_credentials()?;
        let client = openai::Client::from_env();

        // Modelo de chat por defecto si no se ha configurado otro
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!("Reintentando chat ({}/{}): {last_error}", attempt, self.max_retries);
            }
            let agent = client
                .agent(model_name)
                .preamble(system_prompt)
                .temperature(self.temperature)
                .max_tokens(self.max_tokens)
                .build();

            match timeout(self.request_timeout, agent.prompt(user_message)).await {
                Ok(Ok(answer)) => return Ok(answer),
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = format!("timeout tras {:?}", self.request_timeout),
            }
        }
        Err(ServiceError::Upstream(format!(
            "El chat agotó los reintentos: {last_error}"
        )))
    }
}
