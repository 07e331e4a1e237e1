use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use recall_core::EmbeddingProvider;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

const MAX_LEN: usize = 256;

/// BGE-M3 (XLM-RoBERTa large) dense embedder running on candle.
///
/// Inference is CPU/GPU bound and runs on tokio's blocking pool.
pub struct BgeM3Embedder {
    inner: Arc<Model>,
    model_id: String,
}

struct Model {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
}

impl BgeM3Embedder {
    /// Loads from the directory found by [`resolve_model_dir`].
    pub fn new() -> Result<Self> {
        Self::load(&resolve_model_dir()?)
    }

    /// Loads `tokenizer.json`, `config.json` and either `model.safetensors`
    /// or `pytorch_model.bin` from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let started = Instant::now();
        let device = select_device();

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {e}", tokenizer_path.display()))?;

        let config_path = model_dir.join("config.json");
        let raw_config = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config: XLMRobertaConfig = serde_json::from_str(&raw_config)?;
        let dim = serde_json::from_str::<serde_json::Value>(&raw_config)?
            .get("hidden_size")
            .and_then(serde_json::Value::as_u64)
            .and_then(|d| usize::try_from(d).ok())
            .ok_or_else(|| anyhow!("{} has no hidden_size", config_path.display()))?;

        let weights: HashMap<String, Tensor> = {
            let safetensors = model_dir.join("model.safetensors");
            if safetensors.exists() {
                candle_core::safetensors::load(&safetensors, &device)?
            } else {
                candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?
                    .into_iter()
                    .collect()
            }
        };
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;

        info!(
            dir = %model_dir.display(),
            dim,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "BGE-M3 model loaded"
        );
        Ok(Self {
            inner: Arc::new(Model {
                model,
                tokenizer,
                device,
                dim,
            }),
            model_id: format!("bge-m3:d{dim}"),
        })
    }
}

impl Model {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, MAX_LEN, &self.device)?;
        let token_type_ids = Tensor::zeros((texts.len(), MAX_LEN), DType::I64, &self.device)?;
        let hidden = self
            .model
            .forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let vectors: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_vec2()?;
        let elapsed = started.elapsed();
        if elapsed.as_millis() > 100 * texts.len() as u128 {
            warn!(batch = texts.len(), elapsed_ms = elapsed.as_millis() as u64, "slow embedding batch");
        } else {
            debug!(batch = texts.len(), elapsed_ms = elapsed.as_millis() as u64, "embedded batch");
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for BgeM3Embedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.inner.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inner = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || inner.embed_batch(&texts)).await?
    }
}

/// Model directory from `APP_MODEL_DIR`, `MODEL_DIR`, `../models/bge-m3` or `models/bge-m3`.
pub fn resolve_model_dir() -> Result<PathBuf> {
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            let p = recall_core::config::expand_path(&dir);
            if p.exists() {
                debug!(source = var, dir = %p.display(), "model dir resolved");
                return Ok(p);
            }
        }
    }
    for candidate in ["../models/bge-m3", "models/bge-m3"] {
        let p = Path::new(candidate);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }
    Err(anyhow!("Could not locate BGE-M3 model directory"))
}
