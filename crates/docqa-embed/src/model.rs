use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use docqa_core::{Embedder, Error, Result};
use tokenizers::Tokenizer;

use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_on_device;

const MAX_LEN: usize = 256;

/// sentence-transformers/all-MiniLM-L6-v2: BERT encoder, masked mean pooling, L2 norm.
///
/// Expects `tokenizer.json`, `config.json` and `model.safetensors` (or
/// `pytorch_model.bin`) in the model directory.
pub struct MiniLmEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    id: String,
}

fn model_err(e: impl std::fmt::Display) -> Error {
    Error::EmbeddingFailure(e.to_string())
}

impl MiniLmEmbedder {
    pub fn new() -> Result<Self> {
        Self::from_dir(&resolve_model_dir()?)
    }

    pub fn from_dir(model_dir: &Path) -> Result<Self> {
        let device = select_device();
        tracing::info!(dir = %model_dir.display(), "loading MiniLM model");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| model_err(format!("failed to load tokenizer from {}: {e}", tokenizer_path.display())))?;
        let config_text = std::fs::read_to_string(model_dir.join("config.json"))?;
        let config: BertConfig = serde_json::from_str(&config_text).map_err(model_err)?;
        let raw: serde_json::Value = serde_json::from_str(&config_text).map_err(model_err)?;
        let dim = raw
            .get("hidden_size")
            .and_then(serde_json::Value::as_u64)
            .and_then(|d| usize::try_from(d).ok())
            .ok_or_else(|| model_err("config.json has no hidden_size"))?;

        let weights = load_weights(model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = BertModel::load(vb, &config).map_err(model_err)?;
        tracing::info!(dim, "MiniLM model loaded");
        Ok(Self { model, tokenizer, device, dim, id: format!("minilm-l6-v2:d{dim}") })
    }

    fn forward(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, token_type_ids, attention_mask) = tokenize_on_device(&self.tokenizer, text, MAX_LEN, &self.device)?;
        let hidden = self.model.forward(&input_ids, &token_type_ids, Some(&attention_mask)).map_err(model_err)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask).map_err(model_err)?;
        let v: Vec<f32> = pooled.to_device(&Device::Cpu).and_then(|t| t.squeeze(0)).and_then(|t| t.to_vec1()).map_err(model_err)?;
        if v.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: v.len() });
        }
        if start.elapsed().as_millis() > 100 {
            tracing::debug!(elapsed_ms = start.elapsed().as_millis(), "slow embedding");
        }
        Ok(v)
    }
}

impl Embedder for MiniLmEmbedder {
    fn id(&self) -> &str { &self.id }

    fn dim(&self) -> usize { self.dim }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.forward(text)
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        return candle_core::safetensors::load(&safetensors, device).map_err(model_err);
    }
    let pth = model_dir.join("pytorch_model.bin");
    let weights = candle_core::pickle::read_all(&pth).map_err(model_err)?;
    Ok(weights.into_iter().collect())
}

/// Metal when compiled in and available, unless `APP_DEVICE=cpu`.
fn select_device() -> Device {
    let force_cpu = std::env::var("APP_DEVICE").is_ok_and(|v| v.eq_ignore_ascii_case("cpu"));
    #[cfg(feature = "metal")]
    {
        if !force_cpu {
            match Device::new_metal(0) {
                Ok(dev) => {
                    tracing::info!("embedding on Metal");
                    return dev;
                }
                Err(e) => tracing::warn!(error = %e, "Metal unavailable, falling back to CPU"),
            }
        }
    }
    tracing::info!(force_cpu, "embedding on CPU");
    Device::Cpu
}

fn resolve_model_dir() -> Result<PathBuf> {
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            let p = PathBuf::from(&dir);
            if p.exists() {
                tracing::info!(var, dir = %p.display(), "using model dir from env");
                return Ok(p);
            }
        }
    }
    for candidate in ["models/all-MiniLM-L6-v2", "../models/all-MiniLM-L6-v2"] {
        let p = Path::new(candidate);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }
    Err(model_err("could not locate all-MiniLM-L6-v2 model directory (set APP_MODEL_DIR)"))
}
