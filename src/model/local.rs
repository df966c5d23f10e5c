//! Local model backend: on-device embeddings and generation, no network
//! calls. Loaded lazily behind a `tokio::sync::OnceCell` so a process
//! that never exercises the local path never pays the weight-load cost.
//!
//! `embed()` is grounded on `marlonsc-mcb`'s `fastembed` dependency
//! (same crate, same "pick a small sentence-embedding model, cache it
//! under a model dir" shape as its registry config). `generate_with_tools()`
//! generalizes `other_examples/.../search_with_candle.rs.rs`'s
//! load-from-HuggingFace-Hub idiom from an embedding model to a causal LM.

use super::{empty_response_error, GenerateRequest, GenerateResponse, ModelAdapter};
use crate::config::Config;
use crate::error::{MemError, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_transformers::models::quantized_llama::ModelWeights;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;

pub struct LocalAdapter {
    config: Config,
    embedder: OnceCell<tokio::sync::Mutex<TextEmbedding>>,
    generator: OnceCell<tokio::sync::Mutex<LocalGenerator>>,
}

impl LocalAdapter {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            embedder: OnceCell::new(),
            generator: OnceCell::new(),
        }
    }

    async fn embedder(&self) -> Result<&tokio::sync::Mutex<TextEmbedding>> {
        self.embedder
            .get_or_try_init(|| async {
                let model_dir = self.config.model_dir.clone();
                tokio::task::spawn_blocking(move || {
                    let options = InitOptions::new(EmbeddingModel::BGESmallENV15)
                        .with_cache_dir(model_dir)
                        .with_show_download_progress(false);
                    TextEmbedding::try_new(options).map(tokio::sync::Mutex::new)
                })
                .await
                .map_err(|e| MemError::model(format!("embedder init task panicked: {e}")))?
                .map_err(|e| MemError::model(format!("failed to load embedding model: {e}")))
            })
            .await
    }

    async fn generator(&self) -> Result<&tokio::sync::Mutex<LocalGenerator>> {
        self.generator
            .get_or_try_init(|| async {
                let config = self.config.clone();
                tokio::task::spawn_blocking(move || LocalGenerator::load(&config))
                    .await
                    .map_err(|e| MemError::model(format!("generator init task panicked: {e}")))?
                    .map(tokio::sync::Mutex::new)
            })
            .await
    }
}

#[async_trait]
impl ModelAdapter for LocalAdapter {
    async fn generate_with_tools(&self, req: GenerateRequest) -> Result<GenerateResponse> {
        let generator = self.generator().await?;
        let generator = generator.lock().await;
        generator.generate(&req)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = self.embedder().await?;
        let mut embedder = embedder.lock().await;
        let embeddings = embedder
            .embed(vec![text.to_string()], None)
            .map_err(|e| MemError::model(format!("embedding failed: {e}")))?;
        embeddings.into_iter().next().ok_or_else(empty_response_error)
    }

    async fn dispose(&self) {
        // OnceCell has no explicit drop hook; dropping the adapter itself
        // releases the loaded weights. This exists so callers have a
        // uniform shutdown point regardless of backend.
    }
}

/// Minimal quantized causal-LM wrapper. Downloads weights/tokenizer from
/// the Hugging Face Hub into `CLAUDE_MEM_MODEL_DIR` on first use via
/// `hf-hub`, then runs greedy/low-temperature decoding capped at 512
/// new tokens — generous enough for an observation or summary, never
/// runaway.
struct LocalGenerator {
    tokenizer: Tokenizer,
    weights: ModelWeights,
    device: Device,
}

const MAX_NEW_TOKENS: usize = 512;
const TEMPERATURE: f64 = 0.1;

impl LocalGenerator {
    fn load(config: &Config) -> Result<Self> {
        let device = Device::Cpu;
        let repo = hf_hub::api::sync::ApiBuilder::new()
            .with_cache_dir(config.model_dir.clone())
            .build()
            .map_err(|e| MemError::model(format!("failed to init hf-hub client: {e}")))?
            .model(config.gen_model.clone());

        let tokenizer_path = repo
            .get("tokenizer.json")
            .map_err(|e| MemError::model(format!("failed to fetch tokenizer: {e}")))?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| MemError::model(format!("failed to load tokenizer: {e}")))?;

        let weights_path = repo
            .get("model.gguf")
            .map_err(|e| MemError::model(format!("failed to fetch model weights: {e}")))?;
        let mut file = std::fs::File::open(&weights_path)
            .map_err(|e| MemError::model(format!("failed to open model weights: {e}")))?;
        let gguf = candle_core::quantized::gguf_file::Content::read(&mut file)
            .map_err(|e| MemError::model(format!("failed to read gguf header: {e}")))?;
        let weights = ModelWeights::from_gguf(gguf, &mut file, &device)
            .map_err(|e| MemError::model(format!("failed to load model weights: {e}")))?;

        Ok(Self {
            tokenizer,
            weights,
            device,
        })
    }

    fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
        let prompt = format!(
            "{}\n\n{}",
            req.system,
            req.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n")
        );

        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| MemError::model(format!("tokenization failed: {e}")))?;
        let mut tokens = encoding.get_ids().to_vec();

        let mut weights = self.weights.clone();
        let mut logits_processor = candle_transformers::generation::LogitsProcessor::new(
            299792458,
            Some(TEMPERATURE),
            None,
        );

        let mut generated = Vec::new();
        for index in 0..MAX_NEW_TOKENS {
            let context_size = if index == 0 { tokens.len() } else { 1 };
            let start = tokens.len().saturating_sub(context_size);
            let input = Tensor::new(&tokens[start..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(|e| MemError::model(format!("tensor build failed: {e}")))?;
            let logits = weights
                .forward(&input, start)
                .map_err(|e| MemError::model(format!("forward pass failed: {e}")))?;
            let logits = logits
                .squeeze(0)
                .and_then(|l| l.squeeze(0))
                .and_then(|l| l.to_dtype(DType::F32))
                .map_err(|e| MemError::model(format!("logits reshape failed: {e}")))?;
            let next_token = logits_processor
                .sample(&logits)
                .map_err(|e| MemError::model(format!("sampling failed: {e}")))?;
            if Some(next_token) == self.tokenizer.token_to_id("</s>") {
                break;
            }
            tokens.push(next_token);
            generated.push(next_token);
        }

        let text = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| MemError::model(format!("decode failed: {e}")))?;

        if text.trim().is_empty() {
            return Err(empty_response_error());
        }

        Ok(GenerateResponse {
            text,
            tool_call: None,
        })
    }
}
