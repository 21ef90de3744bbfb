//! Sentence embedder using Candle.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use lru::LruCache;
use tokenizers::models::wordpiece::WordPieceBuilder;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::pooling::l2_normalize;
use crate::similarity::cosine;
use crate::{EmbedError, EmbeddingConfig, Result};

/// BERT sentence embedder for short biomedical strings.
///
/// Inference is read-only; the embedding cache is the only mutable state and
/// sits behind a mutex, so one instance can serve concurrent evaluations.
pub struct SentenceEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    config: EmbeddingConfig,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl SentenceEmbedder {
    /// Download (if needed) and load the model without blocking the async runtime.
    pub async fn new(config: EmbeddingConfig) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::load(config))
            .await
            .map_err(|e| EmbedError::ModelLoad(e.to_string()))?
    }

    /// Blocking load: fetch config, tokenizer, and weights from the Hugging Face Hub.
    pub fn load(config: EmbeddingConfig) -> Result<Self> {
        let start = Instant::now();
        info!("Loading sentence embedding model: {}", config.model_id);

        let device = Self::select_device(&config);
        debug!("Using device: {:?}", device);

        let api = Api::new().map_err(|e| EmbedError::Download(format!("API init: {}", e)))?;
        let repo = api.repo(Repo::new(config.model_id.clone(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .map_err(|e| EmbedError::Download(format!("config.json: {}", e)))?;
        let bert_config: Config = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;

        let tokenizer = match repo.get("tokenizer.json") {
            Ok(path) => Tokenizer::from_file(&path)?,
            Err(_) => {
                info!("tokenizer.json not found, building WordPiece from vocab.txt");
                let vocab_path = repo
                    .get("vocab.txt")
                    .map_err(|e| EmbedError::Download(format!("vocab.txt: {}", e)))?;
                Self::wordpiece_from_vocab(&vocab_path)?
            }
        };

        let weights_path = repo
            .get("model.safetensors")
            .or_else(|_| repo.get("pytorch_model.bin"))
            .map_err(|e| EmbedError::Download(format!("model weights: {}", e)))?;

        let vb = if weights_path.extension().is_some_and(|e| e == "safetensors") {
            // SAFETY: the file is owned by the hub cache and not modified while mapped.
            unsafe { VarBuilder::from_mmaped_safetensors(&[&weights_path], DType::F32, &device)? }
        } else {
            VarBuilder::from_pth(&weights_path, DType::F32, &device)?
        };
        let model = BertModel::load(vb, &bert_config)?;
        info!("Model loaded in {:.2}s", start.elapsed().as_secs_f32());

        let cache = NonZeroUsize::new(config.cache_size).map(|n| Mutex::new(LruCache::new(n)));

        Ok(Self {
            model,
            tokenizer,
            device,
            config,
            cache,
        })
    }

    fn select_device(config: &EmbeddingConfig) -> Device {
        if !config.use_gpu {
            return Device::Cpu;
        }

        #[cfg(feature = "cuda")]
        {
            match Device::new_cuda(0) {
                Ok(device) => return device,
                Err(e) => debug!("CUDA not available: {}, falling back to CPU", e),
            }
        }

        #[cfg(feature = "metal")]
        {
            match Device::new_metal(0) {
                Ok(device) => return device,
                Err(e) => debug!("Metal not available: {}, falling back to CPU", e),
            }
        }

        Device::Cpu
    }

    fn wordpiece_from_vocab(path: &Path) -> Result<Tokenizer> {
        let vocab: HashMap<String, u32> = std::fs::read_to_string(path)?
            .lines()
            .enumerate()
            .map(|(i, token)| (token.to_string(), i as u32))
            .collect();
        let wordpiece = WordPieceBuilder::new()
            .vocab(vocab)
            .continuing_subword_prefix("##".to_string())
            .unk_token("[UNK]".to_string())
            .build()
            .map_err(|e| EmbedError::Tokenizer(format!("WordPiece build: {}", e)))?;
        Ok(Tokenizer::new(wordpiece))
    }

    /// Embed texts, serving repeats from the cache. Output order follows input order.
    pub fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing: Vec<usize> = Vec::new();

        match &self.cache {
            Some(cache) => {
                let mut guard = cache.lock().unwrap_or_else(PoisonError::into_inner);
                for (i, text) in texts.iter().enumerate() {
                    match guard.get(*text) {
                        Some(hit) => out[i] = Some(hit.clone()),
                        None => missing.push(i),
                    }
                }
            }
            None => missing.extend(0..texts.len()),
        }

        if !missing.is_empty() {
            let batch: Vec<&str> = missing.iter().map(|&i| texts[i]).collect();
            let fresh = self.forward(&batch)?;
            if let Some(cache) = &self.cache {
                let mut guard = cache.lock().unwrap_or_else(PoisonError::into_inner);
                for (text, vector) in batch.iter().zip(&fresh) {
                    guard.put(text.to_string(), vector.clone());
                }
            }
            for (i, vector) in missing.into_iter().zip(fresh) {
                out[i] = Some(vector);
            }
        }

        out.into_iter()
            .map(|v| v.ok_or_else(|| EmbedError::Inference("missing embedding".to_string())))
            .collect()
    }

    fn forward(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let encodings = self.tokenizer.encode_batch(texts.to_vec(), true)?;

        let limit = self.config.max_length.min(512);
        let width = encodings
            .iter()
            .map(|e| e.get_ids().len().min(limit))
            .max()
            .unwrap_or(0);
        if width == 0 {
            return Err(EmbedError::InvalidInput("nothing to embed".to_string()));
        }

        let mut ids = Vec::with_capacity(texts.len() * width);
        let mut mask = Vec::with_capacity(texts.len() * width);
        let mut types = Vec::with_capacity(texts.len() * width);
        for encoding in &encodings {
            let len = encoding.get_ids().len().min(limit);
            let pad = width - len;
            ids.extend_from_slice(&encoding.get_ids()[..len]);
            ids.extend(std::iter::repeat_n(0u32, pad));
            mask.extend_from_slice(&encoding.get_attention_mask()[..len]);
            mask.extend(std::iter::repeat_n(0u32, pad));
            types.extend_from_slice(&encoding.get_type_ids()[..len]);
            types.extend(std::iter::repeat_n(0u32, pad));
        }

        let shape = (texts.len(), width);
        let input_ids = Tensor::from_vec(ids, shape, &self.device)?;
        let token_type_ids = Tensor::from_vec(types, shape, &self.device)?;
        let attention_mask = Tensor::from_vec(mask, shape, &self.device)?.to_dtype(DType::F32)?;

        let hidden = self.model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = l2_normalize(&self.config.pooling.apply(&hidden, &attention_mask)?)?;

        debug!(
            "Embedded {} texts in {:.2}ms",
            texts.len(),
            start.elapsed().as_secs_f32() * 1000.0
        );
        Ok(pooled.to_vec2::<f32>()?)
    }

    /// Cosine similarity of two strings.
    pub fn similarity(&self, a: &str, b: &str) -> Result<f64> {
        let vectors = self.embed(&[a, b])?;
        Ok(cosine(&vectors[0], &vectors[1]))
    }

    pub fn model_name(&self) -> &str {
        &self.config.model_id
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self.device, Device::Cuda(_) | Device::Metal(_))
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }
}
