//! Collaborator interfaces the generation loop drives: tokenizers and the two
//! backend families a loaded model can belong to.

use std::ops::ControlFlow;
use std::sync::Arc;

use textgen_common::{GenerationConfig, GenerationState, Result};

pub use textgen_common::BackendKind;

/// Marker SentencePiece tokenizers put in front of word-initial pieces.
pub const SPACE_MARKER: char = '\u{2581}';

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>>;
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String>;
    fn eos_token_ids(&self) -> Vec<u32>;
    fn bos_token_id(&self) -> Option<u32> { None }
    /// Raw vocabulary piece for `id`, before any detokenization cleanup.
    fn id_to_token(&self, _id: u32) -> Option<String> { None }
    /// Whether `decode` drops the leading space of a span that starts with a
    /// [`SPACE_MARKER`] piece.
    fn strips_leading_space(&self) -> bool { false }
}

/// A framework that runs the whole decode loop itself.
pub trait BatchBackend: Send + Sync {
    /// Blocks until generation finishes; returns the output ids (prompt
    /// included for causal models).
    fn generate(&self, input_ids: &[u32], config: &GenerationConfig) -> Result<Vec<u32>>;

    /// Like [`BatchBackend::generate`], calling `on_token` with the sequence
    /// so far after every new token. Generation ends early once `on_token`
    /// returns [`ControlFlow::Break`].
    fn generate_with_callback(
        &self,
        input_ids: &[u32],
        config: &GenerationConfig,
        on_token: &mut dyn FnMut(&[u32]) -> ControlFlow<()>,
    ) -> Result<Vec<u32>>;
}

/// Incremental reply text; every item is the whole reply so far.
pub type TextStream = Box<dyn Iterator<Item = Result<String>> + Send>;

/// A backend that samples on its own and hands back text.
pub trait CustomBackend: Send + Sync {
    fn generate(&self, prompt: &str, state: &GenerationState) -> Result<String>;
    fn generate_stream(&self, prompt: &str, state: &GenerationState) -> Result<TextStream>;
}

#[derive(Clone)]
pub enum ModelBackend {
    Batch(Arc<dyn BatchBackend>),
    Custom(Arc<dyn CustomBackend>),
}

impl ModelBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            ModelBackend::Batch(_) => BackendKind::Batch,
            ModelBackend::Custom(_) => BackendKind::Custom,
        }
    }
}

impl std::fmt::Debug for ModelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ModelBackend").field(&self.kind()).finish()
    }
}

/// A model ready for generation, as handed over by the loader.
#[derive(Clone)]
pub struct LoadedModel {
    pub name: String,
    pub backend: ModelBackend,
    pub tokenizer: Arc<dyn Tokenizer>,
    /// Encoder-decoder models return only new tokens from `generate`.
    pub is_seq2seq: bool,
}

impl LoadedModel {
    pub fn batch(name: impl Into<String>, backend: Arc<dyn BatchBackend>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { name: name.into(), backend: ModelBackend::Batch(backend), tokenizer, is_seq2seq: false }
    }

    pub fn custom(name: impl Into<String>, backend: Arc<dyn CustomBackend>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { name: name.into(), backend: ModelBackend::Custom(backend), tokenizer, is_seq2seq: false }
    }

    pub fn seq2seq(mut self, is_seq2seq: bool) -> Self {
        self.is_seq2seq = is_seq2seq;
        self
    }

    pub fn kind(&self) -> BackendKind { self.backend.kind() }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("name", &self.name)
            .field("backend", &self.backend.kind())
            .field("is_seq2seq", &self.is_seq2seq)
            .finish()
    }
}

#[cfg(feature = "mock")]
pub mod mock;
