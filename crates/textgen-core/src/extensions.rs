//! Hook points extensions can use to reshape a generation request.
//!
//! Every hook defaults to a pass-through; implementors override what they
//! need. Discovery and loading of extensions is left to the embedding
//! application.

use std::sync::Arc;

use textgen_backend::CustomBackend;
use textgen_common::GenerationState;

pub trait Extensions: Send + Sync {
    /// Adjusts the options of a non-chat request before generation.
    fn state(&self, state: GenerationState) -> GenerationState { state }

    /// Rewrites the prompt of a non-chat request.
    fn input(&self, text: String, _state: &GenerationState) -> String { text }

    /// Sees the prompt together with its token ids before a batch backend runs.
    fn tokenizer(&self, _state: &GenerationState, prompt: String, input_ids: Vec<u32>) -> (String, Vec<u32>) {
        (prompt, input_ids)
    }

    /// Rewrites the final reply of a non-chat request.
    fn output(&self, text: String, _state: &GenerationState) -> String { text }

    /// Overrides the token count reported for a prompt.
    fn tokenized_length(&self, _prompt: &str) -> Option<usize> { None }

    /// Replaces the loaded model's generation routine entirely.
    fn custom_generate_reply(&self) -> Option<Arc<dyn CustomBackend>> { None }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoExtensions;

impl Extensions for NoExtensions {}

/// Applies several extensions in registration order.
#[derive(Default, Clone)]
pub struct ExtensionChain {
    extensions: Vec<Arc<dyn Extensions>>,
}

impl ExtensionChain {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, extension: Arc<dyn Extensions>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn len(&self) -> usize { self.extensions.len() }

    pub fn is_empty(&self) -> bool { self.extensions.is_empty() }
}

impl Extensions for ExtensionChain {
    fn state(&self, state: GenerationState) -> GenerationState {
        self.extensions.iter().fold(state, |s, ext| ext.state(s))
    }

    fn input(&self, text: String, state: &GenerationState) -> String {
        self.extensions.iter().fold(text, |t, ext| ext.input(t, state))
    }

    fn tokenizer(&self, state: &GenerationState, prompt: String, input_ids: Vec<u32>) -> (String, Vec<u32>) {
        self.extensions
            .iter()
            .fold((prompt, input_ids), |(p, ids), ext| ext.tokenizer(state, p, ids))
    }

    fn output(&self, text: String, state: &GenerationState) -> String {
        self.extensions.iter().fold(text, |t, ext| ext.output(t, state))
    }

    fn tokenized_length(&self, prompt: &str) -> Option<usize> {
        self.extensions.iter().find_map(|ext| ext.tokenized_length(prompt))
    }

    fn custom_generate_reply(&self) -> Option<Arc<dyn CustomBackend>> {
        self.extensions.iter().find_map(|ext| ext.custom_generate_reply())
    }
}
