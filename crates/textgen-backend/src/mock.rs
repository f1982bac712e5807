//! In-process stand-ins for a real model: byte-level tokenizer plus scripted
//! batch and custom backends.

use std::ops::ControlFlow;
use std::thread;
use std::time::Duration;

use rand::prelude::*;
use textgen_common::{GenError, GenerationConfig, GenerationState, Result};

use crate::{BatchBackend, CustomBackend, TextStream, Tokenizer, SPACE_MARKER};

pub const MOCK_EOS: u32 = 256;
pub const MOCK_BOS: u32 = 257;

const SEEDED_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz     ";

/// One token per byte; ids above 255 are special.
#[derive(Debug, Clone, Default)]
pub struct MockTokenizer {
    add_bos: bool,
    space_marker: bool,
}

impl MockTokenizer {
    pub fn new() -> Self { Self::default() }

    /// Prepend [`MOCK_BOS`] when special tokens are requested.
    pub fn with_bos(mut self) -> Self {
        self.add_bos = true;
        self
    }

    /// Behave like a SentencePiece tokenizer: spaces are `▁` pieces and a
    /// decoded span loses its leading space.
    pub fn with_space_marker(mut self) -> Self {
        self.space_marker = true;
        self
    }
}

impl Tokenizer for MockTokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        let mut ids = Vec::with_capacity(text.len() + 1);
        if add_special_tokens && self.add_bos {
            ids.push(MOCK_BOS);
        }
        ids.extend(text.bytes().map(u32::from));
        Ok(ids)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        let mut bytes = Vec::with_capacity(ids.len());
        for &id in ids {
            match id {
                0..=255 => bytes.push(id as u8),
                MOCK_EOS if !skip_special_tokens => bytes.extend_from_slice(b"</s>"),
                MOCK_BOS if !skip_special_tokens => bytes.extend_from_slice(b"<s>"),
                MOCK_EOS | MOCK_BOS => {}
                other => return Err(GenError::Backend(format!("unknown token id {other}"))),
            }
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if self.space_marker {
            if let Some(rest) = text.strip_prefix(' ') {
                return Ok(rest.to_string());
            }
        }
        Ok(text)
    }

    fn eos_token_ids(&self) -> Vec<u32> { vec![MOCK_EOS] }

    fn bos_token_id(&self) -> Option<u32> { Some(MOCK_BOS) }

    fn id_to_token(&self, id: u32) -> Option<String> {
        match id {
            0x20 if self.space_marker => Some(SPACE_MARKER.to_string()),
            0..=255 => Some(String::from_utf8_lossy(&[id as u8]).into_owned()),
            MOCK_EOS => Some("</s>".into()),
            MOCK_BOS => Some("<s>".into()),
            _ => None,
        }
    }

    fn strips_leading_space(&self) -> bool { self.space_marker }
}

#[derive(Debug, Clone)]
pub enum MockReply {
    Fixed(String),
    /// Lowercase text of the given length drawn from an RNG seeded with the
    /// request seed.
    Seeded { len: usize },
}

impl MockReply {
    fn text(&self, seed: Option<u64>, limit: usize) -> String {
        match self {
            MockReply::Fixed(s) => s.chars().take(limit).collect(),
            MockReply::Seeded { len } => {
                let mut rng = StdRng::seed_from_u64(seed.unwrap_or(0));
                (0..(*len).min(limit))
                    .map(|_| SEEDED_ALPHABET[rng.gen_range(0..SEEDED_ALPHABET.len())] as char)
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockBatchBackend {
    reply: MockReply,
    token_delay: Duration,
    fail_after: Option<usize>,
    emit_eos: bool,
    seq2seq: bool,
}

impl MockBatchBackend {
    pub fn new(reply: MockReply) -> Self {
        Self { reply, token_delay: Duration::ZERO, fail_after: None, emit_eos: true, seq2seq: false }
    }

    pub fn fixed(reply: impl Into<String>) -> Self { Self::new(MockReply::Fixed(reply.into())) }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Fail with a backend error once `n` tokens have been produced.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn without_eos(mut self) -> Self {
        self.emit_eos = false;
        self
    }

    /// Return only generated ids, like an encoder-decoder model.
    pub fn seq2seq(mut self) -> Self {
        self.seq2seq = true;
        self
    }
}

impl BatchBackend for MockBatchBackend {
    fn generate(&self, input_ids: &[u32], config: &GenerationConfig) -> Result<Vec<u32>> {
        self.generate_with_callback(input_ids, config, &mut |_| ControlFlow::Continue(()))
    }

    fn generate_with_callback(
        &self,
        input_ids: &[u32],
        config: &GenerationConfig,
        on_token: &mut dyn FnMut(&[u32]) -> ControlFlow<()>,
    ) -> Result<Vec<u32>> {
        let mut seq = if self.seq2seq { Vec::new() } else { input_ids.to_vec() };
        let reply = self.reply.text(config.seed, config.max_new_tokens);
        for (i, byte) in reply.bytes().take(config.max_new_tokens).enumerate() {
            if self.fail_after == Some(i) {
                return Err(GenError::Backend(format!("mock backend failed after {i} tokens")));
            }
            if !self.token_delay.is_zero() {
                thread::sleep(self.token_delay);
            }
            seq.push(u32::from(byte));
            if on_token(&seq).is_break() {
                return Ok(seq);
            }
        }
        if self.emit_eos {
            seq.push(MOCK_EOS);
            let _ = on_token(&seq);
        }
        Ok(seq)
    }
}

#[derive(Debug, Clone)]
pub struct MockCustomBackend {
    reply: MockReply,
    token_delay: Duration,
    fail_after: Option<usize>,
}

impl MockCustomBackend {
    pub fn new(reply: MockReply) -> Self { Self { reply, token_delay: Duration::ZERO, fail_after: None } }

    pub fn fixed(reply: impl Into<String>) -> Self { Self::new(MockReply::Fixed(reply.into())) }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    fn reply_for(&self, state: &GenerationState) -> Result<String> {
        let seed = state.seed()?;
        let seed = u64::try_from(seed).ok();
        Ok(self.reply.text(seed, state.max_new_tokens()))
    }
}

impl CustomBackend for MockCustomBackend {
    fn generate(&self, _prompt: &str, state: &GenerationState) -> Result<String> {
        let reply = self.reply_for(state)?;
        if let Some(n) = self.fail_after {
            return Err(GenError::Backend(format!("mock backend failed after {n} tokens")));
        }
        Ok(reply)
    }

    fn generate_stream(&self, _prompt: &str, state: &GenerationState) -> Result<TextStream> {
        let chars: Vec<char> = self.reply_for(state)?.chars().collect();
        let delay = self.token_delay;
        let fail_after = self.fail_after;
        Ok(Box::new((0..chars.len()).map(move |i| {
            if fail_after == Some(i) {
                return Err(GenError::Backend(format!("mock backend failed after {i} tokens")));
            }
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            Ok(chars[..=i].iter().collect())
        })))
    }
}
