//! Request dispatch and the streaming control loop.
//!
//! A request runs while holding the session slot: the dispatcher picks the
//! batch or custom path from the loaded model, the backend produces a
//! sequence of growing replies, and every reply passes through stop-string
//! trimming and the rate-limited emitter before the caller sees it.

use std::sync::Arc;
use std::time::Instant;

use textgen_backend::{BackendKind, BatchBackend, CustomBackend, LoadedModel, ModelBackend, TextStream, Tokenizer};
use textgen_common::{GenerationConfig, GenerationState, GenError, Result};

use crate::decode;
use crate::emitter::{Cadence, RateLimitedEmitter};
use crate::extensions::{Extensions, NoExtensions};
use crate::format;
use crate::session::{Guarded, SessionManager};
use crate::stopping::apply_stopping_strings;
use crate::streaming::TokenStream;

#[derive(Debug, Clone, Default)]
pub struct ReplyRequest {
    pub question: String,
    pub state: GenerationState,
    pub stopping_strings: Vec<String>,
    /// Chat requests skip the state/input/output hooks and the placeholder reply.
    pub is_chat: bool,
    pub escape_html: bool,
}

impl ReplyRequest {
    pub fn new(question: impl Into<String>, state: GenerationState) -> Self {
        Self { question: question.into(), state, ..Self::default() }
    }

    pub fn with_stopping_strings<S: Into<String>>(mut self, stops: impl IntoIterator<Item = S>) -> Self {
        self.stopping_strings = stops.into_iter().map(Into::into).collect();
        self
    }

    pub fn chat(mut self) -> Self {
        self.is_chat = true;
        self
    }

    pub fn escaped(mut self) -> Self {
        self.escape_html = true;
        self
    }
}

/// A reply so far and how many tokens the model produced for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyChunk {
    pub text: String,
    pub new_tokens: usize,
}

pub struct TextGenerator {
    session: Arc<SessionManager>,
    model: Option<Arc<LoadedModel>>,
    extensions: Arc<dyn Extensions>,
}

enum Route {
    Batch(Arc<dyn BatchBackend>, Arc<LoadedModel>),
    Custom(Arc<dyn CustomBackend>, Option<Arc<dyn Tokenizer>>),
}

impl TextGenerator {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session, model: None, extensions: Arc::new(NoExtensions) }
    }

    pub fn with_model(mut self, model: impl Into<Arc<LoadedModel>>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_extensions(mut self, extensions: Arc<dyn Extensions>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> { &self.session }

    pub fn model(&self) -> Option<&LoadedModel> { self.model.as_deref() }

    /// Asks the running generation to stop at its next step.
    pub fn stop_everything(&self) { self.session.stop_everything() }

    fn tokenizer(&self) -> Result<&dyn Tokenizer> {
        self.model.as_deref().map(|m| m.tokenizer.as_ref()).ok_or(GenError::NoTokenizer)
    }

    pub fn encode(
        &self,
        prompt: &str,
        add_special_tokens: bool,
        add_bos_token: bool,
        truncation_length: Option<usize>,
    ) -> Result<Vec<u32>> {
        decode::encode(self.tokenizer()?, prompt, add_special_tokens, add_bos_token, truncation_length)
    }

    pub fn decode(&self, output_ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        decode::decode(self.tokenizer()?, output_ids, skip_special_tokens)
    }

    pub fn get_encoded_length(&self, prompt: &str) -> Result<usize> {
        if let Some(len) = self.extensions.tokenized_length(prompt) {
            return Ok(len);
        }
        Ok(self.encode(prompt, true, true, None)?.len())
    }

    pub fn get_token_ids(&self, prompt: &str) -> Result<String> { decode::get_token_ids(self.tokenizer()?, prompt) }

    /// Generates a reply, yielding the text so far.
    ///
    /// Blocks until no other generation holds the session slot. Errors are
    /// returned only for caller mistakes (bad seed or options); backend
    /// failures end the sequence early and are logged.
    pub fn generate_reply(&self, request: ReplyRequest) -> Result<Replies> {
        Ok(Replies { inner: self.session.with_generation_slot(|| self.start(request, false))? })
    }

    /// Like [`TextGenerator::generate_reply`], paired with the count of new tokens.
    pub fn generate_reply_token(&self, request: ReplyRequest) -> Result<TokenReplies> {
        Ok(TokenReplies { inner: self.session.with_generation_slot(|| self.start(request, true))? })
    }

    /// Display sequence for a text-completion UI: the prompt first, then the
    /// prompt followed by each partial reply, HTML entities resolved.
    pub fn generate_reply_wrapper(
        &self,
        question: &str,
        state: GenerationState,
        stopping_strings: Vec<String>,
    ) -> Result<impl Iterator<Item = String> + Send> {
        let model_name = self.model.as_ref().map(|m| m.name.clone()).unwrap_or_default();
        let prefix = match self.model.as_deref() {
            Some(m) if m.is_seq2seq => String::new(),
            _ => format::escape_html(question),
        };
        let request = ReplyRequest {
            question: question.to_string(),
            state,
            stopping_strings,
            is_chat: false,
            escape_html: true,
        };
        let replies = self.generate_reply(request)?;
        let first = format::formatted_output(&prefix, &model_name);
        Ok(std::iter::once(first).chain(replies.map(move |reply| format::formatted_output(&(prefix.clone() + &reply), &model_name))))
    }

    fn route(&self) -> Option<Route> {
        if let Some(backend) = self.extensions.custom_generate_reply() {
            return Some(Route::Custom(backend, self.model.as_ref().map(|m| m.tokenizer.clone())));
        }
        let model = self.model.as_ref()?;
        Some(match &model.backend {
            ModelBackend::Batch(backend) => Route::Batch(backend.clone(), model.clone()),
            ModelBackend::Custom(backend) => Route::Custom(backend.clone(), Some(model.tokenizer.clone())),
        })
    }

    /// `count_each` asks for a token count on every partial reply; without it
    /// text-streaming backends are only counted once the run ends.
    fn start(&self, request: ReplyRequest, count_each: bool) -> Result<ReplyStream> {
        let ReplyRequest { question, state, stopping_strings, is_chat, escape_html } = request;

        let Some(route) = self.route() else {
            tracing::error!(target: "generate", "No model is loaded! Load one before generating.");
            return Ok(ReplyStream::empty(self.session.clone()));
        };

        let (state, question) = if is_chat {
            (state, question)
        } else {
            let state = self.extensions.state(state);
            let question = self.extensions.input(question, &state);
            (state, question)
        };

        let mut stop_strings = stopping_strings;
        stop_strings.extend(state.custom_stopping_strings()?);
        stop_strings.retain(|s| !s.is_empty());

        tracing::debug!(target: "generate", "prompt:\n{}", question);

        self.session.clear_stop();
        let seed = self.session.set_manual_seed(state.seed()?)?;

        // With stop strings the backend always streams so it can be cut short;
        // the caller still only sees the final reply unless it asked to stream.
        let is_stream = state.stream();
        let mut backend_state = state.clone();
        if !stop_strings.is_empty() && !is_stream {
            backend_state.set_stream(true);
        }
        backend_state.set_seed(seed);

        let source = match route {
            Route::Batch(backend, model) => self.batch_source(backend, &model, question, &backend_state, is_chat, seed)?,
            Route::Custom(backend, tokenizer) => {
                custom_source(backend, tokenizer, question, backend_state, is_chat, seed, count_each)?
            }
        };

        Ok(ReplyStream {
            source: Some(source),
            stop_strings,
            escape_html,
            is_stream,
            emitter: RateLimitedEmitter::new(Cadence::from_cap(state.max_tokens_second())),
            session: self.session.clone(),
            output_hook: (!is_chat).then(|| (self.extensions.clone(), state)),
            last: ReplyChunk::default(),
            halted: false,
            done: false,
        })
    }

    fn batch_source(
        &self,
        backend: Arc<dyn BatchBackend>,
        model: &LoadedModel,
        question: String,
        state: &GenerationState,
        is_chat: bool,
        seed: u64,
    ) -> Result<BackendReplies> {
        let tokenizer = model.tokenizer.clone();
        let truncation = decode::get_max_prompt_length(state);
        let input_ids = decode::encode(tokenizer.as_ref(), &question, true, state.add_bos_token(), truncation)?;
        let (_prompt, input_ids) = self.extensions.tokenizer(state, question, input_ids);

        let config = GenerationConfig::from_state(state).with_seed(seed);
        let input_len = input_ids.len();
        let is_seq2seq = model.is_seq2seq;
        let skip_special = state.skip_special_tokens();
        let diagnostics = Diagnostics::new(BackendKind::Batch, input_len, seed);

        let source = if state.stream() {
            let eos = tokenizer.eos_token_ids();
            Source::Start(Some(Box::new(move || -> Result<Source> {
                let stream = TokenStream::spawn(backend, input_ids, config)?;
                Ok(Source::Tokens { stream, tokenizer, input_len, is_seq2seq, skip_special, eos })
            })))
        } else {
            Source::Blocking(Some(Box::new(move || -> Result<ReplyChunk> {
                let output = backend.generate(&input_ids, &config)?;
                let (text, new_tokens) =
                    decode::reply_from_output_ids(tokenizer.as_ref(), &output, input_len, is_seq2seq, skip_special)?;
                Ok(ReplyChunk { text, new_tokens })
            })))
        };

        Ok(BackendReplies { placeholder: !is_chat && !is_seq2seq, source, finished: false, diagnostics })
    }
}

fn custom_source(
    backend: Arc<dyn CustomBackend>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    question: String,
    state: GenerationState,
    is_chat: bool,
    seed: u64,
    count_each: bool,
) -> Result<BackendReplies> {
    let context_tokens = count_tokens(tokenizer.as_deref(), &question)?;
    let diagnostics = Diagnostics::new(BackendKind::Custom, context_tokens, seed);

    let source = if state.stream() {
        Source::Start(Some(Box::new(move || -> Result<Source> {
            let stream = backend.generate_stream(&question, &state)?;
            Ok(Source::Text { stream, tokenizer, count_each, last: String::new() })
        })))
    } else {
        Source::Blocking(Some(Box::new(move || -> Result<ReplyChunk> {
            let text = backend.generate(&question, &state)?;
            let new_tokens = count_tokens(tokenizer.as_deref(), &text)?;
            Ok(ReplyChunk { text, new_tokens })
        })))
    };

    Ok(BackendReplies { placeholder: !is_chat, source, finished: false, diagnostics })
}

fn count_tokens(tokenizer: Option<&dyn Tokenizer>, text: &str) -> Result<usize> {
    tokenizer.map_or(Ok(0), |t| t.encode(text, false).map(|ids| ids.len()))
}

type Deferred<T> = Option<Box<dyn FnOnce() -> Result<T> + Send>>;

enum Source {
    /// Not started yet; produces the real source on first pull.
    Start(Deferred<Source>),
    /// A single blocking call yielding the complete reply.
    Blocking(Deferred<ReplyChunk>),
    Tokens {
        stream: TokenStream,
        tokenizer: Arc<dyn Tokenizer>,
        input_len: usize,
        is_seq2seq: bool,
        skip_special: bool,
        eos: Vec<u32>,
    },
    Text {
        stream: TextStream,
        tokenizer: Option<Arc<dyn Tokenizer>>,
        count_each: bool,
        last: String,
    },
}

/// Raw replies from the chosen backend, before stop strings and cadence.
struct BackendReplies {
    placeholder: bool,
    source: Source,
    finished: bool,
    diagnostics: Diagnostics,
}

impl BackendReplies {
    fn pull(&mut self) -> Result<Option<ReplyChunk>> {
        loop {
            match &mut self.source {
                Source::Start(start) => {
                    let Some(start) = start.take() else { return Ok(None) };
                    self.source = start()?;
                }
                Source::Blocking(run) => {
                    return match run.take() {
                        Some(run) => run().map(Some),
                        None => Ok(None),
                    };
                }
                Source::Tokens { stream, tokenizer, input_len, is_seq2seq, skip_special, eos } => {
                    let Some(ids) = stream.next().transpose()? else { return Ok(None) };
                    if ids.last().is_some_and(|t| eos.contains(t)) {
                        return Ok(None);
                    }
                    let (text, new_tokens) =
                        decode::reply_from_output_ids(&**tokenizer, &ids, *input_len, *is_seq2seq, *skip_special)?;
                    return Ok(Some(ReplyChunk { text, new_tokens }));
                }
                Source::Text { stream, tokenizer, count_each, last } => {
                    let Some(text) = stream.next().transpose()? else { return Ok(None) };
                    if !*count_each {
                        last.clone_from(&text);
                        return Ok(Some(ReplyChunk { text, new_tokens: 0 }));
                    }
                    let new_tokens = count_tokens(tokenizer.as_deref(), &text)?;
                    return Ok(Some(ReplyChunk { text, new_tokens }));
                }
            }
        }
    }
}

impl Drop for BackendReplies {
    fn drop(&mut self) {
        // Uncounted text streams are tokenized once, for the report.
        if let Source::Text { tokenizer: Some(tokenizer), last, count_each: false, .. } = &self.source {
            match tokenizer.encode(last, false) {
                Ok(ids) => self.diagnostics.new_tokens = ids.len(),
                Err(e) => tracing::debug!(target: "generate", "could not count reply tokens: {}", e),
            }
        }
    }
}

impl Iterator for BackendReplies {
    type Item = ReplyChunk;

    fn next(&mut self) -> Option<ReplyChunk> {
        if self.finished {
            return None;
        }
        if std::mem::take(&mut self.placeholder) {
            return Some(ReplyChunk::default());
        }
        match self.pull() {
            Ok(Some(chunk)) => {
                self.diagnostics.new_tokens = chunk.new_tokens;
                Some(chunk)
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                tracing::error!(target: "generate", error = ?e, "generation failed: {}", e);
                self.diagnostics.failed = true;
                self.finished = true;
                None
            }
        }
    }
}

/// Throughput report emitted when a backend run ends, however it ends.
struct Diagnostics {
    kind: BackendKind,
    started: Instant,
    context_tokens: usize,
    new_tokens: usize,
    seed: u64,
    failed: bool,
}

impl Diagnostics {
    fn new(kind: BackendKind, context_tokens: usize, seed: u64) -> Self {
        Self { kind, started: Instant::now(), context_tokens, new_tokens: 0, seed, failed: false }
    }
}

impl Drop for Diagnostics {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { self.new_tokens as f64 / elapsed } else { 0.0 };
        tracing::info!(
            target: "generate",
            backend = %self.kind,
            failed = self.failed,
            "Output generated in {:.2} seconds ({:.2} tokens/s, {} tokens, context {}, seed {})",
            elapsed,
            rate,
            self.new_tokens,
            self.context_tokens,
            self.seed
        );
        textgen_obs::record_generation(elapsed, self.new_tokens, self.failed);
    }
}

/// The control loop between a backend and the caller.
pub struct ReplyStream {
    source: Option<BackendReplies>,
    stop_strings: Vec<String>,
    escape_html: bool,
    is_stream: bool,
    emitter: RateLimitedEmitter,
    session: Arc<SessionManager>,
    output_hook: Option<(Arc<dyn Extensions>, GenerationState)>,
    last: ReplyChunk,
    halted: bool,
    done: bool,
}

impl ReplyStream {
    /// Yields a single empty reply; used when nothing can generate.
    fn empty(session: Arc<SessionManager>) -> Self {
        Self {
            source: None,
            stop_strings: Vec::new(),
            escape_html: false,
            is_stream: false,
            emitter: RateLimitedEmitter::new(Cadence::from_cap(0.0)),
            session,
            output_hook: None,
            last: ReplyChunk::default(),
            halted: true,
            done: false,
        }
    }

    fn finish(&mut self) -> Option<ReplyChunk> {
        self.done = true;
        // Dropping the source stops a streaming worker before the slot is freed.
        self.source = None;
        let mut last = std::mem::take(&mut self.last);
        if let Some((extensions, state)) = &self.output_hook {
            last.text = extensions.output(last.text, state);
        }
        Some(last)
    }
}

impl Iterator for ReplyStream {
    type Item = ReplyChunk;

    fn next(&mut self) -> Option<ReplyChunk> {
        if self.done {
            return None;
        }
        while !self.halted {
            let Some(source) = self.source.as_mut() else { break };
            if self.session.is_stopped() {
                tracing::info!(target: "generate", "generation stopped on request");
                textgen_obs::record_cancellation();
                break;
            }
            let Some(raw) = source.next() else { break };
            let text = if self.escape_html { format::escape_html(&raw.text) } else { raw.text };
            let (trimmed, stop_found) = apply_stopping_strings(&text, self.stop_strings.as_slice());
            self.last = ReplyChunk { text: trimmed.to_string(), new_tokens: raw.new_tokens };
            if stop_found {
                textgen_obs::record_stop_string_hit();
                self.halted = true;
                // Stop the backend now rather than on the next pull.
                self.source = None;
            }
            if self.is_stream && self.emitter.ready() {
                return Some(self.last.clone());
            }
        }
        self.finish()
    }
}

/// Partial replies of a generation; the session slot is held until the
/// sequence ends or is dropped.
pub struct Replies {
    inner: Guarded<ReplyStream>,
}

impl Iterator for Replies {
    type Item = String;

    fn next(&mut self) -> Option<String> { self.inner.next().map(|chunk| chunk.text) }
}

/// Partial replies paired with the number of new tokens behind each.
pub struct TokenReplies {
    inner: Guarded<ReplyStream>,
}

impl Iterator for TokenReplies {
    type Item = (String, usize);

    fn next(&mut self) -> Option<(String, usize)> {
        self.inner.next().map(|chunk| (chunk.text, chunk.new_tokens))
    }
}
