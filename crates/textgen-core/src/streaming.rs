//! Turns a callback-driven batch generation call into an iterator.
//!
//! The backend runs on a worker thread and hands every intermediate sequence
//! over a bounded channel. Dropping the [`TokenStream`] cancels the worker at
//! its next token and waits for it to exit.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use textgen_backend::BatchBackend;
use textgen_common::{GenError, GenerationConfig, Result};

pub const HANDOFF_CAPACITY: usize = 16;

enum Handoff {
    Sequence(Vec<u32>),
    Done(Result<Vec<u32>>),
}

pub struct TokenStream {
    rx: Option<Receiver<Handoff>>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    finished: bool,
}

impl TokenStream {
    pub fn spawn(backend: Arc<dyn BatchBackend>, input_ids: Vec<u32>, config: GenerationConfig) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(HANDOFF_CAPACITY);
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let worker = thread::Builder::new()
            .name("textgen-stream".into())
            .spawn(move || run_worker(backend.as_ref(), &input_ids, &config, &tx, &flag))
            .map_err(|e| GenError::Backend(format!("failed to start generation worker: {e}")))?;
        Ok(Self { rx: Some(rx), cancel, worker: Some(worker), finished: false })
    }

    /// Signals the worker to stop producing; already queued items stay readable.
    pub fn cancel(&self) { self.cancel.store(true, Ordering::SeqCst); }
}

fn run_worker(
    backend: &dyn BatchBackend,
    input_ids: &[u32],
    config: &GenerationConfig,
    tx: &SyncSender<Handoff>,
    cancel: &AtomicBool,
) {
    let mut on_token = |seq: &[u32]| {
        if cancel.load(Ordering::SeqCst) || tx.send(Handoff::Sequence(seq.to_vec())).is_err() {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    };
    let result = backend.generate_with_callback(input_ids, config, &mut on_token);
    let _ = tx.send(Handoff::Done(result));
}

impl Iterator for TokenStream {
    type Item = Result<Vec<u32>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let rx = self.rx.as_ref()?;
        match rx.recv() {
            Ok(Handoff::Sequence(seq)) => Some(Ok(seq)),
            Ok(Handoff::Done(Ok(_))) => {
                self.finished = true;
                None
            }
            Ok(Handoff::Done(Err(e))) => {
                self.finished = true;
                Some(Err(e))
            }
            Err(_) => {
                self.finished = true;
                Some(Err(GenError::Backend("generation worker exited without a result".into())))
            }
        }
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        self.cancel();
        // Closing the receiver unblocks a worker waiting on a full channel.
        self.rx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!(target: "generate", "generation worker panicked");
            }
        }
    }
}
