use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use textgen_backend::mock::{MockBatchBackend, MOCK_EOS};
use textgen_backend::BatchBackend;
use textgen_common::{GenError, GenerationConfig, Result};
use textgen_core::streaming::TokenStream;

/// Produces up to `limit` tokens, counting how many it actually generated.
struct Counting {
    produced: Arc<AtomicUsize>,
    limit: usize,
}

impl BatchBackend for Counting {
    fn generate(&self, input_ids: &[u32], config: &GenerationConfig) -> Result<Vec<u32>> {
        self.generate_with_callback(input_ids, config, &mut |_| ControlFlow::Continue(()))
    }

    fn generate_with_callback(
        &self,
        input_ids: &[u32],
        _config: &GenerationConfig,
        on_token: &mut dyn FnMut(&[u32]) -> ControlFlow<()>,
    ) -> Result<Vec<u32>> {
        let mut seq = input_ids.to_vec();
        for i in 0..self.limit {
            std::thread::sleep(Duration::from_millis(1));
            seq.push(i as u32);
            self.produced.fetch_add(1, Ordering::SeqCst);
            if on_token(&seq).is_break() {
                break;
            }
        }
        Ok(seq)
    }
}

#[test]
fn yields_every_intermediate_sequence() {
    let backend = Arc::new(MockBatchBackend::fixed("abc"));
    let stream = TokenStream::spawn(backend, vec![1, 2], GenerationConfig::default()).expect("spawn");
    let seqs: Vec<Vec<u32>> = stream.map(|r| r.expect("sequence")).collect();
    assert_eq!(
        seqs,
        vec![
            vec![1, 2, 97],
            vec![1, 2, 97, 98],
            vec![1, 2, 97, 98, 99],
            vec![1, 2, 97, 98, 99, MOCK_EOS],
        ]
    );
}

#[test]
fn dropping_early_stops_the_worker() {
    let produced = Arc::new(AtomicUsize::new(0));
    let backend = Arc::new(Counting { produced: produced.clone(), limit: 100_000 });
    let mut stream = TokenStream::spawn(backend, vec![], GenerationConfig::default()).expect("spawn");
    for _ in 0..3 {
        stream.next().expect("item").expect("sequence");
    }
    drop(stream);

    // Drop joined the worker, so the count is final.
    let after_drop = produced.load(Ordering::SeqCst);
    assert!(after_drop < 100_000);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(produced.load(Ordering::SeqCst), after_drop);
}

#[test]
fn backend_error_is_the_last_item() {
    let backend = Arc::new(MockBatchBackend::fixed("hello").failing_after(2));
    let items: Vec<_> = TokenStream::spawn(backend, vec![], GenerationConfig::default()).expect("spawn").collect();
    assert_eq!(items.len(), 3);
    assert!(items[..2].iter().all(|r| r.is_ok()));
    assert!(matches!(items[2], Err(GenError::Backend(_))));
}

#[test]
fn cancel_ends_generation_at_next_token() {
    let produced = Arc::new(AtomicUsize::new(0));
    let backend = Arc::new(Counting { produced: produced.clone(), limit: 100_000 });
    let mut stream = TokenStream::spawn(backend, vec![], GenerationConfig::default()).expect("spawn");
    stream.next().expect("item").expect("sequence");
    stream.cancel();
    // Queued sequences drain, then the worker reports completion.
    let rest = stream.by_ref().count();
    assert!(rest <= 100_000);
    assert!(produced.load(Ordering::SeqCst) < 100_000);
    assert!(stream.next().is_none());
}
