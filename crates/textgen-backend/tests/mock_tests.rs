use std::ops::ControlFlow;

use textgen_backend::mock::{MockBatchBackend, MockCustomBackend, MockReply, MockTokenizer, MOCK_BOS, MOCK_EOS};
use textgen_backend::{BatchBackend, CustomBackend, Tokenizer, SPACE_MARKER};
use textgen_common::{GenerationConfig, GenerationState};

#[test]
fn tokenizer_round_trips_and_skips_specials() {
    let tok = MockTokenizer::new().with_bos();
    let ids = tok.encode("hi", true).unwrap();
    assert_eq!(ids, vec![MOCK_BOS, b'h' as u32, b'i' as u32]);
    assert_eq!(tok.decode(&ids, true).unwrap(), "hi");
    assert_eq!(tok.decode(&[b'a' as u32, MOCK_EOS], false).unwrap(), "a</s>");
}

#[test]
fn space_marker_tokenizer_drops_leading_space() {
    let tok = MockTokenizer::new().with_space_marker();
    let ids = tok.encode(" yes", false).unwrap();
    assert_eq!(tok.decode(&ids, true).unwrap(), "yes");
    assert_eq!(tok.id_to_token(ids[0]), Some(SPACE_MARKER.to_string()));
    assert!(tok.strips_leading_space());
}

#[test]
fn batch_backend_reports_every_token_and_honours_break() {
    let backend = MockBatchBackend::fixed("abcd");
    let mut seen = Vec::new();
    let out = backend
        .generate_with_callback(&[1, 2], &GenerationConfig::default(), &mut |seq| {
            seen.push(seq.len());
            if seq.len() == 4 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
        })
        .unwrap();
    assert_eq!(seen, vec![3, 4]);
    assert_eq!(out, vec![1, 2, b'a' as u32, b'b' as u32]);
}

#[test]
fn batch_backend_appends_eos_and_respects_max_new_tokens() {
    let backend = MockBatchBackend::fixed("abcdef");
    let config = GenerationConfig { max_new_tokens: 3, ..GenerationConfig::default() };
    let out = backend.generate(&[], &config).unwrap();
    assert_eq!(out, vec![b'a' as u32, b'b' as u32, b'c' as u32, MOCK_EOS]);
}

#[test]
fn seeded_reply_is_deterministic_per_seed() {
    let backend = MockBatchBackend::new(MockReply::Seeded { len: 24 });
    let a = backend.generate(&[], &GenerationConfig::default().with_seed(42)).unwrap();
    let b = backend.generate(&[], &GenerationConfig::default().with_seed(42)).unwrap();
    let c = backend.generate(&[], &GenerationConfig::default().with_seed(7)).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn failing_batch_backend_returns_error() {
    let backend = MockBatchBackend::fixed("abcdef").failing_after(2);
    assert!(backend.generate(&[], &GenerationConfig::default()).is_err());
}

#[test]
fn custom_stream_yields_cumulative_text() {
    let backend = MockCustomBackend::fixed("hey");
    let items: Vec<String> = backend
        .generate_stream("prompt", &GenerationState::new())
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(items, vec!["h", "he", "hey"]);
    assert_eq!(backend.generate("prompt", &GenerationState::new()).unwrap(), "hey");
}

#[test]
fn custom_stream_surfaces_failure() {
    let backend = MockCustomBackend::fixed("hello").failing_after(2);
    let items: Vec<_> = backend.generate_stream("p", &GenerationState::new()).unwrap().take(3).collect();
    assert!(items[0].is_ok());
    assert!(items[1].is_ok());
    assert!(items[2].is_err());
}
