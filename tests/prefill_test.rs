//! Chunked prefill is a memory-shape change, never a semantic one.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use genstream::cache::make_cache;
use genstream::engine::{GenerateParams, TokenStream};
use genstream::model::Model;

use common::MaxTrackModel;

#[test]
fn chunked_forward_matches_single_pass_cache() {
    let model = MaxTrackModel::new(3, 64);
    let prompt: Vec<u32> = (1..=10).collect();

    let mut single = make_cache(&model, None);
    model.forward(&prompt, &mut single).unwrap();

    for chunk in [1, 3, 4, 7, 10] {
        let mut chunked = make_cache(&model, None);
        for piece in prompt.chunks(chunk) {
            model.forward(piece, &mut chunked).unwrap();
        }
        assert_eq!(chunked, single, "chunk size {chunk}");
    }
}

#[test]
fn any_chunk_size_yields_identical_tokens() {
    let prompt: Vec<u32> = (1..=9).collect();
    let mut outputs = Vec::new();
    for chunk in [1, 2, 3, 5, 512] {
        let model = Arc::new(MaxTrackModel::new(2, 64));
        let params = GenerateParams {
            prefill_chunk_size: chunk,
            ..GenerateParams::default()
        };
        let stream = TokenStream::builder(model).params(params).start(&prompt).unwrap();
        let tokens: Vec<_> = stream.take(3).map(|t| t.unwrap().token).collect();
        outputs.push(tokens);
    }
    for tokens in &outputs[1..] {
        assert_eq!(tokens, &outputs[0]);
    }
}

#[test]
fn prefill_synchronizes_once_per_chunk() {
    let model = Arc::new(MaxTrackModel::new(1, 64));
    let prompt: Vec<u32> = (1..=10).collect();
    let params = GenerateParams {
        prefill_chunk_size: 3,
        ..GenerateParams::default()
    };
    let stream = TokenStream::builder(model.clone()).params(params).start(&prompt).unwrap();

    // 10 prompt tokens at chunk 3: chunks at offsets 0, 3, 6 leave a
    // one-token remainder for the first step.
    assert_eq!(model.sync_calls.load(Ordering::SeqCst), 3);
    assert_eq!(model.forward_calls.load(Ordering::SeqCst), 3);
    drop(stream);
}

#[test]
fn short_prompt_skips_chunking() {
    let model = Arc::new(MaxTrackModel::new(1, 64));
    let stream = TokenStream::builder(model.clone()).start(&[1, 2, 3]).unwrap();
    assert_eq!(model.sync_calls.load(Ordering::SeqCst), 0);
    assert_eq!(model.forward_calls.load(Ordering::SeqCst), 0);
    drop(stream);
}
