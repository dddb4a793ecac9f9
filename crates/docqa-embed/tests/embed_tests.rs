use docqa_embed::{get_default_embedder, DEFAULT_DIM};

#[test]
fn fake_embedder_shapes_and_determinism() {
    // Force the hashing embedder to avoid loading a model
    std::env::set_var("APP_USE_FAKE_EMBEDDINGS", "1");

    let embedder = get_default_embedder().expect("embedder");
    assert_eq!(embedder.dim(), DEFAULT_DIM);
    assert_eq!(embedder.id(), "hashing:d384");

    let texts = vec!["hello world".to_string(), "rust embeddings".to_string()];
    let batch = embedder.embed_many(&texts).expect("embed_many");
    assert_eq!(batch.len(), 2);
    for (text, v) in texts.iter().zip(&batch) {
        assert_eq!(v, &embedder.embed_one(text).expect("embed_one"), "batch equals per-item");
    }
}
