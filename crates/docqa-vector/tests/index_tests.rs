use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use docqa_core::{Chunk, Embedder, Error, Meta, Metric, Result};
use docqa_embed::HashingEmbedder;
use docqa_vector::VectorIndex;

/// Looks vectors up by exact text.
struct TableEmbedder {
    dim: usize,
    table: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    fn new(dim: usize, rows: &[(&str, Vec<f32>)]) -> Self {
        Self { dim, table: rows.iter().map(|(t, v)| (t.to_string(), v.clone())).collect() }
    }
}

impl Embedder for TableEmbedder {
    fn id(&self) -> &str { "table" }
    fn dim(&self) -> usize { self.dim }
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.table.get(text).cloned().ok_or_else(|| Error::EmbeddingFailure(format!("no vector for {text}")))
    }
}

fn chunk(source: &str, position: usize, text: &str) -> Chunk {
    Chunk::new(source, position, text, Meta::new())
}

fn corpus() -> Vec<Chunk> {
    let topics = [
        "rust ownership and borrowing rules",
        "baking sourdough bread at home",
        "the history of the roman empire",
        "training neural networks with gradient descent",
        "growing tomatoes in a small garden",
    ];
    (0..20).map(|i| chunk(&format!("doc{}", i % 4), i / 4, &format!("{} part {i}", topics[i % topics.len()]))).collect()
}

#[test]
fn query_before_build_fails() {
    let index = VectorIndex::new(Metric::Cosine);
    assert!(matches!(index.query(&[1.0, 0.0], 3), Err(Error::IndexNotBuilt)));
    assert!(!index.is_built());
}

#[test]
fn empty_build_is_allowed_and_returns_nothing() {
    let index = VectorIndex::new(Metric::Cosine);
    index.build(&[], &HashingEmbedder::default()).expect("build");
    assert!(index.is_built());
    assert!(index.is_empty());
    assert!(index.query(&[0.5; 384], 3).expect("query").is_empty());
}

#[test]
fn query_results_are_bounded_members_and_sorted() {
    let embedder = HashingEmbedder::default();
    let chunks = corpus();
    let index = VectorIndex::new(Metric::Cosine).with_batch_size(7);
    index.build(&chunks, &embedder).expect("build");
    assert_eq!(index.len(), chunks.len());
    assert_eq!(index.dimension(), Some(384));

    let ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
    let q = embedder.embed_one("sourdough bread baking").expect("embed");
    for k in [1, 3, 5, 19] {
        let results = index.query(&q, k).expect("query");
        assert!(results.len() <= k);
        for (i, r) in results.iter().enumerate() {
            assert!(ids.contains(r.chunk.id.as_str()));
            assert_eq!(r.rank, i);
        }
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score, "scores must be non-increasing");
        }
    }
    let top = &index.query(&q, 1).expect("query")[0];
    assert!(top.chunk.text.contains("sourdough"));
}

#[test]
fn k_larger_than_index_returns_everything() {
    let embedder = HashingEmbedder::default();
    let index = VectorIndex::new(Metric::Cosine);
    index.build(&corpus()[..4], &embedder).expect("build");
    let q = embedder.embed_one("roman").expect("embed");
    assert_eq!(index.query(&q, 50).expect("query").len(), 4);
    assert!(matches!(index.query(&q, 0), Err(Error::InvalidArgument(_))));
}

#[test]
fn ties_break_by_position_then_source() {
    let same = vec![1.0, 0.0];
    let embedder = TableEmbedder::new(2, &[("a", same.clone()), ("b", same.clone()), ("c", same.clone()), ("d", vec![0.0, 1.0])]);
    let chunks = vec![chunk("zeta", 1, "a"), chunk("beta", 1, "b"), chunk("alpha", 3, "c"), chunk("alpha", 0, "d")];
    let index = VectorIndex::new(Metric::Cosine);
    index.build(&chunks, &embedder).expect("build");
    let order: Vec<String> = index.query(&[1.0, 0.0], 4).expect("query").into_iter().map(|r| r.chunk.id).collect();
    assert_eq!(order, vec!["beta:1", "zeta:1", "alpha:3", "alpha:0"]);

    let top2: Vec<String> = index.query(&[1.0, 0.0], 2).expect("query").into_iter().map(|r| r.chunk.id).collect();
    assert_eq!(top2, vec!["beta:1", "zeta:1"]);
}

#[test]
fn add_keeps_existing_vectors() {
    let embedder = HashingEmbedder::default();
    let chunks = corpus();
    let index = VectorIndex::new(Metric::Cosine);
    index.build(&chunks[..10], &embedder).expect("build");
    let before = index.get(&chunks[0].id).expect("stored");
    index.add(&chunks[10..], &embedder).expect("add");
    assert_eq!(index.len(), 20);
    assert_eq!(index.get(&chunks[0].id).expect("stored"), before);
}

#[test]
fn add_before_build_acts_as_first_build() {
    let embedder = HashingEmbedder::default();
    let index = VectorIndex::new(Metric::Cosine);
    index.add(&corpus()[..3], &embedder).expect("add");
    assert!(index.is_built());
    assert_eq!(index.len(), 3);
}

#[test]
fn duplicate_ids_are_rejected_without_changes() {
    let embedder = HashingEmbedder::default();
    let chunks = corpus();
    let index = VectorIndex::new(Metric::Cosine);
    index.build(&chunks[..5], &embedder).expect("build");

    let batch = vec![chunks[6].clone(), chunks[2].clone()];
    assert!(matches!(index.add(&batch, &embedder), Err(Error::DuplicateChunk(id)) if id == chunks[2].id));
    assert_eq!(index.len(), 5);
    assert!(index.get(&chunks[6].id).is_none());

    let repeated = vec![chunks[7].clone(), chunks[7].clone()];
    assert!(matches!(index.add(&repeated, &embedder), Err(Error::DuplicateChunk(_))));
    assert_eq!(index.len(), 5);
}

#[test]
fn mixing_dimensions_is_an_error() {
    let index = VectorIndex::new(Metric::Cosine);
    index.build(&corpus()[..2], &HashingEmbedder::new(16).expect("embedder")).expect("build");
    let wider = HashingEmbedder::new(32).expect("embedder");
    assert!(matches!(
        index.add(&corpus()[2..4], &wider),
        Err(Error::DimensionMismatch { expected: 16, actual: 32 })
    ));
    assert!(matches!(index.query(&[1.0; 8], 1), Err(Error::DimensionMismatch { expected: 16, actual: 8 })));
}

#[test]
fn embedder_returning_wrong_width_is_rejected() {
    let liar = TableEmbedder::new(3, &[("x", vec![1.0, 0.0])]);
    let index = VectorIndex::new(Metric::Cosine);
    assert!(matches!(index.build(&[chunk("s", 0, "x")], &liar), Err(Error::DimensionMismatch { .. })));
    assert!(!index.is_built());
}

#[test]
fn capital_of_france_scenario() {
    let embedder = HashingEmbedder::default();
    let chunks = vec![
        chunk("facts", 0, "Paris is the capital of France."),
        chunk("facts", 1, "The Eiffel Tower is in Paris."),
    ];
    let index = VectorIndex::new(Metric::Cosine);
    index.build(&chunks, &embedder).expect("build");
    let q = embedder.embed_one("What is the capital of France?").expect("embed");
    let results = index.query(&q, 1).expect("query");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.text, "Paris is the capital of France.");
}

#[test]
fn concurrent_readers_see_the_same_results() {
    let embedder = HashingEmbedder::default();
    let index = Arc::new(VectorIndex::new(Metric::Cosine));
    index.build(&corpus(), &embedder).expect("build");
    let q = embedder.embed_one("gradient descent").expect("embed");
    let expected: Vec<String> = index.query(&q, 5).expect("query").into_iter().map(|r| r.chunk.id).collect();

    std::thread::scope(|s| {
        for _ in 0..8 {
            let index = Arc::clone(&index);
            let q = q.clone();
            let expected = expected.clone();
            s.spawn(move || {
                for _ in 0..50 {
                    let got: Vec<String> = index.query(&q, 5).expect("query").into_iter().map(|r| r.chunk.id).collect();
                    assert_eq!(got, expected);
                }
            });
        }
    });
}

#[test]
fn chunks_from_lists_one_source_in_position_order() {
    let embedder = HashingEmbedder::default();
    let index = VectorIndex::new(Metric::Cosine);
    index.build(&corpus(), &embedder).unwrap();

    let doc1 = index.chunks_from("doc1");
    assert_eq!(doc1.iter().map(|c| c.position).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    assert!(doc1.iter().all(|c| c.source == "doc1"));
    assert!(index.chunks_from("missing").is_empty());
}

#[test]
fn clear_returns_to_unbuilt() {
    let index = VectorIndex::new(Metric::Cosine);
    index.build(&corpus()[..3], &HashingEmbedder::default()).expect("build");
    index.clear().expect("clear");
    assert!(index.is_empty());
    assert!(matches!(index.query(&[1.0; 384], 1), Err(Error::IndexNotBuilt)));
}
