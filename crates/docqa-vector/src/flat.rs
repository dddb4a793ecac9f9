//! Exact brute-force backend. Fine for corpora up to a few hundred thousand chunks.
use docqa_core::{Error, Metric, Result, SearchBackend};

/// Row-major vectors; under [`Metric::Cosine`] rows are stored L2-normalized so
/// scoring is a dot product for both metrics.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    metric: Metric,
    dim: Option<usize>,
    rows: Vec<f32>,
    len: usize,
}

impl FlatIndex {
    pub fn new(metric: Metric) -> Self {
        Self { metric, dim: None, rows: Vec::new(), len: 0 }
    }

    fn prepare(&self, v: &[f32]) -> Vec<f32> {
        match self.metric {
            Metric::Cosine => normalized(v),
            Metric::InnerProduct => v.to_vec(),
        }
    }
}

pub fn normalized(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 { v.iter().map(|x| x / norm).collect() } else { v.to_vec() }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl SearchBackend for FlatIndex {
    fn metric(&self) -> Metric { self.metric }

    fn dimension(&self) -> Option<usize> { self.dim }

    fn len(&self) -> usize { self.len }

    fn insert(&mut self, vector: &[f32]) -> Result<usize> {
        if vector.is_empty() {
            return Err(Error::InvalidArgument("cannot index an empty vector".into()));
        }
        match self.dim {
            Some(d) if d != vector.len() => return Err(Error::DimensionMismatch { expected: d, actual: vector.len() }),
            Some(_) => {}
            None => self.dim = Some(vector.len()),
        }
        let row = self.prepare(vector);
        self.rows.extend_from_slice(&row);
        self.len += 1;
        Ok(self.len - 1)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let Some(dim) = self.dim else { return Vec::new() };
        if k == 0 || query.len() != dim {
            return Vec::new();
        }
        let q = self.prepare(query);
        let mut scored: Vec<(usize, f32)> = self.rows.chunks_exact(dim).map(|row| dot(&q, row)).enumerate().collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        if k < scored.len() {
            let kth = scored[k - 1].1;
            let cut = scored.iter().skip(k).position(|(_, s)| *s < kth).map_or(scored.len(), |p| k + p);
            scored.truncate(cut);
        }
        scored
    }

    fn empty(&self) -> Box<dyn SearchBackend> {
        Box::new(Self::new(self.metric))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cosine_ignores_magnitude() {
        let mut idx = FlatIndex::new(Metric::Cosine);
        idx.insert(&[10.0, 0.0]).unwrap();
        idx.insert(&[0.6, 0.8]).unwrap();
        let hits = idx.search(&[1.0, 0.0], 2);
        assert_eq!(hits[0].0, 0);
        assert_relative_eq!(hits[0].1, 1.0, epsilon = 1e-6);
        assert_relative_eq!(hits[1].1, 0.6, epsilon = 1e-6);
    }

    #[test]
    fn inner_product_keeps_magnitude() {
        let mut idx = FlatIndex::new(Metric::InnerProduct);
        idx.insert(&[0.5, 0.0]).unwrap();
        idx.insert(&[3.0, 3.0]).unwrap();
        let hits = idx.search(&[1.0, 0.0], 1);
        assert_eq!(hits[0].0, 1);
        assert_relative_eq!(hits[0].1, 3.0);
    }

    #[test]
    fn ties_at_cutoff_are_all_returned() {
        let mut idx = FlatIndex::new(Metric::Cosine);
        idx.insert(&[1.0, 0.0]).unwrap();
        idx.insert(&[0.0, 1.0]).unwrap();
        idx.insert(&[0.0, 2.0]).unwrap();
        idx.insert(&[-1.0, 0.0]).unwrap();
        let hits = idx.search(&[0.0, 1.0], 1);
        let slots: Vec<usize> = hits.iter().map(|h| h.0).collect();
        assert_eq!(slots, vec![1, 2]);
    }

    #[test]
    fn rejects_mixed_dimensions() {
        let mut idx = FlatIndex::new(Metric::Cosine);
        idx.insert(&[1.0, 0.0]).unwrap();
        assert!(matches!(idx.insert(&[1.0, 0.0, 0.0]), Err(Error::DimensionMismatch { expected: 2, actual: 3 })));
        assert!(idx.search(&[1.0], 1).is_empty());
        assert_eq!(idx.len(), 1);
    }
}
