use candle_core::{Result, Tensor, D};

/// Sentence embedding from token states: average the `[B,T,H]` hidden states over
/// positions where the mask is set, then scale each row to unit length. Returns `[B,H]`.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let weights = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?.unsqueeze(D::Minus1)?;
    let summed = hidden.broadcast_mul(&weights)?.sum(1)?;
    // an all-masked row would divide by zero
    let counts = weights.sum(1)?.clamp(1.0, f64::from(f32::MAX))?;
    let mean = summed.broadcast_div(&counts)?;
    let norms = mean.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?.clamp(1e-12, f64::from(f32::MAX))?;
    mean.broadcast_div(&norms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn pooled(values: &[f32], t: usize, h: usize, mask: &[u32]) -> Vec<f32> {
        let dev = Device::Cpu;
        let hidden = Tensor::from_slice(values, (1, t, h), &dev).unwrap();
        let mask = Tensor::from_slice(mask, (1, t), &dev).unwrap();
        masked_mean_l2(&hidden, &mask).unwrap().to_vec2::<f32>().unwrap().remove(0)
    }

    #[test]
    fn masked_tokens_are_ignored() {
        let v = pooled(&[1.0, 2.0, 3.0, 4.0, 50.0, 60.0, 70.0, 80.0], 2, 4, &[1, 0]);
        let norm = 30.0f32.sqrt();
        for (a, b) in v.iter().zip([1.0 / norm, 2.0 / norm, 3.0 / norm, 4.0 / norm]) {
            assert!((a - b).abs() < 1e-5, "a={a} b={b}");
        }
    }

    #[test]
    fn averages_then_normalizes() {
        let v = pooled(&[2.0, 0.0, 0.0, 2.0], 2, 2, &[1, 1]);
        let expected = 1.0 / 2.0f32.sqrt();
        assert!((v[0] - expected).abs() < 1e-5);
        assert!((v[1] - expected).abs() < 1e-5);
    }
}
