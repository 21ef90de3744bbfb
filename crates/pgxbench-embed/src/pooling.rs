//! Token-to-sentence pooling.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

/// How token embeddings collapse into one sentence vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PoolingStrategy {
    /// Mask-weighted mean over real tokens. Sentence-transformer checkpoints
    /// such as S-PubMedBert are trained with this.
    #[default]
    Mean,

    /// First ([CLS]) token.
    Cls,
}

impl PoolingStrategy {
    /// `hidden`: (batch, seq, dim); `mask`: (batch, seq) as F32. Returns (batch, dim).
    pub fn apply(&self, hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            PoolingStrategy::Mean => {
                let weights = mask.unsqueeze(2)?;
                let summed = hidden.broadcast_mul(&weights)?.sum(1)?;
                let counts = weights.sum(1)?.clamp(1e-9f32, f32::MAX)?;
                summed.broadcast_div(&counts)
            }
            PoolingStrategy::Cls => hidden.narrow(1, 0, 1)?.squeeze(1),
        }
    }
}

/// Scale each row to unit length.
pub fn l2_normalize(rows: &Tensor) -> candle_core::Result<Tensor> {
    let norms = rows.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-9f32, f32::MAX)?;
    rows.broadcast_div(&norms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn hidden() -> Tensor {
        // batch of 1, three tokens, 2-dim; last token is padding
        Tensor::from_vec(
            vec![1.0f32, 3.0, 3.0, 5.0, 100.0, 100.0],
            (1, 3, 2),
            &Device::Cpu,
        )
        .unwrap()
    }

    fn mask() -> Tensor {
        Tensor::from_vec(vec![1.0f32, 1.0, 0.0], (1, 3), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_mean_ignores_padding() {
        let pooled = PoolingStrategy::Mean.apply(&hidden(), &mask()).unwrap();
        let rows = pooled.to_vec2::<f32>().unwrap();
        assert!((rows[0][0] - 2.0).abs() < 1e-5);
        assert!((rows[0][1] - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_cls_takes_first_token() {
        let pooled = PoolingStrategy::Cls.apply(&hidden(), &mask()).unwrap();
        assert_eq!(pooled.to_vec2::<f32>().unwrap(), vec![vec![1.0, 3.0]]);
    }

    #[test]
    fn test_l2_rows_have_unit_norm() {
        let rows = Tensor::from_vec(vec![3.0f32, 4.0, 0.0, 2.0], (2, 2), &Device::Cpu).unwrap();
        let normed = l2_normalize(&rows).unwrap().to_vec2::<f32>().unwrap();
        assert!((normed[0][0] - 0.6).abs() < 1e-5);
        assert!((normed[1][1] - 1.0).abs() < 1e-5);
    }
}
