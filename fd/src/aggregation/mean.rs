//! Weighted mean of f32 deltas

use tracing::debug;

use super::{AggregationError, Aggregator, Update};

const F32_SIZE: usize = std::mem::size_of::<f32>();

/// Decode a little-endian f32 vector
pub fn decode_f32(bytes: &[u8]) -> Result<Vec<f32>, AggregationError> {
    if bytes.len() % F32_SIZE != 0 {
        return Err(AggregationError::Malformed(format!(
            "length {} is not a multiple of {}",
            bytes.len(),
            F32_SIZE
        )));
    }
    Ok(bytes
        .chunks_exact(F32_SIZE)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Encode an f32 vector as little-endian bytes
pub fn encode_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// `base + Σ wᵢ·δᵢ / Σ wᵢ` over little-endian f32 vectors
///
/// Updates are folded in participant-id order with f64 accumulators, so the
/// output is bit-identical for any arrival order of the same set.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanDelta;

impl Aggregator for MeanDelta {
    fn name(&self) -> &'static str {
        "mean-delta"
    }

    fn validate(&self, base: &[u8], delta: &[u8]) -> Result<(), AggregationError> {
        let values = decode_f32(delta)?;
        if delta.len() != base.len() {
            return Err(AggregationError::ShapeMismatch {
                expected: base.len(),
                actual: delta.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AggregationError::Malformed("delta contains non-finite values".to_string()));
        }
        Ok(())
    }

    fn aggregate(&self, base: &[u8], updates: &[Update]) -> Result<Vec<u8>, AggregationError> {
        debug!(updates = updates.len(), base_len = base.len(), "MeanDelta::aggregate: called");
        if updates.is_empty() {
            return Err(AggregationError::Empty);
        }

        let base_values = decode_f32(base)?;
        let mut ordered: Vec<&Update> = updates.iter().collect();
        ordered.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));

        let mut sums = vec![0f64; base_values.len()];
        let mut total_weight = 0f64;
        for update in ordered {
            if !update.weight.is_finite() || update.weight <= 0.0 {
                return Err(AggregationError::InvalidWeight {
                    participant_id: update.participant_id.clone(),
                    weight: update.weight,
                });
            }
            self.validate(base, &update.delta)?;
            let delta = decode_f32(&update.delta)?;
            for (sum, d) in sums.iter_mut().zip(delta) {
                *sum += update.weight * f64::from(d);
            }
            total_weight += update.weight;
            if !total_weight.is_finite() {
                return Err(AggregationError::InvalidWeight {
                    participant_id: update.participant_id.clone(),
                    weight: update.weight,
                });
            }
        }

        let merged: Vec<f32> = base_values
            .iter()
            .zip(sums)
            .map(|(b, sum)| (f64::from(*b) + sum / total_weight) as f32)
            .collect();
        if merged.iter().any(|v| !v.is_finite()) {
            return Err(AggregationError::Malformed("aggregate overflows f32".to_string()));
        }
        Ok(encode_f32(&merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(id: &str, weight: f64, values: &[f32]) -> Update {
        Update {
            participant_id: id.to_string(),
            weight,
            delta: encode_f32(values),
        }
    }

    #[test]
    fn test_decode_rejects_ragged_bytes() {
        assert!(decode_f32(&[0, 1, 2]).is_err());
        assert_eq!(decode_f32(&encode_f32(&[1.5, -2.0])).unwrap(), vec![1.5, -2.0]);
    }

    #[test]
    fn test_weighted_mean() {
        let base = encode_f32(&[1.0, 1.0]);
        let updates = vec![update("a", 1.0, &[2.0, 0.0]), update("b", 3.0, &[-2.0, 4.0])];

        let out = decode_f32(&MeanDelta.aggregate(&base, &updates).unwrap()).unwrap();
        // (1*2 + 3*-2)/4 = -1 ; (0 + 12)/4 = 3
        assert_eq!(out, vec![0.0, 4.0]);
    }

    #[test]
    fn test_order_does_not_matter() {
        let base = encode_f32(&[0.1, 0.2, 0.3]);
        let a = update("edge-a", 1.0, &[0.7, 0.11, 1e-3]);
        let b = update("edge-b", 2.5, &[0.3, -0.9, 3.3]);
        let c = update("edge-c", 0.5, &[1e-7, 12.0, -0.25]);

        let forward = MeanDelta.aggregate(&base, &[a.clone(), b.clone(), c.clone()]).unwrap();
        let backward = MeanDelta.aggregate(&base, &[c, a, b]).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_validate_checks_shape() {
        let base = encode_f32(&[0.0, 0.0]);
        assert!(MeanDelta.validate(&base, &encode_f32(&[1.0, 2.0])).is_ok());
        assert!(matches!(
            MeanDelta.validate(&base, &encode_f32(&[1.0])),
            Err(AggregationError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            MeanDelta.validate(&base, b"abc"),
            Err(AggregationError::Malformed(_))
        ));
        assert!(MeanDelta.validate(&base, &encode_f32(&[f32::NAN, 0.0])).is_err());
    }

    #[test]
    fn test_invalid_weight_and_empty() {
        let base = encode_f32(&[0.0]);
        assert_eq!(MeanDelta.aggregate(&base, &[]), Err(AggregationError::Empty));
        assert!(matches!(
            MeanDelta.aggregate(&base, &[update("a", 0.0, &[1.0])]),
            Err(AggregationError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn test_weight_sum_overflow_rejected() {
        let base = encode_f32(&[0.0, 1.0]);
        let updates = vec![update("a", 1e308, &[1.0, 1.0]), update("b", 1e308, &[2.0, 2.0])];

        let err = MeanDelta.aggregate(&base, &updates).unwrap_err();
        assert_eq!(
            err,
            AggregationError::InvalidWeight {
                participant_id: "b".into(),
                weight: 1e308,
            }
        );
    }

    #[test]
    fn test_result_outside_f32_range_rejected() {
        let base = encode_f32(&[f32::MAX]);
        let updates = vec![update("a", 1.0, &[f32::MAX])];
        assert!(matches!(
            MeanDelta.aggregate(&base, &updates),
            Err(AggregationError::Malformed(_))
        ));
    }
}
