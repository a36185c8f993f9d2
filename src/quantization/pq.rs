//! Product quantization: each vector is split into `num_subvectors` chunks,
//! each chunk is mapped to the nearest of `2^bits` centroids trained via
//! k-means, and a vector is stored as one code byte per subvector.
//!
//! Distance at query time uses an asymmetric distance table: per-subvector
//! distances from the (unquantized) query to every centroid, summed per
//! code. A quantizer trained on fewer samples than centroids is marked
//! under-trained rather than silently producing a degenerate codebook.

use crate::error::{Error, Result};

/// Trained product-quantizer state.
pub struct ProductQuantizer {
    dimension: usize,
    num_subvectors: usize,
    subvector_dim: usize,
    bits: u8,
    /// `codebooks[s][c]` is centroid `c` of subvector `s`, `subvector_dim` floats.
    codebooks: Vec<Vec<Vec<f32>>>,
    under_trained: bool,
}

impl ProductQuantizer {
    pub fn centroid_count(bits: u8) -> usize {
        1usize << bits
    }

    /// `bits` controls codebook size (`2^bits` centroids per subvector,
    /// typically 8 for a one-byte code).
    pub fn train(vectors: &[Vec<f32>], dimension: usize, num_subvectors: usize, bits: u8) -> Result<Self> {
        if num_subvectors == 0 || dimension % num_subvectors != 0 {
            return Err(Error::invalid_input(format!(
                "dimension {dimension} is not divisible by num_subvectors {num_subvectors}"
            )));
        }
        if vectors.is_empty() {
            return Err(Error::invalid_input("cannot train a product quantizer on zero vectors"));
        }
        let subvector_dim = dimension / num_subvectors;
        let k = Self::centroid_count(bits);
        let under_trained = vectors.len() < k;

        let mut codebooks = Vec::with_capacity(num_subvectors);
        for s in 0..num_subvectors {
            let subvectors: Vec<&[f32]> =
                vectors.iter().map(|v| &v[s * subvector_dim..(s + 1) * subvector_dim]).collect();
            codebooks.push(train_kmeans(&subvectors, subvector_dim, k));
        }

        Ok(Self { dimension, num_subvectors, subvector_dim, bits, codebooks, under_trained })
    }

    pub fn is_under_trained(&self) -> bool {
        self.under_trained
    }

    pub fn code_len(&self) -> usize {
        self.num_subvectors
    }

    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if vector.len() != self.dimension {
            return Err(Error::invalid_input(format!(
                "expected dimension {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        let mut code = Vec::with_capacity(self.num_subvectors);
        for s in 0..self.num_subvectors {
            let sub = &vector[s * self.subvector_dim..(s + 1) * self.subvector_dim];
            code.push(nearest_centroid(sub, &self.codebooks[s]) as u8);
        }
        Ok(code)
    }

    pub fn decode(&self, code: &[u8]) -> Result<Vec<f32>> {
        if code.len() != self.num_subvectors {
            return Err(Error::invalid_input("code length does not match quantizer configuration"));
        }
        let mut out = Vec::with_capacity(self.dimension);
        for (s, &c) in code.iter().enumerate() {
            out.extend_from_slice(&self.codebooks[s][c as usize]);
        }
        Ok(out)
    }

    /// Build a per-subvector distance table from `query` to every centroid,
    /// then sum the table entries addressed by `code`.
    pub fn asymmetric_distance(&self, query: &[f32], code: &[u8]) -> Result<f32> {
        if query.len() != self.dimension || code.len() != self.num_subvectors {
            return Err(Error::invalid_input("query/code dimension mismatch"));
        }
        let mut total = 0.0f32;
        for s in 0..self.num_subvectors {
            let sub = &query[s * self.subvector_dim..(s + 1) * self.subvector_dim];
            let centroid = &self.codebooks[s][code[s] as usize];
            total += crate::simd::l2_squared(sub, centroid);
        }
        Ok(total.sqrt())
    }
}

fn nearest_centroid(v: &[f32], codebook: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, c) in codebook.iter().enumerate() {
        let d = crate::simd::l2_squared(v, c);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

/// Deterministic Lloyd's-algorithm k-means, seeded by taking the first `k`
/// distinct samples (or padding with the last sample when under-trained).
fn train_kmeans(samples: &[&[f32]], dim: usize, k: usize) -> Vec<Vec<f32>> {
    let mut centroids: Vec<Vec<f32>> = (0..k).map(|i| samples[i % samples.len()].to_vec()).collect();
    const ITERATIONS: usize = 10;
    for _ in 0..ITERATIONS {
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for &sample in samples {
            let c = nearest_centroid(sample, &centroids);
            counts[c] += 1;
            for d in 0..dim {
                sums[c][d] += sample[d];
            }
        }
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            for d in 0..dim {
                centroids[c][d] = sums[c][d] / counts[c] as f32;
            }
        }
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<Vec<f32>> {
        (0..64).map(|i| vec![i as f32, (i * 2) as f32, (i % 7) as f32, (i % 5) as f32]).collect()
    }

    #[test]
    fn encode_decode_roundtrip_is_approximate() {
        let data = corpus();
        let pq = ProductQuantizer::train(&data, 4, 2, 4).unwrap();
        let code = pq.encode(&data[10]).unwrap();
        let decoded = pq.decode(&code).unwrap();
        assert_eq!(decoded.len(), 4);
        assert!(!pq.is_under_trained());
    }

    #[test]
    fn asymmetric_distance_favors_closer_vector() {
        let data = corpus();
        let pq = ProductQuantizer::train(&data, 4, 2, 4).unwrap();
        let near_code = pq.encode(&data[10]).unwrap();
        let far_code = pq.encode(&data[60]).unwrap();
        let d_near = pq.asymmetric_distance(&data[10], &near_code).unwrap();
        let d_far = pq.asymmetric_distance(&data[10], &far_code).unwrap();
        assert!(d_near <= d_far);
    }

    #[test]
    fn under_trained_when_fewer_samples_than_centroids() {
        let data: Vec<Vec<f32>> = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let pq = ProductQuantizer::train(&data, 2, 1, 4).unwrap();
        assert!(pq.is_under_trained());
    }

    #[test]
    fn dimension_not_divisible_rejected() {
        let data = corpus();
        let err = ProductQuantizer::train(&data, 4, 3, 4).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }
}
