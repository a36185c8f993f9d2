//! Scalar quantization: an affine 8-bit (or 4-bit, two codes packed per
//! byte) mapping per dimension (or a single global range), trained from
//! observed min/max and persisted alongside the vector store.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqBits {
    Eight,
    Four,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqRange {
    /// One `(min, max)` per dimension.
    PerDimension,
    /// A single `(min, max)` shared across all dimensions.
    Global,
}

pub struct ScalarQuantizer {
    dimension: usize,
    bits: SqBits,
    range: SqRange,
    mins: Vec<f32>,
    scales: Vec<f32>,
}

impl ScalarQuantizer {
    pub fn train(vectors: &[Vec<f32>], dimension: usize, bits: SqBits, range: SqRange) -> Result<Self> {
        if vectors.is_empty() {
            return Err(Error::invalid_input("cannot train a scalar quantizer on zero vectors"));
        }
        let levels = match bits {
            SqBits::Eight => 255.0,
            SqBits::Four => 15.0,
        };
        let (mins, maxs) = match range {
            SqRange::PerDimension => {
                let mut mins = vec![f32::INFINITY; dimension];
                let mut maxs = vec![f32::NEG_INFINITY; dimension];
                for v in vectors {
                    for d in 0..dimension {
                        mins[d] = mins[d].min(v[d]);
                        maxs[d] = maxs[d].max(v[d]);
                    }
                }
                (mins, maxs)
            }
            SqRange::Global => {
                let mut lo = f32::INFINITY;
                let mut hi = f32::NEG_INFINITY;
                for v in vectors {
                    for &x in v {
                        lo = lo.min(x);
                        hi = hi.max(x);
                    }
                }
                (vec![lo; dimension], vec![hi; dimension])
            }
        };
        let scales: Vec<f32> =
            mins.iter().zip(&maxs).map(|(&lo, &hi)| if hi > lo { (hi - lo) / levels } else { 1.0 }).collect();
        Ok(Self { dimension, bits, range, mins, scales })
    }

    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if vector.len() != self.dimension {
            return Err(Error::invalid_input(format!(
                "expected dimension {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        let levels = match self.bits {
            SqBits::Eight => 255.0,
            SqBits::Four => 15.0,
        };
        let codes: Vec<u8> = (0..self.dimension)
            .map(|d| {
                let q = ((vector[d] - self.mins[d]) / self.scales[d]).round().clamp(0.0, levels);
                q as u8
            })
            .collect();
        Ok(match self.bits {
            SqBits::Eight => codes,
            SqBits::Four => codes.chunks(2).map(|pair| (pair[0] & 0x0F) | (pair.get(1).copied().unwrap_or(0) << 4)).collect(),
        })
    }

    pub fn decode(&self, code: &[u8]) -> Result<Vec<f32>> {
        let codes: Vec<u8> = match self.bits {
            SqBits::Eight => code.to_vec(),
            SqBits::Four => code.iter().flat_map(|&byte| [byte & 0x0F, byte >> 4]).take(self.dimension).collect(),
        };
        if codes.len() != self.dimension {
            return Err(Error::invalid_input("code length does not match quantizer configuration"));
        }
        Ok((0..self.dimension).map(|d| self.mins[d] + codes[d] as f32 * self.scales[d]).collect())
    }

    pub fn range(&self) -> SqRange {
        self.range
    }
}
