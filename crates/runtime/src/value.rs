//! Tensor buffers tagged with a memory scope.
//!
//! Movement between scopes is always explicit (`to_device` / `to_host`); the
//! core never relocates a value behind the caller's back. The simulated
//! device keeps data in host memory, so a transfer is a copy with a new
//! scope tag.

use anyhow::{bail, Result};
use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use taskforge_ir::{row_major_strides, DataType, MemoryScope, TensorType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorValue {
    scope: MemoryScope,
    dtype: DataType,
    shape: Vec<usize>,
    strides: Vec<usize>,
    data: Vec<f32>,
}

impl TensorValue {
    pub fn empty(shape: &[usize], dtype: DataType, scope: MemoryScope) -> Self {
        Self::zeros(shape, dtype, scope)
    }

    pub fn zeros(shape: &[usize], dtype: DataType, scope: MemoryScope) -> Self {
        let len = shape.iter().product();
        Self {
            scope,
            dtype,
            shape: shape.to_vec(),
            strides: row_major_strides(shape),
            data: vec![0.0; len],
        }
    }

    /// Standard-normal values from a seeded generator; the same seed always
    /// produces the same tensor.
    pub fn randn(shape: &[usize], dtype: DataType, scope: MemoryScope, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let len: usize = shape.iter().product();
        let data = (0..len)
            .map(|_| StandardNormal.sample(&mut rng))
            .collect::<Vec<f32>>();
        Self {
            scope,
            dtype,
            shape: shape.to_vec(),
            strides: row_major_strides(shape),
            data,
        }
    }

    /// Zero-filled value matching a task parameter type.
    pub fn zeros_like(ty: &TensorType, scope: MemoryScope) -> Self {
        Self::zeros(&ty.shape, ty.dtype, scope)
    }

    /// Seeded random value matching a task parameter type.
    pub fn randn_like(ty: &TensorType, scope: MemoryScope, seed: u64) -> Self {
        Self::randn(&ty.shape, ty.dtype, scope, seed)
    }

    pub fn scope(&self) -> MemoryScope {
        self.scope
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Copy to device-global memory.
    pub fn to_device(&self) -> TensorValue {
        let mut value = self.clone();
        value.scope = MemoryScope::Global;
        value
    }

    /// Copy to host memory.
    pub fn to_host(&self) -> TensorValue {
        let mut value = self.clone();
        value.scope = MemoryScope::Host;
        value
    }

    /// View a rank-2 value as an ndarray matrix for reference math.
    pub fn to_array2(&self) -> Result<Array2<f32>> {
        if self.shape.len() != 2 {
            bail!("expected rank-2 tensor, got shape {:?}", self.shape);
        }
        Ok(
            ArrayView2::from_shape((self.shape[0], self.shape[1]), &self.data)?
                .to_owned(),
        )
    }

    pub fn from_array2(array: &Array2<f32>, scope: MemoryScope) -> Self {
        let shape = [array.nrows(), array.ncols()];
        Self {
            scope,
            dtype: DataType::F32,
            shape: shape.to_vec(),
            strides: row_major_strides(&shape),
            data: array.iter().copied().collect(),
        }
    }

    /// Turn a flat element offset back into multi-dimensional coordinates.
    pub fn unravel(&self, offset: usize) -> Vec<usize> {
        let mut rem = offset;
        self.strides
            .iter()
            .map(|&stride| {
                let stride = stride.max(1);
                let coord = rem / stride;
                rem %= stride;
                coord
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn randn_is_deterministic_per_seed() {
        let a = TensorValue::randn(&[4, 4], DataType::F32, MemoryScope::Host, 1);
        let b = TensorValue::randn(&[4, 4], DataType::F32, MemoryScope::Host, 1);
        let c = TensorValue::randn(&[4, 4], DataType::F32, MemoryScope::Host, 2);
        assert_eq!(a.as_slice(), b.as_slice());
        assert_ne!(a.as_slice(), c.as_slice());
    }

    #[test]
    fn scope_movement_is_explicit_and_copying() {
        let host = TensorValue::randn(&[8], DataType::F32, MemoryScope::Host, 7);
        let device = host.to_device();
        assert_eq!(host.scope(), MemoryScope::Host);
        assert_eq!(device.scope(), MemoryScope::Global);
        assert_eq!(host.as_slice(), device.as_slice());
        assert_eq!(device.to_host().scope(), MemoryScope::Host);
    }

    #[test]
    fn array2_round_trip_preserves_layout() {
        let value = TensorValue::randn(&[3, 5], DataType::F32, MemoryScope::Host, 11);
        let array = value.to_array2().unwrap();
        assert_abs_diff_eq!(array[(1, 2)], value.as_slice()[1 * 5 + 2]);
        let back = TensorValue::from_array2(&array, MemoryScope::Host);
        assert_eq!(back.as_slice(), value.as_slice());
    }

    #[test]
    fn unravel_inverts_row_major_offsets() {
        let value = TensorValue::zeros(&[2, 3, 4], DataType::F32, MemoryScope::Host);
        assert_eq!(value.unravel(0), vec![0, 0, 0]);
        assert_eq!(value.unravel(13), vec![1, 0, 1]);
        assert_eq!(value.unravel(23), vec![1, 2, 3]);
    }
}
