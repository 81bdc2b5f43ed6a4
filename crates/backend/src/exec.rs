//! Scalar-expression evaluation and contraction addressing.

use anyhow::{bail, Result};
use std::collections::HashMap;
use taskforge_ir::{IndexSource, OperandMap, ParamSpec, ScalarExpr};

/// Linear addressing coefficients for one contraction operand: the element at
/// output point `(i, j)` and reduction step `k` lives at
/// `ci*i + cj*j + ck*k`.
#[derive(Debug)]
pub struct OperandCoeffs {
    pub tensor: String,
    ci: usize,
    cj: usize,
    ck: usize,
}

impl OperandCoeffs {
    #[inline]
    pub fn offset(&self, i: usize, j: usize, k: usize) -> usize {
        self.ci * i + self.cj * j + self.ck * k
    }
}

/// Fold an operand's dim-to-axis mapping and its parameter strides into
/// per-axis coefficients. `None` if the operand references an unknown
/// parameter or an output axis beyond rank 2.
pub fn contraction_coeffs(map: &OperandMap, params: &[ParamSpec]) -> Option<OperandCoeffs> {
    let param = params.iter().find(|param| param.name == map.tensor)?;
    if map.dims.len() != param.ty.strides.len() {
        return None;
    }
    let mut ci = 0usize;
    let mut cj = 0usize;
    let mut ck = 0usize;
    for (source, &stride) in map.dims.iter().zip(param.ty.strides.iter()) {
        match source {
            IndexSource::Output(0) => ci += stride,
            IndexSource::Output(1) => cj += stride,
            IndexSource::Output(_) => return None,
            IndexSource::Reduce => ck += stride,
        }
    }
    Some(OperandCoeffs {
        tensor: map.tensor.clone(),
        ci,
        cj,
        ck,
    })
}

/// Evaluate a compute body at one output point. `env` holds the axis
/// bindings (output axes plus any enclosing reduce axes); `buffers` maps
/// tensor names to their flat data and strides.
///
/// A load with a single index is treated as an already-linearised offset
/// (the form the flatten-tensors pass produces); a load with one index per
/// dimension is resolved through the parameter strides.
pub fn eval_body<'a>(
    expr: &'a ScalarExpr,
    env: &mut Vec<(&'a str, usize)>,
    buffers: &HashMap<&str, (&[f32], &[usize])>,
) -> Result<f64> {
    match expr {
        ScalarExpr::Const(value) => Ok(*value),
        ScalarExpr::Var(name) => env
            .iter()
            .rev()
            .find(|(axis, _)| axis == name)
            .map(|(_, value)| *value as f64)
            .ok_or_else(|| anyhow::anyhow!("axis '{}' unbound during execution", name)),
        ScalarExpr::Load { tensor, indices } => {
            let (data, strides) = buffers
                .get(tensor.as_str())
                .ok_or_else(|| anyhow::anyhow!("no buffer bound for tensor '{}'", tensor))?;
            let offset = if indices.len() == 1 {
                eval_body(&indices[0], env, buffers)? as usize
            } else if indices.len() == strides.len() {
                let mut offset = 0usize;
                for (index, &stride) in indices.iter().zip(strides.iter()) {
                    offset += eval_body(index, env, buffers)? as usize * stride;
                }
                offset
            } else {
                bail!(
                    "load of '{}' has {} indices for a rank-{} layout",
                    tensor,
                    indices.len(),
                    strides.len()
                );
            };
            match data.get(offset) {
                Some(value) => Ok(*value as f64),
                None => bail!(
                    "load of '{}' at offset {} is out of bounds ({} elements)",
                    tensor,
                    offset,
                    data.len()
                ),
            }
        }
        ScalarExpr::Binary { op, lhs, rhs } => {
            let lhs = eval_body(lhs, env, buffers)?;
            let rhs = eval_body(rhs, env, buffers)?;
            Ok(op.apply(lhs, rhs))
        }
        ScalarExpr::Reduce {
            op,
            axis,
            extent,
            body,
        } => {
            let mut acc = op.identity();
            for step in 0..*extent {
                env.push((axis, step));
                let value = eval_body(body, env, buffers);
                env.pop();
                acc = op.combine(acc, value?);
            }
            Ok(acc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_ir::{reduce_sum, tensor_input, DataType, MemoryScope, TensorType};

    #[test]
    fn eval_resolves_strided_and_linear_loads() {
        let a = tensor_input("A", DataType::F32, &[2, 3]);
        let strided = a.at(&["i", "j"]);
        let linear = ScalarExpr::Load {
            tensor: "A".into(),
            indices: vec![ScalarExpr::Const(5.0)],
        };

        let data = [0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0];
        let strides = [3usize, 1];
        let mut buffers: HashMap<&str, (&[f32], &[usize])> = HashMap::new();
        buffers.insert("A", (&data, &strides));

        let mut env = vec![("i", 1usize), ("j", 2usize)];
        assert_eq!(eval_body(&strided, &mut env, &buffers).unwrap(), 5.0);
        assert_eq!(eval_body(&linear, &mut env, &buffers).unwrap(), 5.0);
    }

    #[test]
    fn reduce_sums_over_the_axis_extent() {
        let a = tensor_input("A", DataType::F32, &[4]);
        let body = reduce_sum(a.at(&["k"]), "k", 4);
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let strides = [1usize];
        let mut buffers: HashMap<&str, (&[f32], &[usize])> = HashMap::new();
        buffers.insert("A", (&data, &strides));
        let mut env = Vec::new();
        assert_eq!(eval_body(&body, &mut env, &buffers).unwrap(), 10.0);
    }

    #[test]
    fn out_of_bounds_load_is_an_error() {
        let load = ScalarExpr::Load {
            tensor: "A".into(),
            indices: vec![ScalarExpr::Const(9.0)],
        };
        let data = [0.0f32; 4];
        let strides = [1usize];
        let mut buffers: HashMap<&str, (&[f32], &[usize])> = HashMap::new();
        buffers.insert("A", (&data, &strides));
        assert!(eval_body(&load, &mut Vec::new(), &buffers).is_err());
    }

    #[test]
    fn coeffs_fold_dims_into_linear_addressing() {
        let map = OperandMap {
            tensor: "B".into(),
            dims: vec![IndexSource::Reduce, IndexSource::Output(1)],
        };
        let params = vec![ParamSpec {
            name: "B".into(),
            ty: TensorType::row_major(MemoryScope::Global, DataType::F32, &[8, 6]),
        }];
        let coeffs = contraction_coeffs(&map, &params).unwrap();
        // B[k, j] with strides [6, 1]: offset = 6k + j.
        assert_eq!(coeffs.offset(3, 2, 1), 8);
    }
}
