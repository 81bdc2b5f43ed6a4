//! Lowering passes applied to resolved modules.
//!
//! Each pass is a module-to-module transform; the pipeline order is fixed at
//! construction. Passes never reintroduce tunable parameters — resolved
//! modules have none by type.

use crate::expr::{BinaryOp, ScalarExpr};
use crate::module::{EntrySignature, ParamSpec, ResolvedModule};
use anyhow::{bail, Result};
use tracing::debug;

pub trait Pass {
    fn name(&self) -> &str;
    fn run(&self, module: &mut ResolvedModule) -> Result<()>;
}

/// Folds constant subexpressions and arithmetic identities (`x*1`, `x*0`,
/// `x+0`, `x/1`).
pub struct SimplifyConstExpr;

impl Pass for SimplifyConstExpr {
    fn name(&self) -> &str {
        "simplify-const-expr"
    }

    fn run(&self, module: &mut ResolvedModule) -> Result<()> {
        let compute = module.compute_mut();
        let body = std::mem::replace(&mut compute.body, ScalarExpr::Const(0.0));
        compute.body = simplify(body);
        debug!(pass = self.name(), module = module.name(), "simplified compute body");
        Ok(())
    }
}

/// Rewrites multi-dimensional loads into single linear-offset loads using the
/// parameter strides, so the backend can address flat buffers directly.
pub struct FlattenTensors;

impl Pass for FlattenTensors {
    fn name(&self) -> &str {
        "flatten-tensors"
    }

    fn run(&self, module: &mut ResolvedModule) -> Result<()> {
        let strides: Vec<(String, Vec<usize>)> = module
            .params()
            .iter()
            .map(|param| (param.name.clone(), param.ty.strides.clone()))
            .collect();
        let compute = module.compute_mut();
        let body = std::mem::replace(&mut compute.body, ScalarExpr::Const(0.0));
        compute.body = flatten(body, &strides)?;
        debug!(pass = self.name(), module = module.name(), "flattened tensor loads");
        Ok(())
    }
}

/// Attaches the packed entry-point signature the compiled artifact validates
/// call arguments against.
pub struct PackEntry;

impl Pass for PackEntry {
    fn name(&self) -> &str {
        "pack-entry"
    }

    fn run(&self, module: &mut ResolvedModule) -> Result<()> {
        let params: Vec<ParamSpec> = module.params().to_vec();
        let entry = EntrySignature {
            name: module.name().to_string(),
            params,
        };
        module.set_entry(entry);
        Ok(())
    }
}

pub struct PassPipeline {
    passes: Vec<Box<dyn Pass + Send + Sync>>,
}

impl PassPipeline {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn with_default_passes() -> Self {
        let mut pipeline = Self::new();
        pipeline.add_pass(SimplifyConstExpr);
        pipeline.add_pass(FlattenTensors);
        pipeline.add_pass(PackEntry);
        pipeline
    }

    pub fn add_pass<P>(&mut self, pass: P)
    where
        P: Pass + Send + Sync + 'static,
    {
        self.passes.push(Box::new(pass));
    }

    pub fn run(&self, module: &mut ResolvedModule) -> Result<()> {
        for pass in &self.passes {
            pass.run(module)?;
        }
        Ok(())
    }
}

impl Default for PassPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies the default pipeline and returns the lowered module.
pub fn lower(mut module: ResolvedModule) -> Result<ResolvedModule> {
    PassPipeline::with_default_passes().run(&mut module)?;
    Ok(module)
}

fn simplify(expr: ScalarExpr) -> ScalarExpr {
    match expr {
        ScalarExpr::Binary { op, lhs, rhs } => {
            let lhs = simplify(*lhs);
            let rhs = simplify(*rhs);
            if let (Some(a), Some(b)) = (lhs.as_const(), rhs.as_const()) {
                return ScalarExpr::Const(op.apply(a, b));
            }
            match (op, lhs.as_const(), rhs.as_const()) {
                (BinaryOp::Mul, _, Some(c)) if c == 1.0 => lhs,
                (BinaryOp::Mul, Some(c), _) if c == 1.0 => rhs,
                (BinaryOp::Mul, _, Some(c)) | (BinaryOp::Mul, Some(c), _) if c == 0.0 => {
                    ScalarExpr::Const(0.0)
                }
                (BinaryOp::Add, _, Some(c)) if c == 0.0 => lhs,
                (BinaryOp::Add, Some(c), _) if c == 0.0 => rhs,
                (BinaryOp::Sub, _, Some(c)) if c == 0.0 => lhs,
                (BinaryOp::Div, _, Some(c)) if c == 1.0 => lhs,
                _ => ScalarExpr::binary(op, lhs, rhs),
            }
        }
        ScalarExpr::Load { tensor, indices } => ScalarExpr::Load {
            tensor,
            indices: indices.into_iter().map(simplify).collect(),
        },
        ScalarExpr::Reduce {
            op,
            axis,
            extent,
            body,
        } => ScalarExpr::Reduce {
            op,
            axis,
            extent,
            body: Box::new(simplify(*body)),
        },
        other => other,
    }
}

fn flatten(expr: ScalarExpr, strides: &[(String, Vec<usize>)]) -> Result<ScalarExpr> {
    Ok(match expr {
        ScalarExpr::Load { tensor, indices } => {
            let tensor_strides = match strides.iter().find(|(name, _)| name == &tensor) {
                Some((_, s)) => s,
                None => bail!("load references unknown parameter '{}'", tensor),
            };
            if indices.len() <= 1 {
                // Already linear (or scalar); leave as-is.
                ScalarExpr::Load { tensor, indices }
            } else {
                let mut linear: Option<ScalarExpr> = None;
                for (index, stride) in indices.into_iter().zip(tensor_strides.iter()) {
                    let index = flatten(index, strides)?;
                    let term = simplify(ScalarExpr::binary(
                        BinaryOp::Mul,
                        index,
                        ScalarExpr::Const(*stride as f64),
                    ));
                    linear = Some(match linear {
                        Some(acc) => simplify(ScalarExpr::binary(BinaryOp::Add, acc, term)),
                        None => term,
                    });
                }
                ScalarExpr::Load {
                    tensor,
                    indices: vec![linear.unwrap_or(ScalarExpr::Const(0.0))],
                }
            }
        }
        ScalarExpr::Binary { op, lhs, rhs } => ScalarExpr::Binary {
            op,
            lhs: Box::new(flatten(*lhs, strides)?),
            rhs: Box::new(flatten(*rhs, strides)?),
        },
        ScalarExpr::Reduce {
            op,
            axis,
            extent,
            body,
        } => ScalarExpr::Reduce {
            op,
            axis,
            extent,
            body: Box::new(flatten(*body, strides)?),
        },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Schedule, UnresolvedModule};
    use crate::ops;
    use std::collections::BTreeMap;

    fn resolved_matmul() -> ResolvedModule {
        let task = ops::matmul(4, 6, 8).unwrap();
        UnresolvedModule::from_task(&task, Schedule::HostLoops, Vec::new())
            .bind(BTreeMap::new())
            .unwrap()
    }

    #[test]
    fn simplify_folds_constants_and_identities() {
        let expr = ScalarExpr::binary(
            BinaryOp::Add,
            ScalarExpr::binary(BinaryOp::Mul, ScalarExpr::var("i"), ScalarExpr::Const(1.0)),
            ScalarExpr::binary(BinaryOp::Mul, ScalarExpr::Const(2.0), ScalarExpr::Const(3.0)),
        );
        let folded = simplify(expr);
        assert_eq!(
            folded,
            ScalarExpr::binary(BinaryOp::Add, ScalarExpr::var("i"), ScalarExpr::Const(6.0))
        );
    }

    #[test]
    fn flatten_rewrites_loads_to_linear_offsets() {
        let mut module = resolved_matmul();
        FlattenTensors.run(&mut module).unwrap();
        // Every load in the lowered body addresses a single linear index.
        fn assert_flat(expr: &ScalarExpr) {
            match expr {
                ScalarExpr::Load { indices, .. } => assert_eq!(indices.len(), 1),
                ScalarExpr::Binary { lhs, rhs, .. } => {
                    assert_flat(lhs);
                    assert_flat(rhs);
                }
                ScalarExpr::Reduce { body, .. } => assert_flat(body),
                _ => {}
            }
        }
        assert_flat(&module.compute().body);
    }

    #[test]
    fn pack_entry_attaches_signature() {
        let mut module = resolved_matmul();
        assert!(module.entry().is_none());
        PackEntry.run(&mut module).unwrap();
        let entry = module.entry().unwrap();
        assert_eq!(entry.name, "matmul");
        assert_eq!(entry.params.len(), 3);
        assert_eq!(entry.params[2].name, "C");
    }

    #[test]
    fn default_pipeline_runs_all_passes() {
        let module = lower(resolved_matmul()).unwrap();
        assert!(module.entry().is_some());
    }
}
