//! Unresolved and resolved modules.
//!
//! An implementer produces an [`UnresolvedModule`] whose schedule leaves a set
//! of tunable parameters open. [`UnresolvedModule::bind`] is the only way to
//! obtain a [`ResolvedModule`], so downstream code cannot consume a module
//! with open choices by accident.

use crate::error::{ModuleError, ValidationError};
use crate::expr::{ComputeTensor, TensorType};
use crate::task::{ContractionSpec, Task, TaskKind, Worker};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A named choice with a finite integer domain, left open by an implementer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunableParam {
    name: String,
    domain: Vec<i64>,
}

impl TunableParam {
    pub fn new(name: impl Into<String>, domain: Vec<i64>) -> Result<Self, ValidationError> {
        let name = name.into();
        if domain.is_empty() {
            return Err(ValidationError::EmptyDomain(name));
        }
        Ok(Self { name, domain })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &[i64] {
        &self.domain
    }
}

/// Loop strategy chosen by an implementer. Knob values live in the resolved
/// module's bindings, keyed by the names the implementer declared.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Schedule {
    HostLoops,
    GridNaive,
    GridSplit,
}

impl Schedule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schedule::HostLoops => "host-loops",
            Schedule::GridNaive => "grid-naive",
            Schedule::GridSplit => "grid-split",
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry-point parameter: tensor name plus its concrete type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: TensorType,
}

/// Packed entry-point signature attached by the lowering pipeline; the build
/// boundary checks call arguments against it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntrySignature {
    pub name: String,
    pub params: Vec<ParamSpec>,
}

/// IR module with open tunable choices. Created by exactly one implementer
/// call; consumed by exactly one resolution call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnresolvedModule {
    name: String,
    worker: Worker,
    params: Vec<ParamSpec>,
    compute: ComputeTensor,
    kind: TaskKind,
    contraction: Option<ContractionSpec>,
    schedule: Schedule,
    tunables: Vec<TunableParam>,
}

impl UnresolvedModule {
    pub fn from_task(task: &Task, schedule: Schedule, tunables: Vec<TunableParam>) -> Self {
        let mut params: Vec<ParamSpec> = task
            .inputs()
            .iter()
            .zip(task.param_types())
            .map(|(input, ty)| ParamSpec {
                name: input.name.clone(),
                ty: ty.clone(),
            })
            .collect();
        params.push(ParamSpec {
            name: task.compute().name.clone(),
            ty: task.param_types()[task.inputs().len()].clone(),
        });
        Self {
            name: task.name().to_string(),
            worker: task.worker(),
            params,
            compute: task.compute().clone(),
            kind: task.kind(),
            contraction: task.contraction().cloned(),
            schedule,
            tunables,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker(&self) -> Worker {
        self.worker
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn compute(&self) -> &ComputeTensor {
        &self.compute
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn contraction(&self) -> Option<&ContractionSpec> {
        self.contraction.as_ref()
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn tunables(&self) -> &[TunableParam] {
        &self.tunables
    }

    /// Render the module as IR text.
    pub fn to_text(&self) -> String {
        self.to_string()
    }

    /// Cartesian-product size of all tunable domains; `None` on overflow.
    pub fn search_space_size(&self) -> Option<u128> {
        self.tunables
            .iter()
            .try_fold(1u128, |acc, t| acc.checked_mul(t.domain().len() as u128))
    }

    /// Bind every tunable to a value from its domain. The sole conversion
    /// into a [`ResolvedModule`].
    pub fn bind(&self, bindings: BTreeMap<String, i64>) -> Result<ResolvedModule, ModuleError> {
        for (name, value) in &bindings {
            let tunable = self
                .tunables
                .iter()
                .find(|t| t.name() == name)
                .ok_or_else(|| ModuleError::UnknownTunable(name.clone()))?;
            if !tunable.domain().contains(value) {
                return Err(ModuleError::ValueOutOfDomain {
                    name: name.clone(),
                    value: *value,
                });
            }
        }
        for tunable in &self.tunables {
            if !bindings.contains_key(tunable.name()) {
                return Err(ModuleError::UnboundTunable(tunable.name().to_string()));
            }
        }
        Ok(ResolvedModule {
            name: self.name.clone(),
            worker: self.worker,
            params: self.params.clone(),
            compute: self.compute.clone(),
            kind: self.kind,
            contraction: self.contraction.clone(),
            schedule: self.schedule,
            bindings,
            entry: None,
        })
    }
}

impl fmt::Display for UnresolvedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {} (worker: {}) {{", self.name, self.worker)?;
        for param in &self.params {
            writeln!(
                f,
                "  param {}: {}{:?} @{}",
                param.name,
                param.ty.dtype.element_type(),
                param.ty.shape,
                param.ty.scope
            )?;
        }
        writeln!(f, "  {}", self.compute)?;
        writeln!(f, "  schedule: {}", self.schedule)?;
        for tunable in &self.tunables {
            writeln!(f, "  tunable {} in {:?}", tunable.name(), tunable.domain())?;
        }
        f.write_str("}")
    }
}

/// IR module with every tunable bound. Produced only by resolution; consumed
/// by the lowering pipeline and build boundary, never mutated after that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedModule {
    name: String,
    worker: Worker,
    params: Vec<ParamSpec>,
    compute: ComputeTensor,
    kind: TaskKind,
    contraction: Option<ContractionSpec>,
    schedule: Schedule,
    bindings: BTreeMap<String, i64>,
    entry: Option<EntrySignature>,
}

impl ResolvedModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker(&self) -> Worker {
        self.worker
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn compute(&self) -> &ComputeTensor {
        &self.compute
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn contraction(&self) -> Option<&ContractionSpec> {
        self.contraction.as_ref()
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn bindings(&self) -> &BTreeMap<String, i64> {
        &self.bindings
    }

    pub fn binding(&self, name: &str) -> Option<i64> {
        self.bindings.get(name).copied()
    }

    /// Render the module as IR text.
    pub fn to_text(&self) -> String {
        self.to_string()
    }

    pub fn entry(&self) -> Option<&EntrySignature> {
        self.entry.as_ref()
    }

    pub(crate) fn compute_mut(&mut self) -> &mut ComputeTensor {
        &mut self.compute
    }

    pub(crate) fn set_entry(&mut self, entry: EntrySignature) {
        self.entry = Some(entry);
    }
}

impl fmt::Display for ResolvedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {} (worker: {}) {{", self.name, self.worker)?;
        writeln!(f, "  {}", self.compute)?;
        writeln!(f, "  schedule: {}", self.schedule)?;
        for (name, value) in &self.bindings {
            writeln!(f, "  bind {} = {}", name, value)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops;

    fn sample_module() -> UnresolvedModule {
        let task = ops::matmul(8, 8, 8).unwrap();
        let tunables = vec![
            TunableParam::new("tile_m", vec![2, 4]).unwrap(),
            TunableParam::new("tile_n", vec![2, 4, 8]).unwrap(),
        ];
        UnresolvedModule::from_task(&task, Schedule::GridSplit, tunables)
    }

    #[test]
    fn empty_domain_is_rejected() {
        let err = TunableParam::new("tile_m", vec![]).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyDomain(name) if name == "tile_m"));
    }

    #[test]
    fn search_space_is_domain_product() {
        assert_eq!(sample_module().search_space_size(), Some(6));
    }

    #[test]
    fn bind_rejects_out_of_domain_values() {
        let module = sample_module();
        let mut bindings = BTreeMap::new();
        bindings.insert("tile_m".to_string(), 3);
        bindings.insert("tile_n".to_string(), 2);
        let err = module.bind(bindings).unwrap_err();
        assert!(matches!(err, ModuleError::ValueOutOfDomain { value: 3, .. }));
    }

    #[test]
    fn bind_rejects_unknown_and_missing_tunables() {
        let module = sample_module();
        let mut bindings = BTreeMap::new();
        bindings.insert("tile_q".to_string(), 2);
        assert!(matches!(
            module.bind(bindings).unwrap_err(),
            ModuleError::UnknownTunable(_)
        ));

        let mut partial = BTreeMap::new();
        partial.insert("tile_m".to_string(), 2);
        assert!(matches!(
            module.bind(partial).unwrap_err(),
            ModuleError::UnboundTunable(name) if name == "tile_n"
        ));
    }

    #[test]
    fn module_without_tunables_binds_trivially() {
        let task = ops::matmul(4, 4, 4).unwrap();
        let module = UnresolvedModule::from_task(&task, Schedule::HostLoops, Vec::new());
        assert_eq!(module.search_space_size(), Some(1));
        let resolved = module.bind(BTreeMap::new()).unwrap();
        assert!(resolved.bindings().is_empty());
        assert_eq!(resolved.schedule(), Schedule::HostLoops);
    }
}
