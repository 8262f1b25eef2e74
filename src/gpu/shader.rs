//! Shader program compilation, linking, and reflection.
//!
//! Each stage is parsed and validated on its own with `naga`, so a failure
//! names the stage and carries the rendered diagnostic. Linking then checks
//! that the stages agree on their shared interface and collects the active
//! resource bindings into a [`ProgramLayout`]. Only a program that passes all
//! of this, including the caller's [`BindingRequirements`], reaches the
//! backend.

use std::fmt;

use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use tracing::{debug, info};

use crate::error::{BackendError, RenderError, ShaderError};
use crate::gpu::backend::ProgramHandle;
use crate::gpu::context::RenderContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    fn naga(self) -> naga::ShaderStage {
        match self {
            Self::Vertex => naga::ShaderStage::Vertex,
            Self::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Uniform,
    Texture,
    Sampler,
    Attribute,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uniform => "uniform",
            Self::Texture => "texture",
            Self::Sampler => "sampler",
            Self::Attribute => "vertex attribute",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceSlot {
    pub group: u32,
    pub binding: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    UniformBuffer { size: u64 },
    Texture,
    Sampler,
}

impl ResourceKind {
    fn binding_kind(self) -> BindingKind {
        match self {
            Self::UniformBuffer { .. } => BindingKind::Uniform,
            Self::Texture => BindingKind::Texture,
            Self::Sampler => BindingKind::Sampler,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBinding {
    pub name: String,
    pub slot: ResourceSlot,
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub name: String,
    pub location: u32,
    pub components: u32,
}

/// What a linked program exposes: active resources, vertex inputs, entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramLayout {
    resources: Vec<ResourceBinding>,
    attributes: Vec<VertexAttribute>,
    vertex_entry: String,
    fragment_entry: String,
}

impl ProgramLayout {
    /// Sorted by (group, binding).
    pub fn resources(&self) -> &[ResourceBinding] {
        &self.resources
    }

    /// Sorted by location.
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceBinding> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn vertex_entry(&self) -> &str {
        &self.vertex_entry
    }

    pub fn fragment_entry(&self) -> &str {
        &self.fragment_entry
    }
}

/// Names a program must expose after linking, each with its expected kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingRequirements {
    expected: Vec<(BindingKind, String)>,
}

impl BindingRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uniform(self, name: impl Into<String>) -> Self {
        self.with(BindingKind::Uniform, name)
    }

    pub fn texture(self, name: impl Into<String>) -> Self {
        self.with(BindingKind::Texture, name)
    }

    pub fn sampler(self, name: impl Into<String>) -> Self {
        self.with(BindingKind::Sampler, name)
    }

    pub fn attribute(self, name: impl Into<String>) -> Self {
        self.with(BindingKind::Attribute, name)
    }

    fn with(mut self, kind: BindingKind, name: impl Into<String>) -> Self {
        self.expected.push((kind, name.into()));
        self
    }

    pub fn check(&self, layout: &ProgramLayout) -> Result<(), ShaderError> {
        for (kind, name) in &self.expected {
            let present = match kind {
                BindingKind::Attribute => layout.attribute(name).is_some(),
                _ => layout
                    .resource(name)
                    .is_some_and(|r| r.kind.binding_kind() == *kind),
            };
            if !present {
                return Err(ShaderError::MissingBinding {
                    kind: *kind,
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }
}

struct CompiledStage {
    module: naga::Module,
    info: ModuleInfo,
    entry: usize,
}

impl CompiledStage {
    fn entry_point(&self) -> &naga::EntryPoint {
        &self.module.entry_points[self.entry]
    }
}

fn compile_stage(stage: ShaderStage, source: &str) -> Result<CompiledStage, ShaderError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| ShaderError::Compile {
        stage,
        diagnostic: err.emit_to_string(source),
    })?;
    // Only what every device offers without optional features.
    let info = Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .map_err(|err| ShaderError::Compile {
            stage,
            diagnostic: err.emit_to_string(source),
        })?;
    let entry = module
        .entry_points
        .iter()
        .position(|ep| ep.stage == stage.naga())
        .ok_or_else(|| ShaderError::Compile {
            stage,
            diagnostic: format!("no @{stage} entry point"),
        })?;
    Ok(CompiledStage {
        module,
        info,
        entry,
    })
}

struct InterfaceVar {
    name: String,
    location: u32,
    inner: naga::TypeInner,
}

fn collect_locations(
    module: &naga::Module,
    name: Option<&String>,
    ty: naga::Handle<naga::Type>,
    binding: Option<&naga::Binding>,
    out: &mut Vec<InterfaceVar>,
) {
    match binding {
        Some(naga::Binding::Location { location, .. }) => out.push(InterfaceVar {
            name: name.cloned().unwrap_or_default(),
            location: *location,
            inner: module.types[ty].inner.clone(),
        }),
        Some(naga::Binding::BuiltIn(_)) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(
                        module,
                        member.name.as_ref(),
                        member.ty,
                        member.binding.as_ref(),
                        out,
                    );
                }
            }
        }
    }
}

fn stage_inputs(stage: &CompiledStage) -> Vec<InterfaceVar> {
    let mut out = Vec::new();
    for arg in &stage.entry_point().function.arguments {
        collect_locations(
            &stage.module,
            arg.name.as_ref(),
            arg.ty,
            arg.binding.as_ref(),
            &mut out,
        );
    }
    out
}

fn stage_outputs(stage: &CompiledStage) -> Vec<InterfaceVar> {
    let mut out = Vec::new();
    if let Some(result) = &stage.entry_point().function.result {
        collect_locations(
            &stage.module,
            None,
            result.ty,
            result.binding.as_ref(),
            &mut out,
        );
    }
    out
}

fn components(inner: &naga::TypeInner) -> u32 {
    match inner {
        naga::TypeInner::Scalar(_) => 1,
        naga::TypeInner::Vector { size, .. } => *size as u32,
        _ => 0,
    }
}

fn active_resources(
    stage: ShaderStage,
    compiled: &CompiledStage,
) -> Result<Vec<ResourceBinding>, ShaderError> {
    let module = &compiled.module;
    let usage = compiled.info.get_entry_point(compiled.entry);
    let mut out = Vec::new();
    for (handle, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        if usage[handle].is_empty() {
            continue;
        }
        let name = var.name.clone().ok_or_else(|| ShaderError::Link {
            log: format!(
                "{stage} stage: unnamed resource at group {} binding {}",
                binding.group, binding.binding
            ),
        })?;
        let inner = &module.types[var.ty].inner;
        let kind = match (var.space, inner) {
            (naga::AddressSpace::Uniform, _) => ResourceKind::UniformBuffer {
                size: u64::from(inner.size(module.to_ctx())),
            },
            (naga::AddressSpace::Handle, naga::TypeInner::Image { .. }) => ResourceKind::Texture,
            (naga::AddressSpace::Handle, naga::TypeInner::Sampler { .. }) => ResourceKind::Sampler,
            (space, _) => {
                return Err(ShaderError::Link {
                    log: format!("{stage} stage: `{name}` uses unsupported address space {space:?}"),
                });
            }
        };
        out.push(ResourceBinding {
            name,
            slot: ResourceSlot {
                group: binding.group,
                binding: binding.binding,
            },
            kind,
        });
    }
    Ok(out)
}

fn link(vertex: &CompiledStage, fragment: &CompiledStage) -> Result<ProgramLayout, ShaderError> {
    let produced = stage_outputs(vertex);
    for input in stage_inputs(fragment) {
        let Some(output) = produced.iter().find(|o| o.location == input.location) else {
            return Err(ShaderError::Link {
                log: format!(
                    "fragment input `{}` at location {} is not written by the vertex stage",
                    input.name, input.location
                ),
            });
        };
        if output.inner != input.inner {
            return Err(ShaderError::Link {
                log: format!(
                    "location {} type mismatch: vertex writes {:?}, fragment reads {:?}",
                    input.location, output.inner, input.inner
                ),
            });
        }
    }

    let mut resources = active_resources(ShaderStage::Vertex, vertex)?;
    for resource in active_resources(ShaderStage::Fragment, fragment)? {
        let clash = resources
            .iter()
            .find(|r| r.name == resource.name || r.slot == resource.slot);
        match clash {
            Some(existing) if *existing == resource => {}
            Some(existing) => {
                return Err(ShaderError::Link {
                    log: format!(
                        "`{}` at {:?} conflicts with `{}` at {:?}",
                        resource.name, resource.slot, existing.name, existing.slot
                    ),
                });
            }
            None => resources.push(resource),
        }
    }
    resources.sort_by_key(|r| r.slot);
    if let Some(outside) = resources.iter().find(|r| r.slot.group != 0) {
        return Err(ShaderError::Link {
            log: format!(
                "`{}` is bound in group {}; programs expose a single bind group 0",
                outside.name, outside.slot.group
            ),
        });
    }

    let mut attributes: Vec<VertexAttribute> = stage_inputs(vertex)
        .into_iter()
        .map(|input| VertexAttribute {
            components: components(&input.inner),
            name: input.name,
            location: input.location,
        })
        .collect();
    attributes.sort_by_key(|a| a.location);

    Ok(ProgramLayout {
        resources,
        attributes,
        vertex_entry: vertex.entry_point().name.clone(),
        fragment_entry: fragment.entry_point().name.clone(),
    })
}

/// Compiles and links both stages and checks `requirements`, without touching the GPU.
pub fn validate(
    vertex: &str,
    fragment: &str,
    requirements: &BindingRequirements,
) -> Result<ProgramLayout, ShaderError> {
    let vertex = compile_stage(ShaderStage::Vertex, vertex)?;
    let fragment = compile_stage(ShaderStage::Fragment, fragment)?;
    let layout = link(&vertex, &fragment)?;
    requirements.check(&layout)?;
    Ok(layout)
}

/// Builds a program on the context's backend.
///
/// Nothing is created on the GPU unless both stages compile, the program
/// links, and every required binding is present.
pub fn compile(
    ctx: &mut RenderContext,
    label: &str,
    vertex: &str,
    fragment: &str,
    requirements: &BindingRequirements,
) -> Result<ProgramHandle, RenderError> {
    let backend = ctx.backend()?;
    let layout = validate(vertex, fragment, requirements)?;
    debug!(
        label,
        resources = layout.resources().len(),
        attributes = layout.attributes().len(),
        "shader program validated"
    );
    let handle = backend
        .create_program(label, vertex, fragment, &layout)
        .map_err(|err| match err {
            BackendError::Other(msg) => RenderError::Shader(ShaderError::Backend(msg)),
            other => RenderError::Backend(other),
        })?;
    info!(label, %handle, "shader program linked");
    Ok(handle)
}

pub fn delete(ctx: &mut RenderContext, program: ProgramHandle) -> Result<(), RenderError> {
    ctx.backend()?.delete_program(program)?;
    debug!(%program, "shader program deleted");
    Ok(())
}
