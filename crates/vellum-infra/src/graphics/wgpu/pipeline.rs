// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Program records and the render/compute pipeline caches.
//!
//! Every binding lives in bind group 0. Its binding number is derived from the
//! reflected kind and unit so WGSL sources can be written against a fixed
//! scheme:
//!
//! | kind              | binding        |
//! |-------------------|----------------|
//! | constant buffer   | `unit`         |
//! | texture           | `16 + unit`    |
//! | sampler           | `32 + unit`    |
//! | structured buffer | `48 + unit`    |

use super::conversions::shader_stages;
use std::collections::HashMap;
use vellum_core::desc::{BindingKind, ShaderBinding, ShaderStage, ShaderStages, TextureFormat};
use vellum_core::native::{ProgramId, ShaderId};
use vellum_core::NativeError;

/// First binding number of each resource kind.
pub const TEXTURE_BINDING_BASE: u32 = 16;
pub const SAMPLER_BINDING_BASE: u32 = 32;
pub const STRUCTURED_BINDING_BASE: u32 = 48;

/// Binding number of a reflected binding inside group 0.
pub fn binding_index(binding: &ShaderBinding) -> u32 {
    match binding.kind {
        BindingKind::ConstantBuffer => binding.unit,
        BindingKind::Texture { .. } => TEXTURE_BINDING_BASE + binding.unit,
        BindingKind::Sampler { .. } => SAMPLER_BINDING_BASE + binding.unit,
        BindingKind::StructuredBuffer => STRUCTURED_BINDING_BASE + binding.unit,
    }
}

#[derive(Debug)]
pub(crate) struct ShaderEntry {
    pub module: wgpu::ShaderModule,
    pub stage: ShaderStage,
    pub entry_point: String,
}

#[derive(Debug)]
pub(crate) struct ProgramEntry {
    pub vertex: Option<ShaderId>,
    pub pixel: Option<ShaderId>,
    pub compute: Option<ShaderId>,
    pub bindings: Vec<ShaderBinding>,
}

impl ProgramEntry {
    pub fn is_compute(&self) -> bool {
        self.compute.is_some()
    }
}

/// How the texture bound at a unit is sampled. Derived per draw from the
/// texture actually bound, since reflection does not see sample counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TextureSampling {
    pub sample_type: wgpu::TextureSampleType,
    pub multisampled: bool,
}

impl Default for TextureSampling {
    fn default() -> Self {
        Self {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            multisampled: false,
        }
    }
}

impl TextureSampling {
    pub fn for_texture(format: TextureFormat, sample_count: u32, depth_binding: bool) -> Self {
        let multisampled = sample_count > 1;
        let sample_type = match format {
            TextureFormat::Depth32Float | TextureFormat::Depth24Stencil8 if depth_binding => {
                wgpu::TextureSampleType::Depth
            }
            TextureFormat::Rgba32Uint | TextureFormat::R32Uint => wgpu::TextureSampleType::Uint,
            TextureFormat::Depth32Float
            | TextureFormat::Depth24Stencil8
            | TextureFormat::R32Float
            | TextureFormat::Rgba32Float => wgpu::TextureSampleType::Float { filterable: false },
            _ => wgpu::TextureSampleType::Float {
                filterable: !multisampled,
            },
        };
        Self {
            sample_type,
            multisampled,
        }
    }

    pub fn filterable(&self) -> bool {
        matches!(
            self.sample_type,
            wgpu::TextureSampleType::Float { filterable: true }
        )
    }
}

/// Builds the group-0 layout entries of a program.
///
/// `sampling(unit, depth)` reports how the texture at a unit is currently
/// bound. Bindings reflected by several stages are merged into one entry.
pub(crate) fn layout_entries(
    bindings: &[ShaderBinding],
    default_stages: ShaderStages,
    sampling: impl Fn(u32, bool) -> TextureSampling,
) -> Vec<wgpu::BindGroupLayoutEntry> {
    let depth_at = |unit: u32| {
        bindings.iter().any(|b| {
            b.unit == unit && matches!(b.kind, BindingKind::Texture { depth: true, .. })
        })
    };
    let mut entries: Vec<wgpu::BindGroupLayoutEntry> = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let stages = if binding.stages.is_empty() {
            default_stages
        } else {
            binding.stages
        };
        let index = binding_index(binding);
        if let Some(existing) = entries.iter_mut().find(|e| e.binding == index) {
            existing.visibility |= shader_stages(stages);
            continue;
        }
        let ty = match binding.kind {
            BindingKind::ConstantBuffer => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::StructuredBuffer => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::Texture { kind, depth } => {
                let bound = sampling(binding.unit, depth);
                let view_dimension = if bound.multisampled {
                    wgpu::TextureViewDimension::D2
                } else {
                    super::conversions::IntoWgpu::into_wgpu(kind)
                };
                wgpu::BindingType::Texture {
                    sample_type: bound.sample_type,
                    view_dimension,
                    multisampled: bound.multisampled,
                }
            }
            BindingKind::Sampler { comparison } => {
                let ty = if comparison {
                    wgpu::SamplerBindingType::Comparison
                } else if sampling(binding.unit, depth_at(binding.unit)).filterable() {
                    wgpu::SamplerBindingType::Filtering
                } else {
                    wgpu::SamplerBindingType::NonFiltering
                };
                wgpu::BindingType::Sampler(ty)
            }
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index,
            visibility: shader_stages(stages),
            ty,
            count: None,
        });
    }
    entries.sort_by_key(|e| e.binding);
    entries
}

/// One vertex buffer slot of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct VertexBufferKey {
    pub stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

/// Everything a render pipeline depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RenderPipelineKey {
    pub program: ProgramId,
    pub layout: Vec<wgpu::BindGroupLayoutEntry>,
    pub vertex_buffers: Vec<VertexBufferKey>,
    pub primitive: wgpu::PrimitiveState,
    pub depth_stencil: Option<wgpu::DepthStencilState>,
    pub colour_targets: Vec<Option<wgpu::ColorTargetState>>,
    pub sample_count: u32,
    pub alpha_to_coverage: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ComputePipelineKey {
    pub program: ProgramId,
    pub layout: Vec<wgpu::BindGroupLayoutEntry>,
}

#[derive(Debug, Clone)]
pub(crate) struct Layout {
    pub bind_group: wgpu::BindGroupLayout,
    pipeline: wgpu::PipelineLayout,
}

/// Caches layouts and pipelines keyed by the state that produced them.
#[derive(Debug, Default)]
pub(crate) struct PipelineCache {
    layouts: HashMap<Vec<wgpu::BindGroupLayoutEntry>, Layout>,
    render: HashMap<RenderPipelineKey, wgpu::RenderPipeline>,
    compute: HashMap<ComputePipelineKey, wgpu::ComputePipeline>,
}

impl PipelineCache {
    pub fn layout(
        &mut self,
        device: &wgpu::Device,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Layout {
        if let Some(layout) = self.layouts.get(entries) {
            return layout.clone();
        }
        let bind_group = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Vellum Program Bind Group Layout"),
            entries,
        });
        let pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Vellum Program Pipeline Layout"),
            bind_group_layouts: &[&bind_group],
            immediate_size: 0,
        });
        let layout = Layout {
            bind_group,
            pipeline,
        };
        self.layouts.insert(entries.to_vec(), layout.clone());
        layout
    }

    pub fn render_pipeline(
        &mut self,
        device: &wgpu::Device,
        key: RenderPipelineKey,
        program: &ProgramEntry,
        shaders: &HashMap<ShaderId, ShaderEntry>,
    ) -> Result<wgpu::RenderPipeline, NativeError> {
        if let Some(pipeline) = self.render.get(&key) {
            return Ok(pipeline.clone());
        }
        let vertex = program
            .vertex
            .and_then(|id| shaders.get(&id))
            .ok_or_else(|| NativeError::UnknownId(format!("vertex shader of {:?}", key.program)))?;
        let pixel = match program.pixel {
            Some(id) => Some(
                shaders
                    .get(&id)
                    .ok_or_else(|| NativeError::UnknownId(format!("{id:?}")))?,
            ),
            None => None,
        };
        let layout = self.layout(device, &key.layout);
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = key
            .vertex_buffers
            .iter()
            .map(|vb| wgpu::VertexBufferLayout {
                array_stride: vb.stride,
                step_mode: vb.step_mode,
                attributes: &vb.attributes,
            })
            .collect();

        log::debug!("WgpuDevice: Creating render pipeline for {:?}", key.program);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Vellum Render Pipeline"),
            layout: Some(&layout.pipeline),
            vertex: wgpu::VertexState {
                module: &vertex.module,
                entry_point: Some(&vertex.entry_point),
                buffers: &buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: pixel.map(|ps| wgpu::FragmentState {
                module: &ps.module,
                entry_point: Some(&ps.entry_point),
                targets: &key.colour_targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: key.primitive,
            depth_stencil: key.depth_stencil.clone(),
            multisample: wgpu::MultisampleState {
                count: key.sample_count,
                mask: !0,
                alpha_to_coverage_enabled: key.alpha_to_coverage,
            },
            multiview_mask: None,
            cache: None,
        });
        self.render.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    pub fn compute_pipeline(
        &mut self,
        device: &wgpu::Device,
        key: ComputePipelineKey,
        program: &ProgramEntry,
        shaders: &HashMap<ShaderId, ShaderEntry>,
    ) -> Result<wgpu::ComputePipeline, NativeError> {
        if let Some(pipeline) = self.compute.get(&key) {
            return Ok(pipeline.clone());
        }
        let compute = program
            .compute
            .and_then(|id| shaders.get(&id))
            .ok_or_else(|| {
                NativeError::UnknownId(format!("compute shader of {:?}", key.program))
            })?;
        let layout = self.layout(device, &key.layout);
        log::debug!("WgpuDevice: Creating compute pipeline for {:?}", key.program);
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Vellum Compute Pipeline"),
            layout: Some(&layout.pipeline),
            module: &compute.module,
            entry_point: Some(&compute.entry_point),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        self.compute.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    /// Drops every pipeline built from `program`.
    pub fn evict_program(&mut self, program: ProgramId) {
        self.render.retain(|key, _| key.program != program);
        self.compute.retain(|key, _| key.program != program);
    }

    pub fn render_pipeline_count(&self) -> usize {
        self.render.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::desc::TextureKind;

    fn binding(kind: BindingKind, unit: u32, stages: ShaderStages) -> ShaderBinding {
        ShaderBinding { kind, unit, stages }
    }

    #[test]
    fn test_binding_numbers_follow_kind_ranges() {
        let tex = binding(
            BindingKind::Texture {
                kind: TextureKind::D2,
                depth: false,
            },
            3,
            ShaderStages::PIXEL,
        );
        assert_eq!(binding_index(&tex), 19);
        let cb = binding(BindingKind::ConstantBuffer, 2, ShaderStages::VERTEX);
        assert_eq!(binding_index(&cb), 2);
        let sb = binding(BindingKind::StructuredBuffer, 0, ShaderStages::COMPUTE);
        assert_eq!(binding_index(&sb), 48);
    }

    #[test]
    fn test_bindings_shared_by_stages_merge_visibility() {
        let bindings = [
            binding(BindingKind::ConstantBuffer, 0, ShaderStages::VERTEX),
            binding(BindingKind::ConstantBuffer, 0, ShaderStages::PIXEL),
        ];
        let entries = layout_entries(&bindings, ShaderStages::VERTEX, |_, _| {
            TextureSampling::default()
        });
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].visibility,
            wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT
        );
    }

    #[test]
    fn test_multisampled_depth_binding_is_unfilterable() {
        let bindings = [
            binding(
                BindingKind::Texture {
                    kind: TextureKind::D2,
                    depth: true,
                },
                0,
                ShaderStages::PIXEL,
            ),
            binding(
                BindingKind::Sampler { comparison: false },
                0,
                ShaderStages::PIXEL,
            ),
        ];
        let sampling = TextureSampling::for_texture(TextureFormat::Depth24Stencil8, 4, true);
        let entries = layout_entries(&bindings, ShaderStages::PIXEL, |_, _| sampling);
        assert_eq!(
            entries[0].ty,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Depth,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: true,
            }
        );
        assert_eq!(
            entries[1].ty,
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering)
        );
    }

    #[test]
    fn test_float32_textures_pair_with_non_filtering_samplers() {
        let sampling = TextureSampling::for_texture(TextureFormat::Rgba32Float, 1, false);
        assert_eq!(
            sampling.sample_type,
            wgpu::TextureSampleType::Float { filterable: false }
        );
        let colour = TextureSampling::for_texture(TextureFormat::Rgba8Unorm, 1, false);
        assert!(colour.filterable());
    }
}
