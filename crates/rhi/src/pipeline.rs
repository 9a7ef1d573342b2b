//! Graphics pipeline management.
//!
//! - [`PipelineCache`] owns the driver cache that survives pipeline
//!   rebuilds and can be persisted between runs.
//! - [`PipelineLayout`] binds descriptor set layouts to a pipeline.
//! - [`Pipeline`] owns the compiled graphics pipeline.
//! - [`GraphicsPipelineBuilder`] assembles the fixed-function state for a
//!   render-pass-based pipeline with dynamic viewport and scissor.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::backend::GpuDevice;
//! use vkframe_rhi::pipeline::{GraphicsPipelineBuilder, PipelineCache, PipelineLayout};
//! use vkframe_rhi::shader::Shader;
//! use vkframe_rhi::vertex::TriangleVertex;
//! use ash::vk;
//!
//! # fn example(
//! #     device: Arc<dyn GpuDevice>,
//! #     render_pass: vk::RenderPass,
//! #     vertex: &Shader,
//! #     fragment: &Shader,
//! # ) -> Result<(), vkframe_rhi::RhiError> {
//! let cache = PipelineCache::new(device.clone(), &[])?;
//! let layout = PipelineLayout::new(device.clone(), &[])?;
//!
//! let pipeline = GraphicsPipelineBuilder::new(render_pass)
//!     .shader(vertex)
//!     .shader(fragment)
//!     .vertex_input(TriangleVertex::input_layout())
//!     .build(device, &layout, &cache)?;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::backend::GpuDevice;
use crate::error::{RhiError, RhiResult};
use crate::shader::{Shader, ShaderStage};

/// Size of `VkPipelineCacheHeaderVersionOne`.
const CACHE_HEADER_SIZE: usize = 32;

/// Returns true when `blob` starts with a well-formed version-one cache
/// header.
///
/// Drivers reject incompatible caches themselves; this only screens out
/// truncated or foreign files before they reach the driver.
pub fn is_valid_cache_blob(blob: &[u8]) -> bool {
    if blob.len() < CACHE_HEADER_SIZE {
        return false;
    }
    let word = |i: usize| u32::from_le_bytes([blob[i], blob[i + 1], blob[i + 2], blob[i + 3]]);
    let header_length = word(0) as usize;
    let header_version = word(4);

    header_length >= CACHE_HEADER_SIZE
        && header_length <= blob.len()
        && header_version == vk::PipelineCacheHeaderVersion::ONE.as_raw() as u32
}

/// Owned pipeline cache.
pub struct PipelineCache {
    device: Arc<dyn GpuDevice>,
    cache: vk::PipelineCache,
}

impl PipelineCache {
    /// Creates a cache seeded with `initial_data`.
    ///
    /// Data that does not look like a pipeline cache is dropped with a
    /// warning and the cache starts empty.
    pub fn new(device: Arc<dyn GpuDevice>, initial_data: &[u8]) -> RhiResult<Self> {
        let seed = if initial_data.is_empty() || is_valid_cache_blob(initial_data) {
            initial_data
        } else {
            warn!(
                "Ignoring malformed pipeline cache data ({} bytes)",
                initial_data.len()
            );
            &[]
        };

        let cache = device.create_pipeline_cache(seed)?;
        debug!("Created pipeline cache ({} bytes seeded)", seed.len());

        Ok(Self { device, cache })
    }

    /// Creates a cache seeded from `path`, if given and readable.
    ///
    /// A missing file is silent; any other read failure is logged and
    /// ignored.
    pub fn load(device: Arc<dyn GpuDevice>, path: Option<&Path>) -> RhiResult<Self> {
        let data = match path {
            Some(path) => match std::fs::read(path) {
                Ok(bytes) => {
                    info!("Loaded pipeline cache from {:?}", path);
                    bytes
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
                Err(e) => {
                    warn!("Failed to read pipeline cache {:?}: {}", path, e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Self::new(device, &data)
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineCache {
        self.cache
    }

    /// Current cache contents.
    pub fn data(&self) -> RhiResult<Vec<u8>> {
        self.device.pipeline_cache_data(self.cache)
    }

    /// Writes the cache contents to `path`.
    pub fn save(&self, path: &Path) -> RhiResult<()> {
        let data = self.data()?;
        std::fs::write(path, &data)?;
        info!("Saved pipeline cache ({} bytes) to {:?}", data.len(), path);
        Ok(())
    }

    pub fn destroy(&mut self) {
        if self.cache != vk::PipelineCache::null() {
            self.device.destroy_pipeline_cache(self.cache);
            self.cache = vk::PipelineCache::null();
        }
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Owned pipeline layout.
pub struct PipelineLayout {
    device: Arc<dyn GpuDevice>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Self> {
        let create_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(descriptor_set_layouts);

        let layout = device.create_pipeline_layout(&create_info)?;

        debug!(
            "Created pipeline layout with {} descriptor set layout(s)",
            descriptor_set_layouts.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn destroy(&mut self) {
        if self.layout != vk::PipelineLayout::null() {
            self.device.destroy_pipeline_layout(self.layout);
            self.layout = vk::PipelineLayout::null();
        }
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Owned graphics pipeline.
pub struct Pipeline {
    device: Arc<dyn GpuDevice>,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn destroy(&mut self) {
        if self.pipeline != vk::Pipeline::null() {
            self.device.destroy_pipeline(self.pipeline);
            self.pipeline = vk::Pipeline::null();
            debug!("Pipeline destroyed");
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ============================================================================
// Pipeline state enums
// ============================================================================

/// Face culling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Winding order of front-facing triangles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    CounterClockwise,
    #[default]
    Clockwise,
}

impl FrontFace {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Depth comparison operator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompareOp {
    Less,
    #[default]
    LessOrEqual,
    Always,
}

impl CompareOp {
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

/// Per-use-case switches on top of the fixed pipeline state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Standard alpha blending on the color attachment.
    pub blend: bool,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_compare_op: CompareOp,
}

/// Color blend state for the single color attachment.
pub fn color_blend_attachment(blend: bool) -> vk::PipelineColorBlendAttachmentState {
    let state = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA);

    if blend {
        state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    } else {
        state
            .blend_enable(false)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ZERO)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    }
}

/// Stencil state that leaves the buffer untouched.
fn passthrough_stencil() -> vk::StencilOpState {
    vk::StencilOpState {
        fail_op: vk::StencilOp::KEEP,
        pass_op: vk::StencilOp::KEEP,
        depth_fail_op: vk::StencilOp::KEEP,
        compare_op: vk::CompareOp::ALWAYS,
        compare_mask: 0,
        write_mask: 0,
        reference: 0,
    }
}

/// Vertex buffer bindings and attributes consumed by a pipeline.
#[derive(Clone, Debug, Default)]
pub struct VertexInputLayout {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for render-pass-based graphics pipelines.
///
/// Fixed state: triangle list, fill, line width 1, single sample, one
/// color-blend attachment with RGBA writes, depth test and write enabled,
/// stencil disabled, viewport and scissor dynamic.
pub struct GraphicsPipelineBuilder<'a> {
    render_pass: vk::RenderPass,
    subpass: u32,
    shaders: Vec<&'a Shader>,
    vertex_input: VertexInputLayout,
    options: PipelineOptions,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new(render_pass: vk::RenderPass) -> Self {
        Self {
            render_pass,
            subpass: 0,
            shaders: Vec::new(),
            vertex_input: VertexInputLayout::default(),
            options: PipelineOptions::default(),
        }
    }

    /// Adds a shader stage.
    pub fn shader(mut self, shader: &'a Shader) -> Self {
        self.shaders.push(shader);
        self
    }

    /// Adds several shader stages.
    pub fn shaders(mut self, shaders: impl IntoIterator<Item = &'a Shader>) -> Self {
        self.shaders.extend(shaders);
        self
    }

    pub fn vertex_input(mut self, layout: VertexInputLayout) -> Self {
        self.vertex_input = layout;
        self
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the pipeline through `cache`.
    ///
    /// # Errors
    ///
    /// [`RhiError::Pipeline`] when the vertex or fragment stage is missing.
    pub fn build(
        self,
        device: Arc<dyn GpuDevice>,
        layout: &PipelineLayout,
        cache: &PipelineCache,
    ) -> RhiResult<Pipeline> {
        for required in [ShaderStage::Vertex, ShaderStage::Fragment] {
            if !self.shaders.iter().any(|s| s.stage() == required) {
                return Err(RhiError::Pipeline(format!(
                    "{} shader is required",
                    required
                )));
            }
        }

        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo<'_>> =
            self.shaders.iter().map(|s| s.stage_create_info()).collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_input.bindings)
            .vertex_attribute_descriptions(&self.vertex_input.attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are set per command buffer.
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.options.cull_mode.to_vk())
            .front_face(self.options.front_face.to_vk())
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(self.options.depth_compare_op.to_vk())
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .front(passthrough_stencil())
            .back(passthrough_stencil());

        let color_blend_attachments = [color_blend_attachment(self.options.blend)];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(self.render_pass)
            .subpass(self.subpass);

        let pipeline = device.create_graphics_pipeline(cache.handle(), &pipeline_info)?;

        info!(
            "Graphics pipeline created ({} stages, blend: {})",
            shader_stages.len(),
            self.options.blend
        );

        Ok(Pipeline { device, pipeline })
    }
}
