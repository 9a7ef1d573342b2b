//! Pipeline cache, descriptor model, pipeline layout and the compiled
//! pipeline.
//!
//! The descriptor model is fixed: set 0, binding 0 is one uniform buffer
//! read by the vertex stage. Rebuilding the pipeline reuses the cache and
//! the layouts; only the pipeline object itself is replaced.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use vkframe_rhi::buffer::Buffer;
use vkframe_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, uniform_buffer_binding, write_uniform_buffer,
};
use vkframe_rhi::pipeline::{
    GraphicsPipelineBuilder, Pipeline, PipelineCache, PipelineLayout, PipelineOptions,
    VertexInputLayout,
};
use vkframe_rhi::shader::Shader;
use vkframe_rhi::{GpuDevice, RhiError, RhiResult, vk};

/// Binding slot of the uniform buffer in set 0.
pub const UNIFORM_BINDING: u32 = 0;

/// Everything a draw needs besides the buffers.
pub struct PipelineResourceSet {
    device: Arc<dyn GpuDevice>,
    cache: PipelineCache,
    descriptor_set_layout: DescriptorSetLayout,
    layout: PipelineLayout,
    descriptor_pool: DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    pipeline: Option<Pipeline>,
}

impl PipelineResourceSet {
    /// Creates the cache (seeded from `cache_path` when it holds a valid
    /// blob), the descriptor set layout, the pipeline layout and a pool
    /// with the one descriptor set.
    pub fn new(device: Arc<dyn GpuDevice>, cache_path: Option<&Path>) -> RhiResult<Self> {
        let cache = PipelineCache::load(device.clone(), cache_path)?;

        let bindings = [uniform_buffer_binding(
            UNIFORM_BINDING,
            vk::ShaderStageFlags::VERTEX,
        )];
        let descriptor_set_layout = DescriptorSetLayout::new(device.clone(), &bindings)?;

        let layout = PipelineLayout::new(device.clone(), &[descriptor_set_layout.handle()])?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
        }];
        let descriptor_pool = DescriptorPool::new(device.clone(), 1, &pool_sizes)?;

        let descriptor_set = descriptor_pool
            .allocate(&[descriptor_set_layout.handle()])?
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidState("Descriptor pool returned no set".to_string()))?;

        debug!("Created pipeline resource set");

        Ok(Self {
            device,
            cache,
            descriptor_set_layout,
            layout,
            descriptor_pool,
            descriptor_set,
            pipeline: None,
        })
    }

    /// Compiles a pipeline for `render_pass` and replaces the current one.
    ///
    /// The previous pipeline is destroyed only after the new one exists, so
    /// a failed build leaves it in place. The caller must make sure no
    /// submitted work still uses it.
    pub fn build(
        &mut self,
        render_pass: vk::RenderPass,
        shaders: &[Shader],
        vertex_input: VertexInputLayout,
        options: PipelineOptions,
    ) -> RhiResult<()> {
        let pipeline = GraphicsPipelineBuilder::new(render_pass)
            .shaders(shaders)
            .vertex_input(vertex_input)
            .options(options)
            .build(self.device.clone(), &self.layout, &self.cache)?;

        if let Some(mut previous) = self.pipeline.replace(pipeline) {
            previous.destroy();
        }

        info!("Graphics pipeline built");
        Ok(())
    }

    /// Points the uniform binding at `buffer`.
    pub fn write_uniform(&self, buffer: &Buffer) {
        write_uniform_buffer(
            self.device.as_ref(),
            self.descriptor_set,
            UNIFORM_BINDING,
            buffer.handle(),
            buffer.size(),
        );
    }

    /// Current compiled pipeline, if one has been built.
    #[inline]
    pub fn pipeline(&self) -> Option<vk::Pipeline> {
        self.pipeline.as_ref().map(Pipeline::handle)
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    #[inline]
    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.descriptor_set_layout.handle()
    }

    #[inline]
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    #[inline]
    pub fn cache(&self) -> &PipelineCache {
        &self.cache
    }

    /// Writes the cache blob to `path`.
    pub fn save_cache(&self, path: &Path) -> RhiResult<()> {
        self.cache.save(path)
    }

    /// Destroys in reverse creation order: pipeline, pool (and with it the
    /// set), pipeline layout, descriptor set layout, cache.
    pub fn destroy(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.destroy();
        }
        self.descriptor_pool.destroy();
        self.descriptor_set = vk::DescriptorSet::null();
        self.layout.destroy();
        self.descriptor_set_layout.destroy();
        self.cache.destroy();
    }
}

impl Drop for PipelineResourceSet {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkframe_rhi::buffer::BufferUsage;
    use vkframe_rhi::mock::{Call, MockGpu, ResourceKind};
    use vkframe_rhi::shader::{SPIRV_MAGIC, ShaderStage};

    fn spirv() -> Vec<u8> {
        [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    fn shaders(device: &Arc<dyn GpuDevice>) -> Vec<Shader> {
        vec![
            Shader::from_spirv_bytes(device.clone(), &spirv(), ShaderStage::Vertex, "main")
                .unwrap(),
            Shader::from_spirv_bytes(device.clone(), &spirv(), ShaderStage::Fragment, "main")
                .unwrap(),
        ]
    }

    #[test]
    fn test_rebuild_reuses_cache_and_layouts() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let device: Arc<dyn GpuDevice> = gpu.clone();
        let mut resources = PipelineResourceSet::new(device.clone(), None).unwrap();

        resources
            .build(
                vk::RenderPass::null(),
                &shaders(&device),
                VertexInputLayout::default(),
                PipelineOptions::default(),
            )
            .unwrap();
        let first = resources.pipeline().unwrap();

        resources
            .build(
                vk::RenderPass::null(),
                &shaders(&device),
                VertexInputLayout::default(),
                PipelineOptions::default(),
            )
            .unwrap();

        assert_ne!(resources.pipeline().unwrap(), first);
        assert_eq!(journal.created(ResourceKind::PipelineCache).len(), 1);
        assert_eq!(journal.created(ResourceKind::PipelineLayout).len(), 1);
        assert_eq!(journal.destroyed(ResourceKind::Pipeline).len(), 1);

        let records = gpu.pipeline_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cache, records[1].cache);
    }

    #[test]
    fn test_failed_build_keeps_previous_pipeline() {
        let gpu = Arc::new(MockGpu::new());
        let device: Arc<dyn GpuDevice> = gpu.clone();
        let mut resources = PipelineResourceSet::new(device.clone(), None).unwrap();
        resources
            .build(
                vk::RenderPass::null(),
                &shaders(&device),
                VertexInputLayout::default(),
                PipelineOptions::default(),
            )
            .unwrap();
        let before = resources.pipeline();

        let vertex_only = vec![
            Shader::from_spirv_bytes(device.clone(), &spirv(), ShaderStage::Vertex, "main")
                .unwrap(),
        ];
        let result = resources.build(
            vk::RenderPass::null(),
            &vertex_only,
            VertexInputLayout::default(),
            PipelineOptions::default(),
        );

        assert!(matches!(result, Err(RhiError::Pipeline(_))));
        assert_eq!(resources.pipeline(), before);
    }

    #[test]
    fn test_write_uniform_updates_descriptor() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let device: Arc<dyn GpuDevice> = gpu.clone();
        let resources = PipelineResourceSet::new(device.clone(), None).unwrap();
        let uniform = Buffer::new(device, BufferUsage::Uniform, 64).unwrap();

        resources.write_uniform(&uniform);
        assert_eq!(
            journal.count(|c| matches!(c, Call::UpdateDescriptorSets(1))),
            1
        );
    }

    #[test]
    fn test_destroy_reverses_creation() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut resources = PipelineResourceSet::new(gpu, None).unwrap();
        resources.destroy();
        resources.destroy();

        let destroys: Vec<ResourceKind> = journal
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Destroy(kind, _) => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            destroys,
            vec![
                ResourceKind::DescriptorPool,
                ResourceKind::PipelineLayout,
                ResourceKind::DescriptorSetLayout,
                ResourceKind::PipelineCache,
            ]
        );
    }

    #[test]
    fn test_cache_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.cache");

        let gpu = Arc::new(MockGpu::new());
        let resources = PipelineResourceSet::new(gpu.clone(), Some(&path)).unwrap();
        resources.save_cache(&path).unwrap();
        let saved = std::fs::read(&path).unwrap();
        assert!(vkframe_rhi::pipeline::is_valid_cache_blob(&saved));

        let reloaded = PipelineResourceSet::new(gpu, Some(&path)).unwrap();
        assert_eq!(reloaded.cache().data().unwrap(), saved);
    }
}
