//! Vulkan compute pipeline management

use std::ffi::CString;
use std::io::Cursor;

use ash::{vk, Device};

use super::context::VulkanContext;
use super::handles::{BoundDescriptorSet, Buffer, Pipeline};
use crate::BenchmarkError;

/// Native objects behind one kernel, destroyed by the owning context
#[derive(Debug, Default)]
pub(super) struct KernelObjects {
    shader_module: vk::ShaderModule,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
}

impl KernelObjects {
    /// # Safety
    ///
    /// No submission using these objects may still be executing.
    pub(super) unsafe fn destroy(self, device: &Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.pipeline_layout, None);
        device.destroy_descriptor_pool(self.descriptor_pool, None);
        device.destroy_descriptor_set_layout(self.set_layout, None);
        device.destroy_shader_module(self.shader_module, None);
    }
}

/// A compute pipeline with its storage buffers already bound in set 0
///
/// Buffer `i` of the list given at creation is visible to the shader as
/// `layout(set = 0, binding = i) buffer`.
#[derive(Debug, Clone, Copy)]
pub struct ComputeKernel {
    pub pipeline: Pipeline,
    pub descriptor_set: BoundDescriptorSet,
}

impl VulkanContext {
    /// Build a compute kernel from a SPIR-V module
    pub fn create_kernel(
        &self,
        spirv: &[u8],
        entry_point: &str,
        storage_buffers: &[Buffer],
    ) -> Result<ComputeKernel, BenchmarkError> {
        let code = ash::util::read_spv(&mut Cursor::new(spirv))
            .map_err(|e| BenchmarkError::ShaderLoad(format!("invalid SPIR-V: {}", e)))?;
        let entry = CString::new(entry_point)
            .map_err(|e| BenchmarkError::ShaderLoad(format!("invalid entry point: {}", e)))?;

        let mut objects = KernelObjects::default();
        let result = self.build_kernel(&mut objects, &code, &entry, storage_buffers);
        // Partially built objects are released with the context
        self.resources.borrow_mut().kernels.push(objects);
        result
    }

    fn build_kernel(
        &self,
        objects: &mut KernelObjects,
        code: &[u32],
        entry: &CString,
        storage_buffers: &[Buffer],
    ) -> Result<ComputeKernel, BenchmarkError> {
        let device = &self.device;

        let module_info = vk::ShaderModuleCreateInfo::builder().code(code);
        objects.shader_module = unsafe { device.create_shader_module(&module_info, None)? };

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..storage_buffers.len() as u32)
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
                    .build()
            })
            .collect();
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        objects.set_layout = unsafe { device.create_descriptor_set_layout(&set_layout_info, None)? };

        let set_layouts = [objects.set_layout];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        objects.pipeline_layout =
            unsafe { device.create_pipeline_layout(&pipeline_layout_info, None)? };

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(objects.shader_module)
            .name(entry.as_c_str());
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage.build())
            .layout(objects.pipeline_layout);
        let pipelines = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        }
        .map_err(|(_, result)| {
            BenchmarkError::PipelineCreation(format!("vkCreateComputePipelines returned {}", result))
        })?;
        objects.pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| BenchmarkError::PipelineCreation("no pipeline returned".to_string()))?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: (storage_buffers.len() as u32).max(1),
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        objects.descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None)? };

        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(objects.descriptor_pool)
            .set_layouts(&set_layouts);
        let set = unsafe { device.allocate_descriptor_sets(&alloc_info)? }
            .into_iter()
            .next()
            .ok_or_else(|| BenchmarkError::PipelineCreation("no descriptor set allocated".to_string()))?;

        let buffer_infos: Vec<vk::DescriptorBufferInfo> = storage_buffers
            .iter()
            .map(|buffer| vk::DescriptorBufferInfo {
                buffer: buffer.raw,
                offset: 0,
                range: vk::WHOLE_SIZE,
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = buffer_infos
            .iter()
            .enumerate()
            .map(|(binding, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
                    .build()
            })
            .collect();
        unsafe { device.update_descriptor_sets(&writes, &[]) };

        Ok(ComputeKernel {
            pipeline: Pipeline::new(objects.pipeline, objects.pipeline_layout),
            descriptor_set: BoundDescriptorSet::new(0, set),
        })
    }
}
