// Depth-stencil attachment
//
// One image shared by every swapchain image. Format comes from a scan of
// DEPTH_STENCIL_CANDIDATES against `format_supported`.

use super::negotiate;
use anyhow::{Context, Result};
use ash::vk;

#[derive(Debug, Clone, Copy)]
pub struct DepthStencil {
    pub format: vk::Format,
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub stencil_available: bool,
}

/// Whether `format` works as an optimal-tiling depth-stencil attachment
pub fn format_supported(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    format: vk::Format,
) -> bool {
    let props =
        unsafe { instance.get_physical_device_format_properties(physical_device, format) };
    props
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
}

/// Subresource aspects for a depth format, stencil included when present
pub fn aspect_mask(stencil_available: bool) -> vk::ImageAspectFlags {
    if stencil_available {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

pub fn create_image(
    device: &ash::Device,
    format: vk::Format,
    extent: vk::Extent2D,
) -> Result<vk::Image> {
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        .samples(vk::SampleCountFlags::TYPE_1)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    unsafe { device.create_image(&image_info, None) }.context("Failed to create depth-stencil image")
}

/// Device-local memory sized and typed for `image`. Not bound yet.
pub fn allocate_memory(
    device: &ash::Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    image: vk::Image,
) -> Result<vk::DeviceMemory> {
    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let memory_type_index = negotiate::find_memory_type_index(
        memory_properties,
        &requirements,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe { device.allocate_memory(&alloc_info, None) }
        .context("Failed to allocate depth-stencil memory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stencil_aspect_only_when_available() {
        assert_eq!(
            aspect_mask(true),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_mask(false), vk::ImageAspectFlags::DEPTH);
    }
}
