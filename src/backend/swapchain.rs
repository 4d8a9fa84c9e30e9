// Swapchain - window presentation
//
// Negotiates the chain of presentable images against the surface. Each
// create call makes exactly one object; the caller owns its release.

use super::error::NegotiationError;
use super::negotiate;
use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;

/// What the driver reports for a (physical device, surface) pair
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(
        loader: &khr::Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .context("Failed to query surface capabilities")?,
                formats: loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .context("Failed to query surface formats")?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .context("Failed to query present modes")?,
            })
        }
    }
}

/// Negotiated swapchain parameters, immutable once chosen
#[derive(Debug, Clone, Copy)]
pub struct SwapchainSettings {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl SwapchainSettings {
    pub fn negotiate(
        support: &SurfaceSupport,
        width: u32,
        height: u32,
        requested_image_count: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self, NegotiationError> {
        let caps = &support.capabilities;
        Ok(Self {
            surface_format: negotiate::choose_surface_format(&support.formats)?,
            present_mode: negotiate::choose_present_mode(
                &support.present_modes,
                preferred_present_mode,
            )?,
            extent: negotiate::choose_extent(width, height, caps),
            image_count: negotiate::choose_image_count(requested_image_count, caps),
        })
    }
}

pub fn create_swapchain(
    loader: &khr::Swapchain,
    surface: vk::SurfaceKHR,
    settings: &SwapchainSettings,
) -> Result<vk::SwapchainKHR> {
    log::info!(
        "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
        settings.extent.width,
        settings.extent.height,
        settings.image_count,
        settings.surface_format.format,
        settings.present_mode
    );

    let create_info = vk::SwapchainCreateInfoKHR::builder()
        .surface(surface)
        .min_image_count(settings.image_count)
        .image_format(settings.surface_format.format)
        .image_color_space(settings.surface_format.color_space)
        .image_extent(settings.extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(settings.present_mode)
        .clipped(true);

    unsafe { loader.create_swapchain(&create_info, None) }.context("Failed to create swapchain")
}

/// The driver may hand back more images than requested
pub fn swapchain_images(
    loader: &khr::Swapchain,
    swapchain: vk::SwapchainKHR,
) -> Result<Vec<vk::Image>> {
    let images = unsafe { loader.get_swapchain_images(swapchain) }
        .context("Failed to get swapchain images")?;

    log::info!("Created swapchain with {} images", images.len());
    Ok(images)
}

/// A 2D view over the whole image with identity swizzle
pub fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }.context("Failed to create image view")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn support() -> SurfaceSupport {
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: vk::Extent2D {
                    width: 1024,
                    height: 768,
                },
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    #[test]
    fn negotiates_all_parameters_together() {
        let settings =
            SwapchainSettings::negotiate(&support(), 1280, 720, 2, vk::PresentModeKHR::MAILBOX)
                .unwrap();

        assert_eq!(settings.surface_format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(settings.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!((settings.extent.width, settings.extent.height), (1024, 768));
        assert_eq!(settings.image_count, 3);
    }

    #[test]
    fn negotiation_fails_without_formats() {
        let mut support = support();
        support.formats.clear();
        let result =
            SwapchainSettings::negotiate(&support, 1280, 720, 2, vk::PresentModeKHR::MAILBOX);
        assert!(matches!(result, Err(NegotiationError::NoSurfaceFormats)));
    }

    #[test]
    fn negotiation_fails_without_present_modes() {
        let mut support = support();
        support.present_modes.clear();
        let result =
            SwapchainSettings::negotiate(&support, 1280, 720, 2, vk::PresentModeKHR::MAILBOX);
        assert!(matches!(result, Err(NegotiationError::NoPresentModes)));
    }
}
