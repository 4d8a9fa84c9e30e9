// Capability negotiation and resource binding failures
//
// API call failures stay as anyhow errors with context; these are the cases
// where every call succeeded but the hardware cannot give us what we need.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("No Vulkan-capable GPU found")]
    NoPhysicalDevice,

    #[error("Queue family supporting graphics not found")]
    NoGraphicsQueueFamily,

    #[error("Required instance extension {0} is not available")]
    MissingInstanceExtension(String),

    #[error("No platform surface extension is available")]
    NoPlatformSurface,

    #[error("Required device extension {0} is not available")]
    MissingDeviceExtension(String),

    #[error("Queue family {family} cannot present to this surface")]
    PresentUnsupported { family: u32 },

    #[error("Surface reports no supported formats")]
    NoSurfaceFormats,

    #[error("Surface reports no supported present modes")]
    NoPresentModes,

    #[error("None of the candidate depth-stencil formats is supported")]
    NoDepthStencilFormat,

    #[error("No memory type in mask {type_bits:#034b} has {required:?}")]
    NoCompatibleMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },
}
