//! Vulkan device acquisition and presentation-surface lifecycle.
//!
//! Construction order is strict and teardown inverts it:
//!
//! ```text
//! GraphicsContext ──> PresentationSurface ──> FrameSync
//!   instance            OS window              command pool
//!   logical device      surface / swapchain    command buffer
//!   queue               depth-stencil          render-complete semaphore
//!   debug messenger     render pass / fbs
//! ```

pub mod audio;
pub mod backend;
pub mod config;
pub mod window;

pub use backend::{
    ContextApi, FrameDevice, FrameSync, GraphicsContext, NegotiationError, PresentationSurface,
    SurfaceApi, SurfaceOptions, SurfaceStage,
};
