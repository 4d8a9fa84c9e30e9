// Backend module - Vulkan context and presentation
//
// Dependency order: GraphicsContext <- PresentationSurface <- frame loop.
// Teardown runs the other way.

pub mod debug;
pub mod depth;
pub mod device;
pub mod error;
pub mod negotiate;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod teardown;

pub use device::{ContextApi, GraphicsContext};
pub use error::NegotiationError;
pub use surface::{PresentationSurface, SurfaceApi, SurfaceOptions, SurfaceStage};
pub use sync::{FrameDevice, FrameSync};
