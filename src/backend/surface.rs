// Presentation surface - window, swapchain and render target
//
// Init is a linear chain; each stage consumes the previous stage's negotiated
// parameters. Every object is registered on the release stack as soon as it
// exists, so a failure at any stage unwinds exactly what was built.
//
// `assemble` runs the chain against `SurfaceApi`; `VulkanSurfaceApi` is the
// driver-backed implementation used by `PresentationSurface`.

use super::depth::{self, DepthStencil};
use super::error::NegotiationError;
use super::negotiate::{self, DEPTH_STENCIL_CANDIDATES};
use super::render_pass;
use super::swapchain::{self, SurfaceSupport, SwapchainSettings};
use super::teardown::ReleaseStack;
use super::GraphicsContext;
use crate::window::OsWindow;
use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::{vk, Entry};

/// Init stages, in order. There is no way back to an earlier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SurfaceStage {
    Uninitialized,
    OsWindowCreated,
    SurfaceBound,
    SurfaceCapabilitiesQueried,
    SwapchainCreated,
    SwapchainImagesViewed,
    DepthStencilProvisioned,
    RenderPassBuilt,
    FramebuffersBuilt,
    AcquireFenceCreated,
}

impl SurfaceStage {
    pub const READY: SurfaceStage = SurfaceStage::AcquireFenceCreated;

    pub fn next(self) -> Option<SurfaceStage> {
        use SurfaceStage::*;
        match self {
            Uninitialized => Some(OsWindowCreated),
            OsWindowCreated => Some(SurfaceBound),
            SurfaceBound => Some(SurfaceCapabilitiesQueried),
            SurfaceCapabilitiesQueried => Some(SwapchainCreated),
            SwapchainCreated => Some(SwapchainImagesViewed),
            SwapchainImagesViewed => Some(DepthStencilProvisioned),
            DepthStencilProvisioned => Some(RenderPassBuilt),
            RenderPassBuilt => Some(FramebuffersBuilt),
            FramebuffersBuilt => Some(AcquireFenceCreated),
            AcquireFenceCreated => None,
        }
    }

    fn advance(&mut self) {
        if let Some(next) = self.next() {
            log::debug!("Presentation surface: {:?} -> {:?}", self, next);
            *self = next;
        }
    }
}

/// Surface-side settings the caller controls
#[derive(Debug, Clone, Copy)]
pub struct SurfaceOptions {
    pub image_count: u32,
    pub present_mode: vk::PresentModeKHR,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            image_count: 2,
            present_mode: vk::PresentModeKHR::MAILBOX,
        }
    }
}

/// OS and driver calls made while assembling a presentation surface
pub trait SurfaceApi: Clone + 'static {
    type Window;

    fn create_window(&self, width: u32, height: u32, title: &str) -> Result<Self::Window>;
    fn create_surface(&self, window: &Self::Window) -> Result<vk::SurfaceKHR>;
    fn destroy_surface(&self, surface: vk::SurfaceKHR);
    /// Queue family that must be able to present
    fn present_family(&self) -> u32;
    fn present_supported(&self, surface: vk::SurfaceKHR) -> Result<bool>;
    fn query_support(&self, surface: vk::SurfaceKHR) -> Result<SurfaceSupport>;

    fn create_swapchain(
        &self,
        surface: vk::SurfaceKHR,
        settings: &SwapchainSettings,
    ) -> Result<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    fn depth_format_supported(&self, format: vk::Format) -> bool;
    fn create_depth_image(&self, format: vk::Format, extent: vk::Extent2D) -> Result<vk::Image>;
    fn destroy_image(&self, image: vk::Image);
    fn allocate_image_memory(&self, image: vk::Image) -> Result<vk::DeviceMemory>;
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> Result<()>;
    fn free_memory(&self, memory: vk::DeviceMemory);

    fn create_render_pass(
        &self,
        depth_format: vk::Format,
        color_format: vk::Format,
    ) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: [vk::ImageView; 2],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    fn create_fence(&self) -> Result<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
}

/// Everything `assemble` built.
///
/// Field order matters: the release stack empties before the window drops.
pub struct SurfaceChain<A: SurfaceApi> {
    pub resources: ReleaseStack,

    pub surface: vk::SurfaceKHR,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub settings: SwapchainSettings,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub depth_stencil: DepthStencil,
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub image_available: vk::Fence,

    pub window: A::Window,
}

/// Build the chain stage by stage, advancing `stage` after each one
pub fn assemble<A: SurfaceApi>(
    api: &A,
    width: u32,
    height: u32,
    title: &str,
    options: SurfaceOptions,
    stage: &mut SurfaceStage,
) -> Result<SurfaceChain<A>> {
    let window = api.create_window(width, height, title)?;
    stage.advance();

    // Declared after `window`: on failure, GPU objects go before the window
    let mut resources = ReleaseStack::new("presentation surface");

    // ── Surface ─────────────────────────────────────────────────────────
    let surface = api.create_surface(&window)?;
    resources.push_with("surface", api.clone(), move |api| {
        api.destroy_surface(surface)
    });

    if !api.present_supported(surface)? {
        return Err(NegotiationError::PresentUnsupported {
            family: api.present_family(),
        }
        .into());
    }
    stage.advance();

    // ── Negotiation ─────────────────────────────────────────────────────
    let support = api.query_support(surface)?;
    let settings = SwapchainSettings::negotiate(
        &support,
        width,
        height,
        options.image_count,
        options.present_mode,
    )?;
    stage.advance();

    // ── Swapchain ───────────────────────────────────────────────────────
    log::info!(
        "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
        settings.extent.width,
        settings.extent.height,
        settings.image_count,
        settings.surface_format.format,
        settings.present_mode
    );
    let swapchain = api.create_swapchain(surface, &settings)?;
    resources.push_with("swapchain", api.clone(), move |api| {
        api.destroy_swapchain(swapchain)
    });
    stage.advance();

    let images = api.swapchain_images(swapchain)?;
    let mut image_views = Vec::with_capacity(images.len());
    for &image in &images {
        let view = api.create_image_view(
            image,
            settings.surface_format.format,
            vk::ImageAspectFlags::COLOR,
        )?;
        resources.push_with("swapchain image view", api.clone(), move |api| {
            api.destroy_image_view(view)
        });
        image_views.push(view);
    }
    stage.advance();

    // ── Depth-stencil ───────────────────────────────────────────────────
    let depth_format = negotiate::choose_depth_stencil_format(&DEPTH_STENCIL_CANDIDATES, |f| {
        api.depth_format_supported(f)
    })?;
    let stencil_available = negotiate::has_stencil_component(depth_format);
    log::info!("Depth-stencil format: {:?}", depth_format);

    let depth_image = api.create_depth_image(depth_format, settings.extent)?;
    resources.push_with("depth-stencil image", api.clone(), move |api| {
        api.destroy_image(depth_image)
    });

    let depth_memory = api.allocate_image_memory(depth_image)?;
    resources.push_with("depth-stencil memory", api.clone(), move |api| {
        api.free_memory(depth_memory)
    });
    api.bind_image_memory(depth_image, depth_memory)?;

    let depth_view = api.create_image_view(
        depth_image,
        depth_format,
        depth::aspect_mask(stencil_available),
    )?;
    resources.push_with("depth-stencil view", api.clone(), move |api| {
        api.destroy_image_view(depth_view)
    });

    let depth_stencil = DepthStencil {
        format: depth_format,
        image: depth_image,
        memory: depth_memory,
        view: depth_view,
        stencil_available,
    };
    stage.advance();

    // ── Render target ───────────────────────────────────────────────────
    let render_pass = api.create_render_pass(depth_format, settings.surface_format.format)?;
    resources.push_with("render pass", api.clone(), move |api| {
        api.destroy_render_pass(render_pass)
    });
    stage.advance();

    let mut framebuffers = Vec::with_capacity(image_views.len());
    for &color_view in &image_views {
        let framebuffer =
            api.create_framebuffer(render_pass, [depth_view, color_view], settings.extent)?;
        resources.push_with("framebuffer", api.clone(), move |api| {
            api.destroy_framebuffer(framebuffer)
        });
        framebuffers.push(framebuffer);
    }
    stage.advance();

    let image_available = api.create_fence()?;
    resources.push_with("image acquire fence", api.clone(), move |api| {
        api.destroy_fence(image_available)
    });
    stage.advance();

    log::info!(
        "Presentation surface ready: {}x{}, {} images, stencil {}",
        settings.extent.width,
        settings.extent.height,
        images.len(),
        if stencil_available { "available" } else { "unavailable" }
    );

    Ok(SurfaceChain {
        resources,
        surface,
        capabilities: support.capabilities,
        settings,
        swapchain,
        images,
        image_views,
        depth_stencil,
        render_pass,
        framebuffers,
        image_available,
        window,
    })
}

/// `SurfaceApi` over a live graphics context
#[derive(Clone)]
pub struct VulkanSurfaceApi {
    entry: Entry,
    instance: ash::Instance,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    graphics_family_index: u32,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    surface_loader: khr::Surface,
    swapchain_loader: khr::Swapchain,
}

impl VulkanSurfaceApi {
    pub fn new(context: &GraphicsContext) -> Self {
        Self {
            entry: context.entry().clone(),
            instance: context.instance().clone(),
            device: context.device().clone(),
            physical_device: context.physical_device(),
            graphics_family_index: context.graphics_family_index(),
            memory_properties: *context.memory_properties(),
            surface_loader: khr::Surface::new(context.entry(), context.instance()),
            swapchain_loader: khr::Swapchain::new(context.instance(), context.device()),
        }
    }
}

impl SurfaceApi for VulkanSurfaceApi {
    type Window = OsWindow;

    fn create_window(&self, width: u32, height: u32, title: &str) -> Result<OsWindow> {
        OsWindow::create(width, height, title)
    }

    fn create_surface(&self, window: &OsWindow) -> Result<vk::SurfaceKHR> {
        let (display_handle, window_handle) = window.raw_handles()?;
        unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .context("Failed to create window surface")
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        unsafe { self.surface_loader.destroy_surface(surface, None) }
    }

    fn present_family(&self) -> u32 {
        self.graphics_family_index
    }

    fn present_supported(&self, surface: vk::SurfaceKHR) -> Result<bool> {
        unsafe {
            self.surface_loader.get_physical_device_surface_support(
                self.physical_device,
                self.graphics_family_index,
                surface,
            )
        }
        .context("Failed to query surface support")
    }

    fn query_support(&self, surface: vk::SurfaceKHR) -> Result<SurfaceSupport> {
        SurfaceSupport::query(&self.surface_loader, self.physical_device, surface)
    }

    fn create_swapchain(
        &self,
        surface: vk::SurfaceKHR,
        settings: &SwapchainSettings,
    ) -> Result<vk::SwapchainKHR> {
        swapchain::create_swapchain(&self.swapchain_loader, surface, settings)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        swapchain::swapchain_images(&self.swapchain_loader, swapchain)
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        swapchain::create_image_view(&self.device, image, format, aspect_mask)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn depth_format_supported(&self, format: vk::Format) -> bool {
        depth::format_supported(&self.instance, self.physical_device, format)
    }

    fn create_depth_image(&self, format: vk::Format, extent: vk::Extent2D) -> Result<vk::Image> {
        depth::create_image(&self.device, format, extent)
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    fn allocate_image_memory(&self, image: vk::Image) -> Result<vk::DeviceMemory> {
        depth::allocate_memory(&self.device, &self.memory_properties, image)
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> Result<()> {
        unsafe { self.device.bind_image_memory(image, memory, 0) }
            .context("Failed to bind depth-stencil memory")
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    fn create_render_pass(
        &self,
        depth_format: vk::Format,
        color_format: vk::Format,
    ) -> Result<vk::RenderPass> {
        render_pass::create_render_pass(&self.device, depth_format, color_format)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: [vk::ImageView; 2],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        render_pass::create_framebuffer(&self.device, render_pass, attachments, extent)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_fence(&self) -> Result<vk::Fence> {
        let fence_info = vk::FenceCreateInfo::builder();
        unsafe { self.device.create_fence(&fence_info, None) }
            .context("Failed to create image acquire fence")
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }
}

/// One window and everything needed to present into it.
///
/// Borrows its [`GraphicsContext`], so the context cannot be dropped first.
pub struct PresentationSurface<'ctx> {
    context: &'ctx GraphicsContext,
    api: VulkanSurfaceApi,
    chain: SurfaceChain<VulkanSurfaceApi>,

    active_image: u32,
    stage: SurfaceStage,
    reported_suboptimal: bool,
}

impl<'ctx> PresentationSurface<'ctx> {
    pub fn new(
        context: &'ctx GraphicsContext,
        width: u32,
        height: u32,
        title: &str,
        options: SurfaceOptions,
    ) -> Result<Self> {
        let api = VulkanSurfaceApi::new(context);
        let mut stage = SurfaceStage::Uninitialized;
        let chain = assemble(&api, width, height, title, options, &mut stage).with_context(|| {
            format!("Presentation surface init failed after reaching {:?}", stage)
        })?;

        Ok(Self {
            context,
            api,
            chain,
            active_image: 0,
            stage,
            reported_suboptimal: false,
        })
    }

    /// Pump OS events; false once the window should stop running
    pub fn update(&mut self) -> bool {
        self.chain.window.pump_events()
    }

    /// Mark for shutdown. GPU resources are only released on drop.
    pub fn close(&mut self) {
        self.chain.window.close();
    }

    /// Acquire the next swapchain image and make it the active target.
    ///
    /// Blocks until the image is available and the queue is idle, so the
    /// single command buffer and semaphore can be reused safely.
    pub fn begin_render(&mut self) -> Result<u32> {
        let device = self.context.device();
        let fence = self.chain.image_available;

        let (index, suboptimal) = unsafe {
            self.api.swapchain_loader.acquire_next_image(
                self.chain.swapchain,
                u64::MAX,
                vk::Semaphore::null(),
                fence,
            )
        }
        .context("Failed to acquire swapchain image")?;

        unsafe {
            device
                .wait_for_fences(&[fence], true, u64::MAX)
                .context("Failed waiting for image acquire fence")?;
            device
                .reset_fences(&[fence])
                .context("Failed to reset image acquire fence")?;
            device
                .queue_wait_idle(self.context.queue())
                .context("Queue wait idle failed")?;
        }

        self.note_suboptimal(suboptimal);
        self.active_image = index;
        Ok(index)
    }

    /// Present the active image once `wait_semaphores` are signalled
    pub fn end_render(&mut self, wait_semaphores: &[vk::Semaphore]) -> Result<()> {
        let swapchains = [self.chain.swapchain];
        let image_indices = [self.active_image];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe {
            self.api
                .swapchain_loader
                .queue_present(self.context.queue(), &present_info)
        }
        .context("Failed to present swapchain image")?;

        self.note_suboptimal(suboptimal);
        Ok(())
    }

    fn note_suboptimal(&mut self, suboptimal: bool) {
        if suboptimal && !self.reported_suboptimal {
            log::debug!("Swapchain is suboptimal for the surface; no recreation path, continuing");
            self.reported_suboptimal = true;
        }
    }

    pub fn window(&self) -> &OsWindow {
        &self.chain.window
    }

    pub fn stage(&self) -> SurfaceStage {
        self.stage
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.chain.surface
    }

    pub fn capabilities(&self) -> &vk::SurfaceCapabilitiesKHR {
        &self.chain.capabilities
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.chain.swapchain
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.chain.render_pass
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.chain.settings.extent
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.chain.settings.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.chain.settings.present_mode
    }

    pub fn image_count(&self) -> usize {
        self.chain.images.len()
    }

    pub fn depth_stencil_format(&self) -> vk::Format {
        self.chain.depth_stencil.format
    }

    pub fn stencil_available(&self) -> bool {
        self.chain.depth_stencil.stencil_available
    }

    pub fn active_image(&self) -> u32 {
        self.active_image
    }

    pub fn active_image_view(&self) -> vk::ImageView {
        self.chain.image_views[self.active_image as usize]
    }

    pub fn active_framebuffer(&self) -> vk::Framebuffer {
        self.chain.framebuffers[self.active_image as usize]
    }
}

impl Drop for PresentationSurface<'_> {
    fn drop(&mut self) {
        log::info!("Destroying presentation surface...");

        // The swapchain and fence may still be in use by the queue
        let context = self.context;
        let drained = self.chain.resources.release_after(|| {
            unsafe { context.device().queue_wait_idle(context.queue()) }
                .context("Cannot destroy the presentation surface while the queue is busy")
        });

        if let Err(e) = drained {
            log::error!("Fatal: {:?}", e);
            std::process::abort();
        }
    }
}
