// =============================================================================
// LAGOM VULKAN - clear-screen demo of the context/surface lifecycle
// =============================================================================
//
// FRAME FLOW:
// 1. update()        pump OS events, stop when the window closes
// 2. begin_render()  acquire the next swapchain image
// 3. record          one render pass that clears depth and color
// 4. submit          no waits, signal the render-complete semaphore
// 5. end_render()    present, waiting on that semaphore
//
// SHUTDOWN: frame resources (queue drained first) -> surface -> context
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use lagom_renderer::audio::AudioService;
use lagom_renderer::config::Config;
use lagom_renderer::{FrameSync, GraphicsContext, PresentationSurface, SurfaceOptions};
use std::f32::consts::TAU;
use std::time::Instant;

const CIRCLE_THIRD: f32 = TAU / 3.0;
const STARTUP_SOUND: u32 = 0;

fn main() {
    let (config, source) = Config::load();
    init_logging(&config);
    source.log();
    log::debug!("Config: {:?}", config);

    if let Err(e) = run(&config) {
        log::error!("Fatal: {:?}", e);
        std::process::exit(1);
    }
}

/// Initialize logging; RUST_LOG overrides the configured level
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_env(Env::default());
    builder.init();
}

fn run(config: &Config) -> Result<()> {
    log::info!("Starting Lagom Vulkan");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        config.window.title
    );

    let mut audio = AudioService::new();

    let context = GraphicsContext::new(&config.window.title, config.diagnostics_enabled())?;
    let mut surface = PresentationSurface::new(
        &context,
        config.window.width,
        config.window.height,
        &config.window.title,
        SurfaceOptions {
            image_count: config.graphics.swapchain_image_count,
            present_mode: config.present_mode(),
        },
    )?;
    let frame = FrameSync::new(&context)?;

    audio.audio().play_sound(STARTUP_SOUND);

    let mut color_rotation = 0.0f32;
    let mut fps = FpsCounter::new();

    while surface.update() {
        surface.begin_render()?;

        color_rotation += config.graphics.clear_color_speed;
        record_clear_pass(&context, &surface, frame.command_buffer(), color_rotation)?;

        frame.submit()?;
        surface.end_render(&[frame.render_complete()])?;

        if let Some(rate) = fps.tick() {
            if config.debug.show_fps {
                surface
                    .window()
                    .set_title(&format!("{} - {} FPS", config.window.title, rate));
            }
            log::debug!("FPS: {}", rate);
        }
    }

    audio.audio().stop_sound(STARTUP_SOUND);

    // Drains the queue before destroying the semaphore and pool
    frame.shutdown()?;
    drop(surface);
    drop(context);

    log::info!("Cleanup complete");
    Ok(())
}

/// Clear values in render-pass slot order: depth-stencil, then color
fn clear_values(rotation: f32) -> [vk::ClearValue; 2] {
    let channel = |offset: f32| (rotation + offset).sin() * 0.5 + 0.5;

    [
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [
                    channel(0.0),
                    channel(CIRCLE_THIRD),
                    channel(CIRCLE_THIRD * 2.0),
                    1.0,
                ],
            },
        },
    ]
}

fn record_clear_pass(
    context: &GraphicsContext,
    surface: &PresentationSurface,
    cmd: vk::CommandBuffer,
    rotation: f32,
) -> Result<()> {
    let device = context.device();
    let clear_values = clear_values(rotation);

    let begin_info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    let render_pass_info = vk::RenderPassBeginInfo::builder()
        .render_pass(surface.render_pass())
        .framebuffer(surface.active_framebuffer())
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: surface.extent(),
        })
        .clear_values(&clear_values);

    unsafe {
        device
            .begin_command_buffer(cmd, &begin_info)
            .context("Failed to begin command buffer")?;
        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_end_render_pass(cmd);
        device
            .end_command_buffer(cmd)
            .context("Failed to end command buffer")?;
    }

    Ok(())
}

struct FpsCounter {
    frames: u64,
    last_update: Instant,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            frames: 0,
            last_update: Instant::now(),
        }
    }

    /// Frames counted over the last second, once per second
    fn tick(&mut self) -> Option<u64> {
        self.frames += 1;
        if self.last_update.elapsed().as_secs_f32() < 1.0 {
            return None;
        }

        let rate = self.frames;
        self.frames = 0;
        self.last_update = Instant::now();
        Some(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_color_channels_stay_in_range() {
        for step in 0..64 {
            let values = clear_values(step as f32 * 0.1);
            let color = unsafe { values[1].color.float32 };
            assert!(color.iter().all(|c| (0.0..=1.0).contains(c)));
            assert_eq!(color[3], 1.0);
        }
    }

    #[test]
    fn depth_cleared_to_far_plane() {
        let values = clear_values(0.0);
        let depth = unsafe { values[0].depth_stencil };
        assert_eq!(depth.depth, 1.0);
        assert_eq!(depth.stencil, 0);
    }

    #[test]
    fn fps_counter_waits_a_second() {
        let mut counter = FpsCounter::new();
        assert_eq!(counter.tick(), None);
        assert_eq!(counter.frames, 1);
    }
}
