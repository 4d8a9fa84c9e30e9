// OS window - winit behind a create / pump / close contract
//
// The frame loop owns iteration, so events are pumped once per frame with
// `pump_app_events` instead of handing control to `run_app`.

use anyhow::{Context, Result};
use raw_window_handle::{
    HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle,
};
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

/// Pumps allowed while waiting for the platform to deliver `resumed`
const CREATE_PUMP_LIMIT: usize = 100;
const CREATE_PUMP_TIMEOUT: Duration = Duration::from_millis(10);

/// Handler state fed by the event loop
struct WindowState {
    pending: Option<WindowAttributes>,
    window: Option<Window>,
    create_error: Option<winit::error::OsError>,
    should_run: bool,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(attributes) = self.pending.take() else {
            return;
        };

        match event_loop.create_window(attributes) {
            Ok(window) => self.window = Some(window),
            Err(e) => {
                self.create_error = Some(e);
                self.should_run = false;
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.should_run = false;
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.should_run = false;
                }
            }

            WindowEvent::Resized(size) => {
                // No swapchain recreation path: the surface keeps its negotiated extent
                log::debug!("Window resized to {}x{}", size.width, size.height);
            }

            _ => {}
        }
    }
}

/// A native window plus the event loop that drives it
pub struct OsWindow {
    // Field order: the window is destroyed before its event loop
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl OsWindow {
    pub fn create(width: u32, height: u32, title: &str) -> Result<Self> {
        log::info!("Creating window: {}x{} ({})", width, height, title);

        let mut event_loop = EventLoop::new().context("Failed to create event loop")?;
        let mut state = WindowState {
            pending: Some(
                WindowAttributes::default()
                    .with_title(title)
                    .with_inner_size(winit::dpi::PhysicalSize::new(width, height)),
            ),
            window: None,
            create_error: None,
            should_run: true,
        };

        for _ in 0..CREATE_PUMP_LIMIT {
            let status = event_loop.pump_app_events(Some(CREATE_PUMP_TIMEOUT), &mut state);

            if let Some(e) = state.create_error.take() {
                return Err(e).context("Failed to create window");
            }
            if state.window.is_some() {
                break;
            }
            if let PumpStatus::Exit(code) = status {
                anyhow::bail!("Event loop exited with code {} before window creation", code);
            }
        }

        if state.window.is_none() {
            anyhow::bail!("Platform never resumed the event loop, no window created");
        }

        Ok(Self { state, event_loop })
    }

    /// Drain pending OS events; false once a close has been requested
    pub fn pump_events(&mut self) -> bool {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);

        if let PumpStatus::Exit(code) = status {
            log::debug!("Event loop exited with code {}", code);
            self.state.should_run = false;
        }

        self.state.should_run
    }

    /// Mark the window for shutdown. Idempotent.
    pub fn close(&mut self) {
        self.state.should_run = false;
    }

    pub fn should_run(&self) -> bool {
        self.state.should_run
    }

    pub fn set_title(&self, title: &str) {
        if let Some(window) = &self.state.window {
            window.set_title(title);
        }
    }

    /// Native handles for surface creation
    pub fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let window = self.state.window.as_ref().context("Window not created")?;
        Ok((window.raw_display_handle(), window.raw_window_handle()))
    }
}

impl Drop for OsWindow {
    fn drop(&mut self) {
        self.state.window = None;
        log::info!("Window destroyed");
    }
}
