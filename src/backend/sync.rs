// Frame loop resources
//
// One command pool, one command buffer, one render-complete semaphore,
// reused every frame. Submission signals the semaphore; presentation waits
// on it. Teardown drains the queue before anything is destroyed.

use super::GraphicsContext;
use anyhow::{Context, Result};
use ash::vk;

/// Device operations the frame loop needs
pub trait FrameDevice {
    fn create_command_pool(&self) -> Result<vk::CommandPool>;
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer>;
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    /// Submit with no wait semaphores and `signal` as the only signal
    fn submit(&self, command_buffer: vk::CommandBuffer, signal: vk::Semaphore) -> Result<()>;
    fn queue_wait_idle(&self) -> Result<()>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn destroy_command_pool(&self, pool: vk::CommandPool);
}

impl FrameDevice for GraphicsContext {
    fn create_command_pool(&self) -> Result<vk::CommandPool> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(self.graphics_family_index())
            // TRANSIENT: re-recorded every frame
            // RESET: the single buffer is reset on each begin
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            );

        unsafe { self.device().create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device().allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffer")?;
        buffers
            .first()
            .copied()
            .context("Driver returned no command buffer")
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device().create_semaphore(&semaphore_info, None) }
            .context("Failed to create semaphore")
    }

    fn submit(&self, command_buffer: vk::CommandBuffer, signal: vk::Semaphore) -> Result<()> {
        let command_buffers = [command_buffer];
        let signal_semaphores = [signal];

        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device()
                .queue_submit(self.queue(), &[submit_info.build()], vk::Fence::null())
        }
        .context("Failed to submit command buffer")
    }

    fn queue_wait_idle(&self) -> Result<()> {
        unsafe { self.device().queue_wait_idle(self.queue()) }.context("Queue wait idle failed")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device().destroy_semaphore(semaphore, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        // Also frees the command buffer
        unsafe { self.device().destroy_command_pool(pool, None) }
    }
}

/// Per-frame synchronization, shared by every frame
pub struct FrameSync<'a, D: FrameDevice = GraphicsContext> {
    device: &'a D,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    render_complete: vk::Semaphore,
    released: bool,
}

impl<'a, D: FrameDevice> FrameSync<'a, D> {
    pub fn new(device: &'a D) -> Result<Self> {
        let command_pool = device.create_command_pool()?;

        let command_buffer = match device.allocate_command_buffer(command_pool) {
            Ok(buffer) => buffer,
            Err(e) => {
                device.destroy_command_pool(command_pool);
                return Err(e);
            }
        };

        let render_complete = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_command_pool(command_pool);
                return Err(e);
            }
        };

        Ok(Self {
            device,
            command_pool,
            command_buffer,
            render_complete,
            released: false,
        })
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Signalled when the last submission completes
    pub fn render_complete(&self) -> vk::Semaphore {
        self.render_complete
    }

    pub fn submit(&self) -> Result<()> {
        self.device.submit(self.command_buffer, self.render_complete)
    }

    /// Drain the queue, then destroy. If the drain fails the handles are
    /// left alive: destroying them while in use would be undefined.
    pub fn shutdown(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        self.device
            .queue_wait_idle()
            .context("Cannot destroy frame resources while the queue is busy")?;

        self.device.destroy_semaphore(self.render_complete);
        self.device.destroy_command_pool(self.command_pool);
        Ok(())
    }
}

impl<D: FrameDevice> Drop for FrameSync<'_, D> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("Fatal: {:?}", e);
            std::process::abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct MockDevice {
        calls: RefCell<Vec<&'static str>>,
        fail_idle: Cell<bool>,
        fail_semaphore: Cell<bool>,
    }

    impl MockDevice {
        fn record(&self, call: &'static str) {
            self.calls.borrow_mut().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.borrow().clone()
        }

        fn position(&self, call: &str) -> usize {
            self.calls
                .borrow()
                .iter()
                .position(|c| *c == call)
                .unwrap_or_else(|| panic!("{call} was never called"))
        }
    }

    impl FrameDevice for MockDevice {
        fn create_command_pool(&self) -> Result<vk::CommandPool> {
            self.record("create_command_pool");
            Ok(vk::CommandPool::from_raw(1))
        }

        fn allocate_command_buffer(&self, _pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
            self.record("allocate_command_buffer");
            Ok(vk::CommandBuffer::from_raw(2))
        }

        fn create_semaphore(&self) -> Result<vk::Semaphore> {
            self.record("create_semaphore");
            if self.fail_semaphore.get() {
                anyhow::bail!("out of device memory");
            }
            Ok(vk::Semaphore::from_raw(3))
        }

        fn submit(&self, command_buffer: vk::CommandBuffer, signal: vk::Semaphore) -> Result<()> {
            assert_eq!(command_buffer.as_raw(), 2);
            assert_eq!(signal.as_raw(), 3);
            self.record("submit");
            Ok(())
        }

        fn queue_wait_idle(&self) -> Result<()> {
            self.record("queue_wait_idle");
            if self.fail_idle.get() {
                anyhow::bail!("device lost");
            }
            Ok(())
        }

        fn destroy_semaphore(&self, _semaphore: vk::Semaphore) {
            self.record("destroy_semaphore");
        }

        fn destroy_command_pool(&self, _pool: vk::CommandPool) {
            self.record("destroy_command_pool");
        }
    }

    #[test]
    fn shutdown_drains_queue_before_destroying() {
        let device = MockDevice::default();
        let sync = FrameSync::new(&device).unwrap();
        sync.submit().unwrap();
        sync.shutdown().unwrap();

        assert_eq!(
            device.calls(),
            [
                "create_command_pool",
                "allocate_command_buffer",
                "create_semaphore",
                "submit",
                "queue_wait_idle",
                "destroy_semaphore",
                "destroy_command_pool",
            ]
        );
    }

    #[test]
    fn drop_without_shutdown_still_drains_first() {
        let device = MockDevice::default();
        {
            let sync = FrameSync::new(&device).unwrap();
            sync.submit().unwrap();
        }

        let idle = device.position("queue_wait_idle");
        assert!(idle < device.position("destroy_semaphore"));
        assert!(idle < device.position("destroy_command_pool"));
    }

    #[test]
    fn failed_drain_leaves_resources_alive() {
        let device = MockDevice::default();
        let sync = FrameSync::new(&device).unwrap();
        device.fail_idle.set(true);

        assert!(sync.shutdown().is_err());

        let calls = device.calls();
        assert!(!calls.contains(&"destroy_semaphore"));
        assert!(!calls.contains(&"destroy_command_pool"));
    }

    #[test]
    fn partial_creation_releases_pool() {
        let device = MockDevice::default();
        device.fail_semaphore.set(true);

        assert!(FrameSync::new(&device).is_err());
        assert_eq!(
            device.calls(),
            [
                "create_command_pool",
                "allocate_command_buffer",
                "create_semaphore",
                "destroy_command_pool",
            ]
        );
    }

    #[test]
    fn submit_uses_the_presented_semaphore() {
        let device = MockDevice::default();
        let sync = FrameSync::new(&device).unwrap();

        // The semaphore handed to presentation is the one submit signals
        assert_eq!(sync.render_complete().as_raw(), 3);
        sync.submit().unwrap();
        sync.shutdown().unwrap();
    }
}
