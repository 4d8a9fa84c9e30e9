// Graphics context - instance, device and queue
//
// Responsibilities:
// - Instance creation with negotiated surface extensions
// - Optional validation diagnostics
// - Physical device selection (first reported)
// - Graphics queue family selection
// - Logical device + single queue creation
//
// The acquisition order lives in `acquire`, written against `ContextApi` so
// the same sequence runs on the driver and on a recording stand-in.

use super::debug;
use super::error::NegotiationError;
use super::negotiate::{self, InstanceLayout};
use super::teardown::ReleaseStack;
use anyhow::{Context, Result};
use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use std::ffi::{CStr, CString};

/// Snapshot of the selected GPU, taken once at selection time
#[derive(Clone, Copy, Default)]
pub struct Adapter {
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

/// Driver calls made while acquiring a graphics context
pub trait ContextApi: Clone + 'static {
    type Instance: Clone + 'static;
    type Device: Clone + 'static;
    type Messenger: 'static;

    fn create_instance(&self, app_name: &str, layout: &InstanceLayout) -> Result<Self::Instance>;
    fn destroy_instance(&self, instance: &Self::Instance);
    fn select_adapter(&self, instance: &Self::Instance) -> Result<Adapter>;
    fn queue_families(
        &self,
        instance: &Self::Instance,
        adapter: &Adapter,
    ) -> Vec<vk::QueueFamilyProperties>;
    fn create_device(
        &self,
        instance: &Self::Instance,
        adapter: &Adapter,
        graphics_family_index: u32,
    ) -> Result<Self::Device>;
    /// Waits for the device to go idle, then destroys it
    fn destroy_device(&self, device: &Self::Device);
    fn device_queue(&self, device: &Self::Device, graphics_family_index: u32) -> vk::Queue;
    /// `None` when the messenger entry points cannot be resolved
    fn register_messenger(&self, instance: &Self::Instance) -> Result<Option<Self::Messenger>>;
    fn destroy_messenger(&self, messenger: &Self::Messenger);
}

/// Handles produced by `acquire`; their releases sit on the caller's stack
pub struct Acquired<A: ContextApi> {
    pub instance: A::Instance,
    pub adapter: Adapter,
    pub graphics_family_index: u32,
    pub device: A::Device,
    pub queue: vk::Queue,
    pub diagnostics: bool,
}

/// Instance, physical device, logical device and queue, then the debug
/// messenger. Each release is registered right after its create call.
pub fn acquire<A: ContextApi>(
    api: &A,
    app_name: &str,
    layout: &InstanceLayout,
    resources: &mut ReleaseStack,
) -> Result<Acquired<A>> {
    let instance = api.create_instance(app_name, layout)?;
    let handle = instance.clone();
    resources.push_with("instance", api.clone(), move |api| {
        api.destroy_instance(&handle)
    });

    let adapter = api.select_adapter(&instance)?;

    let families = api.queue_families(&instance, &adapter);
    let graphics_family_index = negotiate::select_graphics_queue_family(&families)?;
    log::debug!(
        "Graphics queue family {} of {}",
        graphics_family_index,
        families.len()
    );

    let device = api.create_device(&instance, &adapter, graphics_family_index)?;
    let handle = device.clone();
    resources.push_with("logical device", api.clone(), move |api| {
        api.destroy_device(&handle)
    });

    let queue = api.device_queue(&device, graphics_family_index);

    let mut diagnostics = false;
    if layout.diagnostics {
        if let Some(messenger) = api.register_messenger(&instance)? {
            resources.push_with("debug messenger", api.clone(), move |api| {
                api.destroy_messenger(&messenger)
            });
            diagnostics = true;
        }
    }

    Ok(Acquired {
        instance,
        adapter,
        graphics_family_index,
        device,
        queue,
        diagnostics,
    })
}

/// `ContextApi` over the loaded Vulkan library
#[derive(Clone)]
pub struct VulkanContextApi {
    entry: Entry,
}

impl ContextApi for VulkanContextApi {
    type Instance = ash::Instance;
    type Device = ash::Device;
    type Messenger = (ext::DebugUtils, vk::DebugUtilsMessengerEXT);

    fn create_instance(&self, app_name: &str, layout: &InstanceLayout) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("Lagom")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let extensions: Vec<_> = layout.extensions.iter().map(|name| name.as_ptr()).collect();
        let layers: Vec<_> = layout.layers.iter().map(|name| name.as_ptr()).collect();

        // Chained so validation covers instance creation itself
        let mut debug_info = debug::messenger_create_info();

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        if layout.diagnostics {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { self.entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn destroy_instance(&self, instance: &ash::Instance) {
        unsafe { instance.destroy_instance(None) }
    }

    /// No ranking: the first device the driver reports is used
    fn select_adapter(&self, instance: &ash::Instance) -> Result<Adapter> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        log::debug!("{} physical device(s) reported", devices.len());

        let physical_device = devices
            .first()
            .copied()
            .ok_or(NegotiationError::NoPhysicalDevice)?;

        let extensions =
            unsafe { instance.enumerate_device_extension_properties(physical_device) }
                .context("Failed to enumerate device extensions")?;
        if !negotiate::has_extension(&extensions, khr::Swapchain::name()) {
            return Err(NegotiationError::MissingDeviceExtension(
                khr::Swapchain::name().to_string_lossy().into_owned(),
            )
            .into());
        }

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        Ok(Adapter {
            physical_device,
            properties,
            memory_properties,
        })
    }

    fn queue_families(
        &self,
        instance: &ash::Instance,
        adapter: &Adapter,
    ) -> Vec<vk::QueueFamilyProperties> {
        unsafe { instance.get_physical_device_queue_family_properties(adapter.physical_device) }
    }

    fn create_device(
        &self,
        instance: &ash::Instance,
        adapter: &Adapter,
        graphics_family_index: u32,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_family_index)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions);

        let device =
            unsafe { instance.create_device(adapter.physical_device, &create_info, None) }
                .context("Failed to create logical device")?;

        Ok(device)
    }

    fn destroy_device(&self, device: &ash::Device) {
        unsafe {
            if let Err(e) = device.device_wait_idle() {
                log::error!("Device wait idle failed during teardown: {:?}", e);
            }
            device.destroy_device(None);
        }
    }

    fn device_queue(&self, device: &ash::Device, graphics_family_index: u32) -> vk::Queue {
        unsafe { device.get_device_queue(graphics_family_index, 0) }
    }

    fn register_messenger(&self, instance: &ash::Instance) -> Result<Option<Self::Messenger>> {
        debug::register(&self.entry, instance)
    }

    fn destroy_messenger(&self, (debug_utils, messenger): &Self::Messenger) {
        unsafe { debug_utils.destroy_debug_utils_messenger(*messenger, None) }
    }
}

/// Owns the API instance, logical device and graphics queue.
///
/// Everything is released in reverse order of creation when dropped:
/// debug messenger, logical device, instance.
pub struct GraphicsContext {
    resources: ReleaseStack,

    device: ash::Device,
    queue: vk::Queue,
    graphics_family_index: u32,

    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,

    instance: ash::Instance,
    diagnostics: bool,
    entry: Entry,
}

impl GraphicsContext {
    /// Create the graphics context
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `enable_diagnostics` - Request the validation layer and debug messenger
    pub fn new(app_name: &str, enable_diagnostics: bool) -> Result<Self> {
        log::info!("Creating graphics context: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Declared after `entry` so a failed init releases before the loader unloads
        let mut resources = ReleaseStack::new("graphics context");

        let layout = Self::negotiate_layout(&entry, enable_diagnostics)?;
        let api = VulkanContextApi {
            entry: entry.clone(),
        };
        let acquired = acquire(&api, app_name, &layout, &mut resources)?;

        Ok(Self {
            resources,
            device: acquired.device,
            queue: acquired.queue,
            graphics_family_index: acquired.graphics_family_index,
            physical_device: acquired.adapter.physical_device,
            properties: acquired.adapter.properties,
            memory_properties: acquired.adapter.memory_properties,
            instance: acquired.instance,
            diagnostics: acquired.diagnostics,
            entry,
        })
    }

    fn negotiate_layout(entry: &Entry, enable_diagnostics: bool) -> Result<InstanceLayout> {
        let extension_properties = entry
            .enumerate_instance_extension_properties(None)
            .context("Failed to enumerate instance extensions")?;
        let layer_properties = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;

        let extensions: Vec<&CStr> = extension_properties
            .iter()
            .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) })
            .collect();
        let layers: Vec<&CStr> = layer_properties
            .iter()
            .map(|p| unsafe { CStr::from_ptr(p.layer_name.as_ptr()) })
            .collect();

        log::debug!("Instance layers:");
        for (name, props) in layers.iter().zip(&layer_properties) {
            let description = unsafe { CStr::from_ptr(props.description.as_ptr()) };
            log::debug!(
                "  {}\t\t{}",
                name.to_string_lossy(),
                description.to_string_lossy()
            );
        }

        let layout = negotiate::negotiate_instance_layout(
            &extensions,
            &layers,
            khr::Surface::name(),
            &platform_surface_extensions(),
            ext::DebugUtils::name(),
            debug::VALIDATION_LAYER,
            enable_diagnostics,
        )?;

        Ok(layout)
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn graphics_family_index(&self) -> u32 {
        self.graphics_family_index
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Whether the debug messenger is registered
    pub fn diagnostics_enabled(&self) -> bool {
        self.diagnostics
    }

    /// Wait for the device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Device wait idle failed")?;
        Ok(())
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        log::info!("Destroying graphics context...");
        self.resources.release_all();
    }
}

/// Surface extensions this platform can create surfaces through
fn platform_surface_extensions() -> Vec<&'static CStr> {
    if cfg!(target_os = "windows") {
        vec![khr::Win32Surface::name()]
    } else if cfg!(any(target_os = "macos", target_os = "ios")) {
        vec![ext::MetalSurface::name()]
    } else if cfg!(target_os = "android") {
        vec![khr::AndroidSurface::name()]
    } else {
        vec![
            khr::XlibSurface::name(),
            khr::XcbSurface::name(),
            khr::WaylandSurface::name(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Journal = Rc<RefCell<Vec<String>>>;

    /// Records every create and destroy, handing out numbered handles
    #[derive(Clone, Default)]
    struct RecordingApi {
        journal: Journal,
        fail_device: bool,
        messenger_unresolved: bool,
    }

    impl RecordingApi {
        fn record(&self, entry: &str) {
            self.journal.borrow_mut().push(entry.to_string());
        }

        fn entries(&self) -> Vec<String> {
            self.journal.borrow().clone()
        }
    }

    impl ContextApi for RecordingApi {
        type Instance = &'static str;
        type Device = &'static str;
        type Messenger = &'static str;

        fn create_instance(&self, _app_name: &str, _layout: &InstanceLayout) -> Result<&'static str> {
            self.record("create instance");
            Ok("instance")
        }

        fn destroy_instance(&self, instance: &&'static str) {
            self.record(&format!("destroy {instance}"));
        }

        fn select_adapter(&self, _instance: &&'static str) -> Result<Adapter> {
            Ok(Adapter::default())
        }

        fn queue_families(
            &self,
            _instance: &&'static str,
            _adapter: &Adapter,
        ) -> Vec<vk::QueueFamilyProperties> {
            [
                vk::QueueFlags::TRANSFER,
                vk::QueueFlags::GRAPHICS,
                vk::QueueFlags::GRAPHICS,
            ]
            .into_iter()
            .map(|queue_flags| vk::QueueFamilyProperties {
                queue_flags,
                queue_count: 1,
                ..Default::default()
            })
            .collect()
        }

        fn create_device(
            &self,
            _instance: &&'static str,
            _adapter: &Adapter,
            graphics_family_index: u32,
        ) -> Result<&'static str> {
            assert_eq!(graphics_family_index, 2);
            if self.fail_device {
                anyhow::bail!("initialization failed");
            }
            self.record("create logical device");
            Ok("logical device")
        }

        fn destroy_device(&self, device: &&'static str) {
            self.record(&format!("destroy {device}"));
        }

        fn device_queue(&self, _device: &&'static str, _family: u32) -> vk::Queue {
            vk::Queue::null()
        }

        fn register_messenger(&self, _instance: &&'static str) -> Result<Option<&'static str>> {
            if self.messenger_unresolved {
                return Ok(None);
            }
            self.record("create debug messenger");
            Ok(Some("debug messenger"))
        }

        fn destroy_messenger(&self, messenger: &&'static str) {
            self.record(&format!("destroy {messenger}"));
        }
    }

    fn layout(diagnostics: bool) -> InstanceLayout {
        InstanceLayout {
            extensions: Vec::new(),
            layers: Vec::new(),
            diagnostics,
        }
    }

    #[test]
    fn teardown_is_messenger_then_device_then_instance() {
        let api = RecordingApi::default();
        let mut resources = ReleaseStack::new("graphics context");

        let acquired = acquire(&api, "test", &layout(true), &mut resources).unwrap();
        assert!(acquired.diagnostics);
        assert_eq!(acquired.graphics_family_index, 2);

        resources.release_all();

        assert_eq!(
            api.entries(),
            [
                "create instance",
                "create logical device",
                "create debug messenger",
                "destroy debug messenger",
                "destroy logical device",
                "destroy instance",
            ]
        );
    }

    #[test]
    fn destroy_calls_mirror_create_calls() {
        let api = RecordingApi::default();
        let mut resources = ReleaseStack::new("graphics context");
        acquire(&api, "test", &layout(true), &mut resources).unwrap();
        drop(resources);

        let entries = api.entries();
        let mut created: Vec<_> = entries
            .iter()
            .filter_map(|e| e.strip_prefix("create "))
            .collect();
        let destroyed: Vec<_> = entries
            .iter()
            .filter_map(|e| e.strip_prefix("destroy "))
            .collect();
        created.reverse();
        assert_eq!(destroyed, created);
    }

    #[test]
    fn device_failure_releases_instance() {
        let api = RecordingApi {
            fail_device: true,
            ..Default::default()
        };
        let mut resources = ReleaseStack::new("graphics context");

        assert!(acquire(&api, "test", &layout(true), &mut resources).is_err());
        resources.release_all();

        assert_eq!(api.entries(), ["create instance", "destroy instance"]);
    }

    #[test]
    fn unresolved_messenger_disables_diagnostics() {
        let api = RecordingApi {
            messenger_unresolved: true,
            ..Default::default()
        };
        let mut resources = ReleaseStack::new("graphics context");

        let acquired = acquire(&api, "test", &layout(true), &mut resources).unwrap();
        assert!(!acquired.diagnostics);
        assert_eq!(
            resources.labels().collect::<Vec<_>>(),
            ["instance", "logical device"]
        );
    }

    #[test]
    fn diagnostics_off_skips_messenger() {
        let api = RecordingApi::default();
        let mut resources = ReleaseStack::new("graphics context");

        let acquired = acquire(&api, "test", &layout(false), &mut resources).unwrap();
        assert!(!acquired.diagnostics);
        assert!(!api.entries().iter().any(|e| e.contains("messenger")));
    }
}
