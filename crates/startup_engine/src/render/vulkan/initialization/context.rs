//! Vulkan context management
//!
//! Owns the instance, physical device selection, and the logical
//! device with its graphics queue. Everything here happens exactly
//! once at startup; every failure in this module is fatal to
//! initialization and is never retried.

use ash::extensions::khr::Swapchain as SwapchainLoader;
#[cfg(debug_assertions)]
use ash::extensions::ext::DebugUtils;
use ash::{vk, Device, Entry, Instance};
use std::ffi::{CStr, CString};
use thiserror::Error;

use crate::core::config::EngineConfig;
use crate::render::vulkan::initialization::surface::Surface;
use crate::render::window::Window;

/// Vulkan-specific error types
///
/// Initialization-phase variants are fatal: driver and GPU
/// capabilities cannot change within a run, so nothing is retried.
/// `SwapchainInvalidated` is the one recoverable condition, raised
/// during steady-state acquire/present and handled by rebuilding the
/// swapchain.
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Instance creation failed (missing layer/extension or driver rejection)
    #[error("instance creation failed: {0}")]
    InstanceCreation(String),

    /// Zero physical devices enumerated, or the selection strategy rejected all of them
    #[error("no suitable Vulkan device found")]
    NoSuitableDevice,

    /// Logical device creation was rejected
    #[error("logical device creation failed: {0}")]
    DeviceCreation(String),

    /// Presentation surface could not be created
    #[error("surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain build failed at some step
    #[error("swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// No candidate format supports the required usage
    #[error("format {0:?} does not support the required features")]
    UnsupportedFormat(vk::Format),

    /// Device memory allocation failed
    #[error("allocation of {requested} bytes failed")]
    Allocation {
        /// Number of bytes that were requested
        requested: u64,
    },

    /// No memory type satisfies the mask and property requirements
    #[error("no memory type satisfies mask {type_bits:#x} with flags {flags:?}")]
    MemoryTypeNotFound {
        /// Allowed memory-type bitmask from the resource's requirements
        type_bits: u32,
        /// Property flags the allocation needs
        flags: vk::MemoryPropertyFlags,
    },

    /// The presentation surface changed and the swapchain must be rebuilt
    ///
    /// Recoverable: the frame driver stops the current tick, rebuilds,
    /// and retries on the next tick. Never surfaced to the user.
    #[error("swapchain invalidated; rebuild required")]
    SwapchainInvalidated,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Decode queue capability flags into a diagnostic string
pub fn describe_queue_flags(flags: vk::QueueFlags) -> String {
    let mut caps = String::new();
    if flags.contains(vk::QueueFlags::GRAPHICS) {
        caps.push_str("GRAPHICS ");
    }
    if flags.contains(vk::QueueFlags::COMPUTE) {
        caps.push_str("COMPUTE ");
    }
    if flags.contains(vk::QueueFlags::TRANSFER) {
        caps.push_str("TRANSFER ");
    }
    if flags.contains(vk::QueueFlags::SPARSE_BINDING) {
        caps.push_str("SPARSE ");
    }
    if flags.contains(vk::QueueFlags::PROTECTED) {
        caps.push_str("PROTECTED ");
    }
    caps.trim_end().to_string()
}

/// Scan a memory-type table for the first index whose bit is set in
/// `type_bits` and whose property flags are a superset of `required`
///
/// Returns `None` when no type qualifies; callers must treat that as
/// fatal for the allocation in progress. Ties break toward the lowest
/// index.
pub fn find_memory_type_index(
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Debug utilities extension (debug builds)
    #[cfg(debug_assertions)]
    debug_utils: Option<DebugUtils>,
    /// Debug messenger handle (debug builds)
    #[cfg(debug_assertions)]
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

#[cfg(debug_assertions)]
const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

impl VulkanInstance {
    /// Create a new Vulkan instance
    ///
    /// Required extensions come from GLFW (surface + platform surface);
    /// debug builds additionally request the debug-utils extension and
    /// the Khronos validation layer, failing if the layer is absent.
    pub fn new(window: &Window, app_name: &str) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| {
            VulkanError::InstanceCreation(format!("failed to load Vulkan library: {:?}", e))
        })?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| VulkanError::InstanceCreation("invalid application name".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(0)
            .engine_name(&app_name_cstr)
            .engine_version(0)
            .api_version(vk::API_VERSION_1_0);

        let required_extensions = window.get_required_instance_extensions().map_err(|e| {
            VulkanError::InstanceCreation(format!("failed to get required extensions: {}", e))
        })?;

        let cstr_extensions: Vec<CString> = required_extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()))
            .collect::<Result<_, _>>()
            .map_err(|_| {
                VulkanError::InstanceCreation("invalid extension name from window system".to_string())
            })?;

        #[allow(unused_mut)] // mutable in debug builds for the debug extension
        let mut extensions: Vec<*const i8> =
            cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();

        #[cfg(debug_assertions)]
        extensions.push(DebugUtils::name().as_ptr());

        #[cfg(debug_assertions)]
        let layer_names = {
            Self::check_validation_layer(&entry)?;
            vec![CString::new(VALIDATION_LAYER).unwrap()]
        };
        #[cfg(not(debug_assertions))]
        let layer_names: Vec<CString> = vec![];

        let layer_names_ptrs: Vec<*const i8> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names_ptrs);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(|e| VulkanError::InstanceCreation(format!("{:?}", e)))?
        };

        log::info!("Vulkan instance created for application '{}'", app_name);

        #[cfg(debug_assertions)]
        let (debug_utils, debug_messenger) = {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let debug_messenger = Self::setup_debug_messenger(&debug_utils)?;
            (Some(debug_utils), Some(debug_messenger))
        };

        Ok(Self {
            entry,
            instance,
            #[cfg(debug_assertions)]
            debug_utils,
            #[cfg(debug_assertions)]
            debug_messenger,
        })
    }

    /// Verify the validation layer is installed before requesting it
    #[cfg(debug_assertions)]
    fn check_validation_layer(entry: &Entry) -> VulkanResult<()> {
        let available = entry
            .enumerate_instance_layer_properties()
            .map_err(VulkanError::Api)?;

        let found = available.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name.to_string_lossy() == VALIDATION_LAYER
        });

        if found {
            Ok(())
        } else {
            log::error!("Cannot find layer: {}", VALIDATION_LAYER);
            Err(VulkanError::InstanceCreation(format!(
                "validation layer {} not present",
                VALIDATION_LAYER
            )))
        }
    }

    #[cfg(debug_assertions)]
    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            #[cfg(debug_assertions)]
            if let (Some(debug_utils), Some(debug_messenger)) =
                (&self.debug_utils, &self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(*debug_messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Diagnostics sink: route validation-layer messages into the log
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *callback_data;
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Capability snapshot of one queue family
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilyRecord {
    /// Capability flags reported by the driver
    pub flags: vk::QueueFlags,
    /// Number of queues the family exposes
    pub queue_count: u32,
    /// Whether the bound surface reports present support for this family
    ///
    /// `false` also when the support query itself errored; such
    /// families are simply skipped during queue selection.
    pub present_support: bool,
}

/// Immutable snapshot of one enumerated GPU
///
/// Pure data, detached from any Vulkan handle, so selection strategies
/// can be exercised in tests against fabricated device tables.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Device name reported by the driver
    pub name: String,
    /// Supported Vulkan API version (packed)
    pub api_version: u32,
    /// Queue family capability table
    pub queue_families: Vec<QueueFamilyRecord>,
    /// Whether the device advertises the swapchain extension
    pub supports_swapchain: bool,
}

impl DeviceRecord {
    /// Index of the first family advertising both graphics capability
    /// and present support to the bound surface
    pub fn graphics_present_family(&self) -> Option<u32> {
        self.queue_families
            .iter()
            .position(|family| {
                family.flags.contains(vk::QueueFlags::GRAPHICS) && family.present_support
            })
            .map(|index| index as u32)
    }

    /// Linear scan for the first family whose flags include `required`
    pub fn find_queue_family(&self, required: vk::QueueFlags) -> Option<u32> {
        self.queue_families
            .iter()
            .position(|family| family.flags.contains(required))
            .map(|index| index as u32)
    }
}

/// Pluggable physical-device selection
///
/// The production default picks the first enumerated device with no
/// scoring; tests inject fake device tables to exercise alternatives.
pub trait DeviceSelectionStrategy {
    /// Pick the index of the device to open, or `None` to reject all
    fn select(&self, candidates: &[DeviceRecord]) -> Option<usize>;
}

/// Default strategy: first enumerated device, no scoring
pub struct FirstDevice;

impl DeviceSelectionStrategy for FirstDevice {
    fn select(&self, candidates: &[DeviceRecord]) -> Option<usize> {
        if candidates.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory-type table used for allocation placement
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Pure capability snapshot (queue families, extension support)
    pub record: DeviceRecord,
}

impl PhysicalDeviceInfo {
    /// Enumerate devices, log each candidate, and select one
    ///
    /// Fails with `NoSuitableDevice` when zero devices are enumerated
    /// or the strategy rejects every candidate. The snapshot of the
    /// chosen device is taken once here and never re-queried.
    pub fn select(
        instance: &Instance,
        surface: &Surface,
        strategy: &dyn DeviceSelectionStrategy,
    ) -> VulkanResult<Self> {
        let devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        if devices.is_empty() {
            log::error!("vkEnumeratePhysicalDevices reported zero accessible devices");
            return Err(VulkanError::NoSuitableDevice);
        }

        let mut records = Vec::with_capacity(devices.len());
        for (index, &device) in devices.iter().enumerate() {
            let record = Self::snapshot(instance, device, surface);
            Self::log_candidate(instance, device, &record, index, devices.len());
            records.push(record);
        }

        let selected = strategy
            .select(&records)
            .ok_or(VulkanError::NoSuitableDevice)?;
        let device = devices[selected];
        let record = records.swap_remove(selected);

        if !record.supports_swapchain {
            log::error!(
                "vkEnumerateDeviceExtensionProperties failed to find the VK_KHR_swapchain \
                 extension. Do you have a compatible Vulkan installable client driver (ICD) \
                 installed?"
            );
        }

        log::info!("Selected GPU: {}", record.name);

        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        Ok(Self {
            device,
            properties,
            features,
            memory_properties,
            record,
        })
    }

    /// Build the pure capability snapshot for one device
    fn snapshot(instance: &Instance, device: vk::PhysicalDevice, surface: &Surface) -> DeviceRecord {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let queue_props = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let queue_families = queue_props
            .iter()
            .enumerate()
            .map(|(index, family)| QueueFamilyRecord {
                flags: family.queue_flags,
                queue_count: family.queue_count,
                // An erroring support query disqualifies the family
                present_support: surface
                    .supports_present(device, index as u32)
                    .unwrap_or(false),
            })
            .collect();

        let supports_swapchain = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map(|extensions| {
                    extensions.iter().any(|ext| {
                        let name = CStr::from_ptr(ext.extension_name.as_ptr());
                        name == SwapchainLoader::name()
                    })
                })
                .unwrap_or(false)
        };

        let name = unsafe {
            CStr::from_ptr(properties.device_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        };

        DeviceRecord {
            name,
            api_version: properties.api_version,
            queue_families,
            supports_swapchain,
        }
    }

    /// Log one candidate's identity, queue families, and feature set
    fn log_candidate(
        instance: &Instance,
        device: vk::PhysicalDevice,
        record: &DeviceRecord,
        index: usize,
        total: usize,
    ) {
        log::info!(
            "================ VulkanPhysicalDevice[{}/{}] ================",
            index + 1,
            total
        );
        log::info!("{}", record.name);
        log::info!(
            "apiVersion = {}.{}.{}",
            vk::api_version_major(record.api_version),
            vk::api_version_minor(record.api_version),
            vk::api_version_patch(record.api_version)
        );

        for (family_index, family) in record.queue_families.iter().enumerate() {
            log::info!(
                "QueueFamily[{}/{}] queueFlags: {}{}",
                family_index + 1,
                record.queue_families.len(),
                describe_queue_flags(family.flags),
                if family.present_support { " PRESENT" } else { "" }
            );
        }

        let extension_count = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map(|extensions| extensions.len())
                .unwrap_or(0)
        };
        log::info!("Extension Count = {}", extension_count);

        let features = unsafe { instance.get_physical_device_features(device) };
        log_device_features(&features);
    }

    /// Find the first memory-type index matching the mask and flags
    ///
    /// `None` is fatal for the allocation in progress.
    pub fn find_memory_type_index(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        find_memory_type_index(type_bits, required, &self.memory_properties)
    }
}

/// Dump the full feature table of a device, matching the driver's
/// reporting order (true = 1, false = 0)
fn log_device_features(f: &vk::PhysicalDeviceFeatures) {
    log::info!("enable features : true = 1, false = 0");
    let features: [(&str, vk::Bool32); 55] = [
        ("robustBufferAccess", f.robust_buffer_access),
        ("fullDrawIndexUint32", f.full_draw_index_uint32),
        ("imageCubeArray", f.image_cube_array),
        ("independentBlend", f.independent_blend),
        ("geometryShader", f.geometry_shader),
        ("tessellationShader", f.tessellation_shader),
        ("sampleRateShading", f.sample_rate_shading),
        ("dualSrcBlend", f.dual_src_blend),
        ("logicOp", f.logic_op),
        ("multiDrawIndirect", f.multi_draw_indirect),
        ("drawIndirectFirstInstance", f.draw_indirect_first_instance),
        ("depthClamp", f.depth_clamp),
        ("depthBiasClamp", f.depth_bias_clamp),
        ("fillModeNonSolid", f.fill_mode_non_solid),
        ("depthBounds", f.depth_bounds),
        ("wideLines", f.wide_lines),
        ("largePoints", f.large_points),
        ("alphaToOne", f.alpha_to_one),
        ("multiViewport", f.multi_viewport),
        ("samplerAnisotropy", f.sampler_anisotropy),
        ("textureCompressionETC2", f.texture_compression_etc2),
        ("textureCompressionASTC_LDR", f.texture_compression_astc_ldr),
        ("textureCompressionBC", f.texture_compression_bc),
        ("occlusionQueryPrecise", f.occlusion_query_precise),
        ("pipelineStatisticsQuery", f.pipeline_statistics_query),
        (
            "vertexPipelineStoresAndAtomics",
            f.vertex_pipeline_stores_and_atomics,
        ),
        ("fragmentStoresAndAtomics", f.fragment_stores_and_atomics),
        (
            "shaderTessellationAndGeometryPointSize",
            f.shader_tessellation_and_geometry_point_size,
        ),
        ("shaderImageGatherExtended", f.shader_image_gather_extended),
        (
            "shaderStorageImageExtendedFormats",
            f.shader_storage_image_extended_formats,
        ),
        (
            "shaderStorageImageMultisample",
            f.shader_storage_image_multisample,
        ),
        (
            "shaderStorageImageReadWithoutFormat",
            f.shader_storage_image_read_without_format,
        ),
        (
            "shaderStorageImageWriteWithoutFormat",
            f.shader_storage_image_write_without_format,
        ),
        (
            "shaderUniformBufferArrayDynamicIndexing",
            f.shader_uniform_buffer_array_dynamic_indexing,
        ),
        (
            "shaderSampledImageArrayDynamicIndexing",
            f.shader_sampled_image_array_dynamic_indexing,
        ),
        (
            "shaderStorageBufferArrayDynamicIndexing",
            f.shader_storage_buffer_array_dynamic_indexing,
        ),
        (
            "shaderStorageImageArrayDynamicIndexing",
            f.shader_storage_image_array_dynamic_indexing,
        ),
        ("shaderClipDistance", f.shader_clip_distance),
        ("shaderCullDistance", f.shader_cull_distance),
        ("shaderFloat64", f.shader_float64),
        ("shaderInt64", f.shader_int64),
        ("shaderInt16", f.shader_int16),
        ("shaderResourceResidency", f.shader_resource_residency),
        ("shaderResourceMinLod", f.shader_resource_min_lod),
        ("sparseBinding", f.sparse_binding),
        ("sparseResidencyBuffer", f.sparse_residency_buffer),
        ("sparseResidencyImage2D", f.sparse_residency_image2_d),
        ("sparseResidencyImage3D", f.sparse_residency_image3_d),
        ("sparseResidency2Samples", f.sparse_residency2_samples),
        ("sparseResidency4Samples", f.sparse_residency4_samples),
        ("sparseResidency8Samples", f.sparse_residency8_samples),
        ("sparseResidency16Samples", f.sparse_residency16_samples),
        ("sparseResidencyAliased", f.sparse_residency_aliased),
        ("variableMultisampleRate", f.variable_multisample_rate),
        ("inheritedQueries", f.inherited_queries),
    ];
    for (name, enabled) in features {
        log::info!("{} = {}", name, enabled);
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue (also used for presentation)
    pub graphics_queue: vk::Queue,
    /// Index of the queue family the queue was created from
    pub queue_family_index: u32,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a new logical device with one graphics queue
    ///
    /// The queue family is the first one advertising both graphics
    /// capability and present support to the bound surface; exactly
    /// one queue is requested from it at priority 1.0.
    pub fn new(instance: &Instance, physical_device: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let queue_family_index = physical_device
            .record
            .graphics_present_family()
            .ok_or_else(|| {
                VulkanError::DeviceCreation(
                    "no queue family supports both graphics and present".to_string(),
                )
            })?;

        if !physical_device.record.supports_swapchain {
            return Err(VulkanError::DeviceCreation(
                "VK_KHR_swapchain extension not supported".to_string(),
            ));
        }

        let priorities = [1.0_f32];
        let queue_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities)
            .build();

        let required_extensions = [SwapchainLoader::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_info))
            .enabled_extension_names(&required_extensions);

        let device = unsafe {
            instance
                .create_device(physical_device.device, &create_info, None)
                .map_err(|e| VulkanError::DeviceCreation(format!("{:?}", e)))?
        };

        let graphics_queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        log::info!(
            "Logical device created (graphics queue family {})",
            queue_family_index
        );

        Ok(Self {
            device,
            graphics_queue,
            queue_family_index,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            // Ensure device is idle before destruction
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Main Vulkan context that owns all core bring-up resources
///
/// Field order matters: the surface and device drop before the
/// instance they were created from.
pub struct VulkanContext {
    /// Selected physical device information
    pub physical_device: PhysicalDeviceInfo,
    /// Presentation surface bound to the window
    pub surface: Surface,
    /// Logical device and its graphics queue
    pub device: LogicalDevice,
    /// Vulkan instance and debug utilities
    pub instance: VulkanInstance,
}

impl VulkanContext {
    /// Bring up the device context for the window
    ///
    /// Executes the startup order: instance → surface → physical
    /// device → logical device. Any failure is fatal.
    pub fn new(
        window: &mut Window,
        config: &EngineConfig,
        strategy: &dyn DeviceSelectionStrategy,
    ) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, &config.application_name)?;
        let surface = Surface::new(&instance, window)?;
        let physical_device = PhysicalDeviceInfo::select(&instance.instance, &surface, strategy)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device)?;

        Ok(Self {
            physical_device,
            surface,
            device,
            instance,
        })
    }

    /// Get a reference to the raw Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the raw device handle (cheap function-table clone)
    pub fn raw_device(&self) -> Device {
        self.device.device.clone()
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the swapchain loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(
        types: &[(u32, vk::MemoryPropertyFlags)],
    ) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &(heap_index, flags)) in types.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index,
            };
        }
        props
    }

    #[test]
    fn memory_type_lookup_returns_first_qualifying_index() {
        let props = memory_properties(&[
            (0, vk::MemoryPropertyFlags::HOST_VISIBLE),
            (0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            (0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
        ]);

        // Both index 1 and 2 qualify; the tie breaks to the lowest
        let found = find_memory_type_index(0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL, &props);
        assert_eq!(found, Some(1));
    }

    #[test]
    fn memory_type_lookup_respects_type_mask() {
        let props = memory_properties(&[
            (0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            (0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
        ]);

        // Index 0 qualifies by flags but is excluded by the mask
        let found = find_memory_type_index(0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL, &props);
        assert_eq!(found, Some(1));
    }

    #[test]
    fn memory_type_lookup_requires_flag_superset() {
        let props = memory_properties(&[(
            0,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        )]);

        // A type with extra flags still satisfies a subset requirement
        let found = find_memory_type_index(0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL, &props);
        assert_eq!(found, Some(0));
    }

    #[test]
    fn memory_type_lookup_reports_not_found() {
        let props = memory_properties(&[(0, vk::MemoryPropertyFlags::HOST_VISIBLE)]);

        let found = find_memory_type_index(0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL, &props);
        assert_eq!(found, None);
    }

    #[test]
    fn queue_flags_decode_only_set_bits() {
        let desc = describe_queue_flags(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER);
        assert_eq!(desc, "GRAPHICS TRANSFER");
        assert!(!desc.contains("COMPUTE"));
        assert!(!desc.contains("SPARSE"));
    }

    #[test]
    fn queue_flags_decode_empty() {
        assert_eq!(describe_queue_flags(vk::QueueFlags::empty()), "");
    }

    fn fake_device(name: &str, families: Vec<QueueFamilyRecord>) -> DeviceRecord {
        DeviceRecord {
            name: name.to_string(),
            api_version: vk::make_api_version(0, 1, 0, 0),
            queue_families: families,
            supports_swapchain: true,
        }
    }

    #[test]
    fn first_device_strategy_picks_index_zero() {
        let strategy = FirstDevice;
        let devices = vec![
            fake_device("integrated", vec![]),
            fake_device("discrete", vec![]),
        ];
        assert_eq!(strategy.select(&devices), Some(0));
    }

    #[test]
    fn first_device_strategy_rejects_empty_table() {
        let strategy = FirstDevice;
        assert_eq!(strategy.select(&[]), None);
    }

    #[test]
    fn graphics_present_family_skips_unsupported_families() {
        let record = fake_device(
            "gpu",
            vec![
                QueueFamilyRecord {
                    flags: vk::QueueFlags::TRANSFER,
                    queue_count: 1,
                    present_support: true,
                },
                QueueFamilyRecord {
                    flags: vk::QueueFlags::GRAPHICS,
                    queue_count: 1,
                    present_support: false,
                },
                QueueFamilyRecord {
                    flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                    queue_count: 4,
                    present_support: true,
                },
            ],
        );
        assert_eq!(record.graphics_present_family(), Some(2));
        assert_eq!(record.find_queue_family(vk::QueueFlags::GRAPHICS), Some(1));
    }
}
