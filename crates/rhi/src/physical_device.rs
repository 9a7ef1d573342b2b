//! Physical device (GPU) selection.
//!
//! The first enumerated adapter is used. Scoring adapters by capability is
//! deliberately not done here; see `DESIGN.md`.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Queue family indices chosen for the logical device.
///
/// Compute and transfer are only present when they were requested and a
/// family distinct from the graphics family exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Graphics family, also used for presentation.
    pub graphics_family: u32,
    /// Dedicated compute family.
    pub compute_family: Option<u32>,
    /// Dedicated transfer family.
    pub transfer_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Returns the unique queue family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = vec![self.graphics_family];

        if let Some(compute) = self.compute_family
            && !families.contains(&compute)
        {
            families.push(compute);
        }
        if let Some(transfer) = self.transfer_family
            && !families.contains(&transfer)
        {
            families.push(transfer);
        }

        families
    }
}

/// Finds the family index best suited to `flags`.
///
/// Compute requests prefer a family without graphics; transfer requests prefer
/// a family without graphics or compute. Otherwise the first family exposing
/// every requested flag wins.
pub fn find_queue_family(
    families: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
) -> Option<u32> {
    let usable = |f: &vk::QueueFamilyProperties| f.queue_count > 0 && f.queue_flags.contains(flags);

    let dedicated = if flags.contains(vk::QueueFlags::COMPUTE) {
        families.iter().position(|f| {
            usable(f) && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
    } else if flags.contains(vk::QueueFlags::TRANSFER) {
        families.iter().position(|f| {
            usable(f)
                && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && !f.queue_flags.contains(vk::QueueFlags::COMPUTE)
        })
    } else {
        None
    };

    dedicated
        .or_else(|| families.iter().position(usable))
        .map(|index| index as u32)
}

/// Resolves the graphics family plus any requested dedicated families.
///
/// `requested` may contain `COMPUTE` and/or `TRANSFER`; `GRAPHICS` is always
/// implied.
pub fn resolve_queue_families(
    families: &[vk::QueueFamilyProperties],
    requested: vk::QueueFlags,
) -> RhiResult<QueueFamilyIndices> {
    let graphics_family = find_queue_family(families, vk::QueueFlags::GRAPHICS)
        .ok_or_else(|| RhiError::NoSuitableQueueFamily("graphics".into()))?;

    let dedicated = |flag: vk::QueueFlags| {
        if !requested.contains(flag) {
            return None;
        }
        let family = find_queue_family(families, flag).filter(|&f| f != graphics_family);
        if family.is_none() {
            debug!("No dedicated {:?} family, sharing the graphics queue", flag);
        }
        family
    };

    Ok(QueueFamilyIndices {
        graphics_family,
        compute_family: dedicated(vk::QueueFlags::COMPUTE),
        transfer_family: dedicated(vk::QueueFlags::TRANSFER),
    })
}

/// Information about the selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory type and heap table.
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family indices for the logical device.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the first enumerated physical device.
///
/// # Errors
///
/// Returns [`RhiError::NoAdapter`] when enumeration is empty and
/// [`RhiError::NoSuitableQueueFamily`] when it has no graphics family.
pub fn select_physical_device(
    instance: &ash::Instance,
    requested_queues: vk::QueueFlags,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    let Some(&device) = devices.first() else {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoAdapter);
    };

    if devices.len() > 1 {
        debug!(
            "Found {} GPUs, using the first enumerated one",
            devices.len()
        );
    }

    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let queue_families = resolve_queue_families(&families, requested_queues)?;

    let info = PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    };

    let (major, minor, patch) = info.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, queues {:?}",
        info.device_name(),
        info.device_type_name(),
        major,
        minor,
        patch,
        info.queue_families
    );

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn desktop_families() -> Vec<vk::QueueFamilyProperties> {
        vec![
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ]
    }

    #[test]
    fn test_find_queue_family_prefers_dedicated() {
        let families = desktop_families();
        assert_eq!(find_queue_family(&families, vk::QueueFlags::GRAPHICS), Some(0));
        assert_eq!(find_queue_family(&families, vk::QueueFlags::COMPUTE), Some(1));
        assert_eq!(find_queue_family(&families, vk::QueueFlags::TRANSFER), Some(2));
    }

    #[test]
    fn test_find_queue_family_falls_back_to_first_match() {
        let families = vec![family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        assert_eq!(find_queue_family(&families, vk::QueueFlags::COMPUTE), Some(0));
        assert_eq!(find_queue_family(&families, vk::QueueFlags::TRANSFER), Some(0));
    }

    #[test]
    fn test_find_queue_family_skips_empty_families() {
        let mut families = desktop_families();
        families[1].queue_count = 0;
        assert_eq!(find_queue_family(&families, vk::QueueFlags::COMPUTE), Some(0));
    }

    #[test]
    fn test_resolve_without_requests() {
        let indices = resolve_queue_families(&desktop_families(), vk::QueueFlags::empty())
            .expect("graphics family exists");
        assert_eq!(indices.graphics_family, 0);
        assert_eq!(indices.compute_family, None);
        assert_eq!(indices.transfer_family, None);
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn test_resolve_dedicated_requests() {
        let indices = resolve_queue_families(
            &desktop_families(),
            vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )
        .expect("graphics family exists");
        assert_eq!(indices.compute_family, Some(1));
        assert_eq!(indices.transfer_family, Some(2));
        assert_eq!(indices.unique_families(), vec![0, 1, 2]);
    }

    #[test]
    fn test_resolve_requests_not_distinct() {
        let families = vec![family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let indices = resolve_queue_families(&families, vk::QueueFlags::COMPUTE)
            .expect("graphics family exists");
        assert_eq!(indices.compute_family, None);
    }

    #[test]
    fn test_resolve_without_graphics_is_exhaustion() {
        let families = vec![family(vk::QueueFlags::COMPUTE)];
        let err = resolve_queue_families(&families, vk::QueueFlags::empty()).unwrap_err();
        assert!(matches!(err, RhiError::NoSuitableQueueFamily(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::ResourceExhaustion);
    }
}
