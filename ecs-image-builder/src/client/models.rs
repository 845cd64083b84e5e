//! Request and response models exchanged with the control plane.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// Accepted, not yet scheduled.
    Pending,
    /// Booting.
    Starting,
    /// Up.
    Running,
    /// Shutting down.
    Stopping,
    /// Down; disks can be captured.
    Stopped,
}

impl InstanceStatus {
    /// Returns the provider's spelling of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an elastic address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EipStatus {
    /// Being bound to an instance.
    Associating,
    /// Being detached from an instance.
    Unassociating,
    /// Bound to an instance.
    InUse,
    /// Allocated and free.
    Available,
}

impl fmt::Display for EipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Associating => "Associating",
            Self::Unassociating => "Unassociating",
            Self::InUse => "InUse",
            Self::Available => "Available",
        })
    }
}

/// Status of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageStatus {
    /// Snapshots are being taken.
    Creating,
    /// Queued.
    Waiting,
    /// Usable.
    Available,
    /// Not usable.
    UnAvailable,
    /// Capture failed.
    CreateFailed,
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Creating => "Creating",
            Self::Waiting => "Waiting",
            Self::Available => "Available",
            Self::UnAvailable => "UnAvailable",
            Self::CreateFailed => "CreateFailed",
        })
    }
}

/// Kind of resource a tag is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagResourceType {
    /// An image.
    Image,
    /// A disk snapshot.
    Snapshot,
    /// An instance.
    Instance,
}

impl fmt::Display for TagResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Image => "image",
            Self::Snapshot => "snapshot",
            Self::Instance => "instance",
        })
    }
}

/// A described instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance id.
    pub instance_id: String,
    /// Region the instance lives in.
    pub region_id: String,
    /// Zone the instance was scheduled in.
    #[serde(default)]
    pub zone_id: String,
    /// Current status.
    pub status: InstanceStatus,
    /// Instance type.
    #[serde(default)]
    pub instance_type: String,
    /// Public addresses (classic networking).
    #[serde(default)]
    pub public_ip_addresses: Vec<String>,
    /// Private addresses (VPC attributes).
    #[serde(default)]
    pub private_ip_addresses: Vec<String>,
}

/// A described elastic address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EipAddress {
    /// Allocation id.
    pub allocation_id: String,
    /// The address itself.
    pub ip_address: String,
    /// Region.
    pub region_id: String,
    /// Current status.
    pub status: EipStatus,
    /// Instance the address is bound to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// One disk of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskDeviceMapping {
    /// Snapshot backing this disk.
    pub snapshot_id: String,
    /// Device name, e.g. `/dev/xvda`.
    #[serde(default)]
    pub device: String,
    /// Size in GiB.
    #[serde(default)]
    pub size: u32,
    /// Whether the snapshot is encrypted.
    #[serde(default)]
    pub encrypted: bool,
}

/// A described image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image id.
    pub image_id: String,
    /// Image name.
    #[serde(default)]
    pub image_name: String,
    /// Region the image lives in.
    pub region_id: String,
    /// Current status.
    pub status: ImageStatus,
    /// Family the image belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_family: Option<String>,
    /// One entry per captured disk.
    #[serde(default)]
    pub disk_device_mappings: Vec<DiskDeviceMapping>,
}

impl Image {
    /// Returns true if any disk of the image is encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.disk_device_mappings.iter().any(|m| m.encrypted)
    }

    /// Returns the ids of the snapshots backing the image.
    #[must_use]
    pub fn snapshot_ids(&self) -> Vec<String> {
        self.disk_device_mappings
            .iter()
            .filter(|m| !m.snapshot_id.is_empty())
            .map(|m| m.snapshot_id.clone())
            .collect()
    }
}

/// System disk of a new instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemDiskSpec {
    /// Disk category, e.g. `cloud_essd`.
    pub category: Option<String>,
    /// Size in GiB; provider default when unset.
    pub size: Option<u32>,
    /// Disk name.
    pub name: Option<String>,
    /// Disk description.
    pub description: Option<String>,
    /// Encryption; provider default when unset.
    pub encrypted: Option<bool>,
}

/// Data disk of a new instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDiskSpec {
    /// Disk name.
    pub name: Option<String>,
    /// Disk category.
    pub category: Option<String>,
    /// Size in GiB.
    pub size: Option<u32>,
    /// Snapshot to restore the disk from.
    pub snapshot_id: Option<String>,
    /// Disk description.
    pub description: Option<String>,
    /// Release the disk together with the instance.
    pub delete_with_instance: bool,
    /// Device name.
    pub device: Option<String>,
    /// Encryption; provider default when unset.
    pub encrypted: Option<bool>,
}

/// Launches one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInstancesRequest {
    /// Idempotency token; one per intended instance.
    pub client_token: String,
    /// Region.
    pub region_id: String,
    /// Zone; provider chooses when unset.
    pub zone_id: Option<String>,
    /// Instance type.
    pub instance_type: String,
    /// Instance name.
    pub instance_name: String,
    /// Source image id.
    pub image_id: Option<String>,
    /// Security group.
    pub security_group_id: String,
    /// VSwitch for VPC networking.
    pub vswitch_id: Option<String>,
    /// Internet charge type.
    pub internet_charge_type: Option<String>,
    /// Outbound bandwidth in Mbps.
    pub internet_max_bandwidth_out: Option<u32>,
    /// I/O optimisation; provider default when unset.
    pub io_optimized: Option<bool>,
    /// Login password.
    pub password: Option<String>,
    /// Base64-encoded user data.
    pub user_data: Option<String>,
    /// RAM role attached to the instance.
    pub ram_role_name: Option<String>,
    /// Security enhancement strategy.
    pub security_enhancement_strategy: Option<String>,
    /// Resource group.
    pub resource_group_id: Option<String>,
    /// System disk.
    pub system_disk: SystemDiskSpec,
    /// Data disks.
    pub data_disks: Vec<DataDiskSpec>,
    /// Instance tags.
    pub tags: BTreeMap<String, String>,
}

/// Allocates an elastic address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateEipRequest {
    /// Idempotency token.
    pub client_token: String,
    /// Region.
    pub region_id: String,
    /// Internet charge type.
    pub internet_charge_type: Option<String>,
    /// Bandwidth in Mbps.
    pub bandwidth: Option<u32>,
}

/// Image lookup criteria; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFilter {
    /// Region to search.
    pub region_id: String,
    /// Exact image id.
    pub image_id: Option<String>,
    /// Exact image name.
    pub image_name: Option<String>,
}

impl ImageFilter {
    /// Matches every image of a region.
    #[must_use]
    pub fn in_region(region_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            ..Self::default()
        }
    }

    /// Restricts to one image id.
    #[must_use]
    pub fn with_image_id(mut self, image_id: impl Into<String>) -> Self {
        self.image_id = Some(image_id.into());
        self
    }

    /// Restricts to one image name.
    #[must_use]
    pub fn with_image_name(mut self, image_name: impl Into<String>) -> Self {
        self.image_name = Some(image_name.into());
        self
    }

    /// Returns true if `image` satisfies the filter.
    #[must_use]
    pub fn matches(&self, image: &Image) -> bool {
        image.region_id == self.region_id
            && self.image_id.as_ref().map_or(true, |id| *id == image.image_id)
            && self
                .image_name
                .as_ref()
                .map_or(true, |name| *name == image.image_name)
    }
}

/// A disk of an image created from snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDiskSpec {
    /// Snapshot of the disk.
    pub snapshot_id: String,
    /// Device name.
    pub device: Option<String>,
    /// Size in GiB.
    pub size: Option<u32>,
}

/// Captures an image from an instance or from snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateImageRequest {
    /// Idempotency token.
    pub client_token: String,
    /// Region.
    pub region_id: String,
    /// Instance to capture; unset when capturing from snapshots.
    pub instance_id: Option<String>,
    /// Snapshots to capture when no instance is given.
    pub disk_device_mappings: Vec<ImageDiskSpec>,
    /// Image name.
    pub image_name: String,
    /// Image family.
    pub image_family: Option<String>,
    /// Image version.
    pub image_version: Option<String>,
    /// Image description.
    pub description: Option<String>,
    /// Boot mode.
    pub boot_mode: Option<String>,
    /// Resource group.
    pub resource_group_id: Option<String>,
}

/// Copies an image into another region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyImageRequest {
    /// Region of the source image.
    pub region_id: String,
    /// Source image id.
    pub image_id: String,
    /// Destination region.
    pub destination_region_id: String,
    /// Name of the copy; provider default when unset.
    pub destination_image_name: Option<String>,
    /// Encrypt the copy.
    pub encrypted: bool,
    /// KMS key used to encrypt the copy.
    pub kms_key_id: Option<String>,
    /// Resource group.
    pub resource_group_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(region: &str, id: &str, name: &str) -> Image {
        Image {
            image_id: id.into(),
            image_name: name.into(),
            region_id: region.into(),
            status: ImageStatus::Available,
            image_family: None,
            disk_device_mappings: vec![
                DiskDeviceMapping {
                    snapshot_id: "s-1".into(),
                    device: "/dev/xvda".into(),
                    size: 40,
                    encrypted: false,
                },
                DiskDeviceMapping {
                    snapshot_id: String::new(),
                    device: "/dev/xvdb".into(),
                    size: 100,
                    encrypted: true,
                },
            ],
        }
    }

    #[test]
    fn test_image_filter_matches() {
        let img = image("cn-beijing", "m-1", "golden");

        assert!(ImageFilter::in_region("cn-beijing").matches(&img));
        assert!(ImageFilter::in_region("cn-beijing")
            .with_image_name("golden")
            .matches(&img));
        assert!(!ImageFilter::in_region("cn-hangzhou").matches(&img));
        assert!(!ImageFilter::in_region("cn-beijing")
            .with_image_id("m-2")
            .matches(&img));
    }

    #[test]
    fn test_image_disk_helpers() {
        let img = image("cn-beijing", "m-1", "golden");
        assert!(img.is_encrypted());
        assert_eq!(img.snapshot_ids(), vec!["s-1".to_string()]);
    }

    #[test]
    fn test_status_spelling() {
        assert_eq!(InstanceStatus::Running.to_string(), "Running");
        assert_eq!(EipStatus::InUse.to_string(), "InUse");
        assert_eq!(ImageStatus::CreateFailed.to_string(), "CreateFailed");
        assert_eq!(TagResourceType::Snapshot.to_string(), "snapshot");
        assert_eq!(
            serde_json::to_string(&InstanceStatus::Stopped).unwrap(),
            "\"Stopped\""
        );
    }
}
