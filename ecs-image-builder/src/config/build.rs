//! Build configuration types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::Trilean;
use crate::errors::BuildResult;

/// Charge type used for classic networking when none is configured.
pub const DEFAULT_INTERNET_CHARGE_TYPE: &str = "PayByTraffic";
/// Bandwidth used for classic networking when none is configured.
pub const DEFAULT_INTERNET_MAX_BANDWIDTH_OUT: u32 = 5;
/// Default deadline for snapshot and image-copy waits, in seconds.
pub const DEFAULT_WAIT_READY_TIMEOUT_SECS: u64 = 3_600;

/// One disk of the build instance, and of the resulting image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskMapping {
    /// Disk name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_name: Option<String>,
    /// Disk category, e.g. `cloud_essd`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_category: Option<String>,
    /// Size in GiB; 0 leaves the provider default.
    #[serde(default)]
    pub disk_size: u32,
    /// Snapshot to create the disk from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_snapshot_id: Option<String>,
    /// Disk description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_description: Option<String>,
    /// Release the disk together with the instance.
    #[serde(default = "default_true")]
    pub disk_delete_with_instance: bool,
    /// Device name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_device: Option<String>,
    /// Encrypt the disk.
    #[serde(default)]
    pub disk_encrypted: Trilean,
}

fn default_true() -> bool {
    true
}

impl Default for DiskMapping {
    fn default() -> Self {
        Self {
            disk_name: None,
            disk_category: None,
            disk_size: 0,
            disk_snapshot_id: None,
            disk_description: None,
            disk_delete_with_instance: true,
            disk_device: None,
            disk_encrypted: Trilean::Unset,
        }
    }
}

impl DiskMapping {
    /// Creates a disk of the given size.
    #[must_use]
    pub fn sized(disk_size: u32) -> Self {
        Self {
            disk_size,
            ..Self::default()
        }
    }

    /// Sets the encryption flag.
    #[must_use]
    pub fn with_encrypted(mut self, encrypted: impl Into<Trilean>) -> Self {
        self.disk_encrypted = encrypted.into();
        self
    }

    /// Sets the source snapshot.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot_id: impl Into<String>) -> Self {
        self.disk_snapshot_id = Some(snapshot_id.into());
        self
    }
}

/// How the instance is attached to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    /// Classic networking with a provider-assigned public address.
    Classic,
    /// VPC networking through a vswitch.
    Vpc,
}

/// Network placement of the build instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// VPC to launch into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    /// VSwitch to launch into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vswitch_id: Option<String>,
}

impl NetworkConfig {
    /// Returns the networking mode implied by the settings.
    #[must_use]
    pub fn network_type(&self) -> NetworkType {
        if self.vpc_id.is_some() || self.vswitch_id.is_some() {
            NetworkType::Vpc
        } else {
            NetworkType::Classic
        }
    }
}

/// Remote-access settings handed to the provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicatorConfig {
    /// `ssh`, `winrm` or `none`.
    #[serde(rename = "communicator", default = "default_communicator")]
    pub kind: String,
    /// Login user.
    #[serde(default = "default_ssh_username")]
    pub ssh_username: String,
    /// SSH password, also used as the instance password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_password: Option<String>,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// WinRM password, used when no SSH password is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winrm_password: Option<String>,
}

fn default_communicator() -> String {
    "ssh".to_string()
}

fn default_ssh_username() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            kind: default_communicator(),
            ssh_username: default_ssh_username(),
            ssh_password: None,
            ssh_port: default_ssh_port(),
            winrm_password: None,
        }
    }
}

impl CommunicatorConfig {
    /// Returns true if no remote access is wanted.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.kind == "none"
    }

    /// Returns the password to set on the instance.
    #[must_use]
    pub fn instance_password(&self) -> Option<&str> {
        self.ssh_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .or_else(|| self.winrm_password.as_deref().filter(|p| !p.is_empty()))
    }
}

/// The complete, validated input of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Region the instance and the image are created in.
    #[serde(default)]
    pub region: String,

    // Instance
    /// Instance type.
    #[serde(default)]
    pub instance_type: String,
    /// Zone; the provider picks one when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    /// Instance name.
    #[serde(default)]
    pub instance_name: String,
    /// Source image id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image: Option<String>,
    /// Source image family; the newest image of the family is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_family: Option<String>,
    /// I/O optimisation.
    #[serde(default)]
    pub io_optimized: Trilean,
    /// Security group the instance joins.
    #[serde(default)]
    pub security_group_id: String,
    /// Security enhancement strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_enhancement_strategy: Option<String>,
    /// RAM role attached to the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_role_name: Option<String>,
    /// Resource group for instance and images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group_id: Option<String>,
    /// Internet charge type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_charge_type: Option<String>,
    /// Outbound bandwidth in Mbps; 0 leaves the default.
    #[serde(default)]
    pub internet_max_bandwidth_out: u32,
    /// Inline user data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    /// File holding the user data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_file: Option<PathBuf>,
    /// Tags for the build instance.
    #[serde(default)]
    pub instance_tags: BTreeMap<String, String>,
    /// Network placement.
    #[serde(flatten)]
    pub network: NetworkConfig,
    /// Bind a public address to the instance.
    #[serde(default)]
    pub associate_public_ip_address: bool,
    /// Caller-owned address to bind instead of allocating one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eip_id: Option<String>,
    /// Connect through the private address.
    #[serde(default)]
    pub ssh_private_ip: bool,
    /// Remote-access settings.
    #[serde(flatten)]
    pub communicator: CommunicatorConfig,

    // Disks
    /// System disk.
    #[serde(default)]
    pub system_disk_mapping: DiskMapping,
    /// Data disks.
    #[serde(default)]
    pub image_disk_mappings: Vec<DiskMapping>,

    // Image
    /// Name of the image to create.
    #[serde(default)]
    pub image_name: String,
    /// Image version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_version: Option<String>,
    /// Image description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_description: Option<String>,
    /// Family the new image joins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_image_family: Option<String>,
    /// Boot mode of the new image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_mode: Option<String>,
    /// Tags for the image and its snapshots.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Regions to copy the image into.
    #[serde(default)]
    pub image_copy_regions: Vec<String>,
    /// Names of the copies, by index of `image_copy_regions`.
    #[serde(default)]
    pub image_copy_names: Vec<String>,
    /// KMS keys for encrypted copies, by index of `image_copy_regions`.
    #[serde(default)]
    pub image_copy_kms_key_ids: Vec<String>,
    /// Encrypt the image (through a copy in the build region).
    #[serde(default)]
    pub image_encrypted: Trilean,
    /// Replace images that already carry `image_name`.
    #[serde(default)]
    pub image_force_delete: bool,
    /// Also delete the snapshots of replaced images.
    #[serde(default)]
    pub image_force_delete_snapshots: bool,
    /// Deadline for the image to become available, in seconds.
    #[serde(default = "default_wait_ready_timeout")]
    pub wait_snapshot_ready_timeout: u64,
    /// Deadline for the in-region encrypted copy, in seconds.
    #[serde(default = "default_wait_ready_timeout")]
    pub wait_copying_image_ready_timeout: u64,
}

fn default_wait_ready_timeout() -> u64 {
    DEFAULT_WAIT_READY_TIMEOUT_SECS
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            instance_type: String::new(),
            zone_id: None,
            instance_name: String::new(),
            source_image: None,
            image_family: None,
            io_optimized: Trilean::Unset,
            security_group_id: String::new(),
            security_enhancement_strategy: None,
            ram_role_name: None,
            resource_group_id: None,
            internet_charge_type: None,
            internet_max_bandwidth_out: 0,
            user_data: None,
            user_data_file: None,
            instance_tags: BTreeMap::new(),
            network: NetworkConfig::default(),
            associate_public_ip_address: false,
            eip_id: None,
            ssh_private_ip: false,
            communicator: CommunicatorConfig::default(),
            system_disk_mapping: DiskMapping::default(),
            image_disk_mappings: Vec::new(),
            image_name: String::new(),
            image_version: None,
            image_description: None,
            target_image_family: None,
            boot_mode: None,
            tags: BTreeMap::new(),
            image_copy_regions: Vec::new(),
            image_copy_names: Vec::new(),
            image_copy_kms_key_ids: Vec::new(),
            image_encrypted: Trilean::Unset,
            image_force_delete: false,
            image_force_delete_snapshots: false,
            wait_snapshot_ready_timeout: DEFAULT_WAIT_READY_TIMEOUT_SECS,
            wait_copying_image_ready_timeout: DEFAULT_WAIT_READY_TIMEOUT_SECS,
        }
    }
}

impl BuildConfig {
    /// Creates a config with the required fields set.
    #[must_use]
    pub fn new(
        region: impl Into<String>,
        instance_type: impl Into<String>,
        image_name: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            instance_type: instance_type.into(),
            image_name: image_name.into(),
            ..Self::default()
        }
    }

    /// Parses a config from JSON. Does not validate.
    pub fn from_json(json: &str) -> BuildResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the source image id.
    #[must_use]
    pub fn with_source_image(mut self, image_id: impl Into<String>) -> Self {
        self.source_image = Some(image_id.into());
        self
    }

    /// Sets the source image family.
    #[must_use]
    pub fn with_image_family(mut self, family: impl Into<String>) -> Self {
        self.image_family = Some(family.into());
        self
    }

    /// Sets the security group.
    #[must_use]
    pub fn with_security_group(mut self, security_group_id: impl Into<String>) -> Self {
        self.security_group_id = security_group_id.into();
        self
    }

    /// Launches into a VPC.
    #[must_use]
    pub fn with_vpc(mut self, vpc_id: impl Into<String>, vswitch_id: impl Into<String>) -> Self {
        self.network = NetworkConfig {
            vpc_id: Some(vpc_id.into()),
            vswitch_id: Some(vswitch_id.into()),
        };
        self
    }

    /// Adds copy destinations with their names.
    #[must_use]
    pub fn with_copies<I, R, N>(mut self, copies: I) -> Self
    where
        I: IntoIterator<Item = (R, N)>,
        R: Into<String>,
        N: Into<String>,
    {
        for (region, name) in copies {
            self.image_copy_regions.push(region.into());
            self.image_copy_names.push(name.into());
        }
        self
    }

    /// Sets image encryption.
    #[must_use]
    pub fn with_image_encrypted(mut self, encrypted: impl Into<Trilean>) -> Self {
        self.image_encrypted = encrypted.into();
        self
    }

    /// Adds an image tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Replaces images of the same name, optionally with their snapshots.
    #[must_use]
    pub fn with_force_delete(mut self, snapshots: bool) -> Self {
        self.image_force_delete = true;
        self.image_force_delete_snapshots = snapshots;
        self
    }

    /// Binds a public address, optionally a caller-owned one.
    #[must_use]
    pub fn with_public_ip(mut self, eip_id: Option<String>) -> Self {
        self.associate_public_ip_address = true;
        self.eip_id = eip_id;
        self
    }

    /// Returns the networking mode.
    #[must_use]
    pub fn network_type(&self) -> NetworkType {
        self.network.network_type()
    }

    /// Returns the image-ready deadline.
    #[must_use]
    pub fn snapshot_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_snapshot_ready_timeout)
    }

    /// Returns the encrypted-copy deadline.
    #[must_use]
    pub fn copying_image_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_copying_image_ready_timeout)
    }

    /// Returns the build region followed by every distinct copy region.
    #[must_use]
    pub fn image_regions(&self) -> Vec<String> {
        let mut regions = vec![self.region.clone()];
        for region in &self.image_copy_regions {
            if !regions.contains(region) {
                regions.push(region.clone());
            }
        }
        regions
    }
}
