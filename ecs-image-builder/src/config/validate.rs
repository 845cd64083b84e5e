//! Configuration validation.

use regex::Regex;
use std::sync::LazyLock;

use super::{BuildConfig, DiskMapping, NetworkType};
use crate::errors::ConfigError;

/// Boot modes accepted for the new image.
pub const BOOT_MODES: [&str; 3] = ["BIOS", "UEFI", "UEFI-Preferred"];

const RESERVED_FAMILY_PREFIXES: [&str; 4] = ["aliyun", "acs:", "http://", "https://"];

// Letter or CJK first, then letters, digits, CJK and `._-:`; 2-128 characters.
static IMAGE_FAMILY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z\p{Han}][\p{Han}a-zA-Z0-9._:\-]{1,127}$").ok());

const SYSTEM_DISK_SIZE: (u32, u32) = (20, 500);
const DATA_DISK_SIZE: (u32, u32) = (20, 32_768);

impl BuildConfig {
    /// Checks the configuration and reports every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errs = Vec::new();

        if self.region.trim().is_empty() {
            errs.push("region must be specified".to_string());
        }
        if self.instance_type.trim().is_empty() {
            errs.push("instance_type must be specified".to_string());
        }
        if self.security_group_id.trim().is_empty() {
            errs.push("security_group_id must be specified".to_string());
        }

        match (&self.source_image, &self.image_family) {
            (None, None) => {
                errs.push("one of source_image or image_family must be specified".to_string());
            }
            (Some(_), Some(_)) => errs.push(
                "only one of source_image or image_family can be specified".to_string(),
            ),
            _ => {}
        }

        self.validate_image(&mut errs);
        self.validate_disks(&mut errs);
        self.validate_network(&mut errs);

        if self.user_data.is_some() && self.user_data_file.is_some() {
            errs.push("only one of user_data or user_data_file can be specified".to_string());
        }
        if let Some(path) = &self.user_data_file {
            if !path.is_file() {
                errs.push(format!("user_data_file not found: {}", path.display()));
            }
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errs))
        }
    }

    fn validate_image(&self, errs: &mut Vec<String>) {
        let name_len = self.image_name.chars().count();
        if name_len == 0 {
            errs.push("image_name must be specified".to_string());
        } else if !(2..=128).contains(&name_len) {
            errs.push("image_name must be between 2 and 128 characters".to_string());
        }

        if let Some(family) = &self.target_image_family {
            if let Err(e) = validate_image_family(family) {
                errs.push(e);
            }
        }

        if let Some(mode) = &self.boot_mode {
            if !BOOT_MODES.contains(&mode.as_str()) {
                errs.push(format!(
                    "boot_mode must be one of {}, got '{mode}'",
                    BOOT_MODES.join(", ")
                ));
            }
        }

        if self.image_copy_names.len() > self.image_copy_regions.len() {
            errs.push("image_copy_names must not outnumber image_copy_regions".to_string());
        }

        if !self.image_copy_kms_key_ids.is_empty() {
            if !self.image_encrypted.is_set() {
                errs.push("image_copy_kms_key_ids requires image_encrypted".to_string());
            }
            if self.image_copy_kms_key_ids.len() > self.image_copy_regions.len() {
                errs.push(
                    "image_copy_kms_key_ids must not outnumber image_copy_regions".to_string(),
                );
            }
        }

        if self.image_force_delete_snapshots && !self.image_force_delete {
            errs.push("image_force_delete_snapshots requires image_force_delete".to_string());
        }
    }

    fn validate_disks(&self, errs: &mut Vec<String>) {
        check_disk_size("system disk", &self.system_disk_mapping, SYSTEM_DISK_SIZE, errs);
        for (index, disk) in self.image_disk_mappings.iter().enumerate() {
            check_disk_size(&format!("data disk {index}"), disk, DATA_DISK_SIZE, errs);
        }
    }

    fn validate_network(&self, errs: &mut Vec<String>) {
        if self.eip_id.is_some() && !self.associate_public_ip_address {
            errs.push("eip_id requires associate_public_ip_address".to_string());
        }

        if self.network_type() == NetworkType::Vpc
            && self
                .network
                .vswitch_id
                .as_deref()
                .map_or(true, |v| v.trim().is_empty())
        {
            errs.push("vswitch_id must be specified for VPC networking".to_string());
        }
    }
}

fn check_disk_size(
    label: &str,
    disk: &DiskMapping,
    (min, max): (u32, u32),
    errs: &mut Vec<String>,
) {
    if disk.disk_size != 0 && !(min..=max).contains(&disk.disk_size) {
        errs.push(format!(
            "{label} size must be between {min} and {max} GiB, got {}",
            disk.disk_size
        ));
    }
}

/// Checks a target image family name.
pub fn validate_image_family(family: &str) -> Result<(), String> {
    let well_formed = IMAGE_FAMILY
        .as_ref()
        .is_some_and(|re| re.is_match(family));
    if !well_formed {
        return Err(format!(
            "target_image_family '{family}' must be 2-128 characters, start with a letter or \
             Chinese character, and contain only letters, digits, Chinese characters, '.', '_', \
             '-' or ':'"
        ));
    }

    let lower = family.to_ascii_lowercase();
    if let Some(prefix) = RESERVED_FAMILY_PREFIXES
        .iter()
        .find(|p| lower.starts_with(**p))
    {
        return Err(format!(
            "target_image_family '{family}' must not start with '{prefix}'"
        ));
    }

    Ok(())
}
