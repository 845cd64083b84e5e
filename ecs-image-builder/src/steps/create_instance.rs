use async_trait::async_trait;
use base64::Engine;
use uuid::Uuid;

use super::{cleanup_message, halt, Step};
use crate::client::{
    codes, ClientExt, DataDiskSpec, InstanceStatus, RunInstancesRequest, SystemDiskSpec,
};
use crate::config::{
    BuildConfig, DiskMapping, NetworkType, DEFAULT_INTERNET_CHARGE_TYPE,
    DEFAULT_INTERNET_MAX_BANDWIDTH_OUT,
};
use crate::context::RunContext;
use crate::core::StepAction;
use crate::errors::BuildResult;
use crate::retry::{retry_on_codes, wait_for_expected};

/// Launches the build instance and leaves it stopped.
///
/// The instance id is kept as soon as the launch is accepted so cleanup can
/// force-delete it even when a later wait in this step fails.
#[derive(Debug, Default)]
pub struct CreateInstance {
    instance_id: Option<String>,
}

impl CreateInstance {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of the launched instance.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }
}

#[async_trait]
impl Step for CreateInstance {
    fn name(&self) -> &str {
        "create_instance"
    }

    async fn run(&mut self, ctx: &mut RunContext) -> StepAction {
        ctx.ui.say("Creating instance...");

        let source_image_id = match ctx.source_image() {
            Ok(image) => image.image_id.clone(),
            Err(e) => return halt(ctx, self.name(), e.into(), "Error reading source image"),
        };
        let request = match build_request(&ctx.config, &source_image_id).await {
            Ok(request) => request,
            Err(e) => return halt(ctx, self.name(), e, "Error building instance request"),
        };

        let launched = wait_for_expected(
            &ctx.retry.default,
            ctx.cancel_token(),
            || ctx.client.run_instances(&request),
            retry_on_codes(&[codes::IDEMPOTENT_PROCESSING]),
        )
        .await;
        let instance_id = match launched {
            Ok(id) => id,
            Err(e) => return halt(ctx, self.name(), e.into(), "Error creating instance"),
        };
        tracing::info!(step = self.name(), instance_id = %instance_id, "Instance launched");
        self.instance_id = Some(instance_id.clone());

        let region = ctx.config.region.clone();
        let running = ctx
            .client
            .wait_for_instance_status(
                &region,
                &instance_id,
                InstanceStatus::Running,
                &ctx.retry.short,
                ctx.cancel_token(),
            )
            .await;
        if let Err(e) = running {
            return halt(
                ctx,
                self.name(),
                e.into(),
                "Error waiting for instance to be running",
            );
        }

        if let Err(e) = ctx.client.stop_instance(&region, &instance_id, false).await {
            return halt(ctx, self.name(), e.into(), "Error stopping instance");
        }
        let stopped = ctx
            .client
            .wait_for_instance_status(
                &region,
                &instance_id,
                InstanceStatus::Stopped,
                &ctx.retry.short,
                ctx.cancel_token(),
            )
            .await;
        let instance = match stopped {
            Ok(instance) => instance,
            Err(e) => {
                return halt(
                    ctx,
                    self.name(),
                    e.into(),
                    "Error waiting for instance to be stopped",
                )
            }
        };

        if let Err(e) = ctx.set_instance(instance) {
            return halt(ctx, self.name(), e.into(), "");
        }
        ctx.ui.message(&format!("Created instance: {instance_id}"));
        StepAction::Continue
    }

    async fn cleanup(&mut self, ctx: &mut RunContext) {
        let Some(instance_id) = self.instance_id.take() else {
            return;
        };

        ctx.ui.say(&cleanup_message(ctx, "instance"));

        let region = ctx.config.region.clone();
        let deleted = wait_for_expected(
            &ctx.retry.short,
            None,
            || ctx.client.delete_instance(&region, &instance_id, true),
            retry_on_codes(&[codes::INSTANCE_INITIALIZING]),
        )
        .await;
        if let Err(e) = deleted {
            tracing::warn!(instance_id = %instance_id, error = %e, "Instance cleanup failed");
            ctx.ui
                .error(&format!("Failed to clean up instance {instance_id}: {e}"));
        }
    }
}

/// Builds the launch request, with a fresh client token.
pub(crate) async fn build_request(
    config: &BuildConfig,
    source_image_id: &str,
) -> BuildResult<RunInstancesRequest> {
    let mut request = RunInstancesRequest {
        client_token: Uuid::now_v7().to_string(),
        region_id: config.region.clone(),
        zone_id: config.zone_id.clone(),
        instance_type: config.instance_type.clone(),
        instance_name: config.instance_name.clone(),
        image_id: Some(source_image_id.to_string()),
        security_group_id: config.security_group_id.clone(),
        io_optimized: config.io_optimized.to_option(),
        password: config.communicator.instance_password().map(str::to_string),
        user_data: user_data(config).await?,
        ram_role_name: config.ram_role_name.clone(),
        security_enhancement_strategy: config.security_enhancement_strategy.clone(),
        resource_group_id: config.resource_group_id.clone(),
        system_disk: system_disk(&config.system_disk_mapping),
        data_disks: config.image_disk_mappings.iter().map(data_disk).collect(),
        tags: config.instance_tags.clone(),
        ..RunInstancesRequest::default()
    };

    let bandwidth = non_zero(config.internet_max_bandwidth_out);
    match config.network_type() {
        NetworkType::Vpc => {
            request.vswitch_id = config.network.vswitch_id.clone();
            request.internet_charge_type = config.internet_charge_type.clone();
            request.internet_max_bandwidth_out = bandwidth;
        }
        NetworkType::Classic => {
            request.internet_charge_type = Some(
                config
                    .internet_charge_type
                    .clone()
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| DEFAULT_INTERNET_CHARGE_TYPE.to_string()),
            );
            request.internet_max_bandwidth_out =
                Some(bandwidth.unwrap_or(DEFAULT_INTERNET_MAX_BANDWIDTH_OUT));
        }
    }

    Ok(request)
}

async fn user_data(config: &BuildConfig) -> BuildResult<Option<String>> {
    let raw = match (&config.user_data, &config.user_data_file) {
        (Some(data), _) => data.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path).await?,
        (None, None) => return Ok(None),
    };
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        base64::engine::general_purpose::STANDARD.encode(raw.as_bytes()),
    ))
}

fn non_zero(size: u32) -> Option<u32> {
    (size > 0).then_some(size)
}

fn system_disk(disk: &DiskMapping) -> SystemDiskSpec {
    SystemDiskSpec {
        category: disk.disk_category.clone(),
        size: non_zero(disk.disk_size),
        name: disk.disk_name.clone(),
        description: disk.disk_description.clone(),
        encrypted: disk.disk_encrypted.to_option(),
    }
}

fn data_disk(disk: &DiskMapping) -> DataDiskSpec {
    DataDiskSpec {
        name: disk.disk_name.clone(),
        category: disk.disk_category.clone(),
        size: non_zero(disk.disk_size),
        snapshot_id: disk.disk_snapshot_id.clone(),
        description: disk.disk_description.clone(),
        delete_with_instance: disk.disk_delete_with_instance,
        device: disk.disk_device.clone(),
        encrypted: disk.disk_encrypted.to_option(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ops;
    use crate::core::Trilean;
    use crate::errors::ProviderError;
    use crate::testing::{test_config, TestContext};
    use crate::ui::UiLevel;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn ready_context(fixture: &TestContext) -> RunContext {
        let mut ctx = fixture.build();
        let image = fixture.client.image("ubuntu_20_04").unwrap();
        ctx.set_source_image(image).unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_classic_request_defaults() {
        let mut config = test_config();
        config.network = Default::default();
        config.communicator.ssh_password = Some("secret".into());

        let request = build_request(&config, "ubuntu_20_04").await.unwrap();

        assert_eq!(request.internet_charge_type.as_deref(), Some("PayByTraffic"));
        assert_eq!(request.internet_max_bandwidth_out, Some(5));
        assert_eq!(request.vswitch_id, None);
        assert_eq!(request.password.as_deref(), Some("secret"));
        assert_eq!(request.image_id.as_deref(), Some("ubuntu_20_04"));
    }

    #[tokio::test]
    async fn test_vpc_request_keeps_configured_network() {
        let request = build_request(&test_config(), "ubuntu_20_04").await.unwrap();

        assert_eq!(request.vswitch_id.as_deref(), Some("vsw-1"));
        assert_eq!(request.internet_charge_type, None);
        assert_eq!(request.internet_max_bandwidth_out, None);
        assert_eq!(request.io_optimized, None);
    }

    #[tokio::test]
    async fn test_request_disks_and_user_data_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "#!/bin/sh\necho hi").unwrap();

        let mut config = test_config();
        config.user_data_file = Some(file.path().to_path_buf());
        config.io_optimized = Trilean::True;
        config.system_disk_mapping = DiskMapping::sized(60).with_encrypted(true);
        config.image_disk_mappings = vec![DiskMapping::sized(100).with_snapshot("s-data")];

        let request = build_request(&config, "ubuntu_20_04").await.unwrap();

        assert_eq!(
            request.user_data.as_deref(),
            Some(base64::engine::general_purpose::STANDARD.encode("#!/bin/sh\necho hi").as_str())
        );
        assert_eq!(request.io_optimized, Some(true));
        assert_eq!(request.system_disk.size, Some(60));
        assert_eq!(request.system_disk.encrypted, Some(true));
        assert_eq!(request.data_disks.len(), 1);
        assert_eq!(request.data_disks[0].snapshot_id.as_deref(), Some("s-data"));
        assert!(request.data_disks[0].delete_with_instance);
        assert_eq!(request.data_disks[0].encrypted, None);
    }

    #[tokio::test]
    async fn test_each_request_gets_a_fresh_token() {
        let config = test_config();
        let first = build_request(&config, "ubuntu_20_04").await.unwrap();
        let second = build_request(&config, "ubuntu_20_04").await.unwrap();
        assert_ne!(first.client_token, second.client_token);
    }

    #[tokio::test(start_paused = true)]
    async fn test_creates_and_stops_instance() {
        let fixture = TestContext::new();
        let mut ctx = ready_context(&fixture);
        let mut step = CreateInstance::new();

        let action = step.run(&mut ctx).await;

        assert_eq!(action, StepAction::Continue);
        let instance = ctx.instance().unwrap();
        assert_eq!(instance.status, InstanceStatus::Stopped);
        assert_eq!(step.instance_id(), Some(instance.instance_id.as_str()));
        assert_eq!(
            fixture.client.instance(&instance.instance_id).unwrap().status,
            InstanceStatus::Stopped
        );
        assert!(fixture
            .ui
            .contains(&format!("Created instance: {}", instance.instance_id)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_idempotent_processing() {
        let fixture = TestContext::new();
        fixture.client.fail_next(
            ops::RUN_INSTANCES,
            ProviderError::new(codes::IDEMPOTENT_PROCESSING, "busy"),
        );
        let mut ctx = ready_context(&fixture);

        let action = CreateInstance::new().run(&mut ctx).await;

        assert_eq!(action, StepAction::Continue);
        assert_eq!(fixture.client.calls_of(ops::RUN_INSTANCES), 2);
        assert_eq!(fixture.client.instance_ids().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_launch_error_halts_without_instance() {
        let fixture = TestContext::new();
        fixture.client.fail_next(
            ops::RUN_INSTANCES,
            ProviderError::new("InvalidInstanceType.NotSupported", "nope"),
        );
        let mut ctx = ready_context(&fixture);
        let mut step = CreateInstance::new();

        assert_eq!(step.run(&mut ctx).await, StepAction::Halt);
        assert_eq!(step.instance_id(), None);
        assert_eq!(
            ctx.error().unwrap().provider_code(),
            Some("InvalidInstanceType.NotSupported")
        );

        step.cleanup(&mut ctx).await;
        assert_eq!(fixture.client.calls_of(ops::DELETE_INSTANCE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_force_deletes_after_initializing() {
        let fixture = TestContext::new();
        let mut ctx = ready_context(&fixture);
        let mut step = CreateInstance::new();
        step.run(&mut ctx).await;
        let instance_id = step.instance_id().unwrap().to_string();

        fixture.client.fail_next(
            ops::DELETE_INSTANCE,
            ProviderError::new(codes::INSTANCE_INITIALIZING, "still booting"),
        );
        ctx.mark_cancelled();
        step.cleanup(&mut ctx).await;

        assert!(fixture.client.instance(&instance_id).is_none());
        assert_eq!(fixture.client.calls_of(ops::DELETE_INSTANCE), 2);
        assert!(fixture
            .ui
            .contains("Deleting instance because of cancellation or error..."));

        step.cleanup(&mut ctx).await;
        assert_eq!(fixture.client.calls_of(ops::DELETE_INSTANCE), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_failure_is_reported() {
        let fixture = TestContext::new();
        let mut ctx = ready_context(&fixture);
        let mut step = CreateInstance::new();
        step.run(&mut ctx).await;

        fixture
            .client
            .fail_next(ops::DELETE_INSTANCE, ProviderError::new("Forbidden", "denied"));
        step.cleanup(&mut ctx).await;

        let errors = fixture.ui.lines_at(UiLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Failed to clean up instance i-"));
    }
}
