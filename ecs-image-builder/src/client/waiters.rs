//! Status waiters built on the poll-retry engine.

use async_trait::async_trait;

use super::{EcsClient, EipAddress, EipStatus, Image, ImageFilter, ImageStatus, Instance, InstanceStatus};
use crate::cancellation::CancellationToken;
use crate::errors::{ProviderError, WaitError};
use crate::retry::{wait_for_expected, RetryConfig, WaitResult};

/// Polls the control plane until a resource reaches a status.
///
/// Describe errors count as "not there yet": a freshly created resource is
/// commonly invisible to describe calls for a few seconds.
#[async_trait]
pub trait ClientExt {
    /// Waits until the instance reports `expected`.
    async fn wait_for_instance_status(
        &self,
        region_id: &str,
        instance_id: &str,
        expected: InstanceStatus,
        retry: &RetryConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<Instance, WaitError>;

    /// Waits until the address reports `expected`.
    async fn wait_for_eip_status(
        &self,
        region_id: &str,
        allocation_id: &str,
        expected: EipStatus,
        retry: &RetryConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<EipAddress, WaitError>;

    /// Waits until the image reports `expected`.
    ///
    /// An image that lands in `CreateFailed` ends the wait immediately.
    async fn wait_for_image_status(
        &self,
        region_id: &str,
        image_id: &str,
        expected: ImageStatus,
        retry: &RetryConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<Image, WaitError>;
}

#[async_trait]
impl<C> ClientExt for C
where
    C: EcsClient + ?Sized,
{
    async fn wait_for_instance_status(
        &self,
        region_id: &str,
        instance_id: &str,
        expected: InstanceStatus,
        retry: &RetryConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<Instance, WaitError> {
        wait_for_expected(
            retry,
            cancel,
            || self.describe_instance(region_id, instance_id),
            |response| match response {
                Ok(instance) if instance.status == expected => WaitResult::Success,
                _ => WaitResult::Retry,
            },
        )
        .await
    }

    async fn wait_for_eip_status(
        &self,
        region_id: &str,
        allocation_id: &str,
        expected: EipStatus,
        retry: &RetryConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<EipAddress, WaitError> {
        wait_for_expected(
            retry,
            cancel,
            || async move {
                let mut eips = self.describe_eips(region_id, allocation_id).await?;
                match eips.iter().position(|e| e.allocation_id == allocation_id) {
                    Some(index) => Ok(eips.swap_remove(index)),
                    None => Err(ProviderError::not_found("EIP", allocation_id)),
                }
            },
            |response| match response {
                Ok(eip) if eip.status == expected => WaitResult::Success,
                _ => WaitResult::Retry,
            },
        )
        .await
    }

    async fn wait_for_image_status(
        &self,
        region_id: &str,
        image_id: &str,
        expected: ImageStatus,
        retry: &RetryConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<Image, WaitError> {
        let filter = ImageFilter::in_region(region_id).with_image_id(image_id);
        wait_for_expected(
            retry,
            cancel,
            || {
                let filter = &filter;
                async move {
                    self.describe_images(filter)
                        .await?
                        .into_iter()
                        .next()
                        .ok_or_else(|| ProviderError::not_found("Image", image_id))
                }
            },
            |response| match response {
                Ok(image) if image.status == expected => WaitResult::Success,
                Ok(image)
                    if image.status == ImageStatus::CreateFailed
                        && expected != ImageStatus::CreateFailed =>
                {
                    WaitResult::Fail
                }
                _ => WaitResult::Retry,
            },
        )
        .await
    }
}
