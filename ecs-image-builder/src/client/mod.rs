//! The control-plane capability the build steps need.
//!
//! Transport, signing and credentials live behind [`EcsClient`]; the steps
//! only see typed requests, typed responses and classified
//! [`ProviderError`]s.

mod models;
mod waiters;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::errors::ProviderError;

pub use models::{
    AllocateEipRequest, CopyImageRequest, CreateImageRequest, DataDiskSpec, DiskDeviceMapping,
    EipAddress, EipStatus, Image, ImageDiskSpec, ImageFilter, ImageStatus, Instance,
    InstanceStatus, RunInstancesRequest, SystemDiskSpec, TagResourceType,
};
pub use waiters::ClientExt;

/// Provider error codes the steps classify.
pub mod codes {
    /// A request with the same client token is still being processed.
    pub const IDEMPOTENT_PROCESSING: &str = "IdempotentProcessing";
    /// The instance cannot be deleted while it initialises.
    pub const INSTANCE_INITIALIZING: &str = "IncorrectInstanceStatus.Initializing";
    /// The previous allocation with this token has not finished.
    pub const LAST_TOKEN_PROCESSING: &str = "LastTokenProcessing";
    /// Another task on the same address is in flight.
    pub const TASK_CONFLICT: &str = "TaskConflict";
}

/// Operation names, as recorded by call logs.
pub mod ops {
    #![allow(missing_docs)]

    pub const RUN_INSTANCES: &str = "RunInstances";
    pub const DESCRIBE_INSTANCE: &str = "DescribeInstances";
    pub const START_INSTANCE: &str = "StartInstance";
    pub const STOP_INSTANCE: &str = "StopInstance";
    pub const DELETE_INSTANCE: &str = "DeleteInstance";
    pub const ALLOCATE_EIP: &str = "AllocateEipAddress";
    pub const DESCRIBE_EIPS: &str = "DescribeEipAddresses";
    pub const ASSOCIATE_EIP: &str = "AssociateEipAddress";
    pub const UNASSOCIATE_EIP: &str = "UnassociateEipAddress";
    pub const RELEASE_EIP: &str = "ReleaseEipAddress";
    pub const DESCRIBE_IMAGES: &str = "DescribeImages";
    pub const DESCRIBE_IMAGE_FROM_FAMILY: &str = "DescribeImageFromFamily";
    pub const CREATE_IMAGE: &str = "CreateImage";
    pub const DELETE_IMAGE: &str = "DeleteImage";
    pub const DELETE_SNAPSHOT: &str = "DeleteSnapshot";
    pub const COPY_IMAGE: &str = "CopyImage";
    pub const CANCEL_COPY_IMAGE: &str = "CancelCopyImage";
    pub const ADD_TAGS: &str = "AddTags";
}

/// Typed access to the compute control plane.
///
/// Every call either returns the provider's response or a
/// [`ProviderError`] with a stable code. Asynchronous operations return as
/// soon as the provider accepts them; completion is observed by polling the
/// `describe_*` calls.
#[async_trait]
pub trait EcsClient: Send + Sync + Debug {
    /// Launches an instance and returns its id.
    async fn run_instances(&self, request: &RunInstancesRequest) -> Result<String, ProviderError>;

    /// Describes one instance.
    async fn describe_instance(
        &self,
        region_id: &str,
        instance_id: &str,
    ) -> Result<Instance, ProviderError>;

    /// Starts a stopped instance.
    async fn start_instance(&self, region_id: &str, instance_id: &str)
        -> Result<(), ProviderError>;

    /// Stops a running instance.
    async fn stop_instance(
        &self,
        region_id: &str,
        instance_id: &str,
        force: bool,
    ) -> Result<(), ProviderError>;

    /// Deletes an instance.
    async fn delete_instance(
        &self,
        region_id: &str,
        instance_id: &str,
        force: bool,
    ) -> Result<(), ProviderError>;

    /// Allocates an elastic address.
    async fn allocate_eip(&self, request: &AllocateEipRequest)
        -> Result<EipAddress, ProviderError>;

    /// Describes the address with the given allocation id.
    async fn describe_eips(
        &self,
        region_id: &str,
        allocation_id: &str,
    ) -> Result<Vec<EipAddress>, ProviderError>;

    /// Binds an address to an instance.
    async fn associate_eip(
        &self,
        region_id: &str,
        allocation_id: &str,
        instance_id: &str,
    ) -> Result<(), ProviderError>;

    /// Detaches an address from an instance.
    async fn unassociate_eip(
        &self,
        region_id: &str,
        allocation_id: &str,
        instance_id: &str,
    ) -> Result<(), ProviderError>;

    /// Releases an address.
    async fn release_eip(&self, region_id: &str, allocation_id: &str)
        -> Result<(), ProviderError>;

    /// Lists the images matching `filter`.
    async fn describe_images(&self, filter: &ImageFilter) -> Result<Vec<Image>, ProviderError>;

    /// Returns the newest available image of a family, if any.
    async fn describe_image_from_family(
        &self,
        region_id: &str,
        image_family: &str,
    ) -> Result<Option<Image>, ProviderError>;

    /// Starts capturing an image and returns its id.
    async fn create_image(&self, request: &CreateImageRequest) -> Result<String, ProviderError>;

    /// Deletes an image.
    async fn delete_image(
        &self,
        region_id: &str,
        image_id: &str,
        force: bool,
    ) -> Result<(), ProviderError>;

    /// Deletes a snapshot.
    async fn delete_snapshot(
        &self,
        region_id: &str,
        snapshot_id: &str,
        force: bool,
    ) -> Result<(), ProviderError>;

    /// Starts copying an image and returns the id of the copy.
    async fn copy_image(&self, request: &CopyImageRequest) -> Result<String, ProviderError>;

    /// Cancels an in-flight copy in the destination region.
    async fn cancel_copy_image(&self, region_id: &str, image_id: &str)
        -> Result<(), ProviderError>;

    /// Attaches tags to a resource.
    async fn add_tags(
        &self,
        region_id: &str,
        resource_type: TagResourceType,
        resource_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError>;
}
