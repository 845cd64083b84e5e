//! In-memory control plane for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::client::{
    ops, AllocateEipRequest, CopyImageRequest, CreateImageRequest, DiskDeviceMapping, EcsClient,
    EipAddress, EipStatus, Image, ImageFilter, ImageStatus, Instance, InstanceStatus,
    RunInstancesRequest, TagResourceType,
};
use crate::errors::ProviderError;

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
    /// Operation name from [`ops`].
    pub op: &'static str,
    /// Primary resource id or region the call targeted.
    pub target: String,
}

/// A status transition that completes after a number of describe calls.
#[derive(Debug, Clone, Copy)]
struct Transition<S> {
    target: S,
    remaining: u32,
}

impl<S: Copy> Transition<S> {
    fn new(target: S, after: u32) -> Self {
        Self {
            target,
            remaining: after,
        }
    }

    /// Counts one describe; returns the target once it has settled.
    fn tick(&mut self) -> Option<S> {
        self.remaining = self.remaining.saturating_sub(1);
        (self.remaining == 0).then_some(self.target)
    }
}

#[derive(Debug)]
struct FakeInstance {
    instance: Instance,
    disks: usize,
    encrypted: bool,
    transition: Option<Transition<InstanceStatus>>,
}

#[derive(Debug)]
struct FakeEip {
    eip: EipAddress,
    transition: Option<Transition<EipStatus>>,
}

#[derive(Debug)]
struct FakeImage {
    image: Image,
    /// Creation order, for "newest in family" lookups.
    order: u64,
    transition: Option<Transition<ImageStatus>>,
}

struct CancelHook {
    op: &'static str,
    nth: usize,
    token: Arc<CancellationToken>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    instances: BTreeMap<String, FakeInstance>,
    eips: BTreeMap<String, FakeEip>,
    images: BTreeMap<String, FakeImage>,
    snapshots: BTreeSet<String>,
    tags: BTreeMap<String, BTreeMap<String, String>>,
    run_requests: Vec<RunInstancesRequest>,
    copy_requests: Vec<CopyImageRequest>,
    failures: HashMap<&'static str, VecDeque<ProviderError>>,
    hooks: Vec<CancelHook>,
    calls: Vec<FakeCall>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }

    fn insert_image(&mut self, image: Image, transition: Option<Transition<ImageStatus>>) {
        self.next_id += 1;
        let order = self.next_id;
        self.images.insert(
            image.image_id.clone(),
            FakeImage {
                image,
                order,
                transition,
            },
        );
    }

    /// Records the call, fires cancel hooks and pops an injected failure.
    fn enter(&mut self, op: &'static str, target: &str) -> Result<(), ProviderError> {
        self.calls.push(FakeCall {
            op,
            target: target.to_string(),
        });

        let seen = self.calls.iter().filter(|c| c.op == op).count();
        for hook in self.hooks.iter().filter(|h| h.op == op && h.nth == seen) {
            hook.token.cancel(format!("cancelled on {op} #{seen}"));
        }

        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn instance_mut(&mut self, id: &str) -> Result<&mut FakeInstance, ProviderError> {
        self.instances
            .get_mut(id)
            .ok_or_else(|| ProviderError::not_found("Instance", id))
    }

    fn eip_mut(&mut self, id: &str) -> Result<&mut FakeEip, ProviderError> {
        self.eips
            .get_mut(id)
            .ok_or_else(|| ProviderError::not_found("EIP", id))
    }
}

/// An [`EcsClient`] backed by in-memory tables.
///
/// Asynchronous operations move resources into a transitional status which
/// settles after `settle_after` describe calls, so poll loops really poll.
/// Failures can be injected per operation and every call is logged.
pub struct FakeEcsClient {
    settle_after: u32,
    state: Mutex<State>,
}

impl Default for FakeEcsClient {
    fn default() -> Self {
        Self {
            settle_after: 1,
            state: Mutex::new(State::default()),
        }
    }
}

impl std::fmt::Debug for FakeEcsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FakeEcsClient")
            .field("instances", &state.instances.len())
            .field("eips", &state.eips.len())
            .field("images", &state.images.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}

impl FakeEcsClient {
    /// Creates an empty control plane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many describe calls a transition takes to settle.
    #[must_use]
    pub fn with_settle_after(mut self, describes: u32) -> Self {
        self.settle_after = describes.max(1);
        self
    }

    /// Makes the next call of `op` fail with `err`. Calls queue up.
    pub fn fail_next(&self, op: &'static str, err: ProviderError) {
        self.state.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Cancels `token` when `op` is called for the `nth` time (1-based).
    pub fn cancel_on(&self, op: &'static str, nth: usize, token: Arc<CancellationToken>) {
        self.state.lock().hooks.push(CancelHook { op, nth, token });
    }

    /// Adds an image, e.g. a source image or a leftover from an earlier build.
    pub fn seed_image(&self, image: Image) {
        let mut state = self.state.lock();
        for mapping in &image.disk_device_mappings {
            if !mapping.snapshot_id.is_empty() {
                state.snapshots.insert(mapping.snapshot_id.clone());
            }
        }
        state.insert_image(image, None);
    }

    /// Adds an available public image with one system disk snapshot.
    pub fn seed_source_image(&self, region_id: &str, image_id: &str, family: Option<&str>) {
        let snapshot_id = format!("s-{image_id}");
        self.seed_image(Image {
            image_id: image_id.to_string(),
            image_name: image_id.to_string(),
            region_id: region_id.to_string(),
            status: ImageStatus::Available,
            image_family: family.map(str::to_string),
            disk_device_mappings: vec![DiskDeviceMapping {
                snapshot_id,
                device: "/dev/xvda".into(),
                size: 40,
                encrypted: false,
            }],
        });
    }

    /// Adds an available address owned by the caller.
    pub fn seed_eip(&self, region_id: &str, allocation_id: &str, ip_address: &str) {
        self.state.lock().eips.insert(
            allocation_id.to_string(),
            FakeEip {
                eip: EipAddress {
                    allocation_id: allocation_id.to_string(),
                    ip_address: ip_address.to_string(),
                    region_id: region_id.to_string(),
                    status: EipStatus::Available,
                    instance_id: None,
                },
                transition: None,
            },
        );
    }

    /// Returns the chronological call log.
    #[must_use]
    pub fn calls(&self) -> Vec<FakeCall> {
        self.state.lock().calls.clone()
    }

    /// Returns the operation names in call order.
    #[must_use]
    pub fn call_ops(&self) -> Vec<&'static str> {
        self.state.lock().calls.iter().map(|c| c.op).collect()
    }

    /// Returns how often `op` was called.
    #[must_use]
    pub fn calls_of(&self, op: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Returns the targets of every call of `op`.
    #[must_use]
    pub fn targets_of(&self, op: &str) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.target.clone())
            .collect()
    }

    /// Returns the current state of an instance.
    #[must_use]
    pub fn instance(&self, instance_id: &str) -> Option<Instance> {
        self.state
            .lock()
            .instances
            .get(instance_id)
            .map(|i| i.instance.clone())
    }

    /// Returns the ids of all live instances.
    #[must_use]
    pub fn instance_ids(&self) -> Vec<String> {
        self.state.lock().instances.keys().cloned().collect()
    }

    /// Returns the current state of an address.
    #[must_use]
    pub fn eip(&self, allocation_id: &str) -> Option<EipAddress> {
        self.state
            .lock()
            .eips
            .get(allocation_id)
            .map(|e| e.eip.clone())
    }

    /// Returns the allocation ids of all live addresses.
    #[must_use]
    pub fn eip_ids(&self) -> Vec<String> {
        self.state.lock().eips.keys().cloned().collect()
    }

    /// Returns the current state of an image.
    #[must_use]
    pub fn image(&self, image_id: &str) -> Option<Image> {
        self.state
            .lock()
            .images
            .get(image_id)
            .map(|i| i.image.clone())
    }

    /// Returns every image with the given name, in any region.
    #[must_use]
    pub fn images_named(&self, name: &str) -> Vec<Image> {
        self.state
            .lock()
            .images
            .values()
            .filter(|i| i.image.image_name == name)
            .map(|i| i.image.clone())
            .collect()
    }

    /// Returns true if the snapshot exists.
    #[must_use]
    pub fn snapshot_exists(&self, snapshot_id: &str) -> bool {
        self.state.lock().snapshots.contains(snapshot_id)
    }

    /// Returns the tags attached to a resource.
    #[must_use]
    pub fn tags_of(&self, resource_id: &str) -> BTreeMap<String, String> {
        self.state
            .lock()
            .tags
            .get(resource_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns every launch request received.
    #[must_use]
    pub fn run_requests(&self) -> Vec<RunInstancesRequest> {
        self.state.lock().run_requests.clone()
    }

    /// Returns every copy request received.
    #[must_use]
    pub fn copy_requests(&self) -> Vec<CopyImageRequest> {
        self.state.lock().copy_requests.clone()
    }
}

#[async_trait]
impl EcsClient for FakeEcsClient {
    async fn run_instances(&self, request: &RunInstancesRequest) -> Result<String, ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::RUN_INSTANCES, &request.region_id)?;

        let id = state.next_id("i");
        let private_ip = format!("172.16.0.{}", state.next_id % 250 + 2);
        state.run_requests.push(request.clone());
        state.instances.insert(
            id.clone(),
            FakeInstance {
                instance: Instance {
                    instance_id: id.clone(),
                    region_id: request.region_id.clone(),
                    zone_id: request.zone_id.clone().unwrap_or_default(),
                    status: InstanceStatus::Starting,
                    instance_type: request.instance_type.clone(),
                    public_ip_addresses: Vec::new(),
                    private_ip_addresses: vec![private_ip],
                },
                disks: 1 + request.data_disks.len(),
                encrypted: request.system_disk.encrypted.unwrap_or(false),
                transition: Some(Transition::new(InstanceStatus::Running, self.settle_after)),
            },
        );
        Ok(id)
    }

    async fn describe_instance(
        &self,
        _region_id: &str,
        instance_id: &str,
    ) -> Result<Instance, ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::DESCRIBE_INSTANCE, instance_id)?;

        let fake = state.instance_mut(instance_id)?;
        if let Some(status) = fake.transition.as_mut().and_then(Transition::tick) {
            fake.instance.status = status;
            fake.transition = None;
        }
        Ok(fake.instance.clone())
    }

    async fn start_instance(
        &self,
        _region_id: &str,
        instance_id: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::START_INSTANCE, instance_id)?;

        let settle = self.settle_after;
        let fake = state.instance_mut(instance_id)?;
        if fake.instance.status != InstanceStatus::Stopped {
            return Err(ProviderError::new(
                "IncorrectInstanceStatus",
                format!("instance {instance_id} is {}", fake.instance.status),
            ));
        }
        fake.instance.status = InstanceStatus::Starting;
        fake.transition = Some(Transition::new(InstanceStatus::Running, settle));
        Ok(())
    }

    async fn stop_instance(
        &self,
        _region_id: &str,
        instance_id: &str,
        _force: bool,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::STOP_INSTANCE, instance_id)?;

        let settle = self.settle_after;
        let fake = state.instance_mut(instance_id)?;
        if fake.instance.status != InstanceStatus::Running {
            return Err(ProviderError::new(
                "IncorrectInstanceStatus",
                format!("instance {instance_id} is {}", fake.instance.status),
            ));
        }
        fake.instance.status = InstanceStatus::Stopping;
        fake.transition = Some(Transition::new(InstanceStatus::Stopped, settle));
        Ok(())
    }

    async fn delete_instance(
        &self,
        _region_id: &str,
        instance_id: &str,
        force: bool,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::DELETE_INSTANCE, instance_id)?;

        let fake = state.instance_mut(instance_id)?;
        if !force && fake.instance.status != InstanceStatus::Stopped {
            return Err(ProviderError::new(
                "IncorrectInstanceStatus",
                "instance must be stopped before deletion",
            ));
        }
        state.instances.remove(instance_id);
        for eip in state.eips.values_mut() {
            if eip.eip.instance_id.as_deref() == Some(instance_id) {
                eip.eip.instance_id = None;
                eip.eip.status = EipStatus::Available;
                eip.transition = None;
            }
        }
        Ok(())
    }

    async fn allocate_eip(
        &self,
        request: &AllocateEipRequest,
    ) -> Result<EipAddress, ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::ALLOCATE_EIP, &request.region_id)?;

        let allocation_id = state.next_id("eip");
        let eip = EipAddress {
            ip_address: format!("47.95.0.{}", state.next_id % 250 + 2),
            allocation_id: allocation_id.clone(),
            region_id: request.region_id.clone(),
            status: EipStatus::Available,
            instance_id: None,
        };
        state.eips.insert(
            allocation_id,
            FakeEip {
                eip: eip.clone(),
                transition: None,
            },
        );
        Ok(eip)
    }

    async fn describe_eips(
        &self,
        _region_id: &str,
        allocation_id: &str,
    ) -> Result<Vec<EipAddress>, ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::DESCRIBE_EIPS, allocation_id)?;

        let Some(fake) = state.eips.get_mut(allocation_id) else {
            return Ok(Vec::new());
        };
        if let Some(status) = fake.transition.as_mut().and_then(Transition::tick) {
            fake.eip.status = status;
            fake.transition = None;
        }
        Ok(vec![fake.eip.clone()])
    }

    async fn associate_eip(
        &self,
        _region_id: &str,
        allocation_id: &str,
        instance_id: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::ASSOCIATE_EIP, allocation_id)?;

        if !state.instances.contains_key(instance_id) {
            return Err(ProviderError::not_found("Instance", instance_id));
        }
        let settle = self.settle_after;
        let fake = state.eip_mut(allocation_id)?;
        if fake.eip.status != EipStatus::Available {
            return Err(ProviderError::new(
                "IncorrectEipStatus",
                format!("EIP {allocation_id} is {}", fake.eip.status),
            ));
        }
        fake.eip.status = EipStatus::Associating;
        fake.eip.instance_id = Some(instance_id.to_string());
        fake.transition = Some(Transition::new(EipStatus::InUse, settle));
        Ok(())
    }

    async fn unassociate_eip(
        &self,
        _region_id: &str,
        allocation_id: &str,
        _instance_id: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::UNASSOCIATE_EIP, allocation_id)?;

        let settle = self.settle_after;
        let fake = state.eip_mut(allocation_id)?;
        if fake.eip.instance_id.is_none() {
            return Err(ProviderError::new(
                "IncorrectEipStatus",
                format!("EIP {allocation_id} is not associated"),
            ));
        }
        fake.eip.status = EipStatus::Unassociating;
        fake.eip.instance_id = None;
        fake.transition = Some(Transition::new(EipStatus::Available, settle));
        Ok(())
    }

    async fn release_eip(
        &self,
        _region_id: &str,
        allocation_id: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::RELEASE_EIP, allocation_id)?;

        let fake = state.eip_mut(allocation_id)?;
        if fake.eip.instance_id.is_some() {
            return Err(ProviderError::new(
                "IncorrectEipStatus",
                format!("EIP {allocation_id} is still associated"),
            ));
        }
        state.eips.remove(allocation_id);
        Ok(())
    }

    async fn describe_images(&self, filter: &ImageFilter) -> Result<Vec<Image>, ProviderError> {
        let mut state = self.state.lock();
        let target = filter.image_id.as_deref().unwrap_or(&filter.region_id);
        state.enter(ops::DESCRIBE_IMAGES, target)?;

        let mut found = Vec::new();
        for fake in state.images.values_mut() {
            if !filter.matches(&fake.image) {
                continue;
            }
            if let Some(status) = fake.transition.as_mut().and_then(Transition::tick) {
                fake.image.status = status;
                fake.transition = None;
            }
            found.push(fake.image.clone());
        }
        Ok(found)
    }

    async fn describe_image_from_family(
        &self,
        region_id: &str,
        image_family: &str,
    ) -> Result<Option<Image>, ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::DESCRIBE_IMAGE_FROM_FAMILY, image_family)?;

        Ok(state
            .images
            .values()
            .filter(|f| {
                f.image.region_id == region_id
                    && f.image.status == ImageStatus::Available
                    && f.image.image_family.as_deref() == Some(image_family)
            })
            .max_by_key(|f| f.order)
            .map(|f| f.image.clone()))
    }

    async fn create_image(&self, request: &CreateImageRequest) -> Result<String, ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::CREATE_IMAGE, &request.image_name)?;

        let (disks, encrypted) = match request.instance_id.as_deref() {
            Some(instance_id) => {
                let fake = state.instance_mut(instance_id)?;
                if fake.instance.status != InstanceStatus::Stopped {
                    return Err(ProviderError::new(
                        "IncorrectInstanceStatus",
                        "the instance must be stopped before capture",
                    ));
                }
                (fake.disks, fake.encrypted)
            }
            None => (request.disk_device_mappings.len(), false),
        };

        let image_id = state.next_id("m");
        let mut mappings = Vec::with_capacity(disks);
        for index in 0..disks {
            let snapshot_id = state.next_id("s");
            state.snapshots.insert(snapshot_id.clone());
            mappings.push(DiskDeviceMapping {
                snapshot_id,
                device: format!("/dev/xvd{}", char::from(b'a' + u8::try_from(index % 26).unwrap_or(0))),
                size: 40,
                encrypted,
            });
        }

        state.insert_image(
            Image {
                image_id: image_id.clone(),
                image_name: request.image_name.clone(),
                region_id: request.region_id.clone(),
                status: ImageStatus::Creating,
                image_family: request.image_family.clone(),
                disk_device_mappings: mappings,
            },
            Some(Transition::new(ImageStatus::Available, self.settle_after)),
        );
        Ok(image_id)
    }

    async fn delete_image(
        &self,
        _region_id: &str,
        image_id: &str,
        _force: bool,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::DELETE_IMAGE, image_id)?;

        state
            .images
            .remove(image_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found("Image", image_id))
    }

    async fn delete_snapshot(
        &self,
        _region_id: &str,
        snapshot_id: &str,
        _force: bool,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::DELETE_SNAPSHOT, snapshot_id)?;

        if state.snapshots.remove(snapshot_id) {
            Ok(())
        } else {
            Err(ProviderError::not_found("Snapshot", snapshot_id))
        }
    }

    async fn copy_image(&self, request: &CopyImageRequest) -> Result<String, ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::COPY_IMAGE, &request.destination_region_id)?;

        let source = state
            .images
            .get(&request.image_id)
            .map(|f| f.image.clone())
            .ok_or_else(|| ProviderError::not_found("Image", &request.image_id))?;

        let image_id = state.next_id("m");
        let mut mappings = Vec::with_capacity(source.disk_device_mappings.len());
        for mapping in &source.disk_device_mappings {
            let snapshot_id = state.next_id("s");
            state.snapshots.insert(snapshot_id.clone());
            mappings.push(DiskDeviceMapping {
                snapshot_id,
                encrypted: request.encrypted,
                ..mapping.clone()
            });
        }

        state.copy_requests.push(request.clone());
        state.insert_image(
            Image {
                image_id: image_id.clone(),
                image_name: request
                    .destination_image_name
                    .clone()
                    .unwrap_or(source.image_name),
                region_id: request.destination_region_id.clone(),
                status: ImageStatus::Creating,
                image_family: source.image_family,
                disk_device_mappings: mappings,
            },
            Some(Transition::new(ImageStatus::Available, self.settle_after)),
        );
        Ok(image_id)
    }

    async fn cancel_copy_image(
        &self,
        _region_id: &str,
        image_id: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::CANCEL_COPY_IMAGE, image_id)?;

        let fake = state
            .images
            .remove(image_id)
            .ok_or_else(|| ProviderError::not_found("Image", image_id))?;
        for snapshot_id in fake.image.snapshot_ids() {
            state.snapshots.remove(&snapshot_id);
        }
        Ok(())
    }

    async fn add_tags(
        &self,
        _region_id: &str,
        resource_type: TagResourceType,
        resource_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.enter(ops::ADD_TAGS, resource_id)?;

        let exists = match resource_type {
            TagResourceType::Image => state.images.contains_key(resource_id),
            TagResourceType::Snapshot => state.snapshots.contains(resource_id),
            TagResourceType::Instance => state.instances.contains_key(resource_id),
        };
        if !exists {
            return Err(ProviderError::not_found(&resource_type.to_string(), resource_id));
        }
        state
            .tags
            .entry(resource_id.to_string())
            .or_default()
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let client = FakeEcsClient::new();
        client.fail_next(
            ops::RUN_INSTANCES,
            ProviderError::new("IdempotentProcessing", "busy"),
        );

        let request = RunInstancesRequest {
            region_id: "cn-beijing".into(),
            ..RunInstancesRequest::default()
        };
        let first = client.run_instances(&request).await;
        assert_eq!(first.unwrap_err().code, "IdempotentProcessing");
        assert!(client.run_instances(&request).await.is_ok());
        assert_eq!(client.calls_of(ops::RUN_INSTANCES), 2);
    }

    #[tokio::test]
    async fn test_instance_transition_settles_after_describes() {
        let client = FakeEcsClient::new().with_settle_after(2);
        let id = client
            .run_instances(&RunInstancesRequest::default())
            .await
            .unwrap();

        let first = client.describe_instance("", &id).await.unwrap();
        assert_eq!(first.status, InstanceStatus::Starting);
        let second = client.describe_instance("", &id).await.unwrap();
        assert_eq!(second.status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_cancel_hook_fires_on_nth_call() {
        let client = FakeEcsClient::new();
        let token = Arc::new(CancellationToken::new());
        client.cancel_on(ops::DESCRIBE_IMAGES, 2, token.clone());

        let filter = ImageFilter::in_region("cn-beijing");
        client.describe_images(&filter).await.unwrap();
        assert!(!token.is_cancelled());
        client.describe_images(&filter).await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_release_requires_unassociated_eip() {
        let client = FakeEcsClient::new();
        client.seed_eip("cn-beijing", "eip-own", "1.2.3.4");
        let id = client
            .run_instances(&RunInstancesRequest::default())
            .await
            .unwrap();

        client.associate_eip("", "eip-own", &id).await.unwrap();
        assert!(client.release_eip("", "eip-own").await.is_err());

        client.unassociate_eip("", "eip-own", &id).await.unwrap();
        client.release_eip("", "eip-own").await.unwrap();
        assert!(client.eip("eip-own").is_none());
    }

    #[tokio::test]
    async fn test_family_lookup_returns_newest() {
        let client = FakeEcsClient::new();
        client.seed_source_image("cn-beijing", "m-old", Some("base"));
        client.seed_source_image("cn-beijing", "m-new", Some("base"));
        client.seed_source_image("cn-hangzhou", "m-other", Some("base"));

        let found = client
            .describe_image_from_family("cn-beijing", "base")
            .await
            .unwrap();
        assert_eq!(found.map(|i| i.image_id), Some("m-new".to_string()));
        assert!(client
            .describe_image_from_family("cn-beijing", "missing")
            .await
            .unwrap()
            .is_none());
    }
}
