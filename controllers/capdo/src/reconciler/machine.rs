//! DOMachine reconciliation
//!
//! A droplet is only created once the cluster infrastructure is ready and the
//! bootstrap data secret exists; worker machines additionally wait for the
//! control plane to be initialized. The droplet ID goes into
//! `status.instanceID` immediately after creation. A droplet whose ID was
//! never recorded is found again by name (the DOMachine name), and only
//! counts as ours when it carries the cluster tag.
//!
//! Control-plane droplets are registered with the cluster load balancer once
//! active. Deletion deregisters before deleting the droplet.

use super::{
    add_finalizer, cluster_tag, has_finalizer, is_paused, owner_name, remove_finalizer, resource_key, Action, Context,
    ObjectKey, Reconcile, CONTROL_PLANE_TAG, WORKER_TAG,
};
use crate::error::ControllerError;
use crate::store::{object_ref, status_patch};
use async_trait::async_trait;
use crds::conditions::{reasons, set_condition, INSTANCE_READY, LOAD_BALANCER_ATTACHED};
use crds::provider_id::format_provider_id;
use crds::{
    Cluster, Condition, DOCluster, DOMachine, DOMachineStatus, Machine, MachineAddress, MachineAddressType,
    MachineInfraState, CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL, DO_MACHINE_FINALIZER,
};
use digitalocean_client::{CreateInstanceRequest, Droplet, ErrorClass};
use kube::ResourceExt;
use readiness::{bootstrap_secret_name, is_bootstrap_ready, is_control_plane_initialized, is_infra_cluster_ready};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reconciles DOMachine resources
#[derive(Debug)]
pub struct DOMachineReconciler {
    ctx: Arc<Context>,
}

/// Objects a DOMachine depends on
#[derive(Debug, Default)]
struct Owners {
    machine: Option<Machine>,
    cluster_name: Option<String>,
    cluster: Option<Cluster>,
    do_cluster: Option<DOCluster>,
}

impl Owners {
    fn load_balancer_id(&self) -> Option<String> {
        self.do_cluster
            .as_ref()
            .and_then(|dc| dc.infra_state().load_balancer_id().map(str::to_string))
    }
}

fn is_control_plane(do_machine: &DOMachine, machine: Option<&Machine>) -> bool {
    match machine {
        Some(machine) => machine.is_control_plane(),
        None => do_machine.labels().contains_key(CONTROL_PLANE_LABEL),
    }
}

fn parse_instance_id(do_machine: &DOMachine, id: &str) -> Result<u64, ControllerError> {
    id.parse().map_err(|_| {
        ControllerError::InvalidSpec(format!(
            "DOMachine {} has a malformed instanceID '{}'",
            object_ref(do_machine),
            id
        ))
    })
}

/// True when the droplet carries the tag of `cluster_name`
pub fn belongs_to_cluster(droplet: &Droplet, cluster_name: &str) -> bool {
    let tag = cluster_tag(cluster_name);
    droplet.tags.iter().any(|t| *t == tag)
}

/// Addresses reported for an active droplet
pub fn machine_addresses(droplet: &Droplet) -> Vec<MachineAddress> {
    let mut addresses = vec![MachineAddress::new(MachineAddressType::Hostname, &droplet.name)];
    if let Some(ip) = droplet.public_ipv4() {
        addresses.push(MachineAddress::new(MachineAddressType::ExternalIp, ip));
    }
    if let Some(ip) = droplet.private_ipv4() {
        addresses.push(MachineAddress::new(MachineAddressType::InternalIp, ip));
    }
    addresses
}

/// Droplet create request for a DOMachine
pub fn instance_request(
    do_machine: &DOMachine,
    cluster_name: &str,
    region: &str,
    control_plane: bool,
    user_data: String,
) -> Result<CreateInstanceRequest, ControllerError> {
    let spec = &do_machine.spec;
    if spec.size.trim().is_empty() {
        return Err(ControllerError::InvalidSpec(format!(
            "DOMachine {} has no size",
            object_ref(do_machine)
        )));
    }
    if spec.image.is_empty() {
        return Err(ControllerError::InvalidSpec(format!(
            "DOMachine {} has no image",
            object_ref(do_machine)
        )));
    }

    let role = if control_plane { CONTROL_PLANE_TAG } else { WORKER_TAG };
    let mut tags = vec![cluster_tag(cluster_name), role.to_string()];
    for tag in &spec.additional_tags {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }

    Ok(CreateInstanceRequest {
        name: do_machine.name_any(),
        region: region.to_string(),
        size: spec.size.clone(),
        image: serde_json::to_value(&spec.image)?,
        ssh_keys: spec
            .ssh_keys
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()?,
        tags,
        user_data: Some(user_data),
        private_networking: true,
    })
}

impl DOMachineReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn owners(&self, do_machine: &DOMachine) -> Result<Owners, ControllerError> {
        let namespace = do_machine.namespace().unwrap_or_default();
        let name = do_machine.name_any();

        let machine = match owner_name(do_machine, "Machine") {
            Some(owner) => self.ctx.machines.get(&namespace, &owner).await?,
            None => self
                .ctx
                .machines
                .list(&namespace)
                .await?
                .into_iter()
                .find(|m| m.spec.infrastructure_ref.is_kind("DOMachine") && m.spec.infrastructure_ref.name == name),
        };

        let cluster_name = machine
            .as_ref()
            .and_then(|m| m.cluster_name().map(str::to_string))
            .or_else(|| do_machine.labels().get(CLUSTER_NAME_LABEL).cloned());
        let cluster = match &cluster_name {
            Some(cluster_name) => self.ctx.clusters.get(&namespace, cluster_name).await?,
            None => None,
        };

        let do_cluster = match cluster.as_ref().and_then(Cluster::infrastructure_ref) {
            Some(r) => self.ctx.do_clusters.get(r.namespace_or(&namespace), &r.name).await?,
            None => match &cluster_name {
                Some(cluster_name) => self.ctx.do_clusters.get(&namespace, cluster_name).await?,
                None => None,
            },
        };

        Ok(Owners {
            machine,
            cluster_name,
            cluster,
            do_cluster,
        })
    }

    async fn write_status(
        &self,
        do_machine: &DOMachine,
        state: &MachineInfraState,
        instance_status: Option<String>,
        conditions: Vec<Condition>,
    ) -> Result<DOMachine, ControllerError> {
        let status = DOMachineStatus::from_state(state, instance_status, conditions);
        if do_machine.status.as_ref() == Some(&status) {
            return Ok(do_machine.clone());
        }
        debug!("Updating DOMachine {} status: phase {}", object_ref(do_machine), state.phase());
        let patch = status_patch(do_machine.status.as_ref(), &status)?;
        self.ctx.do_machines.patch_status(do_machine, patch).await
    }

    /// First unmet creation precondition as (reason, message)
    fn unmet_precondition(
        machine: &Machine,
        cluster: &Cluster,
        do_cluster: Option<&DOCluster>,
    ) -> Option<(&'static str, String)> {
        if !do_cluster.is_some_and(is_infra_cluster_ready) {
            return Some((
                reasons::WAITING_FOR_CLUSTER_INFRASTRUCTURE,
                "cluster infrastructure is not ready".to_string(),
            ));
        }
        if !is_bootstrap_ready(machine) {
            return Some((
                reasons::WAITING_FOR_BOOTSTRAP_DATA,
                "bootstrap data is not available yet".to_string(),
            ));
        }
        if !machine.is_control_plane() && !is_control_plane_initialized(cluster) {
            return Some((
                reasons::WAITING_FOR_CONTROL_PLANE,
                format!("control plane of cluster {} is not initialized", cluster.name_any()),
            ));
        }
        None
    }

    /// Bootstrap user-data, `None` while the secret does not exist
    async fn bootstrap_data(&self, machine: &Machine) -> Result<Option<String>, ControllerError> {
        let Some(secret_name) = bootstrap_secret_name(machine) else {
            return Ok(None);
        };
        let namespace = machine.namespace().unwrap_or_default();
        let Some(secret) = self.ctx.secrets.get(&namespace, secret_name).await? else {
            return Ok(None);
        };
        let value = secret
            .data
            .as_ref()
            .and_then(|data| data.get("value"))
            .ok_or_else(|| {
                ControllerError::InvalidSpec(format!(
                    "bootstrap secret {}/{} has no 'value' key",
                    namespace, secret_name
                ))
            })?;
        String::from_utf8(value.0.clone()).map(Some).map_err(|_| {
            ControllerError::InvalidSpec(format!(
                "bootstrap secret {}/{} is not valid UTF-8",
                namespace, secret_name
            ))
        })
    }

    async fn ensure_provider_id(&self, do_machine: DOMachine, instance_id: &str) -> Result<DOMachine, ControllerError> {
        let provider_id = format_provider_id(instance_id);
        if do_machine.spec.provider_id.as_deref() == Some(provider_id.as_str()) {
            return Ok(do_machine);
        }
        debug!("Setting providerID {} on DOMachine {}", provider_id, object_ref(&do_machine));
        self.ctx
            .do_machines
            .patch(&do_machine, json!({ "spec": { "providerID": provider_id } }))
            .await
    }

    async fn reconcile_do_machine(&self, do_machine: &DOMachine) -> Result<Action, ControllerError> {
        let r = object_ref(do_machine);
        let owners = self.owners(do_machine).await?;

        if is_paused(owners.cluster.as_ref(), do_machine) {
            info!("Reconciliation of DOMachine {} is paused", r);
            return Ok(Action::AwaitChange);
        }

        if do_machine.metadata.deletion_timestamp.is_some() {
            return self.reconcile_delete(do_machine, &owners).await;
        }

        let (Some(machine), Some(cluster), Some(cluster_name)) =
            (owners.machine.as_ref(), owners.cluster.as_ref(), owners.cluster_name.as_deref())
        else {
            info!("DOMachine {} is waiting for its owning Machine and Cluster", r);
            return Ok(Action::Requeue(self.ctx.intervals.precondition));
        };

        if !has_finalizer(do_machine, DO_MACHINE_FINALIZER) {
            add_finalizer(self.ctx.do_machines.as_ref(), do_machine, DO_MACHINE_FINALIZER).await?;
            return Ok(Action::Requeue(Duration::ZERO));
        }

        let control_plane = machine.is_control_plane();
        let mut conditions = do_machine.conditions().to_vec();

        let (droplet, do_machine) = match do_machine.infra_state().instance_id() {
            Some(id) => {
                let id = parse_instance_id(do_machine, id)?;
                match self.ctx.cloud.get_instance(id).await {
                    Ok(droplet) => (droplet, do_machine.clone()),
                    Err(e) if e.is_not_found() => {
                        return Err(ControllerError::InstanceGone(format!(
                            "droplet {} of DOMachine {} no longer exists",
                            id, r
                        )));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => {
                if let Some((reason, message)) =
                    Self::unmet_precondition(machine, cluster, owners.do_cluster.as_ref())
                {
                    debug!("DOMachine {} waiting: {}", r, message);
                    set_condition(&mut conditions, Condition::false_(INSTANCE_READY, reason, message));
                    self.write_status(do_machine, &MachineInfraState::Pending, None, conditions)
                        .await?;
                    return Ok(Action::Requeue(self.ctx.intervals.precondition));
                }

                let droplet = match self.ctx.cloud.find_instance(&do_machine.name_any()).await? {
                    Some(droplet) if belongs_to_cluster(&droplet, cluster_name) => {
                        info!("Adopting droplet {} ({}) for DOMachine {}", droplet.name, droplet.id, r);
                        droplet
                    }
                    Some(droplet) => {
                        return Err(ControllerError::InvalidSpec(format!(
                            "droplet {} ({}) already exists and is not tagged {}; DOMachine {} cannot use its name",
                            droplet.name,
                            droplet.id,
                            cluster_tag(cluster_name),
                            r
                        )));
                    }
                    None => {
                        let Some(user_data) = self.bootstrap_data(machine).await? else {
                            set_condition(
                                &mut conditions,
                                Condition::false_(
                                    INSTANCE_READY,
                                    reasons::WAITING_FOR_BOOTSTRAP_DATA,
                                    "bootstrap data secret does not exist yet",
                                ),
                            );
                            self.write_status(do_machine, &MachineInfraState::Pending, None, conditions)
                                .await?;
                            return Ok(Action::Requeue(self.ctx.intervals.precondition));
                        };
                        let region = owners
                            .do_cluster
                            .as_ref()
                            .map(|dc| dc.spec.region().to_string())
                            .unwrap_or_default();
                        let request = instance_request(do_machine, cluster_name, &region, control_plane, user_data)?;
                        let droplet = self.ctx.cloud.create_instance(request).await?;
                        info!(
                            "Created droplet {} ({}) in {} for DOMachine {}",
                            droplet.name, droplet.id, region, r
                        );
                        droplet
                    }
                };

                // Record the ID before anything else touches the droplet
                set_condition(
                    &mut conditions,
                    Condition::false_(
                        INSTANCE_READY,
                        reasons::INSTANCE_PROVISIONING,
                        format!("droplet {} is {}", droplet.id, droplet.status.as_str()),
                    ),
                );
                let state = MachineInfraState::Provisioning {
                    instance_id: droplet.id.to_string(),
                };
                let updated = self
                    .write_status(
                        do_machine,
                        &state,
                        Some(droplet.status.as_str().to_string()),
                        conditions.clone(),
                    )
                    .await?;
                (droplet, updated)
            }
        };

        let instance_id = droplet.id.to_string();
        let instance_status = Some(droplet.status.as_str().to_string());
        let do_machine = self.ensure_provider_id(do_machine, &instance_id).await?;

        if !droplet.is_active() {
            set_condition(
                &mut conditions,
                Condition::false_(
                    INSTANCE_READY,
                    reasons::INSTANCE_PROVISIONING,
                    format!("droplet {} is {}", droplet.id, droplet.status.as_str()),
                ),
            );
            self.write_status(
                &do_machine,
                &MachineInfraState::Provisioning { instance_id },
                instance_status,
                conditions,
            )
            .await?;
            debug!("Droplet {} of DOMachine {} is not active yet", droplet.id, r);
            return Ok(Action::Requeue(self.ctx.intervals.instance_poll));
        }

        let addresses = machine_addresses(&droplet);
        set_condition(&mut conditions, Condition::true_(INSTANCE_READY));

        if control_plane {
            let Some(load_balancer_id) = owners.load_balancer_id() else {
                set_condition(
                    &mut conditions,
                    Condition::false_(
                        LOAD_BALANCER_ATTACHED,
                        reasons::WAITING_FOR_CLUSTER_INFRASTRUCTURE,
                        "cluster load balancer is not provisioned",
                    ),
                );
                let running = MachineInfraState::Running { instance_id };
                self.write_status(&do_machine, &running, instance_status, conditions)
                    .await?;
                return Ok(Action::Requeue(self.ctx.intervals.precondition));
            };

            let load_balancer = self.ctx.cloud.get_load_balancer(&load_balancer_id).await?;
            if !load_balancer.droplet_ids.contains(&droplet.id) {
                set_condition(
                    &mut conditions,
                    Condition::false_(
                        LOAD_BALANCER_ATTACHED,
                        reasons::REGISTERING_WITH_LOAD_BALANCER,
                        format!("registering droplet {} with load balancer {}", droplet.id, load_balancer_id),
                    ),
                );
                // Resumable marker; addresses wait for a successful registration
                let running = MachineInfraState::Running {
                    instance_id: instance_id.clone(),
                };
                let updated = self
                    .write_status(&do_machine, &running, instance_status.clone(), conditions.clone())
                    .await?;
                self.ctx
                    .cloud
                    .register_with_load_balancer(&load_balancer_id, droplet.id)
                    .await?;
                info!(
                    "Registered droplet {} of DOMachine {} with load balancer {}",
                    droplet.id, r, load_balancer_id
                );
                set_condition(&mut conditions, Condition::true_(LOAD_BALANCER_ATTACHED));
                let ready = MachineInfraState::Ready {
                    instance_id,
                    addresses,
                };
                self.write_status(&updated, &ready, instance_status, conditions).await?;
                return Ok(Action::AwaitChange);
            }
            set_condition(&mut conditions, Condition::true_(LOAD_BALANCER_ATTACHED));
        }

        let was_ready = matches!(do_machine.infra_state(), MachineInfraState::Ready { .. });
        let ready = MachineInfraState::Ready {
            instance_id,
            addresses,
        };
        self.write_status(&do_machine, &ready, instance_status, conditions).await?;
        if !was_ready {
            info!("DOMachine {} is ready", r);
        }
        Ok(Action::AwaitChange)
    }

    async fn deregister(&self, do_machine: &DOMachine, owners: &Owners, instance_id: u64) -> Result<(), ControllerError> {
        let Some(load_balancer_id) = owners.load_balancer_id() else {
            return Ok(());
        };

        if !is_control_plane(do_machine, owners.machine.as_ref()) {
            match self.ctx.cloud.get_load_balancer(&load_balancer_id).await {
                Ok(lb) if !lb.droplet_ids.contains(&instance_id) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }

        match self
            .ctx
            .cloud
            .deregister_from_load_balancer(&load_balancer_id, instance_id)
            .await
        {
            Ok(()) => {
                info!(
                    "Deregistered droplet {} of DOMachine {} from load balancer {}",
                    instance_id,
                    object_ref(do_machine),
                    load_balancer_id
                );
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Droplet named after a DOMachine that never recorded its ID. A droplet
    /// of another cluster with the same name is left alone.
    async fn find_unrecorded(
        &self,
        do_machine: &DOMachine,
        cluster_name: Option<&str>,
    ) -> Result<Option<u64>, ControllerError> {
        let Some(droplet) = self.ctx.cloud.find_instance(&do_machine.name_any()).await? else {
            return Ok(None);
        };
        match cluster_name {
            Some(cluster_name) if belongs_to_cluster(&droplet, cluster_name) => Ok(Some(droplet.id)),
            _ => {
                warn!(
                    "Droplet {} ({}) is not tagged for the cluster of DOMachine {}; not deleting it",
                    droplet.name,
                    droplet.id,
                    object_ref(do_machine)
                );
                Ok(None)
            }
        }
    }

    async fn reconcile_delete(&self, do_machine: &DOMachine, owners: &Owners) -> Result<Action, ControllerError> {
        if !has_finalizer(do_machine, DO_MACHINE_FINALIZER) {
            return Ok(Action::AwaitChange);
        }
        let r = object_ref(do_machine);
        let recorded = do_machine.infra_state().instance_id().map(str::to_string);

        let mut conditions = do_machine.conditions().to_vec();
        set_condition(
            &mut conditions,
            Condition::false_(INSTANCE_READY, reasons::DELETING, "deleting droplet"),
        );
        let state = MachineInfraState::Deleting {
            instance_id: recorded.clone(),
        };
        let instance_status = do_machine.instance_status().map(str::to_string);
        let do_machine = self
            .write_status(do_machine, &state, instance_status, conditions)
            .await?;

        let instance_id = match recorded {
            Some(id) => Some(parse_instance_id(&do_machine, &id)?),
            None => self.find_unrecorded(&do_machine, owners.cluster_name.as_deref()).await?,
        };

        if let Some(id) = instance_id {
            self.deregister(&do_machine, owners, id).await?;
            match self.ctx.cloud.delete_instance(id).await {
                Ok(()) => info!("Deleted droplet {} of DOMachine {}", id, r),
                Err(e) if e.is_not_found() => debug!("Droplet {} of DOMachine {} already deleted", id, r),
                Err(e) => return Err(e.into()),
            }
        }

        remove_finalizer(self.ctx.do_machines.as_ref(), &do_machine, DO_MACHINE_FINALIZER).await?;
        info!("DOMachine {} cleaned up", r);
        Ok(Action::AwaitChange)
    }

    /// Records a permanent failure as a condition; the write is best effort
    async fn record_failure(&self, key: &ObjectKey, err: &ControllerError) {
        let do_machine = match self.ctx.do_machines.get(&key.namespace, &key.name).await {
            Ok(Some(do_machine)) => do_machine,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to re-read DOMachine {} to record failure: {}", key, e);
                return;
            }
        };
        let reason = match err {
            ControllerError::InstanceGone(_) => reasons::INSTANCE_NOT_FOUND,
            _ => reasons::INVALID_CONFIGURATION,
        };
        let mut conditions = do_machine.conditions().to_vec();
        set_condition(&mut conditions, Condition::false_(INSTANCE_READY, reason, err.to_string()));

        // A failed machine is never reported ready
        let state = match do_machine.infra_state() {
            MachineInfraState::Running { instance_id } | MachineInfraState::Ready { instance_id, .. } => {
                MachineInfraState::Provisioning { instance_id }
            }
            state => state,
        };
        let instance_status = do_machine.instance_status().map(str::to_string);
        if let Err(e) = self.write_status(&do_machine, &state, instance_status, conditions).await {
            warn!("Failed to record failure on DOMachine {}: {}", key, e);
        }
    }
}

#[async_trait]
impl Reconcile for DOMachineReconciler {
    fn kind(&self) -> &'static str {
        "DOMachine"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ControllerError> {
        let Some(do_machine) = self.ctx.do_machines.get(&key.namespace, &key.name).await? else {
            debug!("DOMachine {} no longer exists", key);
            return Ok(Action::AwaitChange);
        };

        let resource_key = resource_key(self.kind(), key);
        match self.reconcile_do_machine(&do_machine).await {
            Ok(action) => {
                self.ctx.reset_backoff(&resource_key);
                Ok(action)
            }
            Err(e) if e.class() == ErrorClass::Permanent => {
                self.record_failure(key, &e).await;
                Err(e)
            }
            Err(e) => self.ctx.handle_error(&resource_key, e),
        }
    }
}
