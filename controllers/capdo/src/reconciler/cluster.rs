//! DOCluster reconciliation
//!
//! One load balancer fronts the API servers of each cluster. Its ID is
//! recorded in `status.loadBalancerID` right after creation and from then on
//! it is only ever looked up by that ID. The deterministic name
//! `<namespace>-<name>-apiserver` is used to find a load balancer whose ID was
//! never recorded, so a crash between create and status write cannot produce
//! a second one.
//!
//! Once the load balancer has an address, the endpoint is published on the
//! DOCluster and copied to the owning Cluster.

use super::{
    add_finalizer, cluster_tag, has_finalizer, is_paused, owner_name, remove_finalizer, resource_key, Action, Context,
    ObjectKey, Reconcile,
};
use crate::error::ControllerError;
use crate::store::{object_ref, status_patch};
use async_trait::async_trait;
use crds::conditions::{reasons, set_condition, LOAD_BALANCER_READY};
use crds::{
    ApiEndpoint, Cluster, ClusterInfraState, Condition, DOCluster, DOClusterStatus, API_SERVER_PORT,
    CLUSTER_NAME_LABEL, DO_CLUSTER_FINALIZER,
};
use digitalocean_client::{CreateLoadBalancerRequest, ErrorClass, LoadBalancer};
use kube::ResourceExt;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reconciles DOCluster resources
#[derive(Debug)]
pub struct DOClusterReconciler {
    ctx: Arc<Context>,
}

/// Deterministic name of the cluster's API server load balancer
pub fn load_balancer_name(do_cluster: &DOCluster) -> String {
    format!(
        "{}-{}-apiserver",
        do_cluster.namespace().unwrap_or_default(),
        do_cluster.name_any()
    )
}

/// Name of the Cluster a DOCluster belongs to
pub(crate) fn cluster_name(do_cluster: &DOCluster, cluster: Option<&Cluster>) -> String {
    cluster
        .map(ResourceExt::name_any)
        .or_else(|| owner_name(do_cluster, "Cluster"))
        .or_else(|| do_cluster.labels().get(CLUSTER_NAME_LABEL).cloned())
        .unwrap_or_else(|| do_cluster.name_any())
}

impl DOClusterReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Owning Cluster: the owner reference, or a Cluster whose
    /// infrastructureRef names this DOCluster
    async fn owner_cluster(&self, do_cluster: &DOCluster) -> Result<Option<Cluster>, ControllerError> {
        let namespace = do_cluster.namespace().unwrap_or_default();
        if let Some(name) = owner_name(do_cluster, "Cluster") {
            return self.ctx.clusters.get(&namespace, &name).await;
        }
        let name = do_cluster.name_any();
        Ok(self
            .ctx
            .clusters
            .list(&namespace)
            .await?
            .into_iter()
            .find(|c| c.infrastructure_ref().is_some_and(|r| r.name == name)))
    }

    async fn write_status(
        &self,
        do_cluster: &DOCluster,
        state: &ClusterInfraState,
        conditions: Vec<Condition>,
    ) -> Result<DOCluster, ControllerError> {
        let status = DOClusterStatus::from_state(state, conditions);
        if do_cluster.status.as_ref() == Some(&status) {
            return Ok(do_cluster.clone());
        }
        debug!("Updating DOCluster {} status: phase {}", object_ref(do_cluster), state.phase());
        let patch = status_patch(do_cluster.status.as_ref(), &status)?;
        self.ctx.do_clusters.patch_status(do_cluster, patch).await
    }

    async fn reconcile_do_cluster(&self, do_cluster: &DOCluster) -> Result<Action, ControllerError> {
        let r = object_ref(do_cluster);
        let cluster = self.owner_cluster(do_cluster).await?;

        if is_paused(cluster.as_ref(), do_cluster) {
            info!("Reconciliation of DOCluster {} is paused", r);
            return Ok(Action::AwaitChange);
        }

        if do_cluster.metadata.deletion_timestamp.is_some() {
            return self.reconcile_delete(do_cluster, cluster.as_ref()).await;
        }

        let Some(cluster) = cluster else {
            info!("DOCluster {} is waiting for its owning Cluster", r);
            return Ok(Action::Requeue(self.ctx.intervals.precondition));
        };

        if !has_finalizer(do_cluster, DO_CLUSTER_FINALIZER) {
            add_finalizer(self.ctx.do_clusters.as_ref(), do_cluster, DO_CLUSTER_FINALIZER).await?;
            return Ok(Action::Requeue(Duration::ZERO));
        }

        let mut conditions = do_cluster.conditions().to_vec();
        let load_balancer = match do_cluster.infra_state().load_balancer_id() {
            Some(id) => match self.ctx.cloud.get_load_balancer(id).await {
                Ok(lb) => lb,
                Err(e) if e.is_not_found() => {
                    // Clear the ID first; the next pass provisions a replacement
                    warn!("Load balancer {} of DOCluster {} no longer exists", id, r);
                    set_condition(
                        &mut conditions,
                        Condition::false_(
                            LOAD_BALANCER_READY,
                            reasons::LOAD_BALANCER_PROVISIONING,
                            format!("load balancer {} was deleted outside the controller", id),
                        ),
                    );
                    self.write_status(do_cluster, &ClusterInfraState::Pending, conditions).await?;
                    return Ok(Action::Requeue(Duration::ZERO));
                }
                Err(e) => return Err(e.into()),
            },
            None => self.find_or_create_load_balancer(do_cluster, &cluster).await?,
        };

        let state = match load_balancer.address() {
            Some(ip) => {
                set_condition(&mut conditions, Condition::true_(LOAD_BALANCER_READY));
                ClusterInfraState::Ready {
                    load_balancer_id: load_balancer.id.clone(),
                    endpoint: ApiEndpoint::new(ip),
                }
            }
            None => {
                set_condition(
                    &mut conditions,
                    Condition::false_(
                        LOAD_BALANCER_READY,
                        reasons::LOAD_BALANCER_PROVISIONING,
                        format!("load balancer {} is {:?}", load_balancer.id, load_balancer.status),
                    ),
                );
                ClusterInfraState::Provisioning {
                    load_balancer_id: load_balancer.id.clone(),
                }
            }
        };
        self.write_status(do_cluster, &state, conditions).await?;

        match state {
            ClusterInfraState::Ready { endpoint, .. } => {
                self.publish_endpoint(&cluster, &endpoint).await?;
                Ok(Action::AwaitChange)
            }
            _ => {
                debug!("Load balancer {} of DOCluster {} has no address yet", load_balancer.id, r);
                Ok(Action::Requeue(self.ctx.intervals.instance_poll))
            }
        }
    }

    async fn find_or_create_load_balancer(
        &self,
        do_cluster: &DOCluster,
        cluster: &Cluster,
    ) -> Result<LoadBalancer, ControllerError> {
        let name = load_balancer_name(do_cluster);
        if let Some(lb) = self.ctx.cloud.find_load_balancer(&name).await? {
            info!("Adopting load balancer {} ({}) for DOCluster {}", lb.name, lb.id, object_ref(do_cluster));
            return Ok(lb);
        }

        let request = CreateLoadBalancerRequest::api_server(
            &name,
            do_cluster.spec.region(),
            API_SERVER_PORT,
            vec![cluster_tag(&cluster.name_any())],
        );
        let lb = self.ctx.cloud.create_load_balancer(request).await?;
        info!(
            "Created load balancer {} ({}) in {} for DOCluster {}",
            lb.name,
            lb.id,
            do_cluster.spec.region(),
            object_ref(do_cluster)
        );
        Ok(lb)
    }

    /// Copies readiness and the endpoint to the Cluster
    async fn publish_endpoint(&self, cluster: &Cluster, endpoint: &ApiEndpoint) -> Result<(), ControllerError> {
        let published = cluster
            .status
            .as_ref()
            .is_some_and(|s| s.infrastructure_ready && s.control_plane_endpoint.as_ref() == Some(endpoint));
        if published {
            return Ok(());
        }
        self.ctx
            .clusters
            .patch_status(
                cluster,
                json!({
                    "infrastructureReady": true,
                    "controlPlaneEndpoint": endpoint,
                }),
            )
            .await?;
        info!(
            "Cluster {} infrastructure ready, endpoint {}:{}",
            object_ref(cluster),
            endpoint.host,
            endpoint.port
        );
        Ok(())
    }

    /// DOMachines still belonging to the cluster
    async fn remaining_machines(&self, do_cluster: &DOCluster, cluster_name: &str) -> Result<Vec<String>, ControllerError> {
        let namespace = do_cluster.namespace().unwrap_or_default();
        let infrastructure_refs: HashSet<String> = self
            .ctx
            .machines
            .list(&namespace)
            .await?
            .iter()
            .filter(|m| m.cluster_name() == Some(cluster_name) && m.spec.infrastructure_ref.is_kind("DOMachine"))
            .map(|m| m.spec.infrastructure_ref.name.clone())
            .collect();

        Ok(self
            .ctx
            .do_machines
            .list(&namespace)
            .await?
            .iter()
            .filter(|dm| {
                dm.labels().get(CLUSTER_NAME_LABEL).map(String::as_str) == Some(cluster_name)
                    || infrastructure_refs.contains(&dm.name_any())
            })
            .map(ResourceExt::name_any)
            .collect())
    }

    async fn reconcile_delete(&self, do_cluster: &DOCluster, cluster: Option<&Cluster>) -> Result<Action, ControllerError> {
        if !has_finalizer(do_cluster, DO_CLUSTER_FINALIZER) {
            return Ok(Action::AwaitChange);
        }
        let r = object_ref(do_cluster);
        let load_balancer_id = do_cluster.infra_state().load_balancer_id().map(str::to_string);
        let state = ClusterInfraState::Deleting {
            load_balancer_id: load_balancer_id.clone(),
        };
        let mut conditions = do_cluster.conditions().to_vec();

        let remaining = self
            .remaining_machines(do_cluster, &cluster_name(do_cluster, cluster))
            .await?;
        if !remaining.is_empty() {
            info!(
                "DOCluster {} deletion waiting for {} DOMachine(s): {}",
                r,
                remaining.len(),
                remaining.join(", ")
            );
            set_condition(
                &mut conditions,
                Condition::false_(
                    LOAD_BALANCER_READY,
                    reasons::WAITING_FOR_MACHINES,
                    format!("waiting for DOMachines to be deleted: {}", remaining.join(", ")),
                ),
            );
            self.write_status(do_cluster, &state, conditions).await?;
            return Ok(Action::Requeue(self.ctx.intervals.precondition));
        }

        set_condition(
            &mut conditions,
            Condition::false_(LOAD_BALANCER_READY, reasons::DELETING, "deleting load balancer"),
        );
        let do_cluster = self.write_status(do_cluster, &state, conditions).await?;

        let target = match load_balancer_id {
            Some(id) => Some(id),
            None => self
                .ctx
                .cloud
                .find_load_balancer(&load_balancer_name(&do_cluster))
                .await?
                .map(|lb| lb.id),
        };
        if let Some(id) = target {
            match self.ctx.cloud.delete_load_balancer(&id).await {
                Ok(()) => info!("Deleted load balancer {} of DOCluster {}", id, r),
                Err(e) if e.is_not_found() => debug!("Load balancer {} of DOCluster {} already deleted", id, r),
                Err(e) => return Err(e.into()),
            }
        }

        remove_finalizer(self.ctx.do_clusters.as_ref(), &do_cluster, DO_CLUSTER_FINALIZER).await?;
        info!("DOCluster {} cleaned up", r);
        Ok(Action::AwaitChange)
    }

    /// Records a permanent failure as a condition; the write is best effort
    async fn record_failure(&self, key: &ObjectKey, err: &ControllerError) {
        let do_cluster = match self.ctx.do_clusters.get(&key.namespace, &key.name).await {
            Ok(Some(do_cluster)) => do_cluster,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to re-read DOCluster {} to record failure: {}", key, e);
                return;
            }
        };
        let mut conditions = do_cluster.conditions().to_vec();
        set_condition(
            &mut conditions,
            Condition::false_(LOAD_BALANCER_READY, reasons::INVALID_CONFIGURATION, err.to_string()),
        );
        if let Err(e) = self.write_status(&do_cluster, &do_cluster.infra_state(), conditions).await {
            warn!("Failed to record failure on DOCluster {}: {}", key, e);
        }
    }
}

#[async_trait]
impl Reconcile for DOClusterReconciler {
    fn kind(&self) -> &'static str {
        "DOCluster"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ControllerError> {
        let Some(do_cluster) = self.ctx.do_clusters.get(&key.namespace, &key.name).await? else {
            debug!("DOCluster {} no longer exists", key);
            return Ok(Action::AwaitChange);
        };

        let resource_key = resource_key(self.kind(), key);
        match self.reconcile_do_cluster(&do_cluster).await {
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
