//! Readiness predicates
//!
//! Pure functions over object status. Reconcilers use them as gates and test
//! harnesses use them as wait conditions.

use crds::{
    Cluster, ClusterInfraState, DOCluster, DOMachine, Machine, MachineInfraState,
};

/// `Cluster.status.infrastructureReady`
pub fn is_infrastructure_ready(cluster: &Cluster) -> bool {
    cluster
        .status
        .as_ref()
        .is_some_and(|s| s.infrastructure_ready)
}

/// `Cluster.status.controlPlaneInitialized`
pub fn is_control_plane_initialized(cluster: &Cluster) -> bool {
    cluster
        .status
        .as_ref()
        .is_some_and(|s| s.control_plane_initialized)
}

/// Bootstrap data is rendered and its secret is named
pub fn is_bootstrap_ready(machine: &Machine) -> bool {
    let ready = machine.status.as_ref().is_some_and(|s| s.bootstrap_ready);
    ready && bootstrap_secret_name(machine).is_some()
}

/// Name of the secret holding the bootstrap user-data
pub fn bootstrap_secret_name(machine: &Machine) -> Option<&str> {
    machine
        .spec
        .bootstrap
        .data_secret_name
        .as_deref()
        .filter(|n| !n.is_empty())
}

/// `Machine.status.nodeRef` is set
pub fn has_node_ref(machine: &Machine) -> bool {
    machine.status.as_ref().is_some_and(|s| s.node_ref.is_some())
}

/// DOCluster has a load balancer address published
pub fn is_infra_cluster_ready(do_cluster: &DOCluster) -> bool {
    matches!(do_cluster.infra_state(), ClusterInfraState::Ready { .. })
}

/// DOMachine's droplet is active and the machine is not being torn down
pub fn is_infra_machine_running(do_machine: &DOMachine) -> bool {
    matches!(
        do_machine.infra_state(),
        MachineInfraState::Running { .. } | MachineInfraState::Ready { .. }
    )
}

/// DOMachine is fully provisioned
pub fn is_infra_machine_ready(do_machine: &DOMachine) -> bool {
    matches!(do_machine.infra_state(), MachineInfraState::Ready { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{
        ApiEndpoint, Bootstrap, ClusterSpec, ClusterStatus, DOClusterSpec, DOClusterStatus,
        DOMachineSpec, DOMachineStatus, MachineSpec, MachineStatus, NodeReference,
    };

    fn cluster(status: Option<ClusterStatus>) -> Cluster {
        let mut cluster = Cluster::new("demo", ClusterSpec::default());
        cluster.status = status;
        cluster
    }

    fn machine(secret: Option<&str>, status: Option<MachineStatus>) -> Machine {
        let mut machine = Machine::new(
            "cp-1",
            MachineSpec {
                bootstrap: Bootstrap {
                    config_ref: None,
                    data_secret_name: secret.map(str::to_string),
                },
                ..Default::default()
            },
        );
        machine.status = status;
        machine
    }

    #[test]
    fn test_cluster_predicates() {
        assert!(!is_infrastructure_ready(&cluster(None)));
        let ready = cluster(Some(ClusterStatus {
            infrastructure_ready: true,
            ..Default::default()
        }));
        assert!(is_infrastructure_ready(&ready));
        assert!(!is_control_plane_initialized(&ready));
    }

    #[test]
    fn test_bootstrap_ready_needs_secret() {
        let status = MachineStatus {
            bootstrap_ready: true,
            ..Default::default()
        };
        assert!(!is_bootstrap_ready(&machine(None, Some(status.clone()))));
        assert!(!is_bootstrap_ready(&machine(Some(""), Some(status.clone()))));
        assert!(is_bootstrap_ready(&machine(Some("cp-1-bootstrap"), Some(status))));
        assert!(!is_bootstrap_ready(&machine(Some("cp-1-bootstrap"), None)));
    }

    #[test]
    fn test_node_ref() {
        let status = MachineStatus {
            node_ref: Some(NodeReference {
                name: "cp-1".to_string(),
                uid: None,
            }),
            ..Default::default()
        };
        assert!(has_node_ref(&machine(None, Some(status))));
        assert!(!has_node_ref(&machine(None, None)));
    }

    #[test]
    fn test_infra_cluster_ready_requires_endpoint() {
        let mut do_cluster = DOCluster::new("demo", DOClusterSpec::default());
        do_cluster.status = Some(DOClusterStatus {
            ready: true,
            load_balancer_id: Some("lb-1".to_string()),
            ..Default::default()
        });
        assert!(!is_infra_cluster_ready(&do_cluster));

        do_cluster.status = Some(DOClusterStatus {
            ready: true,
            load_balancer_id: Some("lb-1".to_string()),
            control_plane_endpoint: Some(ApiEndpoint::new("198.51.100.1")),
            ..Default::default()
        });
        assert!(is_infra_cluster_ready(&do_cluster));
    }

    #[test]
    fn test_infra_machine_running_and_ready() {
        let mut do_machine = DOMachine::new("cp-1", DOMachineSpec::default());
        assert!(!is_infra_machine_running(&do_machine));

        do_machine.status = Some(DOMachineStatus {
            phase: Some("Running".to_string()),
            instance_id: Some("42".to_string()),
            instance_status: Some("active".to_string()),
            ..Default::default()
        });
        assert!(is_infra_machine_running(&do_machine));
        assert!(!is_infra_machine_ready(&do_machine));

        do_machine.status = Some(DOMachineStatus {
            ready: true,
            instance_id: Some("42".to_string()),
            ..Default::default()
        });
        assert!(is_infra_machine_ready(&do_machine));
    }

    #[test]
    fn test_active_droplet_is_not_running_while_deleting_or_failed() {
        let mut do_machine = DOMachine::new("cp-1", DOMachineSpec::default());
        do_machine.status = Some(DOMachineStatus {
            phase: Some("Deleting".to_string()),
            instance_id: Some("42".to_string()),
            instance_status: Some("active".to_string()),
            ..Default::default()
        });
        assert!(!is_infra_machine_running(&do_machine));

        // A failure downgrades the phase but keeps the droplet's reported status
        do_machine.status = Some(DOMachineStatus {
            phase: Some("Provisioning".to_string()),
            instance_id: Some("42".to_string()),
            instance_status: Some("active".to_string()),
            ..Default::default()
        });
        assert!(!is_infra_machine_running(&do_machine));
    }
}
