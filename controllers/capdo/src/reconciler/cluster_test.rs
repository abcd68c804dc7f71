//! Unit tests for the DOCluster reconciler

#[cfg(test)]
mod tests {
    use super::super::{Action, Reconcile};
    use crate::error::ControllerError;
    use crate::test_utils::*;
    use crds::conditions::{reasons, LOAD_BALANCER_READY};
    use crds::{ClusterInfraState, DO_CLUSTER_FINALIZER};
    use digitalocean_client::{CloudCall, ErrorClass, FailureKind, Operation};
    use kube::ResourceExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_provisions_load_balancer_and_publishes_endpoint() {
        let harness = TestHarness::new();
        harness.add_cluster("demo");
        let reconciler = harness.cluster_reconciler();

        // First pass only adds the finalizer
        let action = reconciler.reconcile(&key("demo")).await.unwrap();
        assert_eq!(action, Action::Requeue(Duration::ZERO));
        let do_cluster = harness.do_clusters.get_now("demo").unwrap();
        assert!(do_cluster.finalizers().contains(&DO_CLUSTER_FINALIZER.to_string()));
        assert!(harness.cloud.calls().is_empty());

        // Created, no address yet
        let action = reconciler.reconcile(&key("demo")).await.unwrap();
        assert_eq!(action, Action::Requeue(Duration::from_secs(10)));
        let lbs = harness.cloud.load_balancers();
        assert_eq!(lbs.len(), 1);
        assert_eq!(lbs[0].name, "default-demo-apiserver");
        let do_cluster = harness.do_clusters.get_now("demo").unwrap();
        assert_eq!(
            do_cluster.infra_state(),
            ClusterInfraState::Provisioning {
                load_balancer_id: lbs[0].id.clone()
            }
        );
        let c = condition(do_cluster.conditions(), LOAD_BALANCER_READY);
        assert_eq!(c.reason.as_deref(), Some(reasons::LOAD_BALANCER_PROVISIONING));

        // Address assigned
        let action = reconciler.reconcile(&key("demo")).await.unwrap();
        assert_eq!(action, Action::AwaitChange);
        let lb = harness.cloud.load_balancers()[0].clone();
        let do_cluster = harness.do_clusters.get_now("demo").unwrap();
        assert!(do_cluster.is_ready());
        let status = do_cluster.status.as_ref().unwrap();
        let endpoint = status.control_plane_endpoint.as_ref().unwrap();
        assert_eq!(endpoint.host, lb.ip);
        assert_eq!(endpoint.port, 6443);
        assert!(condition(&status.conditions, LOAD_BALANCER_READY).is_true());

        let cluster = harness.clusters.get_now("demo").unwrap();
        let cluster_status = cluster.status.unwrap();
        assert!(cluster_status.infrastructure_ready);
        assert_eq!(cluster_status.control_plane_endpoint.as_ref(), Some(endpoint));
    }

    #[tokio::test]
    async fn test_load_balancer_request_carries_region_and_tag() {
        let harness = TestHarness::new();
        harness.add_cluster("demo");
        harness.converge(&harness.cluster_reconciler(), "demo", 5).await.unwrap();

        let lb = harness.cloud.load_balancers()[0].clone();
        assert_eq!(lb.region.as_ref().unwrap().slug, "nyc1");
        assert_eq!(
            harness.cloud.mutations(),
            vec![CloudCall::CreateLoadBalancer("default-demo-apiserver".to_string())]
        );
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let harness = TestHarness::new();
        harness.add_cluster("demo");
        let reconciler = harness.cluster_reconciler();
        harness.converge(&reconciler, "demo", 5).await.unwrap();

        harness.cloud.clear_calls();
        let do_cluster_writes = harness.do_clusters.writes();
        let cluster_writes = harness.clusters.writes();

        let action = reconciler.reconcile(&key("demo")).await.unwrap();
        assert_eq!(action, Action::AwaitChange);
        assert!(harness.cloud.mutations().is_empty());
        assert_eq!(harness.do_clusters.writes(), do_cluster_writes);
        assert_eq!(harness.clusters.writes(), cluster_writes);
    }

    #[tokio::test]
    async fn test_lost_status_write_does_not_duplicate_load_balancer() {
        let harness = TestHarness::new();
        harness.add_cluster("demo");
        let reconciler = harness.cluster_reconciler();
        reconciler.reconcile(&key("demo")).await.unwrap();

        // Create succeeds, recording the ID fails
        harness.do_clusters.fail_next_writes(1);
        let action = reconciler.reconcile(&key("demo")).await.unwrap();
        assert_eq!(action, Action::Requeue(Duration::from_secs(5)));
        assert_eq!(harness.do_clusters.get_now("demo").unwrap().infra_state(), ClusterInfraState::Pending);

        harness.converge(&reconciler, "demo", 5).await.unwrap();
        assert_eq!(harness.cloud.count(Operation::CreateLoadBalancer), 1);
        assert_eq!(harness.cloud.load_balancers().len(), 1);
        assert!(harness.do_clusters.get_now("demo").unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_paused_cluster_is_left_alone() {
        let harness = TestHarness::new();
        harness.add_cluster("demo");
        harness.clusters.update("demo", |c| c.spec.paused = true);

        let action = harness.cluster_reconciler().reconcile(&key("demo")).await.unwrap();
        assert_eq!(action, Action::AwaitChange);
        assert!(harness.cloud.calls().is_empty());
        assert_eq!(harness.do_clusters.writes(), 0);
    }

    #[tokio::test]
    async fn test_waits_for_owning_cluster() {
        let harness = TestHarness::new();
        harness.do_clusters.insert(create_test_do_cluster("demo"));

        let action = harness.cluster_reconciler().reconcile(&key("demo")).await.unwrap();
        assert_eq!(action, Action::Requeue(Duration::from_secs(15)));
        assert!(harness.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_object_is_ignored() {
        let harness = TestHarness::new();
        let action = harness.cluster_reconciler().reconcile(&key("gone")).await.unwrap();
        assert_eq!(action, Action::AwaitChange);
    }

    #[tokio::test]
    async fn test_transient_failure_backs_off() {
        let harness = TestHarness::new();
        harness.add_cluster("demo");
        let reconciler = harness.cluster_reconciler();
        reconciler.reconcile(&key("demo")).await.unwrap();

        harness
            .cloud
            .fail_next(Operation::CreateLoadBalancer, FailureKind::Unavailable, 2);
        assert_eq!(
            reconciler.reconcile(&key("demo")).await.unwrap(),
            Action::Requeue(Duration::from_secs(5))
        );
        assert_eq!(
            reconciler.reconcile(&key("demo")).await.unwrap(),
            Action::Requeue(Duration::from_secs(10))
        );

        harness.converge(&reconciler, "demo", 5).await.unwrap();
        assert_eq!(harness.cloud.load_balancers().len(), 1);
        assert!(harness.do_clusters.get_now("demo").unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_rejected_region_is_reported_as_condition() {
        let harness = TestHarness::new();
        harness.cloud.reject_region("nyc1");
        harness.add_cluster("demo");
        let reconciler = harness.cluster_reconciler();
        reconciler.reconcile(&key("demo")).await.unwrap();

        let err = reconciler.reconcile(&key("demo")).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert!(matches!(err, ControllerError::Cloud(_)));

        let do_cluster = harness.do_clusters.get_now("demo").unwrap();
        assert!(!do_cluster.is_ready());
        let c = condition(do_cluster.conditions(), LOAD_BALANCER_READY);
        assert!(!c.is_true());
        assert_eq!(c.reason.as_deref(), Some(reasons::INVALID_CONFIGURATION));
        assert!(c.message.as_deref().unwrap().contains("nyc1"));
    }

    #[tokio::test]
    async fn test_deleted_load_balancer_is_replaced() {
        let harness = TestHarness::new();
        harness.add_cluster("demo");
        let reconciler = harness.cluster_reconciler();
        harness.converge(&reconciler, "demo", 5).await.unwrap();
        let old_id = harness.cloud.load_balancers()[0].id.clone();

        harness.cloud.remove_load_balancer(&old_id);
        let action = reconciler.reconcile(&key("demo")).await.unwrap();
        assert_eq!(action, Action::Requeue(Duration::ZERO));
        assert_eq!(harness.do_clusters.get_now("demo").unwrap().infra_state(), ClusterInfraState::Pending);

        harness.converge(&reconciler, "demo", 5).await.unwrap();
        let lbs = harness.cloud.load_balancers();
        assert_eq!(lbs.len(), 1);
        assert_ne!(lbs[0].id, old_id);
        let do_cluster = harness.do_clusters.get_now("demo").unwrap();
        assert_eq!(do_cluster.infra_state().load_balancer_id(), Some(lbs[0].id.as_str()));
    }

    #[tokio::test]
    async fn test_deletion_waits_for_machines() {
        let harness = TestHarness::new();
        harness.add_cluster("demo");
        let reconciler = harness.cluster_reconciler();
        harness.converge(&reconciler, "demo", 5).await.unwrap();
        harness
            .do_machines
            .insert(create_test_do_machine("demo-cp-1", "demo", true));

        harness.do_clusters.delete("demo");
        harness.cloud.clear_calls();
        let action = reconciler.reconcile(&key("demo")).await.unwrap();
        assert_eq!(action, Action::Requeue(Duration::from_secs(15)));
        assert!(harness.cloud.mutations().is_empty());

        let do_cluster = harness.do_clusters.get_now("demo").unwrap();
        assert_eq!(do_cluster.infra_state().phase(), "Deleting");
        let c = condition(do_cluster.conditions(), LOAD_BALANCER_READY);
        assert_eq!(c.reason.as_deref(), Some(reasons::WAITING_FOR_MACHINES));
        assert!(c.message.as_deref().unwrap().contains("demo-cp-1"));

        harness.do_machines.delete("demo-cp-1");
        let action = reconciler.reconcile(&key("demo")).await.unwrap();
        assert_eq!(action, Action::AwaitChange);
        assert_eq!(harness.cloud.count(Operation::DeleteLoadBalancer), 1);
        assert!(harness.cloud.load_balancers().is_empty());
        assert!(harness.do_clusters.get_now("demo").is_none());
    }

    #[tokio::test]
    async fn test_deletion_finds_untracked_load_balancer() {
        let harness = TestHarness::new();
        harness.add_cluster("demo");
        let reconciler = harness.cluster_reconciler();
        reconciler.reconcile(&key("demo")).await.unwrap();
        harness.do_clusters.fail_next_writes(1);
        reconciler.reconcile(&key("demo")).await.unwrap();
        assert_eq!(harness.cloud.load_balancers().len(), 1);

        harness.do_clusters.delete("demo");
        let action = reconciler.reconcile(&key("demo")).await.unwrap();
        assert_eq!(action, Action::AwaitChange);
        assert!(harness.cloud.load_balancers().is_empty());
        assert!(harness.do_clusters.get_now("demo").is_none());
    }

    #[tokio::test]
    async fn test_deletion_tolerates_already_deleted_load_balancer() {
        let harness = TestHarness::new();
        harness.add_cluster("demo");
        let reconciler = harness.cluster_reconciler();
        harness.converge(&reconciler, "demo", 5).await.unwrap();
        let id = harness.cloud.load_balancers()[0].id.clone();
        harness.cloud.remove_load_balancer(&id);

        harness.do_clusters.delete("demo");
        let action = reconciler.reconcile(&key("demo")).await.unwrap();
        assert_eq!(action, Action::AwaitChange);
        assert!(harness.do_clusters.get_now("demo").is_none());
    }
}
