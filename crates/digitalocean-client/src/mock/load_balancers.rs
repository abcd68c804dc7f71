//! Load balancer operations for MockDigitalOceanClient

use super::{CloudCall, MockDigitalOceanClient, MockLoadBalancer};
use crate::error::CloudError;
use crate::models::*;

pub(crate) fn snapshot(lb: &MockLoadBalancer) -> LoadBalancer {
    let mut load_balancer = lb.load_balancer.clone();
    load_balancer.droplet_ids = lb.members.iter().copied().collect();
    load_balancer
}

/// Counts one lookup against the provisioning delay
fn poll(lb: &mut MockLoadBalancer, index: u64) -> LoadBalancer {
    if lb.polls_remaining > 0 {
        lb.polls_remaining -= 1;
    }
    if lb.polls_remaining == 0 && lb.load_balancer.ip.is_empty() {
        lb.load_balancer.ip = format!("198.51.100.{}", index % 250 + 1);
        lb.load_balancer.status = LoadBalancerStatus::Active;
    }
    snapshot(lb)
}

fn index_of(id: &str) -> u64 {
    id.rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or_default()
}

pub async fn find_load_balancer(client: &MockDigitalOceanClient, name: &str) -> Result<Option<LoadBalancer>, CloudError> {
    client.record(CloudCall::FindLoadBalancer(name.to_string()))?;
    let mut state = client.lock();
    Ok(state
        .load_balancers
        .iter_mut()
        .find(|(_, lb)| lb.load_balancer.name == name)
        .map(|(id, lb)| poll(lb, index_of(id))))
}

pub async fn get_load_balancer(client: &MockDigitalOceanClient, id: &str) -> Result<LoadBalancer, CloudError> {
    client.record(CloudCall::GetLoadBalancer(id.to_string()))?;
    let mut state = client.lock();
    state
        .load_balancers
        .get_mut(id)
        .map(|lb| poll(lb, index_of(id)))
        .ok_or_else(|| CloudError::NotFound(format!("Load balancer {} not found", id)))
}

pub async fn create_load_balancer(client: &MockDigitalOceanClient, request: CreateLoadBalancerRequest) -> Result<LoadBalancer, CloudError> {
    client.record(CloudCall::CreateLoadBalancer(request.name.clone()))?;
    let mut state = client.lock();

    if request.region.is_empty() || state.rejected_regions.contains(&request.region) {
        return Err(CloudError::InvalidRequest(format!(
            "region '{}' is not available",
            request.region
        )));
    }

    state.next_id += 1;
    let id = format!("lb-{}", state.next_id);
    let lb = MockLoadBalancer {
        load_balancer: LoadBalancer {
            id: id.clone(),
            name: request.name,
            ip: String::new(),
            status: LoadBalancerStatus::New,
            droplet_ids: Vec::new(),
            region: Some(NamedRegion {
                slug: request.region,
            }),
        },
        members: Default::default(),
        polls_remaining: state.load_balancer_polls.max(1),
    };
    let created = snapshot(&lb);
    state.load_balancers.insert(id, lb);
    Ok(created)
}

pub async fn delete_load_balancer(client: &MockDigitalOceanClient, id: &str) -> Result<(), CloudError> {
    client.record(CloudCall::DeleteLoadBalancer(id.to_string()))?;
    let mut state = client.lock();
    state
        .load_balancers
        .remove(id)
        .map(|_| ())
        .ok_or_else(|| CloudError::NotFound(format!("Load balancer {} not found", id)))
}

pub async fn register(client: &MockDigitalOceanClient, load_balancer_id: &str, instance_id: u64) -> Result<(), CloudError> {
    client.record(CloudCall::Register {
        load_balancer_id: load_balancer_id.to_string(),
        instance_id,
    })?;
    let mut state = client.lock();
    if !state.droplets.contains_key(&instance_id) {
        return Err(CloudError::InvalidRequest(format!(
            "droplet {} does not exist",
            instance_id
        )));
    }
    let lb = state
        .load_balancers
        .get_mut(load_balancer_id)
        .ok_or_else(|| CloudError::NotFound(format!("Load balancer {} not found", load_balancer_id)))?;
    lb.members.insert(instance_id);
    Ok(())
}

pub async fn deregister(client: &MockDigitalOceanClient, load_balancer_id: &str, instance_id: u64) -> Result<(), CloudError> {
    client.record(CloudCall::Deregister {
        load_balancer_id: load_balancer_id.to_string(),
        instance_id,
    })?;
    let mut state = client.lock();
    let lb = state
        .load_balancers
        .get_mut(load_balancer_id)
        .ok_or_else(|| CloudError::NotFound(format!("Load balancer {} not found", load_balancer_id)))?;
    lb.members.remove(&instance_id);
    Ok(())
}
