//! Droplet operations for MockDigitalOceanClient

use super::{CloudCall, MockDigitalOceanClient, MockDroplet};
use crate::error::CloudError;
use crate::models::*;

/// Counts one lookup against the boot delay, activating the droplet when it runs out
fn poll(droplet: &mut MockDroplet) -> Droplet {
    if droplet.polls_remaining > 0 {
        droplet.polls_remaining -= 1;
    }
    if droplet.polls_remaining == 0 && droplet.droplet.status == DropletStatus::New {
        let id = droplet.droplet.id;
        droplet.droplet.status = DropletStatus::Active;
        droplet.droplet.networks = Networks {
            v4: vec![
                NetworkAddress {
                    ip_address: format!("203.0.113.{}", id % 250 + 1),
                    type_: NetworkType::Public,
                },
                NetworkAddress {
                    ip_address: format!("10.10.0.{}", id % 250 + 1),
                    type_: NetworkType::Private,
                },
            ],
            v6: Vec::new(),
        };
    }
    droplet.droplet.clone()
}

pub async fn find_instance(client: &MockDigitalOceanClient, name: &str) -> Result<Option<Droplet>, CloudError> {
    client.record(CloudCall::FindInstance(name.to_string()))?;
    let mut state = client.lock();
    Ok(state
        .droplets
        .values_mut()
        .find(|d| d.droplet.name == name)
        .map(poll))
}

pub async fn get_instance(client: &MockDigitalOceanClient, id: u64) -> Result<Droplet, CloudError> {
    client.record(CloudCall::GetInstance(id))?;
    let mut state = client.lock();
    state
        .droplets
        .get_mut(&id)
        .map(poll)
        .ok_or_else(|| CloudError::NotFound(format!("Droplet {} not found", id)))
}

pub async fn create_instance(client: &MockDigitalOceanClient, request: CreateInstanceRequest) -> Result<Droplet, CloudError> {
    client.record(CloudCall::CreateInstance(request.name.clone()))?;
    let mut state = client.lock();

    if state.rejected_regions.contains(&request.region) {
        return Err(CloudError::InvalidRequest(format!(
            "region {} is not available",
            request.region
        )));
    }
    if request.size.is_empty() {
        return Err(CloudError::InvalidRequest("size is required".to_string()));
    }
    if request.image.is_null() || request.image == serde_json::json!("") {
        return Err(CloudError::InvalidRequest("image is required".to_string()));
    }

    state.next_id += 1;
    let id = state.next_id;
    let mut droplet = MockDroplet {
        droplet: Droplet {
            id,
            name: request.name,
            status: DropletStatus::New,
            networks: Networks::default(),
            tags: request.tags,
            region: Some(NamedRegion {
                slug: request.region,
            }),
        },
        polls_remaining: state.boot_polls,
    };
    // The create response never reports an active droplet
    let created = droplet.droplet.clone();
    if droplet.polls_remaining == 0 {
        droplet.polls_remaining = 1;
    }
    state.droplets.insert(id, droplet);
    Ok(created)
}

pub async fn delete_instance(client: &MockDigitalOceanClient, id: u64) -> Result<(), CloudError> {
    client.record(CloudCall::DeleteInstance(id))?;
    let mut state = client.lock();
    if state.droplets.remove(&id).is_none() {
        return Err(CloudError::NotFound(format!("Droplet {} not found", id)));
    }
    for lb in state.load_balancers.values_mut() {
        lb.members.remove(&id);
    }
    Ok(())
}
