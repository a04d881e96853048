//! Cluster registry.
//!
//! # Responsibilities
//! - Hold every cluster of a snapshot with its members and strategy
//! - Select a member and hand out an in-flight guard
//! - Carry member health across configuration reloads

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::validation::{member_authority, ValidationError};
use crate::config::{ClusterConfig, LoadBalancingPolicy};
use crate::error::GatewayError;
use crate::load_balancer::{
    backend::{Backend, BackendGuard},
    least_requests::LeastRequests,
    random::Random,
    round_robin::RoundRobin,
    LoadBalancer,
};

/// A named group of interchangeable members.
#[derive(Debug)]
pub struct Cluster {
    pub id: String,
    pub policy: LoadBalancingPolicy,
    members: Vec<Arc<Backend>>,
    balancer: Box<dyn LoadBalancer>,
}

impl Cluster {
    pub fn members(&self) -> &[Arc<Backend>] {
        &self.members
    }

    pub fn healthy_members(&self) -> usize {
        self.members.iter().filter(|m| m.is_healthy()).count()
    }
}

fn balancer_for(policy: LoadBalancingPolicy) -> Box<dyn LoadBalancer> {
    match policy {
        LoadBalancingPolicy::RoundRobin => Box::new(RoundRobin::new()),
        LoadBalancingPolicy::LeastRequests => Box::new(LeastRequests::new()),
        LoadBalancingPolicy::Random => Box::new(Random::new()),
    }
}

/// All clusters of one configuration snapshot.
#[derive(Debug, Default)]
pub struct ClusterRegistry {
    clusters: HashMap<String, Cluster>,
}

impl ClusterRegistry {
    /// Build from configuration. Members whose cluster, name, destination
    /// and ceiling are unchanged are taken over from `previous` together
    /// with their health state and in-flight count.
    pub fn from_config(
        configs: &BTreeMap<String, ClusterConfig>,
        previous: Option<&ClusterRegistry>,
    ) -> Result<Self, ValidationError> {
        let mut clusters = HashMap::with_capacity(configs.len());

        for (id, config) in configs {
            let old = previous.and_then(|p| p.clusters.get(id));
            let mut members = Vec::with_capacity(config.members.len());

            for member in &config.members {
                let authority = member_authority(&member.address).map_err(|e| {
                    ValidationError::new(
                        format!("reverse_proxy.clusters.{}.members[{}].address", id, member.name),
                        e,
                    )
                })?;

                let reused = old.and_then(|c| {
                    c.members.iter().find(|b| {
                        b.name == member.name
                            && b.authority == authority
                            && b.max_connections == member.max_connections
                    })
                });
                let backend = match reused {
                    Some(b) => b.clone(),
                    None => Arc::new(Backend::new(
                        id.clone(),
                        member.name.clone(),
                        member.address.clone(),
                        authority,
                        member.max_connections,
                    )),
                };
                members.push(backend);
            }

            clusters.insert(
                id.clone(),
                Cluster {
                    id: id.clone(),
                    policy: config.load_balancing,
                    members,
                    balancer: balancer_for(config.load_balancing),
                },
            );
        }

        Ok(Self { clusters })
    }

    /// Select a member of `cluster` and reserve an in-flight slot on it.
    pub fn select(&self, cluster: &str) -> Result<BackendGuard, GatewayError> {
        let unavailable = || GatewayError::ClusterUnavailable {
            cluster: cluster.to_string(),
        };
        let group = self.clusters.get(cluster).ok_or_else(unavailable)?;

        // A pick can lose the race for the last slot; try each member at most once.
        for _ in 0..group.members.len() {
            match group.balancer.next_server(&group.members) {
                Some(backend) => {
                    if let Some(guard) = backend.try_acquire() {
                        return Ok(guard);
                    }
                }
                None => break,
            }
        }

        tracing::debug!(
            cluster = %cluster,
            members = group.members.len(),
            healthy = group.healthy_members(),
            "No eligible member in cluster"
        );
        Err(unavailable())
    }

    pub fn get(&self, cluster: &str) -> Option<&Cluster> {
        self.clusters.get(cluster)
    }

    /// Clusters sorted by id.
    pub fn clusters(&self) -> Vec<&Cluster> {
        let mut clusters: Vec<&Cluster> = self.clusters.values().collect();
        clusters.sort_by(|a, b| a.id.cmp(&b.id));
        clusters
    }

    /// Every member of every cluster (for health checking).
    pub fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.clusters
            .values()
            .flat_map(|c| c.members.iter())
            .cloned()
            .collect()
    }
}
