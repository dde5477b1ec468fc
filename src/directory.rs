//! Customer and vehicle lookups owned by another system.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use ulid::Ulid;

#[async_trait]
pub trait Directory: Send + Sync {
    async fn customer_exists(&self, id: Ulid) -> bool;
    async fn vehicle_exists(&self, id: Ulid) -> bool;
    async fn vehicle_belongs_to(&self, vehicle_id: Ulid, customer_id: Ulid) -> bool;
}

/// Trusts the caller's references. For deployments where the request layer
/// has already resolved customer and vehicle.
pub struct TrustingDirectory;

#[async_trait]
impl Directory for TrustingDirectory {
    async fn customer_exists(&self, _id: Ulid) -> bool {
        true
    }

    async fn vehicle_exists(&self, _id: Ulid) -> bool {
        true
    }

    async fn vehicle_belongs_to(&self, _vehicle_id: Ulid, _customer_id: Ulid) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryFile {
    customers: Vec<CustomerEntry>,
    vehicles: Vec<VehicleEntry>,
}

/// A bare id, or `{"id", "active"}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CustomerEntry {
    Id(Ulid),
    Record {
        id: Ulid,
        #[serde(default = "active")]
        active: bool,
    },
}

#[derive(Debug, Deserialize)]
struct VehicleEntry {
    id: Ulid,
    customer_id: Ulid,
    #[serde(default = "active")]
    active: bool,
}

fn active() -> bool {
    true
}

#[derive(Debug, Clone, Copy)]
struct Vehicle {
    owner: Ulid,
    active: bool,
}

/// In-memory customer → vehicles index. Deactivated entries are kept but
/// resolve as missing.
#[derive(Default)]
pub struct InMemoryDirectory {
    /// customer → active
    customers: DashMap<Ulid, bool>,
    vehicles: DashMap<Ulid, Vehicle>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_customer(&self, id: Ulid) {
        self.customers.insert(id, true);
    }

    pub fn add_vehicle(&self, id: Ulid, customer_id: Ulid) {
        self.vehicles.insert(
            id,
            Vehicle {
                owner: customer_id,
                active: true,
            },
        );
    }

    pub fn deactivate_customer(&self, id: Ulid) {
        if let Some(mut active) = self.customers.get_mut(&id) {
            *active = false;
        }
    }

    pub fn deactivate_vehicle(&self, id: Ulid) {
        if let Some(mut vehicle) = self.vehicles.get_mut(&id) {
            vehicle.active = false;
        }
    }

    /// Load `{"customers": [...], "vehicles": [{"id", "customer_id"}]}`.
    /// Entries may carry `"active": false`.
    pub fn from_json_file(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let file: DirectoryFile = serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let dir = Self::new();
        for c in file.customers {
            let (id, active) = match c {
                CustomerEntry::Id(id) => (id, true),
                CustomerEntry::Record { id, active } => (id, active),
            };
            dir.customers.insert(id, active);
        }
        for v in file.vehicles {
            dir.vehicles.insert(
                v.id,
                Vehicle {
                    owner: v.customer_id,
                    active: v.active,
                },
            );
        }
        Ok(dir)
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn customer_exists(&self, id: Ulid) -> bool {
        self.customers.get(&id).is_some_and(|active| *active)
    }

    async fn vehicle_exists(&self, id: Ulid) -> bool {
        self.vehicles.get(&id).is_some_and(|v| v.active)
    }

    async fn vehicle_belongs_to(&self, vehicle_id: Ulid, customer_id: Ulid) -> bool {
        self.vehicles
            .get(&vehicle_id)
            .is_some_and(|v| v.owner == customer_id)
    }
}
