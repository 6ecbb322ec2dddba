use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorDetails};

/// Role of a user within a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceRole {
    Owner,
    Admin,
    Member,
}

impl SpaceRole {
    /// Whether this role may change the space itself (settings, roster).
    pub fn can_manage(&self) -> bool {
        matches!(self, SpaceRole::Owner | SpaceRole::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: Uuid,
    pub space_id: Uuid,
    pub role: SpaceRole,
}

/// Source of truth for space membership.
///
/// Guards read from here on every request; nothing between the store and the
/// decision caches the answer, so a revoked membership takes effect on the
/// very next request.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn find_membership(
        &self,
        user_id: Uuid,
        space_id: Uuid,
    ) -> Result<Option<Membership>, Error>;
}

/// A resource that belongs to a space, optionally with a per-user owner.
pub trait SpaceScoped {
    fn space_id(&self) -> Uuid;
    fn owner_id(&self) -> Option<Uuid> {
        None
    }
}

/// Membership-based access checks.
///
/// Denials are uniform: a space that does not exist and a space the caller
/// is not a member of produce the same `AccessDenied` error, so responses
/// never reveal whether a guessed id is real.
#[derive(Clone)]
pub struct AuthorizationGuard {
    memberships: Arc<dyn MembershipStore>,
}

impl AuthorizationGuard {
    pub fn new(memberships: Arc<dyn MembershipStore>) -> Self {
        Self { memberships }
    }

    pub async fn verify_space_access(
        &self,
        user_id: Uuid,
        space_id: Uuid,
    ) -> Result<Membership, Error> {
        self.memberships
            .find_membership(user_id, space_id)
            .await?
            .ok_or_else(|| Error::new(ErrorDetails::AccessDenied))
    }

    /// Access check for a resource inside a space. A resource owner passes
    /// without a membership lookup; everyone else must be a member of the
    /// resource's space.
    pub async fn verify_resource_access<R: SpaceScoped>(
        &self,
        user_id: Uuid,
        resource: &R,
    ) -> Result<(), Error> {
        if resource.owner_id() == Some(user_id) {
            return Ok(());
        }
        self.verify_space_access(user_id, resource.space_id())
            .await
            .map(|_| ())
    }
}

/// A space and its roster.
#[derive(Debug, Clone, Serialize)]
pub struct SpaceRecord {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub briefing_enabled: bool,
}

/// In-memory space and membership store.
#[derive(Default)]
pub struct MemorySpaceStore {
    spaces: DashMap<Uuid, SpaceRecord>,
    // Keyed by (user, space); the value is the role.
    memberships: DashMap<(Uuid, Uuid), SpaceRole>,
}

impl MemorySpaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_space(&self, name: &str, owner_id: Uuid) -> SpaceRecord {
        let record = SpaceRecord {
            id: Uuid::now_v7(),
            name: name.to_string(),
            owner_id,
            briefing_enabled: true,
        };
        self.spaces.insert(record.id, record.clone());
        self.memberships
            .insert((owner_id, record.id), SpaceRole::Owner);
        record
    }

    pub fn space(&self, space_id: Uuid) -> Option<SpaceRecord> {
        self.spaces.get(&space_id).map(|s| s.clone())
    }

    pub fn delete_space(&self, space_id: Uuid) {
        self.spaces.remove(&space_id);
        self.memberships.retain(|(_, sid), _| *sid != space_id);
    }

    pub fn add_member(&self, space_id: Uuid, user_id: Uuid, role: SpaceRole) {
        self.memberships.insert((user_id, space_id), role);
    }

    pub fn remove_member(&self, space_id: Uuid, user_id: Uuid) {
        self.memberships.remove(&(user_id, space_id));
    }

    /// Live count of spaces owned by a user.
    pub fn owned_space_count(&self, user_id: Uuid) -> u32 {
        let count = self
            .spaces
            .iter()
            .filter(|s| s.owner_id == user_id)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Live count of members in a space, the owner included.
    pub fn member_count(&self, space_id: Uuid) -> u32 {
        let count = self
            .memberships
            .iter()
            .filter(|entry| entry.key().1 == space_id)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    pub fn set_briefing_enabled(&self, space_id: Uuid, enabled: bool) -> bool {
        match self.spaces.get_mut(&space_id) {
            Some(mut space) => {
                space.briefing_enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn briefing_enabled(&self, space_id: Uuid) -> bool {
        self.spaces
            .get(&space_id)
            .map(|s| s.briefing_enabled)
            .unwrap_or(false)
    }
}

#[async_trait]
impl MembershipStore for MemorySpaceStore {
    async fn find_membership(
        &self,
        user_id: Uuid,
        space_id: Uuid,
    ) -> Result<Option<Membership>, Error> {
        Ok(self
            .memberships
            .get(&(user_id, space_id))
            .map(|role| Membership {
                user_id,
                space_id,
                role: *role,
            }))
    }
}
