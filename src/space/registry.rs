//! Space registry
//!
//! Tracks, per space id, which connections and users are present and who owns
//! the space. Each space sits behind its own mutex so Join/Leave/ownership
//! transitions for one space are serialised while different spaces proceed in
//! parallel.
//!
//! Ownership rules:
//! - a user listing the space in `ownedSpaceIds` takes ownership on join, even
//!   from a current owner (last claim wins)
//! - otherwise the first user to join an owner-less space becomes owner
//! - when the owner's last connection leaves, the earliest-joined remaining
//!   member inherits ownership

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::net::session::ConnectionId;
use crate::protocol::events::MemberInfo;

#[derive(Debug, Clone)]
struct Member {
    user_id: String,
    connections: Vec<ConnectionId>,
}

#[derive(Debug, Default)]
struct Space {
    /// In join order
    members: Vec<Member>,
    owner: Option<String>,
    /// Set once the last connection left; the entry is being removed
    closed: bool,
}

impl Space {
    fn member_list(&self) -> Vec<MemberInfo> {
        self.members
            .iter()
            .map(|m| MemberInfo::new(m.user_id.clone(), self.owner.as_deref() == Some(&m.user_id)))
            .collect()
    }

    fn connection_count(&self) -> usize {
        self.members.iter().map(|m| m.connections.len()).sum()
    }

    fn sockets_for(&self, user_id: &str) -> Vec<ConnectionId> {
        self.members
            .iter()
            .find(|m| m.user_id == user_id)
            .map(|m| m.connections.clone())
            .unwrap_or_default()
    }
}

/// Result of a connection leaving its space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub space_id: String,
    pub user_id: String,
    /// The user has no connection left in the space
    pub user_left: bool,
    /// Ownership moved to this user because the owner left
    pub new_owner: Option<String>,
    /// Members still present (empty if the space was deleted)
    pub members: Vec<MemberInfo>,
}

impl Departure {
    pub fn space_closed(&self) -> bool {
        self.members.is_empty()
    }
}

/// Result of a join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub space_id: String,
    pub members: Vec<MemberInfo>,
    pub is_owner: bool,
    /// The space this connection was in before, if any
    pub previous: Option<Departure>,
}

/// Per-space membership summary
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceSummary {
    pub space_id: String,
    pub members: usize,
    pub connections: usize,
    pub owner: Option<String>,
}

/// Membership and ownership of every live space
#[derive(Default)]
pub struct SpaceRegistry {
    spaces: DashMap<String, Arc<Mutex<Space>>>,
    /// Connection to the space it is joined to
    conn_space: DashMap<ConnectionId, String>,
}

impl SpaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `conn_id` (as `user_id`) to `space_id`
    ///
    /// Leaves any prior space first and creates the space if needed.
    pub fn join(
        &self,
        conn_id: ConnectionId,
        user_id: &str,
        space_id: &str,
        owned_space_ids: &[String],
    ) -> JoinOutcome {
        let previous = self.leave(conn_id);
        let claims = owned_space_ids.iter().any(|s| s == space_id);

        loop {
            let handle = self
                .spaces
                .entry(space_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Space::default())))
                .clone();

            let mut space = handle.lock();
            if space.closed {
                // Lost a race with the last leave; the entry is gone or going.
                drop(space);
                self.spaces
                    .remove_if(space_id, |_, current| Arc::ptr_eq(current, &handle));
                continue;
            }

            let created = space.members.is_empty();
            match space.members.iter().position(|m| m.user_id == user_id) {
                Some(index) => {
                    let member = &mut space.members[index];
                    if !member.connections.contains(&conn_id) {
                        member.connections.push(conn_id);
                    }
                }
                None => space.members.push(Member {
                    user_id: user_id.to_string(),
                    connections: vec![conn_id],
                }),
            }

            if claims || space.owner.is_none() {
                if let Some(previous_owner) = space.owner.as_deref().filter(|o| *o != user_id) {
                    info!(
                        space_id = %space_id,
                        user_id = %user_id,
                        previous_owner = %previous_owner,
                        "Ownership claimed"
                    );
                }
                space.owner = Some(user_id.to_string());
            }

            self.conn_space.insert(conn_id, space_id.to_string());

            let is_owner = space.owner.as_deref() == Some(user_id);
            debug!(
                conn_id = %conn_id,
                user_id = %user_id,
                space_id = %space_id,
                is_owner = is_owner,
                created = created,
                "Joined space"
            );

            return JoinOutcome {
                space_id: space_id.to_string(),
                members: space.member_list(),
                is_owner,
                previous,
            };
        }
    }

    /// Remove `conn_id` from its space
    ///
    /// Returns `None` if the connection was not in a space.
    pub fn leave(&self, conn_id: ConnectionId) -> Option<Departure> {
        let (_, space_id) = self.conn_space.remove(&conn_id)?;
        let handle = self.spaces.get(&space_id).map(|entry| entry.clone())?;

        let mut space = handle.lock();
        let index = space
            .members
            .iter()
            .position(|m| m.connections.contains(&conn_id))?;

        let member = &mut space.members[index];
        member.connections.retain(|c| *c != conn_id);
        let user_id = member.user_id.clone();
        let user_left = member.connections.is_empty();

        let mut new_owner = None;
        if user_left {
            space.members.remove(index);
            if space.owner.as_deref() == Some(user_id.as_str()) {
                space.owner = space.members.first().map(|m| m.user_id.clone());
                new_owner = space.owner.clone();
                if let Some(owner) = &new_owner {
                    info!(space_id = %space_id, new_owner = %owner, "Ownership transferred");
                }
            }
        }

        if space.members.is_empty() {
            space.closed = true;
            self.spaces
                .remove_if(&space_id, |_, current| Arc::ptr_eq(current, &handle));
            debug!(space_id = %space_id, "Space closed");
        }

        debug!(
            conn_id = %conn_id,
            user_id = %user_id,
            space_id = %space_id,
            user_left = user_left,
            "Left space"
        );

        Some(Departure {
            members: space.member_list(),
            space_id,
            user_id,
            user_left,
            new_owner,
        })
    }

    fn with_space<R>(&self, space_id: &str, f: impl FnOnce(&Space) -> R) -> Option<R> {
        let handle = self.spaces.get(space_id).map(|entry| entry.clone())?;
        let space = handle.lock();
        if space.closed {
            return None;
        }
        Some(f(&space))
    }

    /// Members annotated with `isOwner`; empty for unknown spaces
    pub fn members_of(&self, space_id: &str) -> Vec<MemberInfo> {
        self.with_space(space_id, Space::member_list)
            .unwrap_or_default()
    }

    pub fn owner_of(&self, space_id: &str) -> Option<String> {
        self.with_space(space_id, |space| space.owner.clone())
            .flatten()
    }

    pub fn sockets_for_user(&self, space_id: &str, user_id: &str) -> Vec<ConnectionId> {
        self.with_space(space_id, |space| space.sockets_for(user_id))
            .unwrap_or_default()
    }

    /// First connection of the current owner, resolved under one lock
    pub fn owner_connection(&self, space_id: &str) -> Option<ConnectionId> {
        self.with_space(space_id, |space| {
            let owner = space.owner.as_deref()?;
            space.sockets_for(owner).first().copied()
        })
        .flatten()
    }

    /// Every connection joined to the space
    pub fn connections_of(&self, space_id: &str) -> Vec<ConnectionId> {
        self.with_space(space_id, |space| {
            space
                .members
                .iter()
                .flat_map(|m| m.connections.iter().copied())
                .collect()
        })
        .unwrap_or_default()
    }

    /// Space a connection is currently joined to
    pub fn space_of(&self, conn_id: ConnectionId) -> Option<String> {
        self.conn_space.get(&conn_id).map(|entry| entry.clone())
    }

    pub fn contains(&self, space_id: &str) -> bool {
        self.with_space(space_id, |_| ()).is_some()
    }

    pub fn space_count(&self) -> usize {
        self.spaces.len()
    }

    pub fn summaries(&self) -> Vec<SpaceSummary> {
        let handles: Vec<_> = self
            .spaces
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut summaries: Vec<_> = handles
            .into_iter()
            .filter_map(|(space_id, handle)| {
                let space = handle.lock();
                (!space.closed).then(|| SpaceSummary {
                    space_id,
                    members: space.members.len(),
                    connections: space.connection_count(),
                    owner: space.owner.clone(),
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.space_id.cmp(&b.space_id));
        summaries
    }
}
