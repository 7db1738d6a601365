use std::collections::HashSet;

use dashmap::DashMap;
use socketioxide::socket::Sid;
use uuid::Uuid;

/// Registry of live socket connections per user. A user with several open
/// tabs has several sids in the same group; an unauthenticated socket is
/// never added. DashMap shards the locking so fan-out on one user does not
/// contend with connects elsewhere.
#[derive(Default)]
pub struct DeliveryGroups {
    groups: DashMap<Uuid, HashSet<Sid>>,
}

impl DeliveryGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user_id: Uuid, sid: Sid) {
        self.groups.entry(user_id).or_default().insert(sid);
    }

    /// Removes one connection; the group survives while other connections of
    /// the same user remain, and empty groups are pruned.
    pub fn remove(&self, user_id: Uuid, sid: Sid) {
        if let Some(mut entry) = self.groups.get_mut(&user_id) {
            entry.remove(&sid);
            if entry.is_empty() {
                drop(entry);
                self.groups.remove_if(&user_id, |_, sids| sids.is_empty());
            }
        }
    }

    /// Consistent copy of a group's members, taken before dispatch so a
    /// concurrent disconnect cannot upset the iteration.
    pub fn snapshot(&self, user_id: Uuid) -> Vec<Sid> {
        self.groups
            .get(&user_id)
            .map(|sids| sids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.groups.contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_may_hold_multiple_connections() {
        let groups = DeliveryGroups::new();
        let user = Uuid::new_v4();
        let (a, b) = (Sid::new(), Sid::new());

        groups.add(user, a);
        groups.add(user, b);

        let snapshot: HashSet<Sid> = groups.snapshot(user).into_iter().collect();
        assert_eq!(snapshot, HashSet::from([a, b]));
    }

    #[test]
    fn remove_drops_only_that_connection() {
        let groups = DeliveryGroups::new();
        let user = Uuid::new_v4();
        let (a, b) = (Sid::new(), Sid::new());

        groups.add(user, a);
        groups.add(user, b);
        groups.remove(user, a);

        assert_eq!(groups.snapshot(user), vec![b]);
        assert!(groups.contains(user));
    }

    #[test]
    fn empty_groups_are_pruned() {
        let groups = DeliveryGroups::new();
        let user = Uuid::new_v4();
        let sid = Sid::new();

        groups.add(user, sid);
        groups.remove(user, sid);

        assert!(!groups.contains(user));
        assert!(groups.snapshot(user).is_empty());
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let groups = DeliveryGroups::new();
        let user = Uuid::new_v4();
        let sid = Sid::new();

        groups.add(user, sid);
        let snapshot = groups.snapshot(user);
        groups.remove(user, sid);

        assert_eq!(snapshot, vec![sid]);
    }

    #[test]
    fn unknown_user_has_no_group() {
        let groups = DeliveryGroups::new();
        assert!(!groups.contains(Uuid::new_v4()));
        assert!(groups.snapshot(Uuid::new_v4()).is_empty());
    }
}
