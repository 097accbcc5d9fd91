use std::collections::BTreeSet;

use cidx_types::{Role, User};

use crate::error::Result;
use crate::store::{GroupStore, UserStore};

/// Stateless access resolution (spec.md §4.10): `(user, requested_aliases?)
/// -> allowed_aliases`. Admins always see every alias the caller passes in
/// `all_aliases`; non-admins are intersected against their group access.
///
/// Role is resolved fresh from `UserStore` on every call — never cached by
/// the caller across requests — which is what prevents the stale-role-after
/// promotion bug (spec.md §4.10, bug #67, testable property #8).
pub struct AccessResolver<'a> {
    pub users: &'a UserStore,
    pub groups: &'a GroupStore,
}

impl<'a> AccessResolver<'a> {
    pub fn new(users: &'a UserStore, groups: &'a GroupStore) -> Self {
        AccessResolver { users, groups }
    }

    /// `all_aliases` is the full registry set, supplied by the caller
    /// (`Coordinator`) since `AccessResolver` itself does not own the
    /// `Registry`.
    pub fn resolve(
        &self,
        user: &User,
        requested: Option<&BTreeSet<String>>,
        all_aliases: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>> {
        let role = self.users.role_of(&user.username)?;
        let allowed = match role {
            Role::Admin => all_aliases.clone(),
            Role::Member => {
                let groups = self.groups.groups_of(&user.username)?;
                self.groups.allowed_aliases_for_groups(&groups)?
            }
        };
        Ok(match requested {
            Some(requested) => allowed.intersection(requested).cloned().collect(),
            None => allowed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (UserStore, GroupStore) {
        let users = UserStore::in_memory().unwrap();
        let groups = GroupStore::in_memory().unwrap();
        (users, groups)
    }

    #[test]
    fn admin_sees_everything_regardless_of_group() {
        let (users, groups) = fixture();
        users.set_role("alice", Role::Admin).unwrap();
        let all: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let resolver = AccessResolver::new(&users, &groups);
        let allowed = resolver.resolve(&User::new("alice"), None, &all).unwrap();
        assert_eq!(allowed, all);
    }

    #[test]
    fn member_is_limited_to_group_access() {
        let (users, groups) = fixture();
        users.set_role("bob", Role::Member).unwrap();
        groups.add_user_to_group("bob", "engineering").unwrap();
        groups.grant("engineering", "service-a").unwrap();
        let all: BTreeSet<String> =
            ["service-a", "service-b"].iter().map(|s| s.to_string()).collect();
        let resolver = AccessResolver::new(&users, &groups);
        let allowed = resolver.resolve(&User::new("bob"), None, &all).unwrap();
        assert_eq!(allowed, BTreeSet::from(["service-a".to_string()]));
    }

    #[test]
    fn requested_aliases_are_intersected_with_allowed() {
        let (users, groups) = fixture();
        users.set_role("carol", Role::Admin).unwrap();
        let all: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let requested = BTreeSet::from(["a".to_string()]);
        let resolver = AccessResolver::new(&users, &groups);
        let allowed = resolver.resolve(&User::new("carol"), Some(&requested), &all).unwrap();
        assert_eq!(allowed, requested);
    }

    #[test]
    fn role_change_is_observed_without_session_rotation() {
        let (users, groups) = fixture();
        users.set_role("dave", Role::Member).unwrap();
        let all: BTreeSet<String> = ["a"].iter().map(|s| s.to_string()).collect();
        let resolver = AccessResolver::new(&users, &groups);
        assert!(resolver.resolve(&User::new("dave"), None, &all).unwrap().is_empty());

        users.set_role("dave", Role::Admin).unwrap();
        assert_eq!(resolver.resolve(&User::new("dave"), None, &all).unwrap(), all);
    }
}
