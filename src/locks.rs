//! Door lock policy evaluation
//!
//! A lock admits an actor either by direct user-id allowlist or by a
//! relationship rule: `(rtype, other)` passes when the world records that
//! the actor relates to `other` as `rtype` and `other` is still a live
//! account. A deleted account skips the rule, it never grants.

use uuid::Uuid;

use crate::world::room::DoorLock;
use crate::world::World;

/// May `actor` pass a door guarded by `lock`?
///
/// Missing or empty policy denies; callers treat an unlockable door (no
/// policy at all) separately.
pub fn may_pass(world: &World, lock: Option<&DoorLock>, actor: Uuid) -> bool {
    let Some(lock) = lock else {
        // A door with a lock entry we can't read is sealed
        return false;
    };

    if lock.allow_ids.contains(&actor) {
        return true;
    }

    lock.allow_rel.iter().any(|(rtype, other)| {
        // The target account must still exist
        if !world.users.contains_key(other) {
            return false;
        }
        world.relationship(actor, *other) == Some(rtype.as_str())
    })
}

/// Whether a named door in a room is locked for this actor
pub fn door_denies(world: &World, room_id: &str, door_name: &str, actor: Uuid) -> bool {
    let Some(room) = world.room(room_id) else {
        return true;
    };
    match room.door_locks.get(door_name) {
        // No lock at all: open passage
        None => false,
        Some(lock) => !may_pass(world, Some(lock), actor),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::world::user::User;
    use crate::world::START_ROOM_ID;
    use std::collections::HashMap;

    fn user(world: &mut World, name: &str) -> Uuid {
        let user = User::new(name, "x".into(), "");
        let id = user.id;
        world.users.insert(id, user);
        id
    }

    #[test]
    fn test_empty_policy_denies() {
        let mut world = World::new_default();
        let alice = user(&mut world, "Alice");
        assert!(!may_pass(&world, Some(&DoorLock::default()), alice));
        assert!(!may_pass(&world, None, alice));
    }

    #[test]
    fn test_allowlist_admits() {
        let mut world = World::new_default();
        let alice = user(&mut world, "Alice");
        let lock = DoorLock {
            allow_ids: [alice].into_iter().collect(),
            allow_rel: vec![],
        };
        assert!(may_pass(&world, Some(&lock), alice));
    }

    #[test]
    fn test_relationship_rule_admits() {
        let mut world = World::new_default();
        let alice = user(&mut world, "Alice");
        let bob = user(&mut world, "Bob");
        world
            .relationships
            .insert(alice, HashMap::from([(bob, "friend".to_string())]));
        let lock = DoorLock {
            allow_ids: Default::default(),
            allow_rel: vec![("friend".into(), bob)],
        };
        assert!(may_pass(&world, Some(&lock), alice));

        // Wrong relationship type does not pass
        let lock = DoorLock {
            allow_ids: Default::default(),
            allow_rel: vec![("rival".into(), bob)],
        };
        assert!(!may_pass(&world, Some(&lock), alice));
    }

    #[test]
    fn test_deleted_target_skips_rule() {
        let mut world = World::new_default();
        let alice = user(&mut world, "Alice");
        let bob = user(&mut world, "Bob");
        world
            .relationships
            .insert(alice, HashMap::from([(bob, "friend".to_string())]));
        // Bob's account goes away; the edge remains
        world.users.remove(&bob);

        let lock = DoorLock {
            allow_ids: Default::default(),
            allow_rel: vec![("friend".into(), bob)],
        };
        assert!(!may_pass(&world, Some(&lock), alice));
    }

    #[test]
    fn test_unlocked_door_is_open() {
        let mut world = World::new_default();
        let alice = user(&mut world, "Alice");
        assert!(!door_denies(&world, START_ROOM_ID, "any door", alice));
    }
}
