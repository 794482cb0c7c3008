//! Two-party trade with a confirmation state machine
//!
//! A trade moves initiated -> proposed -> accepted / rejected /
//! cancelled. Changing either offer resets both confirmations; the swap
//! only runs once both sides have accepted the exact current set, and a
//! failed swap rolls everything back. Trades are session-scoped and die
//! with a disconnect.

use uuid::Uuid;

use super::{OutboundMessage, ServiceResult};
use crate::error::ServiceError;
use crate::markup::bold;
use crate::resolve::resolve;
use crate::world::World;

/// Lifecycle of one negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradePhase {
    /// Invited, the other party hasn't responded yet
    Initiated,
    /// Both parties at the table, offers open
    Proposed,
}

/// One in-flight trade between two sessions
#[derive(Debug, Clone, PartialEq)]
pub struct TradeState {
    pub initiator: String,
    pub partner: String,
    pub phase: TradePhase,
    pub offer_initiator: Vec<Uuid>,
    pub offer_partner: Vec<Uuid>,
    pub accepted_initiator: bool,
    pub accepted_partner: bool,
}

impl TradeState {
    fn involves(&self, session_id: &str) -> bool {
        self.initiator == session_id || self.partner == session_id
    }

    fn counterpart(&self, session_id: &str) -> &str {
        if self.initiator == session_id {
            &self.partner
        } else {
            &self.initiator
        }
    }

    fn offer_of_mut(&mut self, session_id: &str) -> &mut Vec<Uuid> {
        if self.initiator == session_id {
            &mut self.offer_initiator
        } else {
            &mut self.offer_partner
        }
    }

    fn accepted_of_mut(&mut self, session_id: &str) -> &mut bool {
        if self.initiator == session_id {
            &mut self.accepted_initiator
        } else {
            &mut self.accepted_partner
        }
    }
}

fn trade_index(world: &World, session_id: &str) -> Option<usize> {
    world.trades.iter().position(|t| t.involves(session_id))
}

/// `/trade <player>`: invite a co-located player, or accept their
/// pending invitation
pub fn initiate(world: &mut World, session_id: &str, partner_query: &str) -> ServiceResult {
    let Some(room) = world.room_of_session(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let candidates: Vec<(String, String)> = room
        .players
        .iter()
        .filter(|s| *s != session_id)
        .filter_map(|s| {
            world
                .display_name_of_session(s)
                .map(|n| (n.to_string(), s.clone()))
        })
        .collect();
    let partner_name = match resolve(partner_query, candidates.iter().map(|(n, _)| n.as_str())) {
        Ok(name) => name,
        Err(err) => return ServiceResult::err(err),
    };
    let Some((_, partner_session)) = candidates.iter().find(|(n, _)| *n == partner_name) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let partner_session = partner_session.clone();

    // Accepting an invitation they already sent us?
    if let Some(index) = trade_index(world, session_id) {
        let trade = &mut world.trades[index];
        if trade.phase == TradePhase::Initiated
            && trade.initiator == partner_session
            && trade.partner == session_id
        {
            trade.phase = TradePhase::Proposed;
            let mut result = ServiceResult::handled()
                .emit(OutboundMessage::system(format!(
                    "You're now trading with {}.",
                    bold(&partner_name)
                )));
            result.directs.push((
                partner_session,
                OutboundMessage::system(format!(
                    "{} accepts. Make your offers with /trade offer.",
                    bold(&actor_name(world, session_id))
                )),
            ));
            return result;
        }
        return ServiceResult::err(ServiceError::constraint(
            "You're already in a trade. /trade cancel first.".to_string(),
        ));
    }
    if trade_index(world, &partner_session).is_some() {
        return ServiceResult::err(ServiceError::constraint(format!(
            "{partner_name} is already busy trading."
        )));
    }

    world.trades.push(TradeState {
        initiator: session_id.to_string(),
        partner: partner_session.clone(),
        phase: TradePhase::Initiated,
        offer_initiator: Vec::new(),
        offer_partner: Vec::new(),
        accepted_initiator: false,
        accepted_partner: false,
    });

    let mut result = ServiceResult::handled().emit(OutboundMessage::system(format!(
        "You offer to trade with {}.",
        bold(&partner_name)
    )));
    result.directs.push((
        partner_session,
        OutboundMessage::system(format!(
            "{} wants to trade. Type /trade {} to begin.",
            bold(&actor_name(world, session_id)),
            actor_name(world, session_id)
        )),
    ));
    result
}

/// `/trade offer <object>`: put one of your held objects on the table.
/// Any change to either side resets both confirmations.
pub fn offer(world: &mut World, session_id: &str, object_query: &str) -> ServiceResult {
    let Some(index) = trade_index(world, session_id) else {
        return ServiceResult::err(ServiceError::constraint(
            "You're not trading with anyone.".to_string(),
        ));
    };
    if world.trades[index].phase != TradePhase::Proposed {
        return ServiceResult::err(ServiceError::constraint(
            "They haven't joined the trade yet.".to_string(),
        ));
    }

    let Some(sheet) = world.sheet_for_session(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let name = match resolve(
        object_query,
        sheet.inventory.iter().map(|(_, o)| o.name.as_str()),
    ) {
        Ok(name) => name,
        Err(err) => return ServiceResult::err(err),
    };
    let Some(uuid) = sheet
        .inventory
        .iter()
        .find(|(_, o)| o.name == name)
        .map(|(_, o)| o.uuid)
    else {
        return ServiceResult::err(ServiceError::Integrity);
    };

    let trade = &mut world.trades[index];
    let offer = trade.offer_of_mut(session_id);
    if offer.contains(&uuid) {
        return ServiceResult::err(ServiceError::constraint(format!(
            "The {name} is already on the table."
        )));
    }
    offer.push(uuid);
    trade.accepted_initiator = false;
    trade.accepted_partner = false;
    let counterpart = trade.counterpart(session_id).to_string();

    let mut result = ServiceResult::handled().emit(OutboundMessage::system(format!(
        "You put the {} on the table.",
        bold(&name)
    )));
    result.directs.push((
        counterpart,
        OutboundMessage::system(format!(
            "{} offers the {name}. Confirmations reset.",
            bold(&actor_name(world, session_id))
        )),
    ));
    result
}

/// `/trade accept`: confirm the exact current set; when both sides have,
/// the swap happens atomically
pub fn accept(world: &mut World, session_id: &str) -> ServiceResult {
    let Some(index) = trade_index(world, session_id) else {
        return ServiceResult::err(ServiceError::constraint(
            "You're not trading with anyone.".to_string(),
        ));
    };
    if world.trades[index].phase != TradePhase::Proposed {
        return ServiceResult::err(ServiceError::constraint(
            "They haven't joined the trade yet.".to_string(),
        ));
    }

    {
        let trade = &mut world.trades[index];
        *trade.accepted_of_mut(session_id) = true;
        if !(trade.accepted_initiator && trade.accepted_partner) {
            let counterpart = trade.counterpart(session_id).to_string();
            let mut result = ServiceResult::handled().emit(OutboundMessage::system(
                "You accept. Waiting on the other side.",
            ));
            result.directs.push((
                counterpart,
                OutboundMessage::system(format!(
                    "{} accepts the current offers.",
                    bold(&actor_name(world, session_id))
                )),
            ));
            return result;
        }
    }

    // Both confirmed: run the swap
    let trade = world.trades.remove(index);
    execute_swap(world, trade, session_id)
}

/// The atomic exchange. Both inventories are snapshotted first; any
/// object gone missing or any slot shortage rolls the whole thing back.
fn execute_swap(world: &mut World, trade: TradeState, caller: &str) -> ServiceResult {
    let (a, b) = (trade.initiator.clone(), trade.partner.clone());
    let other = trade.counterpart(caller).to_string();
    let Some(snapshot_a) = world.sheet_for_session(&a).map(|s| s.inventory.clone()) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let Some(snapshot_b) = world.sheet_for_session(&b).map(|s| s.inventory.clone()) else {
        return ServiceResult::err(ServiceError::Integrity);
    };

    let rollback = |world: &mut World| {
        if let Some(sheet) = world.sheet_for_session_mut(&a) {
            sheet.inventory = snapshot_a.clone();
        }
        if let Some(sheet) = world.sheet_for_session_mut(&b) {
            sheet.inventory = snapshot_b.clone();
        }
    };

    let fail = |world: &mut World, why: &str| {
        rollback(world);
        let mut result = ServiceResult::err(ServiceError::constraint(format!(
            "The trade falls through: {why}"
        )));
        result.directs.push((
            other.clone(),
            OutboundMessage::error(format!("The trade falls through: {why}")),
        ));
        result
    };

    // Pull every offered object out
    let mut goods_a = Vec::new();
    for uuid in &trade.offer_initiator {
        match world
            .sheet_for_session_mut(&a)
            .and_then(|s| s.inventory.remove(*uuid))
        {
            Some(object) => goods_a.push(object),
            None => return fail(world, "an offered item is gone."),
        }
    }
    let mut goods_b = Vec::new();
    for uuid in &trade.offer_partner {
        match world
            .sheet_for_session_mut(&b)
            .and_then(|s| s.inventory.remove(*uuid))
        {
            Some(object) => goods_b.push(object),
            None => return fail(world, "an offered item is gone."),
        }
    }

    // Cross-place; partial failure aborts everything
    for object in goods_a {
        let Some(sheet) = world.sheet_for_session_mut(&b) else {
            return fail(world, "someone left.");
        };
        if sheet.inventory.place(object).is_err() {
            return fail(world, "not enough room to hold it all.");
        }
    }
    for object in goods_b {
        let Some(sheet) = world.sheet_for_session_mut(&a) else {
            return fail(world, "someone left.");
        };
        if sheet.inventory.place(object).is_err() {
            return fail(world, "not enough room to hold it all.");
        }
    }

    let mut result = ServiceResult::handled()
        .emit(OutboundMessage::system("The trade is done."))
        .saving();
    result
        .directs
        .push((other, OutboundMessage::system("The trade is done.")));
    result
}

/// `/trade reject` and `/trade cancel`: either party walks away
pub fn cancel(world: &mut World, session_id: &str, verb: &str) -> ServiceResult {
    let Some(index) = trade_index(world, session_id) else {
        return ServiceResult::err(ServiceError::constraint(
            "You're not trading with anyone.".to_string(),
        ));
    };
    let trade = world.trades.remove(index);
    let counterpart = trade.counterpart(session_id).to_string();

    let mut result = ServiceResult::handled().emit(OutboundMessage::system(format!(
        "Trade {verb}ed."
    )));
    result.directs.push((
        counterpart,
        OutboundMessage::system(format!(
            "{} {verb}ed the trade.",
            bold(&actor_name(world, session_id))
        )),
    ));
    result
}

/// Tear down any trade a disconnecting session was part of, notifying
/// the counterpart
pub fn cancel_for_disconnect(world: &mut World, session_id: &str) -> Option<(String, OutboundMessage)> {
    let index = trade_index(world, session_id)?;
    let trade = world.trades.remove(index);
    let counterpart = trade.counterpart(session_id).to_string();
    Some((
        counterpart,
        OutboundMessage::system("The trade is off; the other party left."),
    ))
}

fn actor_name(world: &World, session_id: &str) -> String {
    world
        .display_name_of_session(session_id)
        .unwrap_or("Someone")
        .to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::world::object::{GameObject, TAG_SMALL};
    use crate::world::user::{Player, User};
    use crate::world::START_ROOM_ID;

    fn world_with_two_players() -> (World, String, String) {
        let mut world = World::new_default();
        let mut add = |name: &str, world: &mut World| {
            let user = User::new(name, "x".into(), "");
            let user_id = user.id;
            world.users.insert(user_id, user);
            let session = format!("sess-{name}");
            world.players.insert(
                session.clone(),
                Player {
                    session_id: session.clone(),
                    user_id,
                    room_id: START_ROOM_ID.into(),
                },
            );
            world
                .rooms
                .get_mut(START_ROOM_ID)
                .unwrap()
                .players
                .insert(session.clone());
            session
        };
        let alice = add("Alice", &mut world);
        let bob = add("Bob", &mut world);
        (world, alice, bob)
    }

    fn give(world: &mut World, session: &str, name: &str) -> Uuid {
        let mut object = GameObject::new(name, "");
        object.add_tag(TAG_SMALL);
        let uuid = object.uuid;
        world
            .sheet_for_session_mut(session)
            .unwrap()
            .inventory
            .place(object)
            .unwrap();
        uuid
    }

    fn set_up_trade(world: &mut World, alice: &str, bob: &str) {
        assert!(!initiate(world, alice, "Bob").is_err());
        assert!(!initiate(world, bob, "Alice").is_err());
    }

    #[test]
    fn test_full_trade_swaps_atomically() {
        let (mut world, alice, bob) = world_with_two_players();
        let apple = give(&mut world, &alice, "apple");
        let coin = give(&mut world, &bob, "coin");
        set_up_trade(&mut world, &alice, &bob);

        assert!(!offer(&mut world, &alice, "apple").is_err());
        assert!(!offer(&mut world, &bob, "coin").is_err());
        assert!(!accept(&mut world, &alice).is_err());
        let result = accept(&mut world, &bob);
        assert!(!result.is_err(), "{:?}", result.error);

        let alice_sheet = world.sheet_for_session(&alice).unwrap();
        let bob_sheet = world.sheet_for_session(&bob).unwrap();
        assert!(alice_sheet.inventory.contains(coin));
        assert!(!alice_sheet.inventory.contains(apple));
        assert!(bob_sheet.inventory.contains(apple));
        assert!(world.trades.is_empty());
    }

    #[test]
    fn test_offer_resets_confirmations() {
        let (mut world, alice, bob) = world_with_two_players();
        give(&mut world, &alice, "apple");
        give(&mut world, &alice, "pear");
        set_up_trade(&mut world, &alice, &bob);

        offer(&mut world, &alice, "apple");
        accept(&mut world, &alice);
        assert!(world.trades[0].accepted_initiator);

        // A new offer un-confirms both sides
        offer(&mut world, &alice, "pear");
        assert!(!world.trades[0].accepted_initiator);
        assert!(!world.trades[0].accepted_partner);
    }

    #[test]
    fn test_full_inventory_rolls_back_everything() {
        let (mut world, alice, bob) = world_with_two_players();
        let apple = give(&mut world, &alice, "apple");
        // Bob's inventory is completely full of rocks: six small ones
        // take the stow slots and hands, two boulders take the large slots
        for _ in 0..6 {
            give(&mut world, &bob, "rock");
        }
        for _ in 0..2 {
            let mut boulder = GameObject::new("rock", "");
            boulder.add_tag(crate::world::object::TAG_LARGE);
            world
                .sheet_for_session_mut(&bob)
                .unwrap()
                .inventory
                .place(boulder)
                .unwrap();
        }

        set_up_trade(&mut world, &alice, &bob);
        offer(&mut world, &alice, "apple");
        accept(&mut world, &alice);
        let result = accept(&mut world, &bob);
        assert!(matches!(result.error, Some(ServiceError::Constraint(_))));

        // Alice keeps her apple, Bob keeps his 8 rocks
        let alice_sheet = world.sheet_for_session(&alice).unwrap();
        assert!(alice_sheet.inventory.contains(apple));
        let bob_sheet = world.sheet_for_session(&bob).unwrap();
        assert_eq!(bob_sheet.inventory.count_named("rock"), 8);
    }

    #[test]
    fn test_disconnect_cancels() {
        let (mut world, alice, bob) = world_with_two_players();
        set_up_trade(&mut world, &alice, &bob);
        let notice = cancel_for_disconnect(&mut world, &alice);
        assert!(notice.is_some());
        assert_eq!(notice.unwrap().0, bob);
        assert!(world.trades.is_empty());
    }

    #[test]
    fn test_cannot_trade_with_someone_already_trading() {
        let (mut world, alice, bob) = world_with_two_players();
        set_up_trade(&mut world, &alice, &bob);

        // A third party tries to cut in on Bob
        let carol_user = User::new("Carol", "x".into(), "");
        let carol_id = carol_user.id;
        world.users.insert(carol_id, carol_user);
        world.players.insert(
            "sess-Carol".into(),
            Player {
                session_id: "sess-Carol".into(),
                user_id: carol_id,
                room_id: START_ROOM_ID.into(),
            },
        );
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .players
            .insert("sess-Carol".into());

        let result = initiate(&mut world, "sess-Carol", "Bob");
        assert!(matches!(result.error, Some(ServiceError::Constraint(_))));
    }
}
