#![forbid(unsafe_code)]

use std::{cell::RefCell, rc::Rc};

use rpc3::{NetRef, NetworkId, NetworkIdManager, NetworkObject, Parameter, Ptr, RefTags, Rpc};

pub mod udp;

pub const MAX_HEALTH: i32 = 100;

#[derive(Parameter, Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Parameter, Debug, Default)]
pub struct Player {
    #[parameter(skip)]
    pub id: NetworkId,
    pub name: String,
    pub health: i32,
    pub position: Vector3,
}

impl NetworkObject for Player {
    fn network_id(&self) -> NetworkId {
        self.id
    }
}

impl Player {
    pub fn take_damage(&mut self, amount: i32, attacker: NetRef<Player>) {
        self.health = (self.health - amount).max(0);
        // the attacker may be this player, which is already borrowed
        let attacker = attacker
            .get()
            .and_then(|p| p.try_borrow().ok().map(|p| p.name.clone()))
            .unwrap_or_else(|| "someone".to_string());
        tracing::info!(
            "{} took {amount} damage from {attacker}, health {}",
            self.name,
            self.health
        );
    }

    pub fn respawn(&mut self, round: u32) {
        self.health = MAX_HEALTH;
        tracing::info!("{} respawned for round {round}", self.name);
    }
}

/// Players hosted by one endpoint, addressable by network id.
pub struct World {
    pub manager: Rc<NetworkIdManager>,
    pub players: Vec<Rc<RefCell<Player>>>,
}

impl World {
    /// Creates one player per name with ids starting at 1.
    #[must_use]
    pub fn new(names: &[&str]) -> Self {
        let manager = Rc::new(NetworkIdManager::new());
        let players = (1..)
            .zip(names)
            .map(|(id, name)| {
                let player = Rc::new(RefCell::new(Player {
                    id: NetworkId(id),
                    name: (*name).to_string(),
                    health: MAX_HEALTH,
                    position: Vector3::default(),
                }));
                manager.register(&player);
                player
            })
            .collect();
        Self { manager, players }
    }
}

pub fn spawn_effect(name: String, position: Vector3, colors: Ptr<u32>, rpc: Rpc) {
    tracing::info!(
        "{} spawned {name:?} at {position:?} with colors {:?}",
        rpc.last_sender_address(),
        colors.as_slice()
    );
}

/// What a client sends in one session.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub target: NetworkId,
    pub attacker: NetworkId,
    pub damage: i32,
    pub round: u32,
}

/// Spawns an effect with a color array, hits `session.target` and announces
/// the round. Returns how many of the three messages went out.
pub fn play(rpc: &Rpc, session: &Session) -> usize {
    let colors = Ptr::from_vec(vec![0xFF_0000u32, 0x00_FF00, 0x00_00FF]);
    let tags = RefTags::new().array(&colors, 3);
    let position = Vector3 {
        x: 1.0,
        y: 0.0,
        z: -4.5,
    };
    // the instance counts as a parameter but is not sent
    let effect = ("spark".to_string(), position, colors, rpc.clone());
    let spawned = rpc.call_tagged("spawn_effect", tags, effect);

    let attacker = NetRef::<Player>::from_id(session.attacker);
    let hit = rpc.call_object(
        "Player::take_damage",
        session.target,
        (session.damage, attacker),
    );

    let announced = rpc.signal("round_start", (session.round,));
    [spawned, hit, announced].into_iter().filter(|&sent| sent).count()
}

/// Registers the demo functions and slots on `rpc` and serves `world`.
pub fn register_handlers(rpc: &Rpc, world: &World) {
    rpc.set_directory(Some(world.manager.clone()));
    rpc.register_function("spawn_effect", spawn_effect);
    rpc.register_method::<Player, _, _>("Player::take_damage", Player::take_damage);

    rpc.register_slot(
        "round_start",
        |round: u32| tracing::info!("round {round} starting"),
        10,
    );
    for player in &world.players {
        let id = player.borrow().id;
        rpc.register_slot_method::<Player, _, _>("round_start", id, Player::respawn, 0);
    }
}
