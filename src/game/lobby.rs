use crate::entities::item::{ItemData, UNASSIGNED_ITEM_ID};
use crate::game::map::MapState;
use crate::net::crypt::V2Cipher;
use crate::net::error::NetError;
use crate::version::Version;

pub const MAX_CLIENTS: usize = 12;

/// Item-id domains. Player k draws from a 0x30000-id block; floor items and
/// other server-generated ids come from a separate domain.
pub const PLAYER_ITEM_ID_BASE: u32 = 0x0021_0000;
pub const PLAYER_ITEM_ID_BLOCK: u32 = 0x0003_0000;
pub const SERVER_ITEM_ID_BASE: u32 = 0x0081_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Episode {
    Ep1,
    Ep2,
    Ep3,
    Ep4,
}

impl Episode {
    pub fn number(self) -> u8 {
        match self {
            Episode::Ep1 => 1,
            Episode::Ep2 => 2,
            Episode::Ep3 => 3,
            Episode::Ep4 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMode {
    Normal,
    Battle,
    Challenge,
    Solo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropMode {
    Disabled,
    Client,
    SharedServer,
    DuplicateServer,
    PrivateServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Joining,
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy)]
pub struct FloorItem {
    pub floor: u8,
    pub x: f32,
    pub z: f32,
    /// Per-slot visibility bitmask.
    pub visibility: u16,
    pub data: ItemData,
}

impl FloorItem {
    pub fn visible_to_slot(&self, slot: u8) -> bool {
        self.visibility & (1 << slot) != 0
    }
}

/// A multi-slot room. A "game" is a lobby with gameplay state; plain
/// chat lobbies keep `is_game == false` and most of the fields idle.
pub struct Lobby {
    pub lobby_id: u32,
    pub is_game: bool,
    pub persistent: bool,
    pub name: String,
    pub episode: Episode,
    pub mode: GameMode,
    pub difficulty: u8,
    pub section_id: u8,
    pub base_version: Version,
    pub drop_mode: DropMode,
    pub leader_id: u8,
    pub clients: [Option<u64>; MAX_CLIENTS],
    pub join_states: [JoinState; MAX_CLIENTS],
    pub floor_items: Vec<FloorItem>,
    pub next_item_id_per_client: [u32; MAX_CLIENTS],
    next_server_item_id: u32,
    pub map: MapState,
    pub random: V2Cipher,
    pub event: u8,
    pub quest_in_progress: bool,
    pub base_exp_multiplier: u32,
    pub challenge_exp_multiplier: f32,
    pub watcher_lobbies: Vec<u32>,
    pub watched_lobby: Option<u32>,
    pub is_spectator_team: bool,
    pub battle_in_progress: bool,
}

impl Lobby {
    pub fn new(lobby_id: u32, is_game: bool, base_version: Version, random_seed: u32) -> Lobby {
        let mut next_item_id_per_client = [0u32; MAX_CLIENTS];
        for (slot, next_id) in next_item_id_per_client.iter_mut().enumerate() {
            *next_id = PLAYER_ITEM_ID_BASE + slot as u32 * PLAYER_ITEM_ID_BLOCK;
        }
        Lobby {
            lobby_id,
            is_game,
            persistent: !is_game,
            name: String::new(),
            episode: Episode::Ep1,
            mode: GameMode::Normal,
            difficulty: 0,
            section_id: 0,
            base_version,
            drop_mode: DropMode::Client,
            leader_id: 0,
            clients: [None; MAX_CLIENTS],
            join_states: [JoinState::Ready; MAX_CLIENTS],
            floor_items: Vec::new(),
            next_item_id_per_client,
            next_server_item_id: SERVER_ITEM_ID_BASE,
            map: MapState::default(),
            random: V2Cipher::new(random_seed),
            event: 0,
            quest_in_progress: false,
            base_exp_multiplier: 1,
            challenge_exp_multiplier: 1.0,
            watcher_lobbies: Vec::new(),
            watched_lobby: None,
            is_spectator_team: false,
            battle_in_progress: false,
        }
    }

    pub fn is_ep3(&self) -> bool {
        self.episode == Episode::Ep3
    }

    pub fn count_clients(&self) -> usize {
        self.clients.iter().filter(|c| c.is_some()).count()
    }

    pub fn slot_of(&self, session_id: u64) -> Option<u8> {
        self.clients
            .iter()
            .position(|c| *c == Some(session_id))
            .map(|slot| slot as u8)
    }

    pub fn any_client_loading(&self) -> bool {
        self.clients.iter().zip(self.join_states.iter()).any(|(client, state)| {
            client.is_some() && matches!(state, JoinState::Joining | JoinState::Loading)
        })
    }

    /// Place a client in the lowest free slot. The first occupant of an
    /// empty room becomes the leader.
    pub fn add_client(&mut self, session_id: u64) -> Result<u8, NetError> {
        let slot = self
            .clients
            .iter()
            .position(|c| c.is_none())
            .ok_or_else(|| NetError::Resource("lobby is full".to_string()))?;
        let was_empty = self.count_clients() == 0;
        self.clients[slot] = Some(session_id);
        self.join_states[slot] = if self.is_game {
            JoinState::Joining
        } else {
            JoinState::Ready
        };
        if was_empty {
            self.leader_id = slot as u8;
        }
        Ok(slot as u8)
    }

    /// The leader is the lowest-numbered occupied slot unless explicitly
    /// reassigned.
    pub fn remove_client(&mut self, session_id: u64) -> Option<u8> {
        let slot = self.slot_of(session_id)?;
        self.clients[slot as usize] = None;
        self.join_states[slot as usize] = JoinState::Ready;
        if self.leader_id == slot {
            if let Some(next) = self.clients.iter().position(|c| c.is_some()) {
                self.leader_id = next as u8;
            }
        }
        Some(slot)
    }

    pub fn leader_session(&self) -> Option<u64> {
        self.clients.get(self.leader_id as usize).copied().flatten()
    }

    /// Fresh item id. Slots 0..12 draw from the owning player's domain;
    /// anything else draws from the server domain used for floor items.
    pub fn generate_item_id(&mut self, client_id: u8) -> u32 {
        if (client_id as usize) < MAX_CLIENTS {
            let next = self.next_item_id_per_client[client_id as usize];
            self.next_item_id_per_client[client_id as usize] += 1;
            next
        } else {
            let next = self.next_server_item_id;
            self.next_server_item_id += 1;
            next
        }
    }

    /// A client generated an id on its own (older versions do this for
    /// created items); keep the owning domain's counter ahead of it.
    pub fn on_item_id_generated_externally(&mut self, item_id: u32) {
        if item_id == UNASSIGNED_ITEM_ID {
            return;
        }
        for slot in 0..MAX_CLIENTS {
            let base = PLAYER_ITEM_ID_BASE + slot as u32 * PLAYER_ITEM_ID_BLOCK;
            if (base..base + PLAYER_ITEM_ID_BLOCK).contains(&item_id) {
                let counter = &mut self.next_item_id_per_client[slot];
                if item_id >= *counter {
                    *counter = item_id + 1;
                }
                return;
            }
        }
        if item_id >= self.next_server_item_id && item_id >= SERVER_ITEM_ID_BASE {
            self.next_server_item_id = item_id + 1;
        }
    }

    pub fn item_exists(&self, floor: u8, item_id: u32) -> bool {
        self.floor_items
            .iter()
            .any(|item| item.floor == floor && item.data.id == item_id)
    }

    pub fn add_floor_item(&mut self, item: FloorItem) {
        self.floor_items.push(item);
    }

    pub fn remove_floor_item(&mut self, floor: u8, item_id: u32) -> Option<FloorItem> {
        let index = self
            .floor_items
            .iter()
            .position(|item| item.floor == floor && item.data.id == item_id)?;
        Some(self.floor_items.remove(index))
    }

    /// No two live ids may collide, across inventories and the floor.
    pub fn assert_unique_item_ids<'a, I>(&self, inventory_ids: I) -> Result<(), NetError>
    where
        I: Iterator<Item = &'a u32>,
    {
        let mut seen = std::collections::HashSet::new();
        for item in &self.floor_items {
            if item.data.id != UNASSIGNED_ITEM_ID && !seen.insert(item.data.id) {
                return Err(NetError::Internal(format!(
                    "duplicate floor item id {:08X}",
                    item.data.id
                )));
            }
        }
        for id in inventory_ids {
            if *id != UNASSIGNED_ITEM_ID && !seen.insert(*id) {
                return Err(NetError::Internal(format!("duplicate item id {:08X}", id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_lobby() -> Lobby {
        let mut lobby = Lobby::new(1, true, Version::Final, 0x1234);
        lobby.drop_mode = DropMode::SharedServer;
        lobby
    }

    #[test]
    fn leader_is_lowest_occupied_slot() {
        let mut lobby = game_lobby();
        let a = lobby.add_client(100).expect("add");
        let b = lobby.add_client(101).expect("add");
        assert_eq!((a, b), (0, 1));
        assert_eq!(lobby.leader_id, 0);

        lobby.remove_client(100);
        assert_eq!(lobby.leader_id, 1);

        let c = lobby.add_client(102).expect("add");
        assert_eq!(c, 0);
        // Leadership does not move back on its own.
        assert_eq!(lobby.leader_id, 1);
    }

    #[test]
    fn lobby_capacity_is_twelve() {
        let mut lobby = game_lobby();
        for idx in 0..MAX_CLIENTS as u64 {
            lobby.add_client(idx).expect("add");
        }
        assert!(lobby.add_client(99).is_err());
    }

    #[test]
    fn item_id_domains_are_partitioned() {
        let mut lobby = game_lobby();
        assert_eq!(lobby.generate_item_id(0), 0x0021_0000);
        assert_eq!(lobby.generate_item_id(0), 0x0021_0001);
        assert_eq!(lobby.generate_item_id(3), 0x002A_0000);
        assert_eq!(lobby.generate_item_id(0xFF), 0x0081_0000);
        assert_eq!(lobby.generate_item_id(0xFF), 0x0081_0001);
    }

    #[test]
    fn external_id_generation_advances_the_owning_domain() {
        let mut lobby = game_lobby();
        lobby.on_item_id_generated_externally(0x0021_0005);
        assert_eq!(lobby.generate_item_id(0), 0x0021_0006);
        lobby.on_item_id_generated_externally(0x0081_0010);
        assert_eq!(lobby.generate_item_id(0xFF), 0x0081_0011);
        // Ids behind the counter change nothing.
        lobby.on_item_id_generated_externally(0x0021_0001);
        assert_eq!(lobby.generate_item_id(0), 0x0021_0007);
    }

    #[test]
    fn floor_items_are_keyed_by_floor_and_id() {
        let mut lobby = game_lobby();
        let mut item = ItemData::default();
        item.data1[0] = 0x03;
        item.id = lobby.generate_item_id(0xFF);
        lobby.add_floor_item(FloorItem {
            floor: 2,
            x: 10.0,
            z: -4.0,
            visibility: 0x00F,
            data: item,
        });
        assert!(lobby.item_exists(2, item.id));
        assert!(!lobby.item_exists(3, item.id));
        let removed = lobby.remove_floor_item(2, item.id).expect("remove");
        assert_eq!(removed.data.id, item.id);
        assert!(!lobby.item_exists(2, item.id));
    }

    #[test]
    fn visibility_mask_is_per_slot() {
        let item = FloorItem {
            floor: 0,
            x: 0.0,
            z: 0.0,
            visibility: 0b0101,
            data: ItemData::default(),
        };
        assert!(item.visible_to_slot(0));
        assert!(!item.visible_to_slot(1));
        assert!(item.visible_to_slot(2));
    }

    #[test]
    fn duplicate_ids_are_an_internal_error() {
        let mut lobby = game_lobby();
        let mut item = ItemData::default();
        item.data1[0] = 0x03;
        item.id = 0x0081_0000;
        lobby.add_floor_item(FloorItem {
            floor: 0,
            x: 0.0,
            z: 0.0,
            visibility: 0xF,
            data: item,
        });
        assert!(lobby.assert_unique_item_ids([].iter()).is_ok());
        assert!(lobby
            .assert_unique_item_ids([0x0081_0000u32].iter())
            .is_err());
    }
}
