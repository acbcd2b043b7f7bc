use std::collections::{HashMap, VecDeque};

use crate::config::ServerConfig;
use crate::entities::character::Character;
use crate::entities::item::ItemData;
use crate::game::data::GameData;
use crate::game::lobby::{DropMode, Episode, GameMode, JoinState, Lobby, MAX_CLIENTS};
use crate::game::map::MapState;
use crate::net::error::NetError;
use crate::telemetry::logging;
use crate::version::Version;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    pub command: u16,
    pub flag: u32,
    pub body: Vec<u8>,
}

/// License entry fronting the external license store.
#[derive(Debug, Clone, Default)]
pub struct License {
    pub serial_number: u32,
    pub access_key: String,
    pub username: String,
    pub password: String,
    pub banned: bool,
}

#[derive(Debug, Default)]
pub struct LicenseIndex {
    by_serial: HashMap<u32, License>,
    pub allow_unregistered: bool,
}

fn fnv1a32(text: &str) -> u32 {
    let mut hash: u32 = 0x811C_9DC5;
    for byte in text.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

impl LicenseIndex {
    pub fn add(&mut self, license: License) {
        self.by_serial.insert(license.serial_number, license);
    }

    pub fn get(&self, serial_number: u32) -> Option<&License> {
        self.by_serial.get(&serial_number)
    }

    pub fn verify_serial(&mut self, serial_number: u32, access_key: &str) -> Result<License, NetError> {
        match self.by_serial.get(&serial_number) {
            Some(license) if license.banned => {
                Err(NetError::Auth(format!("serial {:08X} is banned", serial_number)))
            }
            Some(license) if license.access_key == access_key => Ok(license.clone()),
            Some(_) => Err(NetError::Auth("access key mismatch".to_string())),
            None if self.allow_unregistered => {
                let license = License {
                    serial_number,
                    access_key: access_key.to_string(),
                    ..License::default()
                };
                self.add(license.clone());
                Ok(license)
            }
            None => Err(NetError::Auth(format!("serial {:08X} is not registered", serial_number))),
        }
    }

    pub fn verify_credentials(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<License, NetError> {
        let serial_number = fnv1a32(username) & 0x7FFF_FFFF;
        match self.by_serial.get(&serial_number) {
            Some(license) if license.banned => Err(NetError::Auth("account is banned".to_string())),
            Some(license) if license.password == password => Ok(license.clone()),
            Some(_) => Err(NetError::Auth("wrong password".to_string())),
            None if self.allow_unregistered => {
                let license = License {
                    serial_number,
                    username: username.to_string(),
                    password: password.to_string(),
                    ..License::default()
                };
                self.add(license.clone());
                Ok(license)
            }
            None => Err(NetError::Auth(format!("no account named {}", username))),
        }
    }
}

/// Per-session state shared with the handlers. The socket itself stays on
/// the session thread; outbound traffic is queued here and drained by that
/// thread.
pub struct ClientState {
    pub session_id: u64,
    pub version: Version,
    pub name: String,
    pub language: u8,
    pub serial_number: u32,
    pub sub_version: u8,
    pub lobby_id: Option<u32>,
    pub lobby_client_id: u8,
    pub floor: u8,
    pub x: f32,
    pub z: f32,
    pub character: Option<Character>,
    pub overlay: Option<Character>,
    pub outbound: VecDeque<QueuedCommand>,
    pub join_queue: Option<VecDeque<QueuedCommand>>,
    pub rare_notifications_enabled: bool,
    pub at_bank_counter: bool,
    pub can_chat: bool,
    pub timers_suspended: bool,
    pub disconnect_requested: bool,
    pub last_switch_enabled_command: Option<Vec<u8>>,
    /// Shop stock most recently offered to this player, by shop type.
    pub shop_contents: HashMap<u8, Vec<ItemData>>,
    pub team_points: u32,
}

impl ClientState {
    pub fn new(session_id: u64, version: Version) -> ClientState {
        ClientState {
            session_id,
            version,
            name: String::new(),
            language: 0,
            serial_number: 0,
            sub_version: 0,
            lobby_id: None,
            lobby_client_id: 0,
            floor: 0,
            x: 0.0,
            z: 0.0,
            character: None,
            overlay: None,
            outbound: VecDeque::new(),
            join_queue: None,
            rare_notifications_enabled: true,
            at_bank_counter: false,
            can_chat: true,
            timers_suspended: false,
            disconnect_requested: false,
            last_switch_enabled_command: None,
            shop_contents: HashMap::new(),
            team_points: 0,
        }
    }

    /// The active character: the battle/challenge overlay when one exists,
    /// the real character otherwise.
    pub fn character(&self) -> Option<&Character> {
        self.overlay.as_ref().or(self.character.as_ref())
    }

    pub fn character_mut(&mut self) -> Option<&mut Character> {
        self.overlay.as_mut().or(self.character.as_mut())
    }

    /// The persisted character, bypassing any overlay.
    pub fn base_character_mut(&mut self) -> Option<&mut Character> {
        self.character.as_mut()
    }
}

pub struct ServerState {
    pub config: ServerConfig,
    pub data: Arc<GameData>,
    pub licenses: LicenseIndex,
    pub clients: HashMap<u64, ClientState>,
    pub lobbies: HashMap<u32, Lobby>,
    next_session_id: u64,
    next_lobby_id: u32,
}

impl ServerState {
    pub fn new(config: ServerConfig, data: Arc<GameData>) -> ServerState {
        let mut state = ServerState {
            licenses: LicenseIndex {
                allow_unregistered: config.allow_unregistered_users,
                ..LicenseIndex::default()
            },
            config,
            data,
            clients: HashMap::new(),
            lobbies: HashMap::new(),
            next_session_id: 1,
            next_lobby_id: 1,
        };
        // Prefabricated persistent chat lobbies, one per configured count.
        for index in 0..state.config.lobby_count.max(1) {
            let id = state.allocate_lobby_id();
            let mut lobby = Lobby::new(id, false, Version::Final, 0x9A00 + index as u32);
            lobby.name = format!("Lobby {}", index + 1);
            lobby.persistent = true;
            state.lobbies.insert(id, lobby);
        }
        state
    }

    pub fn allocate_session_id(&mut self) -> u64 {
        let id = self.next_session_id;
        self.next_session_id += 1;
        id
    }

    fn allocate_lobby_id(&mut self) -> u32 {
        let id = self.next_lobby_id;
        self.next_lobby_id += 1;
        id
    }

    pub fn client(&self, session_id: u64) -> Result<&ClientState, NetError> {
        self.clients
            .get(&session_id)
            .ok_or_else(|| NetError::SessionState(format!("no session {}", session_id)))
    }

    pub fn client_mut(&mut self, session_id: u64) -> Result<&mut ClientState, NetError> {
        self.clients
            .get_mut(&session_id)
            .ok_or_else(|| NetError::SessionState(format!("no session {}", session_id)))
    }

    pub fn lobby_of(&self, session_id: u64) -> Result<&Lobby, NetError> {
        let lobby_id = self
            .client(session_id)?
            .lobby_id
            .ok_or_else(|| NetError::SessionState("client is not in a lobby".to_string()))?;
        self.lobbies
            .get(&lobby_id)
            .ok_or_else(|| NetError::Internal(format!("lobby {} is gone", lobby_id)))
    }

    pub fn lobby_of_mut(&mut self, session_id: u64) -> Result<&mut Lobby, NetError> {
        let lobby_id = self
            .client(session_id)?
            .lobby_id
            .ok_or_else(|| NetError::SessionState("client is not in a lobby".to_string()))?;
        self.lobbies
            .get_mut(&lobby_id)
            .ok_or_else(|| NetError::Internal(format!("lobby {} is gone", lobby_id)))
    }

    /// Queue one command for a session; its thread writes it out.
    pub fn send_to_session(&mut self, session_id: u64, command: u16, flag: u32, body: &[u8]) {
        if let Some(client) = self.clients.get_mut(&session_id) {
            if client.disconnect_requested {
                return;
            }
            client.outbound.push_back(QueuedCommand {
                command,
                flag,
                body: body.to_vec(),
            });
        }
    }

    pub fn first_free_lobby(&self) -> Option<u32> {
        self.lobbies
            .values()
            .filter(|lobby| !lobby.is_game && lobby.count_clients() < MAX_CLIENTS)
            .map(|lobby| lobby.lobby_id)
            .min()
    }

    pub fn join_lobby(&mut self, session_id: u64, lobby_id: u32) -> Result<u8, NetError> {
        self.leave_current_lobby(session_id);
        let version = self.client(session_id)?.version;
        let lobby = self
            .lobbies
            .get_mut(&lobby_id)
            .ok_or_else(|| NetError::SessionState(format!("no lobby {}", lobby_id)))?;
        if lobby.is_game && lobby.is_ep3() != version.is_ep3() {
            return Err(NetError::Protocol(
                "card-battle games only admit card-battle clients".to_string(),
            ));
        }
        let slot = lobby.add_client(session_id)?;
        let is_game = lobby.is_game;
        let client = self.client_mut(session_id)?;
        client.lobby_id = Some(lobby_id);
        client.lobby_client_id = slot;
        client.floor = 0;
        if is_game {
            client.join_queue = Some(VecDeque::new());
        }
        Ok(slot)
    }

    pub fn leave_current_lobby(&mut self, session_id: u64) {
        let Ok(client) = self.client_mut(session_id) else {
            return;
        };
        let Some(lobby_id) = client.lobby_id.take() else {
            return;
        };
        client.join_queue = None;
        client.overlay = None;
        let mut destroy = false;
        if let Some(lobby) = self.lobbies.get_mut(&lobby_id) {
            lobby.remove_client(session_id);
            destroy = lobby.count_clients() == 0 && !lobby.persistent;
        }
        if destroy {
            self.lobbies.remove(&lobby_id);
            logging::log_game(&format!("lobby {} destroyed", lobby_id));
        }
    }

    pub fn create_game(
        &mut self,
        creator: u64,
        name: &str,
        episode: Episode,
        mode: GameMode,
        difficulty: u8,
    ) -> Result<u32, NetError> {
        let client = self.client(creator)?;
        let version = client.version;
        if episode == Episode::Ep3 && !version.is_ep3() {
            return Err(NetError::Protocol(
                "only card-battle clients can open card-battle games".to_string(),
            ));
        }
        let section_id = client
            .character()
            .map(|character| character.disp.section_id)
            .unwrap_or(0);
        let id = self.allocate_lobby_id();
        let seed = 0xC0DE_0000 ^ id;
        let mut lobby = Lobby::new(id, true, version, seed);
        lobby.name = name.to_string();
        lobby.episode = episode;
        lobby.mode = mode;
        lobby.difficulty = difficulty.min(3);
        lobby.section_id = section_id;
        lobby.drop_mode = if version.is_v4() {
            self.config.default_drop_mode
        } else {
            DropMode::Client
        };
        lobby.base_exp_multiplier = self.config.exp_multiplier.max(1);
        lobby.map = MapState::generate_default(episode.number(), &mut lobby.random);
        self.lobbies.insert(id, lobby);
        self.join_lobby(creator, id)?;
        logging::log_game(&format!("game {} ({}) created", id, name));
        Ok(id)
    }

    /// Flip a loading client to Ready and flush its join queue in FIFO
    /// order.
    pub fn mark_client_ready(&mut self, session_id: u64) -> Result<(), NetError> {
        let lobby = self.lobby_of_mut(session_id)?;
        if let Some(slot) = lobby.slot_of(session_id) {
            lobby.join_states[slot as usize] = JoinState::Ready;
        }
        let client = self.client_mut(session_id)?;
        if let Some(queue) = client.join_queue.take() {
            for queued in queue {
                client.outbound.push_back(queued);
            }
        }
        Ok(())
    }

    pub fn remove_session(&mut self, session_id: u64) {
        self.leave_current_lobby(session_id);
        self.clients.remove(&session_id);
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::config::ServerConfig;

    pub fn test_state() -> ServerState {
        let mut config = ServerConfig::default();
        config.allow_unregistered_users = true;
        config.lobby_count = 2;
        ServerState::new(config, Arc::new(GameData::defaults()))
    }

    pub fn add_test_client(state: &mut ServerState, version: Version) -> u64 {
        let session_id = state.allocate_session_id();
        let mut client = ClientState::new(session_id, version);
        client.character = Some(Character::default());
        state.clients.insert(session_id, client);
        session_id
    }

    #[test]
    fn license_index_verifies_and_registers() {
        let mut index = LicenseIndex {
            allow_unregistered: true,
            ..LicenseIndex::default()
        };
        let license = index.verify_serial(0x1234, "key").expect("register");
        assert_eq!(license.serial_number, 0x1234);
        assert!(index.verify_serial(0x1234, "key").is_ok());
        assert!(index.verify_serial(0x1234, "other").is_err());

        index.allow_unregistered = false;
        assert!(index.verify_serial(0x9999, "key").is_err());
    }

    #[test]
    fn credentials_map_to_stable_serials() {
        let mut index = LicenseIndex {
            allow_unregistered: true,
            ..LicenseIndex::default()
        };
        let first = index.verify_credentials("user", "pw").expect("register");
        let second = index.verify_credentials("user", "pw").expect("verify");
        assert_eq!(first.serial_number, second.serial_number);
        assert!(index.verify_credentials("user", "nope").is_err());
    }

    #[test]
    fn join_and_leave_lobby() {
        let mut state = test_state();
        let session = add_test_client(&mut state, Version::Final);
        let lobby_id = state.first_free_lobby().expect("lobby");
        let slot = state.join_lobby(session, lobby_id).expect("join");
        assert_eq!(slot, 0);
        assert_eq!(state.client(session).expect("client").lobby_id, Some(lobby_id));

        state.leave_current_lobby(session);
        assert_eq!(state.client(session).expect("client").lobby_id, None);
        // Persistent lobbies survive emptying.
        assert!(state.lobbies.contains_key(&lobby_id));
    }

    #[test]
    fn games_are_destroyed_when_last_client_leaves() {
        let mut state = test_state();
        let session = add_test_client(&mut state, Version::Final);
        let game_id = state
            .create_game(session, "room", Episode::Ep1, GameMode::Normal, 1)
            .expect("create");
        assert!(state.lobbies.get(&game_id).expect("lobby").is_game);
        state.leave_current_lobby(session);
        assert!(!state.lobbies.contains_key(&game_id));
    }

    #[test]
    fn ep3_games_reject_other_versions() {
        let mut state = test_state();
        let host = add_test_client(&mut state, Version::Ep3);
        let game_id = state
            .create_game(host, "cards", Episode::Ep3, GameMode::Normal, 0)
            .expect("create");
        let outsider = add_test_client(&mut state, Version::Final);
        assert!(state.join_lobby(outsider, game_id).is_err());
    }

    #[test]
    fn join_queue_flushes_in_order_on_ready() {
        let mut state = test_state();
        let host = add_test_client(&mut state, Version::Final);
        let game_id = state
            .create_game(host, "room", Episode::Ep1, GameMode::Normal, 0)
            .expect("create");
        let joiner = add_test_client(&mut state, Version::Final);
        state.join_lobby(joiner, game_id).expect("join");

        for idx in 0..4u32 {
            let client = state.client_mut(joiner).expect("client");
            client
                .join_queue
                .as_mut()
                .expect("queue")
                .push_back(QueuedCommand {
                    command: 0x60,
                    flag: idx,
                    body: vec![idx as u8],
                });
        }
        state.mark_client_ready(joiner).expect("ready");
        let client = state.client(joiner).expect("client");
        assert!(client.join_queue.is_none());
        let flags: Vec<u32> = client.outbound.iter().map(|cmd| cmd.flag).collect();
        assert_eq!(flags, vec![0, 1, 2, 3]);
    }
}
