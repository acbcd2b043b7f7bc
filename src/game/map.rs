use crate::net::crypt::V2Cipher;

pub const ENEMY_FLAG_ITEM_DROPPED: u16 = 0x0001;
pub const ENEMY_FLAG_EXP_REQUESTED_BASE: u16 = 0x0010;

/// Rare-table index clients send for box entities.
pub const RT_INDEX_BOX: u8 = 0x30;

#[derive(Debug, Clone, Copy)]
pub struct MapObject {
    pub object_id: u16,
    pub floor: u8,
    pub base_type: u16,
    /// Specialization parameters for fixed-contents boxes.
    pub params: [u32; 4],
    pub ignore_def: bool,
    pub item_drop_checked: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct MapEnemy {
    pub enemy_id: u16,
    pub floor: u8,
    pub rt_index: u8,
    pub bp_index: u32,
    pub state_flags: u16,
    pub last_hit_by: u8,
    /// Nonzero marks a final-boss phase whose defeat is signalled through a
    /// quest flag rather than a kill event.
    pub boss_phase: u8,
}

impl MapEnemy {
    pub fn exp_requested_by(&self, client_id: u8) -> bool {
        self.state_flags & (ENEMY_FLAG_EXP_REQUESTED_BASE << client_id) != 0
    }

    pub fn set_exp_requested_by(&mut self, client_id: u8) {
        self.state_flags |= ENEMY_FLAG_EXP_REQUESTED_BASE << client_id;
    }

    pub fn item_dropped(&self) -> bool {
        self.state_flags & ENEMY_FLAG_ITEM_DROPPED != 0
    }

    pub fn set_item_dropped(&mut self) {
        self.state_flags |= ENEMY_FLAG_ITEM_DROPPED;
    }
}

/// Runtime entity state for one game. The map definitions come from the
/// external loaders; only the mutable per-game bookkeeping lives here.
#[derive(Debug, Clone, Default)]
pub struct MapState {
    pub objects: Vec<MapObject>,
    pub enemies: Vec<MapEnemy>,
}

impl MapState {
    pub fn object(&self, entity_id: u16) -> Option<&MapObject> {
        self.objects.iter().find(|o| o.object_id == entity_id)
    }

    pub fn object_mut(&mut self, entity_id: u16) -> Option<&mut MapObject> {
        self.objects.iter_mut().find(|o| o.object_id == entity_id)
    }

    pub fn enemy(&self, entity_id: u16) -> Option<&MapEnemy> {
        self.enemies.iter().find(|e| e.enemy_id == entity_id)
    }

    pub fn enemy_mut(&mut self, entity_id: u16) -> Option<&mut MapEnemy> {
        self.enemies.iter_mut().find(|e| e.enemy_id == entity_id)
    }

    pub fn enemy_by_index(&self, index: usize) -> Option<&MapEnemy> {
        self.enemies.get(index)
    }

    pub fn enemy_by_index_mut(&mut self, index: usize) -> Option<&mut MapEnemy> {
        self.enemies.get_mut(index)
    }

    pub fn find_boss(&self, floor: u8, phase: u8) -> Option<&MapEnemy> {
        self.enemies
            .iter()
            .find(|e| e.boss_phase == phase && e.floor == floor)
    }

    /// Synthetic layout used when no external map set is configured: a
    /// handful of enemies and boxes per floor plus the final-boss entities
    /// the quest-flag path needs.
    pub fn generate_default(episode: u8, prng: &mut V2Cipher) -> MapState {
        let mut state = MapState::default();
        let floor_count = 16u8;
        for floor in 0..floor_count {
            for slot in 0..12u16 {
                let enemy_id = (floor as u16) << 8 | slot;
                state.enemies.push(MapEnemy {
                    enemy_id,
                    floor,
                    rt_index: (prng.next(true) % 0x30) as u8,
                    bp_index: prng.next(true) % 0x60,
                    state_flags: 0,
                    last_hit_by: 0xFF,
                    boss_phase: 0,
                });
            }
            for slot in 0..8u16 {
                let object_id = 0x4000 | (floor as u16) << 8 | slot;
                state.objects.push(MapObject {
                    object_id,
                    floor,
                    base_type: (prng.next(true) % 8) as u16,
                    params: [prng.next(true) % 4, prng.next(true) % 16, 0, 0],
                    ignore_def: slot % 4 != 0,
                    item_drop_checked: false,
                });
            }
        }
        let boss_floor = if episode == 2 { 0x0D } else { 0x0E };
        for phase in [2u8, 3u8] {
            state.enemies.push(MapEnemy {
                enemy_id: 0x0B40 + phase as u16,
                floor: boss_floor,
                rt_index: 0x2D + phase,
                bp_index: 0x5A + phase as u32,
                state_flags: 0,
                last_hit_by: 0xFF,
                boss_phase: phase,
            });
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exp_request_flags_are_per_player() {
        let mut enemy = MapEnemy {
            enemy_id: 1,
            floor: 0,
            rt_index: 0,
            bp_index: 0,
            state_flags: 0,
            last_hit_by: 0xFF,
            boss_phase: 0,
        };
        enemy.set_exp_requested_by(2);
        assert!(enemy.exp_requested_by(2));
        assert!(!enemy.exp_requested_by(0));
        assert!(!enemy.item_dropped());
        enemy.set_item_dropped();
        assert!(enemy.item_dropped());
    }

    #[test]
    fn default_map_has_boss_entities() {
        let mut prng = V2Cipher::new(1);
        let ep1 = MapState::generate_default(1, &mut prng);
        assert!(ep1.find_boss(0x0E, 2).is_some());
        assert!(ep1.find_boss(0x0E, 3).is_some());
        let ep2 = MapState::generate_default(2, &mut prng);
        assert!(ep2.find_boss(0x0D, 2).is_some());
    }
}
