use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::entities::character::CharStats;
use crate::entities::item::ItemData;
use crate::net::crypt::V2Cipher;
use crate::version::Version;

/// Interfaces to the static game-data tables. The loaders behind them are
/// external collaborators; the crate ships data-driven defaults that read
/// overrides from `<root>/tables.json` and fall back to formula-generated
/// values good enough for standalone play and tests.

#[derive(Debug, Clone, Copy, Default)]
pub struct LevelStats {
    pub experience: u32,
    pub atp: u16,
    pub mst: u16,
    pub evp: u16,
    pub hp: u16,
    pub dfp: u16,
    pub ata: u16,
    pub lck: u16,
}

impl LevelStats {
    pub fn apply(&self, stats: &mut CharStats) {
        stats.atp = stats.atp.saturating_add(self.atp);
        stats.mst = stats.mst.saturating_add(self.mst);
        stats.evp = stats.evp.saturating_add(self.evp);
        stats.hp = stats.hp.saturating_add(self.hp);
        stats.dfp = stats.dfp.saturating_add(self.dfp);
        stats.ata = stats.ata.saturating_add(self.ata);
        stats.lck = stats.lck.saturating_add(self.lck);
    }
}

pub trait LevelTable: Send + Sync {
    /// Cumulative experience required to reach `level`, plus the stat
    /// increments applied on reaching it.
    fn stats_delta_for_level(&self, char_class: u8, level: u32) -> LevelStats;
}

pub trait ItemParameterTable: Send + Sync {
    fn price_for_item(&self, item: &ItemData) -> u32;
    fn is_item_rare(&self, item: &ItemData) -> bool;
    fn is_unsealable_item(&self, item: &ItemData) -> bool;
    fn item_team_points(&self, item: &ItemData) -> u32;
    fn weapon_special(&self, weapon_type: u8, weapon_subtype: u8) -> u8;
    /// (special class, percentage amount) for a weapon special id.
    fn special_definition(&self, special_id: u8) -> (u8, u16);
}

pub trait BattleParamTable: Send + Sync {
    fn enemy_experience(&self, solo: bool, episode: u8, difficulty: u8, bp_index: u32) -> u32;
}

pub trait WordSelectTable: Send + Sync {
    /// Translate one phrase token between version namespaces. `None` means
    /// the token does not exist on the target version.
    fn translate(&self, token: u16, from: Version, to: Version) -> Option<u16>;
}

#[derive(Debug, Clone, Copy)]
pub struct DropResult {
    pub item: ItemData,
    pub is_from_rare_table: bool,
}

pub trait ItemCreator: Send + Sync {
    fn on_enemy_item_drop(
        &self,
        prng: &mut V2Cipher,
        rare_table_index: u8,
        effective_area: u8,
    ) -> Option<DropResult>;
    fn on_box_item_drop(&self, prng: &mut V2Cipher, effective_area: u8) -> Option<DropResult>;
    fn on_specialized_box_item_drop(
        &self,
        prng: &mut V2Cipher,
        effective_area: u8,
        params: [u32; 4],
    ) -> Option<DropResult>;
    /// Level-scaled shop stock. `shop_type`: 0 tools, 1 weapons, 2 armor.
    fn shop_inventory(
        &self,
        prng: &mut V2Cipher,
        shop_type: u8,
        player_level: u32,
        count: usize,
    ) -> Vec<ItemData>;
}

#[derive(Debug, Clone, Deserialize, Default)]
struct TableOverrides {
    #[serde(default)]
    exp_per_level: Option<u32>,
    #[serde(default)]
    rare_star_threshold: Option<u8>,
    #[serde(default)]
    prices: BTreeMap<String, u32>,
    #[serde(default)]
    secret_lottery_results: Vec<String>,
    #[serde(default)]
    quest_prize_results: Vec<String>,
}

fn parse_item_hex(text: &str) -> Option<ItemData> {
    let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() < 12 {
        return None;
    }
    let mut bytes = Vec::with_capacity(cleaned.len() / 2);
    let mut chars = cleaned.chars();
    while let (Some(high), Some(low)) = (chars.next(), chars.next()) {
        let value = (high.to_digit(16)? * 16 + low.to_digit(16)?) as u8;
        bytes.push(value);
    }
    bytes.resize(20, 0);
    let mut item = ItemData::from_wire(&bytes)?;
    item.id = crate::entities::item::UNASSIGNED_ITEM_ID;
    Some(item)
}

pub struct FlatLevelTable {
    exp_per_level: u32,
}

impl LevelTable for FlatLevelTable {
    fn stats_delta_for_level(&self, char_class: u8, level: u32) -> LevelStats {
        LevelStats {
            experience: self
                .exp_per_level
                .saturating_mul(level)
                .saturating_mul(level.max(1)),
            atp: 2 + (char_class & 3) as u16,
            mst: 2,
            evp: 1,
            hp: 3,
            dfp: 1,
            ata: 1,
            lck: 0,
        }
    }
}

pub struct SimpleItemParameterTable {
    rare_star_threshold: u8,
    prices: BTreeMap<u32, u32>,
}

impl ItemParameterTable for SimpleItemParameterTable {
    fn price_for_item(&self, item: &ItemData) -> u32 {
        if let Some(&price) = self.prices.get(&item.primary_identifier()) {
            return price;
        }
        match item.data1[0] {
            0x00 => 100 + item.data1[1] as u32 * 150 + item.data1[3] as u32 * 25,
            0x01 => 80 + item.data1[2] as u32 * 120,
            0x02 => 500,
            0x03 => 10 + item.data1[1] as u32 * 30,
            _ => 0,
        }
    }

    fn is_item_rare(&self, item: &ItemData) -> bool {
        // The subtype byte doubles as a star count in the default tables.
        match item.data1[0] {
            0x00 => item.data1[2] >= self.rare_star_threshold,
            0x01 => item.data1[2] >= self.rare_star_threshold,
            0x02 => item.data1[1] >= 0x28,
            0x03 => item.data1[1] >= 0x10 && !item.is_tech_disk(),
            _ => false,
        }
    }

    fn is_unsealable_item(&self, item: &ItemData) -> bool {
        item.is_weapon() && item.data1[1] == 0x33
    }

    fn item_team_points(&self, item: &ItemData) -> u32 {
        self.price_for_item(item) / 10
    }

    fn weapon_special(&self, _weapon_type: u8, weapon_subtype: u8) -> u8 {
        weapon_subtype & 0x3F
    }

    fn special_definition(&self, special_id: u8) -> (u8, u16) {
        // Specials 0x09..=0x0B are the EXP-steal class in the default table.
        if (0x09..=0x0B).contains(&special_id) {
            (3, 8 + 7 * (special_id as u16 - 9))
        } else {
            (special_id >> 4, 5)
        }
    }
}

pub struct FlatBattleParamTable;

impl BattleParamTable for FlatBattleParamTable {
    fn enemy_experience(&self, solo: bool, episode: u8, difficulty: u8, bp_index: u32) -> u32 {
        let base = 5 + bp_index % 0x60;
        let scaled = base * (difficulty as u32 + 1) * (episode as u32 % 4 + 1);
        if solo {
            scaled * 3 / 4
        } else {
            scaled
        }
    }
}

/// Token translation between the three word-select namespaces. The
/// pre-release builds only know the first 0x200 tokens and shuffle a band
/// of them by a fixed offset; everything else is identity within the
/// target's token limit.
pub struct OffsetWordSelectTable;

impl OffsetWordSelectTable {
    fn token_limit(version: Version) -> u16 {
        if version.is_pre_v1() {
            0x200
        } else if version.is_v1_or_v2() {
            0x400
        } else {
            0x800
        }
    }

    fn to_canonical(token: u16, from: Version) -> u16 {
        if from.is_pre_v1() && (0x100..0x200).contains(&token) {
            token + 0x40
        } else {
            token
        }
    }

    fn from_canonical(token: u16, to: Version) -> Option<u16> {
        let translated = if to.is_pre_v1() && (0x140..0x240).contains(&token) {
            token - 0x40
        } else {
            token
        };
        if translated < Self::token_limit(to) {
            Some(translated)
        } else {
            None
        }
    }
}

impl WordSelectTable for OffsetWordSelectTable {
    fn translate(&self, token: u16, from: Version, to: Version) -> Option<u16> {
        if from == to {
            return Some(token);
        }
        Self::from_canonical(Self::to_canonical(token, from), to)
    }
}

pub struct FormulaItemCreator;

impl FormulaItemCreator {
    fn roll_tool(prng: &mut V2Cipher, area: u8) -> ItemData {
        let mut item = ItemData::default();
        item.data1[0] = 0x03;
        item.data1[1] = (prng.next(true) % 3) as u8;
        item.data1[2] = (area / 4).min(2);
        item.data1[5] = 1;
        item
    }

    fn roll_weapon(prng: &mut V2Cipher, area: u8) -> ItemData {
        let mut item = ItemData::default();
        item.data1[1] = 1 + (prng.next(true) % 9) as u8;
        item.data1[2] = (area / 3).min(0x0C);
        item
    }

    fn roll_armor(prng: &mut V2Cipher, area: u8) -> ItemData {
        let mut item = ItemData::default();
        item.data1[0] = 0x01;
        item.data1[1] = 1 + (prng.next(true) % 3) as u8;
        item.data1[2] = (area / 3).min(0x0C);
        item
    }

    fn roll_meseta(prng: &mut V2Cipher, area: u8) -> ItemData {
        ItemData::meseta(10 + prng.next(true) % (30 + area as u32 * 10))
    }
}

impl ItemCreator for FormulaItemCreator {
    fn on_enemy_item_drop(
        &self,
        prng: &mut V2Cipher,
        rare_table_index: u8,
        effective_area: u8,
    ) -> Option<DropResult> {
        let is_rare = prng.next(true) % 0x200 < (rare_table_index as u32 % 4) + 1;
        match prng.next(true) % 8 {
            0 | 1 => Some(DropResult {
                item: Self::roll_meseta(prng, effective_area),
                is_from_rare_table: false,
            }),
            2 | 3 => Some(DropResult {
                item: Self::roll_tool(prng, effective_area),
                is_from_rare_table: false,
            }),
            4 => Some(DropResult {
                item: Self::roll_weapon(prng, effective_area),
                is_from_rare_table: is_rare,
            }),
            5 => Some(DropResult {
                item: Self::roll_armor(prng, effective_area),
                is_from_rare_table: false,
            }),
            _ => None,
        }
    }

    fn on_box_item_drop(&self, prng: &mut V2Cipher, effective_area: u8) -> Option<DropResult> {
        match prng.next(true) % 4 {
            0 => Some(DropResult {
                item: Self::roll_meseta(prng, effective_area),
                is_from_rare_table: false,
            }),
            1 => Some(DropResult {
                item: Self::roll_tool(prng, effective_area),
                is_from_rare_table: false,
            }),
            2 => Some(DropResult {
                item: Self::roll_weapon(prng, effective_area),
                is_from_rare_table: false,
            }),
            _ => None,
        }
    }

    fn on_specialized_box_item_drop(
        &self,
        prng: &mut V2Cipher,
        effective_area: u8,
        params: [u32; 4],
    ) -> Option<DropResult> {
        // params[0] selects the fixed box contents class; the rest refine it.
        let mut item = match params[0] & 3 {
            0 => Self::roll_weapon(prng, effective_area),
            1 => Self::roll_armor(prng, effective_area),
            2 => Self::roll_tool(prng, effective_area),
            _ => Self::roll_meseta(prng, effective_area),
        };
        if !item.is_meseta() {
            item.data1[2] = item.data1[2].max((params[1] & 0x0F) as u8);
        }
        Some(DropResult {
            item,
            is_from_rare_table: false,
        })
    }

    fn shop_inventory(
        &self,
        prng: &mut V2Cipher,
        shop_type: u8,
        player_level: u32,
        count: usize,
    ) -> Vec<ItemData> {
        let area = (player_level / 10).min(0x10) as u8;
        (0..count)
            .map(|_| match shop_type {
                1 => Self::roll_weapon(prng, area),
                2 => Self::roll_armor(prng, area),
                _ => Self::roll_tool(prng, area),
            })
            .collect()
    }
}

/// Everything immutable the sessions share: table implementations plus the
/// quest data pools.
pub struct GameData {
    pub level_table: Arc<dyn LevelTable>,
    pub item_parameter_table: Arc<dyn ItemParameterTable>,
    pub battle_params: Arc<dyn BattleParamTable>,
    pub word_select_table: Arc<dyn WordSelectTable>,
    pub item_creator: Arc<dyn ItemCreator>,
    pub secret_lottery_results: Vec<ItemData>,
    pub quest_prize_results: Vec<ItemData>,
    /// Quest flags the server allows clients to modify.
    pub quest_flag_persist_mask: Vec<bool>,
}

impl GameData {
    pub fn load(root: &Path) -> GameData {
        let overrides: TableOverrides = std::fs::read_to_string(root.join("tables.json"))
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        GameData::from_overrides(overrides)
    }

    fn from_overrides(overrides: TableOverrides) -> GameData {
        let mut prices = BTreeMap::new();
        for (key, value) in &overrides.prices {
            if let Ok(primary) = u32::from_str_radix(key.trim_start_matches("0x"), 16) {
                prices.insert(primary, *value);
            }
        }
        let secret_lottery_results = overrides
            .secret_lottery_results
            .iter()
            .filter_map(|text| parse_item_hex(text))
            .collect::<Vec<_>>();
        let quest_prize_results = overrides
            .quest_prize_results
            .iter()
            .filter_map(|text| parse_item_hex(text))
            .collect::<Vec<_>>();
        GameData {
            level_table: Arc::new(FlatLevelTable {
                exp_per_level: overrides.exp_per_level.unwrap_or(35),
            }),
            item_parameter_table: Arc::new(SimpleItemParameterTable {
                rare_star_threshold: overrides.rare_star_threshold.unwrap_or(0x0B),
                prices,
            }),
            battle_params: Arc::new(FlatBattleParamTable),
            word_select_table: Arc::new(OffsetWordSelectTable),
            item_creator: Arc::new(FormulaItemCreator),
            secret_lottery_results,
            quest_prize_results,
            quest_flag_persist_mask: vec![true; crate::entities::character::QUEST_FLAGS_PER_DIFFICULTY],
        }
    }

    pub fn defaults() -> GameData {
        GameData::from_overrides(TableOverrides::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_select_round_trip_where_defined() {
        let table = OffsetWordSelectTable;
        for token in 0..0x200u16 {
            let translated = table
                .translate(token, Version::PreA, Version::Final)
                .expect("pre-release tokens all exist on final");
            assert_eq!(
                table.translate(translated, Version::Final, Version::PreA),
                Some(token),
                "token {:#x}",
                token
            );
        }
    }

    #[test]
    fn word_select_rejects_tokens_missing_on_old_versions() {
        let table = OffsetWordSelectTable;
        assert_eq!(table.translate(0x7FF, Version::Final, Version::PreA), None);
        assert_eq!(table.translate(0x500, Version::Final, Version::V2), None);
        assert_eq!(
            table.translate(0x7FF, Version::Final, Version::ConsoleA),
            Some(0x7FF)
        );
    }

    #[test]
    fn level_table_experience_is_monotonic() {
        let table = FlatLevelTable { exp_per_level: 35 };
        let mut previous = 0;
        for level in 1..=199 {
            let stats = table.stats_delta_for_level(0, level);
            assert!(stats.experience >= previous);
            previous = stats.experience;
        }
    }

    #[test]
    fn item_hex_parsing() {
        let item = parse_item_hex("03 10 00 00 00 01").expect("parse");
        assert_eq!(item.primary_identifier(), 0x0310_0000);
        assert!(parse_item_hex("zz").is_none());
    }

    #[test]
    fn price_overrides_take_precedence() {
        let mut overrides = TableOverrides::default();
        overrides.prices.insert("0x03100000".to_string(), 12345);
        let data = GameData::from_overrides(overrides);
        let item = parse_item_hex("031000").expect("parse");
        assert_eq!(data.item_parameter_table.price_for_item(&item), 12345);
    }

    #[test]
    fn creator_produces_assignable_items() {
        let creator = FormulaItemCreator;
        let mut prng = V2Cipher::new(0x5EED);
        let mut produced = 0;
        for _ in 0..64 {
            if let Some(result) = creator.on_enemy_item_drop(&mut prng, 1, 3) {
                produced += 1;
                assert_eq!(result.item.id, crate::entities::item::UNASSIGNED_ITEM_ID);
            }
        }
        assert!(produced > 0);
        let stock = creator.shop_inventory(&mut prng, 1, 50, 8);
        assert_eq!(stock.len(), 8);
        assert!(stock.iter().all(|item| item.is_weapon()));
    }
}
