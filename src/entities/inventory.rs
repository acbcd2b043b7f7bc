use crate::entities::item::{EquipSlot, ItemData, UNASSIGNED_ITEM_ID};
use crate::net::error::NetError;
use crate::version::Version;

pub const INVENTORY_SLOTS: usize = 30;
pub const BANK_SLOTS: usize = 200;
pub const MAX_MESETA: u32 = 999_999;

pub const ITEM_FLAG_EQUIPPED: u32 = 0x0000_0008;

/// An occupied slot's equip position is kept in the high byte of its flags
/// word so the four unit slots stay distinguishable.
fn slot_flag_bits(slot: EquipSlot) -> u32 {
    (slot.to_wire() as u32) << 8
}

fn slot_from_flags(flags: u32) -> EquipSlot {
    EquipSlot::from_wire(((flags >> 8) & 0xFF) as u8)
}

#[derive(Debug, Clone, Copy)]
pub struct InventorySlot {
    pub flags: u32,
    pub data: ItemData,
}

impl InventorySlot {
    fn vacant() -> InventorySlot {
        let mut data = ItemData::default();
        data.data1[0] = 0xFF;
        InventorySlot { flags: 0, data }
    }

    pub fn is_occupied(&self) -> bool {
        self.data.data1[0] != 0xFF
    }

    pub fn is_equipped(&self) -> bool {
        self.flags & ITEM_FLAG_EQUIPPED != 0
    }

    pub fn equipped_slot(&self) -> Option<EquipSlot> {
        if self.is_equipped() {
            Some(slot_from_flags(self.flags))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct Inventory {
    pub items: [InventorySlot; INVENTORY_SLOTS],
    pub hp_from_materials: u16,
    pub tp_from_materials: u16,
    pub language: u8,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            items: [InventorySlot::vacant(); INVENTORY_SLOTS],
            hp_from_materials: 0,
            tp_from_materials: 0,
            language: 0,
        }
    }
}

impl Inventory {
    pub fn num_items(&self) -> usize {
        self.items.iter().filter(|slot| slot.is_occupied()).count()
    }

    pub fn find_item(&self, item_id: u32) -> Result<usize, NetError> {
        self.items
            .iter()
            .position(|slot| slot.is_occupied() && slot.data.id == item_id)
            .ok_or_else(|| {
                NetError::SessionState(format!("item {:08X} is not in the inventory", item_id))
            })
    }

    pub fn find_item_by_primary_identifier(&self, primary: u32) -> Result<usize, NetError> {
        self.items
            .iter()
            .position(|slot| slot.is_occupied() && slot.data.primary_identifier() == primary)
            .ok_or_else(|| {
                NetError::SessionState(format!("no item with identifier {:08X}", primary))
            })
    }

    /// Add an item, merging into an existing stack where the rules allow.
    /// Fails with `Resource` when the inventory is full or the stack would
    /// overflow; the caller restores whatever state it took the item from.
    pub fn add_item(&mut self, mut item: ItemData, version: Version) -> Result<usize, NetError> {
        if item.is_stackable(version) {
            item.enforce_min_stack_size(version);
            if let Ok(index) = self.find_item_by_primary_identifier(item.primary_identifier()) {
                let slot = &mut self.items[index];
                let combined = slot.data.stack_size(version) + item.stack_size(version);
                if combined > item.max_stack_size(version) {
                    return Err(NetError::Resource(format!(
                        "stack of {:08X} cannot hold {} items",
                        item.primary_identifier(),
                        combined
                    )));
                }
                slot.data.set_stack_size(version, combined);
                return Ok(index);
            }
        }
        let index = self
            .items
            .iter()
            .position(|slot| !slot.is_occupied())
            .ok_or_else(|| NetError::Resource("inventory is full".to_string()))?;
        self.items[index] = InventorySlot { flags: 0, data: item };
        Ok(index)
    }

    /// Remove `amount` of an item (0 = the whole slot). Splitting a stack
    /// returns a record with the unassigned id; the caller gives it a fresh
    /// one before it becomes visible anywhere.
    pub fn remove_item(
        &mut self,
        item_id: u32,
        amount: usize,
        version: Version,
    ) -> Result<ItemData, NetError> {
        let index = self.find_item(item_id)?;
        let slot_data = self.items[index].data;
        let stack = slot_data.stack_size(version);
        if amount > 0 && slot_data.is_stackable(version) && amount < stack {
            let mut removed = slot_data;
            removed.id = UNASSIGNED_ITEM_ID;
            removed.set_stack_size(version, amount);
            self.items[index]
                .data
                .set_stack_size(version, stack - amount);
            return Ok(removed);
        }
        if amount > stack {
            return Err(NetError::SessionState(format!(
                "cannot remove {} of a {}-item stack",
                amount, stack
            )));
        }
        self.items[index] = InventorySlot::vacant();
        self.compact();
        Ok(slot_data)
    }

    fn compact(&mut self) {
        let occupied: Vec<InventorySlot> = self
            .items
            .iter()
            .copied()
            .filter(|slot| slot.is_occupied())
            .collect();
        self.items = [InventorySlot::vacant(); INVENTORY_SLOTS];
        for (index, slot) in occupied.into_iter().enumerate() {
            self.items[index] = slot;
        }
    }

    pub fn find_equipped_item(&self, slot: EquipSlot) -> Option<usize> {
        self.items
            .iter()
            .position(|entry| entry.is_occupied() && entry.equipped_slot() == Some(slot))
    }

    fn first_free_unit_slot(&self) -> EquipSlot {
        for candidate in [
            EquipSlot::Unit1,
            EquipSlot::Unit2,
            EquipSlot::Unit3,
            EquipSlot::Unit4,
        ] {
            if self.find_equipped_item(candidate).is_none() {
                return candidate;
            }
        }
        EquipSlot::Unit1
    }

    /// Equip by item id. Older clients send `Unknown`, in which case the
    /// slot is derived from the item's type. An occupied target slot is
    /// vacated first.
    pub fn equip_item_id(
        &mut self,
        item_id: u32,
        requested_slot: EquipSlot,
    ) -> Result<(), NetError> {
        let index = self.find_item(item_id)?;
        let item = self.items[index].data;
        let mut slot = requested_slot;
        if slot == EquipSlot::Unknown {
            slot = match item.default_equip_slot() {
                EquipSlot::Unit1 => self.first_free_unit_slot(),
                other => other,
            };
        }
        if !item.can_be_equipped_in_slot(slot) {
            return Err(NetError::SessionState(format!(
                "item {:08X} cannot be equipped in slot {:?}",
                item_id, slot
            )));
        }
        if let Some(previous) = self.find_equipped_item(slot) {
            self.items[previous].flags &= !(ITEM_FLAG_EQUIPPED | 0xFF00);
        }
        self.items[index].flags =
            (self.items[index].flags & !0xFF00) | ITEM_FLAG_EQUIPPED | slot_flag_bits(slot);
        Ok(())
    }

    pub fn unequip_item_id(&mut self, item_id: u32) -> Result<(), NetError> {
        let index = self.find_item(item_id)?;
        let was_armor = self.items[index].equipped_slot() == Some(EquipSlot::Armor);
        self.items[index].flags &= !(ITEM_FLAG_EQUIPPED | 0xFF00);
        if was_armor {
            // Units ride on the armor; removing it removes them too.
            for entry in self.items.iter_mut() {
                if matches!(
                    entry.equipped_slot(),
                    Some(
                        EquipSlot::Unit1 | EquipSlot::Unit2 | EquipSlot::Unit3 | EquipSlot::Unit4
                    )
                ) {
                    entry.flags &= !(ITEM_FLAG_EQUIPPED | 0xFF00);
                }
            }
        }
        Ok(())
    }

    pub fn sort(&mut self) {
        let mut occupied: Vec<InventorySlot> = self
            .items
            .iter()
            .copied()
            .filter(|slot| slot.is_occupied())
            .collect();
        occupied.sort_by(|a, b| ItemData::compare_for_sort(&a.data, &b.data));
        self.items = [InventorySlot::vacant(); INVENTORY_SLOTS];
        for (index, slot) in occupied.into_iter().enumerate() {
            self.items[index] = slot;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankItem {
    pub data: ItemData,
    pub amount: u16,
}

#[derive(Debug, Clone, Default)]
pub struct Bank {
    pub meseta: u32,
    pub items: Vec<BankItem>,
}

impl Bank {
    pub fn add_meseta(&mut self, amount: u32) -> Result<(), NetError> {
        let combined = self.meseta.saturating_add(amount);
        if combined > MAX_MESETA {
            return Err(NetError::Resource("bank meseta limit reached".to_string()));
        }
        self.meseta = combined;
        Ok(())
    }

    pub fn remove_meseta(&mut self, amount: u32) -> Result<(), NetError> {
        if amount > self.meseta {
            return Err(NetError::Resource(
                "not enough meseta in the bank".to_string(),
            ));
        }
        self.meseta -= amount;
        Ok(())
    }

    pub fn add_item(&mut self, item: ItemData, version: Version) -> Result<(), NetError> {
        let amount = item.stack_size(version) as u16;
        if item.is_stackable(version) {
            if let Some(existing) = self
                .items
                .iter_mut()
                .find(|entry| entry.data.primary_identifier() == item.primary_identifier())
            {
                let combined = existing.amount as usize + amount as usize;
                if combined > item.max_stack_size(version) {
                    return Err(NetError::Resource("bank stack is full".to_string()));
                }
                existing.amount = combined as u16;
                existing.data.set_stack_size(version, combined);
                return Ok(());
            }
        }
        if self.items.len() >= BANK_SLOTS {
            return Err(NetError::Resource("bank is full".to_string()));
        }
        self.items.push(BankItem { data: item, amount });
        Ok(())
    }

    /// Withdraw `amount` (0 = everything in the slot). The returned record
    /// keeps the unassigned id; bank ids are not valid outside the bank.
    pub fn remove_item(
        &mut self,
        item_id: u32,
        amount: u16,
        version: Version,
    ) -> Result<ItemData, NetError> {
        let index = self
            .items
            .iter()
            .position(|entry| entry.data.id == item_id)
            .ok_or_else(|| {
                NetError::SessionState(format!("item {:08X} is not in the bank", item_id))
            })?;
        let entry = self.items[index];
        if amount > 0 && entry.data.is_stackable(version) && amount < entry.amount {
            let remaining = entry.amount - amount;
            self.items[index].amount = remaining;
            self.items[index]
                .data
                .set_stack_size(version, remaining as usize);
            let mut withdrawn = entry.data;
            withdrawn.id = UNASSIGNED_ITEM_ID;
            withdrawn.set_stack_size(version, amount as usize);
            return Ok(withdrawn);
        }
        let mut withdrawn = self.items.remove(index).data;
        withdrawn.id = UNASSIGNED_ITEM_ID;
        Ok(withdrawn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(kind: u8, amount: u8, id: u32) -> ItemData {
        let mut item = ItemData::default();
        item.data1[0] = 0x03;
        item.data1[1] = kind;
        item.data1[5] = amount;
        item.id = id;
        item
    }

    fn weapon(id: u32) -> ItemData {
        let mut item = ItemData::default();
        item.data1[1] = 0x01;
        item.id = id;
        item
    }

    #[test]
    fn num_items_counts_occupied_slots() {
        let mut inv = Inventory::default();
        assert_eq!(inv.num_items(), 0);
        inv.add_item(weapon(0x10), Version::Final).expect("add");
        inv.add_item(tool(0, 5, 0x11), Version::Final).expect("add");
        assert_eq!(inv.num_items(), 2);
    }

    #[test]
    fn stacks_merge_on_add() {
        let mut inv = Inventory::default();
        inv.add_item(tool(0, 4, 0x10), Version::Final).expect("add");
        let index = inv.add_item(tool(0, 3, 0x11), Version::Final).expect("add");
        assert_eq!(inv.num_items(), 1);
        assert_eq!(inv.items[index].data.stack_size(Version::Final), 7);
        assert!(inv
            .add_item(tool(0, 9, 0x12), Version::Final)
            .is_err());
    }

    #[test]
    fn full_inventory_rejects_additions() {
        let mut inv = Inventory::default();
        for idx in 0..INVENTORY_SLOTS as u32 {
            inv.add_item(weapon(0x100 + idx), Version::Final).expect("add");
        }
        let err = inv.add_item(weapon(0x900), Version::Final).unwrap_err();
        assert!(matches!(err, NetError::Resource(_)));
    }

    #[test]
    fn stack_split_returns_unassigned_id() {
        let mut inv = Inventory::default();
        inv.add_item(tool(0, 5, 0x0021_0007), Version::Final).expect("add");
        let removed = inv
            .remove_item(0x0021_0007, 2, Version::Final)
            .expect("remove");
        assert_eq!(removed.id, UNASSIGNED_ITEM_ID);
        assert_eq!(removed.stack_size(Version::Final), 2);
        let index = inv.find_item(0x0021_0007).expect("find");
        assert_eq!(inv.items[index].data.stack_size(Version::Final), 3);
    }

    #[test]
    fn whole_stack_removal_keeps_id() {
        let mut inv = Inventory::default();
        inv.add_item(tool(0, 5, 0x21), Version::Final).expect("add");
        let removed = inv.remove_item(0x21, 0, Version::Final).expect("remove");
        assert_eq!(removed.id, 0x21);
        assert_eq!(inv.num_items(), 0);
    }

    #[test]
    fn equip_vacates_previous_occupant() {
        let mut inv = Inventory::default();
        inv.add_item(weapon(0x31), Version::Final).expect("add");
        inv.add_item(weapon(0x32), Version::Final).expect("add");
        inv.equip_item_id(0x31, EquipSlot::Weapon).expect("equip");
        inv.equip_item_id(0x32, EquipSlot::Unknown).expect("equip");
        let first = inv.find_item(0x31).expect("find");
        let second = inv.find_item(0x32).expect("find");
        assert!(!inv.items[first].is_equipped());
        assert!(inv.items[second].is_equipped());
        assert_eq!(inv.find_equipped_item(EquipSlot::Weapon), Some(second));
    }

    #[test]
    fn units_fill_free_slots_and_leave_with_armor() {
        let mut inv = Inventory::default();
        let mut armor = ItemData::default();
        armor.data1[0] = 0x01;
        armor.data1[1] = 0x01;
        armor.id = 0x40;
        inv.add_item(armor, Version::Final).expect("add");
        inv.equip_item_id(0x40, EquipSlot::Unknown).expect("equip");

        for (offset, expected) in [(0u32, EquipSlot::Unit1), (1, EquipSlot::Unit2)] {
            let mut unit = ItemData::default();
            unit.data1[0] = 0x01;
            unit.data1[1] = 0x03;
            unit.id = 0x50 + offset;
            inv.add_item(unit, Version::Final).expect("add");
            inv.equip_item_id(0x50 + offset, EquipSlot::Unknown).expect("equip");
            let index = inv.find_item(0x50 + offset).expect("find");
            assert_eq!(inv.items[index].equipped_slot(), Some(expected));
        }

        inv.unequip_item_id(0x40).expect("unequip");
        for id in [0x50u32, 0x51] {
            let index = inv.find_item(id).expect("find");
            assert!(!inv.items[index].is_equipped());
        }
    }

    #[test]
    fn sort_orders_by_type() {
        let mut inv = Inventory::default();
        inv.add_item(tool(0, 1, 0x61), Version::Final).expect("add");
        inv.add_item(weapon(0x62), Version::Final).expect("add");
        inv.sort();
        assert!(inv.items[0].data.is_weapon());
        assert!(inv.items[1].data.is_tool());
    }

    #[test]
    fn bank_meseta_limits() {
        let mut bank = Bank::default();
        bank.add_meseta(500_000).expect("deposit");
        assert!(bank.add_meseta(600_000).is_err());
        bank.remove_meseta(400_000).expect("withdraw");
        assert!(bank.remove_meseta(200_000).is_err());
        assert_eq!(bank.meseta, 100_000);
    }

    #[test]
    fn bank_withdraw_regenerates_ids() {
        let mut bank = Bank::default();
        bank.add_item(tool(0, 6, 0x77), Version::Final).expect("deposit");
        let partial = bank.remove_item(0x77, 2, Version::Final).expect("withdraw");
        assert_eq!(partial.id, UNASSIGNED_ITEM_ID);
        assert_eq!(partial.stack_size(Version::Final), 2);
        let rest = bank.remove_item(0x77, 0, Version::Final).expect("withdraw");
        assert_eq!(rest.id, UNASSIGNED_ITEM_ID);
        assert_eq!(rest.stack_size(Version::Final), 4);
        assert!(bank.items.is_empty());
    }

    #[test]
    fn bank_capacity() {
        let mut bank = Bank::default();
        for idx in 0..BANK_SLOTS as u32 {
            bank.add_item(weapon(0x1000 + idx), Version::Final).expect("deposit");
        }
        assert!(bank.add_item(weapon(0x9000), Version::Final).is_err());
    }
}
