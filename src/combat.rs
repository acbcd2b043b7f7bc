pub mod conditions;
pub mod damage;
pub mod rules;
pub mod spells;
