pub mod admin;
pub mod assets;
pub mod combat;
pub mod config;
pub mod entities;
pub mod game;
pub mod net;
pub mod persistence;
pub mod scripting;
pub mod telemetry;
pub mod version;
pub mod world;
