//! Domain types shared by the identity store query layer and its consumers.

pub mod api;
pub mod events;
pub mod models;
pub mod password;
pub mod permissions;
pub mod token;
