pub mod catalog;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod focus;
pub mod logging;
pub mod lyrics;
pub mod model;
pub mod player;
pub mod playlist;
pub mod subscriber;
