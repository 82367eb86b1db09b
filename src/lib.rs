pub mod checkin;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod payload;
pub mod points;
pub mod routes;
