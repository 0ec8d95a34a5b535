pub mod adapters;
pub mod builder;
pub mod bus;
pub mod config;
pub mod db;
pub mod gateway;
pub mod model;
pub mod routes;
pub mod scheduler;
pub mod secrets;
pub mod verify;
