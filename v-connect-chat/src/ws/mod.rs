pub mod client;
pub mod hub;
pub mod server;

pub use client::{ChatPusher, Client, ClientHandle};
pub use hub::Hub;
pub use server::{parse_connect_params, ConnectParams, WsServer};
