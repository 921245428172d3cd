pub mod context;
pub mod handle_cii;
pub mod handle_controller;
pub mod handle_ts;
pub mod handle_wcws;
pub mod server;
