pub mod command_handler;
pub mod server_warp;
