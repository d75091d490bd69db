pub mod common;
pub mod player;
pub mod settings;
pub mod state;

pub use serde;
pub use serde_json;
pub use validator;
