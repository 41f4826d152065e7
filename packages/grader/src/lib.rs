pub mod config;
pub mod consumers;
pub mod database;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod recovery;
pub mod state;
pub mod store;

pub use dispatcher::Dispatcher;
pub use state::AppState;
