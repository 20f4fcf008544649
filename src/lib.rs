pub mod dispute;
pub mod effects;
pub mod engine;
pub mod error;
pub mod record;
pub mod returns;
pub mod store;
pub mod transitions;
pub mod utils;
