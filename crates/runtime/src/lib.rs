pub mod budget;
pub mod consumer;
pub mod contribution;
pub mod engine;
pub mod grants;
pub mod metrics;
pub mod persistence;
pub mod state;
pub mod ticker;
pub mod work_queue;

pub use budget::*;
pub use contribution::*;
pub use engine::*;
pub use state::*;
