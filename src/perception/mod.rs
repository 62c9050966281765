pub mod omniparser;
pub mod pipeline;
pub mod traits;
pub mod types;
