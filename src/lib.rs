pub mod chunk_plan;
pub mod cli;
pub mod codec;
pub mod config;
pub mod decision;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod policy;
pub mod pool;
pub mod probe;
pub mod progress;
pub mod report;
pub mod sampler;
pub mod source;
pub mod task;
pub mod util;
