// Core primitives: error modeling, the context pool, and response byte counting.
pub mod counting;
pub mod error;
pub mod pool;
