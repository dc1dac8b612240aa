pub mod core;

pub use crate::core::mempool::{Ack, Mempool, MempoolConfig};
