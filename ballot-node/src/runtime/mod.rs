pub mod builder;
pub mod maestro;
pub mod node;
