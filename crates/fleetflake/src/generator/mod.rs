mod lock;
mod node;
mod status;
#[cfg(test)]
mod tests;

pub use lock::*;
pub use node::*;
pub use status::*;
