pub mod atomic_stack;

pub use atomic_stack::{AtomicStack, StackNode};
