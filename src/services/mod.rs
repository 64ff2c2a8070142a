pub mod membership;
pub mod notifier;
pub mod packing;
pub mod trips;
