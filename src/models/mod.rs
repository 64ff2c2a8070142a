pub mod folder;
pub mod membership;
pub mod session;
pub mod task;
pub mod trip;
pub mod user;
