pub mod groups;
pub mod handlers;
