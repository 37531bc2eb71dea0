pub mod booking;
pub mod decision;
pub mod message;
pub mod session;
pub mod tool;
