pub mod chat;
pub mod otp;
