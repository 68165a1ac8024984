pub mod alert;
pub mod attempt;
pub mod channel;
pub mod inbox;
pub mod request;
pub mod response;
pub mod retry;
pub mod stats;
pub mod webhook;
