pub mod hub;
pub mod notify;
pub mod storage;
