pub mod admin;
pub mod applications;
pub mod auth;
pub mod conversations;
pub mod freelancers;
pub mod notifications;
pub mod profile;
pub mod ratings;
pub mod storage;
pub mod tasks;
