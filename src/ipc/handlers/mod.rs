pub mod activity;
pub mod auth;
pub mod broadcast;
pub mod chat;
pub mod complaints;
pub mod core;
pub mod dashboard;
pub mod notifications;
pub mod orgs;
pub mod profile;
pub mod quizzes;
