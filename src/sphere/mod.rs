//! CivicSphere client SDK
//!
//! Domain services (communities, climate actions, projects, chat, friends,
//! notifications, profiles, dashboard stats, support tickets) built on one
//! live-view synchroniser over a hosted backend or a local SQLite store.

pub mod action;
pub mod ai;
pub mod analytics;
pub mod backend;
pub mod chat;
pub mod client;
pub mod community;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod export;
pub mod friend;
pub mod live;
pub mod logging;
pub mod notification;
pub mod profile;
pub mod project;
pub mod seed;
pub mod support;
pub mod validation;
