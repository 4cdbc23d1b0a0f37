//! Data models for BookSwap entities.
//!
//! - `User`: platform members
//! - `Book`, `Author`, `Genre`, `Publisher`: the book catalogue
//! - `LoginCredentials`, `RegisterData`, `AuthResponse`: authentication payloads

pub mod auth;
pub mod book;
pub mod user;

pub use auth::{AuthResponse, LoginCredentials, RegisterData};
pub use book::{Author, Book, Genre, Publisher};
pub use user::User;
