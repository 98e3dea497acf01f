pub mod health;
pub mod languages;
pub mod models;
pub mod translate;
