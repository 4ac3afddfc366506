pub mod emissions;
pub mod health;
