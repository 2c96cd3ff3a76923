pub mod credential;
pub mod listeners;
pub mod preferences;
pub mod proxy;
pub mod region;
pub(crate) mod reqwest;
