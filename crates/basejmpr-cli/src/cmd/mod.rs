pub mod info;
pub mod revision;
