pub mod download;
pub mod media;
