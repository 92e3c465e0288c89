pub mod calls;
pub mod config;
pub mod transcripts;
