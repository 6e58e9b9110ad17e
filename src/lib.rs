pub mod config;
pub mod pages;
pub mod pipeline;
pub mod playback;
pub mod recognition;
pub mod session;
pub mod storage;
