pub mod cache;
pub mod init;
pub mod output;
pub mod resources;
pub mod run;
pub mod show;
pub mod unlock;
