pub mod admin;
pub mod create;
pub mod init;
pub mod list;
pub mod show;
pub mod sim;
pub mod token;
pub mod transition;
pub mod whoami;
