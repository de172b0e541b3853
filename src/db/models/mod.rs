pub mod category;
pub mod grants;
pub mod history;
pub mod requests;
pub mod subscription;
pub mod user;
