pub mod category;
pub mod requests;
