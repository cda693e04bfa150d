pub mod form;
pub mod request;
pub mod transition;
pub mod unit;
pub mod user;
