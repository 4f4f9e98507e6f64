pub mod user;
pub mod visitor_event;
