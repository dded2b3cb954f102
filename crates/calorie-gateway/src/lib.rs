pub mod app;
pub mod chat_sender;
pub mod dispatch;
pub mod http;
