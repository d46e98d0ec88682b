pub mod notification;
pub mod record;
pub mod webhook;
