pub mod email;
pub mod init;
pub mod notifications;
pub mod push;
pub mod sms;
pub mod template;
