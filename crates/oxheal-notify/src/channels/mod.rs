pub mod log;
pub mod webhook;

pub use self::log::LogDispatcher;
pub use webhook::WebhookDispatcher;
