pub mod notification_repository;
pub mod preference_repository;
pub mod template_repository;

pub use notification_repository::NotificationRepository;
pub use preference_repository::NotificationPreferenceRepository;
pub use template_repository::TemplateRepository;
