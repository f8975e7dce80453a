pub use super::tracked_title::Entity as TrackedTitles;
