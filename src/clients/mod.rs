pub mod catalog;
pub mod jikan;
pub mod registrar;

pub use catalog::{CatalogClient, VideoCatalog};
pub use jikan::{JikanClient, SeriesInfoSource};
pub use registrar::{RegistrarClient, VideoRegistrar};
