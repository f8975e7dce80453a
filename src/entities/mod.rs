pub mod prelude;

pub mod tracked_title;
