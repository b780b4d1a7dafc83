pub mod fakes;
pub mod image;
pub mod paths;
pub mod traits;
pub mod types;

pub use image::canonical_image_name;
pub use paths::Paths;
pub use traits::*;
pub use types::*;
