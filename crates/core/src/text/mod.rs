pub mod json_repair;
pub mod truncate;

pub use json_repair::extract_json;
pub use truncate::{truncate_response, truncate_with_ellipsis};
