pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{coordinator, ios_key, publish, tagged_bundle};
