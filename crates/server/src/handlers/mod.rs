//! HTTP request handlers.

pub mod assets;
pub mod health;
pub mod manifest;
pub mod publish;

pub use assets::*;
pub use health::*;
pub use manifest::*;
pub use publish::*;
