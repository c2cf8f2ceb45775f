pub mod tenant;

pub use tenant::OwnerContext;
