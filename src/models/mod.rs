pub mod facebook;
pub mod weaver;
