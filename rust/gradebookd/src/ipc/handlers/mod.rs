pub mod analytics;
pub mod core;
pub mod entities;
pub mod grades;
pub mod insights;
pub mod setup;
