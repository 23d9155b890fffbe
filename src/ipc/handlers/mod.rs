pub mod backup;
pub mod core;
pub mod grades;
pub mod items;
pub mod scores;
pub mod sections;
pub mod students;
pub mod thresholds;
