pub mod attendance;
pub mod backup;
pub mod core;
pub mod grades;
pub mod jury;
pub mod modules;
pub mod practices;
pub mod reports;
pub mod scoring;
pub mod setup;
pub mod users;
