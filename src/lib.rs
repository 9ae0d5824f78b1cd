pub mod appsettings;
pub mod bot;
pub mod delivery;
pub mod intent;
pub mod scheduler;
pub mod timeparse;
