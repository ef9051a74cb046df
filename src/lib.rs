pub mod config;
pub mod dashboard;
pub mod driver;
pub mod environment;
pub mod errors;
pub mod gitinfo;
pub mod intent;
pub mod llm;
pub mod locks;
pub mod logging;
pub mod models;
pub mod prompts;
pub mod roles;
pub mod scheduler;
pub mod state;
pub mod ui;
pub mod util;
