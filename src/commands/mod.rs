pub mod db;
pub mod http;
pub mod issues;
pub mod settings;
