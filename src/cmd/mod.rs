pub mod browse;
pub mod output;
pub mod sites;
pub mod tools;
