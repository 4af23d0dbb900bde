pub mod agent;
pub mod scrape;
