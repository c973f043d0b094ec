// src/lib.rs

pub mod config;

pub mod entities {
    pub mod balancing_reserves;
    pub mod day_ahead_prices;
}

pub mod models {
    pub mod country;
    pub mod records;
}

pub mod services {
    pub mod xml_document;
    pub mod time_series;
    pub mod retry;
    pub mod entsoe_client;
    pub mod transformer;
    pub mod storage;
}

pub mod jobs;
