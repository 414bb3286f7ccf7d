pub const MESSAGES_CONSUMED_TOTAL: &str = "storm_etl_messages_consumed_total";
pub const MESSAGES_PRODUCED_TOTAL: &str = "storm_etl_messages_produced_total";
pub const TRANSFORM_ERRORS_TOTAL: &str = "storm_etl_transform_errors_total";
pub const PIPELINE_RUNNING: &str = "storm_etl_pipeline_running";
pub const BATCH_SIZE: &str = "storm_etl_batch_size";
pub const BATCH_PROCESSING_DURATION_SECONDS: &str = "storm_etl_batch_processing_duration_seconds";

// Geocoding. Labels: method={forward,reverse}, outcome={success,error,empty},
// result={hit,miss}.
pub const GEOCODE_REQUESTS_TOTAL: &str = "storm_etl_geocode_requests_total";
pub const GEOCODE_CACHE_TOTAL: &str = "storm_etl_geocode_cache_total";
pub const GEOCODE_API_DURATION_SECONDS: &str = "storm_etl_geocode_api_duration_seconds";
pub const GEOCODE_ENABLED: &str = "storm_etl_geocode_enabled";
