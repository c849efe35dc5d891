pub mod binance;
pub mod circuit_breaker;
pub mod http_client;
pub mod llm;
